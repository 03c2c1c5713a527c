use async_trait::async_trait;

use crate::engine::{Store, Task};
use crate::error::CoreError;
use crate::model::{EntityId, EntityKind};
use crate::status::StatusReporter;

/// First task of every lifecycle flow: does nothing on the way in and
/// leaves the entity in ERROR when the flow unwinds past it.
pub struct ErrorOnRevert {
    name: String,
    reporter: StatusReporter,
    kind: EntityKind,
    id: EntityId,
}

impl ErrorOnRevert {
    pub fn new(reporter: &StatusReporter, kind: EntityKind, id: &EntityId) -> Self {
        Self {
            name: format!("{kind}-to-error-on-revert:{id}"),
            reporter: reporter.clone(),
            kind,
            id: id.clone(),
        }
    }
}

#[async_trait]
impl Task for ErrorOnRevert {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
        Ok(())
    }

    async fn revert(&self, _inputs: &Store) -> Result<(), CoreError> {
        self.reporter.mark_error(self.kind, &self.id).await;
        Ok(())
    }
}
