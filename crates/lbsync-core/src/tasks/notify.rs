// Lifecycle notifications, broadcast after a flow's state-store writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::{Store, Task};
use crate::error::CoreError;
use crate::model::{EntityId, EntityKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub kind: EntityKind,
    pub id: EntityId,
    pub tenant: String,
    pub action: LifecycleAction,
    pub at: DateTime<Utc>,
}

pub struct Notify {
    name: String,
    sender: broadcast::Sender<LifecycleEvent>,
    kind: EntityKind,
    id: EntityId,
    tenant: String,
    action: LifecycleAction,
}

impl Notify {
    pub fn new(
        sender: &broadcast::Sender<LifecycleEvent>,
        kind: EntityKind,
        id: &EntityId,
        tenant: &str,
        action: LifecycleAction,
    ) -> Self {
        Self {
            name: format!("notify-{kind}-{action}:{id}"),
            sender: sender.clone(),
            kind,
            id: id.clone(),
            tenant: tenant.to_owned(),
            action,
        }
    }
}

#[async_trait]
impl Task for Notify {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
        let event = LifecycleEvent {
            kind: self.kind,
            id: self.id.clone(),
            tenant: self.tenant.clone(),
            action: self.action,
            at: Utc::now(),
        };
        // No subscribers is not a failure.
        if self.sender.send(event).is_err() {
            debug!(task = %self.name, "no lifecycle subscribers");
        }
        Ok(())
    }
}
