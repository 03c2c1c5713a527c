// State-store status writes.

use async_trait::async_trait;

use super::LOAD_BALANCER;
use crate::engine::{Store, Task};
use crate::error::CoreError;
use crate::model::{EntityId, EntityKind, ProvisioningStatus};
use crate::status::StatusReporter;

pub struct MarkPending {
    name: String,
    reporter: StatusReporter,
    kind: EntityKind,
    id: EntityId,
    status: ProvisioningStatus,
}

impl MarkPending {
    pub fn new(reporter: &StatusReporter, kind: EntityKind, id: &EntityId, status: ProvisioningStatus) -> Self {
        Self {
            name: format!("mark-{kind}-{}:{id}", status.to_string().to_lowercase()),
            reporter: reporter.clone(),
            kind,
            id: id.clone(),
            status,
        }
    }
}

#[async_trait]
impl Task for MarkPending {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
        self.reporter.mark_pending(self.kind, &self.id, self.status).await
    }
}

pub struct MarkActive {
    name: String,
    reporter: StatusReporter,
    kind: EntityKind,
    id: EntityId,
}

impl MarkActive {
    pub fn new(reporter: &StatusReporter, kind: EntityKind, id: &EntityId) -> Self {
        Self {
            name: format!("mark-{kind}-active:{id}"),
            reporter: reporter.clone(),
            kind,
            id: id.clone(),
        }
    }
}

#[async_trait]
impl Task for MarkActive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
        self.reporter.mark_active(self.kind, &self.id).await
    }
}

pub struct MarkDeleted {
    name: String,
    reporter: StatusReporter,
    kind: EntityKind,
    id: EntityId,
}

impl MarkDeleted {
    pub fn new(reporter: &StatusReporter, kind: EntityKind, id: &EntityId) -> Self {
        Self {
            name: format!("mark-{kind}-deleted:{id}"),
            reporter: reporter.clone(),
            kind,
            id: id.clone(),
        }
    }
}

#[async_trait]
impl Task for MarkDeleted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
        self.reporter.mark_deleted(self.kind, &self.id).await
    }
}

/// Return the parents of a changed entity to ACTIVE.
pub struct MarkAncestorsActive {
    name: String,
    reporter: StatusReporter,
    ancestors: Vec<(EntityKind, EntityId)>,
}

impl MarkAncestorsActive {
    pub fn new(reporter: &StatusReporter, ancestors: Vec<(EntityKind, EntityId)>) -> Self {
        let names: Vec<String> = ancestors.iter().map(|(k, _)| k.to_string()).collect();
        Self {
            name: format!("mark-ancestors-active:{}", names.join("+")),
            reporter: reporter.clone(),
            ancestors,
        }
    }
}

#[async_trait]
impl Task for MarkAncestorsActive {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _store: &Store) -> Result<(), CoreError> {
        self.reporter.mark_ancestors_active(&self.ancestors).await
    }
}

const REQUIRES: &[&str] = &[LOAD_BALANCER.name()];

/// Report the flow's load balancer tree ONLINE.
pub struct ReportOnline {
    reporter: StatusReporter,
}

impl ReportOnline {
    pub fn new(reporter: &StatusReporter) -> Self {
        Self {
            reporter: reporter.clone(),
        }
    }
}

#[async_trait]
impl Task for ReportOnline {
    fn name(&self) -> &str {
        "report-online"
    }

    fn requires(&self) -> &[&'static str] {
        REQUIRES
    }

    async fn execute(&self, store: &Store) -> Result<(), CoreError> {
        let lb = store.get(LOAD_BALANCER)?;
        match self.reporter.store().load_balancer_tree(&lb.id).await? {
            Some(tree) => self.reporter.report_online(&tree).await,
            None => Ok(()),
        }
    }
}
