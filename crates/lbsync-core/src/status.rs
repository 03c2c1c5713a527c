// ── Status reporter ──
//
// The only writer of provisioning and operating status. Terminal outcomes of
// every flow pass through here on their way to the state store.

use std::sync::Arc;

use lbsync_api::VsStats;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{EntityId, EntityKind, LoadBalancerTree, OperatingStatus, ProvisioningStatus};
use crate::state::StateStore;

#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn StateStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn mark_pending(
        &self,
        kind: EntityKind,
        id: &EntityId,
        status: ProvisioningStatus,
    ) -> Result<(), CoreError> {
        debug!(%kind, %id, %status, "marking pending");
        self.store.set_status(kind, id, Some(status), None).await
    }

    /// ACTIVE and ONLINE.
    pub async fn mark_active(&self, kind: EntityKind, id: &EntityId) -> Result<(), CoreError> {
        debug!(%kind, %id, "marking active");
        self.store
            .set_status(
                kind,
                id,
                Some(ProvisioningStatus::Active),
                Some(OperatingStatus::Online),
            )
            .await
    }

    /// Device objects are gone; the record goes with them.
    pub async fn mark_deleted(&self, kind: EntityKind, id: &EntityId) -> Result<(), CoreError> {
        debug!(%kind, %id, "marking deleted");
        self.store.remove(kind, id).await
    }

    /// ERROR. Never fails: a status write that cannot land is only logged,
    /// so it cannot mask the failure being reported.
    pub async fn mark_error(&self, kind: EntityKind, id: &EntityId) {
        if let Err(e) = self
            .store
            .set_status(
                kind,
                id,
                Some(ProvisioningStatus::Error),
                Some(OperatingStatus::Error),
            )
            .await
        {
            warn!(%kind, %id, error = %e, "could not record ERROR status");
        }
    }

    /// Mark each ancestor ACTIVE, nearest first. Ancestors already removed
    /// are skipped.
    pub async fn mark_ancestors_active(&self, ancestors: &[(EntityKind, EntityId)]) -> Result<(), CoreError> {
        for (kind, id) in ancestors {
            match self.mark_active(*kind, id).await {
                Err(CoreError::NotFound { .. }) => {
                    debug!(%kind, %id, "ancestor gone, skipping");
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Report every entity of a healthy tree ONLINE.
    pub async fn report_online(&self, tree: &LoadBalancerTree) -> Result<(), CoreError> {
        let online = Some(OperatingStatus::Online);
        let lb = &tree.load_balancer;
        self.store
            .set_status(EntityKind::LoadBalancer, &lb.id, None, online)
            .await?;
        for listener in &tree.listeners {
            self.store
                .set_status(EntityKind::Listener, &listener.id, None, online)
                .await?;
        }
        for pool in &tree.pools {
            self.store
                .set_status(EntityKind::Pool, &pool.pool.id, None, online)
                .await?;
            for member in &pool.members {
                self.store
                    .set_status(EntityKind::Member, &member.id, None, online)
                    .await?;
            }
            if let Some(hm) = &pool.health_monitor {
                self.store
                    .set_status(EntityKind::HealthMonitor, &hm.id, None, online)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn record_stats(&self, load_balancer: &EntityId, stats: VsStats) -> Result<(), CoreError> {
        self.store.record_stats(load_balancer, stats).await
    }
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}
