// ── State store boundary ──
//
// The logical model lives in an external store. The core reads entity
// payloads and writes back status fields, removals and statistics only.

mod memory;

pub use memory::MemoryStateStore;

use async_trait::async_trait;
use lbsync_api::VsStats;

use crate::error::CoreError;
use crate::model::{
    EntityId, EntityKind, HealthMonitor, Listener, LoadBalancer, LoadBalancerTree, Member,
    OperatingStatus, Pool, ProvisioningStatus,
};

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_balancer(&self, id: &EntityId) -> Result<Option<LoadBalancer>, CoreError>;
    async fn listener(&self, id: &EntityId) -> Result<Option<Listener>, CoreError>;
    async fn pool(&self, id: &EntityId) -> Result<Option<Pool>, CoreError>;
    async fn member(&self, id: &EntityId) -> Result<Option<Member>, CoreError>;
    async fn health_monitor(&self, id: &EntityId) -> Result<Option<HealthMonitor>, CoreError>;

    /// The load balancer with every listener, pool, member and monitor below it.
    async fn load_balancer_tree(&self, id: &EntityId) -> Result<Option<LoadBalancerTree>, CoreError>;

    async fn load_balancers(&self) -> Result<Vec<LoadBalancer>, CoreError>;

    /// Write status fields. `None` leaves a field untouched.
    async fn set_status(
        &self,
        kind: EntityKind,
        id: &EntityId,
        provisioning: Option<ProvisioningStatus>,
        operating: Option<OperatingStatus>,
    ) -> Result<(), CoreError>;

    /// Drop a record once its device objects are gone. Missing is fine.
    async fn remove(&self, kind: EntityKind, id: &EntityId) -> Result<(), CoreError>;

    async fn record_stats(&self, load_balancer: &EntityId, stats: VsStats) -> Result<(), CoreError>;

    async fn load_balancers_with_status(
        &self,
        status: ProvisioningStatus,
    ) -> Result<Vec<LoadBalancer>, CoreError> {
        Ok(self
            .load_balancers()
            .await?
            .into_iter()
            .filter(|lb| lb.provisioning_status == status)
            .collect())
    }

    async fn load_balancers_of_tenant(&self, tenant: &str) -> Result<Vec<LoadBalancer>, CoreError> {
        Ok(self
            .load_balancers()
            .await?
            .into_iter()
            .filter(|lb| lb.tenant_id == tenant)
            .collect())
    }
}
