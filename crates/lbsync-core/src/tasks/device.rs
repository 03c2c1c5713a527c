// Device operations as flow tasks.
//
// Each task carries the entity it acts on; flow-wide context (the load
// balancer, VIP plug outcome) travels through the store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{LOAD_BALANCER, VIP_PLUGGED};
use crate::device::DeviceDriver;
use crate::engine::{RetryPolicy, Store, Task};
use crate::error::CoreError;
use crate::model::{HealthMonitor, Listener, Member, Pool};

const NEEDS_LB: &[&str] = &[LOAD_BALANCER.name()];
const PLUG_OUTPUT: &[&str] = &[VIP_PLUGGED.name()];

#[derive(Debug, Clone, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeviceOp {
    EnsureMultiTenancy,
    /// `owned` is false when sibling load balancers already share the
    /// tenant; such a tenant is never torn down on revert.
    CreateTenant { tenant: String, owned: bool },
    DeleteTenant { tenant: String },
    PlugVip { vip: String },
    UnplugVip { vip: String },
    CreateListener { listener: Listener, pool: Option<Pool> },
    UpdateListener { listener: Listener, pool: Option<Pool> },
    DeleteListener(Listener),
    CreatePool(Pool),
    UpdatePool(Pool),
    DeletePool(Pool),
    /// Virtual servers of the listeners forwarding to a new pool.
    ProvisionPoolListeners { pool: Pool, listeners: Vec<Listener> },
    RefreshPoolListeners { pool: Pool, listeners: Vec<Listener> },
    CreateMember(Member),
    UpdateMember(Member),
    DeleteMember(Member),
    CreateHealthMonitor(HealthMonitor),
    UpdateHealthMonitor(HealthMonitor),
    DeleteHealthMonitor(HealthMonitor),
}

impl DeviceOp {
    fn subject(&self) -> &str {
        match self {
            Self::EnsureMultiTenancy => "global",
            Self::CreateTenant { tenant, .. } | Self::DeleteTenant { tenant } => tenant,
            Self::PlugVip { vip } | Self::UnplugVip { vip } => vip,
            Self::CreateListener { listener, .. }
            | Self::UpdateListener { listener, .. }
            | Self::DeleteListener(listener) => listener.id.as_str(),
            Self::CreatePool(pool)
            | Self::UpdatePool(pool)
            | Self::DeletePool(pool)
            | Self::ProvisionPoolListeners { pool, .. }
            | Self::RefreshPoolListeners { pool, .. } => pool.id.as_str(),
            Self::CreateMember(m) | Self::UpdateMember(m) | Self::DeleteMember(m) => m.id.as_str(),
            Self::CreateHealthMonitor(hm)
            | Self::UpdateHealthMonitor(hm)
            | Self::DeleteHealthMonitor(hm) => hm.id.as_str(),
        }
    }

    fn needs_load_balancer(&self) -> bool {
        matches!(
            self,
            Self::CreateListener { .. }
                | Self::UpdateListener { .. }
                | Self::ProvisionPoolListeners { .. }
                | Self::RefreshPoolListeners { .. }
        )
    }
}

/// One device operation, with its compensating action.
pub struct DeviceTask {
    name: String,
    driver: Arc<DeviceDriver>,
    op: DeviceOp,
    retry: Option<RetryPolicy>,
}

impl DeviceTask {
    pub fn new(driver: &Arc<DeviceDriver>, op: DeviceOp) -> Self {
        Self {
            name: format!("{op}:{}", op.subject()),
            driver: Arc::clone(driver),
            op,
            retry: None,
        }
    }

    /// Retry transient failures of this task under `policy`.
    pub fn retryable(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn op(&self) -> &DeviceOp {
        &self.op
    }
}

#[async_trait]
impl Task for DeviceTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires(&self) -> &[&'static str] {
        if self.op.needs_load_balancer() { NEEDS_LB } else { &[] }
    }

    fn provides(&self) -> &[&'static str] {
        if matches!(self.op, DeviceOp::PlugVip { .. }) {
            PLUG_OUTPUT
        } else {
            &[]
        }
    }

    fn retry(&self) -> Option<RetryPolicy> {
        self.retry
    }

    async fn execute(&self, store: &Store) -> Result<(), CoreError> {
        let d = &self.driver;
        match &self.op {
            DeviceOp::EnsureMultiTenancy => d.ensure_multi_tenancy().await,
            DeviceOp::CreateTenant { tenant, .. } => d.create_tenant(tenant).await,
            DeviceOp::DeleteTenant { tenant } => d.delete_tenant(tenant).await,
            DeviceOp::PlugVip { vip } => {
                let added = d.plug_vip(vip).await?;
                store.insert(VIP_PLUGGED, added);
                Ok(())
            }
            DeviceOp::UnplugVip { vip } => d.unplug_vip(vip).await.map(|_| ()),
            DeviceOp::CreateListener { listener, pool } => {
                let lb = store.get(LOAD_BALANCER)?;
                d.create_listener(&lb, listener, pool.as_ref()).await.map(|_| ())
            }
            DeviceOp::UpdateListener { listener, pool } => {
                let lb = store.get(LOAD_BALANCER)?;
                d.update_listener(&lb, listener, pool.as_ref()).await.map(|_| ())
            }
            DeviceOp::DeleteListener(listener) => d.delete_listener(listener).await,
            DeviceOp::CreatePool(pool) => d.create_pool(pool).await,
            DeviceOp::UpdatePool(pool) => d.update_pool(pool).await,
            DeviceOp::DeletePool(pool) => d.delete_pool(pool).await,
            DeviceOp::ProvisionPoolListeners { pool, listeners } => {
                let lb = store.get(LOAD_BALANCER)?;
                for listener in listeners {
                    d.create_listener(&lb, listener, Some(pool)).await?;
                }
                Ok(())
            }
            DeviceOp::RefreshPoolListeners { pool, listeners } => {
                let lb = store.get(LOAD_BALANCER)?;
                for listener in listeners {
                    d.update_listener(&lb, listener, Some(pool)).await?;
                }
                Ok(())
            }
            DeviceOp::CreateMember(m) => d.create_member(m).await,
            DeviceOp::UpdateMember(m) => d.update_member(m).await,
            DeviceOp::DeleteMember(m) => d.delete_member(m).await,
            DeviceOp::CreateHealthMonitor(hm) => d.create_health_monitor(hm).await,
            DeviceOp::UpdateHealthMonitor(hm) => d.update_health_monitor(hm).await,
            DeviceOp::DeleteHealthMonitor(hm) => d.delete_health_monitor(hm).await,
        }
    }

    async fn revert(&self, inputs: &Store) -> Result<(), CoreError> {
        let d = &self.driver;
        match &self.op {
            DeviceOp::CreateTenant { tenant, owned: true } => {
                warn!(tenant = %tenant, "reverting tenant create");
                d.delete_tenant(tenant).await
            }
            DeviceOp::PlugVip { vip } => {
                if inputs.try_get(VIP_PLUGGED).is_some_and(|added| *added) {
                    d.unplug_vip(vip).await?;
                }
                Ok(())
            }
            DeviceOp::CreateListener { listener, .. } => d.delete_listener(listener).await,
            DeviceOp::ProvisionPoolListeners { listeners, .. } => {
                for listener in listeners.iter().rev() {
                    d.delete_listener(listener).await?;
                }
                Ok(())
            }
            DeviceOp::CreatePool(pool) => d.delete_pool(pool).await,
            DeviceOp::CreateMember(m) => d.delete_member(m).await,
            DeviceOp::CreateHealthMonitor(hm) => d.delete_health_monitor(hm).await,
            other => {
                debug!(op = %other, "nothing to compensate");
                Ok(())
            }
        }
    }
}
