// ── In-memory state store ──
//
// DashMap-backed records keyed by entity id. Relations are resolved through
// each child's parent reference, so trees stay consistent as records come
// and go.

use async_trait::async_trait;
use dashmap::DashMap;
use lbsync_api::VsStats;

use super::StateStore;
use crate::error::CoreError;
use crate::model::{
    EntityId, EntityKind, HealthMonitor, Listener, LoadBalancer, LoadBalancerTree, Member,
    OperatingStatus, Pool, PoolTree, ProvisioningStatus,
};

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    load_balancers: DashMap<EntityId, LoadBalancer>,
    listeners: DashMap<EntityId, Listener>,
    pools: DashMap<EntityId, Pool>,
    members: DashMap<EntityId, Member>,
    health_monitors: DashMap<EntityId, HealthMonitor>,
    stats: DashMap<EntityId, VsStats>,
}

fn sorted<T: Clone>(map: &DashMap<EntityId, T>, keep: impl Fn(&T) -> bool) -> Vec<T> {
    let mut out: Vec<(EntityId, T)> = map
        .iter()
        .filter(|e| keep(e.value()))
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    out.into_iter().map(|(_, v)| v).collect()
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_load_balancer(&self, lb: LoadBalancer) {
        self.load_balancers.insert(lb.id.clone(), lb);
    }

    pub fn put_listener(&self, listener: Listener) {
        self.listeners.insert(listener.id.clone(), listener);
    }

    pub fn put_pool(&self, pool: Pool) {
        self.pools.insert(pool.id.clone(), pool);
    }

    pub fn put_member(&self, member: Member) {
        self.members.insert(member.id.clone(), member);
    }

    pub fn put_health_monitor(&self, hm: HealthMonitor) {
        self.health_monitors.insert(hm.id.clone(), hm);
    }

    /// Last statistics recorded for a load balancer.
    pub fn stats(&self, load_balancer: &EntityId) -> Option<VsStats> {
        self.stats.get(load_balancer).map(|s| *s)
    }

    /// Current provisioning status of any record, `None` once removed.
    pub fn provisioning_status(&self, kind: EntityKind, id: &EntityId) -> Option<ProvisioningStatus> {
        match kind {
            EntityKind::LoadBalancer => self.load_balancers.get(id).map(|e| e.provisioning_status),
            EntityKind::Listener => self.listeners.get(id).map(|e| e.provisioning_status),
            EntityKind::Pool => self.pools.get(id).map(|e| e.provisioning_status),
            EntityKind::Member => self.members.get(id).map(|e| e.provisioning_status),
            EntityKind::HealthMonitor => self.health_monitors.get(id).map(|e| e.provisioning_status),
        }
    }

    pub fn operating_status(&self, kind: EntityKind, id: &EntityId) -> Option<OperatingStatus> {
        match kind {
            EntityKind::LoadBalancer => self.load_balancers.get(id).map(|e| e.operating_status),
            EntityKind::Listener => self.listeners.get(id).map(|e| e.operating_status),
            EntityKind::Pool => self.pools.get(id).map(|e| e.operating_status),
            EntityKind::Member => self.members.get(id).map(|e| e.operating_status),
            EntityKind::HealthMonitor => self.health_monitors.get(id).map(|e| e.operating_status),
        }
    }

    fn pool_tree(&self, pool: Pool) -> PoolTree {
        let members = sorted(&self.members, |m| m.pool_id == pool.id);
        let health_monitor = pool
            .health_monitor_id
            .as_ref()
            .and_then(|id| self.health_monitors.get(id).map(|h| h.clone()))
            .or_else(|| {
                self.health_monitors
                    .iter()
                    .find(|h| h.pool_id == pool.id)
                    .map(|h| h.clone())
            });
        PoolTree {
            pool,
            members,
            health_monitor,
        }
    }
}

macro_rules! apply_status {
    ($map:expr, $kind:expr, $id:expr, $prov:expr, $oper:expr) => {{
        let mut entry = $map.get_mut($id).ok_or_else(|| CoreError::NotFound {
            entity_type: $kind.to_string(),
            identifier: $id.to_string(),
        })?;
        if let Some(p) = $prov {
            entry.provisioning_status = p;
        }
        if let Some(o) = $oper {
            entry.operating_status = o;
        }
    }};
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_balancer(&self, id: &EntityId) -> Result<Option<LoadBalancer>, CoreError> {
        Ok(self.load_balancers.get(id).map(|e| e.clone()))
    }

    async fn listener(&self, id: &EntityId) -> Result<Option<Listener>, CoreError> {
        Ok(self.listeners.get(id).map(|e| e.clone()))
    }

    async fn pool(&self, id: &EntityId) -> Result<Option<Pool>, CoreError> {
        Ok(self.pools.get(id).map(|e| e.clone()))
    }

    async fn member(&self, id: &EntityId) -> Result<Option<Member>, CoreError> {
        Ok(self.members.get(id).map(|e| e.clone()))
    }

    async fn health_monitor(&self, id: &EntityId) -> Result<Option<HealthMonitor>, CoreError> {
        Ok(self.health_monitors.get(id).map(|e| e.clone()))
    }

    async fn load_balancer_tree(&self, id: &EntityId) -> Result<Option<LoadBalancerTree>, CoreError> {
        let Some(load_balancer) = self.load_balancers.get(id).map(|e| e.clone()) else {
            return Ok(None);
        };
        let listeners = sorted(&self.listeners, |l| &l.load_balancer_id == id);
        let pools = sorted(&self.pools, |p| &p.load_balancer_id == id)
            .into_iter()
            .map(|p| self.pool_tree(p))
            .collect();
        Ok(Some(LoadBalancerTree {
            load_balancer,
            listeners,
            pools,
        }))
    }

    async fn load_balancers(&self) -> Result<Vec<LoadBalancer>, CoreError> {
        Ok(sorted(&self.load_balancers, |_| true))
    }

    async fn set_status(
        &self,
        kind: EntityKind,
        id: &EntityId,
        provisioning: Option<ProvisioningStatus>,
        operating: Option<OperatingStatus>,
    ) -> Result<(), CoreError> {
        match kind {
            EntityKind::LoadBalancer => apply_status!(self.load_balancers, kind, id, provisioning, operating),
            EntityKind::Listener => apply_status!(self.listeners, kind, id, provisioning, operating),
            EntityKind::Pool => apply_status!(self.pools, kind, id, provisioning, operating),
            EntityKind::Member => apply_status!(self.members, kind, id, provisioning, operating),
            EntityKind::HealthMonitor => {
                apply_status!(self.health_monitors, kind, id, provisioning, operating);
            }
        }
        Ok(())
    }

    async fn remove(&self, kind: EntityKind, id: &EntityId) -> Result<(), CoreError> {
        match kind {
            EntityKind::LoadBalancer => {
                self.load_balancers.remove(id);
                self.stats.remove(id);
            }
            EntityKind::Listener => {
                self.listeners.remove(id);
            }
            EntityKind::Pool => {
                self.pools.remove(id);
            }
            EntityKind::Member => {
                self.members.remove(id);
            }
            EntityKind::HealthMonitor => {
                self.health_monitors.remove(id);
                for mut pool in self.pools.iter_mut() {
                    if pool.health_monitor_id.as_ref() == Some(id) {
                        pool.health_monitor_id = None;
                    }
                }
            }
        }
        Ok(())
    }

    async fn record_stats(&self, load_balancer: &EntityId, stats: VsStats) -> Result<(), CoreError> {
        self.stats.insert(load_balancer.clone(), stats);
        Ok(())
    }
}
