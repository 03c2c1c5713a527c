// ── Flow builder ──
//
// Composes one linear flow per lifecycle operation:
//
//   error-on-revert -> mark pending -> device task(s) -> mark active/deleted
//     -> mark ancestors active -> notify
//
// Cascading load balancer deletes fan out into best-effort unordered groups.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::device::DeviceDriver;
use crate::engine::{Flow, RetryPolicy, Store};
use crate::model::{
    EntityId, EntityKind, HealthMonitor, Listener, LoadBalancer, LoadBalancerTree, Member, Pool,
    PoolTree, ProvisioningStatus,
};
use crate::status::StatusReporter;
use crate::tasks::{
    DeviceOp, DeviceTask, ErrorOnRevert, LOAD_BALANCER, LifecycleAction, LifecycleEvent,
    MarkActive, MarkAncestorsActive, MarkDeleted, MarkPending, Notify, ReportOnline,
};

/// A flow and the store it starts from.
#[derive(Debug)]
pub struct PreparedFlow {
    pub flow: Flow,
    pub store: Store,
}

impl PreparedFlow {
    fn under(flow: Flow, lb: &LoadBalancer) -> Self {
        Self {
            flow,
            store: Store::new().with(LOAD_BALANCER, lb.clone()),
        }
    }
}

#[derive(Clone)]
pub struct FlowBuilder {
    driver: Arc<DeviceDriver>,
    reporter: StatusReporter,
    device_retry: RetryPolicy,
    notifier: Option<broadcast::Sender<LifecycleEvent>>,
}

impl FlowBuilder {
    pub fn new(
        driver: Arc<DeviceDriver>,
        reporter: StatusReporter,
        device_retry: RetryPolicy,
        notifier: Option<broadcast::Sender<LifecycleEvent>>,
    ) -> Self {
        Self {
            driver,
            reporter,
            device_retry,
            notifier,
        }
    }

    fn device(&self, op: DeviceOp) -> DeviceTask {
        DeviceTask::new(&self.driver, op).retryable(self.device_retry)
    }

    /// Opening tasks shared by every lifecycle flow.
    fn begin(&self, name: String, kind: EntityKind, id: &EntityId, status: ProvisioningStatus) -> Flow {
        Flow::linear(name)
            .task(ErrorOnRevert::new(&self.reporter, kind, id))
            .task(MarkPending::new(&self.reporter, kind, id, status))
    }

    /// Closing notification, when enabled.
    fn notify(&self, flow: Flow, kind: EntityKind, id: &EntityId, tenant: &str, action: LifecycleAction) -> Flow {
        match &self.notifier {
            Some(sender) => flow.task(Notify::new(sender, kind, id, tenant, action)),
            None => flow,
        }
    }

    // ── Load balancers ───────────────────────────────────────────────

    /// `owns_tenant` is false when sibling load balancers already live in
    /// the tenant scope.
    pub fn create_load_balancer(&self, lb: &LoadBalancer, owns_tenant: bool) -> PreparedFlow {
        let kind = EntityKind::LoadBalancer;
        let flow = self
            .begin(format!("create-load-balancer:{}", lb.id), kind, &lb.id, ProvisioningStatus::PendingCreate)
            .task(self.device(DeviceOp::EnsureMultiTenancy))
            .task(self.device(DeviceOp::CreateTenant {
                tenant: lb.tenant_id.clone(),
                owned: owns_tenant,
            }))
            .task(self.device(DeviceOp::PlugVip {
                vip: lb.vip_address.clone(),
            }))
            .task(MarkActive::new(&self.reporter, kind, &lb.id))
            .task(ReportOnline::new(&self.reporter));
        let flow = self.notify(flow, kind, &lb.id, &lb.tenant_id, LifecycleAction::Create);
        PreparedFlow::under(flow, lb)
    }

    /// The device has no load-balancer-level attributes to change.
    pub fn update_load_balancer(&self, lb: &LoadBalancer) -> PreparedFlow {
        let kind = EntityKind::LoadBalancer;
        let flow = self
            .begin(format!("update-load-balancer:{}", lb.id), kind, &lb.id, ProvisioningStatus::PendingUpdate)
            .task(MarkActive::new(&self.reporter, kind, &lb.id));
        let flow = self.notify(flow, kind, &lb.id, &lb.tenant_id, LifecycleAction::Update);
        PreparedFlow::under(flow, lb)
    }

    /// Cascade: listeners, then pools with their children, then the VIP
    /// and, if `teardown_tenant`, the tenant scope.
    pub fn delete_load_balancer(&self, tree: &LoadBalancerTree, teardown_tenant: bool) -> PreparedFlow {
        let lb = &tree.load_balancer;
        let kind = EntityKind::LoadBalancer;

        let mut listeners = Flow::unordered(format!("delete-listeners:{}", lb.id)).best_effort();
        for listener in &tree.listeners {
            let flow = self.delete_listener_flow(listener);
            listeners = listeners.flow(self.notify(
                flow,
                EntityKind::Listener,
                &listener.id,
                &listener.tenant_id,
                LifecycleAction::Delete,
            ));
        }
        let mut pools = Flow::unordered(format!("delete-pools:{}", lb.id)).best_effort();
        for pool in &tree.pools {
            let flow = self.delete_pool_flow(pool, &[]);
            pools = pools.flow(self.notify(
                flow,
                EntityKind::Pool,
                &pool.pool.id,
                &pool.pool.tenant_id,
                LifecycleAction::Delete,
            ));
        }

        let flow = self
            .begin(format!("delete-load-balancer:{}", lb.id), kind, &lb.id, ProvisioningStatus::PendingDelete)
            .flow(listeners)
            .flow(pools)
            .task(self.device(DeviceOp::UnplugVip {
                vip: lb.vip_address.clone(),
            }))
            .task_if(
                teardown_tenant,
                self.device(DeviceOp::DeleteTenant {
                    tenant: lb.tenant_id.clone(),
                }),
            )
            .task(MarkDeleted::new(&self.reporter, kind, &lb.id));
        let flow = self.notify(flow, kind, &lb.id, &lb.tenant_id, LifecycleAction::Delete);
        PreparedFlow::under(flow, lb)
    }

    /// Drift correction: rebuild every device object of the tree.
    pub fn redeploy(&self, tree: &LoadBalancerTree) -> PreparedFlow {
        let lb = &tree.load_balancer;
        let mut flow = Flow::linear(format!("redeploy-load-balancer:{}", lb.id))
            .task(ErrorOnRevert::new(&self.reporter, EntityKind::LoadBalancer, &lb.id))
            .task(self.device(DeviceOp::EnsureMultiTenancy))
            .task(self.device(DeviceOp::CreateTenant {
                tenant: lb.tenant_id.clone(),
                owned: false,
            }))
            .task(self.device(DeviceOp::PlugVip {
                vip: lb.vip_address.clone(),
            }));

        for pool in &tree.pools {
            let listeners: Vec<Listener> = tree.listeners_of_pool(&pool.pool.id).cloned().collect();
            flow = flow.task(self.device(DeviceOp::CreatePool(pool.pool.clone())));
            if !listeners.is_empty() {
                flow = flow.task(self.device(DeviceOp::ProvisionPoolListeners {
                    pool: pool.pool.clone(),
                    listeners,
                }));
            }
            for member in &pool.members {
                flow = flow.task(self.device(DeviceOp::CreateMember(member.clone())));
            }
            if let Some(hm) = &pool.health_monitor {
                flow = flow.task(self.device(DeviceOp::CreateHealthMonitor(hm.clone())));
            }
        }

        let flow = flow.task(ReportOnline::new(&self.reporter));
        PreparedFlow::under(flow, lb)
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub fn create_listener(&self, lb: &LoadBalancer, listener: &Listener, pool: Option<&Pool>) -> PreparedFlow {
        let kind = EntityKind::Listener;
        let flow = self
            .begin(format!("create-listener:{}", listener.id), kind, &listener.id, ProvisioningStatus::PendingCreate)
            .task(self.device(DeviceOp::CreateListener {
                listener: listener.clone(),
                pool: pool.cloned(),
            }))
            .task(MarkActive::new(&self.reporter, kind, &listener.id))
            .task(self.lb_active(lb));
        let flow = self.notify(flow, kind, &listener.id, &listener.tenant_id, LifecycleAction::Create);
        PreparedFlow::under(flow, lb)
    }

    pub fn update_listener(&self, lb: &LoadBalancer, listener: &Listener, pool: Option<&Pool>) -> PreparedFlow {
        let kind = EntityKind::Listener;
        let flow = self
            .begin(format!("update-listener:{}", listener.id), kind, &listener.id, ProvisioningStatus::PendingUpdate)
            .task(self.device(DeviceOp::UpdateListener {
                listener: listener.clone(),
                pool: pool.cloned(),
            }))
            .task(MarkActive::new(&self.reporter, kind, &listener.id))
            .task(self.lb_active(lb));
        let flow = self.notify(flow, kind, &listener.id, &listener.tenant_id, LifecycleAction::Update);
        PreparedFlow::under(flow, lb)
    }

    pub fn delete_listener(&self, lb: &LoadBalancer, listener: &Listener) -> PreparedFlow {
        let kind = EntityKind::Listener;
        let flow = Flow::linear(format!("delete-listener-request:{}", listener.id))
            .flow(self.delete_listener_flow(listener))
            .task(self.lb_active(lb));
        let flow = self.notify(flow, kind, &listener.id, &listener.tenant_id, LifecycleAction::Delete);
        PreparedFlow::under(flow, lb)
    }

    /// Without the closing notification; callers add it once ancestors
    /// are settled.
    fn delete_listener_flow(&self, listener: &Listener) -> Flow {
        let kind = EntityKind::Listener;
        self.begin(format!("delete-listener:{}", listener.id), kind, &listener.id, ProvisioningStatus::PendingDelete)
            .task(self.device(DeviceOp::DeleteListener(listener.clone())))
            .task(MarkDeleted::new(&self.reporter, kind, &listener.id))
    }

    // ── Pools ────────────────────────────────────────────────────────

    /// Also provisions the virtual servers of `listeners`, the listeners
    /// whose default pool is this pool.
    pub fn create_pool(&self, lb: &LoadBalancer, pool: &Pool, listeners: &[Listener]) -> PreparedFlow {
        let kind = EntityKind::Pool;
        let flow = self
            .begin(format!("create-pool:{}", pool.id), kind, &pool.id, ProvisioningStatus::PendingCreate)
            .task(self.device(DeviceOp::CreatePool(pool.clone())))
            .task_if(
                !listeners.is_empty(),
                self.device(DeviceOp::ProvisionPoolListeners {
                    pool: pool.clone(),
                    listeners: listeners.to_vec(),
                }),
            )
            .task(MarkActive::new(&self.reporter, kind, &pool.id))
            .task(self.lb_and_listeners_active(lb, listeners));
        let flow = self.notify(flow, kind, &pool.id, &pool.tenant_id, LifecycleAction::Create);
        PreparedFlow::under(flow, lb)
    }

    pub fn update_pool(&self, lb: &LoadBalancer, pool: &Pool, listeners: &[Listener]) -> PreparedFlow {
        let kind = EntityKind::Pool;
        let flow = self
            .begin(format!("update-pool:{}", pool.id), kind, &pool.id, ProvisioningStatus::PendingUpdate)
            .task(self.device(DeviceOp::UpdatePool(pool.clone())))
            .task_if(
                !listeners.is_empty(),
                self.device(DeviceOp::RefreshPoolListeners {
                    pool: pool.clone(),
                    listeners: listeners.to_vec(),
                }),
            )
            .task(MarkActive::new(&self.reporter, kind, &pool.id))
            .task(self.lb_and_listeners_active(lb, listeners));
        let flow = self.notify(flow, kind, &pool.id, &pool.tenant_id, LifecycleAction::Update);
        PreparedFlow::under(flow, lb)
    }

    pub fn delete_pool(&self, lb: &LoadBalancer, pool: &PoolTree, listeners: &[Listener]) -> PreparedFlow {
        let p = &pool.pool;
        let flow = Flow::linear(format!("delete-pool-request:{}", p.id))
            .flow(self.delete_pool_flow(pool, listeners))
            .task(self.lb_and_listeners_active(lb, listeners));
        let flow = self.notify(flow, EntityKind::Pool, &p.id, &p.tenant_id, LifecycleAction::Delete);
        PreparedFlow::under(flow, lb)
    }

    /// Children first: listener virtual servers, monitor, members, pool.
    /// Without the closing notification.
    fn delete_pool_flow(&self, tree: &PoolTree, listeners: &[Listener]) -> Flow {
        let pool = &tree.pool;
        let kind = EntityKind::Pool;
        let mut flow = self.begin(format!("delete-pool:{}", pool.id), kind, &pool.id, ProvisioningStatus::PendingDelete);

        for listener in listeners {
            flow = flow.task(self.device(DeviceOp::DeleteListener(listener.clone())));
        }
        if let Some(hm) = &tree.health_monitor {
            flow = flow
                .task(self.device(DeviceOp::DeleteHealthMonitor(hm.clone())))
                .task(MarkDeleted::new(&self.reporter, EntityKind::HealthMonitor, &hm.id));
        }
        for member in &tree.members {
            flow = flow
                .task(self.device(DeviceOp::DeleteMember(member.clone())))
                .task(MarkDeleted::new(&self.reporter, EntityKind::Member, &member.id));
        }
        flow.task(self.device(DeviceOp::DeletePool(pool.clone())))
            .task(MarkDeleted::new(&self.reporter, kind, &pool.id))
    }

    // ── Members ──────────────────────────────────────────────────────

    pub fn create_member(&self, lb: &LoadBalancer, member: &Member) -> PreparedFlow {
        self.member_flow(lb, member, DeviceOp::CreateMember(member.clone()), LifecycleAction::Create)
    }

    pub fn update_member(&self, lb: &LoadBalancer, member: &Member) -> PreparedFlow {
        self.member_flow(lb, member, DeviceOp::UpdateMember(member.clone()), LifecycleAction::Update)
    }

    pub fn delete_member(&self, lb: &LoadBalancer, member: &Member) -> PreparedFlow {
        self.member_flow(lb, member, DeviceOp::DeleteMember(member.clone()), LifecycleAction::Delete)
    }

    fn member_flow(&self, lb: &LoadBalancer, member: &Member, op: DeviceOp, action: LifecycleAction) -> PreparedFlow {
        let kind = EntityKind::Member;
        let flow = self
            .begin(format!("{action}-member:{}", member.id), kind, &member.id, pending_for(action))
            .task(self.device(op));
        let flow = self.finish(flow, kind, &member.id, action).task(MarkAncestorsActive::new(
            &self.reporter,
            vec![
                (EntityKind::Pool, member.pool_id.clone()),
                (EntityKind::LoadBalancer, lb.id.clone()),
            ],
        ));
        let flow = self.notify(flow, kind, &member.id, &member.tenant_id, action);
        PreparedFlow::under(flow, lb)
    }

    // ── Health monitors ──────────────────────────────────────────────

    pub fn create_health_monitor(&self, lb: &LoadBalancer, hm: &HealthMonitor) -> PreparedFlow {
        self.monitor_flow(lb, hm, DeviceOp::CreateHealthMonitor(hm.clone()), LifecycleAction::Create)
    }

    pub fn update_health_monitor(&self, lb: &LoadBalancer, hm: &HealthMonitor) -> PreparedFlow {
        self.monitor_flow(lb, hm, DeviceOp::UpdateHealthMonitor(hm.clone()), LifecycleAction::Update)
    }

    pub fn delete_health_monitor(&self, lb: &LoadBalancer, hm: &HealthMonitor) -> PreparedFlow {
        self.monitor_flow(lb, hm, DeviceOp::DeleteHealthMonitor(hm.clone()), LifecycleAction::Delete)
    }

    fn monitor_flow(&self, lb: &LoadBalancer, hm: &HealthMonitor, op: DeviceOp, action: LifecycleAction) -> PreparedFlow {
        let kind = EntityKind::HealthMonitor;
        let flow = self
            .begin(format!("{action}-health-monitor:{}", hm.id), kind, &hm.id, pending_for(action))
            .task(self.device(op));
        let flow = self.finish(flow, kind, &hm.id, action).task(MarkAncestorsActive::new(
            &self.reporter,
            vec![
                (EntityKind::Pool, hm.pool_id.clone()),
                (EntityKind::LoadBalancer, lb.id.clone()),
            ],
        ));
        let flow = self.notify(flow, kind, &hm.id, &hm.tenant_id, action);
        PreparedFlow::under(flow, lb)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn finish(&self, flow: Flow, kind: EntityKind, id: &EntityId, action: LifecycleAction) -> Flow {
        match action {
            LifecycleAction::Delete => flow.task(MarkDeleted::new(&self.reporter, kind, id)),
            LifecycleAction::Create | LifecycleAction::Update => {
                flow.task(MarkActive::new(&self.reporter, kind, id))
            }
        }
    }

    fn lb_active(&self, lb: &LoadBalancer) -> MarkAncestorsActive {
        MarkAncestorsActive::new(&self.reporter, vec![(EntityKind::LoadBalancer, lb.id.clone())])
    }

    fn lb_and_listeners_active(&self, lb: &LoadBalancer, listeners: &[Listener]) -> MarkAncestorsActive {
        let mut ancestors: Vec<_> = listeners
            .iter()
            .map(|l| (EntityKind::Listener, l.id.clone()))
            .collect();
        ancestors.push((EntityKind::LoadBalancer, lb.id.clone()));
        MarkAncestorsActive::new(&self.reporter, ancestors)
    }
}

fn pending_for(action: LifecycleAction) -> ProvisioningStatus {
    match action {
        LifecycleAction::Create => ProvisioningStatus::PendingCreate,
        LifecycleAction::Update => ProvisioningStatus::PendingUpdate,
        LifecycleAction::Delete => ProvisioningStatus::PendingDelete,
    }
}

impl std::fmt::Debug for FlowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBuilder")
            .field("device", &self.driver.name())
            .field("notifications", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}
