// ── Orchestrator ──
//
// Entry point for lifecycle requests. Resolves entities from the state
// store, picks the tenant's device driver, enforces one flow per entity
// and runs the flow the builder composes. Also owns the background
// reconciliation sweep, statistics collection and token refresh.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::OrchestratorConfig;
use crate::device::{DeviceDriver, PortDirectory, VipAllowList};
use crate::engine::{Engine, FlowReport};
use crate::error::CoreError;
use crate::flows::{FlowBuilder, PreparedFlow};
use crate::model::{EntityId, EntityKind, LoadBalancer, LoadBalancerTree, PoolTree, ProvisioningStatus};
use crate::state::StateStore;
use crate::status::StatusReporter;
use crate::tasks::{LifecycleAction, LifecycleEvent};

const EVENT_CHANNEL_SIZE: usize = 256;

/// One lifecycle request from the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub kind: EntityKind,
    pub action: LifecycleAction,
    pub id: EntityId,
}

impl Request {
    pub fn new(kind: EntityKind, action: LifecycleAction, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            action,
            id: id.into(),
        }
    }

    pub fn create(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self::new(kind, LifecycleAction::Create, id)
    }

    pub fn update(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self::new(kind, LifecycleAction::Update, id)
    }

    pub fn delete(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self::new(kind, LifecycleAction::Delete, id)
    }
}

/// What one reconciliation sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_renewed: usize,
    pub deletes_redriven: usize,
    pub probed: usize,
    pub redeployed: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    state: Arc<dyn StateStore>,
    reporter: StatusReporter,
    engine: Engine,
    /// Device name -> driver.
    drivers: DashMap<String, Arc<DeviceDriver>>,
    /// Tenant id -> driver serving it.
    tenants: DashMap<String, Arc<DeviceDriver>>,
    in_flight: DashSet<Slot>,
    events: broadcast::Sender<LifecycleEvent>,
    cancel: CancellationToken,
}

type Slot = (EntityKind, EntityId);

/// Single-flight slots held by one flow, released on drop.
struct Claim<'a> {
    in_flight: &'a DashSet<Slot>,
    held: Vec<Slot>,
}

impl Claim<'_> {
    fn add(&mut self, kind: EntityKind, id: &EntityId) -> Result<(), CoreError> {
        let slot = (kind, id.clone());
        if !self.in_flight.insert(slot.clone()) {
            return Err(CoreError::Busy {
                entity: kind.to_string(),
                id: id.to_string(),
            });
        }
        self.held.push(slot);
        Ok(())
    }

    /// Every descendant of the tree; a cascade or redeploy touches them all.
    fn add_tree(&mut self, tree: &LoadBalancerTree) -> Result<(), CoreError> {
        for listener in &tree.listeners {
            self.add(EntityKind::Listener, &listener.id)?;
        }
        for pool in &tree.pools {
            self.add(EntityKind::Pool, &pool.pool.id)?;
            for member in &pool.members {
                self.add(EntityKind::Member, &member.id)?;
            }
            if let Some(hm) = &pool.health_monitor {
                self.add(EntityKind::HealthMonitor, &hm.id)?;
            }
        }
        Ok(())
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        for slot in &self.held {
            self.in_flight.remove(slot);
        }
    }
}

impl Orchestrator {
    /// Validate the configuration and build one driver per device. No
    /// device is contacted until the first flow runs.
    pub fn new(
        config: OrchestratorConfig,
        state: Arc<dyn StateStore>,
        ports: Arc<dyn PortDirectory>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let vips = Arc::new(VipAllowList::new(ports));
        let drivers = DashMap::new();
        for (name, profile) in &config.devices {
            let driver = DeviceDriver::new(profile.clone(), Arc::clone(&vips))?;
            drivers.insert(name.clone(), Arc::new(driver));
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                reporter: StatusReporter::new(Arc::clone(&state)),
                config,
                state,
                engine: Engine::new(),
                drivers,
                tenants: DashMap::new(),
                in_flight: DashSet::new(),
                events,
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.inner.state
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Number of entities with a flow currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    // ── Driver cache ─────────────────────────────────────────────────

    /// Driver serving `tenant`, cached after the first lookup.
    pub fn driver_for(&self, tenant: &str) -> Result<Arc<DeviceDriver>, CoreError> {
        if let Some(d) = self.inner.tenants.get(tenant) {
            return Ok(Arc::clone(&d));
        }
        let device = self
            .inner
            .config
            .tenants
            .get(tenant)
            .ok_or_else(|| CoreError::Config {
                message: format!("tenant {tenant} is not mapped to any device"),
            })?;
        let driver = self
            .inner
            .drivers
            .get(device)
            .map(|d| Arc::clone(&d))
            .ok_or_else(|| CoreError::Config {
                message: format!("tenant {tenant} mapped to unknown device {device}"),
            })?;
        self.inner
            .tenants
            .insert(tenant.to_owned(), Arc::clone(&driver));
        Ok(driver)
    }

    /// Snapshot of the device drivers, so no map guard is held across awaits.
    fn drivers(&self) -> Vec<(String, Arc<DeviceDriver>)> {
        self.inner
            .drivers
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Rebuild the tenant cache from the load balancers in the state store.
    /// Returns the number of tenants cached.
    pub async fn warm_cache(&self) -> Result<usize, CoreError> {
        for lb in self.inner.state.load_balancers().await? {
            if let Err(e) = self.driver_for(&lb.tenant_id) {
                warn!(tenant = %lb.tenant_id, error = %e, "load balancer in unmapped tenant");
            }
        }
        let cached = self.inner.tenants.len();
        info!(tenants = cached, "tenant cache rebuilt");
        Ok(cached)
    }

    fn builder(&self, driver: Arc<DeviceDriver>) -> FlowBuilder {
        let notifier = self
            .inner
            .config
            .engine
            .event_notifications
            .then(|| self.inner.events.clone());
        FlowBuilder::new(
            driver,
            self.inner.reporter.clone(),
            self.inner.config.engine.device_retry,
            notifier,
        )
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Run a request on a dedicated worker.
    pub fn submit(&self, request: Request) -> JoinHandle<Result<FlowReport, CoreError>> {
        let this = self.clone();
        tokio::spawn(async move { this.execute(request).await })
    }

    /// Run a request to completion.
    ///
    /// Flow failures have already been reverted and reported to the state
    /// store when this returns; the error is the failing task's.
    pub async fn execute(&self, request: Request) -> Result<FlowReport, CoreError> {
        let mut claim = self.claim(request.kind, &request.id)?;
        if request.kind == EntityKind::LoadBalancer && request.action == LifecycleAction::Delete {
            if let Some(tree) = self.inner.state.load_balancer_tree(&request.id).await? {
                claim.add_tree(&tree)?;
            }
        }
        debug!(kind = %request.kind, action = %request.action, id = %request.id, "request accepted");

        let prepared = match self.prepare(&request).await {
            Ok(p) => p,
            Err(e) => {
                warn!(kind = %request.kind, id = %request.id, error = %e, "request could not be prepared");
                return Err(e);
            }
        };
        self.run(request.kind, &request.id, prepared).await
    }

    /// Layer-7 policies and rules have no device counterpart.
    pub async fn l7_policy(&self, action: LifecycleAction, id: &EntityId) -> Result<(), CoreError> {
        info!(%action, %id, "ignoring L7 policy request");
        Err(CoreError::Unsupported {
            operation: format!("{action} l7 policy"),
        })
    }

    pub async fn l7_rule(&self, action: LifecycleAction, id: &EntityId) -> Result<(), CoreError> {
        info!(%action, %id, "ignoring L7 rule request");
        Err(CoreError::Unsupported {
            operation: format!("{action} l7 rule"),
        })
    }

    fn claim(&self, kind: EntityKind, id: &EntityId) -> Result<Claim<'_>, CoreError> {
        let mut claim = Claim {
            in_flight: &self.inner.in_flight,
            held: Vec::new(),
        };
        claim.add(kind, id)?;
        Ok(claim)
    }

    async fn run(&self, kind: EntityKind, id: &EntityId, prepared: PreparedFlow) -> Result<FlowReport, CoreError> {
        match self.inner.engine.run(&prepared.flow, &prepared.store).await {
            Ok(report) => {
                for failure in &report.suppressed {
                    warn!(flow = %report.flow, task = %failure.task, error = %failure.error, "suppressed failure");
                }
                Ok(report)
            }
            Err(e) => {
                if e.is_divergent() {
                    error!(
                        flow = %e.flow,
                        revert_failures = e.revert_failures.len(),
                        "revert incomplete, device may diverge until resync"
                    );
                }
                self.inner.reporter.mark_error(kind, id).await;
                Err(e.source)
            }
        }
    }

    // ── Lookups ──────────────────────────────────────────────────────

    /// Fetch a record, retrying while it is not yet visible.
    async fn lookup<T, F, Fut>(&self, kind: EntityKind, id: &EntityId, fetch: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, CoreError>>,
    {
        let fetch = &fetch;
        self.inner
            .config
            .engine
            .lookup_retry
            .run("lookup", move || async move {
                fetch().await?.ok_or_else(|| CoreError::NotYetCommitted {
                    entity: kind.to_string(),
                    id: id.to_string(),
                })
            })
            .await
    }

    async fn load_balancer(&self, id: &EntityId) -> Result<LoadBalancer, CoreError> {
        let state = &self.inner.state;
        self.lookup(EntityKind::LoadBalancer, id, || state.load_balancer(id))
            .await
    }

    async fn tree(&self, id: &EntityId) -> Result<LoadBalancerTree, CoreError> {
        let state = &self.inner.state;
        self.lookup(EntityKind::LoadBalancer, id, || state.load_balancer_tree(id))
            .await
    }

    /// True when no other load balancer of `lb`'s tenant is on record.
    async fn sole_tenant_member(&self, lb: &LoadBalancer) -> Result<bool, CoreError> {
        let siblings = self
            .inner
            .state
            .load_balancers_of_tenant(&lb.tenant_id)
            .await?;
        Ok(siblings.iter().all(|other| other.id == lb.id))
    }

    async fn prepare(&self, req: &Request) -> Result<PreparedFlow, CoreError> {
        let state = &self.inner.state;
        let id = &req.id;
        match req.kind {
            EntityKind::LoadBalancer => {
                let lb = self.load_balancer(id).await?;
                let builder = self.builder(self.driver_for(&lb.tenant_id)?);
                match req.action {
                    LifecycleAction::Create => {
                        let owns = self.sole_tenant_member(&lb).await?;
                        Ok(builder.create_load_balancer(&lb, owns))
                    }
                    LifecycleAction::Update => Ok(builder.update_load_balancer(&lb)),
                    LifecycleAction::Delete => {
                        let teardown = self.sole_tenant_member(&lb).await?;
                        if !teardown {
                            info!(tenant = %lb.tenant_id, "other load balancers remain, keeping tenant scope");
                        }
                        let tree = self.tree(id).await?;
                        Ok(builder.delete_load_balancer(&tree, teardown))
                    }
                }
            }
            EntityKind::Listener => {
                let listener = self
                    .lookup(req.kind, id, || state.listener(id))
                    .await?;
                let lb = self.load_balancer(&listener.load_balancer_id).await?;
                let builder = self.builder(self.driver_for(&lb.tenant_id)?);
                let pool = match &listener.default_pool_id {
                    Some(pool_id) => Some(
                        self.lookup(EntityKind::Pool, pool_id, || state.pool(pool_id))
                            .await?,
                    ),
                    None => None,
                };
                Ok(match req.action {
                    LifecycleAction::Create => builder.create_listener(&lb, &listener, pool.as_ref()),
                    LifecycleAction::Update => builder.update_listener(&lb, &listener, pool.as_ref()),
                    LifecycleAction::Delete => builder.delete_listener(&lb, &listener),
                })
            }
            EntityKind::Pool => {
                let pool = self.lookup(req.kind, id, || state.pool(id)).await?;
                let tree = self.tree(&pool.load_balancer_id).await?;
                let lb = &tree.load_balancer;
                let builder = self.builder(self.driver_for(&lb.tenant_id)?);
                let listeners: Vec<_> = tree.listeners_of_pool(&pool.id).cloned().collect();
                Ok(match req.action {
                    LifecycleAction::Create => builder.create_pool(lb, &pool, &listeners),
                    LifecycleAction::Update => builder.update_pool(lb, &pool, &listeners),
                    LifecycleAction::Delete => {
                        let pool_tree = tree.pool(&pool.id).cloned().unwrap_or(PoolTree {
                            pool,
                            members: Vec::new(),
                            health_monitor: None,
                        });
                        builder.delete_pool(lb, &pool_tree, &listeners)
                    }
                })
            }
            EntityKind::Member => {
                let member = self.lookup(req.kind, id, || state.member(id)).await?;
                let pool = self
                    .lookup(EntityKind::Pool, &member.pool_id, || state.pool(&member.pool_id))
                    .await?;
                let lb = self.load_balancer(&pool.load_balancer_id).await?;
                let builder = self.builder(self.driver_for(&lb.tenant_id)?);
                Ok(match req.action {
                    LifecycleAction::Create => builder.create_member(&lb, &member),
                    LifecycleAction::Update => builder.update_member(&lb, &member),
                    LifecycleAction::Delete => builder.delete_member(&lb, &member),
                })
            }
            EntityKind::HealthMonitor => {
                let hm = self
                    .lookup(req.kind, id, || state.health_monitor(id))
                    .await?;
                let pool = self
                    .lookup(EntityKind::Pool, &hm.pool_id, || state.pool(&hm.pool_id))
                    .await?;
                let lb = self.load_balancer(&pool.load_balancer_id).await?;
                let builder = self.builder(self.driver_for(&lb.tenant_id)?);
                Ok(match req.action {
                    LifecycleAction::Create => builder.create_health_monitor(&lb, &hm),
                    LifecycleAction::Update => builder.update_health_monitor(&lb, &hm),
                    LifecycleAction::Delete => builder.delete_health_monitor(&lb, &hm),
                })
            }
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// One pass of the supervising sweep:
    ///
    /// 1. renew sessions whose background refresh failed
    /// 2. re-drive load balancers stuck in PENDING_DELETE
    /// 3. probe the virtual servers of ACTIVE load balancers and redeploy
    ///    any tree with a missing one
    pub async fn reconcile_sweep(&self) -> Result<SweepReport, CoreError> {
        let mut report = SweepReport::default();

        for (name, driver) in self.drivers() {
            let connector = driver.connector();
            if !connector.take_needs_refresh() {
                continue;
            }
            match connector.relogin().await {
                Ok(()) => report.sessions_renewed += 1,
                Err(e) => {
                    warn!(device = %name, error = %e, "session renewal failed");
                    report.failures += 1;
                }
            }
        }

        let state = &self.inner.state;
        for lb in state
            .load_balancers_with_status(ProvisioningStatus::PendingDelete)
            .await?
        {
            match self
                .execute(Request::delete(EntityKind::LoadBalancer, lb.id.clone()))
                .await
            {
                Ok(_) => report.deletes_redriven += 1,
                Err(CoreError::Busy { .. }) => debug!(lb = %lb.id, "delete already in progress"),
                Err(e) => {
                    warn!(lb = %lb.id, error = %e, "re-driven delete failed");
                    report.failures += 1;
                }
            }
        }

        for lb in state
            .load_balancers_with_status(ProvisioningStatus::Active)
            .await?
        {
            report.probed += 1;
            match self.probe_and_heal(&lb.id).await {
                Ok(true) => report.redeployed += 1,
                Ok(false) => {}
                Err(CoreError::Busy { .. }) => debug!(lb = %lb.id, "flow in progress, probe skipped"),
                Err(e) => {
                    warn!(lb = %lb.id, error = %e, "drift probe failed");
                    report.failures += 1;
                }
            }
        }

        info!(
            renewed = report.sessions_renewed,
            redriven = report.deletes_redriven,
            probed = report.probed,
            redeployed = report.redeployed,
            failures = report.failures,
            "reconciliation sweep finished"
        );
        Ok(report)
    }

    /// Returns `true` if the tree was redeployed.
    async fn probe_and_heal(&self, id: &EntityId) -> Result<bool, CoreError> {
        let mut claim = self.claim(EntityKind::LoadBalancer, id)?;
        let Some(tree) = self.inner.state.load_balancer_tree(id).await? else {
            return Ok(false);
        };
        let driver = self.driver_for(&tree.load_balancer.tenant_id)?;

        let mut missing = None;
        for listener in tree.listeners.iter().filter(|l| l.default_pool_id.is_some()) {
            if !driver
                .virtual_server_exists(&tree.load_balancer.tenant_id, listener.id.as_str())
                .await?
            {
                missing = Some(listener.id.clone());
                break;
            }
        }
        let Some(listener) = missing else {
            return Ok(false);
        };

        claim.add_tree(&tree)?;
        warn!(lb = %id, %listener, "virtual server missing on device, redeploying");
        let prepared = self.builder(driver).redeploy(&tree);
        self.run(EntityKind::LoadBalancer, id, prepared).await?;
        Ok(true)
    }

    /// Collect and record traffic statistics of every ACTIVE load balancer.
    /// Returns the number recorded.
    pub async fn collect_stats(&self) -> Result<usize, CoreError> {
        let state = &self.inner.state;
        let mut recorded = 0;
        for lb in state
            .load_balancers_with_status(ProvisioningStatus::Active)
            .await?
        {
            let Some(tree) = state.load_balancer_tree(&lb.id).await? else {
                continue;
            };
            let driver = match self.driver_for(&lb.tenant_id) {
                Ok(d) => d,
                Err(e) => {
                    warn!(lb = %lb.id, error = %e, "no driver for statistics");
                    continue;
                }
            };
            match driver.load_balancer_stats(&tree).await {
                Ok(stats) => {
                    self.inner.reporter.record_stats(&lb.id, stats).await?;
                    recorded += 1;
                }
                Err(e) => warn!(lb = %lb.id, error = %e, "statistics collection failed"),
            }
        }
        debug!(recorded, "statistics collected");
        Ok(recorded)
    }

    // ── Background tasks ─────────────────────────────────────────────

    /// Spawn the sweep, statistics and per-device token refresh loops.
    /// A zero period disables the corresponding loop.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let engine = &self.inner.config.engine;
        let cancel = &self.inner.cancel;
        let mut handles = Vec::new();

        if !engine.sweep_interval.is_zero() {
            handles.push(tokio::spawn(sweep_task(
                self.clone(),
                engine.sweep_interval,
                cancel.child_token(),
            )));
        }
        if !engine.stats_interval.is_zero() {
            handles.push(tokio::spawn(stats_task(
                self.clone(),
                engine.stats_interval,
                cancel.child_token(),
            )));
        }
        if !engine.token_refresh_interval.is_zero() {
            for (_, driver) in self.drivers() {
                handles.push(
                    driver
                        .connector()
                        .spawn_refresh(engine.token_refresh_interval, cancel.child_token()),
                );
            }
        }
        info!(tasks = handles.len(), "background tasks spawned");
        handles
    }

    /// Stop background loops and log out of every device.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        for (_, driver) in self.drivers() {
            driver.connector().logout().await;
        }
        debug!("orchestrator shut down");
    }
}

async fn sweep_task(orchestrator: Orchestrator, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = orchestrator.reconcile_sweep().await {
                    warn!(error = %e, "reconciliation sweep failed");
                }
            }
        }
    }
}

async fn stats_task(orchestrator: Orchestrator, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = orchestrator.collect_stats().await {
                    warn!(error = %e, "statistics collection failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("devices", &self.inner.drivers.len())
            .field("tenants", &self.inner.tenants.len())
            .field("in_flight", &self.inner.in_flight.len())
            .finish_non_exhaustive()
    }
}
