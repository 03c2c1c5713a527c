//! Reconciliation core between a logical load-balancing model and a
//! FortiADC appliance.
//!
//! - **[`Orchestrator`]**: Entry point for lifecycle requests. Resolves
//!   entities from the [`StateStore`], enforces one flow per entity, and
//!   owns the reconciliation sweep, statistics collection and per-device
//!   token refresh loops.
//!
//! - **[`engine`]**: Named flows of reversible [`Task`]s over a shared
//!   [`Store`]. Linear flows run in order, unordered flows concurrently; on
//!   failure every executed task is reverted newest-first.
//!
//! - **[`FlowBuilder`]**: Composes the per-operation flows: mark pending,
//!   device work, mark active/deleted, ancestors active, notify.
//!
//! - **[`DeviceDriver`]**: Tenant isolation (VDOM, interfaces, routes,
//!   NAT pools, VIP allow-list) and hierarchy sync (virtual server, pool,
//!   real server + membership, health check list) on top of `lbsync-api`.
//!
//! - **[`StatusReporter`]**: The only writer of provisioning and
//!   operating status.

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod flows;
pub mod model;
pub mod orchestrator;
pub mod state;
pub mod status;
pub mod tasks;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{
    DeviceProfile, EngineSettings, ListenerDefaults, OrchestratorConfig, TenantNetwork,
    TlsVerification,
};
pub use device::{DeviceDriver, MemoryPortDirectory, PortDirectory, VipAllowList};
pub use engine::{Engine, Flow, FlowError, FlowReport, Key, RetryPolicy, Store, Task};
pub use error::CoreError;
pub use flows::{FlowBuilder, PreparedFlow};
pub use orchestrator::{Orchestrator, Request, SweepReport};
pub use state::{MemoryStateStore, StateStore};
pub use status::StatusReporter;
pub use tasks::{LifecycleAction, LifecycleEvent};

pub use model::{
    Algorithm, EntityId, EntityKind, HealthCheckSet, HealthMonitor, Listener, LoadBalancer,
    LoadBalancerTree, Member, MonitorType, OperatingStatus, Pool, PoolTree, Protocol,
    ProvisioningStatus,
};
