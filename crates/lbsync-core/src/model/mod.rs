// ── Domain model ──

pub mod entity;
pub mod entity_id;
pub mod health_check;
pub mod status;

pub use entity::{
    Algorithm, HealthMonitor, Listener, LoadBalancer, LoadBalancerTree, Member, MonitorType, Pool,
    PoolTree, Protocol,
};
pub use entity_id::EntityId;
pub use health_check::HealthCheckSet;
pub use status::{EntityKind, OperatingStatus, ProvisioningStatus};
