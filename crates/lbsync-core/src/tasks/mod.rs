// ── Flow tasks ──
//
// Building blocks the flow builder assembles: state-store status writes,
// revert-time error marking, device operations and notifications.

mod database;
mod device;
mod lifecycle;
mod notify;

pub use database::{MarkActive, MarkAncestorsActive, MarkDeleted, MarkPending, ReportOnline};
pub use device::{DeviceOp, DeviceTask};
pub use lifecycle::ErrorOnRevert;
pub use notify::{LifecycleAction, LifecycleEvent, Notify};

use crate::engine::Key;
use crate::model::LoadBalancer;

/// The load balancer the flow operates under. Seeded by the flow builder.
pub const LOAD_BALANCER: Key<LoadBalancer> = Key::new("load_balancer");

/// Set by VIP plug: whether the address was added by this flow.
pub const VIP_PLUGGED: Key<bool> = Key::new("vip_plugged");
