// ── Task execution engine ──
//
// Named flows of reversible tasks over a shared typed store, with retry for
// tasks that opt in and newest-first compensation on failure.

mod flow;
mod retry;
mod runner;
mod store;
mod task;

pub use flow::{Flow, FlowKind, Node};
pub use retry::RetryPolicy;
pub use runner::{Engine, FlowError, FlowReport, TaskFailure};
pub use store::{Key, Store};
pub use task::Task;
