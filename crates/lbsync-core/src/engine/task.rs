// ── Task contract ──

use async_trait::async_trait;

use super::retry::RetryPolicy;
use super::store::Store;
use crate::error::CoreError;

/// One reversible step of a flow.
///
/// `execute` reads its inputs from, and writes its outputs to, the shared
/// flow store. `revert` receives a detached snapshot holding the same
/// inputs `execute` saw plus the outputs it produced.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Store keys read by `execute`.
    fn requires(&self) -> &[&'static str] {
        &[]
    }

    /// Store keys written by `execute`.
    fn provides(&self) -> &[&'static str] {
        &[]
    }

    /// Retry policy wrapped around `execute`, for tasks marked retryable.
    fn retry(&self) -> Option<RetryPolicy> {
        None
    }

    async fn execute(&self, store: &Store) -> Result<(), CoreError>;

    async fn revert(&self, _inputs: &Store) -> Result<(), CoreError> {
        Ok(())
    }
}
