// External ledger boundary
pub mod eth;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::store::models::OperationPayload;

/// Finality as observed through polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    Confirmed,
    /// Accepted but reverted during execution
    Failed,
}

/// Ledger client trait - implemented per backing chain
///
/// INVARIANTS:
/// - submit mutates external ledger state exactly once per successful call;
///   the engine never calls it twice for one operation unless the previous
///   attempt definitively failed pre-acceptance
/// - poll_status is non-blocking and safe to call any number of times
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a mutating call. Returns the ledger reference as soon as the
    /// call is accepted into the pending pool, without waiting for finality.
    async fn submit(&self, payload: &OperationPayload) -> AppResult<String>;

    /// Check the confirmation status of a previously submitted call.
    async fn poll_status(&self, ledger_ref: &str) -> AppResult<ConfirmationState>;
}
