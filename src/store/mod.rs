// Store boundary: operations ledger + read-model mirror
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use models::{Operation, OperationStatus, Property, RentRecord};

/// Persistence seam for the settlement engine.
///
/// INVARIANTS:
/// - begin_or_join is atomic: a unique-key race resolves to a single row
/// - all status writes are compare-and-set on the current status; the
///   operation record is the unit of mutual exclusion
/// - mirror inserts are idempotent on their unique key (token_id, ledger_ref)
#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Insert the operation if no row with its key exists, otherwise return
    /// the existing row. Second tuple field is true when this call created it.
    async fn begin_or_join(&self, op: Operation) -> AppResult<(Operation, bool)>;

    async fn get_operation(&self, operation_key: &str) -> AppResult<Option<Operation>>;

    /// CAS Pending → Submitted, recording the ledger reference.
    /// Returns false if the operation was no longer Pending.
    async fn mark_submitted(&self, operation_key: &str, ledger_ref: &str) -> AppResult<bool>;

    /// CAS `from` → `to`. Returns false when the current status is not `from`
    /// (someone else already transitioned the row). The transition itself is
    /// validated before touching the store.
    async fn transition(
        &self,
        operation_key: &str,
        from: OperationStatus,
        to: OperationStatus,
        error: Option<String>,
    ) -> AppResult<bool>;

    /// Bump the attempt counter after a failed submission try.
    async fn record_attempt(&self, operation_key: &str, error: &str) -> AppResult<()>;

    async fn touch_polled(&self, operation_key: &str) -> AppResult<()>;

    /// Operations in Submitted or TimedOut whose last poll is older than the
    /// given instant - the sweeper's work queue.
    async fn list_unresolved(&self, polled_before: DateTime<Utc>) -> AppResult<Vec<Operation>>;

    /// Confirmed operations whose outcome has not reached the mirror yet.
    async fn list_unmirrored(&self) -> AppResult<Vec<Operation>>;

    /// Returns false when a property with that token_id already exists.
    async fn insert_property_if_absent(&self, property: Property) -> AppResult<bool>;

    /// Returns false when a record with that ledger_ref already exists.
    async fn insert_rent_record_if_absent(&self, record: RentRecord) -> AppResult<bool>;

    async fn get_property(&self, token_id: i64) -> AppResult<Option<Property>>;

    async fn list_properties(&self) -> AppResult<Vec<Property>>;

    async fn list_rent_records(&self, tenant: &str) -> AppResult<Vec<RentRecord>>;
}
