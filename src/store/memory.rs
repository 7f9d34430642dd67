use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::store::models::{
    validate_transition, Operation, OperationStatus, Property, RentRecord,
};
use crate::store::SettlementStore;

/// In-memory settlement store.
///
/// Backs tests and database-less development runs; the write lock around
/// each map gives the same atomicity the Postgres store gets from
/// conditional UPDATEs and unique indexes.
pub struct MemStore {
    operations: RwLock<HashMap<String, Operation>>,
    properties: RwLock<HashMap<i64, Property>>,
    rent_records: RwLock<HashMap<String, RentRecord>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            properties: RwLock::new(HashMap::new()),
            rent_records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementStore for MemStore {
    async fn begin_or_join(&self, op: Operation) -> AppResult<(Operation, bool)> {
        let mut operations = self.operations.write().await;
        if let Some(existing) = operations.get(&op.operation_key) {
            return Ok((existing.clone(), false));
        }
        operations.insert(op.operation_key.clone(), op.clone());
        Ok((op, true))
    }

    async fn get_operation(&self, operation_key: &str) -> AppResult<Option<Operation>> {
        let operations = self.operations.read().await;
        Ok(operations.get(operation_key).cloned())
    }

    async fn mark_submitted(&self, operation_key: &str, ledger_ref: &str) -> AppResult<bool> {
        validate_transition(OperationStatus::Pending, OperationStatus::Submitted)?;
        let mut operations = self.operations.write().await;
        match operations.get_mut(operation_key) {
            Some(op) if op.status == OperationStatus::Pending => {
                op.status = OperationStatus::Submitted;
                op.ledger_ref = Some(ledger_ref.to_string());
                op.attempts += 1;
                op.last_polled_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(
        &self,
        operation_key: &str,
        from: OperationStatus,
        to: OperationStatus,
        error: Option<String>,
    ) -> AppResult<bool> {
        validate_transition(from, to)?;
        let mut operations = self.operations.write().await;
        match operations.get_mut(operation_key) {
            Some(op) if op.status == from => {
                op.status = to;
                op.last_polled_at = Utc::now();
                if let Some(message) = error {
                    op.last_error = Some(message);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_attempt(&self, operation_key: &str, error: &str) -> AppResult<()> {
        let mut operations = self.operations.write().await;
        if let Some(op) = operations.get_mut(operation_key) {
            op.attempts += 1;
            op.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn touch_polled(&self, operation_key: &str) -> AppResult<()> {
        let mut operations = self.operations.write().await;
        if let Some(op) = operations.get_mut(operation_key) {
            op.last_polled_at = Utc::now();
        }
        Ok(())
    }

    async fn list_unresolved(&self, polled_before: DateTime<Utc>) -> AppResult<Vec<Operation>> {
        let operations = self.operations.read().await;
        Ok(operations
            .values()
            .filter(|op| {
                matches!(
                    op.status,
                    OperationStatus::Submitted | OperationStatus::TimedOut
                ) && op.last_polled_at < polled_before
            })
            .cloned()
            .collect())
    }

    async fn list_unmirrored(&self) -> AppResult<Vec<Operation>> {
        let operations = self.operations.read().await;
        Ok(operations
            .values()
            .filter(|op| op.status == OperationStatus::Confirmed)
            .cloned()
            .collect())
    }

    async fn insert_property_if_absent(&self, property: Property) -> AppResult<bool> {
        let mut properties = self.properties.write().await;
        if properties.contains_key(&property.token_id) {
            return Ok(false);
        }
        properties.insert(property.token_id, property);
        Ok(true)
    }

    async fn insert_rent_record_if_absent(&self, record: RentRecord) -> AppResult<bool> {
        let mut rent_records = self.rent_records.write().await;
        if rent_records.contains_key(&record.ledger_ref) {
            return Ok(false);
        }
        rent_records.insert(record.ledger_ref.clone(), record);
        Ok(true)
    }

    async fn get_property(&self, token_id: i64) -> AppResult<Option<Property>> {
        let properties = self.properties.read().await;
        Ok(properties.get(&token_id).cloned())
    }

    async fn list_properties(&self) -> AppResult<Vec<Property>> {
        let properties = self.properties.read().await;
        let mut all: Vec<Property> = properties.values().cloned().collect();
        all.sort_by_key(|p| p.token_id);
        Ok(all)
    }

    async fn list_rent_records(&self, tenant: &str) -> AppResult<Vec<RentRecord>> {
        let rent_records = self.rent_records.read().await;
        let mut matching: Vec<RentRecord> = rent_records
            .values()
            .filter(|r| r.tenant == tenant)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::OperationPayload;

    fn property_op(key: &str, token_id: i64) -> Operation {
        Operation::new(
            key.to_string(),
            OperationPayload::RegisterProperty {
                owner: "0xABC".to_string(),
                token_id,
                details: "2BR apartment".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_begin_or_join_collapses_duplicates() {
        let store = MemStore::new();

        let (first, is_new) = store.begin_or_join(property_op("op-1", 42)).await.unwrap();
        assert!(is_new);

        let (joined, is_new) = store.begin_or_join(property_op("op-1", 42)).await.unwrap();
        assert!(!is_new);
        assert_eq!(joined.id, first.id);

        // The joined copy keeps the original payload even if the caller sent
        // a different one; the engine turns that mismatch into KeyConflict.
        let (joined, is_new) = store.begin_or_join(property_op("op-1", 99)).await.unwrap();
        assert!(!is_new);
        assert_eq!(joined.id, first.id);
    }

    #[tokio::test]
    async fn test_cas_applies_exactly_once() {
        let store = MemStore::new();
        store.begin_or_join(property_op("op-1", 42)).await.unwrap();
        assert!(store.mark_submitted("op-1", "0xhash").await.unwrap());

        // Both a foreground poller and the sweeper observe confirmation; only
        // one CAS wins.
        let won_a = store
            .transition("op-1", OperationStatus::Submitted, OperationStatus::Confirmed, None)
            .await
            .unwrap();
        let won_b = store
            .transition("op-1", OperationStatus::Submitted, OperationStatus::Confirmed, None)
            .await
            .unwrap();
        assert!(won_a);
        assert!(!won_b);

        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Confirmed);
        assert_eq!(op.ledger_ref.as_deref(), Some("0xhash"));
    }

    #[tokio::test]
    async fn test_invalid_transition_is_rejected_before_write() {
        let store = MemStore::new();
        store.begin_or_join(property_op("op-1", 42)).await.unwrap();

        let result = store
            .transition("op-1", OperationStatus::Pending, OperationStatus::Mirrored, None)
            .await;
        assert!(result.is_err());

        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn test_mirror_inserts_are_idempotent() {
        let store = MemStore::new();
        let property = Property {
            owner: "0xABC".to_string(),
            token_id: 42,
            details: "2BR apartment".to_string(),
            ledger_ref: "0xhash".to_string(),
            created_at: Utc::now(),
        };

        assert!(store.insert_property_if_absent(property.clone()).await.unwrap());
        assert!(!store.insert_property_if_absent(property).await.unwrap());
        assert_eq!(store.list_properties().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_listing_skips_fresh_polls() {
        let store = MemStore::new();
        store.begin_or_join(property_op("op-1", 42)).await.unwrap();
        store.mark_submitted("op-1", "0xhash").await.unwrap();

        // last_polled_at was just written, so a cutoff in the past skips it
        let stale = store
            .list_unresolved(Utc::now() - chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert!(stale.is_empty());

        let due = store
            .list_unresolved(Utc::now() + chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
    }
}
