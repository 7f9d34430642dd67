use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::store::models::{Operation, OperationPayload, OperationStatus, Property, RentRecord};
use crate::store::SettlementStore;

/// Applies confirmed ledger outcomes to the read model.
///
/// The only component permitted to create Property and RentRecord rows, and
/// only from operations that reached Confirmed. Inserts are idempotent on
/// the mirror key (token_id, ledger_ref), so replays caused by crash
/// recovery or a sweeper/foreground race collapse to a single row.
pub struct MirrorWriter {
    store: Arc<dyn SettlementStore>,
    /// Landlord identity recorded on rent rows: the configured wallet address
    landlord: String,
}

impl MirrorWriter {
    pub fn new(store: Arc<dyn SettlementStore>, landlord: String) -> Self {
        Self { store, landlord }
    }

    pub async fn apply_confirmed(&self, op: &Operation) -> AppResult<()> {
        let ledger_ref = op
            .ledger_ref
            .clone()
            .ok_or_else(|| {
                AppError::Internal(format!(
                    "confirmed operation {} has no ledger reference",
                    op.operation_key
                ))
            })?;

        let created = match &op.payload {
            OperationPayload::RegisterProperty {
                owner,
                token_id,
                details,
            } => {
                self.store
                    .insert_property_if_absent(Property {
                        owner: owner.clone(),
                        token_id: *token_id,
                        details: details.clone(),
                        ledger_ref: ledger_ref.clone(),
                        created_at: Utc::now(),
                    })
                    .await?
            }
            OperationPayload::PayRent {
                tenant,
                amount,
                due_date,
            } => {
                self.store
                    .insert_rent_record_if_absent(RentRecord {
                        tenant: tenant.clone(),
                        landlord: self.landlord.clone(),
                        amount: *amount,
                        due_date: *due_date,
                        ledger_ref: ledger_ref.clone(),
                        paid: true,
                        created_at: Utc::now(),
                    })
                    .await?
            }
        };

        if created {
            info!("mirrored {} operation {}", op.kind, op.operation_key);
        } else {
            debug!("operation {} already mirrored", op.operation_key);
        }

        // The insert above is idempotent on the mirror key, so losing this
        // CAS to a concurrent writer still leaves exactly one row.
        self.store
            .transition(
                &op.operation_key,
                OperationStatus::Confirmed,
                OperationStatus::Mirrored,
                None,
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemStore;
    use rust_decimal_macros::dec;

    async fn confirmed_op(store: &Arc<MemStore>, key: &str, payload: OperationPayload) -> Operation {
        let (op, _) = store
            .begin_or_join(Operation::new(key.to_string(), payload))
            .await
            .unwrap();
        store.mark_submitted(key, "0xhash").await.unwrap();
        store
            .transition(key, OperationStatus::Submitted, OperationStatus::Confirmed, None)
            .await
            .unwrap();
        store.get_operation(&op.operation_key).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_replay_produces_no_duplicate_rows() {
        let store = Arc::new(MemStore::new());
        let mirror = MirrorWriter::new(
            Arc::clone(&store) as Arc<dyn SettlementStore>,
            "0xLandlord".to_string(),
        );

        let op = confirmed_op(
            &store,
            "op-1",
            OperationPayload::PayRent {
                tenant: "0xTenant".to_string(),
                amount: dec!(0.5),
                due_date: "2025-01-01".parse().unwrap(),
            },
        )
        .await;

        mirror.apply_confirmed(&op).await.unwrap();
        mirror.apply_confirmed(&op).await.unwrap();

        let records = store.list_rent_records("0xTenant").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].landlord, "0xLandlord");
        assert!(records[0].paid);

        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Mirrored);
    }

    #[tokio::test]
    async fn test_property_row_matches_payload() {
        let store = Arc::new(MemStore::new());
        let mirror = MirrorWriter::new(
            Arc::clone(&store) as Arc<dyn SettlementStore>,
            "0xLandlord".to_string(),
        );

        let op = confirmed_op(
            &store,
            "op-1",
            OperationPayload::RegisterProperty {
                owner: "0xABC".to_string(),
                token_id: 42,
                details: "2BR apartment".to_string(),
            },
        )
        .await;

        mirror.apply_confirmed(&op).await.unwrap();

        let property = store.get_property(42).await.unwrap().unwrap();
        assert_eq!(property.owner, "0xABC");
        assert_eq!(property.details, "2BR apartment");
        assert_eq!(property.ledger_ref, "0xhash");
    }
}
