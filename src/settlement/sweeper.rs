use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::chain::ConfirmationState;
use crate::error::{AppError, AppResult};
use crate::settlement::SettlementEngine;
use crate::store::models::{Operation, OperationStatus};

/// Background reconciliation loop.
///
/// The system's sole guarantee of forward progress once a caller stops
/// waiting: re-polls operations stuck in Submitted/TimedOut, applies the
/// confirmation deadline, and re-mirrors confirmed operations whose outcome
/// never reached the read model (crash recovery).
pub struct ReconciliationSweeper {
    engine: Arc<SettlementEngine>,
    sweep_interval: Duration,
}

impl ReconciliationSweeper {
    pub fn new(engine: Arc<SettlementEngine>, sweep_interval: Duration) -> Self {
        Self {
            engine,
            sweep_interval,
        }
    }

    /// Start the sweeper (runs in background)
    pub fn start(&self) -> JoinHandle<()> {
        let engine = self.engine.clone();
        let sweep_interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            // first tick fires immediately; skip it so startup stays quiet
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = Self::sweep(&engine).await {
                    error!("sweep pass failed: {:?}", e);
                }
            }
        })
    }

    /// One reconciliation pass. Errors on individual operations are logged
    /// and do not abort the rest of the pass.
    pub async fn run_once(&self) -> anyhow::Result<()> {
        Self::sweep(&self.engine).await
    }

    async fn sweep(engine: &SettlementEngine) -> anyhow::Result<()> {
        let cutoff = Utc::now() - chrono::Duration::from_std(engine.config.poll_interval)?;

        let unresolved = engine.store.list_unresolved(cutoff).await?;
        if !unresolved.is_empty() {
            info!("re-polling {} unresolved operation(s)", unresolved.len());
        }
        for op in unresolved {
            if let Err(e) = Self::sweep_operation(engine, &op).await {
                error!("failed to sweep operation {}: {:?}", op.operation_key, e);
            }
        }

        // Confirmed rows with no mirror write yet: the crash-recovery path
        let unmirrored = engine.store.list_unmirrored().await?;
        for op in unmirrored {
            debug!("re-mirroring confirmed operation {}", op.operation_key);
            if let Err(e) = engine.mirror.apply_confirmed(&op).await {
                error!("failed to mirror operation {}: {:?}", op.operation_key, e);
            }
        }

        Ok(())
    }

    async fn sweep_operation(engine: &SettlementEngine, op: &Operation) -> AppResult<()> {
        let Some(ledger_ref) = op.ledger_ref.as_deref() else {
            // Submitted rows always carry a ref; nothing to poll without one
            return Ok(());
        };

        match engine.chain.poll_status(ledger_ref).await? {
            ConfirmationState::Pending => {
                let age = Utc::now().signed_duration_since(op.created_at);
                let deadline = chrono::Duration::from_std(engine.config.confirm_deadline)
                    .map_err(|e| AppError::Internal(e.to_string()))?;

                if op.status == OperationStatus::Submitted && age > deadline {
                    info!(
                        "operation {} unresolved past deadline, marking timed out",
                        op.operation_key
                    );
                    engine
                        .store
                        .transition(
                            &op.operation_key,
                            OperationStatus::Submitted,
                            OperationStatus::TimedOut,
                            None,
                        )
                        .await?;
                } else {
                    engine.store.touch_polled(&op.operation_key).await?;
                }
                Ok(())
            }
            state => engine.apply_outcome(op, state).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockLedgerClient;
    use crate::chain::LedgerClient;
    use crate::settlement::{EngineConfig, MirrorWriter};
    use crate::store::memory::MemStore;
    use crate::store::models::OperationPayload;
    use crate::store::SettlementStore;

    fn setup(
        config: EngineConfig,
    ) -> (Arc<MemStore>, Arc<MockLedgerClient>, ReconciliationSweeper) {
        let store = Arc::new(MemStore::new());
        let chain = Arc::new(MockLedgerClient::new());
        let mirror = Arc::new(MirrorWriter::new(
            Arc::clone(&store) as Arc<dyn SettlementStore>,
            "0xLandlord".to_string(),
        ));
        let engine = Arc::new(SettlementEngine::new(
            Arc::clone(&store) as Arc<dyn SettlementStore>,
            Arc::clone(&chain) as Arc<dyn LedgerClient>,
            mirror,
            config,
        ));
        let sweeper = ReconciliationSweeper::new(engine, Duration::from_secs(10));
        (store, chain, sweeper)
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::ZERO,
            confirm_deadline: Duration::from_secs(300),
            ..EngineConfig::default()
        }
    }

    fn property_payload() -> OperationPayload {
        OperationPayload::RegisterProperty {
            owner: "0xABC".to_string(),
            token_id: 42,
            details: "2BR apartment".to_string(),
        }
    }

    async fn seed_submitted(store: &Arc<MemStore>, key: &str, ledger_ref: &str) {
        store
            .begin_or_join(Operation::new(key.to_string(), property_payload()))
            .await
            .unwrap();
        store.mark_submitted(key, ledger_ref).await.unwrap();
        // age the poll timestamp so the sweeper picks the row up
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn test_crash_recovery_mirrors_exactly_once() {
        let (store, _, sweeper) = setup(fast_config());

        // Confirmed was recorded but the process died before the mirror write
        seed_submitted(&store, "op-1", "0xh1").await;
        store
            .transition("op-1", OperationStatus::Submitted, OperationStatus::Confirmed, None)
            .await
            .unwrap();

        sweeper.run_once().await.unwrap();
        sweeper.run_once().await.unwrap();

        assert_eq!(store.list_properties().await.unwrap().len(), 1);
        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Mirrored);
    }

    #[tokio::test]
    async fn test_timed_out_operation_resolves_late() {
        let (store, chain, sweeper) = setup(fast_config());

        seed_submitted(&store, "op-1", "0xh1").await;
        store
            .transition("op-1", OperationStatus::Submitted, OperationStatus::TimedOut, None)
            .await
            .unwrap();
        chain.script_poll("0xh1", vec![ConfirmationState::Confirmed]);

        tokio::time::sleep(Duration::from_millis(5)).await;
        sweeper.run_once().await.unwrap();

        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Mirrored);
        assert_eq!(store.list_properties().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_submission_times_out_at_deadline() {
        let config = EngineConfig {
            poll_interval: Duration::ZERO,
            confirm_deadline: Duration::ZERO,
            ..EngineConfig::default()
        };
        let (store, _, sweeper) = setup(config);

        // ledger keeps reporting pending (no script needed)
        seed_submitted(&store, "op-1", "0xh1").await;

        sweeper.run_once().await.unwrap();

        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_reverted_operation_fails_without_mirror_write() {
        let (store, chain, sweeper) = setup(fast_config());

        seed_submitted(&store, "op-1", "0xh1").await;
        chain.script_poll("0xh1", vec![ConfirmationState::Failed]);

        sweeper.run_once().await.unwrap();

        let op = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(store.list_properties().await.unwrap().is_empty());
    }
}
