use chrono::NaiveDate;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::chain::{ConfirmationState, LedgerClient};
use crate::error::{AppError, AppResult, ChainError, SettlementError};
use crate::settlement::MirrorWriter;
use crate::store::models::{Operation, OperationPayload, OperationStatus};
use crate::store::SettlementStore;

/// Engine tuning knobs, injected once at startup
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Submission attempts before Failed becomes final
    pub max_attempts: i32,
    pub backoff_base: Duration,
    /// How long a synchronous caller waits for finality before getting a
    /// TimedOut handle back
    pub confirm_wait: Duration,
    pub poll_interval: Duration,
    /// Age past which the sweeper times out an unresolved submission
    pub confirm_deadline: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            confirm_wait: Duration::from_secs(30),
            poll_interval: Duration::from_secs(2),
            confirm_deadline: Duration::from_secs(180),
        }
    }
}

/// Settlement state machine.
///
/// Exclusively owns operation status transitions: every write goes through a
/// compare-and-set on the current status, so a transition out of
/// Submitted/TimedOut applies exactly once even when a foreground poller and
/// the sweeper observe confirmation concurrently.
pub struct SettlementEngine {
    pub(crate) store: Arc<dyn SettlementStore>,
    pub(crate) chain: Arc<dyn LedgerClient>,
    pub(crate) mirror: Arc<MirrorWriter>,
    pub(crate) config: EngineConfig,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        chain: Arc<dyn LedgerClient>,
        mirror: Arc<MirrorWriter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            chain,
            mirror,
            config,
        }
    }

    pub async fn register_property(
        &self,
        operation_key: String,
        owner: String,
        token_id: i64,
        details: String,
    ) -> AppResult<Operation> {
        validate_operation_key(&operation_key)?;
        if owner.trim().is_empty() {
            return Err(AppError::Validation("owner must not be empty".to_string()));
        }
        if token_id < 0 {
            return Err(AppError::Validation("tokenId must be non-negative".to_string()));
        }

        self.execute(
            operation_key,
            OperationPayload::RegisterProperty {
                owner,
                token_id,
                details,
            },
        )
        .await
    }

    pub async fn pay_rent(
        &self,
        operation_key: String,
        tenant: String,
        amount: Decimal,
        due_date: NaiveDate,
    ) -> AppResult<Operation> {
        validate_operation_key(&operation_key)?;
        if tenant.trim().is_empty() {
            return Err(AppError::Validation("tenant must not be empty".to_string()));
        }
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation("amount must be positive".to_string()));
        }

        self.execute(
            operation_key,
            OperationPayload::PayRent {
                tenant,
                amount,
                due_date,
            },
        )
        .await
    }

    pub async fn get_operation(&self, operation_key: &str) -> AppResult<Operation> {
        self.store
            .get_operation(operation_key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {}", operation_key)))
    }

    /// Begin-or-join on the idempotency key, then drive a newly created
    /// operation to finality or to the caller-visible timeout.
    async fn execute(&self, operation_key: String, payload: OperationPayload) -> AppResult<Operation> {
        let (op, is_new) = self
            .store
            .begin_or_join(Operation::new(operation_key.clone(), payload.clone()))
            .await?;

        if !is_new {
            // Reusing an idempotency key for a different intent is a caller
            // bug, distinct from a plain validation failure.
            if op.payload != payload {
                return Err(AppError::KeyConflict(operation_key));
            }
            debug!(
                "joined existing operation {} in status {}",
                op.operation_key, op.status
            );
            return Ok(op);
        }

        info!("operation {} created ({})", op.operation_key, op.kind);

        match self.submit_with_retry(&op).await? {
            Some(ledger_ref) => self.wait_for_finality(&op.operation_key, &ledger_ref).await,
            None => self.refreshed(&op.operation_key).await,
        }
    }

    /// Submit with bounded retries. Only a pre-acceptance rejection is
    /// retried; once the ledger has accepted a call there is no safe way to
    /// resubmit. Returns None when attempts are exhausted (operation Failed).
    async fn submit_with_retry(&self, op: &Operation) -> AppResult<Option<String>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.chain.submit(&op.payload).await {
                Ok(ledger_ref) => {
                    if !self.store.mark_submitted(&op.operation_key, &ledger_ref).await? {
                        warn!(
                            "operation {} left Pending while submitting; keeping ledger ref {}",
                            op.operation_key, ledger_ref
                        );
                    }
                    return Ok(Some(ledger_ref));
                }
                Err(AppError::Chain(ChainError::Submission(reason))) => {
                    warn!(
                        "submission attempt {}/{} for {} rejected: {}",
                        attempt, self.config.max_attempts, op.operation_key, reason
                    );
                    self.store.record_attempt(&op.operation_key, &reason).await?;

                    if attempt >= self.config.max_attempts {
                        let error = SettlementError::AttemptsExhausted {
                            attempts: attempt,
                            last_error: reason,
                        };
                        self.store
                            .transition(
                                &op.operation_key,
                                OperationStatus::Pending,
                                OperationStatus::Failed,
                                Some(error.to_string()),
                            )
                            .await?;
                        return Ok(None);
                    }

                    sleep(self.backoff(attempt)).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Bounded synchronous confirmation wait. On deadline the operation is
    /// marked TimedOut for the caller and handed to the sweeper; abandoning
    /// the wait never cancels the underlying submission.
    async fn wait_for_finality(&self, operation_key: &str, ledger_ref: &str) -> AppResult<Operation> {
        let deadline = Instant::now() + self.config.confirm_wait;

        loop {
            sleep(self.config.poll_interval).await;

            match self.chain.poll_status(ledger_ref).await {
                Ok(ConfirmationState::Pending) => {
                    self.store.touch_polled(operation_key).await?;
                }
                Ok(state) => {
                    let op = self.refreshed(operation_key).await?;
                    self.apply_outcome(&op, state).await?;
                    return self.refreshed(operation_key).await;
                }
                Err(e) => {
                    warn!("poll for {} failed: {}", operation_key, e);
                }
            }

            if Instant::now() >= deadline {
                self.store
                    .transition(
                        operation_key,
                        OperationStatus::Submitted,
                        OperationStatus::TimedOut,
                        None,
                    )
                    .await?;
                info!(
                    "operation {} not final within {:?}, handing over to sweeper",
                    operation_key, self.config.confirm_wait
                );
                return self.refreshed(operation_key).await;
            }
        }
    }

    /// Apply an observed terminal ledger outcome exactly once. Shared by the
    /// foreground wait and the sweeper; the CAS on the operation's current
    /// status decides the winner, the loser backs off without mirroring.
    pub(crate) async fn apply_outcome(
        &self,
        op: &Operation,
        state: ConfirmationState,
    ) -> AppResult<()> {
        if op.status.is_ledger_terminal() {
            return Ok(());
        }

        match state {
            ConfirmationState::Pending => Ok(()),
            ConfirmationState::Confirmed => {
                if self
                    .store
                    .transition(&op.operation_key, op.status, OperationStatus::Confirmed, None)
                    .await?
                {
                    info!("operation {} confirmed", op.operation_key);
                    let confirmed = self.refreshed(&op.operation_key).await?;
                    self.mirror.apply_confirmed(&confirmed).await?;
                }
                Ok(())
            }
            ConfirmationState::Failed => {
                if self
                    .store
                    .transition(
                        &op.operation_key,
                        op.status,
                        OperationStatus::Failed,
                        Some("transaction reverted".to_string()),
                    )
                    .await?
                {
                    warn!("operation {} reverted on the ledger", op.operation_key);
                }
                Ok(())
            }
        }
    }

    pub(crate) async fn refreshed(&self, operation_key: &str) -> AppResult<Operation> {
        self.store
            .get_operation(operation_key)
            .await?
            .ok_or_else(|| AppError::Internal(format!("operation {} vanished", operation_key)))
    }

    fn backoff(&self, attempt: i32) -> Duration {
        let exp = (attempt - 1).clamp(0, 8) as u32;
        let base = self.config.backoff_base * (1u32 << exp);
        let jitter_ms = (self.config.backoff_base.as_millis() / 2).max(1) as u64;
        base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

fn validate_operation_key(operation_key: &str) -> AppResult<()> {
    if operation_key.trim().is_empty() || operation_key.len() > 128 {
        return Err(AppError::Validation(
            "operation_key must be 1-128 characters".to_string(),
        ));
    }
    Ok(())
}
