use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, AppResult, SettlementError};

/// What kind of ledger mutation an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    RegisterProperty,
    PayRent,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::RegisterProperty => "register_property",
            OperationKind::PayRent => "pay_rent",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "register_property" => Ok(OperationKind::RegisterProperty),
            "pay_rent" => Ok(OperationKind::PayRent),
            other => Err(AppError::Internal(format!("unknown operation kind: {}", other))),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation lifecycle status
///
/// Confirmed/Failed are terminal with respect to the ledger; TimedOut is
/// terminal only for the synchronous caller and stays eligible for sweeping.
/// Mirrored means the confirmed outcome has been applied to the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
    TimedOut,
    Mirrored,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Submitted => "submitted",
            OperationStatus::Confirmed => "confirmed",
            OperationStatus::Failed => "failed",
            OperationStatus::TimedOut => "timed_out",
            OperationStatus::Mirrored => "mirrored",
        }
    }

    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "submitted" => Ok(OperationStatus::Submitted),
            "confirmed" => Ok(OperationStatus::Confirmed),
            "failed" => Ok(OperationStatus::Failed),
            "timed_out" => Ok(OperationStatus::TimedOut),
            "mirrored" => Ok(OperationStatus::Mirrored),
            other => Err(AppError::Internal(format!("unknown operation status: {}", other))),
        }
    }

    /// No further ledger interaction happens from these states
    pub fn is_ledger_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Confirmed | OperationStatus::Failed | OperationStatus::Mirrored
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Validate an operation status transition
///
/// Valid transitions:
/// - Pending → Submitted, Failed
/// - Submitted → Confirmed, Failed, TimedOut
/// - TimedOut → Confirmed, Failed (late resolution by the sweeper)
/// - Confirmed → Mirrored
/// - Failed, Mirrored: terminal, NO TRANSITIONS ALLOWED
pub fn validate_transition(from: OperationStatus, to: OperationStatus) -> AppResult<()> {
    let allowed = match from {
        OperationStatus::Pending => vec![OperationStatus::Submitted, OperationStatus::Failed],
        OperationStatus::Submitted => vec![
            OperationStatus::Confirmed,
            OperationStatus::Failed,
            OperationStatus::TimedOut,
        ],
        OperationStatus::TimedOut => vec![OperationStatus::Confirmed, OperationStatus::Failed],
        OperationStatus::Confirmed => vec![OperationStatus::Mirrored],
        OperationStatus::Failed | OperationStatus::Mirrored => {
            return Err(SettlementError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }
            .into());
        }
    };

    if !allowed.contains(&to) {
        return Err(SettlementError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
        .into());
    }

    Ok(())
}

/// Kind-specific immutable operation input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationPayload {
    RegisterProperty {
        owner: String,
        token_id: i64,
        details: String,
    },
    PayRent {
        tenant: String,
        #[serde(with = "rust_decimal::serde::float")]
        amount: Decimal,
        due_date: NaiveDate,
    },
}

impl OperationPayload {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationPayload::RegisterProperty { .. } => OperationKind::RegisterProperty,
            OperationPayload::PayRent { .. } => OperationKind::PayRent,
        }
    }
}

/// Operation entity - one logical intent to mutate the ledger, tracked
/// end-to-end by the settlement engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,

    /// Caller-supplied idempotency key, unique across the collection
    pub operation_key: String,

    pub kind: OperationKind,
    pub payload: OperationPayload,

    /// External transaction identifier, set once submission is accepted
    pub ledger_ref: Option<String>,

    pub status: OperationStatus,
    pub attempts: i32,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_polled_at: DateTime<Utc>,
}

impl Operation {
    pub fn new(operation_key: String, payload: OperationPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            operation_key,
            kind: payload.kind(),
            payload,
            ledger_ref: None,
            status: OperationStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            last_polled_at: now,
        }
    }
}

/// Property mirror entity - created only from a confirmed RegisterProperty
/// operation, immutable once minted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub owner: String,
    pub token_id: i64,
    pub details: String,
    pub ledger_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Rent record mirror entity - one row per confirmed on-chain payment,
/// keyed by ledger_ref; never deleted, never updated in place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentRecord {
    pub tenant: String,
    pub landlord: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub ledger_ref: String,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_reject_transitions() {
        assert!(validate_transition(OperationStatus::Failed, OperationStatus::Confirmed).is_err());
        assert!(validate_transition(OperationStatus::Mirrored, OperationStatus::Failed).is_err());
    }

    #[test]
    fn test_timed_out_resolves_late() {
        assert!(validate_transition(OperationStatus::TimedOut, OperationStatus::Confirmed).is_ok());
        assert!(validate_transition(OperationStatus::TimedOut, OperationStatus::Failed).is_ok());
        assert!(validate_transition(OperationStatus::TimedOut, OperationStatus::Submitted).is_err());
    }

    #[test]
    fn test_mirror_only_from_confirmed() {
        assert!(validate_transition(OperationStatus::Confirmed, OperationStatus::Mirrored).is_ok());
        assert!(validate_transition(OperationStatus::Submitted, OperationStatus::Mirrored).is_err());
        assert!(validate_transition(OperationStatus::Pending, OperationStatus::Mirrored).is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OperationStatus::Pending,
            OperationStatus::Submitted,
            OperationStatus::Confirmed,
            OperationStatus::Failed,
            OperationStatus::TimedOut,
            OperationStatus::Mirrored,
        ] {
            assert_eq!(OperationStatus::parse(status.as_str()).unwrap(), status);
        }
    }
}
