use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::store::models::Operation;

// ========== REQUEST MODELS ==========

/// Request to register a property as an on-chain token
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterPropertyRequest {
    #[validate(length(min = 1, max = 128, message = "operation_key must be 1-128 characters"))]
    pub operation_key: String,

    #[validate(length(min = 1, message = "owner must not be empty"))]
    pub owner: String,

    #[validate(range(min = 0, message = "tokenId must be non-negative"))]
    pub token_id: i64,

    #[serde(default)]
    pub details: String,
}

/// Request to pay rent through the rent contract
#[derive(Debug, Deserialize, Validate)]
pub struct PayRentRequest {
    #[validate(length(min = 1, max = 128, message = "operation_key must be 1-128 characters"))]
    pub operation_key: String,

    #[validate(length(min = 1, message = "tenant must not be empty"))]
    pub tenant: String,

    /// Decimal ETH amount, e.g. "0.5"
    #[validate(length(min = 1, message = "amount must not be empty"))]
    pub amount: String,

    pub due_date: NaiveDate,
}

// ========== RESPONSE MODELS ==========

/// Handle returned for every settlement operation. A `timed_out` status
/// means "pending, check back"; the sweeper keeps driving the operation.
#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub operation_key: String,
    pub kind: String,
    pub status: String,
    pub ledger_ref: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Operation> for OperationResponse {
    fn from(op: Operation) -> Self {
        Self {
            operation_key: op.operation_key,
            kind: op.kind.as_str().to_string(),
            status: op.status.as_str().to_string(),
            ledger_ref: op.ledger_ref,
            attempts: op.attempts,
            last_error: op.last_error,
            created_at: op.created_at,
        }
    }
}
