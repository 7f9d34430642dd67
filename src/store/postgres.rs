use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::error::{AppError, AppResult};
use crate::store::models::{
    validate_transition, Operation, OperationKind, OperationStatus, Property, RentRecord,
};
use crate::store::SettlementStore;

/// Postgres-backed settlement store.
///
/// Conditional UPDATEs on the current status implement the compare-and-set
/// contract; the unique indexes on operation_key, token_id and ledger_ref
/// are the second line of defense against duplicate writes.
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn operation_from_row(row: &PgRow) -> AppResult<Operation> {
    let kind_str: String = row.try_get("kind")?;
    let status_str: String = row.try_get("status")?;
    let payload_value: serde_json::Value = row.try_get("payload")?;

    Ok(Operation {
        id: row.try_get("id")?,
        operation_key: row.try_get("operation_key")?,
        kind: OperationKind::parse(&kind_str)?,
        payload: serde_json::from_value(payload_value)?,
        ledger_ref: row.try_get("ledger_ref")?,
        status: OperationStatus::parse(&status_str)?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        last_polled_at: row.try_get("last_polled_at")?,
    })
}

fn property_from_row(row: &PgRow) -> AppResult<Property> {
    Ok(Property {
        owner: row.try_get("owner")?,
        token_id: row.try_get("token_id")?,
        details: row.try_get("details")?,
        ledger_ref: row.try_get("ledger_ref")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rent_record_from_row(row: &PgRow) -> AppResult<RentRecord> {
    let amount_str: String = row.try_get("amount")?;
    let amount = Decimal::from_str(&amount_str)
        .map_err(|_| AppError::Internal(format!("invalid stored amount: {}", amount_str)))?;

    Ok(RentRecord {
        tenant: row.try_get("tenant")?,
        landlord: row.try_get("landlord")?,
        amount,
        due_date: row.try_get("due_date")?,
        ledger_ref: row.try_get("ledger_ref")?,
        paid: row.try_get("paid")?,
        created_at: row.try_get("created_at")?,
    })
}

const OPERATION_COLUMNS: &str =
    "id, operation_key, kind, payload, ledger_ref, status, attempts, last_error, created_at, last_polled_at";

#[async_trait]
impl SettlementStore for PgStore {
    async fn begin_or_join(&self, op: Operation) -> AppResult<(Operation, bool)> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO operations
                (id, operation_key, kind, payload, ledger_ref, status, attempts, last_error, created_at, last_polled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (operation_key) DO NOTHING
            "#,
        )
        .bind(op.id)
        .bind(&op.operation_key)
        .bind(op.kind.as_str())
        .bind(serde_json::to_value(&op.payload)?)
        .bind(&op.ledger_ref)
        .bind(op.status.as_str())
        .bind(op.attempts)
        .bind(&op.last_error)
        .bind(op.created_at)
        .bind(op.last_polled_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok((op, true));
        }

        // Unique-key conflict on a race reads back as "already exists"
        let existing = self
            .get_operation(&op.operation_key)
            .await?
            .ok_or_else(|| AppError::Internal("operation vanished after conflict".to_string()))?;
        Ok((existing, false))
    }

    async fn get_operation(&self, operation_key: &str) -> AppResult<Option<Operation>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM operations WHERE operation_key = $1",
            OPERATION_COLUMNS
        ))
        .bind(operation_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(operation_from_row).transpose()
    }

    async fn mark_submitted(&self, operation_key: &str, ledger_ref: &str) -> AppResult<bool> {
        validate_transition(OperationStatus::Pending, OperationStatus::Submitted)?;

        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = $3, ledger_ref = $2, attempts = attempts + 1, last_polled_at = NOW()
            WHERE operation_key = $1 AND status = $4
            "#,
        )
        .bind(operation_key)
        .bind(ledger_ref)
        .bind(OperationStatus::Submitted.as_str())
        .bind(OperationStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn transition(
        &self,
        operation_key: &str,
        from: OperationStatus,
        to: OperationStatus,
        error: Option<String>,
    ) -> AppResult<bool> {
        validate_transition(from, to)?;

        let result = sqlx::query(
            r#"
            UPDATE operations
            SET status = $3, last_polled_at = NOW(), last_error = COALESCE($4, last_error)
            WHERE operation_key = $1 AND status = $2
            "#,
        )
        .bind(operation_key)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_attempt(&self, operation_key: &str, error: &str) -> AppResult<()> {
        sqlx::query(
            "UPDATE operations SET attempts = attempts + 1, last_error = $2 WHERE operation_key = $1",
        )
        .bind(operation_key)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_polled(&self, operation_key: &str) -> AppResult<()> {
        sqlx::query("UPDATE operations SET last_polled_at = NOW() WHERE operation_key = $1")
            .bind(operation_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_unresolved(&self, polled_before: DateTime<Utc>) -> AppResult<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM operations
            WHERE status IN ($1, $2) AND last_polled_at < $3
            ORDER BY last_polled_at ASC
            "#,
            OPERATION_COLUMNS
        ))
        .bind(OperationStatus::Submitted.as_str())
        .bind(OperationStatus::TimedOut.as_str())
        .bind(polled_before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(operation_from_row).collect()
    }

    async fn list_unmirrored(&self) -> AppResult<Vec<Operation>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM operations WHERE status = $1 ORDER BY created_at ASC",
            OPERATION_COLUMNS
        ))
        .bind(OperationStatus::Confirmed.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(operation_from_row).collect()
    }

    async fn insert_property_if_absent(&self, property: Property) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO properties (token_id, owner, details, ledger_ref, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_id) DO NOTHING
            "#,
        )
        .bind(property.token_id)
        .bind(&property.owner)
        .bind(&property.details)
        .bind(&property.ledger_ref)
        .bind(property.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_rent_record_if_absent(&self, record: RentRecord) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO rent_records (ledger_ref, tenant, landlord, amount, due_date, paid, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (ledger_ref) DO NOTHING
            "#,
        )
        .bind(&record.ledger_ref)
        .bind(&record.tenant)
        .bind(&record.landlord)
        .bind(record.amount.to_string())
        .bind(record.due_date)
        .bind(record.paid)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_property(&self, token_id: i64) -> AppResult<Option<Property>> {
        let row = sqlx::query(
            "SELECT token_id, owner, details, ledger_ref, created_at FROM properties WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(property_from_row).transpose()
    }

    async fn list_properties(&self) -> AppResult<Vec<Property>> {
        let rows = sqlx::query(
            "SELECT token_id, owner, details, ledger_ref, created_at FROM properties ORDER BY token_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(property_from_row).collect()
    }

    async fn list_rent_records(&self, tenant: &str) -> AppResult<Vec<RentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT ledger_ref, tenant, landlord, amount, due_date, paid, created_at
            FROM rent_records
            WHERE tenant = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rent_record_from_row).collect()
    }
}
