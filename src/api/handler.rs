use axum::{
    extract::{Path, State},
    Json,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use validator::Validate;

use super::models::{OperationResponse, PayRentRequest, RegisterPropertyRequest};
use crate::{
    error::{AppError, AppResult},
    settlement::SettlementEngine,
    store::models::{Property, RentRecord},
    store::SettlementStore,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub store: Arc<dyn SettlementStore>,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Register a property as an on-chain token
/// POST /api/v1/properties
pub async fn register_property(
    State(state): State<AppState>,
    Json(request): Json<RegisterPropertyRequest>,
) -> AppResult<Json<OperationResponse>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    info!(
        "registering property {} for owner {}",
        request.token_id, request.owner
    );

    let op = state
        .engine
        .register_property(
            request.operation_key,
            request.owner,
            request.token_id,
            request.details,
        )
        .await?;

    Ok(Json(op.into()))
}

/// Pay rent through the rent contract
/// POST /api/v1/rent/pay
pub async fn pay_rent(
    State(state): State<AppState>,
    Json(request): Json<PayRentRequest>,
) -> AppResult<Json<OperationResponse>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let amount = Decimal::from_str(&request.amount)
        .map_err(|_| AppError::Validation("amount must be a decimal number".to_string()))?;

    info!(
        "processing rent payment of {} ETH from {}",
        amount, request.tenant
    );

    let op = state
        .engine
        .pay_rent(request.operation_key, request.tenant, amount, request.due_date)
        .await?;

    Ok(Json(op.into()))
}

/// Look up one tracked operation by its idempotency key
/// GET /api/v1/operations/:operation_key
pub async fn get_operation_status(
    State(state): State<AppState>,
    Path(operation_key): Path<String>,
) -> AppResult<Json<OperationResponse>> {
    let op = state.engine.get_operation(&operation_key).await?;
    Ok(Json(op.into()))
}

/// GET /api/v1/properties
pub async fn list_properties(State(state): State<AppState>) -> AppResult<Json<Vec<Property>>> {
    Ok(Json(state.store.list_properties().await?))
}

/// GET /api/v1/properties/:token_id
pub async fn get_property(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> AppResult<Json<Property>> {
    let token_id: i64 = token_id
        .parse()
        .map_err(|_| AppError::Validation("Invalid tokenId format. Must be a number.".to_string()))?;

    let property = state
        .store
        .get_property(token_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Property not found".to_string()))?;

    Ok(Json(property))
}

/// GET /api/v1/rent/:tenant
pub async fn list_rent_records(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> AppResult<Json<Vec<RentRecord>>> {
    Ok(Json(state.store.list_rent_records(&tenant).await?))
}
