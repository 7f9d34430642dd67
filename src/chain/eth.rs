use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::chain::{ConfirmationState, LedgerClient};
use crate::error::{AppResult, ChainError};
use crate::store::models::OperationPayload;

// mint(address,uint256)
const MINT_SELECTOR: &str = "40c10f19";
// payRent()
const PAY_RENT_SELECTOR: &str = "1f1f9fd5";

const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

/// Ethereum-style node configuration
#[derive(Debug, Clone)]
pub struct EthConfig {
    pub node_url: String,
    /// Process-wide wallet identity, injected once at startup
    pub wallet_address: String,
    pub property_contract: String,
    pub rent_contract: String,
    pub request_timeout: Duration,
}

/// Ledger client over Ethereum JSON-RPC.
///
/// Property registration mints on the property NFT contract; rent payment is
/// a value-bearing call to the rent contract. Property details live only in
/// the mirror.
pub struct EthLedgerClient {
    config: EthConfig,
    http: reqwest::Client,
}

impl EthLedgerClient {
    pub fn new(config: EthConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> AppResult<serde_json::Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.config.node_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let value: serde_json::Value = response.json().await?;
        if let Some(error) = value.get("error") {
            return Err(ChainError::Rpc(format!("{} failed: {}", method, error)).into());
        }

        Ok(value.get("result").cloned().unwrap_or(serde_json::Value::Null))
    }

    fn build_transaction(&self, payload: &OperationPayload) -> AppResult<serde_json::Value> {
        match payload {
            OperationPayload::RegisterProperty { owner, token_id, .. } => Ok(json!({
                "from": self.config.wallet_address,
                "to": self.config.property_contract,
                "data": format!(
                    "0x{}{}{:064x}",
                    MINT_SELECTOR,
                    encode_address(owner)?,
                    token_id,
                ),
            })),
            OperationPayload::PayRent { amount, .. } => Ok(json!({
                "from": self.config.wallet_address,
                "to": self.config.rent_contract,
                "data": format!("0x{}", PAY_RENT_SELECTOR),
                "value": format!("0x{:x}", to_wei(*amount)?),
            })),
        }
    }
}

#[async_trait]
impl LedgerClient for EthLedgerClient {
    async fn submit(&self, payload: &OperationPayload) -> AppResult<String> {
        let tx = self.build_transaction(payload)?;

        // Anything that goes wrong here happened before acceptance into the
        // pending pool, so it is retryable by the engine.
        let result = self
            .rpc("eth_sendTransaction", json!([tx]))
            .await
            .map_err(|e| ChainError::Submission(e.to_string()))?;

        let tx_hash = result
            .as_str()
            .ok_or_else(|| ChainError::Submission("node returned no transaction hash".to_string()))?;

        debug!("transaction accepted: {}", tx_hash);
        Ok(tx_hash.to_string())
    }

    async fn poll_status(&self, ledger_ref: &str) -> AppResult<ConfirmationState> {
        let receipt = self
            .rpc("eth_getTransactionReceipt", json!([ledger_ref]))
            .await?;

        // No receipt yet: still in the pending pool
        if receipt.is_null() {
            return Ok(ConfirmationState::Pending);
        }

        match receipt.get("status").and_then(|s| s.as_str()) {
            Some("0x1") => Ok(ConfirmationState::Confirmed),
            _ => Ok(ConfirmationState::Failed),
        }
    }
}

fn encode_address(address: &str) -> AppResult<String> {
    let stripped = address.strip_prefix("0x").unwrap_or(address);
    if stripped.len() != 40 || hex::decode(stripped).is_err() {
        return Err(ChainError::Submission(format!("invalid address: {}", address)).into());
    }
    Ok(format!("{:0>64}", stripped.to_lowercase()))
}

fn to_wei(amount: Decimal) -> AppResult<u128> {
    amount
        .checked_mul(Decimal::from(WEI_PER_ETH))
        .and_then(|wei| wei.trunc().to_u128())
        .ok_or_else(|| ChainError::Submission(format!("amount out of range: {}", amount)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_wei() {
        assert_eq!(to_wei(dec!(0.5)).unwrap(), 500_000_000_000_000_000);
        assert_eq!(to_wei(dec!(1)).unwrap(), WEI_PER_ETH as u128);
    }

    #[test]
    fn test_encode_address_pads_to_word() {
        let word = encode_address("0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B").unwrap();
        assert_eq!(word.len(), 64);
        assert!(word.starts_with("000000000000000000000000ab5801a7"));
        assert!(encode_address("not-an-address").is_err());
    }
}
