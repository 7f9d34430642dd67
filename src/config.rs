use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,

    pub eth_node_url: String,
    /// Wallet identity used for every submission and recorded as landlord
    pub wallet_address: String,
    pub property_contract: String,
    pub rent_contract: String,

    pub max_submit_attempts: i32,
    pub confirm_wait_secs: u64,
    pub poll_interval_secs: u64,
    pub confirm_deadline_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/rentledger".to_string()),
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            eth_node_url: std::env::var("ETH_NODE_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            wallet_address: required("WALLET_ADDRESS")?,
            property_contract: required("PROPERTY_NFT_CONTRACT")?,
            rent_contract: required("RENT_PAYMENT_CONTRACT")?,
            max_submit_attempts: parse_var("MAX_SUBMIT_ATTEMPTS", 3)?,
            confirm_wait_secs: parse_var("CONFIRM_WAIT_SECS", 30)?,
            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", 2)?,
            confirm_deadline_secs: parse_var("CONFIRM_DEADLINE_SECS", 180)?,
            sweep_interval_secs: parse_var("SWEEP_INTERVAL_SECS", 15)?,
        })
    }
}

fn required(name: &str) -> AppResult<String> {
    std::env::var(name).map_err(|_| AppError::Config(format!("{} must be set", name)))
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> AppResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{} is not a valid number: {}", name, raw))),
        Err(_) => Ok(default),
    }
}
