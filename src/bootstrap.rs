use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    api::handler::AppState,
    chain::eth::{EthConfig, EthLedgerClient},
    chain::LedgerClient,
    config::Config,
    error::AppResult,
    settlement::{EngineConfig, MirrorWriter, ReconciliationSweeper, SettlementEngine},
    store::{memory::MemStore, postgres::PgStore, SettlementStore},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let store: Arc<dyn SettlementStore> = if config.database_url == "memory" {
        // Development/demo mode; nothing survives a restart
        info!("⚠️  Using in-memory store (no persistence)");
        Arc::new(MemStore::new())
    } else {
        let pool = initialize_database(&config.database_url).await?;
        Arc::new(PgStore::new(pool))
    };

    // Ledger client: wallet and contracts injected once, no implicit
    // re-creation after startup
    let chain: Arc<dyn LedgerClient> = Arc::new(EthLedgerClient::new(EthConfig {
        node_url: config.eth_node_url.clone(),
        wallet_address: config.wallet_address.clone(),
        property_contract: config.property_contract.clone(),
        rent_contract: config.rent_contract.clone(),
        request_timeout: Duration::from_secs(30),
    }));
    info!("✅ Ledger client initialized against {}", config.eth_node_url);

    let mirror = Arc::new(MirrorWriter::new(
        store.clone(),
        config.wallet_address.clone(),
    ));

    let engine = Arc::new(SettlementEngine::new(
        store.clone(),
        chain,
        mirror,
        EngineConfig {
            max_attempts: config.max_submit_attempts,
            backoff_base: Duration::from_millis(500),
            confirm_wait: Duration::from_secs(config.confirm_wait_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            confirm_deadline: Duration::from_secs(config.confirm_deadline_secs),
        },
    ));
    info!("✅ Settlement engine initialized");

    // Background reconciliation: the only forward-progress guarantee for
    // operations whose caller stopped waiting
    let sweeper = ReconciliationSweeper::new(
        engine.clone(),
        Duration::from_secs(config.sweep_interval_secs),
    );
    sweeper.start();
    info!(
        "✅ Reconciliation sweeper started ({}s interval)",
        config.sweep_interval_secs
    );

    Ok(AppState { engine, store })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(50)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| crate::error::AppError::Internal(format!("Migration error: {:?}", e)))?;

    info!("✓ Database initialized");
    Ok(pool)
}
