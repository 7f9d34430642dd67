use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    get_operation_status, get_property, health_check, list_properties, list_rent_records,
    pay_rent, register_property, AppState,
};

pub async fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Settlement operations
                .route("/properties", post(register_property).get(list_properties))
                .route("/properties/:token_id", get(get_property))
                .route("/rent/pay", post(pay_rent))
                .route("/rent/:tenant", get(list_rent_records))
                .route("/operations/:operation_key", get(get_operation_status)),
        )
        .layer(CompressionLayer::new())
        // Allow all origins in dev, restrict in prod
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
