use std::sync::Arc;

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tiketa_api::config::AppConfig;
use tiketa_api::notify::ConsoleNotifier;
use tiketa_api::routes::build_router;
use tiketa_api::services::expiry::spawn_expiry_task;
use tiketa_api::state::AppState;
use tiketa_db::{Database, DbConfig};
use tiketa_payments::PaymentProviders;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();

    let db = Database::new(DbConfig::new(&config.database_path)).await?;
    info!("Database ready");

    let providers = PaymentProviders::new(
        config.chapa.clone(),
        config.telebirr.clone(),
        config.cbe_birr.clone(),
    );

    let state = AppState::new(
        db.clone(),
        providers,
        Arc::new(ConsoleNotifier::new()),
        config.clone(),
    );

    // Abandoned checkouts release their inventory after the TTL.
    let reaper = spawn_expiry_task(db, config.pending_order_ttl, config.expiry_sweep_interval);

    let app = build_router(state);
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Tiketa API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    reaper.abort();
    Ok(())
}
