use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use woox_trader::application::api;
use woox_trader::application::engine::TradingEngine;
use woox_trader::config::{Config, TradeMode};
use woox_trader::infrastructure::woox_client::WooxClient;
use woox_trader::persistence;
use woox_trader::persistence::store::TransactionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("woox_trader=info,tower_http=info")),
        )
        .init();

    let config = Config::load()?;
    let mode = config.trade_mode();
    info!("Trade mode: {}, symbol: {}", mode, config.symbol());

    let database_url = format!("sqlite://{}", mode.database_file());
    let pool = persistence::init_database(&database_url).await?;
    let store = TransactionStore::new(pool);

    let gateway = Arc::new(WooxClient::from_config(&config));
    if mode == TradeMode::Live && !gateway.has_credentials() {
        warn!("Live mode without API credentials: orders will fail until WOOX_API_KEY/WOOX_API_SECRET are set");
    }

    let bind = config.get_str("DASHBOARD_BIND", "127.0.0.1:3000");
    let engine = Arc::new(TradingEngine::new(config, gateway, store)?);
    engine.start().await?;

    let app = api::router(Arc::clone(&engine));
    let listener = TcpListener::bind(&bind).await?;
    info!("Dashboard API listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
