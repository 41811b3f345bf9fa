//! tether-server: moves Pub/Sub messages into an append-only PostgreSQL table.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use tether_core::app::{AppBuilder, init_store};
use tether_core::config::Settings;
use tether_core::impls::{PubSubClient, SecretManagerClient};
use tether_core::observability::init_tracing;
use tether_core::ports::{Clock, SystemClock};
use tether_server::{ServerError, TetherServer};

/// HTTP front end for Pub/Sub to PostgreSQL ingestion.
#[derive(Parser, Debug)]
#[command(name = "tether-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let settings = Settings::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| ServerError::HttpClient(e.to_string()))?;

    let secrets = SecretManagerClient::from_settings(&settings, http.clone(), clock.clone());
    let store = init_store(&settings, &secrets).await;
    let queue = PubSubClient::from_settings(&settings, http, clock.clone());
    info!(pubsub = queue.base_url(), "queue client ready");

    let app = AppBuilder::new(settings)
        .queue(Arc::new(queue))
        .store(store)
        .clock(clock)
        .build()?;

    let address = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(address = ?local, "tether-server listening");

    axum::serve(listener, TetherServer::new(app).into_router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    info!("tether-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
