//! Price Stream Hub Binary
//!
//! Starts the subscription multiplexer with its streaming and health servers.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-stream-hub
//! ```
//!
//! # Environment Variables
//!
//! - `PORT`: Streaming HTTP port (default: 8080)
//! - `PRICE_HUB_HEALTH_PORT`: Health check and metrics port (default: 8082)
//! - `PRICE_HUB_FEED_SOURCE`: http | simulated (default: http)
//! - `PRICE_HUB_POLL_INTERVAL_MS`: Poll cadence (default: 500)
//! - `PRICE_HUB_TICKER_URL`: Ticker URL template with `{symbol}`
//! - `PRICE_HUB_PRICE_POINTER`: JSON pointer to the price (default: /price)
//! - `PRICE_HUB_SYMBOL_SUFFIX`: Appended to symbols in ticker URLs
//! - `PRICE_HUB_HTTP_TIMEOUT_MS`: Ticker request timeout (default: 5000)
//! - `PRICE_HUB_CORS_ORIGIN`: Allowed browser origin (default: <http://localhost:3000>)
//! - `PRICE_HUB_SESSION_BUFFER`: Per-client queued updates (default: 256)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-stream-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use price_stream_hub::infrastructure::stream::StreamState;
use price_stream_hub::infrastructure::telemetry;
use price_stream_hub::{
    FeedAdapter, FeedSource, HealthServer, HealthServerState, HttpTickerAdapter, HubSettings,
    SimulatedFeedAdapter, StreamServer, SubscriptionHub, TracingReporter, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("a rustls crypto provider is already installed"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Price Stream Hub");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let settings = HubSettings::from_env()?;
    log_settings(&settings);

    let shutdown_token = CancellationToken::new();

    let adapter: Arc<dyn FeedAdapter> = match settings.feed.source {
        FeedSource::Http => Arc::new(HttpTickerAdapter::new(settings.feed.http_config())?),
        FeedSource::Simulated => Arc::new(SimulatedFeedAdapter::default()),
    };

    let hub = Arc::new(SubscriptionHub::new(
        adapter,
        Arc::new(TracingReporter),
        settings.feed.hub_config(),
    ));

    // Streaming server
    let stream_state = Arc::new(StreamState::new(
        Arc::clone(&hub),
        settings.stream.session_buffer,
        shutdown_token.clone(),
    ));
    let stream_server = StreamServer::new(
        settings.server.stream_port,
        Arc::clone(&stream_state),
        settings.stream.cors_origin.clone(),
        shutdown_token.clone(),
    );

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&hub),
        Arc::clone(&stream_state),
    ));
    let health_server = HealthServer::new(
        settings.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let stream_shutdown = shutdown_token.clone();
    let stream_task = tokio::spawn(async move {
        if let Err(e) = stream_server.run().await {
            tracing::error!(error = %e, "Stream server error");
            stream_shutdown.cancel();
        }
    });

    tracing::info!("Price stream hub ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = stream_task.await;
        hub.shutdown().await;
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with feeds still open"
        );
    }

    tracing::info!("Price stream hub stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_settings(settings: &HubSettings) {
    tracing::info!(
        source = settings.feed.source.as_str(),
        poll_interval_ms = u64::try_from(settings.feed.poll_interval.as_millis()).unwrap_or(u64::MAX),
        stream_port = settings.server.stream_port,
        health_port = settings.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        ticker_url = %settings.feed.ticker_url,
        price_pointers = ?settings.feed.price_pointers,
        cors_origin = %settings.stream.cors_origin,
        session_buffer = settings.stream.session_buffer,
        "Feed and stream settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT), or for a server to give up.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::warn!("Server stopped, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
