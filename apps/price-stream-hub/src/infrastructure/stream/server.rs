//! Streaming HTTP Server
//!
//! # Protocol
//!
//! `POST /StreamPrices` (or `/{service}/StreamPrices`) opens a session.
//! The request body is a long-lived stream of subscribe requests:
//!
//! ```json
//! {"symbol": "btcusd"}
//! ```
//!
//! The response is `application/x-ndjson`, one price change per line:
//!
//! ```json
//! {"symbol":"BTCUSD","price":"42000.50","timestamp":1718000000000}
//! ```
//!
//! Closing the connection releases every subscription of the session.
//! The request body may end early; the response keeps streaming.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::body::{Body, BodyDataStream, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::codec::RequestDecoder;
use super::sink::ChannelSink;
use crate::application::services::{ClientSession, SubscriptionHub};
use crate::domain::streaming::PriceUpdate;
use crate::infrastructure::metrics;

/// Response content type.
pub const NDJSON: &str = "application/x-ndjson";

// =============================================================================
// Server State
// =============================================================================

/// State shared by every streaming request.
#[derive(Debug)]
pub struct StreamState {
    hub: Arc<SubscriptionHub>,
    session_buffer: usize,
    sessions: AtomicUsize,
    shutdown: CancellationToken,
}

impl StreamState {
    /// Create streaming state.
    ///
    /// `session_buffer` bounds the updates queued per client; `shutdown`
    /// ends every open session when cancelled.
    #[must_use]
    pub fn new(hub: Arc<SubscriptionHub>, session_buffer: usize, shutdown: CancellationToken) -> Self {
        Self {
            hub,
            session_buffer: session_buffer.max(1),
            sessions: AtomicUsize::new(0),
            shutdown,
        }
    }

    /// Currently connected clients.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::Relaxed)
    }

    /// The hub sessions subscribe through.
    #[must_use]
    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    fn session_opened(&self) {
        let count = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_sessions(count);
    }

    fn session_closed(&self) {
        let previous = self
            .sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
            .unwrap_or_else(|n| n);
        metrics::set_sessions(previous.saturating_sub(1));
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build the streaming router.
///
/// # Errors
///
/// Returns `StreamServerError::InvalidOrigin` if `cors_origin` is not a
/// valid header value.
pub fn router(state: Arc<StreamState>, cors_origin: &str) -> Result<Router, StreamServerError> {
    Ok(Router::new()
        .route("/StreamPrices", post(stream_prices))
        .route("/{service}/StreamPrices", post(stream_prices))
        .layer(cors_layer(cors_origin)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(origin: &str) -> Result<CorsLayer, StreamServerError> {
    let origin = HeaderValue::from_str(origin)
        .map_err(|_| StreamServerError::InvalidOrigin(origin.to_string()))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static("connect-protocol-version"),
            HeaderName::from_static("connect-timeout-ms"),
        ]))
}

// =============================================================================
// Stream Server
// =============================================================================

/// Streaming HTTP server.
#[derive(Debug)]
pub struct StreamServer {
    port: u16,
    state: Arc<StreamState>,
    cors_origin: String,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Create a new streaming server.
    #[must_use]
    pub const fn new(
        port: u16,
        state: Arc<StreamState>,
        cors_origin: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state,
            cors_origin,
            cancel,
        }
    }

    /// Run until cancelled. Open sessions are closed before this returns.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if the router cannot be built, binding
    /// fails or the HTTP server hits a fatal error.
    pub async fn run(self) -> Result<(), StreamServerError> {
        let app = router(Arc::clone(&self.state), &self.cors_origin)?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamServerError::BindFailed(self.port, e.to_string()))?;

        info!(port = self.port, cors_origin = %self.cors_origin, "Stream server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;

        info!("Stream server stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn stream_prices(State(state): State<Arc<StreamState>>, body: Body) -> Response {
    if state.hub.is_shutting_down() || state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let (tx, rx) = mpsc::channel(state.session_buffer);
    let session = ClientSession::new(Arc::clone(&state.hub), ChannelSink::new(tx.clone()));

    state.session_opened();
    info!(session_id = %session.id(), "Client connected");

    tokio::spawn(drive_session(
        session,
        body.into_data_stream(),
        tx,
        Arc::clone(&state),
    ));

    let lines = ReceiverStream::new(rx).map(encode_line);

    (
        [(CONTENT_TYPE, NDJSON), (CACHE_CONTROL, "no-cache")],
        Body::from_stream(lines),
    )
        .into_response()
}

fn encode_line(update: PriceUpdate) -> Result<Bytes, serde_json::Error> {
    let mut line = serde_json::to_vec(&update)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

/// Feed request-body subscriptions into the session until the client goes
/// away or the server shuts down, then release everything.
async fn drive_session(
    mut session: ClientSession<ChannelSink>,
    mut body: BodyDataStream,
    liveness: mpsc::Sender<PriceUpdate>,
    state: Arc<StreamState>,
) {
    let session_id = session.id();
    let disconnected = session.disconnected();
    let mut decoder = RequestDecoder::new();
    let mut body_open = true;

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break,
            () = disconnected.cancelled() => break,
            () = liveness.closed() => break,
            frame = body.next(), if body_open => match frame {
                Some(Ok(chunk)) => {
                    for request in decoder.push(&chunk) {
                        match request {
                            Ok(request) => {
                                if let Err(e) = session.subscribe(&request.symbol).await {
                                    warn!(
                                        session_id = %session_id,
                                        symbol = %request.symbol,
                                        error = %e,
                                        "Subscribe failed"
                                    );
                                }
                            }
                            Err(e) => {
                                warn!(session_id = %session_id, error = %e, "Ignoring request");
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "Request body failed");
                    body_open = false;
                }
                None => {
                    debug!(session_id = %session_id, "Request body finished");
                    body_open = false;
                }
            },
        }
    }

    drop(liveness);
    session.close().await;
    state.session_closed();

    info!(session_id = %session_id, "Client disconnected");
}

// =============================================================================
// Errors
// =============================================================================

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamServerError {
    /// The configured CORS origin is not a valid header value.
    #[error("invalid CORS origin: {0}")]
    InvalidOrigin(String),

    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::NoOpEventReporter;
    use crate::application::services::HubConfig;
    use crate::domain::streaming::{Price, Symbol};
    use crate::infrastructure::feeds::ScriptedFeedAdapter;

    fn state() -> Arc<StreamState> {
        let hub = SubscriptionHub::new(
            Arc::new(ScriptedFeedAdapter::new()),
            Arc::new(NoOpEventReporter),
            HubConfig::default(),
        );
        Arc::new(StreamState::new(Arc::new(hub), 0, CancellationToken::new()))
    }

    #[test]
    fn encodes_one_json_line() {
        let update = PriceUpdate {
            symbol: Symbol::parse("btcusd").unwrap(),
            price: Price::parse("42000.50").unwrap(),
            timestamp: chrono::DateTime::from_timestamp_millis(1_718_000_000_000).unwrap(),
        };

        let line = encode_line(update).unwrap();
        assert_eq!(
            &line[..],
            b"{\"symbol\":\"BTCUSD\",\"price\":\"42000.50\",\"timestamp\":1718000000000}\n"
        );
    }

    #[test]
    fn session_buffer_is_at_least_one() {
        assert_eq!(state().session_buffer, 1);
    }

    #[test]
    fn rejects_invalid_origin() {
        assert!(matches!(
            router(state(), "bad\norigin"),
            Err(StreamServerError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn session_counter_saturates() {
        let state = state();
        state.session_opened();
        state.session_closed();
        state.session_closed();
        assert_eq!(state.active_sessions(), 0);
    }
}
