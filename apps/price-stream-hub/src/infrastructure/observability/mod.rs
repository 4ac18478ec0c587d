//! Observability Adapters
//!
//! `EventReporter` implementation that turns hub events into structured
//! log lines and Prometheus counters.

use tracing::{error, warn};

use crate::application::ports::{EventReporter, FeedEvent};
use crate::infrastructure::metrics;

/// Reporter logging through `tracing` and counting through `metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl EventReporter for TracingReporter {
    fn report(&self, event: FeedEvent) {
        metrics::record_feed_event(event.kind());

        match &event {
            FeedEvent::OpenFailed { symbol, error } => {
                warn!(symbol = %symbol, error = %error, kind = error.kind(), "Feed open failed");
            }
            FeedEvent::SampleFailed { symbol, error } => {
                warn!(symbol = %symbol, error = %error, kind = error.kind(), "Feed sample failed");
            }
            FeedEvent::ListenerFailed { symbol, error } => {
                warn!(symbol = %symbol, error = %error, "Listener rejected update");
            }
            FeedEvent::DeliveryDropped { session_id, symbol } => {
                warn!(session_id = %session_id, symbol = %symbol, "Slow client, update dropped");
            }
            FeedEvent::PollerAborted { symbol, reason } => {
                error!(symbol = %symbol, reason = %reason, "Poller aborted");
            }
        }
    }
}
