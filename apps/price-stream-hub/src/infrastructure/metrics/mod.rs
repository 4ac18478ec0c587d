//! Prometheus Metrics Module
//!
//! Exposes hub metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Feeds**: Active feeds, opens and closes
//! - **Samples**: Poll results by outcome, upstream request latency
//! - **Delivery**: Updates delivered, feed events by kind
//! - **Clients**: Connected sessions and registered listeners
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Hub-derived
//! values are synced from `HubStats` each time metrics are rendered.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::services::HubStats;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns `BuildError` if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed lifecycle
    describe_gauge!(
        "price_hub_active_feeds",
        "Number of symbols with a running feed"
    );
    describe_counter!("price_hub_feed_opens_total", "Total feed handles opened");
    describe_counter!("price_hub_feed_closes_total", "Total feeds stopped");

    // Samples
    describe_counter!(
        "price_hub_samples_total",
        "Poll results by outcome (accepted, duplicate, empty, stale)"
    );
    describe_histogram!(
        "price_hub_feed_request_seconds",
        "Upstream ticker request latency"
    );

    // Delivery
    describe_counter!(
        "price_hub_updates_delivered_total",
        "Price updates delivered to listeners"
    );
    describe_counter!("price_hub_feed_events_total", "Hub events by kind");

    // Clients
    describe_gauge!("price_hub_listeners", "Registered listeners");
    describe_gauge!("price_hub_sessions", "Connected streaming clients");
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for an upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Successful response.
    Ok,
    /// Failed with the given error kind.
    Error(&'static str),
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error(kind) => kind,
        }
    }
}

/// Record an upstream ticker request.
pub fn record_feed_request(outcome: RequestOutcome, duration: Duration) {
    histogram!(
        "price_hub_feed_request_seconds",
        "outcome" => outcome.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record a hub event.
pub fn record_feed_event(kind: &'static str) {
    counter!("price_hub_feed_events_total", "kind" => kind).increment(1);
}

/// Update the connected session count.
#[allow(clippy::cast_precision_loss)]
pub fn set_sessions(count: usize) {
    gauge!("price_hub_sessions").set(count as f64);
}

/// Sync hub-derived gauges and counters from a stats snapshot.
#[allow(clippy::cast_precision_loss)]
pub fn record_hub_stats(stats: &HubStats) {
    gauge!("price_hub_active_feeds").set(stats.registry.active_feeds as f64);
    gauge!("price_hub_listeners").set(stats.registry.listeners as f64);

    counter!("price_hub_feed_opens_total").absolute(stats.feeds_opened);
    counter!("price_hub_feed_closes_total").absolute(stats.feeds_closed);
    counter!("price_hub_updates_delivered_total").absolute(stats.updates_delivered);

    for (outcome, value) in [
        ("accepted", stats.registry.samples_accepted),
        ("duplicate", stats.registry.samples_duplicate),
        ("empty", stats.registry.samples_empty),
        ("stale", stats.registry.samples_stale),
    ] {
        counter!("price_hub_samples_total", "outcome" => outcome).absolute(value);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_outcome_as_str() {
        assert_eq!(RequestOutcome::Ok.as_str(), "ok");
        assert_eq!(RequestOutcome::Error("status").as_str(), "status");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_feed_event("sample_failed");
        record_feed_request(RequestOutcome::Ok, Duration::from_millis(12));
        set_sessions(3);
        record_hub_stats(&HubStats::default());
    }
}
