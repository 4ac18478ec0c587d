//! Event Reporter Port (Driven Port)
//!
//! Interface for reporting recoverable failures. Reporting never blocks
//! and never fails; the hub calls it while delivering updates.

use crate::domain::streaming::Symbol;

use super::{DeliveryError, FeedError};

/// A recoverable failure observed by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Opening a feed for a new symbol failed.
    OpenFailed {
        /// Symbol being opened.
        symbol: Symbol,
        /// Adapter error.
        error: FeedError,
    },

    /// A poll tick failed; polling continues.
    SampleFailed {
        /// Symbol being sampled.
        symbol: Symbol,
        /// Adapter error.
        error: FeedError,
    },

    /// A listener rejected an update.
    ListenerFailed {
        /// Symbol being delivered.
        symbol: Symbol,
        /// Delivery error.
        error: DeliveryError,
    },

    /// A session dropped an update because its client is slow.
    DeliveryDropped {
        /// Session that dropped the update.
        session_id: String,
        /// Symbol of the dropped update.
        symbol: Symbol,
    },

    /// A poller task ended abnormally.
    PollerAborted {
        /// Symbol of the poller.
        symbol: Symbol,
        /// Failure details.
        reason: String,
    },
}

impl FeedEvent {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OpenFailed { .. } => "open_failed",
            Self::SampleFailed { .. } => "sample_failed",
            Self::ListenerFailed { .. } => "listener_failed",
            Self::DeliveryDropped { .. } => "delivery_dropped",
            Self::PollerAborted { .. } => "poller_aborted",
        }
    }

    /// Symbol the event relates to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::OpenFailed { symbol, .. }
            | Self::SampleFailed { symbol, .. }
            | Self::ListenerFailed { symbol, .. }
            | Self::DeliveryDropped { symbol, .. }
            | Self::PollerAborted { symbol, .. } => symbol,
        }
    }
}

/// Port for reporting hub events.
pub trait EventReporter: Send + Sync {
    /// Report one event.
    fn report(&self, event: FeedEvent);
}

/// Reporter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventReporter;

impl EventReporter for NoOpEventReporter {
    fn report(&self, _event: FeedEvent) {}
}
