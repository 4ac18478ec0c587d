//! Feed Adapter Port (Driven Port)
//!
//! Interface for upstream price sources. The hub opens one handle per
//! active symbol and hands it to that symbol's poller, which is the only
//! owner of the handle until it is closed.

use async_trait::async_trait;

use crate::domain::streaming::{Price, Symbol};

/// Feed adapter error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The source could not be reached or refused the symbol.
    #[error("feed unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Transport failure while sampling.
    #[error("feed transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// Upstream answered with a non-success status.
    #[error("feed returned status {status}")]
    Status {
        /// HTTP (or equivalent) status code.
        status: u16,
    },

    /// Upstream payload could not be understood.
    #[error("malformed feed payload: {message}")]
    Malformed {
        /// Error details.
        message: String,
    },
}

impl FeedError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "status",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Port for opening per-symbol price sources.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    /// Establish a source for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns `FeedError` if the source cannot be established.
    async fn open(&self, symbol: &Symbol) -> Result<Box<dyn FeedHandle>, FeedError>;

    /// Release adapter-wide resources once every handle is closed.
    async fn shutdown(&self) {}
}

/// An open price source for a single symbol.
#[async_trait]
pub trait FeedHandle: Send {
    /// Read the current price.
    ///
    /// `Ok(None)` means the source had no usable price this time.
    ///
    /// # Errors
    ///
    /// Returns `FeedError` if the source failed; the handle stays usable.
    async fn sample(&mut self) -> Result<Option<Price>, FeedError>;

    /// Release the source. Must be safe on a degraded handle.
    async fn close(&mut self);
}
