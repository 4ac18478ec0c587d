//! Price Sink Port (Driven Port)
//!
//! Outbound delivery capability for one connected client.

use crate::domain::streaming::PriceUpdate;

/// Delivery failure for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The client is gone; the session must be torn down.
    #[error("sink closed")]
    SinkClosed,

    /// The client is not keeping up; the session must be torn down.
    #[error("sink full")]
    Backpressure,

    /// The listener panicked while handling the update.
    #[error("listener panicked")]
    ListenerPanicked,
}

/// Port for pushing updates to a client.
///
/// `push` is called from the hub's delivery path and must not block.
pub trait PriceSink: Send + Sync {
    /// Queue one update for the client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the update could not be queued.
    fn push(&self, update: &PriceUpdate) -> Result<(), DeliveryError>;
}
