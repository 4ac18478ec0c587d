//! Channel-backed price sink.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::application::ports::{DeliveryError, PriceSink};
use crate::domain::streaming::PriceUpdate;

/// Sink writing into a bounded channel drained by the client's response.
///
/// A full channel rejects the update as `Backpressure`; a dropped receiver
/// means the client is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<PriceUpdate>,
}

impl ChannelSink {
    /// Wrap the sending half of a client channel.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<PriceUpdate>) -> Self {
        Self { tx }
    }
}

impl PriceSink for ChannelSink {
    fn push(&self, update: &PriceUpdate) -> Result<(), DeliveryError> {
        self.tx.try_send(update.clone()).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Backpressure,
            TrySendError::Closed(_) => DeliveryError::SinkClosed,
        })
    }
}
