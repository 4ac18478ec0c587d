//! Feed Poller
//!
//! Drives one feed handle per active symbol at a fixed cadence and hands
//! every raw sample to a `SampleConsumer` (the hub).
//!
//! The poller task exclusively owns the handle. `stop()` cancels the
//! timer, waits for an in-flight sample to finish and returns the handle
//! so the caller can close it exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use crate::application::ports::{FeedError, FeedHandle};
use crate::domain::streaming::{Price, Symbol};
use crate::domain::subscription::FeedId;

/// Default sampling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Receiver of raw poll results.
#[cfg_attr(test, mockall::automock)]
pub trait SampleConsumer: Send + Sync {
    /// A tick completed; `sample` is `None` when the source had no data.
    fn on_sample(&self, symbol: &Symbol, feed_id: FeedId, sample: Option<Price>);

    /// A tick failed; polling continues.
    fn on_sample_error(&self, symbol: &Symbol, feed_id: FeedId, error: &FeedError);
}

/// Running poll loop for one symbol.
///
/// Dropping a `Poller` without `stop()` cancels the loop; the handle is
/// then dropped unclosed with the task.
pub struct Poller {
    symbol: Symbol,
    feed_id: FeedId,
    task: JoinHandle<Box<dyn FeedHandle>>,
    cancel: DropGuard,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("symbol", &self.symbol)
            .field("feed_id", &self.feed_id)
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Spawn the poll loop. The first tick fires one `period` after start.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        symbol: Symbol,
        feed_id: FeedId,
        handle: Box<dyn FeedHandle>,
        period: Duration,
        consumer: Arc<dyn SampleConsumer>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            symbol.clone(),
            feed_id,
            handle,
            period,
            consumer,
            cancel.clone(),
        ));

        debug!(symbol = %symbol, feed_id = feed_id.get(), period_ms = period.as_millis(), "Poller started");

        Self {
            symbol,
            feed_id,
            task,
            cancel: cancel.drop_guard(),
        }
    }

    /// Symbol being polled.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Feed generation this poller belongs to.
    #[must_use]
    pub const fn feed_id(&self) -> FeedId {
        self.feed_id
    }

    /// Stop polling and take the handle back.
    ///
    /// An in-flight sample is allowed to finish; its result is discarded.
    ///
    /// # Errors
    ///
    /// Returns the `JoinError` if the poll task panicked, in which case the
    /// handle was lost with it.
    pub async fn stop(self) -> Result<Box<dyn FeedHandle>, JoinError> {
        self.cancel.disarm().cancel();

        let handle = self.task.await?;
        debug!(symbol = %self.symbol, feed_id = self.feed_id.get(), "Poller stopped");
        Ok(handle)
    }
}

async fn run(
    symbol: Symbol,
    feed_id: FeedId,
    mut handle: Box<dyn FeedHandle>,
    period: Duration,
    consumer: Arc<dyn SampleConsumer>,
    cancel: CancellationToken,
) -> Box<dyn FeedHandle> {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = handle.sample().await;

        if cancel.is_cancelled() {
            trace!(symbol = %symbol, "Discarding sample completed after stop");
            break;
        }

        match result {
            Ok(sample) => consumer.on_sample(&symbol, feed_id, sample),
            Err(error) => consumer.on_sample_error(&symbol, feed_id, &error),
        }
    }

    handle
}

// =============================================================================
// Tests
// =============================================================================
