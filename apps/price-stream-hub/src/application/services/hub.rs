//! Subscription Hub
//!
//! Multiplexes any number of listeners onto exactly one upstream feed per
//! symbol. The first subscriber of a symbol opens a feed handle and starts
//! its poller; the last one leaving stops the poller and closes the handle
//! before `unsubscribe` returns.
//!
//! # Locking
//!
//! - The registry (membership, last price, dedup) sits behind one global
//!   `parking_lot::Mutex`, never held across an `.await`.
//! - Subscribe/unsubscribe for the same symbol are serialized by a
//!   per-symbol async gate, so adapter `open`/`close` run without the
//!   global lock and never block other symbols.
//! - Each feed has a delivery lock, taken while the registry lock is still
//!   held and released after fan-out. A join replay and a tick for the same
//!   symbol therefore reach listeners in registry order.
//!
//! Listeners run synchronously on the poller task (or the subscribing
//! task, for replay). They must not block and must not call back into
//! the hub. A panicking listener counts as a failed delivery.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::lock_api::ArcMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::poller::{POLL_INTERVAL, Poller, SampleConsumer};
use crate::application::ports::{
    DeliveryError, EventReporter, FeedAdapter, FeedError, FeedEvent, FeedHandle,
};
use crate::domain::streaming::{Price, PriceUpdate, Symbol, SymbolError};
use crate::domain::subscription::{
    Attach, Detach, FeedId, ListenerId, RegistryStats, SampleOutcome, SubscriptionRegistry,
};

// =============================================================================
// Public Types
// =============================================================================

/// Callback receiving price changes for one subscribed symbol.
///
/// Identity is the allocation: registering a clone of the same `Arc` for
/// the same symbol twice is a no-op.
pub type PriceListener = Arc<dyn Fn(&PriceUpdate) -> Result<(), DeliveryError> + Send + Sync>;

/// Hub operation errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The feed adapter could not open a source for the symbol.
    #[error("feed for {symbol} unavailable: {source}")]
    AdapterUnavailable {
        /// Symbol that failed to open.
        symbol: Symbol,
        /// Adapter error.
        #[source]
        source: FeedError,
    },

    /// The symbol could not be parsed.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    /// The hub no longer accepts subscriptions.
    #[error("hub is shutting down")]
    ShuttingDown,
}

/// Outcome of `SubscriptionHub::unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// Unknown symbol or listener; nothing changed.
    NotRegistered,
    /// Listener removed; the feed keeps running for others.
    Removed,
    /// Last listener removed; the feed was stopped and its handle closed.
    FeedStopped,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Poller cadence.
    pub poll_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Hub statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Registry state and sample counters.
    pub registry: RegistryStats,
    /// Feed handles opened.
    pub feeds_opened: u64,
    /// Feeds stopped (poller stopped, handle closed).
    pub feeds_closed: u64,
    /// Successful listener invocations, replays included.
    pub updates_delivered: u64,
    /// Listener invocations that returned an error or panicked.
    pub listener_failures: u64,
}

// =============================================================================
// Core (shared with pollers)
// =============================================================================

/// Per-feed resource kept in the registry.
struct ActiveFeed {
    poller: Poller,
    delivery: Arc<Mutex<()>>,
}

type DeliveryGuard = ArcMutexGuard<parking_lot::RawMutex, ()>;

/// Result of the lock-held part of `subscribe`.
enum Join {
    NoFeed(PriceListener),
    Joined(ListenerId),
}

#[derive(Debug, Default)]
struct HubCounters {
    feeds_opened: AtomicU64,
    feeds_closed: AtomicU64,
    updates_delivered: AtomicU64,
    listener_failures: AtomicU64,
}

struct HubCore {
    registry: Mutex<SubscriptionRegistry<PriceListener, ActiveFeed>>,
    reporter: Arc<dyn EventReporter>,
    counters: HubCounters,
}

impl HubCore {
    /// Attach to an existing feed and replay its last price.
    fn join(&self, symbol: &Symbol, listener: PriceListener) -> Join {
        let replay_to = Arc::clone(&listener);

        let mut registry = self.registry.lock();
        let replay = match registry.attach(symbol, listener) {
            Attach::NoFeed(listener) => return Join::NoFeed(listener),
            Attach::AlreadyPresent { id } => {
                debug!(symbol = %symbol, listener = %id, "Listener already registered");
                return Join::Joined(id);
            }
            Attach::Added {
                id,
                replay,
                resource,
            } => {
                debug!(symbol = %symbol, listener = %id, "Listener added to running feed");
                (id, replay.map(|price| (price, resource.delivery.lock_arc())))
            }
        };
        drop(registry);

        let (id, replay) = replay;
        if let Some((price, guard)) = replay {
            let update = PriceUpdate::now(symbol.clone(), price);
            self.deliver(&update, std::slice::from_ref(&replay_to));
            drop(guard);
        }

        Join::Joined(id)
    }

    /// Register a freshly opened feed with its first listener.
    ///
    /// Hands the feed handle back if the hub began shutting down.
    fn install(
        self: &Arc<Self>,
        symbol: &Symbol,
        handle: Box<dyn FeedHandle>,
        listener: PriceListener,
        poll_interval: Duration,
        shutdown: &CancellationToken,
    ) -> Result<ListenerId, Box<dyn FeedHandle>> {
        let mut registry = self.registry.lock();
        if shutdown.is_cancelled() {
            return Err(handle);
        }

        let feed_id = registry.reserve_feed_id();
        let consumer: Arc<dyn SampleConsumer> = Arc::clone(self) as Arc<dyn SampleConsumer>;
        let feed = ActiveFeed {
            poller: Poller::start(symbol.clone(), feed_id, handle, poll_interval, consumer),
            delivery: Arc::new(Mutex::new(())),
        };

        let id = registry.install(symbol.clone(), feed_id, feed, listener);
        self.counters.feeds_opened.fetch_add(1, Ordering::Relaxed);
        info!(symbol = %symbol, feed_id = feed_id.get(), listener = %id, "Feed started");
        Ok(id)
    }

    fn detach(&self, symbol: &Symbol, id: ListenerId) -> Detach<ActiveFeed> {
        self.registry.lock().detach(symbol, id)
    }

    /// Stop the poller, then close the handle it hands back.
    async fn teardown(&self, symbol: &Symbol, feed_id: FeedId, feed: ActiveFeed) {
        match feed.poller.stop().await {
            Ok(mut handle) => handle.close().await,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Poller task aborted, handle lost");
                self.reporter.report(FeedEvent::PollerAborted {
                    symbol: symbol.clone(),
                    reason: e.to_string(),
                });
            }
        }

        self.counters.feeds_closed.fetch_add(1, Ordering::Relaxed);
        info!(symbol = %symbol, feed_id = feed_id.get(), "Feed stopped");
    }

    /// Invoke each listener once; errors and panics are reported and
    /// swallowed.
    fn deliver(&self, update: &PriceUpdate, listeners: &[PriceListener]) {
        for listener in listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(update)))
                .unwrap_or(Err(DeliveryError::ListenerPanicked));
            match result {
                Ok(()) => {
                    self.counters.updates_delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    if error == DeliveryError::ListenerPanicked {
                        warn!(symbol = %update.symbol, "Listener panicked during delivery");
                    }
                    self.counters.listener_failures.fetch_add(1, Ordering::Relaxed);
                    self.reporter.report(FeedEvent::ListenerFailed {
                        symbol: update.symbol.clone(),
                        error,
                    });
                }
            }
        }
    }
}

impl SampleConsumer for HubCore {
    fn on_sample(&self, symbol: &Symbol, feed_id: FeedId, sample: Option<Price>) {
        let mut registry = self.registry.lock();
        let (update, listeners, guard): (PriceUpdate, Vec<PriceListener>, DeliveryGuard) =
            match registry.accept_sample(symbol, feed_id, sample) {
                SampleOutcome::Changed {
                    price,
                    listeners,
                    resource,
                } => (
                    PriceUpdate::now(symbol.clone(), price),
                    listeners,
                    resource.delivery.lock_arc(),
                ),
                SampleOutcome::Stale => {
                    trace!(symbol = %symbol, feed_id = feed_id.get(), "Dropping sample for stopped feed");
                    return;
                }
                SampleOutcome::Empty | SampleOutcome::Duplicate => return,
            };
        drop(registry);

        trace!(symbol = %symbol, price = %update.price, listeners = listeners.len(), "Price changed");
        self.deliver(&update, &listeners);
        drop(guard);
    }

    fn on_sample_error(&self, symbol: &Symbol, feed_id: FeedId, error: &FeedError) {
        debug!(symbol = %symbol, feed_id = feed_id.get(), error = %error, "Sample failed");
        self.reporter.report(FeedEvent::SampleFailed {
            symbol: symbol.clone(),
            error: error.clone(),
        });
    }
}

// =============================================================================
// Hub
// =============================================================================

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Per-symbol feed multiplexer.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use price_stream_hub::application::ports::NoOpEventReporter;
/// use price_stream_hub::application::services::{HubConfig, PriceListener, SubscriptionHub};
/// use price_stream_hub::infrastructure::feeds::SimulatedFeedAdapter;
///
/// # async fn run() -> Result<(), price_stream_hub::application::services::HubError> {
/// let hub = SubscriptionHub::new(
///     Arc::new(SimulatedFeedAdapter::default()),
///     Arc::new(NoOpEventReporter),
///     HubConfig::default(),
/// );
///
/// let listener: PriceListener = Arc::new(|update| {
///     println!("{} {}", update.symbol, update.price);
///     Ok(())
/// });
///
/// let id = hub.subscribe("btcusd", listener).await?;
/// hub.unsubscribe("btcusd", id).await;
/// # Ok(())
/// # }
/// ```
pub struct SubscriptionHub {
    core: Arc<HubCore>,
    adapter: Arc<dyn FeedAdapter>,
    config: HubConfig,
    gates: Mutex<HashMap<Symbol, Gate>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl SubscriptionHub {
    /// Create a hub over `adapter`.
    #[must_use]
    pub fn new(
        adapter: Arc<dyn FeedAdapter>,
        reporter: Arc<dyn EventReporter>,
        config: HubConfig,
    ) -> Self {
        Self {
            core: Arc::new(HubCore {
                registry: Mutex::new(SubscriptionRegistry::new()),
                reporter,
                counters: HubCounters::default(),
            }),
            adapter,
            config,
            gates: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register `listener` for `symbol`.
    ///
    /// Starts the symbol's feed if this is its first listener. If a last
    /// price is known it is delivered to `listener` before returning.
    ///
    /// # Errors
    ///
    /// - `HubError::InvalidSymbol` if `symbol` does not parse
    /// - `HubError::AdapterUnavailable` if the feed could not be opened; no
    ///   state is created and the listener is not registered
    /// - `HubError::ShuttingDown` after `shutdown` began
    pub async fn subscribe(
        &self,
        symbol: &str,
        listener: PriceListener,
    ) -> Result<ListenerId, HubError> {
        let symbol = Symbol::parse(symbol)?;
        if self.shutdown.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let gate = self.gate(&symbol);
        let result = {
            let _lifecycle = gate.lock().await;
            self.subscribe_gated(&symbol, listener).await
        };
        self.release_gate(&symbol, gate);

        result
    }

    async fn subscribe_gated(
        &self,
        symbol: &Symbol,
        listener: PriceListener,
    ) -> Result<ListenerId, HubError> {
        let listener = match self.core.join(symbol, listener) {
            Join::Joined(id) => return Ok(id),
            Join::NoFeed(listener) => listener,
        };

        let handle = match self.adapter.open(symbol).await {
            Ok(handle) => handle,
            Err(source) => {
                warn!(symbol = %symbol, error = %source, "Failed to open feed");
                self.core.reporter.report(FeedEvent::OpenFailed {
                    symbol: symbol.clone(),
                    error: source.clone(),
                });
                return Err(HubError::AdapterUnavailable {
                    symbol: symbol.clone(),
                    source,
                });
            }
        };

        match self.core.install(
            symbol,
            handle,
            listener,
            self.config.poll_interval,
            &self.shutdown,
        ) {
            Ok(id) => Ok(id),
            Err(mut handle) => {
                handle.close().await;
                Err(HubError::ShuttingDown)
            }
        }
    }

    /// Remove a listener; stops the feed if it was the last one.
    ///
    /// Unknown symbols and handles are a no-op.
    pub async fn unsubscribe(&self, symbol: &str, id: ListenerId) -> Unsubscribed {
        let Ok(symbol) = Symbol::parse(symbol) else {
            return Unsubscribed::NotRegistered;
        };

        let gate = self.gate(&symbol);
        let outcome = {
            let _lifecycle = gate.lock().await;

            match self.core.detach(&symbol, id) {
                Detach::NotRegistered => Unsubscribed::NotRegistered,
                Detach::Removed { remaining } => {
                    debug!(symbol = %symbol, listener = %id, remaining, "Listener removed");
                    Unsubscribed::Removed
                }
                Detach::Emptied { feed_id, resource } => {
                    self.core.teardown(&symbol, feed_id, resource).await;
                    Unsubscribed::FeedStopped
                }
            }
        };
        self.release_gate(&symbol, gate);

        outcome
    }

    /// Stop every feed and refuse new subscriptions.
    ///
    /// Every poller is stopped and every handle closed before the adapter's
    /// own `shutdown` runs. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let drained = self.core.registry.lock().drain();
        info!(feeds = drained.len(), "Shutting down subscription hub");

        futures::future::join_all(
            drained
                .into_iter()
                .map(|(symbol, feed_id, feed)| async move {
                    self.core.teardown(&symbol, feed_id, feed).await;
                }),
        )
        .await;

        self.adapter.shutdown().await;
        info!("Subscription hub stopped");
    }

    /// Whether `shutdown` has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Reporter shared with sessions.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn EventReporter> {
        Arc::clone(&self.core.reporter)
    }

    /// Last delivered price for `symbol`.
    #[must_use]
    pub fn last_price(&self, symbol: &str) -> Option<Price> {
        let symbol = Symbol::parse(symbol).ok()?;
        self.core.registry.lock().last_price(&symbol).cloned()
    }

    /// Whether `symbol` has a running feed.
    #[must_use]
    pub fn is_active(&self, symbol: &str) -> bool {
        Symbol::parse(symbol).is_ok_and(|s| self.core.registry.lock().contains(&s))
    }

    /// Number of listeners for `symbol`.
    #[must_use]
    pub fn listener_count(&self, symbol: &str) -> usize {
        Symbol::parse(symbol).map_or(0, |s| self.core.registry.lock().listener_count(&s))
    }

    /// Symbols with a running feed, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.core.registry.lock().active_symbols()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let counters = &self.core.counters;
        HubStats {
            registry: self.core.registry.lock().stats(),
            feeds_opened: counters.feeds_opened.load(Ordering::Relaxed),
            feeds_closed: counters.feeds_closed.load(Ordering::Relaxed),
            updates_delivered: counters.updates_delivered.load(Ordering::Relaxed),
            listener_failures: counters.listener_failures.load(Ordering::Relaxed),
        }
    }

    fn gate(&self, symbol: &Symbol) -> Gate {
        Arc::clone(self.gates.lock().entry(symbol.clone()).or_default())
    }

    /// Drop our gate reference and forget the gate if nobody else holds it.
    fn release_gate(&self, symbol: &Symbol, gate: Gate) {
        let mut gates = self.gates.lock();
        drop(gate);
        if gates.get(symbol).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(symbol);
        }
    }

    #[cfg(test)]
    fn gate_count(&self) -> usize {
        self.gates.lock().len()
    }

    #[cfg(test)]
    fn feed_id(&self, symbol: &Symbol) -> Option<FeedId> {
        self.core.registry.lock().feed_id(symbol)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::application::ports::NoOpEventReporter;
    use crate::infrastructure::feeds::{ScriptedFeedAdapter, ScriptedSample};

    fn hub_with(adapter: &Arc<ScriptedFeedAdapter>) -> SubscriptionHub {
        SubscriptionHub::new(
            Arc::clone(adapter) as Arc<dyn FeedAdapter>,
            Arc::new(NoOpEventReporter),
            HubConfig::default(),
        )
    }

    fn recording() -> (PriceListener, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: PriceListener = Arc::new(move |update: &PriceUpdate| {
            sink.lock().push(update.price.to_string());
            Ok(())
        });
        (listener, seen)
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn gates_are_released_after_operations() {
        let adapter = Arc::new(ScriptedFeedAdapter::new());
        let hub = hub_with(&adapter);
        let (listener, _) = recording();

        let id = hub.subscribe("BTCUSD", listener).await.unwrap();
        assert_eq!(hub.gate_count(), 0);

        hub.unsubscribe("BTCUSD", id).await;
        assert_eq!(hub.gate_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sample_for_old_feed_is_dropped() {
        let adapter = Arc::new(ScriptedFeedAdapter::new());
        let hub = hub_with(&adapter);
        let (listener, seen) = recording();

        let id = hub.subscribe("BTCUSD", Arc::clone(&listener)).await.unwrap();
        let old_feed = hub.feed_id(&sym("BTCUSD")).unwrap();
        hub.unsubscribe("BTCUSD", id).await;

        // Late sample from the stopped feed must not resurrect it
        hub.core
            .on_sample(&sym("BTCUSD"), old_feed, Some(Price::parse("1").unwrap()));
        assert!(!hub.is_active("BTCUSD"));

        hub.subscribe("BTCUSD", listener).await.unwrap();
        hub.core
            .on_sample(&sym("BTCUSD"), old_feed, Some(Price::parse("2").unwrap()));

        assert!(seen.lock().is_empty());
        assert_eq!(hub.last_price("BTCUSD"), None);
        assert_eq!(hub.stats().registry.samples_stale, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn listener_errors_are_counted_and_isolated() {
        let adapter = Arc::new(ScriptedFeedAdapter::new());
        adapter.script("BTCUSD", vec![ScriptedSample::price("100")]);
        let hub = hub_with(&adapter);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let failing: PriceListener = Arc::new(move |_: &PriceUpdate| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(DeliveryError::SinkClosed)
        });
        let (ok, seen) = recording();

        hub.subscribe("BTCUSD", failing).await.unwrap();
        hub.subscribe("BTCUSD", ok).await.unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec!["100"]);
        let stats = hub.stats();
        assert_eq!(stats.listener_failures, 1);
        assert_eq!(stats.updates_delivered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_leaves_no_state() {
        let adapter = Arc::new(ScriptedFeedAdapter::new());
        adapter.fail_open("BTCUSD");
        let hub = hub_with(&adapter);
        let (listener, _) = recording();

        let err = hub.subscribe("btcusd", listener).await.unwrap_err();
        assert!(matches!(err, HubError::AdapterUnavailable { ref symbol, .. } if symbol.as_str() == "BTCUSD"));
        assert!(!hub.is_active("BTCUSD"));
        assert_eq!(hub.stats().feeds_opened, 0);
        assert_eq!(hub.gate_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_symbol_is_rejected() {
        let adapter = Arc::new(ScriptedFeedAdapter::new());
        let hub = hub_with(&adapter);
        let (listener, _) = recording();

        let err = hub.subscribe("  ", listener).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidSymbol(SymbolError::Empty)));
        assert_eq!(adapter.total_opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_rejects_new_subscriptions() {
        let adapter = Arc::new(ScriptedFeedAdapter::new());
        let hub = hub_with(&adapter);
        let (listener, _) = recording();

        hub.subscribe("BTCUSD", Arc::clone(&listener)).await.unwrap();
        hub.shutdown().await;

        assert!(hub.is_shutting_down());
        assert!(hub.active_symbols().is_empty());
        assert_eq!(adapter.open_handles(), 0);
        assert!(adapter.was_shut_down());
        assert!(matches!(
            hub.subscribe("ETHUSD", listener).await,
            Err(HubError::ShuttingDown)
        ));
    }
}
