//! Subscription Registry
//!
//! Domain bookkeeping for per-symbol subscriptions: which listeners are
//! attached to which symbol, the last price delivered for each symbol, and
//! the resources that keep a symbol's feed alive.
//!
//! # Design
//!
//! The registry is the single authority mapping `Symbol -> FeedState`.
//! A `FeedState` exists exactly while its listener set is non-empty:
//!
//! - `install` is the 0→1 transition and is the only way to create one
//! - `detach` reports `Detach::Emptied` on the 1→0 transition and hands the
//!   feed's resource back to the caller for teardown
//! - `accept_sample` drops samples for symbols (or feed generations) that
//!   no longer exist, so a late sample never resurrects a feed
//!
//! Listeners live in a small per-feed arena keyed by `ListenerId`, the
//! stable handle returned to subscribers. The registry is not thread-safe
//! on its own; the hub serializes access to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::streaming::{Price, Symbol};

// =============================================================================
// Identifiers
// =============================================================================

/// Stable handle for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Identity of one feed generation for a symbol.
///
/// A symbol that is torn down and subscribed again gets a new `FeedId`, so
/// samples produced by the old poller can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeedId(u64);

impl FeedId {
    /// Raw numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Listener identity used for idempotent registration.
pub trait SameListener {
    /// Whether `self` and `other` are the same registered listener.
    fn same_listener(&self, other: &Self) -> bool;
}

impl<T: ?Sized> SameListener for Arc<T> {
    fn same_listener(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of attaching a listener to an existing feed.
#[derive(Debug)]
pub enum Attach<'a, L, R> {
    /// No feed exists for the symbol; the listener is handed back.
    NoFeed(L),
    /// The listener was added.
    Added {
        /// Handle for the new listener.
        id: ListenerId,
        /// Last delivered price, for join replay.
        replay: Option<Price>,
        /// The feed's resource.
        resource: &'a R,
    },
    /// The same listener was already registered for this symbol.
    AlreadyPresent {
        /// Existing handle.
        id: ListenerId,
    },
}

/// Result of detaching a listener.
#[derive(Debug)]
pub enum Detach<R> {
    /// The listener (or symbol) was not registered.
    NotRegistered,
    /// The listener was removed; other listeners remain.
    Removed {
        /// Listeners still attached.
        remaining: usize,
    },
    /// The last listener was removed and the feed state destroyed.
    Emptied {
        /// Generation of the destroyed feed.
        feed_id: FeedId,
        /// Resource to tear down.
        resource: R,
    },
}

/// Result of offering a sample to the registry.
#[derive(Debug)]
pub enum SampleOutcome<'a, L, R> {
    /// No feed for the symbol, or the sample belongs to an older feed.
    Stale,
    /// The adapter produced no data this tick.
    Empty,
    /// Same as the last delivered price.
    Duplicate,
    /// A new price; deliver it to `listeners`.
    Changed {
        /// The accepted price.
        price: Price,
        /// Snapshot of the current listeners.
        listeners: Vec<L>,
        /// The feed's resource.
        resource: &'a R,
    },
}

// =============================================================================
// Feed State
// =============================================================================

/// Per-symbol record; exists only while it has listeners.
#[derive(Debug)]
struct FeedState<L, R> {
    id: FeedId,
    listeners: Vec<(ListenerId, L)>,
    last_price: Option<Price>,
    resource: R,
}

// =============================================================================
// Registry
// =============================================================================

/// Owned registry of per-symbol feed state.
///
/// `L` is the listener type, `R` the resource keeping the feed alive (the
/// hub stores its poller there).
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use price_stream_hub::domain::streaming::{Price, Symbol};
/// use price_stream_hub::domain::subscription::{Detach, SubscriptionRegistry};
///
/// let mut registry: SubscriptionRegistry<Arc<str>, &str> = SubscriptionRegistry::new();
/// let btc = Symbol::parse("btcusd").unwrap();
///
/// let feed = registry.reserve_feed_id();
/// let first = registry.install(btc.clone(), feed, "poller", Arc::from("cb1"));
/// assert!(registry.contains(&btc));
///
/// // The last listener leaving destroys the feed and returns its resource.
/// match registry.detach(&btc, first) {
///     Detach::Emptied { resource, .. } => assert_eq!(resource, "poller"),
///     other => panic!("unexpected {other:?}"),
/// }
/// assert!(!registry.contains(&btc));
/// ```
#[derive(Debug)]
pub struct SubscriptionRegistry<L, R> {
    feeds: HashMap<Symbol, FeedState<L, R>>,
    next_listener: u64,
    next_feed: u64,
    counters: RegistryCounters,
}

impl<L, R> Default for SubscriptionRegistry<L, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L, R> SubscriptionRegistry<L, R> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            feeds: HashMap::new(),
            next_listener: 0,
            next_feed: 0,
            counters: RegistryCounters::default(),
        }
    }

    /// Allocate the identity for a feed about to be installed.
    pub const fn reserve_feed_id(&mut self) -> FeedId {
        self.next_feed += 1;
        FeedId(self.next_feed)
    }

    /// Create the feed state for `symbol` with its first listener.
    ///
    /// If a feed already exists (callers are expected to have checked with
    /// `attach`), the old state and resource are replaced and dropped.
    pub fn install(&mut self, symbol: Symbol, feed_id: FeedId, resource: R, listener: L) -> ListenerId {
        let id = self.allocate_listener();
        let state = FeedState {
            id: feed_id,
            listeners: vec![(id, listener)],
            last_price: None,
            resource,
        };

        self.feeds.insert(symbol, state);
        id
    }

    /// Remove a listener; destroys the feed state when it was the last one.
    pub fn detach(&mut self, symbol: &Symbol, id: ListenerId) -> Detach<R> {
        let Some(state) = self.feeds.get_mut(symbol) else {
            return Detach::NotRegistered;
        };

        let Some(position) = state.listeners.iter().position(|(lid, _)| *lid == id) else {
            return Detach::NotRegistered;
        };

        state.listeners.swap_remove(position);

        if !state.listeners.is_empty() {
            return Detach::Removed {
                remaining: state.listeners.len(),
            };
        }

        // Last listener gone - the feed state goes with it, price included
        match self.feeds.remove(symbol) {
            Some(state) => Detach::Emptied {
                feed_id: state.id,
                resource: state.resource,
            },
            None => Detach::NotRegistered,
        }
    }

    /// Offer a raw sample from feed `feed_id` of `symbol`.
    pub fn accept_sample(
        &mut self,
        symbol: &Symbol,
        feed_id: FeedId,
        sample: Option<Price>,
    ) -> SampleOutcome<'_, L, R>
    where
        L: Clone,
    {
        let Some(state) = self.feeds.get_mut(symbol).filter(|s| s.id == feed_id) else {
            self.counters.stale += 1;
            return SampleOutcome::Stale;
        };

        let Some(price) = sample else {
            self.counters.empty += 1;
            return SampleOutcome::Empty;
        };

        if state.last_price.as_ref() == Some(&price) {
            self.counters.duplicates += 1;
            return SampleOutcome::Duplicate;
        }

        self.counters.accepted += 1;
        state.last_price = Some(price.clone());

        SampleOutcome::Changed {
            price,
            listeners: state.listeners.iter().map(|(_, l)| l.clone()).collect(),
            resource: &state.resource,
        }
    }

    /// Remove every feed state, returning the resources for teardown.
    pub fn drain(&mut self) -> Vec<(Symbol, FeedId, R)> {
        self.feeds
            .drain()
            .map(|(symbol, state)| (symbol, state.id, state.resource))
            .collect()
    }

    /// Whether a feed state exists for `symbol`.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.feeds.contains_key(symbol)
    }

    /// Last delivered price for `symbol`.
    #[must_use]
    pub fn last_price(&self, symbol: &Symbol) -> Option<&Price> {
        self.feeds.get(symbol).and_then(|s| s.last_price.as_ref())
    }

    /// Current feed generation for `symbol`.
    #[must_use]
    pub fn feed_id(&self, symbol: &Symbol) -> Option<FeedId> {
        self.feeds.get(symbol).map(|s| s.id)
    }

    /// Number of listeners attached to `symbol`.
    #[must_use]
    pub fn listener_count(&self, symbol: &Symbol) -> usize {
        self.feeds.get(symbol).map_or(0, |s| s.listeners.len())
    }

    /// Symbols with an active feed, sorted.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.feeds.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Snapshot of registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_feeds: self.feeds.len(),
            listeners: self.feeds.values().map(|s| s.listeners.len()).sum(),
            samples_accepted: self.counters.accepted,
            samples_duplicate: self.counters.duplicates,
            samples_empty: self.counters.empty,
            samples_stale: self.counters.stale,
        }
    }

    const fn allocate_listener(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }
}

impl<L: SameListener, R> SubscriptionRegistry<L, R> {
    /// Attach a listener to an existing feed.
    ///
    /// Returns `Attach::NoFeed` with the listener when the symbol has no
    /// feed; the caller must open one and `install` it.
    pub fn attach(&mut self, symbol: &Symbol, listener: L) -> Attach<'_, L, R> {
        let Some(state) = self.feeds.get_mut(symbol) else {
            return Attach::NoFeed(listener);
        };

        if let Some((id, _)) = state
            .listeners
            .iter()
            .find(|(_, existing)| existing.same_listener(&listener))
        {
            return Attach::AlreadyPresent { id: *id };
        }

        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        state.listeners.push((id, listener));

        Attach::Added {
            id,
            replay: state.last_price.clone(),
            resource: &state.resource,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct RegistryCounters {
    accepted: u64,
    duplicates: u64,
    empty: u64,
    stale: u64,
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Symbols with a live feed.
    pub active_feeds: usize,
    /// Listeners across all symbols.
    pub listeners: usize,
    /// Samples that changed a price.
    pub samples_accepted: u64,
    /// Samples suppressed as duplicates.
    pub samples_duplicate: u64,
    /// Ticks without data.
    pub samples_empty: u64,
    /// Samples dropped because their feed was gone.
    pub samples_stale: u64,
}

// =============================================================================
// Tests
// =============================================================================
