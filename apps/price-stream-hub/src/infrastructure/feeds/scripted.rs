//! Scripted feed adapter for testing.
//!
//! Plays back per-symbol scripts of samples and records every open and
//! close so tests can assert exactly-once resource handling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{FeedAdapter, FeedError, FeedHandle};
use crate::domain::streaming::{Price, Symbol};

/// One scripted poll result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedSample {
    /// A price.
    Price(Price),
    /// No data this tick.
    Empty,
    /// A failed sample.
    Fail(FeedError),
}

impl ScriptedSample {
    /// Price step from text.
    ///
    /// # Panics
    ///
    /// Panics if `raw` is not a valid price.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn price(raw: &str) -> Self {
        Self::Price(Price::parse(raw).expect("scripted price must be valid"))
    }

    fn into_result(self) -> Result<Option<Price>, FeedError> {
        match self {
            Self::Price(price) => Ok(Some(price)),
            Self::Empty => Ok(None),
            Self::Fail(error) => Err(error),
        }
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<Symbol, VecDeque<ScriptedSample>>,
    fail_open: HashSet<Symbol>,
    opens: HashMap<Symbol, usize>,
    closes: HashMap<Symbol, usize>,
    open_handles: usize,
    sample_delay: Duration,
}

/// Deterministic feed adapter driven by scripts.
///
/// Each symbol has one shared queue of steps. Handles take steps from the
/// front; the last step repeats until more are pushed. Symbols without a
/// script yield no data.
#[derive(Debug, Default)]
pub struct ScriptedFeedAdapter {
    state: Arc<Mutex<ScriptState>>,
    next_handle: AtomicU64,
    shut_down: AtomicBool,
}

impl ScriptedFeedAdapter {
    /// Create an adapter with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the script for `symbol`.
    ///
    /// # Panics
    ///
    /// Panics if `symbol` is invalid.
    #[allow(clippy::expect_used)]
    pub fn script(&self, symbol: &str, steps: Vec<ScriptedSample>) {
        let symbol = Symbol::parse(symbol).expect("scripted symbol must be valid");
        self.state.lock().scripts.insert(symbol, steps.into());
    }

    /// Append one step to the script for `symbol`.
    ///
    /// # Panics
    ///
    /// Panics if `symbol` is invalid.
    #[allow(clippy::expect_used)]
    pub fn push(&self, symbol: &str, step: ScriptedSample) {
        let symbol = Symbol::parse(symbol).expect("scripted symbol must be valid");
        self.state
            .lock()
            .scripts
            .entry(symbol)
            .or_default()
            .push_back(step);
    }

    /// Make `open` fail for `symbol`.
    ///
    /// # Panics
    ///
    /// Panics if `symbol` is invalid.
    #[allow(clippy::expect_used)]
    pub fn fail_open(&self, symbol: &str) {
        let symbol = Symbol::parse(symbol).expect("scripted symbol must be valid");
        self.state.lock().fail_open.insert(symbol);
    }

    /// Let `open` succeed again for `symbol`.
    pub fn allow_open(&self, symbol: &str) {
        if let Ok(symbol) = Symbol::parse(symbol) {
            self.state.lock().fail_open.remove(&symbol);
        }
    }

    /// Delay every sample by `delay`.
    pub fn set_sample_delay(&self, delay: Duration) {
        self.state.lock().sample_delay = delay;
    }

    /// Successful opens for `symbol`.
    #[must_use]
    pub fn opens(&self, symbol: &str) -> usize {
        self.count(symbol, |s| &s.opens)
    }

    /// Closes for `symbol`.
    #[must_use]
    pub fn closes(&self, symbol: &str) -> usize {
        self.count(symbol, |s| &s.closes)
    }

    /// Successful opens across all symbols.
    #[must_use]
    pub fn total_opens(&self) -> usize {
        self.state.lock().opens.values().sum()
    }

    /// Handles opened and not yet closed.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Whether `shutdown` was called.
    #[must_use]
    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn count(&self, symbol: &str, map: impl Fn(&ScriptState) -> &HashMap<Symbol, usize>) -> usize {
        let Ok(symbol) = Symbol::parse(symbol) else {
            return 0;
        };
        let state = self.state.lock();
        map(&state).get(&symbol).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedAdapter for ScriptedFeedAdapter {
    async fn open(&self, symbol: &Symbol) -> Result<Box<dyn FeedHandle>, FeedError> {
        let mut state = self.state.lock();
        if state.fail_open.contains(symbol) {
            return Err(FeedError::Unavailable {
                message: format!("scripted open failure for {symbol}"),
            });
        }

        *state.opens.entry(symbol.clone()).or_default() += 1;
        state.open_handles += 1;

        Ok(Box::new(ScriptedHandle {
            id: self.next_handle.fetch_add(1, Ordering::Relaxed),
            symbol: symbol.clone(),
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ScriptedHandle {
    id: u64,
    symbol: Symbol,
    state: Arc<Mutex<ScriptState>>,
    closed: bool,
}

impl ScriptedHandle {
    fn next_step(&self) -> (Duration, Option<ScriptedSample>) {
        let mut state = self.state.lock();
        let delay = state.sample_delay;
        let step = state.scripts.get_mut(&self.symbol).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        (delay, step)
    }
}

#[async_trait]
impl FeedHandle for ScriptedHandle {
    async fn sample(&mut self) -> Result<Option<Price>, FeedError> {
        let (delay, step) = self.next_step();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        step.map_or(Ok(None), ScriptedSample::into_result)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut state = self.state.lock();
        *state.closes.entry(self.symbol.clone()).or_default() += 1;
        state.open_handles = state.open_handles.saturating_sub(1);
        tracing::trace!(symbol = %self.symbol, handle = self.id, "Scripted handle closed");
    }
}
