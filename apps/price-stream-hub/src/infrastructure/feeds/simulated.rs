//! Simulated feed adapter.
//!
//! Random-walk prices for local development without network access.
//! Every handle walks independently from the configured start price.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::debug;

use crate::application::ports::{FeedAdapter, FeedError, FeedHandle};
use crate::domain::streaming::{Price, Symbol};

/// Simulated random-walk adapter.
#[derive(Debug, Clone)]
pub struct SimulatedFeedAdapter {
    start_price: Decimal,
    max_step_bps: u32,
    repeat_probability: f64,
}

impl Default for SimulatedFeedAdapter {
    fn default() -> Self {
        Self {
            start_price: Decimal::new(100, 0),
            max_step_bps: 25,
            repeat_probability: 0.3,
        }
    }
}

impl SimulatedFeedAdapter {
    /// Create an adapter starting every walk at `start_price`.
    #[must_use]
    pub fn new(start_price: Decimal) -> Self {
        Self {
            start_price,
            ..Self::default()
        }
    }

    /// Chance that a tick repeats the previous price.
    #[must_use]
    pub fn with_repeat_probability(mut self, probability: f64) -> Self {
        self.repeat_probability = probability.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl FeedAdapter for SimulatedFeedAdapter {
    async fn open(&self, symbol: &Symbol) -> Result<Box<dyn FeedHandle>, FeedError> {
        debug!(symbol = %symbol, start = %self.start_price, "Opening simulated feed");
        Ok(Box::new(RandomWalk {
            current: self.start_price,
            max_step_bps: self.max_step_bps,
            repeat_probability: self.repeat_probability,
        }))
    }
}

#[derive(Debug)]
struct RandomWalk {
    current: Decimal,
    max_step_bps: u32,
    repeat_probability: f64,
}

impl RandomWalk {
    fn step(&mut self) -> Decimal {
        let mut rng = rand::rng();
        if rng.random_bool(self.repeat_probability) {
            return self.current;
        }

        let bound = i64::from(self.max_step_bps);
        let bps = rng.random_range(-bound..=bound);
        let delta = self.current * Decimal::new(bps, 4);
        let next = (self.current + delta).round_dp(2);

        // Keep the walk strictly positive
        if next > Decimal::ZERO {
            self.current = next;
        }
        self.current
    }
}

#[async_trait]
impl FeedHandle for RandomWalk {
    async fn sample(&mut self) -> Result<Option<Price>, FeedError> {
        let value = self.step();
        Ok(Some(Price::from_decimal(value.round_dp(2))))
    }

    async fn close(&mut self) {}
}
