//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionHub`: one feed per symbol, dedup and fan-out
//! - `Poller`: fixed-cadence sampling of one feed handle
//! - `ClientSession`: per-connection subscriptions bound to a sink

mod hub;
mod poller;
mod session;

pub use hub::{
    HubConfig, HubError, HubStats, PriceListener, SubscriptionHub, Unsubscribed,
};
pub use poller::{POLL_INTERVAL, Poller, SampleConsumer};
pub use session::ClientSession;
