//! Feed Adapters
//!
//! Implementations of `FeedAdapter` for the supported price sources.

pub mod http;
pub mod scripted;
pub mod simulated;

pub use http::{HttpTickerAdapter, HttpTickerConfig};
pub use scripted::{ScriptedFeedAdapter, ScriptedSample};
pub use simulated::SimulatedFeedAdapter;
