//! Application Ports (Driven)
//!
//! Ports define the interfaces the hub uses to reach the outside world.
//!
//! - `FeedAdapter` / `FeedHandle`: open and sample an upstream price source
//! - `PriceSink`: deliver updates to one connected client
//! - `EventReporter`: report recoverable failures to observability

mod event_reporter_port;
mod feed_adapter_port;
mod price_sink_port;

pub use event_reporter_port::{EventReporter, FeedEvent, NoOpEventReporter};
pub use feed_adapter_port::{FeedAdapter, FeedError, FeedHandle};
pub use price_sink_port::{DeliveryError, PriceSink};
