#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Stream Hub - Subscription Multiplexer
//!
//! Keeps at most one upstream price feed per symbol regardless of how many
//! clients subscribe, polls it on a fixed cadence, drops repeated prices
//! and fans every genuine change out to the symbol's listeners. Remote
//! clients subscribe over a streaming HTTP request and receive
//! newline-delimited JSON.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and bookkeeping
//!   - `streaming`: Symbols, prices and price updates
//!   - `subscription`: Per-symbol listener registry and deduplication
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed adapter, price sink and event reporter interfaces
//!   - `services`: Subscription hub, poller and client sessions
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feeds`: HTTP ticker, simulated and scripted feed adapters
//!   - `stream`: NDJSON streaming server
//!   - `config`: Configuration from the environment
//!   - `health`: Health check and metrics endpoint
//!   - `observability`: Event reporting through logs and metrics
//!
//! # Data Flow
//!
//! ```text
//!                ┌──────────┐   sample    ┌──────────────┐   change   ┌─────────┐
//! Ticker API ◄───│  Poller  │────────────►│  Registry    │───────────►│ Session │──► Client 1
//!  (1 / symbol)  │ (500ms)  │             │ (dedup, fan) │─────┐      └─────────┘
//!                └──────────┘             └──────────────┘     │      ┌─────────┐
//!                                                              └─────►│ Session │──► Client N
//!                                                                     └─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{Price, PriceError, PriceUpdate, Symbol, SymbolError};
pub use domain::subscription::{FeedId, ListenerId, RegistryStats, SubscriptionRegistry};

// Ports
pub use application::ports::{
    DeliveryError, EventReporter, FeedAdapter, FeedError, FeedEvent, FeedHandle,
    NoOpEventReporter, PriceSink,
};

// Services
pub use application::services::{
    ClientSession, HubConfig, HubError, HubStats, POLL_INTERVAL, PriceListener, SubscriptionHub,
    Unsubscribed,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedSettings, FeedSource, HubSettings, ServerSettings, StreamSettings,
};

// Feed adapters
pub use infrastructure::feeds::{
    HttpTickerAdapter, HttpTickerConfig, ScriptedFeedAdapter, ScriptedSample,
    SimulatedFeedAdapter,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::stream::{ChannelSink, StreamServer, StreamServerError, StreamState};

// Observability
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::observability::TracingReporter;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
