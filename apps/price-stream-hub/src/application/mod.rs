//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the subscription hub, the per-symbol pollers and
//! client sessions, plus the port interfaces they use to reach feed
//! sources, client sinks and observability.

/// Port interfaces for external systems (feed sources, sinks, reporting).
pub mod ports;

/// Application services: hub, poller and client session.
pub mod services;
