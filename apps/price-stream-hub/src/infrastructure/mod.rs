//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration loaded from the environment.
pub mod config;

/// Upstream price feed adapters (HTTP ticker, simulated, scripted).
pub mod feeds;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Event reporting through tracing and metrics.
pub mod observability;

/// NDJSON streaming server for remote clients.
pub mod stream;

/// OpenTelemetry tracing integration.
pub mod telemetry;
