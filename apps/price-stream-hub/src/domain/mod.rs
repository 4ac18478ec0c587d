//! Domain Layer - Core price types and subscription bookkeeping.
//!
//! This layer contains the canonical price-stream types and the
//! per-symbol subscription registry. Nothing here performs I/O or spawns
//! tasks; the application layer drives it.

/// Price streaming types (symbols, prices, updates).
pub mod streaming;

/// Per-symbol subscription registry.
pub mod subscription;
