//! Configuration Module
//!
//! Environment-driven configuration for the hub service.

mod settings;

pub use settings::{
    ConfigError, FeedSettings, FeedSource, HubSettings, ServerSettings, StreamSettings,
};
