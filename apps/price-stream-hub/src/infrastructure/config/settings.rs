//! Hub Configuration Settings
//!
//! Configuration types for the price stream hub, loaded from environment
//! variables.

use std::time::Duration;

use crate::application::services::{HubConfig, POLL_INTERVAL};
use crate::infrastructure::feeds::HttpTickerConfig;
use crate::infrastructure::feeds::http::{DEFAULT_TICKER_URL, SYMBOL_PLACEHOLDER};

/// Upstream price source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedSource {
    /// Exchange ticker API over HTTP.
    #[default]
    Http,
    /// Local random walk.
    Simulated,
}

impl FeedSource {
    /// Parse source from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "simulated" | "sim" => Some(Self::Simulated),
            _ => None,
        }
    }

    /// Get the source name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Simulated => "simulated",
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Streaming HTTP port.
    pub stream_port: u16,
    /// Health check and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stream_port: 8080,
            health_port: 8082,
        }
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSettings {
    /// Which adapter to use.
    pub source: FeedSource,
    /// Poller cadence.
    pub poll_interval: Duration,
    /// Ticker URL template.
    pub ticker_url: String,
    /// JSON pointers to the price in the ticker response, tried in order.
    pub price_pointers: Vec<String>,
    /// Appended to symbols in ticker URLs.
    pub symbol_suffix: String,
    /// Per-request timeout.
    pub http_timeout: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            source: FeedSource::default(),
            poll_interval: POLL_INTERVAL,
            ticker_url: DEFAULT_TICKER_URL.to_string(),
            price_pointers: vec!["/price".to_string()],
            symbol_suffix: String::new(),
            http_timeout: Duration::from_secs(5),
        }
    }
}

impl FeedSettings {
    /// Settings for the HTTP ticker adapter.
    #[must_use]
    pub fn http_config(&self) -> HttpTickerConfig {
        HttpTickerConfig {
            url_template: self.ticker_url.clone(),
            price_pointers: self.price_pointers.clone(),
            symbol_suffix: self.symbol_suffix.clone(),
            timeout: self.http_timeout,
        }
    }

    /// Settings for the subscription hub.
    #[must_use]
    pub const fn hub_config(&self) -> HubConfig {
        HubConfig {
            poll_interval: self.poll_interval,
        }
    }
}

/// Streaming boundary settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Allowed CORS origin.
    pub cors_origin: String,
    /// Per-client outbound queue size.
    pub session_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            cors_origin: "http://localhost:3000".to_string(),
            session_buffer: 256,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSettings {
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Streaming boundary settings.
    pub stream: StreamSettings,
}

impl HubSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unusable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            stream_port: env.parse("PORT", defaults.server.stream_port)?,
            health_port: env.parse("PRICE_HUB_HEALTH_PORT", defaults.server.health_port)?,
        };

        let source = match env.get("PRICE_HUB_FEED_SOURCE") {
            Some(raw) => FeedSource::from_str_case_insensitive(&raw).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "PRICE_HUB_FEED_SOURCE".to_string(),
                    reason: format!("{raw:?} is not one of http, simulated"),
                }
            })?,
            None => defaults.feed.source,
        };

        let poll_interval = env.millis("PRICE_HUB_POLL_INTERVAL_MS", defaults.feed.poll_interval)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_HUB_POLL_INTERVAL_MS".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let ticker_url = env.get("PRICE_HUB_TICKER_URL").unwrap_or(defaults.feed.ticker_url);
        if !ticker_url.contains(SYMBOL_PLACEHOLDER) {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_HUB_TICKER_URL".to_string(),
                reason: format!("must contain {SYMBOL_PLACEHOLDER}"),
            });
        }

        let price_pointers = match env.get("PRICE_HUB_PRICE_POINTER") {
            Some(raw) => parse_pointers(&raw)?,
            None => defaults.feed.price_pointers,
        };

        let feed = FeedSettings {
            source,
            poll_interval,
            ticker_url,
            price_pointers,
            symbol_suffix: env
                .get("PRICE_HUB_SYMBOL_SUFFIX")
                .unwrap_or(defaults.feed.symbol_suffix),
            http_timeout: env.millis("PRICE_HUB_HTTP_TIMEOUT_MS", defaults.feed.http_timeout)?,
        };

        let session_buffer = env.parse("PRICE_HUB_SESSION_BUFFER", defaults.stream.session_buffer)?;
        if session_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PRICE_HUB_SESSION_BUFFER".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let cors_origin = env
            .get("PRICE_HUB_CORS_ORIGIN")
            .unwrap_or(defaults.stream.cors_origin);

        Ok(Self {
            server,
            feed,
            stream: StreamSettings {
                cors_origin,
                session_buffer,
            },
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Typed access to a key lookup; unset and blank values read as absent.
struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key).map_or(Ok(default), |raw| {
            raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("{raw:?}: {e}"),
            })
        })
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.get(key).map_or(Ok(default), |_| {
            self.parse::<u64>(key, 0).map(Duration::from_millis)
        })
    }
}

/// Split a comma-separated list of JSON pointers.
fn parse_pointers(raw: &str) -> Result<Vec<String>, ConfigError> {
    let pointers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if pointers.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "PRICE_HUB_PRICE_POINTER".to_string(),
            reason: "no JSON pointer given".to_string(),
        });
    }
    if let Some(bad) = pointers.iter().find(|p| !p.starts_with('/')) {
        return Err(ConfigError::InvalidValue {
            key: "PRICE_HUB_PRICE_POINTER".to_string(),
            reason: format!("{bad:?}: JSON pointer must start with '/'"),
        });
    }

    Ok(pointers)
}
