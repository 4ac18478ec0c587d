//! HTTP ticker feed adapter.
//!
//! Polls a public exchange ticker endpoint (Binance by default) and reads
//! the price from the JSON response with a list of JSON pointers, tried in
//! order until one yields a valid price.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::application::ports::{FeedAdapter, FeedError, FeedHandle};
use crate::domain::streaming::{Price, Symbol};
use crate::infrastructure::metrics::{self, RequestOutcome};

/// Placeholder replaced by the symbol in the URL template.
pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

/// Default ticker endpoint.
pub const DEFAULT_TICKER_URL: &str = "https://api.binance.com/api/v3/ticker/price?symbol={symbol}";

/// HTTP ticker adapter configuration.
#[derive(Debug, Clone)]
pub struct HttpTickerConfig {
    /// URL with a `{symbol}` placeholder.
    pub url_template: String,
    /// JSON pointers to the price field, most specific first.
    pub price_pointers: Vec<String>,
    /// Appended to the symbol before substitution (e.g. `T` for `BTCUSDT`).
    pub symbol_suffix: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for HttpTickerConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_TICKER_URL.to_string(),
            price_pointers: vec!["/price".to_string()],
            symbol_suffix: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Exchange ticker adapter over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTickerAdapter {
    client: reqwest::Client,
    config: HttpTickerConfig,
}

impl HttpTickerAdapter {
    /// Create a new adapter.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Unavailable` if the HTTP client cannot be built.
    pub fn new(config: HttpTickerConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FeedError::Unavailable {
                message: e.to_string(),
            })?;

        Ok(Self { client, config })
    }

    /// Ticker URL for `symbol`, with the symbol key percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Unavailable` for a key made only of dots, which
    /// would resolve as a relative path segment.
    pub fn url_for(&self, symbol: &Symbol) -> Result<String, FeedError> {
        let key = format!("{symbol}{}", self.config.symbol_suffix);
        if key.chars().all(|c| c == '.') {
            return Err(FeedError::Unavailable {
                message: format!("{key} is not a usable ticker key"),
            });
        }

        Ok(self
            .config
            .url_template
            .replace(SYMBOL_PLACEHOLDER, &urlencoding::encode(&key)))
    }
}

#[async_trait]
impl FeedAdapter for HttpTickerAdapter {
    async fn open(&self, symbol: &Symbol) -> Result<Box<dyn FeedHandle>, FeedError> {
        let url = self.url_for(symbol)?;

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Unavailable {
                message: format!("{url} returned {status}"),
            });
        }

        debug!(symbol = %symbol, url = %url, "Ticker feed opened");

        Ok(Box::new(HttpTickerHandle {
            client: self.client.clone(),
            symbol: symbol.clone(),
            url,
            pointers: self.config.price_pointers.clone(),
        }))
    }
}

#[derive(Debug)]
struct HttpTickerHandle {
    client: reqwest::Client,
    symbol: Symbol,
    url: String,
    pointers: Vec<String>,
}

impl HttpTickerHandle {
    async fn fetch(&self) -> Result<Value, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| FeedError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
            });
        }

        response.json().await.map_err(|e| FeedError::Malformed {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl FeedHandle for HttpTickerHandle {
    async fn sample(&mut self) -> Result<Option<Price>, FeedError> {
        let started = Instant::now();
        let result = self.fetch().await;

        let outcome = match &result {
            Ok(_) => RequestOutcome::Ok,
            Err(e) => RequestOutcome::Error(e.kind()),
        };
        metrics::record_feed_request(outcome, started.elapsed());

        let body = result?;
        Ok(self
            .pointers
            .iter()
            .find_map(|pointer| extract_price(&body, pointer, &self.symbol)))
    }

    async fn close(&mut self) {
        debug!(symbol = %self.symbol, "Ticker feed closed");
    }
}

/// Read the price at `pointer`; absent or ill-formatted values are `None`.
fn extract_price(body: &Value, pointer: &str, symbol: &Symbol) -> Option<Price> {
    let raw = match body.pointer(pointer)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    match Price::parse(&raw) {
        Ok(price) => Some(price),
        Err(e) => {
            debug!(symbol = %symbol, raw = %raw, error = %e, "Ignoring unparseable price");
            None
        }
    }
}
