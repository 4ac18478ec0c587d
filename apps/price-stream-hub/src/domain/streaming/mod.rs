//! Price Streaming Types
//!
//! Core domain types for price streaming: symbols, prices and the update
//! record delivered to subscribers. These types are transport-agnostic and
//! represent the canonical internal representation of a price feed.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum accepted symbol length.
const MAX_SYMBOL_LEN: usize = 32;

/// Accepted price text once separators are stripped.
static PRICE_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^\d+(\.\d+)?$").expect("static price pattern is valid")
});

// =============================================================================
// Symbol
// =============================================================================

/// A canonical instrument symbol (e.g. `BTCUSD`).
///
/// Symbols are trimmed and uppercased on construction, so `"btcusd"` and
/// `" BTCUSD "` name the same feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a raw symbol.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the symbol is empty, too long, or contains
    /// characters other than ASCII alphanumerics and `._:/-`.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }

        if normalized.len() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong {
                len: normalized.len(),
            });
        }

        if let Some(c) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-')))
        {
            return Err(SymbolError::InvalidCharacter(c));
        }

        Ok(Self(normalized))
    }

    /// Get the symbol string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Symbol parsing error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Symbol is empty after trimming.
    #[error("symbol cannot be empty")]
    Empty,
    /// Symbol exceeds the maximum length.
    #[error("symbol is {len} characters, maximum is 32")]
    TooLong {
        /// Length of the rejected symbol.
        len: usize,
    },
    /// Symbol contains a character outside the accepted set.
    #[error("symbol contains invalid character {0:?}")]
    InvalidCharacter(char),
}

// =============================================================================
// Price
// =============================================================================

/// An opaque price value as reported by a feed.
///
/// The hub only ever compares prices for equality, so the normalized text
/// is the value. Thousands separators are stripped; nothing else is
/// rewritten (`"100"` and `"100.0"` are different prices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Price(String);

impl Price {
    /// Parse a raw price sample.
    ///
    /// # Errors
    ///
    /// Returns `PriceError` if the text is empty or is not an unsigned
    /// decimal number.
    pub fn parse(raw: &str) -> Result<Self, PriceError> {
        let normalized: String = raw.trim().chars().filter(|c| *c != ',').collect();

        if normalized.is_empty() {
            return Err(PriceError::Empty);
        }

        if !PRICE_FORMAT.is_match(&normalized) {
            return Err(PriceError::InvalidFormat(normalized));
        }

        Ok(Self(normalized))
    }

    /// Build a price from a decimal value.
    #[must_use]
    pub fn from_decimal(value: Decimal) -> Self {
        Self(value.to_string())
    }

    /// Get the price text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric view of the price.
    #[must_use]
    pub fn as_decimal(&self) -> Option<Decimal> {
        Decimal::from_str(&self.0).ok()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Price {
    type Err = PriceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Price {
    type Error = PriceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Price> for String {
    fn from(price: Price) -> Self {
        price.0
    }
}

/// Price parsing error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    /// No price text.
    #[error("price cannot be empty")]
    Empty,
    /// Text is not an unsigned decimal.
    #[error("invalid price format: {0:?}")]
    InvalidFormat(String),
}

// =============================================================================
// Price Update
// =============================================================================

/// A genuine price change for one symbol.
///
/// Serialized as `{"symbol": "...", "price": "...", "timestamp": <ms>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// Symbol the price belongs to.
    pub symbol: Symbol,
    /// The new price.
    pub price: Price,
    /// When the hub accepted the sample.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdate {
    /// Create an update stamped with the current time.
    #[must_use]
    pub fn now(symbol: Symbol, price: Price) -> Self {
        Self {
            symbol,
            price,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("btcusd", "BTCUSD" ; "lowercase")]
    #[test_case("  EthUsd ", "ETHUSD" ; "padded mixed case")]
    #[test_case("BINANCE:BTCUSDT", "BINANCE:BTCUSDT" ; "exchange prefix")]
    #[test_case("brk.b", "BRK.B" ; "class share")]
    fn symbol_normalizes(raw: &str, expected: &str) {
        assert_eq!(Symbol::parse(raw).unwrap().as_str(), expected);
    }

    #[test]
    fn symbol_rejects_empty() {
        assert_eq!(Symbol::parse("   "), Err(SymbolError::Empty));
    }

    #[test]
    fn symbol_rejects_invalid_characters() {
        assert_eq!(
            Symbol::parse("BTC USD"),
            Err(SymbolError::InvalidCharacter(' '))
        );
        assert!(matches!(
            Symbol::parse("BTC\"USD"),
            Err(SymbolError::InvalidCharacter('"'))
        ));
    }

    #[test]
    fn symbol_rejects_overlong() {
        let raw = "A".repeat(33);
        assert_eq!(Symbol::parse(&raw), Err(SymbolError::TooLong { len: 33 }));
    }

    #[test]
    fn symbol_deserializes_normalized() {
        let symbol: Symbol = serde_json::from_str("\"btcusd\"").unwrap();
        assert_eq!(symbol.as_str(), "BTCUSD");
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }

    #[test_case("42000.00", "42000.00" ; "plain decimal")]
    #[test_case("42,100.50", "42100.50" ; "thousands separator")]
    #[test_case(" 7 ", "7" ; "integer padded")]
    fn price_parses(raw: &str, expected: &str) {
        assert_eq!(Price::parse(raw).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("-1.0" ; "negative")]
    #[test_case("1e5" ; "exponent")]
    #[test_case("12.34.56" ; "two dots")]
    #[test_case("N/A" ; "placeholder")]
    fn price_rejects(raw: &str) {
        assert!(Price::parse(raw).is_err());
    }

    #[test]
    fn price_equality_is_textual() {
        assert_ne!(Price::parse("100").unwrap(), Price::parse("100.0").unwrap());
        assert_eq!(Price::parse("1,000").unwrap(), Price::parse("1000").unwrap());
    }

    #[test]
    fn price_decimal_view() {
        let price = Price::parse("42100.50").unwrap();
        assert_eq!(price.as_decimal(), Some(Decimal::new(4_210_050, 2)));
        assert_eq!(Price::from_decimal(Decimal::new(4_210_050, 2)), price);
    }

    #[test]
    fn update_serializes_wire_shape() {
        let update = PriceUpdate {
            symbol: Symbol::parse("btcusd").unwrap(),
            price: Price::parse("42000.00").unwrap(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        };

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "symbol": "BTCUSD",
                "price": "42000.00",
                "timestamp": 1_700_000_000_000_i64,
            })
        );
    }
}
