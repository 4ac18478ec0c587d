//! Subscribe request decoding.
//!
//! Clients send a stream of JSON objects on the request body, either
//! newline-delimited or simply concatenated. Chunks may split an object
//! anywhere, so decoding is incremental: complete objects are returned,
//! a trailing partial object is buffered until the next chunk.

use serde::Deserialize;
use serde_json::{Deserializer, Value};

/// Upper bound for a buffered, still incomplete request.
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// A request to start streaming one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscribeRequest {
    /// Raw symbol as sent by the client.
    #[serde(alias = "ticker")]
    pub symbol: String,
}

/// A request that could not be decoded. The stream stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON; input was skipped to the next line.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Valid JSON but not a subscribe request.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// A single request exceeded the buffer limit and was discarded.
    #[error("request exceeds {MAX_PENDING_BYTES} bytes")]
    Oversized,
}

/// Incremental decoder for request-body chunks.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    buffer: Vec<u8>,
}

impl RequestDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of an object.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one chunk and return every request it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<SubscribeRequest, DecodeError>> {
        self.buffer.extend_from_slice(chunk);

        let mut decoded = Vec::new();
        let mut consumed = 0;

        'resync: while consumed < self.buffer.len() {
            let base = consumed;
            let mut stream = Deserializer::from_slice(&self.buffer[base..]).into_iter::<Value>();

            loop {
                match stream.next() {
                    None => {
                        consumed = self.buffer.len();
                        break 'resync;
                    }
                    Some(Ok(value)) => {
                        decoded.push(SubscribeRequest::from_value(value));
                        consumed = base + stream.byte_offset();
                    }
                    Some(Err(e)) if e.is_eof() => break 'resync,
                    Some(Err(e)) => {
                        decoded.push(Err(DecodeError::Malformed(e.to_string())));
                        consumed = self.skip_line(consumed);
                        continue 'resync;
                    }
                }
            }
        }

        self.buffer.drain(..consumed);

        if self.buffer.len() > MAX_PENDING_BYTES {
            self.buffer.clear();
            decoded.push(Err(DecodeError::Oversized));
        }

        decoded
    }

    /// Offset just past the line holding the first non-blank byte at or
    /// after `from`.
    fn skip_line(&self, from: usize) -> usize {
        let start = self.buffer[from..]
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map_or(self.buffer.len(), |i| from + i);

        self.buffer[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(self.buffer.len(), |i| start + i + 1)
    }
}

impl SubscribeRequest {
    fn from_value(value: Value) -> Result<Self, DecodeError> {
        serde_json::from_value(value).map_err(|e| DecodeError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(results: Vec<Result<SubscribeRequest, DecodeError>>) -> Vec<String> {
        results.into_iter().filter_map(Result::ok).map(|r| r.symbol).collect()
    }

    #[test]
    fn decodes_newline_delimited() {
        let mut decoder = RequestDecoder::new();
        let out = decoder.push(b"{\"symbol\":\"btcusd\"}\n{\"symbol\":\"ethusd\"}\n");
        assert_eq!(symbols(out), vec!["btcusd", "ethusd"]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn decodes_concatenated() {
        let mut decoder = RequestDecoder::new();
        let out = decoder.push(b"{\"symbol\":\"a\"}{\"ticker\":\"b\"}");
        assert_eq!(symbols(out), vec!["a", "b"]);
    }

    #[test]
    fn buffers_split_objects() {
        let mut decoder = RequestDecoder::new();
        assert!(decoder.push(b"{\"sym").is_empty());
        assert!(decoder.push(b"bol\": \"btc").is_empty());
        assert!(decoder.pending() > 0);

        let out = decoder.push(b"usd\"}\n");
        assert_eq!(symbols(out), vec!["btcusd"]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn skips_malformed_line() {
        let mut decoder = RequestDecoder::new();
        let out = decoder.push(b"{\"symbol\":\"a\"}\n{oops}\n{\"symbol\":\"b\"}\n");

        assert_eq!(out.len(), 3);
        assert!(matches!(out[1], Err(DecodeError::Malformed(_))));
        assert_eq!(symbols(out), vec!["a", "b"]);
    }

    #[test]
    fn rejects_wrong_shape() {
        let mut decoder = RequestDecoder::new();
        let out = decoder.push(b"{\"sym\":\"a\"}\n[1,2]\n\"x\"\n");

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| matches!(r, Err(DecodeError::Invalid(_)))));
    }

    #[test]
    fn discards_oversized_request() {
        let mut decoder = RequestDecoder::new();
        let mut chunk = b"{\"symbol\":\"".to_vec();
        chunk.extend(std::iter::repeat_n(b'A', MAX_PENDING_BYTES + 1));

        let out = decoder.push(&chunk);
        assert_eq!(out, vec![Err(DecodeError::Oversized)]);
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn whitespace_only_chunks() {
        let mut decoder = RequestDecoder::new();
        assert!(decoder.push(b"\n  \r\n").is_empty());
        assert_eq!(decoder.pending(), 0);
    }
}
