//! NDJSON Streaming Boundary
//!
//! HTTP endpoint that lets remote clients subscribe to symbols over a
//! long-lived request body and receive price changes as newline-delimited
//! JSON.
//!
//! - `codec`: incremental decoding of subscribe requests
//! - `sink`: bounded channel sink per client
//! - `server`: axum router, session driver and server lifecycle

pub mod codec;
pub mod server;
pub mod sink;

pub use codec::{DecodeError, RequestDecoder, SubscribeRequest};
pub use server::{StreamServer, StreamServerError, StreamState, router};
pub use sink::ChannelSink;
