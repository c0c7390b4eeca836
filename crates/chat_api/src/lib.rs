//! Transport-only client for the conversation store HTTP API.
//!
//! This crate owns request building, chunked reply decoding and response-shape
//! probing. It holds no conversation state and no retry policy; callers decide
//! what to do with an error.
//!
//! Reply bodies may be framed as SSE `data:` lines, bare JSON lines or plain
//! text, in any mix. [`FrameDecoder`] normalizes all three into
//! [`StreamFrame`] values.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod frame;
pub mod headers;
pub mod payload;
pub mod url;

pub use client::{CancellationSignal, ChatApiClient, StreamObserver};
pub use config::ChatApiConfig;
pub use envelope::{MessageRecord, SessionRecord};
pub use error::ChatApiError;
pub use events::StreamFrame;
pub use frame::FrameDecoder;
pub use headers::CallerIdentity;
pub use payload::ChatRequest;
pub use reqwest::StatusCode;
pub use url::{endpoint, DEFAULT_BASE_URL};
