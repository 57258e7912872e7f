//! Streaming exchanges with the chat endpoint.
//!
//! # Architecture
//!
//! - `aggregator`: per-session accumulation and callback delivery
//! - `http`: newline-delimited JSON transport over a blocking HTTP response
//!
//! Transports never call back into sessions directly. They push
//! `(SessionId, Frame)` pairs into a [`FrameSink`], and the event loop hands
//! them to [`StreamAggregator::dispatch`] in arrival order.

mod aggregator;
pub mod http;

use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::doc_id::DocumentId;

pub use aggregator::{SessionHandle, StreamAggregator, StreamCallbacks};
pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// The single outbound payload of an exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRequest {
    pub query: String,
    /// Document the model should use as context, if any.
    pub document_id: Option<DocumentId>,
}

impl StreamRequest {
    pub fn new(query: impl Into<String>, document_id: Option<DocumentId>) -> Self {
        Self {
            query: query.into(),
            document_id,
        }
    }
}

/// One inbound event of an exchange.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Chunk { content: String },
    Complete,
    Error { message: String },
}

impl Frame {
    pub fn chunk(content: impl Into<String>) -> Self {
        Frame::Chunk {
            content: content.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Chunk { .. })
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error: {0}")]
    Server(String),

    #[error("stream timed out")]
    TimedOut,
}

/// Where transports deliver inbound frames.
pub type FrameSink = Arc<dyn Fn(SessionId, Frame) + Send + Sync>;

/// An open duplex exchange. Closing must be idempotent.
pub trait StreamChannel {
    fn close(&mut self);
}

pub trait StreamTransport {
    /// Sends `request` and starts delivering frames tagged with `session`.
    fn open(
        &self,
        session: SessionId,
        request: &StreamRequest,
    ) -> Result<Box<dyn StreamChannel>, StreamError>;
}
