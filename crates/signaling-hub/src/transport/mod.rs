//! Duplex framed transport used by the connection adapter.
//!
//! A connection is any `Sink<Frame>` paired with a
//! `Stream<Item = Result<Frame, TransportError>>`. The axum WebSocket is
//! adapted in [`websocket`]; tests use an in-memory pair.

pub mod websocket;

use thiserror::Error;

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Read or write failed.
    #[error("transport error: {0}")]
    Io(String),
}
