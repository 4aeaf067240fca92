//! Error taxonomy for the relay core.
//!
//! Only [`DuplicateConnectionError`] ever leaves the core. Receive, send and
//! close-handshake failures are recovered where they happen and surface as
//! log records, metrics and [`crate::relay::RelayReport`] fields.

use std::time::Duration;

use thiserror::Error;

use crate::ids::ConnectionId;

/// A connection id was registered while already present.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("connection {0} is already registered")]
pub struct DuplicateConnectionError(pub ConnectionId);

/// Failure while reading the next frame from a peer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReceiveError {
    /// The transport failed (reset, I/O error, protocol violation).
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Failure forwarding a frame to one peer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The peer's outbound queue is full; the frame was dropped for that peer.
    #[error("outbound queue full")]
    QueueFull,
    /// The peer's writer has already shut down.
    #[error("connection closed")]
    Closed,
    /// The wire send did not complete in time.
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    /// The transport rejected the frame.
    #[error("transport error: {0}")]
    Transport(String),
    /// The transport cannot express this frame.
    #[error("unsupported frame: {0}")]
    Unsupported(String),
}

impl SendError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Failure sending our close frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CloseHandshakeError {
    /// The close frame was not written within the close timeout.
    #[error("close handshake timed out after {0:?}")]
    Timeout(Duration),
    /// The connection's writer had already finished.
    #[error("connection already closed")]
    AlreadyClosed,
    /// The transport failed while writing the close frame.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Umbrella error for the relay core.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Id collision at registration.
    #[error(transparent)]
    DuplicateConnection(#[from] DuplicateConnectionError),
    /// Read-path failure.
    #[error(transparent)]
    Receive(#[from] ReceiveError),
    /// Write-path failure to a single peer.
    #[error(transparent)]
    Send(#[from] SendError),
    /// Close handshake failure.
    #[error(transparent)]
    CloseHandshake(#[from] CloseHandshakeError),
}

impl RelayError {
    /// Whether this error means an invariant was broken rather than a peer
    /// misbehaving.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateConnection(_))
    }
}
