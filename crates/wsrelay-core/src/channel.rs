//! The Frame Channel abstraction.
//!
//! An upgraded socket is split into a [`FrameSource`], owned by the
//! connection's relay loop, and a [`FrameSink`], owned by the connection's
//! writer task. Nothing else touches either half directly.

use async_trait::async_trait;

use crate::errors::{CloseHandshakeError, ReceiveError, SendError};
use crate::frame::{CloseFrame, Frame};

/// Receive half of a connection.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Wait for the next frame.
    ///
    /// `None` means the transport ended without a close frame.
    async fn recv(&mut self) -> Option<Result<Frame, ReceiveError>>;
}

/// Send half of a connection.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<(), SendError>;

    /// Write our close frame. The sink is not used again afterwards.
    async fn close(&mut self, frame: Option<CloseFrame>) -> Result<(), CloseHandshakeError>;

    /// Transport-level keep-alive. Sinks without one ignore it.
    async fn ping(&mut self) -> Result<(), SendError> {
        Ok(())
    }
}

/// A bidirectional, already-upgraded connection.
pub trait FrameChannel: Send + 'static {
    /// Receive half.
    type Source: FrameSource;
    /// Send half.
    type Sink: FrameSink;

    /// Split into independently owned halves.
    fn split(self) -> (Self::Source, Self::Sink);
}
