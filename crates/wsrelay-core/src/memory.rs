//! In-memory Frame Channel.
//!
//! [`pair`] returns the relay-side [`MemoryChannel`] and a [`MemoryClient`]
//! playing the remote peer. The client can inject receive errors, make the
//! relay's sends fail or stall, and disconnect without a close frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::channel::{FrameChannel, FrameSink, FrameSource};
use crate::errors::{CloseHandshakeError, ReceiveError, SendError};
use crate::frame::{CloseFrame, Frame};

#[derive(Default)]
struct Control {
    fail_sends: AtomicBool,
    stall_sends: AtomicBool,
    fail_close: AtomicBool,
    failed_sends: AtomicU64,
    pings: AtomicU64,
}

type Inbound = Result<Frame, ReceiveError>;

/// Create a connected channel/client pair.
pub fn pair() -> (MemoryChannel, MemoryClient) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let control = Arc::new(Control::default());
    let channel = MemoryChannel {
        inbound: in_rx,
        outbound: out_tx,
        control: Arc::clone(&control),
    };
    let client = MemoryClient {
        inbound: in_tx,
        outbound: out_rx,
        control,
    };
    (channel, client)
}

/// Relay side of an in-memory connection.
pub struct MemoryChannel {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<Frame>,
    control: Arc<Control>,
}

impl FrameChannel for MemoryChannel {
    type Source = MemorySource;
    type Sink = MemorySink;

    fn split(self) -> (MemorySource, MemorySink) {
        let source = MemorySource {
            inbound: self.inbound,
        };
        let sink = MemorySink {
            outbound: self.outbound,
            control: self.control,
            closed: false,
        };
        (source, sink)
    }
}

/// Receive half of a [`MemoryChannel`].
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<Result<Frame, ReceiveError>> {
        self.inbound.recv().await
    }
}

/// Send half of a [`MemoryChannel`].
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<Frame>,
    control: Arc<Control>,
    closed: bool,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), SendError> {
        if self.control.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.control.fail_sends.load(Ordering::SeqCst) {
            let _ = self.control.failed_sends.fetch_add(1, Ordering::SeqCst);
            return Err(SendError::Transport("injected send failure".into()));
        }
        if self.closed {
            return Err(SendError::Closed);
        }
        self.outbound.send(frame).map_err(|_| SendError::Closed)
    }

    async fn close(&mut self, frame: Option<CloseFrame>) -> Result<(), CloseHandshakeError> {
        if self.control.fail_close.load(Ordering::SeqCst) {
            return Err(CloseHandshakeError::Transport("injected close failure".into()));
        }
        if self.closed {
            return Err(CloseHandshakeError::AlreadyClosed);
        }
        self.closed = true;
        self.outbound
            .send(Frame::Close(frame))
            .map_err(|_| CloseHandshakeError::AlreadyClosed)
    }

    async fn ping(&mut self) -> Result<(), SendError> {
        if self.control.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let _ = self.control.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// The remote peer of an in-memory connection.
pub struct MemoryClient {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    control: Arc<Control>,
}

impl MemoryClient {
    /// Send a frame to the relay. Returns `false` once the relay side is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.inbound.send(Ok(frame)).is_ok()
    }

    /// Send a complete text message.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::text(text))
    }

    /// Make the relay's next receive fail with `error`.
    pub fn inject_error(&self, error: ReceiveError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Drop the connection without a close frame.
    pub fn disconnect(self) {}

    /// Wait for the next frame the relay wrote to this peer.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Take a frame the relay already wrote, if any.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Make every send to this peer fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.control.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every send and keep-alive ping to this peer hang.
    pub fn set_stall_sends(&self, stall: bool) {
        self.control.stall_sends.store(stall, Ordering::SeqCst);
    }

    /// Make the relay's close frame to this peer fail.
    pub fn set_fail_close(&self, fail: bool) {
        self.control.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Sends rejected because of [`Self::set_fail_sends`].
    pub fn failed_send_count(&self) -> u64 {
        self.control.failed_sends.load(Ordering::SeqCst)
    }

    /// Keep-alive pings received.
    pub fn ping_count(&self) -> u64 {
        self.control.pings.load(Ordering::SeqCst)
    }
}
