//! The per-connection relay loop.
//!
//! `Open` reads frames and hands each one to the broadcaster in receive
//! order. A close frame, a receive error or the end of the stream moves the
//! loop to `Draining`, where it stops reading and sends its own close frame.
//! `Closed` deregisters the connection, whether or not the close frame made
//! it out.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, trace};

use crate::broadcast::Broadcaster;
use crate::channel::FrameSource;
use crate::connection::ConnectionEntry;
use crate::errors::{CloseHandshakeError, ReceiveError};
use crate::frame::{CloseFrame, Frame};
use crate::ids::ConnectionId;
use crate::metrics::WS_FRAMES_RECEIVED_TOTAL;
use crate::registry::Registration;

/// Why a connection left the `Open` state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseCause {
    /// The peer sent a close frame.
    PeerClosed(Option<CloseFrame>),
    /// Reading the next frame failed.
    ReceiveFailed(ReceiveError),
    /// The transport ended without a close frame.
    Disconnected,
    /// The relay loop itself failed.
    Panicked(String),
}

impl CloseCause {
    /// Close frame to send back: the peer's own frame verbatim, or an
    /// abnormal-closure frame for every other cause.
    pub fn reply(&self) -> Option<CloseFrame> {
        match self {
            Self::PeerClosed(frame) => frame.clone(),
            Self::ReceiveFailed(_) => Some(CloseFrame::abnormal("receive error")),
            Self::Disconnected => Some(CloseFrame::abnormal("connection lost")),
            Self::Panicked(_) => Some(CloseFrame::abnormal("internal error")),
        }
    }

    /// Whether the connection ended without a clean peer close.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Self::PeerClosed(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed(_) => "peer_closed",
            Self::ReceiveFailed(_) => "receive_failed",
            Self::Disconnected => "disconnected",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// Relay loop state.
#[derive(Clone, Debug, PartialEq, Eq)]
enum RelayState {
    /// Reading and relaying frames.
    Open,
    /// Sending our close frame; no more reads.
    Draining(CloseCause),
    /// Deregistered. Terminal.
    Closed(CloseCause),
}

impl RelayState {
    fn cause(&self) -> Option<&CloseCause> {
        match self {
            Self::Open => None,
            Self::Draining(cause) | Self::Closed(cause) => Some(cause),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Draining(_) => "draining",
            Self::Closed(_) => "closed",
        }
    }
}

/// How a connection ended.
#[derive(Debug)]
pub struct RelayReport {
    /// The connection.
    pub id: ConnectionId,
    /// Why it left `Open`.
    pub cause: CloseCause,
    /// Result of sending our close frame.
    pub handshake: Result<(), CloseHandshakeError>,
    /// Data frames read from the peer.
    pub frames_received: u64,
    /// Time from accept to close.
    pub duration: Duration,
}

/// One connection's read side.
pub struct RelayLoop<S> {
    entry: Arc<ConnectionEntry>,
    source: S,
    broadcaster: Broadcaster,
    registration: Registration,
    close_timeout: Duration,
    state: RelayState,
}

impl<S: FrameSource> RelayLoop<S> {
    /// Create a loop for a registered connection.
    pub fn new(
        entry: Arc<ConnectionEntry>,
        source: S,
        broadcaster: Broadcaster,
        registration: Registration,
        close_timeout: Duration,
    ) -> Self {
        Self {
            entry,
            source,
            broadcaster,
            registration,
            close_timeout,
            state: RelayState::Open,
        }
    }

    /// Run until the connection is closed and deregistered.
    pub async fn run(mut self) -> RelayReport {
        let cause = self.receive_until_close().await;
        self.transition(RelayState::Draining(cause.clone()));

        let handshake = self.entry.close(cause.reply(), self.close_timeout).await;
        if let Err(e) = &handshake {
            debug!(conn_id = %self.entry.id(), error = %e, "close handshake failed");
        }

        self.transition(RelayState::Closed(cause.clone()));
        let Self {
            entry,
            registration,
            ..
        } = self;
        if !registration.deregister() {
            debug!(conn_id = %entry.id(), "connection was already deregistered");
        }

        RelayReport {
            id: entry.id().clone(),
            cause,
            handshake,
            frames_received: entry.received_count(),
            duration: entry.age(),
        }
    }

    async fn receive_until_close(&mut self) -> CloseCause {
        loop {
            match self.source.recv().await {
                Some(Ok(Frame::Close(frame))) => return CloseCause::PeerClosed(frame),
                Some(Ok(frame)) => {
                    self.entry.record_received();
                    counter!(WS_FRAMES_RECEIVED_TOTAL, "kind" => frame.kind_label()).increment(1);
                    let _ = self.broadcaster.broadcast(self.entry.id(), &frame);
                }
                Some(Err(e)) => {
                    debug!(conn_id = %self.entry.id(), error = %e, "receive failed");
                    return CloseCause::ReceiveFailed(e);
                }
                None => return CloseCause::Disconnected,
            }
        }
    }

    fn transition(&mut self, next: RelayState) {
        trace!(
            conn_id = %self.entry.id(),
            from = self.state.label(),
            to = next.label(),
            cause = next.cause().map(CloseCause::label),
            "relay state change"
        );
        self.state = next;
    }
}
