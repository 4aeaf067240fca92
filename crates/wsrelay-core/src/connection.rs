//! Connected peer state and its outbound writer task.
//!
//! Every peer owns a bounded FIFO queue. Fan-out enqueues without waiting and
//! a dedicated writer task drains the queue onto the peer's [`FrameSink`].
//! The close handshake goes through the same queue, so it is written after
//! every frame already queued for that peer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::channel::FrameSink;
use crate::errors::{CloseHandshakeError, SendError};
use crate::frame::{CloseFrame, Frame};
use crate::ids::ConnectionId;
use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_FRAMES_RELAYED_TOTAL};

enum Outbound {
    Frame(Frame),
    Close {
        frame: Option<CloseFrame>,
        ack: oneshot::Sender<Result<(), CloseHandshakeError>>,
    },
}

/// Receiving end of a peer's outbound queue, consumed by [`spawn_writer`].
pub struct OutboundReceiver(mpsc::Receiver<Outbound>);

impl OutboundReceiver {
    /// Pop the next queued data frame without a writer task.
    ///
    /// Close requests are skipped. Handy when driving an entry by hand.
    pub fn try_next_frame(&mut self) -> Option<Frame> {
        while let Ok(item) = self.0.try_recv() {
            if let Outbound::Frame(frame) = item {
                return Some(frame);
            }
        }
        None
    }
}

/// One live peer.
pub struct ConnectionEntry {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    connected_at: Instant,
    outbound: mpsc::Sender<Outbound>,
    dropped_frames: AtomicU64,
    received_frames: AtomicU64,
}

impl ConnectionEntry {
    /// Create an entry and the receiving end of its outbound queue.
    pub fn channel(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let entry = Self {
            id,
            remote_addr,
            connected_at: Instant::now(),
            outbound: tx,
            dropped_frames: AtomicU64::new(0),
            received_frames: AtomicU64::new(0),
        };
        (entry, OutboundReceiver(rx))
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Peer address, if the transport reported one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Frames dropped for this peer because its queue was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Data frames read from this peer so far.
    pub fn received_count(&self) -> u64 {
        self.received_frames.load(Ordering::Relaxed)
    }

    /// Count one data frame read from this peer.
    pub fn record_received(&self) {
        let _ = self.received_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Queue a frame for this peer without waiting.
    pub fn enqueue(&self, frame: Frame) -> Result<(), SendError> {
        let result = self.outbound.try_send(Outbound::Frame(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        });
        if result.is_err() {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Ask the writer to send our close frame and wait for it to be written.
    pub async fn close(
        &self,
        frame: Option<CloseFrame>,
        limit: Duration,
    ) -> Result<(), CloseHandshakeError> {
        let (ack, done) = oneshot::channel();
        let handshake = async {
            self.outbound
                .send(Outbound::Close { frame, ack })
                .await
                .map_err(|_| CloseHandshakeError::AlreadyClosed)?;
            done.await.map_err(|_| CloseHandshakeError::AlreadyClosed)?
        };
        time::timeout(limit, handshake)
            .await
            .unwrap_or(Err(CloseHandshakeError::Timeout(limit)))
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("dropped_frames", &self.drop_count())
            .field("received_frames", &self.received_count())
            .finish_non_exhaustive()
    }
}

/// Writer task settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriterOptions {
    /// Upper bound on one wire send.
    pub send_timeout: Duration,
    /// Keep-alive ping period, if enabled.
    pub keep_alive: Option<Duration>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            keep_alive: None,
        }
    }
}

/// Spawn the task that drains a peer's outbound queue onto its sink.
///
/// The task ends after writing a close frame or when every sender is gone.
/// Failed sends are logged and counted; they never close the peer.
pub fn spawn_writer<K: FrameSink>(
    id: ConnectionId,
    sink: K,
    outbound: OutboundReceiver,
    options: WriterOptions,
) -> JoinHandle<()> {
    tokio::spawn(run_writer(id, sink, outbound.0, options))
}

async fn run_writer<K: FrameSink>(
    id: ConnectionId,
    mut sink: K,
    mut rx: mpsc::Receiver<Outbound>,
    options: WriterOptions,
) {
    let mut keep_alive = options.keep_alive.map(|period| {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let next = tokio::select! {
            item = rx.recv() => item,
            () = tick(keep_alive.as_mut()) => {
                let result = time::timeout(options.send_timeout, sink.ping())
                    .await
                    .unwrap_or(Err(SendError::Timeout(options.send_timeout)));
                if let Err(e) = result {
                    debug!(conn_id = %id, error = %e, "keep-alive ping failed");
                }
                continue;
            }
        };

        match next {
            Some(Outbound::Frame(frame)) => {
                match time::timeout(options.send_timeout, sink.send(frame)).await {
                    Ok(Ok(())) => counter!(WS_FRAMES_RELAYED_TOTAL).increment(1),
                    Ok(Err(e)) => {
                        counter!(WS_BROADCAST_DROPS_TOTAL, "reason" => e.error_kind()).increment(1);
                        warn!(conn_id = %id, error = %e, "failed to deliver frame to peer");
                    }
                    Err(_) => {
                        let e = SendError::Timeout(options.send_timeout);
                        counter!(WS_BROADCAST_DROPS_TOTAL, "reason" => e.error_kind()).increment(1);
                        warn!(conn_id = %id, error = %e, "failed to deliver frame to peer");
                    }
                }
            }
            Some(Outbound::Close { frame, ack }) => {
                let result = sink.close(frame).await;
                let _ = ack.send(result);
                break;
            }
            None => break,
        }
    }
    trace!(conn_id = %id, "writer finished");
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
