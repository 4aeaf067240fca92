//! Frame fan-out to every other connected peer.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use crate::errors::SendError;
use crate::frame::Frame;
use crate::ids::ConnectionId;
use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::registry::ConnectionRegistry;

/// Outcome of one fan-out.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Peers in the snapshot.
    pub recipients: usize,
    /// Peers whose queue accepted the frame.
    pub delivered: usize,
    /// Peers the frame was dropped for, with the reason.
    pub failed: Vec<(ConnectionId, SendError)>,
}

/// Forwards frames from one connection to all others.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this broadcaster reads from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Queue `frame` for every registered peer except `origin`.
    ///
    /// Never waits on a peer: each recipient's writer task does its own wire
    /// send, so a slow peer only fills its own queue. Per-peer failures are
    /// logged, counted and returned in the report; they do not stop the
    /// remaining peers.
    pub fn broadcast(&self, origin: &ConnectionId, frame: &Frame) -> FanoutReport {
        let peers = self.registry.snapshot_others(origin);
        let mut report = FanoutReport {
            recipients: peers.len(),
            ..FanoutReport::default()
        };

        for peer in peers {
            match peer.enqueue(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    counter!(WS_BROADCAST_DROPS_TOTAL, "reason" => e.error_kind()).increment(1);
                    warn!(
                        conn_id = %origin,
                        peer = %peer.id(),
                        error = %e,
                        total_drops = peer.drop_count(),
                        "failed to queue frame for peer"
                    );
                    report.failed.push((peer.id().clone(), e));
                }
            }
        }

        debug!(
            conn_id = %origin,
            kind = frame.kind_label(),
            recipients = report.recipients,
            delivered = report.delivered,
            "broadcast frame"
        );
        report
    }
}
