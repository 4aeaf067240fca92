//! Connection lifecycle: accept → register → relay → close → deregister.

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use tokio::time;
use tracing::{debug, error, info};

use crate::broadcast::Broadcaster;
use crate::channel::{FrameChannel, FrameSink};
use crate::config::RelayConfig;
use crate::connection::{ConnectionEntry, spawn_writer};
use crate::errors::RelayError;
use crate::frame::CloseFrame;
use crate::ids::ConnectionId;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::registry::ConnectionRegistry;
use crate::relay::{CloseCause, RelayLoop, RelayReport};

/// Entry point for accepted, already-upgraded connections.
#[derive(Clone)]
pub struct LifecycleController {
    registry: Arc<ConnectionRegistry>,
    config: RelayConfig,
}

impl LifecycleController {
    /// Create a controller with a fresh registry.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            config,
        }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Serve one connection until it is closed and deregistered.
    pub async fn handle_connection<C: FrameChannel>(
        &self,
        channel: C,
        remote_addr: Option<SocketAddr>,
    ) -> Result<RelayReport, RelayError> {
        self.handle_connection_with_id(ConnectionId::new(), channel, remote_addr)
            .await
    }

    /// Like [`Self::handle_connection`] with a caller-chosen id.
    ///
    /// An id that is already registered is rejected: the new connection is
    /// closed with an abnormal-closure frame and the existing entry is kept.
    pub async fn handle_connection_with_id<C: FrameChannel>(
        &self,
        id: ConnectionId,
        channel: C,
        remote_addr: Option<SocketAddr>,
    ) -> Result<RelayReport, RelayError> {
        let (source, mut sink) = channel.split();
        let (entry, outbound) =
            ConnectionEntry::channel(id.clone(), remote_addr, self.config.queue_capacity());
        let entry = Arc::new(entry);

        let registration = match self.registry.register_scoped(Arc::clone(&entry)) {
            Ok(registration) => registration,
            Err(e) => {
                error!(conn_id = %id, "connection id already registered, rejecting connection");
                if let Err(close_err) = sink
                    .close(Some(CloseFrame::abnormal("duplicate connection id")))
                    .await
                {
                    debug!(conn_id = %id, error = %close_err, "close handshake failed");
                }
                return Err(e.into());
            }
        };

        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %id, remote_addr = ?remote_addr, "connection opened");

        let mut writer = spawn_writer(id.clone(), sink, outbound, self.config.writer_options());
        let relay = RelayLoop::new(
            Arc::clone(&entry),
            source,
            Broadcaster::new(Arc::clone(&self.registry)),
            registration,
            self.config.close_timeout(),
        );

        let report = match tokio::spawn(relay.run()).await {
            Ok(report) => report,
            Err(join_err) => {
                let message = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "relay task cancelled".to_owned()
                };
                error!(conn_id = %id, error = %message, "relay loop failed, closing connection");
                let cause = CloseCause::Panicked(message);
                let handshake = entry.close(cause.reply(), self.config.close_timeout()).await;
                if self.registry.deregister(&id) {
                    error!(conn_id = %id, "connection was still registered after relay loop failure");
                }
                RelayReport {
                    id: id.clone(),
                    cause,
                    handshake,
                    frames_received: entry.received_count(),
                    duration: entry.age(),
                }
            }
        };

        // The writer exits once our close frame is written or every queue
        // handle is gone; a peer stuck mid-send is cut off.
        drop(entry);
        if time::timeout(self.config.close_timeout(), &mut writer)
            .await
            .is_err()
        {
            debug!(conn_id = %id, "writer did not finish, aborting");
            writer.abort();
        }

        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(report.duration.as_secs_f64());
        info!(
            conn_id = %id,
            cause = report.cause.label(),
            frames_received = report.frames_received,
            "connection closed"
        );
        Ok(report)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "relay loop panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::channel::FrameSource;
    use crate::errors::ReceiveError;
    use crate::frame::{CLOSE_ABNORMAL, Frame};
    use crate::memory::{self, MemoryClient, MemorySink};

    /// Yields `frames_before_panic` text frames, then panics.
    struct PanickingSource {
        frames_before_panic: u32,
    }

    #[async_trait]
    impl FrameSource for PanickingSource {
        async fn recv(&mut self) -> Option<Result<Frame, ReceiveError>> {
            if self.frames_before_panic == 0 {
                panic!("source exploded");
            }
            self.frames_before_panic -= 1;
            Some(Ok(Frame::text("tick")))
        }
    }

    struct PanickingChannel(PanickingSource, MemorySink);

    impl FrameChannel for PanickingChannel {
        type Source = PanickingSource;
        type Sink = MemorySink;

        fn split(self) -> (PanickingSource, MemorySink) {
            (self.0, self.1)
        }
    }

    fn panicking_pair(frames_before_panic: u32) -> (PanickingChannel, MemoryClient) {
        let (channel, client) = memory::pair();
        let (_source, sink) = channel.split();
        (
            PanickingChannel(PanickingSource { frames_before_panic }, sink),
            client,
        )
    }

    #[tokio::test]
    async fn closed_connection_is_deregistered() {
        let controller = LifecycleController::new(RelayConfig::default());
        let (channel, client) = memory::pair();
        assert!(client.send(Frame::close(1000, "")));

        let report = controller.handle_connection(channel, None).await.unwrap();
        assert!(report.id.as_str().starts_with("conn_"));
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_replacing_original() {
        let controller = LifecycleController::new(RelayConfig::default());
        let id = ConnectionId::from_raw("conn_fixed");
        let (existing, _rx) = ConnectionEntry::channel(id.clone(), None, 4);
        controller.registry().register(Arc::new(existing)).unwrap();

        let (channel, mut client) = memory::pair();
        let err = controller
            .handle_connection_with_id(id.clone(), channel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DuplicateConnection(_)));
        assert!(err.is_fatal());
        assert_eq!(controller.registry().len(), 1);

        match client.recv().await {
            Some(Frame::Close(Some(close))) => assert_eq!(close.code, CLOSE_ABNORMAL),
            other => panic!("expected abnormal close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn panicking_relay_loop_closes_abnormally() {
        let controller = LifecycleController::new(RelayConfig::default());
        let (channel, mut client) = panicking_pair(0);

        let report = controller.handle_connection(channel, None).await.unwrap();
        assert_eq!(report.cause, CloseCause::Panicked("source exploded".into()));
        assert!(controller.registry().is_empty());
        match client.recv().await {
            Some(Frame::Close(Some(close))) => assert_eq!(close.code, CLOSE_ABNORMAL),
            other => panic!("expected abnormal close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_panicking_connection_leaves_others_running() {
        let controller = LifecycleController::new(RelayConfig::default());
        let (healthy, mut healthy_client) = memory::pair();
        let runner = controller.clone();
        let healthy_task = tokio::spawn(async move {
            runner
                .handle_connection_with_id(ConnectionId::from_raw("conn_ok"), healthy, None)
                .await
        });
        while !controller.registry().contains(&ConnectionId::from_raw("conn_ok")) {
            tokio::task::yield_now().await;
        }

        let (broken, _broken_client) = panicking_pair(0);
        let _ = controller.handle_connection(broken, None).await.unwrap();
        assert_eq!(controller.registry().len(), 1);

        assert!(healthy_client.send(Frame::close(1000, "done")));
        let report = healthy_task.await.unwrap().unwrap();
        assert!(!report.cause.is_abnormal());
        assert_eq!(healthy_client.recv().await, Some(Frame::close(1000, "done")));
    }

    #[tokio::test]
    async fn panicked_report_counts_frames_read_before_panic() {
        let controller = LifecycleController::new(RelayConfig::default());
        let (channel, _client) = panicking_pair(2);

        let report = controller.handle_connection(channel, None).await.unwrap();
        assert!(matches!(report.cause, CloseCause::Panicked(_)));
        assert_eq!(report.frames_received, 2);
    }

    #[test]
    fn panic_message_handles_string_payloads() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42_u32)), "relay loop panicked");
    }
}
