//! Relay tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::WriterOptions;

/// Per-connection queueing and timeout settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Capacity of each peer's outbound queue.
    pub send_queue_capacity: usize,
    /// Upper bound on a single wire send to one peer, in milliseconds.
    pub send_timeout_ms: u64,
    /// Upper bound on writing our close frame, in milliseconds.
    pub close_timeout_ms: u64,
    /// Interval between keep-alive pings in seconds (`0` disables them).
    pub keep_alive_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            send_timeout_ms: 10_000,
            close_timeout_ms: 5_000,
            keep_alive_interval_secs: 180,
        }
    }
}

impl RelayConfig {
    /// Close handshake timeout.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Options for the per-peer writer task.
    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            keep_alive: (self.keep_alive_interval_secs > 0)
                .then(|| Duration::from_secs(self.keep_alive_interval_secs)),
        }
    }

    /// Queue capacity, never zero.
    pub fn queue_capacity(&self) -> usize {
        self.send_queue_capacity.max(1)
    }
}
