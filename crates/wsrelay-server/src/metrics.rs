//! Prometheus recorder and `/metrics` rendering.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tracing::info;
use wsrelay_core::metrics::{
    WS_BROADCAST_DROPS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_FRAMES_RECEIVED_TOTAL,
    WS_FRAMES_RELAYED_TOTAL,
};

use crate::errors::ServerError;

/// Install the global Prometheus recorder and describe the relay's metrics.
///
/// Returns the handle that renders `/metrics`. Fails if another recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::MetricsRecorder(e.to_string()))?;
    describe_metrics();
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A recorder that is not installed globally, for tests and embedding.
pub fn local_recorder() -> PrometheusRecorder {
    PrometheusBuilder::new().build_recorder()
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

fn describe_metrics() {
    describe_counter!(WS_CONNECTIONS_TOTAL, "WebSocket connections accepted");
    describe_counter!(WS_DISCONNECTIONS_TOTAL, "WebSocket connections closed");
    describe_gauge!(WS_CONNECTIONS_ACTIVE, "WebSocket connections currently registered");
    describe_counter!(WS_FRAMES_RECEIVED_TOTAL, "Data frames read from peers");
    describe_counter!(WS_FRAMES_RELAYED_TOTAL, "Frames written to peers");
    describe_counter!(WS_BROADCAST_DROPS_TOTAL, "Frames dropped for a single peer");
    describe_histogram!(
        WS_CONNECTION_DURATION_SECONDS,
        Unit::Seconds,
        "WebSocket connection lifetime"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_recorder_renders_recorded_counter() {
        let recorder = local_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(WS_CONNECTIONS_TOTAL).increment(2);
        });
        let text = render(&handle);
        assert!(text.contains("ws_connections_total 2"), "{text}");
    }
}
