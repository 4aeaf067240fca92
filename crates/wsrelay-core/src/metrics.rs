//! Metric names recorded through the `metrics` facade.
//!
//! Recording is a no-op until a recorder is installed (the server installs
//! a Prometheus one).

/// Connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections finished (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connections currently registered (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Data frames read from peers (counter, labels: kind).
pub const WS_FRAMES_RECEIVED_TOTAL: &str = "ws_frames_received_total";
/// Frames written to peers by writer tasks (counter).
pub const WS_FRAMES_RELAYED_TOTAL: &str = "ws_frames_relayed_total";
/// Frames dropped for a single peer (counter, labels: reason).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
