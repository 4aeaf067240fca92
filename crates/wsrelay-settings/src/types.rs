//! Settings types. Every struct deserializes from camelCase JSON and fills
//! missing keys from its `Default`.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wsrelay_core::RelayConfig;

/// Root settings object (`~/.wsrelay/settings.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and HTTP routing.
    pub server: ServerSettings,
    /// Per-connection queueing, timeouts and keep-alive.
    pub relay: RelayConfig,
    /// Log output.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Path of the WebSocket endpoint.
    pub path: String,
    /// Directory served for every other path.
    pub static_dir: Option<PathBuf>,
    /// Largest accepted message, in bytes.
    pub max_message_size: usize,
    /// How long graceful shutdown may take.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            path: "/ws".to_string(),
            static_dir: None,
            max_message_size: 16 * 1024 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    /// Listener address as `host:port`. IPv6 literals are bracketed.
    pub fn bind_addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.port).to_string(),
            Err(_) => format!("{}:{}", self.host, self.port),
        }
    }

    /// Graceful shutdown limit.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
    /// Per-target level overrides, e.g. `{"wsrelay_core": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
            modules: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.path, "/ws");
        assert!(settings.server.static_dir.is_none());
        assert_eq!(settings.server.max_message_size, 16_777_216);
        assert_eq!(settings.relay.keep_alive_interval_secs, 180);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
        assert!(settings.logging.file.is_none());
        assert!(settings.logging.modules.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(json["server"]["maxMessageSize"], 16_777_216);
        assert_eq!(json["server"]["shutdownTimeoutSecs"], 10);
        assert_eq!(json["relay"]["sendQueueCapacity"], 256);
        assert!(json["server"]["staticDir"].is_null());
        assert!(json["logging"]["file"].is_null());
        assert!(json["logging"]["modules"].as_object().unwrap().is_empty());
    }

    #[test]
    fn logging_file_and_modules_from_json() {
        let settings: RelaySettings = serde_json::from_str(
            r#"{"logging": {"file": "/var/log/wsrelay.log",
                            "modules": {"wsrelay_core": "debug", "tower_http": "warn"}}}"#,
        )
        .unwrap();
        assert_eq!(
            settings.logging.file,
            Some(PathBuf::from("/var/log/wsrelay.log"))
        );
        assert_eq!(settings.logging.modules["wsrelay_core"], "debug");
        assert_eq!(settings.logging.modules["tower_http"], "warn");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.path, "/ws");
        assert_eq!(settings.relay, RelayConfig::default());
    }

    #[test]
    fn bind_addr_parses_ip_literal() {
        let server = ServerSettings {
            host: "127.0.0.1".into(),
            port: 8080,
            ..ServerSettings::default()
        };
        assert_eq!(server.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn bind_addr_brackets_ipv6() {
        let server = ServerSettings {
            host: "::1".into(),
            port: 9000,
            ..ServerSettings::default()
        };
        assert_eq!(server.bind_addr(), "[::1]:9000");
    }

    #[test]
    fn bind_addr_keeps_hostname() {
        let server = ServerSettings {
            host: "localhost".into(),
            ..ServerSettings::default()
        };
        assert_eq!(server.bind_addr(), "localhost:5000");
    }
}
