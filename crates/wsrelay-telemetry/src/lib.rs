//! # wsrelay-telemetry
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins when set;
//! otherwise the configured level and per-module overrides apply. Output is
//! human-readable by default or JSON lines for log shippers, and can be
//! copied to an append-only log file.

#![deny(unsafe_code)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Telemetry setup errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A level string did not name a tracing level.
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    /// A global subscriber is already installed.
    #[error("telemetry already initialized")]
    AlreadyInitialized,
    /// The log file could not be opened.
    #[error("failed to open log file {}: {source}", path.display())]
    LogFile {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Boxed layer over the bare registry.
type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"wsrelay_core" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Also append every line to this file.
    pub file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            file: None,
        }
    }
}

impl TelemetryConfig {
    /// Build from the logging settings' level string and format flag.
    pub fn from_level(level: &str, json: bool) -> Result<Self, TelemetryError> {
        Ok(Self {
            log_level: parse_level(level)?,
            json,
            ..Self::default()
        })
    }

    /// Add a per-module override.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// Copy output to `path`.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`), ignoring case.
pub fn parse_level(value: &str) -> Result<Level, TelemetryError> {
    Level::from_str(value.trim()).map_err(|_| TelemetryError::InvalidLevel(value.to_string()))
}

/// `EnvFilter` directives for `config`, used when `RUST_LOG` is unset.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut directives = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        directives.push_str(&format!(",{module}={}", level.to_string().to_lowercase()));
    }
    directives
}

/// Open `path` for appending, creating it and its parent directories.
pub fn open_log_file(path: &Path) -> Result<File, TelemetryError> {
    let log_file_error = |source| TelemetryError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(log_file_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(log_file_error)
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| filter_directives(config));

    tracing_subscriber::registry()
        .with(build_layers(config, &directives)?)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Console layer plus the optional file layer, each filtered by `directives`.
fn build_layers(
    config: &TelemetryConfig,
    directives: &str,
) -> Result<Vec<BoxedLayer>, TelemetryError> {
    let console: BoxedLayer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };
    let mut layers = vec![console.with_filter(EnvFilter::new(directives)).boxed()];

    if let Some(path) = &config.file {
        let file = Arc::new(open_log_file(path)?);
        let sink: BoxedLayer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false)
                .with_writer(file)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .boxed()
        };
        layers.push(sink.with_filter(EnvFilter::new(directives)).boxed());
    }
    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.module_levels.is_empty());
        assert!(!config.json);
        assert!(config.file.is_none());
    }

    #[test]
    fn parse_level_ignores_case() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert_eq!(parse_level(" error ").unwrap(), Level::ERROR);
    }

    #[test]
    fn parse_level_rejects_unknown() {
        let err = parse_level("loud").unwrap_err();
        assert_eq!(err.to_string(), "invalid log level: loud");
    }

    #[test]
    fn directives_include_module_levels() {
        let config = TelemetryConfig::from_level("warn", false)
            .unwrap()
            .with_module_level("wsrelay_core", Level::DEBUG)
            .with_module_level("tower_http", Level::INFO);
        assert_eq!(
            filter_directives(&config),
            "warn,wsrelay_core=debug,tower_http=info"
        );
    }

    #[test]
    fn log_file_is_created_with_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/relay.log");
        let _file = open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unopenable_log_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_log_file(dir.path()).unwrap_err();
        assert!(matches!(err, TelemetryError::LogFile { .. }));
    }

    #[test]
    fn file_layer_honours_module_levels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");
        let config = TelemetryConfig::from_level("info", false)
            .unwrap()
            .with_module_level("chatty", Level::ERROR)
            .with_file(&path);
        let layers = build_layers(&config, &filter_directives(&config)).unwrap();

        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "wsrelay_core", conn_id = "conn_1", "connection opened");
            tracing::debug!(target: "wsrelay_core", "below default level");
            tracing::warn!(target: "chatty", "below module level");
            tracing::error!(target: "chatty", "module error kept");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("connection opened"), "{contents}");
        assert!(contents.contains("conn_1"), "{contents}");
        assert!(contents.contains("module error kept"), "{contents}");
        assert!(!contents.contains("below default level"), "{contents}");
        assert!(!contents.contains("below module level"), "{contents}");
        assert!(!contents.contains('\u{1b}'), "file output must not carry ANSI codes");
    }

    #[test]
    fn json_file_layer_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.jsonl");
        let config = TelemetryConfig::from_level("info", true)
            .unwrap()
            .with_file(&path);
        let layers = build_layers(&config, &filter_directives(&config)).unwrap();

        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "wsrelay_server", "relay server listening");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["fields"]["message"], "relay server listening");
        assert_eq!(parsed["target"], "wsrelay_server");
    }

    #[test]
    fn second_init_reports_already_initialized() {
        let config = TelemetryConfig {
            json: true,
            ..TelemetryConfig::default()
        };
        // Only this test installs a subscriber in this test binary.
        init_telemetry(&config).unwrap();
        assert!(matches!(
            init_telemetry(&TelemetryConfig::default()),
            Err(TelemetryError::AlreadyInitialized)
        ));
    }
}
