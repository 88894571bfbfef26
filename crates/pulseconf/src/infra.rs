//! Infrastructure configuration - where the server and its credentials live.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations of the server endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Local domain socket the server listens on.
    /// Default: $XDG_RUNTIME_DIR/pulse/native
    #[serde(default = "PathsConfig::default_socket_path")]
    pub socket_path: PathBuf,

    /// Shared-secret cookie presented during the handshake.
    /// Default: ~/.config/pulse/cookie
    #[serde(default = "PathsConfig::default_cookie_path")]
    pub cookie_path: PathBuf,
}

impl PathsConfig {
    fn default_socket_path() -> PathBuf {
        directories::BaseDirs::new()
            .and_then(|dirs| dirs.runtime_dir().map(|p| p.join("pulse/native")))
            .unwrap_or_else(|| PathBuf::from("/run/pulse/native"))
    }

    fn default_cookie_path() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("pulse/cookie"))
            .unwrap_or_else(|| PathBuf::from(".config/pulse/cookie"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            socket_path: Self::default_socket_path(),
            cookie_path: Self::default_cookie_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    /// Log level filter (trace, debug, info, warn, error, or an env-filter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// All infrastructure configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
