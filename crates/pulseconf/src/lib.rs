//! Minimal configuration loading for pulsewire.
//!
//! This crate only knows where the sound server lives and how a session
//! should behave once connected. It never speaks the protocol itself, so
//! it stays cheap to depend on.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): where things are - the server's
//!   socket path, the authentication cookie path, log level.
//!
//! - **Session** (`SessionConfig`): how a connected session behaves -
//!   client name announced to the server, request timeout, frame size
//!   ceiling, and the initial event subscription.
//!
//! # Usage
//!
//! ```rust,no_run
//! use pulseconf::PulseConfig;
//!
//! let config = PulseConfig::load().expect("Failed to load config");
//!
//! println!("socket: {}", config.infra.paths.socket_path.display());
//! println!("client name: {}", config.session.client_name);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/pulsewire/config.toml` (system)
//! 2. `~/.config/pulsewire/config.toml` (user)
//! 3. `./pulsewire.toml` (local override)
//! 4. Environment variables (`PULSEWIRE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! socket_path = "$XDG_RUNTIME_DIR/pulse/native"
//! cookie_path = "~/.config/pulse/cookie"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [session]
//! client_name = "mixer-panel"
//! request_timeout_ms = 5000
//! max_frame_size = 16777216
//! subscribe = ["sink", "sink_input"]
//! ```

pub mod infra;
pub mod loader;
pub mod session;

pub use infra::{InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use session::SessionConfig;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete pulsewire configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PulseConfig {
    /// Where the server and its credentials live.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Per-session behaviour.
    #[serde(default)]
    pub session: SessionConfig,
}

impl PulseConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/pulsewire/config.toml`
    /// 3. `~/.config/pulsewire/config.toml`
    /// 4. `./pulsewire.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./pulsewire.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PulseConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            config = loader::merge_configs(config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# pulsewire configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "socket_path = \"{}\"\n",
            self.infra.paths.socket_path.display()
        ));
        output.push_str(&format!(
            "cookie_path = \"{}\"\n",
            self.infra.paths.cookie_path.display()
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output.push_str("\n[session]\n");
        output.push_str(&format!("client_name = \"{}\"\n", self.session.client_name));
        output.push_str(&format!(
            "request_timeout_ms = {}\n",
            self.session.request_timeout_ms
        ));
        output.push_str(&format!("max_frame_size = {}\n", self.session.max_frame_size));
        let subscribe: Vec<String> = self
            .session
            .subscribe
            .iter()
            .map(|s| format!("\"{}\"", s))
            .collect();
        output.push_str(&format!("subscribe = [{}]\n", subscribe.join(", ")));

        output
    }
}
