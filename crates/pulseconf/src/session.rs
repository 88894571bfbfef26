//! Session configuration - how a connected client behaves.

use serde::{Deserialize, Serialize};

/// Per-session settings handed to the protocol client at connect time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Name announced to the server as `application.name`.
    /// Default: pulsewire
    #[serde(default = "SessionConfig::default_client_name")]
    pub client_name: String,

    /// How long a single request may wait for its reply, in milliseconds.
    /// Default: 5000
    #[serde(default = "SessionConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Largest frame payload accepted from the server, in bytes.
    /// Default: 16 MiB (the server's own ceiling)
    #[serde(default = "SessionConfig::default_max_frame_size")]
    pub max_frame_size: u32,

    /// Entity kinds to subscribe to right after the handshake
    /// ("sink", "source", "sink_input", "source_output", "module",
    /// "client", "sample_cache", "server", "card", "all").
    /// Default: none
    #[serde(default)]
    pub subscribe: Vec<String>,
}

impl SessionConfig {
    fn default_client_name() -> String {
        "pulsewire".to_string()
    }

    fn default_request_timeout_ms() -> u64 {
        5000
    }

    fn default_max_frame_size() -> u32 {
        16 * 1024 * 1024
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_name: Self::default_client_name(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            max_frame_size: Self::default_max_frame_size(),
            subscribe: Vec::new(),
        }
    }
}
