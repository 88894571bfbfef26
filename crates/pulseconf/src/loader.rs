//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, InfraConfig, PulseConfig, SessionConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with an explicit override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/pulsewire/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("pulsewire/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("pulsewire.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<PulseConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse config from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<PulseConfig, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut infra = InfraConfig::default();

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("socket_path").and_then(|v| v.as_str()) {
            infra.paths.socket_path = expand_path(v);
        }
        if let Some(v) = paths.get("cookie_path").and_then(|v| v.as_str()) {
            infra.paths.cookie_path = expand_path(v);
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    let mut session = SessionConfig::default();

    if let Some(section) = table.get("session").and_then(|v| v.as_table()) {
        if let Some(v) = section.get("client_name").and_then(|v| v.as_str()) {
            session.client_name = v.to_string();
        }
        if let Some(v) = section.get("request_timeout_ms").and_then(|v| v.as_integer()) {
            session.request_timeout_ms = non_negative(v, "session.request_timeout_ms", path)?;
        }
        if let Some(v) = section.get("max_frame_size").and_then(|v| v.as_integer()) {
            let size = non_negative(v, "session.max_frame_size", path)?;
            session.max_frame_size = u32::try_from(size).map_err(|_| ConfigError::Parse {
                path: path.to_path_buf(),
                message: format!("session.max_frame_size {} exceeds u32", size),
            })?;
        }
        if let Some(kinds) = section.get("subscribe").and_then(|v| v.as_array()) {
            session.subscribe = kinds
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect();
        }
    }

    Ok(PulseConfig { infra, session })
}

fn non_negative(value: i64, field: &str, path: &Path) -> Result<u64, ConfigError> {
    u64::try_from(value).map_err(|_| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must not be negative (got {})", field, value),
    })
}

/// Merge two configs, with `overlay` taking precedence.
///
/// A field in `overlay` wins only when it differs from the compiled default,
/// so a later file that leaves a field unset does not clobber an earlier one.
pub fn merge_configs(base: PulseConfig, overlay: PulseConfig) -> PulseConfig {
    let defaults = PulseConfig::default();

    fn pick<T: PartialEq>(overlay: T, base: T, default: &T) -> T {
        if &overlay != default {
            overlay
        } else {
            base
        }
    }

    PulseConfig {
        infra: InfraConfig {
            paths: crate::infra::PathsConfig {
                socket_path: pick(
                    overlay.infra.paths.socket_path,
                    base.infra.paths.socket_path,
                    &defaults.infra.paths.socket_path,
                ),
                cookie_path: pick(
                    overlay.infra.paths.cookie_path,
                    base.infra.paths.cookie_path,
                    &defaults.infra.paths.cookie_path,
                ),
            },
            telemetry: crate::infra::TelemetryConfig {
                log_level: pick(
                    overlay.infra.telemetry.log_level,
                    base.infra.telemetry.log_level,
                    &defaults.infra.telemetry.log_level,
                ),
            },
        },
        session: SessionConfig {
            client_name: pick(
                overlay.session.client_name,
                base.session.client_name,
                &defaults.session.client_name,
            ),
            request_timeout_ms: pick(
                overlay.session.request_timeout_ms,
                base.session.request_timeout_ms,
                &defaults.session.request_timeout_ms,
            ),
            max_frame_size: pick(
                overlay.session.max_frame_size,
                base.session.max_frame_size,
                &defaults.session.max_frame_size,
            ),
            subscribe: pick(
                overlay.session.subscribe,
                base.session.subscribe,
                &defaults.session.subscribe,
            ),
        },
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut PulseConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// `apply_env_overrides` is this with the process environment.
pub fn apply_overrides_from<F>(config: &mut PulseConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PULSEWIRE_SOCKET") {
        config.infra.paths.socket_path = expand_path(&v);
        sources.env_overrides.push("PULSEWIRE_SOCKET".to_string());
    }
    if let Some(v) = lookup("PULSEWIRE_COOKIE") {
        config.infra.paths.cookie_path = expand_path(&v);
        sources.env_overrides.push("PULSEWIRE_COOKIE".to_string());
    }

    if let Some(v) = lookup("PULSEWIRE_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("PULSEWIRE_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Some(v) = lookup("PULSEWIRE_CLIENT_NAME") {
        config.session.client_name = v;
        sources.env_overrides.push("PULSEWIRE_CLIENT_NAME".to_string());
    }
    if let Some(v) = lookup("PULSEWIRE_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.session.request_timeout_ms = ms;
            sources.env_overrides.push("PULSEWIRE_TIMEOUT_MS".to_string());
        }
    }
    if let Some(v) = lookup("PULSEWIRE_MAX_FRAME") {
        if let Ok(size) = v.parse() {
            config.session.max_frame_size = size;
            sources.env_overrides.push("PULSEWIRE_MAX_FRAME".to_string());
        }
    }
    // Comma separated: "sink,sink_input"
    if let Some(v) = lookup("PULSEWIRE_SUBSCRIBE") {
        config.session.subscribe = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        sources.env_overrides.push("PULSEWIRE_SUBSCRIBE".to_string());
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/test/path");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("test/path"));
    }

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/absolute/path");
        assert_eq!(expanded, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[paths]
socket_path = "/custom/pulse/native"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(
            config.infra.paths.socket_path,
            PathBuf::from("/custom/pulse/native")
        );
        // Other values should be defaults
        assert_eq!(config.session.request_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[paths]
socket_path = "/run/user/1000/pulse/native"
cookie_path = "/home/me/.config/pulse/cookie"

[telemetry]
log_level = "debug"

[session]
client_name = "panel"
request_timeout_ms = 250
max_frame_size = 65536
subscribe = ["sink", "module"]
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(
            config.infra.paths.cookie_path,
            PathBuf::from("/home/me/.config/pulse/cookie")
        );
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.session.client_name, "panel");
        assert_eq!(config.session.request_timeout_ms, 250);
        assert_eq!(config.session.max_frame_size, 65536);
        assert_eq!(config.session.subscribe, vec!["sink", "module"]);
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let toml = r#"
[session]
request_timeout_ms = -1
"#;
        let err = parse_toml(toml, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = parse_toml("[session\nclient_name =", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_merge_keeps_base_when_overlay_is_default() {
        let mut base = PulseConfig::default();
        base.session.client_name = "from-system".to_string();
        base.session.request_timeout_ms = 1000;

        let mut overlay = PulseConfig::default();
        overlay.session.request_timeout_ms = 2000;

        let merged = merge_configs(base, overlay);
        assert_eq!(merged.session.client_name, "from-system");
        assert_eq!(merged.session.request_timeout_ms, 2000);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PULSEWIRE_SOCKET", "/tmp/pulse-test/native"),
            ("PULSEWIRE_TIMEOUT_MS", "750"),
            ("PULSEWIRE_MAX_FRAME", "not-a-number"),
            ("PULSEWIRE_SUBSCRIBE", "sink, source_output,,"),
        ]
        .into_iter()
        .collect();

        let mut config = PulseConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| {
            vars.get(k).map(|v| v.to_string())
        });

        assert_eq!(
            config.infra.paths.socket_path,
            PathBuf::from("/tmp/pulse-test/native")
        );
        assert_eq!(config.session.request_timeout_ms, 750);
        // Unparseable values are ignored, not recorded
        assert_eq!(config.session.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.session.subscribe, vec!["sink", "source_output"]);
        assert_eq!(
            sources.env_overrides,
            vec![
                "PULSEWIRE_SOCKET",
                "PULSEWIRE_TIMEOUT_MS",
                "PULSEWIRE_SUBSCRIBE"
            ]
        );
    }
}
