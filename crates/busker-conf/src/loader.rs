//! Config file discovery, loading, and environment variable overlay.

use crate::{BuskerConfig, ConfigError};
use std::path::{Path, PathBuf};

/// Where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded, in order.
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values.
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local `busker.toml`.
/// Only files that exist are returned, in load order.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/busker/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("busker/config.toml");
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

    let local = PathBuf::from("busker.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and lay the keys it sets over `config`.
pub fn overlay_file(config: &mut BuskerConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

/// Lay the keys present in `contents` over `config`. Absent keys keep their value.
pub fn overlay_toml(config: &mut BuskerConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let unsigned = |section: &str, key: &str, v: i64| -> Result<u64, ConfigError> {
        u64::try_from(v).map_err(|_| ConfigError::Parse {
            path: path.to_path_buf(),
            message: format!("{}.{} must not be negative", section, key),
        })
    };

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("address").and_then(|v| v.as_str()) {
            config.bind.address = v.to_string();
        }
    }

    if let Some(runtime) = table.get("runtime").and_then(|v| v.as_table()) {
        if let Some(v) = runtime.get("max_concurrent_calls").and_then(|v| v.as_integer()) {
            config.runtime.max_concurrent_calls = unsigned("runtime", "max_concurrent_calls", v)? as usize;
        }
        if let Some(v) = runtime.get("command_timeout_ms").and_then(|v| v.as_integer()) {
            config.runtime.command_timeout_ms = unsigned("runtime", "command_timeout_ms", v)?;
        }
        if let Some(v) = runtime.get("session_idle_secs").and_then(|v| v.as_integer()) {
            config.runtime.session_idle_secs = unsigned("runtime", "session_idle_secs", v)?;
        }
        if let Some(v) = runtime.get("attachment_ttl_secs").and_then(|v| v.as_integer()) {
            config.runtime.attachment_ttl_secs = unsigned("runtime", "attachment_ttl_secs", v)?;
        }
        if let Some(v) = runtime.get("cleanup_interval_secs").and_then(|v| v.as_integer()) {
            config.runtime.cleanup_interval_secs = unsigned("runtime", "cleanup_interval_secs", v)?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.telemetry.otlp_endpoint = Some(v.to_string()).filter(|s| !s.is_empty());
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("shared_dir").and_then(|v| v.as_str()) {
            config.paths.shared_dir = expand_path(v);
        }
    }

    Ok(())
}

/// Apply environment overrides. `lookup` is `std::env::var` outside tests.
pub fn apply_env_overrides<F>(
    config: &mut BuskerConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let parse_num = |key: &str, v: &str| -> Result<u64, ConfigError> {
        v.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected a non-negative integer, got '{}'", v),
        })
    };

    if let Some(v) = lookup("BUSKER_APP_SOCKET") {
        config.bind.address = v;
        sources.env_overrides.push("BUSKER_APP_SOCKET".to_string());
    }

    if let Some(v) = lookup("BUSKER_MAX_CONCURRENT_CALLS") {
        config.runtime.max_concurrent_calls = parse_num("BUSKER_MAX_CONCURRENT_CALLS", &v)? as usize;
        sources.env_overrides.push("BUSKER_MAX_CONCURRENT_CALLS".to_string());
    }
    if let Some(v) = lookup("BUSKER_COMMAND_TIMEOUT_MS") {
        config.runtime.command_timeout_ms = parse_num("BUSKER_COMMAND_TIMEOUT_MS", &v)?;
        sources.env_overrides.push("BUSKER_COMMAND_TIMEOUT_MS".to_string());
    }

    if let Some(v) = lookup("BUSKER_SHARED_DIR") {
        config.paths.shared_dir = expand_path(&v);
        sources.env_overrides.push("BUSKER_SHARED_DIR".to_string());
    }

    if let Some(v) = lookup("BUSKER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v).filter(|s| !s.is_empty());
        sources.env_overrides.push("BUSKER_OTLP_ENDPOINT".to_string());
    }
    // Also support the standard OTEL variable
    if let Some(v) = lookup("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.telemetry.otlp_endpoint = Some(v).filter(|s| !s.is_empty());
        sources.env_overrides.push("OTEL_EXPORTER_OTLP_ENDPOINT".to_string());
    }
    if let Some(v) = lookup("BUSKER_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("BUSKER_LOG_LEVEL".to_string());
    }
    if let Some(v) = lookup("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    Ok(())
}

/// Expand a leading `~/` or `$VAR/` in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        if let Ok(value) = std::env::var(var_name) {
            let base = PathBuf::from(value);
            return match rest {
                Some(rest) => base.join(rest),
                None => base,
            };
        }
    }

    PathBuf::from(path)
}
