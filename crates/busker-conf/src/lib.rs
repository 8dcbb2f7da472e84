//! Configuration loading for busker apps.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/busker/config.toml` (system)
//! 2. `~/.config/busker/config.toml` (user)
//! 3. `./busker.toml` or an explicit `--config` path
//! 4. Environment variables (`BUSKER_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! address = "unix:///tmp/busker_app.sock"
//!
//! [runtime]
//! max_concurrent_calls = 5
//! command_timeout_ms = 30000
//! session_idle_secs = 1800
//! attachment_ttl_secs = 600
//! cleanup_interval_secs = 60
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [paths]
//! shared_dir = "~/.local/share/busker/shared"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{BindConfig, PathsConfig, RuntimeConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete busker configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuskerConfig {
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl BuskerConfig {
    /// Load from the standard locations, then apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Like [`load`](Self::load), with `config_path` replacing `./busker.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = BuskerConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources, |key| std::env::var(key).ok())?;
        config.runtime.validate()?;

        Ok((config, sources))
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# busker configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("address = \"{}\"\n", self.bind.address));

        output.push_str("\n[runtime]\n");
        output.push_str(&format!(
            "max_concurrent_calls = {}\n",
            self.runtime.max_concurrent_calls
        ));
        output.push_str(&format!(
            "command_timeout_ms = {}\n",
            self.runtime.command_timeout_ms
        ));
        output.push_str(&format!(
            "session_idle_secs = {}\n",
            self.runtime.session_idle_secs
        ));
        output.push_str(&format!(
            "attachment_ttl_secs = {}\n",
            self.runtime.attachment_ttl_secs
        ));
        output.push_str(&format!(
            "cleanup_interval_secs = {}\n",
            self.runtime.cleanup_interval_secs
        ));

        output.push_str("\n[telemetry]\n");
        if let Some(endpoint) = &self.telemetry.otlp_endpoint {
            output.push_str(&format!("otlp_endpoint = \"{}\"\n", endpoint));
        }
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[paths]\n");
        output.push_str(&format!(
            "shared_dir = \"{}\"\n",
            self.paths.shared_dir.display()
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BuskerConfig::default();
        assert_eq!(config.bind.address, "unix:///tmp/busker_app.sock");
        assert_eq!(config.runtime.max_concurrent_calls, 5);
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn rendered_toml_parses_back() {
        let mut config = BuskerConfig::default();
        config.telemetry.otlp_endpoint = Some("127.0.0.1:4317".to_string());
        config.runtime.max_concurrent_calls = 9;

        let rendered = config.to_toml();
        assert!(rendered.contains("[runtime]"));

        let parsed: BuskerConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
