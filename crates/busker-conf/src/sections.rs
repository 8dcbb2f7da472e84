//! Config sections.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;

/// Where the invocation service listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindConfig {
    /// `unix:///path`, `tcp://host:port`, or bare `host:port`.
    /// Default: unix:///tmp/busker_app.sock
    #[serde(default = "BindConfig::default_address")]
    pub address: String,
}

impl BindConfig {
    pub(crate) fn default_address() -> String {
        "unix:///tmp/busker_app.sock".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
        }
    }
}

/// Dispatch and housekeeping limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Tool bodies allowed to run at once across all connections.
    #[serde(default = "RuntimeConfig::default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,

    /// Timeout for helper subprocesses when a tool sets none.
    #[serde(default = "RuntimeConfig::default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "RuntimeConfig::default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// How long result files stay fetchable after the call returns.
    #[serde(default = "RuntimeConfig::default_attachment_ttl_secs")]
    pub attachment_ttl_secs: u64,

    #[serde(default = "RuntimeConfig::default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl RuntimeConfig {
    fn default_max_concurrent_calls() -> usize {
        5
    }

    fn default_command_timeout_ms() -> u64 {
        30_000
    }

    fn default_session_idle_secs() -> u64 {
        1800
    }

    fn default_attachment_ttl_secs() -> u64 {
        600
    }

    fn default_cleanup_interval_secs() -> u64 {
        60
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn attachment_ttl(&self) -> Duration {
        Duration::from_secs(self.attachment_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid {
                key: "runtime.max_concurrent_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "runtime.cleanup_interval_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: Self::default_max_concurrent_calls(),
            command_timeout_ms: Self::default_command_timeout_ms(),
            session_idle_secs: Self::default_session_idle_secs(),
            attachment_ttl_secs: Self::default_attachment_ttl_secs(),
            cleanup_interval_secs: Self::default_cleanup_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Console-only logging when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// `EnvFilter` directive.
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
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory tools write result files into so clients can reach them.
    /// Default: ~/.local/share/busker/shared
    #[serde(default = "PathsConfig::default_shared_dir")]
    pub shared_dir: PathBuf,
}

impl PathsConfig {
    fn default_shared_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/busker/shared"))
            .unwrap_or_else(|| PathBuf::from(".local/share/busker/shared"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            shared_dir: Self::default_shared_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_follow_fields() {
        let runtime = RuntimeConfig {
            command_timeout_ms: 1500,
            ..Default::default()
        };
        assert_eq!(runtime.command_timeout(), Duration::from_millis(1500));
        assert_eq!(runtime.session_idle(), Duration::from_secs(1800));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let runtime = RuntimeConfig {
            max_concurrent_calls: 0,
            ..Default::default()
        };
        assert!(matches!(
            runtime.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
