mod auth;
mod logging;
mod socket;

pub use auth::*;
pub use logging::*;
pub use socket::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub socket: SocketConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load a TOML config file.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.socket.min_retry_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "socket.min_retry_ms".into(),
                message: "min_retry_ms must be greater than 0".into(),
            });
        }

        if self.socket.max_retry_ms < self.socket.min_retry_ms {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "socket.max_retry_ms".into(),
                message: format!(
                    "max_retry_ms ({}) must be >= min_retry_ms ({})",
                    self.socket.max_retry_ms, self.socket.min_retry_ms
                ),
            });
        }

        let endpoint = self.socket.endpoint();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "socket.url".into(),
                message: format!("expected a ws:// or wss:// URL, got {endpoint:?}"),
            });
        } else if endpoint.starts_with("ws://") {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "socket.url".into(),
                message: "plain ws:// sends the auth token unencrypted".into(),
            });
        }

        if self.auth.token_env.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "auth.token_env".into(),
                message: "no token env var configured; handshake will be anonymous".into(),
            });
        }

        errors
    }

    /// Fail with [`Error::Config`](crate::Error::Config) listing every
    /// error-severity issue.  Warnings pass.
    pub fn ensure_valid(&self) -> crate::Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|issue| issue.severity == ConfigSeverity::Error)
            .map(|issue| format!("{}: {}", issue.field, issue.message))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(crate::Error::Config(errors.join("; ")))
        }
    }
}
