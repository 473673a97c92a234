//! Executor configuration.
//!
//! Every setting has a default, so the executor runs without a file. A TOML
//! file may override any subset, and command-line flags override the file.
//!
//! # Example
//!
//! ```toml
//! [server]
//! listen = "127.0.0.1:26860"
//!
//! [contract]
//! path = "contracts/billing.json"
//! poll_interval_secs = 30
//!
//! [engine]
//! invocation_timeout_ms = 5000
//! port_timeout_ms = 1000
//!
//! [audit]
//! sink = "json_lines"
//! path = "audit.jsonl"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address for the executor.
const DEFAULT_LISTEN: &str = "0.0.0.0:26860";

/// Default contract poll interval: 30 seconds.
const DEFAULT_POLL_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("could not read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub server: ServerSettings,
    pub contract: ContractSettings,
    pub engine: EngineSettings,
    pub audit: AuditSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

/// `[contract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractSettings {
    /// JSON contract file to load and poll.
    pub path: PathBuf,
    /// Version token to use instead of the file's content hash.
    pub etag: Option<String>,
    /// Seconds between polls. `0` disables polling.
    pub poll_interval_secs: u64,
}

impl Default for ContractSettings {
    fn default() -> Self {
        ContractSettings {
            path: PathBuf::from("contracts/billing.json"),
            etag: None,
            poll_interval_secs: DEFAULT_POLL_SECS,
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Deadline for a whole invocation, measured from request arrival.
    pub invocation_timeout_ms: Option<u64>,
    /// Upper bound on each port fact fetch.
    pub port_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    #[default]
    Memory,
    JsonLines,
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub sink: AuditSinkKind,
    /// Output file for the `json_lines` sink.
    pub path: Option<PathBuf>,
}

// ── Functions ─────────────────────────────────────────────────────────────────

impl ExecutorConfig {
    /// Read `path` if given, else return the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigFileError> {
        match path {
            Some(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Self::from_toml_str(&content).map_err(|source| ConfigFileError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if self.server.listen.trim().is_empty() {
            return Err(ConfigFileError::Invalid(
                "server.listen must not be empty".to_string(),
            ));
        }
        if self.audit.sink == AuditSinkKind::JsonLines && self.audit.path.is_none() {
            return Err(ConfigFileError::Invalid(
                "audit.path is required for the json_lines sink".to_string(),
            ));
        }
        if self.contract.etag.as_deref().is_some_and(|e| e.trim().is_empty()) {
            return Err(ConfigFileError::Invalid(
                "contract.etag must not be blank".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        match self.contract.poll_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.engine.invocation_timeout_ms.map(Duration::from_millis)
    }

    pub fn port_timeout(&self) -> Option<Duration> {
        self.engine.port_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_need_no_file() {
        let config = ExecutorConfig::load(None).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:26860");
        assert_eq!(config.contract.path, PathBuf::from("contracts/billing.json"));
        assert_eq!(config.poll_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.audit.sink, AuditSinkKind::Memory);
        assert!(config.invocation_timeout().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let config = ExecutorConfig::from_toml_str(
            r#"
            [contract]
            etag = "pinned"
            poll_interval_secs = 0

            [engine]
            port_timeout_ms = 250

            [audit]
            sink = "json_lines"
            path = "audit.jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:26860");
        assert_eq!(config.contract.etag.as_deref(), Some("pinned"));
        assert!(config.poll_interval().is_none());
        assert_eq!(config.port_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.audit.sink, AuditSinkKind::JsonLines);
        config.validate().unwrap();
    }

    #[test]
    fn json_lines_sink_needs_a_path() {
        let config = ExecutorConfig::from_toml_str("[audit]\nsink = \"json_lines\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigFileError::Invalid(_))));
    }

    #[test]
    fn unreadable_and_malformed_files_report_path() {
        let err = ExecutorConfig::load(Some(Path::new("/nonexistent/executor.toml"))).unwrap_err();
        assert!(matches!(err, ConfigFileError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/executor.toml"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nlisten = 1").unwrap();
        let err = ExecutorConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigFileError::Parse { .. }));
    }
}
