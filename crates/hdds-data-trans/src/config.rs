// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration document model: parse a YAML file into a validated,
//! immutable `ConfigSnapshot`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_client_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("data-trans-{secs}")
}

fn default_keep_alive_secs() -> u16 {
    30
}

fn default_logger_level() -> String {
    "INFO".to_string()
}

fn default_max_size_mb() -> u64 {
    10
}

fn default_max_backups() -> u32 {
    5
}

/// Raw, pre-validation serde-facing document. Every section defaults so a
/// minimal file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub mqtt: RawMqttConfig,
    pub logger: RawLoggerConfig,
    pub storage: RawStorageConfig,
    pub transformers: BTreeMap<String, RawTransformerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawMqttConfig {
    pub broker: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topics: Vec<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
}

impl Default for RawMqttConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            client_id: default_client_id(),
            username: None,
            password: None,
            topics: Vec::new(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLoggerConfig {
    #[serde(default = "default_logger_level")]
    pub level: String,
    pub file_path: Option<String>,
    #[serde(default = "default_max_size_mb")]
    pub max_size: u64,
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    pub console: bool,
}

impl Default for RawLoggerConfig {
    fn default() -> Self {
        Self {
            level: default_logger_level(),
            file_path: None,
            max_size: default_max_size_mb(),
            max_backups: default_max_backups(),
            console: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStorageConfig {
    pub file: RawFileSinkConfig,
    pub database: RawDatabaseSinkConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFileSinkConfig {
    pub enabled: bool,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawDatabaseSinkConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub dsn: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTransformerEntry {
    pub script_path: Option<String>,
    pub script_code: Option<String>,
}

/// Validated, immutable snapshot of a configuration document. Reload produces
/// a brand-new snapshot; existing snapshots are never mutated in place.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub mqtt: MqttConfig,
    pub logger: LoggerConfig,
    pub storage: StorageConfig,
    pub transformers: BTreeMap<String, TransformerSource>,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topics: Vec<String>,
    pub keep_alive_secs: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: LogLevel,
    pub file_path: Option<String>,
    pub max_size_mb: u64,
    pub max_backups: u32,
    pub console: bool,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub file: Option<FileSinkConfig>,
    pub database: Option<DatabaseSinkConfig>,
}

#[derive(Debug, Clone)]
pub struct FileSinkConfig {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseDialect {
    MySql,
    Postgresql,
}

#[derive(Debug, Clone)]
pub struct DatabaseSinkConfig {
    pub dialect: DatabaseDialect,
    pub dsn: String,
}

/// Source of a device type's transform program. Inline `code` takes
/// precedence over `path` when both are set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformerSource {
    Inline(String),
    Path(String),
}

impl ConfigSnapshot {
    /// Load, parse, and validate a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate a YAML document already read into memory.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.mqtt.broker.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "[mqtt].broker must not be empty".to_string(),
            ));
        }

        let level = match raw.logger.level.to_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "INFO" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            other => {
                tracing::warn!(level = other, "unknown logger.level, defaulting to INFO");
                LogLevel::Info
            }
        };

        let file = if raw.storage.file.enabled {
            if raw.storage.file.path.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "[storage.file].path must not be empty when storage.file.enabled is true"
                        .to_string(),
                ));
            }
            Some(FileSinkConfig {
                path: raw.storage.file.path,
            })
        } else {
            None
        };

        let database = if raw.storage.database.enabled {
            let dialect = match raw.storage.database.kind.to_lowercase().as_str() {
                "mysql" => DatabaseDialect::MySql,
                "postgresql" | "postgres" => DatabaseDialect::Postgresql,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "[storage.database].type {other:?} is not one of mysql, postgresql"
                    )));
                }
            };
            if raw.storage.database.dsn.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "[storage.database].dsn must not be empty when storage.database.enabled is true"
                        .to_string(),
                ));
            }
            Some(DatabaseSinkConfig {
                dialect,
                dsn: raw.storage.database.dsn,
            })
        } else {
            None
        };

        let mut transformers = BTreeMap::new();
        for (device_type, entry) in raw.transformers {
            let source = match (entry.script_code, entry.script_path) {
                (Some(code), _) if !code.trim().is_empty() => TransformerSource::Inline(code),
                (_, Some(path)) if !path.trim().is_empty() => TransformerSource::Path(path),
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "[transformers.{device_type}] must set script_path or script_code"
                    )));
                }
            };
            transformers.insert(device_type, source);
        }

        Ok(ConfigSnapshot {
            mqtt: MqttConfig {
                broker: raw.mqtt.broker,
                client_id: raw.mqtt.client_id,
                username: raw.mqtt.username,
                password: raw.mqtt.password,
                topics: raw.mqtt.topics,
                keep_alive_secs: raw.mqtt.keep_alive_secs,
            },
            logger: LoggerConfig {
                level,
                file_path: raw.logger.file_path,
                max_size_mb: raw.logger.max_size,
                max_backups: raw.logger.max_backups,
                console: raw.logger.console,
            },
            storage: StorageConfig { file, database },
            transformers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_is_valid() {
        let yaml = "mqtt:\n  broker: tcp://localhost:1883\n";
        let snapshot = ConfigSnapshot::parse(yaml).unwrap();
        assert_eq!(snapshot.mqtt.broker, "tcp://localhost:1883");
        assert!(snapshot.mqtt.client_id.starts_with("data-trans-"));
        assert!(snapshot.transformers.is_empty());
        assert!(snapshot.storage.file.is_none());
        assert!(snapshot.storage.database.is_none());
    }

    #[test]
    fn missing_broker_is_rejected() {
        let yaml = "mqtt:\n  broker: \"\"\n";
        let err = ConfigSnapshot::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_database_dialect_is_rejected() {
        let yaml = "\
mqtt:
  broker: tcp://localhost:1883
storage:
  database:
    enabled: true
    type: oracle
    dsn: whatever
";
        let err = ConfigSnapshot::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn inline_script_code_takes_precedence_over_path() {
        let yaml = "\
mqtt:
  broker: tcp://localhost:1883
transformers:
  temperature:
    script_path: /does/not/matter.js
    script_code: \"function transform(x) { return x; }\"
";
        let snapshot = ConfigSnapshot::parse(yaml).unwrap();
        match snapshot.transformers.get("temperature").unwrap() {
            TransformerSource::Inline(code) => assert!(code.contains("function transform")),
            TransformerSource::Path(_) => panic!("expected inline source to win"),
        }
    }

    #[test]
    fn transformer_without_source_is_rejected() {
        let yaml = "\
mqtt:
  broker: tcp://localhost:1883
transformers:
  temperature: {}
";
        let err = ConfigSnapshot::parse(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_logger_level_defaults_to_info() {
        let yaml = "\
mqtt:
  broker: tcp://localhost:1883
logger:
  level: VERBOSE
";
        let snapshot = ConfigSnapshot::parse(yaml).unwrap();
        assert_eq!(snapshot.logger.level, LogLevel::Info);
    }
}
