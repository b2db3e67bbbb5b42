//! Configuration
//!
//! YAML ファイル + 環境変数（`TASKFLOW__QUEUE__TOPIC` のように `__` 区切り）を
//! `config` クレートで重ねて読み込みます。全フィールドにデフォルトがあります。

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat, Source};
use serde::Deserialize;
use thiserror::Error;

use crate::ports::RequiredAcks;

/// Env var holding the config file path.
pub const CONFIG_PATH_ENV: &str = "TASKFLOW_CONFIG";

const ENV_PREFIX: &str = "TASKFLOW";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub env: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "taskflow".to_string(),
            env: "local".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub topic: String,
    pub group_id: String,
    pub publish_timeout_ms: u64,
    pub required_acks: RequiredAcks,
}

impl QueueConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: "tasks".to_string(),
            group_id: "task-workers".to_string(),
            publish_timeout_ms: 5_000,
            required_acks: RequiredAcks::Leader,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// How long the stand-in work holds each message.
    pub processing_delay_ms: u64,
}

impl WorkerConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            processing_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `taskflow_core=debug`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load `path` (if any) layered under `TASKFLOW__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::layered(path.map(|p| File::from(p).required(true)), env_source())
    }

    /// `file` first, then `env` on top.
    fn layered<F>(file: Option<F>, env: Environment) -> Result<Self, ConfigError>
    where
        F: Source + Send + Sync + 'static,
    {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let cfg: AppConfig = builder.add_source(env).build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.topic.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.topic must not be empty".into()));
        }
        if self.queue.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid("queue.group_id must not be empty".into()));
        }
        if self.queue.publish_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "queue.publish_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
