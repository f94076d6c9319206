//! TOML configuration file loading
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [store]
//! url = "redis://127.0.0.1:6379"
//!
//! [producer]
//! queue_name = "push_stream"
//! batch_size = 200
//!
//! [consumer]
//! consumer_name = "consumer_1"
//! block_ms = 2000
//! ```
//!
//! Every table and field is optional. Command-line flags are applied on top
//! with [`FileConfig::apply_args`].

use super::args::{Args, Command};
use crate::core::error_handling::ContextualError;
use crate::queue::{ConsumerOptions, ProducerOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MEMORY_STORE: &str = "memory";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
    pub color: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: MEMORY_STORE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub log: LogConfig,
    pub store: StoreConfig,
    pub producer: ProducerOptions,
    pub consumer: ConsumerOptions,
}

/// Configuration file that could not be used
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ConfigFileError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ConfigFileError {
    fn missing(path: &Path) -> Self {
        Self {
            message: format!(
                "The specified configuration file does not exist: {}",
                path.display()
            ),
            source: None,
        }
    }

    fn read(path: &Path, source: std::io::Error) -> Self {
        Self {
            message: format!("Error reading configuration file {}: {}", path.display(), source),
            source: Some(Box::new(source)),
        }
    }

    fn parse(path: &Path, source: toml::de::Error) -> Self {
        Self {
            message: format!("Error parsing configuration file {}: {}", path.display(), source),
            source: Some(Box::new(source)),
        }
    }
}

impl ContextualError for ConfigFileError {
    fn is_user_actionable(&self) -> bool {
        true
    }

    fn user_message(&self) -> Option<&str> {
        Some(&self.message)
    }
}

/// `<config dir>/Disruptor/disruptor.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Disruptor").join("disruptor.toml"))
}

impl FileConfig {
    /// Load `explicit` (which must exist) or the default file if present;
    /// with neither, every setting takes its default
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigFileError> {
        let path = match explicit {
            Some(path) if !path.exists() => return Err(ConfigFileError::missing(path)),
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    log::debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigFileError::read(&path, e))?;
        let config = Self::parse(&contents).map_err(|e| ConfigFileError::parse(&path, e))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Command-line flags win over file values
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(url) = &args.store {
            self.store.url = url.clone();
        }
        if let Some(queue) = &args.queue {
            self.producer.queue_name = queue.clone();
            self.consumer.queue_name = queue.clone();
        }
        if let Some(shards) = args.shards {
            self.producer.shard_count = shards;
            self.consumer.shard_count = shards;
        }
        if let Command::Consume {
            consumer: Some(name),
            ..
        } = &args.command
        {
            self.consumer.consumer_name = name.clone();
        }
        if args.log_level.is_some() {
            self.log.level = args.log_level.clone();
        }
        if args.log_format.is_some() {
            self.log.format = args.log_format.clone();
        }
        if args.log_file.is_some() {
            self.log.file = args.log_file_path();
        }
        if let Some(color) = args.color_choice() {
            self.log.color = Some(color);
        }
    }
}
