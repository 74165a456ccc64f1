//! Configuration module
//!
//! Handles loading and saving DragonBus node configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::{BodyFormat, MAX_FRAME_SIZE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Topic settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Request/response settings
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Wire encoding settings
    #[serde(default)]
    pub codec: CodecConfig,
}

/// General configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Unique node identifier (generated per process if not set)
    pub node_id: Option<Uuid>,
    /// Human-readable name for this node
    pub name: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            name: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            verbose: false,
        }
    }
}

/// Topic layout on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Topic every node and service listens on
    #[serde(default = "default_broadcast_topic")]
    pub broadcast_topic: String,
    /// Prefix of the per-node topic, followed by the node id
    #[serde(default = "default_node_topic_prefix")]
    pub node_topic_prefix: String,
    /// Prefix of the per-node reply topic, followed by the node id
    #[serde(default = "default_reply_topic_prefix")]
    pub reply_topic_prefix: String,
    /// Buffered frames per subscription
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_broadcast_topic() -> String {
    "dragonbus.broadcast".to_string()
}

fn default_node_topic_prefix() -> String {
    "dragonbus.node.".to_string()
}

fn default_reply_topic_prefix() -> String {
    "dragonbus.reply.".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            broadcast_topic: default_broadcast_topic(),
            node_topic_prefix: default_node_topic_prefix(),
            reply_topic_prefix: default_reply_topic_prefix(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BusConfig {
    pub fn node_topic(&self, node_id: &Uuid) -> String {
        format!("{}{}", self.node_topic_prefix, node_id)
    }

    pub fn reply_topic(&self, node_id: &Uuid) -> String {
        format!("{}{}", self.reply_topic_prefix, node_id)
    }
}

/// Request/response configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Timeout applied when a caller does not pass one (ms)
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// How many settled correlation ids are remembered to drop late replies
    #[serde(default = "default_settled_history")]
    pub settled_history: usize,
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_settled_history() -> usize {
    4096
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            settled_history: default_settled_history(),
        }
    }
}

impl RpcConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Wire encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Body encoding used for outgoing messages
    #[serde(default)]
    pub body_format: BodyFormat,
    /// Decode the bare tags of the first catalog revision
    #[serde(default)]
    pub accept_legacy_tags: bool,
    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_max_frame_size() -> usize {
    MAX_FRAME_SIZE
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            body_format: BodyFormat::default(),
            accept_legacy_tags: false,
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("dragonbus/config.toml")),
            Some(PathBuf::from("./dragonbus.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.bus.broadcast_topic.is_empty() {
            return Err(ConfigError::Invalid("bus.broadcast_topic is empty".into()));
        }
        if self.bus.channel_capacity == 0 {
            return Err(ConfigError::Invalid("bus.channel_capacity must be positive".into()));
        }
        if self.rpc.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid("rpc.default_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Get the node ID, generating one if not set
    pub fn node_id(&self) -> Uuid {
        self.general.node_id.unwrap_or_else(Uuid::new_v4)
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    let config = Config {
        general: GeneralConfig {
            node_id: Some(Uuid::nil()),
            name: "lobby-1".to_string(),
            verbose: false,
        },
        codec: CodecConfig {
            accept_legacy_tags: true,
            ..Default::default()
        },
        ..Default::default()
    };

    Ok(toml::to_string_pretty(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bus.broadcast_topic, "dragonbus.broadcast");
        assert_eq!(config.rpc.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.codec.body_format, BodyFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let mut config = Config::default();
        config.codec.body_format = BodyFormat::Bincode;
        let file = NamedTempFile::new().unwrap();

        config.save(file.path()).unwrap();

        let loaded = Config::load(file.path()).unwrap();
        assert_eq!(loaded.codec.body_format, BodyFormat::Bincode);
        assert_eq!(loaded.rpc.settled_history, config.rpc.settled_history);
    }

    #[test]
    fn test_sample_config() {
        let sample = generate_sample_config().unwrap();
        let parsed: Config = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.general.name, "lobby-1");
        assert!(parsed.codec.accept_legacy_tags);
    }

    #[test]
    fn test_partial_config() {
        let parsed: Config = toml::from_str(
            r#"
            [general]
            name = "queue-service"

            [rpc]
            default_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(parsed.rpc.default_timeout_ms, 250);
        assert_eq!(parsed.bus.channel_capacity, 1024);
        assert_eq!(parsed.general.node_id, None);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.rpc.default_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_topics() {
        let bus = BusConfig::default();
        let id = Uuid::nil();
        assert_eq!(
            bus.reply_topic(&id),
            "dragonbus.reply.00000000-0000-0000-0000-000000000000"
        );
        assert!(bus.node_topic(&id).starts_with("dragonbus.node."));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }
}
