//! Configuration system for the CDA agent
//!
//! Provides:
//! - Config file discovery (CLI flag, env var, standard paths)
//! - TOML parsing with serde
//! - Environment variable overrides
//! - Validation

use crate::reader::ReadPolicy;
use crate::sensor::SensorKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Complete agent configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Device identity and logging
    pub device: DeviceSettings,

    /// Sensor polling
    pub acquisition: AcquisitionSettings,

    /// Broker connection and offline queue
    pub broker: BrokerSettings,
}

/// Device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Unique identifier for this device
    pub device_id: String,

    /// Room the device is installed in
    pub room_id: String,

    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Battery level reported in device stats (percent)
    pub battery_level: u8,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            device_id: "CDA_02".to_string(),
            room_id: "living_room".to_string(),
            log_level: "info".to_string(),
            battery_level: 95,
        }
    }
}

/// Acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Time between cycle starts in milliseconds
    pub read_interval_ms: u64,

    /// Per-attempt deadline in milliseconds
    pub read_timeout_ms: u64,

    /// Additional attempts after a failed one
    pub max_retries: u32,

    /// Pause between attempts in milliseconds
    pub retry_delay_ms: u64,

    /// Enabled sensors: climate, light, soil
    pub sensors: Vec<String>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            read_interval_ms: 10_000,
            read_timeout_ms: 3_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            sensors: SensorKind::ALL.iter().map(|k| k.id().to_string()).collect(),
        }
    }
}

impl AcquisitionSettings {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Deadline and retry budget for each sensor read
    pub fn read_policy(&self) -> ReadPolicy {
        ReadPolicy {
            deadline: self.read_timeout(),
            max_retries: self.max_retries,
            retry_delay: self.retry_delay(),
        }
    }

    /// Parse the enabled sensor list
    pub fn sensor_kinds(&self) -> ConfigResult<Vec<SensorKind>> {
        self.sensors
            .iter()
            .map(|s| s.parse::<SensorKind>().map_err(ConfigError::ValidationError))
            .collect()
    }
}

/// Broker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Broker hostname
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Username
    pub username: Option<String>,

    /// Password
    pub password: Option<String>,

    /// Topic prefix; messages go to `{topic_prefix}/{device_id}`
    pub topic_prefix: String,

    /// Client id (default: `CDA_{device_id}`)
    pub client_id: Option<String>,

    /// Use TLS
    pub tls: bool,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,

    /// Quality of service level: 0, 1 or 2
    pub qos: u8,

    /// Max messages held while disconnected
    pub queue_capacity: usize,

    /// First reconnect delay in milliseconds
    pub reconnect_min_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    pub reconnect_max_ms: u64,

    /// Connection handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8883,
            username: None,
            password: None,
            topic_prefix: "SensorData".to_string(),
            client_id: None,
            tls: true,
            keep_alive_secs: 60,
            qos: 1,
            queue_capacity: 100,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 120_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl BrokerSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Configuration loader
#[derive(Default)]
pub struct ConfigLoader {
    /// Path to config file (if specified via CLI)
    cli_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader
    pub fn new() -> Self {
        Self { cli_path: None }
    }

    /// Set the config path from CLI argument
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Load configuration with the following precedence:
    /// 1. CLI --config flag
    /// 2. CDA_CONFIG environment variable
    /// 3. ~/.config/cda-agent/config.toml
    /// 4. /etc/cda-agent/config.toml
    /// 5. Default values
    pub fn load(&self) -> ConfigResult<AgentConfig> {
        let mut config = match self.find_config_file() {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)?
            }
            None => {
                debug!("No config file found, using defaults");
                AgentConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config);
        Self::validate(&config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!("CLI config path does not exist: {}", path.display());
        }

        if let Ok(env_path) = std::env::var("CDA_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
            warn!("CDA_CONFIG path does not exist: {}", env_path);
        }

        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Some(path);
            }
        }

        #[cfg(unix)]
        {
            let path = PathBuf::from("/etc/cda-agent/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> ConfigResult<AgentConfig> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(config: &mut AgentConfig) {
        Self::apply_overrides(config, |key| std::env::var(key).ok());
    }

    fn apply_overrides(config: &mut AgentConfig, var: impl Fn(&str) -> Option<String>) {
        // Device settings
        if let Some(val) = var("DEVICE_ID") {
            config.device.device_id = val;
        }
        if let Some(val) = var("ROOM_ID") {
            config.device.room_id = val;
        }
        if let Some(val) = var("CDA_LOG_LEVEL") {
            config.device.log_level = val;
        }

        // Acquisition settings
        if let Some(val) = var("CDA_READ_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                config.acquisition.read_interval_ms = ms;
            }
        }

        // Broker settings
        if let Some(val) = var("CDA_MQTT_HOST") {
            config.broker.host = val;
        }
        if let Some(val) = var("CDA_MQTT_PORT") {
            if let Ok(port) = val.parse() {
                config.broker.port = port;
            }
        }
        if let Some(val) = var("CDA_MQTT_USERNAME") {
            config.broker.username = Some(val);
        }
        if let Some(val) = var("CDA_MQTT_PASSWORD") {
            config.broker.password = Some(val);
        }
        if let Some(val) = var("CDA_TOPIC_PREFIX") {
            config.broker.topic_prefix = val;
        }
    }

    /// Validate configuration
    pub fn validate(config: &AgentConfig) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.device.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.device.log_level, valid_levels
            )));
        }

        if config.device.device_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Device id cannot be empty".to_string(),
            ));
        }

        if config.device.battery_level > 100 {
            return Err(ConfigError::ValidationError(format!(
                "Battery level {} exceeds 100",
                config.device.battery_level
            )));
        }

        if config.acquisition.read_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "Read timeout cannot be 0".to_string(),
            ));
        }

        config.acquisition.sensor_kinds()?;

        if config.broker.port == 0 {
            return Err(ConfigError::ValidationError(
                "Broker port cannot be 0".to_string(),
            ));
        }

        if config.broker.qos > 2 {
            return Err(ConfigError::ValidationError(format!(
                "Invalid QoS: {}. Must be 0, 1 or 2",
                config.broker.qos
            )));
        }

        if config.broker.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "Queue capacity must be at least 1".to_string(),
            ));
        }

        if config.broker.reconnect_min_ms > config.broker.reconnect_max_ms {
            return Err(ConfigError::ValidationError(format!(
                "Reconnect minimum ({}ms) exceeds maximum ({}ms)",
                config.broker.reconnect_min_ms, config.broker.reconnect_max_ms
            )));
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save(config: &AgentConfig, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| {
            ConfigError::ValidationError(format!("Failed to serialize config: {}", e))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        info!("Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Get the default config file path for the current platform
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cda-agent").join("config.toml"))
    }
}
