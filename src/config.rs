use dp564_protocol::{ClientConfig, DEFAULT_PORT};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "192.168.0.11";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: String,
        value: String,
        reason: String,
    },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Settings for the remote, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub ack_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: client.connect_timeout,
            ack_timeout: client.ack_timeout,
            heartbeat_interval: client.heartbeat_interval,
        }
    }
}

impl RemoteConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            host: Self::read("DP564_HOST")?.unwrap_or(defaults.host),
            port: Self::read("DP564_PORT")?.unwrap_or(defaults.port),
            connect_timeout: Self::read_secs("DP564_CONNECT_TIMEOUT_SECS")?
                .unwrap_or(defaults.connect_timeout),
            ack_timeout: Self::read_secs("DP564_ACK_TIMEOUT_SECS")?
                .unwrap_or(defaults.ack_timeout),
            heartbeat_interval: Self::read_secs("DP564_HEARTBEAT_SECS")?
                .unwrap_or(defaults.heartbeat_interval),
        })
    }

    /// Parse an optional variable; unset or empty means "use the default"
    fn read<T>(var: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = match env::var(var) {
            Ok(value) => value,
            Err(env::VarError::NotPresent) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if value.trim().is_empty() {
            return Ok(None);
        }

        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                var: var.to_string(),
                value: value.clone(),
                reason: e.to_string(),
            })
    }

    fn read_secs(var: &str) -> Result<Option<Duration>, ConfigError> {
        match Self::read::<u64>(var)? {
            Some(0) => Err(ConfigError::InvalidValue {
                var: var.to_string(),
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            }),
            secs => Ok(secs.map(Duration::from_secs)),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            address: self.address(),
            connect_timeout: self.connect_timeout,
            ack_timeout: self.ack_timeout,
            heartbeat_interval: self.heartbeat_interval,
            ..ClientConfig::default()
        }
    }
}

/// Load configuration with helpful error messages
pub fn load_config() -> Result<RemoteConfig, ConfigError> {
    match RemoteConfig::load() {
        Ok(config) => {
            log::info!("Loaded configuration for DP564 at {}", config.address());
            Ok(config)
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            log::error!("Check the DP564_* variables in your environment or .env file");
            Err(e)
        }
    }
}
