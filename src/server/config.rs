//! Runtime configuration
//!
//! Everything is read from the environment (a `.env` file is loaded by
//! `main` first). Each subsystem gets its own section so it can be built
//! and tested without the others.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Manager-interface (control plane) connection settings
#[derive(Debug, Clone)]
pub struct AmiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Fixed delay before each reconnect attempt
    pub reconnect_delay: Duration,
    /// Consecutive failed reconnects tolerated before giving up
    pub max_reconnect_attempts: u32,
    /// Upper bound on waiting for any action response
    pub action_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5038,
            username: String::new(),
            secret: String::new(),
            reconnect_delay: Duration::from_millis(5000),
            max_reconnect_attempts: 10,
            action_timeout: Duration::from_millis(10_000),
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

impl AmiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: std::env::var("AMI_HOST").unwrap_or(defaults.host),
            port: env_or("AMI_PORT", defaults.port)?,
            username: std::env::var("AMI_USERNAME").map_err(|_| ConfigError::Missing("AMI_USERNAME"))?,
            secret: std::env::var("AMI_SECRET").map_err(|_| ConfigError::Missing("AMI_SECRET"))?,
            reconnect_delay: Duration::from_millis(env_or("AMI_RECONNECT_DELAY_MS", 5000u64)?),
            max_reconnect_attempts: env_or("AMI_MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts)?,
            action_timeout: Duration::from_millis(env_or("AMI_ACTION_TIMEOUT_MS", 10_000u64)?),
            connect_timeout: defaults.connect_timeout,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// AudioSocket listener settings
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub host: String,
    pub port: u16,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9092,
        }
    }
}

impl MediaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: std::env::var("AUDIOSOCKET_HOST").unwrap_or(defaults.host),
            port: env_or("AUDIOSOCKET_PORT", defaults.port)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where answered campaign calls land in the dialplan
#[derive(Debug, Clone)]
pub struct DialerConfig {
    /// Channel technology used in dial strings, e.g. `PJSIP`
    pub channel_tech: String,
    pub context: String,
    pub exten: String,
    pub priority: u32,
    pub originate_timeout_ms: u64,
    /// Caller ID used when a campaign does not override it
    pub default_caller_id: Option<String>,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            channel_tech: "PJSIP".to_string(),
            context: "campaign-outbound".to_string(),
            exten: "s".to_string(),
            priority: 1,
            originate_timeout_ms: 30_000,
            default_caller_id: None,
        }
    }
}

impl DialerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            channel_tech: std::env::var("DIAL_CHANNEL_TECH").unwrap_or(defaults.channel_tech),
            context: std::env::var("DIALPLAN_CONTEXT").unwrap_or(defaults.context),
            exten: std::env::var("DIALPLAN_EXTEN").unwrap_or(defaults.exten),
            priority: env_or("DIALPLAN_PRIORITY", defaults.priority)?,
            originate_timeout_ms: env_or("ORIGINATE_TIMEOUT_MS", defaults.originate_timeout_ms)?,
            default_caller_id: std::env::var("DEFAULT_CALLER_ID").ok().filter(|v| !v.is_empty()),
        })
    }
}

/// Full application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ami: AmiConfig,
    pub media: MediaConfig,
    pub dialer: DialerConfig,
    pub http_port: u16,
    /// In-memory store is used when unset
    pub database_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            ami: AmiConfig::from_env()?,
            media: MediaConfig::from_env()?,
            dialer: DialerConfig::from_env()?,
            http_port: env_or("PORT", 3000u16)?,
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ami.username.is_empty() {
            return Err(ConfigError::Validation("AMI username is required".to_string()));
        }
        if self.ami.max_reconnect_attempts == 0 {
            return Err(ConfigError::Validation(
                "AMI_MAX_RECONNECT_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.ami.action_timeout.is_zero() {
            return Err(ConfigError::Validation("AMI action timeout must be positive".to_string()));
        }
        if self.media.port == self.http_port {
            return Err(ConfigError::Validation(
                "AudioSocket and HTTP ports must differ".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        _ => Ok(default),
    }
}
