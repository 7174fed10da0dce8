//! ECR-side connection settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zvt_core::{
    ConfigError, Password,
    constants::{
        DEFAULT_ACK_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CURRENCY_CODE,
        DEFAULT_READ_TIMEOUT_MS, DEFAULT_TERMINAL_PORT,
    },
    load_json,
};

/// Configuration for [`TerminalClient`](crate::TerminalClient).
///
/// ```
/// use zvt_network::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(r#"{"host": "10.0.0.7"}"#).unwrap();
/// assert_eq!(config.port, 20007);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for establishing the TCP connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Longest silence tolerated while a response group is running.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// How long the terminal has to ACK a command.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,
    /// Terminal password for registration and administrative commands.
    #[serde(default)]
    pub password: Password,
    #[serde(default = "default_currency_code")]
    pub currency_code: u16,
    /// Verbose logging.
    #[serde(default)]
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: default_read_timeout(),
            ack_timeout_ms: default_ack_timeout(),
            password: Password::default(),
            currency_code: default_currency_code(),
            debug: false,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: ClientConfig = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "host".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.currency_code > 9999 {
            return Err(ConfigError::Invalid {
                key: "currency_code".to_string(),
                reason: "must have at most 4 digits".to_string(),
            });
        }
        Ok(())
    }

    /// `host:port` for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_TERMINAL_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

fn default_ack_timeout() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_currency_code() -> u16 {
    DEFAULT_CURRENCY_CODE
}
