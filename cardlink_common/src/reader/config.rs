//! Reader unit and data transport configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [[readers]]
//! name = "entrance"
//! provider = "Remote"
//! share_mode = "exclusive"
//! disconnect_action = "reset"
//!
//! [readers.transport]
//! type = "tcp"
//! ip_address = "10.0.0.5"
//! port = 7000
//! ```

use crate::config::ConfigError;
use crate::consts::{
    DEFAULT_BAUD_RATE, DEFAULT_IP_ADDRESS, DEFAULT_NETWORK_PORT, DEFAULT_POLL_INTERVAL_MS,
};
use crate::reader::types::{DisconnectAction, ShareMode};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

fn default_ip_address() -> String {
    DEFAULT_IP_ADDRESS.to_string()
}

fn default_network_port() -> u16 {
    DEFAULT_NETWORK_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_provider() -> String {
    "PCSC".to_string()
}

/// Addressing of a TCP or UDP reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Reader IP address.
    #[serde(default = "default_ip_address")]
    pub ip_address: String,
    /// Reader port.
    #[serde(default = "default_network_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ip_address: default_ip_address(),
            port: default_network_port(),
        }
    }
}

impl NetworkConfig {
    /// Create a network configuration.
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        Self {
            ip_address: ip_address.into(),
            port,
        }
    }

    /// Parse the configured address.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the address is not an IP literal.
    pub fn ip(&self) -> Result<IpAddr, ConfigError> {
        self.ip_address.parse().map_err(|e| {
            ConfigError::ValidationError(format!("invalid ip_address '{}': {e}", self.ip_address))
        })
    }
}

/// Addressing of a serial-line reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port_name: String,
    /// Line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl SerialConfig {
    /// Create a serial configuration with the default line speed.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: default_baud_rate(),
        }
    }
}

/// Data transport configuration, tagged by transport kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Serial line.
    Serial(SerialConfig),
    /// TCP socket.
    Tcp(NetworkConfig),
    /// UDP socket.
    Udp(NetworkConfig),
}

impl TransportConfig {
    /// Validate the addressing fields.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for an empty port name,
    /// an unparsable IP address or port zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TransportConfig::Serial(serial) => {
                if serial.port_name.is_empty() {
                    return Err(ConfigError::ValidationError(
                        "serial port_name cannot be empty".to_string(),
                    ));
                }
                if serial.baud_rate == 0 {
                    return Err(ConfigError::ValidationError(
                        "serial baud_rate must be positive".to_string(),
                    ));
                }
            }
            TransportConfig::Tcp(net) | TransportConfig::Udp(net) => {
                net.ip()?;
                if net.port == 0 {
                    return Err(ConfigError::ValidationError(
                        "network port must be positive".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Configuration of one reader unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderUnitConfig {
    /// Human-readable unit name.
    pub name: String,

    /// Reader provider type (`PCSC`, `Remote`, `Simulation` or a plugin type).
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Physical reader to bind to. `None` listens on every reader of the provider.
    #[serde(default)]
    pub reader: Option<String>,

    /// Share mode used by `connect()`.
    #[serde(default)]
    pub share_mode: ShareMode,

    /// Card action used by `disconnect()`.
    #[serde(default)]
    pub disconnect_action: DisconnectAction,

    /// Interval between presence or availability polls, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Forced card type. `None` resolves the type from the ATR.
    #[serde(default)]
    pub card_type: Option<String>,

    /// Data transport of a networked or serial reader.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

impl ReaderUnitConfig {
    /// Create a configuration with default settings.
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            reader: None,
            share_mode: ShareMode::default(),
            disconnect_action: DisconnectAction::default(),
            poll_interval_ms: default_poll_interval_ms(),
            card_type: None,
            transport: None,
        }
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if the name or provider is empty,
    /// the poll interval is zero, or the transport section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "reader name cannot be empty".to_string(),
            ));
        }
        if self.provider.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "reader '{}': provider cannot be empty",
                self.name
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(format!(
                "reader '{}': poll_interval_ms must be positive",
                self.name
            )));
        }
        if let Some(transport) = &self.transport {
            transport.validate()?;
        }
        Ok(())
    }
}
