//! Data transports.
//!
//! A data transport is a byte channel between the host and a physical or
//! networked reader:
//!
//! - [`serial`] - serial line (`serialport`)
//! - [`tcp`] - TCP socket
//! - [`udp`] - UDP socket
//!
//! All transports share the same receive contract: block until at least one
//! byte is available or the timeout elapses, polling the channel at a fixed
//! interval, and return exactly the bytes available at that poll. Framing is
//! left to the caller.

pub mod serial;
pub mod tcp;
pub mod udp;

pub use serial::SerialPortDataTransport;
pub use tcp::TcpDataTransport;
pub use udp::UdpDataTransport;

use cardlink_common::card::hex;
use cardlink_common::config::ConfigError;
use cardlink_common::error::TransportError;
use cardlink_common::reader::config::TransportConfig;
use std::time::Duration;
use tracing::trace;

/// Transport name of the serial line transport.
pub const TRANSPORT_SERIAL: &str = "Serial";
/// Transport name of the UDP transport.
pub const TRANSPORT_UDP: &str = "UDP";
/// Transport name of the TCP transport.
pub const TRANSPORT_TCP: &str = "TCP";

/// Trait implemented by every byte channel.
///
/// # Contract
///
/// - `connect()` closes an already open channel before reopening it and
///   reports failure through its return value.
/// - `send()` on a closed channel is a logged no-op.
/// - `receive(timeout)` with `Duration::ZERO` waits forever.
pub trait DataTransport: Send {
    /// Transport kind (`"Serial"`, `"TCP"`, `"UDP"`).
    fn transport_type(&self) -> &'static str;

    /// Human-readable channel name (port name or address).
    fn name(&self) -> String;

    /// Open the channel.
    fn connect(&mut self) -> bool;

    /// Close the channel. No-op if not connected.
    fn disconnect(&mut self);

    /// True while the channel is open.
    fn is_connected(&self) -> bool;

    /// Write all bytes to the channel.
    fn send(&mut self, data: &[u8]);

    /// Wait for bytes, see the module documentation.
    ///
    /// # Errors
    /// `TransportError::Timeout` if nothing arrived in time,
    /// `TransportError::NotConnected` if the channel is closed.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Current addressing configuration.
    fn config(&self) -> TransportConfig;

    /// Replace the addressing configuration. Takes effect on next `connect()`.
    ///
    /// # Errors
    /// `TransportError::InvalidConfig` if the configuration is for another transport kind.
    fn set_config(&mut self, config: TransportConfig) -> Result<(), TransportError>;

    /// Name of the node written by `serialize()`.
    fn default_node_name(&self) -> &'static str;

    /// Write the addressing configuration as a child node of `parent`.
    ///
    /// # Errors
    /// `ConfigError::ParseError` if the configuration cannot be represented.
    fn serialize(&self, parent: &mut toml::Table) -> Result<(), ConfigError> {
        let node = toml::Value::try_from(self.config())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        parent.insert(self.default_node_name().to_string(), node);
        Ok(())
    }

    /// Restore the addressing configuration from a node written by `serialize()`.
    ///
    /// # Errors
    /// `ConfigError::ParseError` for a malformed node,
    /// `ConfigError::ValidationError` for a node of another transport kind.
    fn unserialize(&mut self, node: &toml::Value) -> Result<(), ConfigError> {
        let config: TransportConfig = node
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;
        self.set_config(config)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

/// Names of the built-in transports.
pub fn available_data_transports() -> Vec<&'static str> {
    vec![TRANSPORT_SERIAL, TRANSPORT_UDP, TRANSPORT_TCP]
}

/// Create a built-in transport by name with default addressing.
pub fn create_data_transport(name: &str) -> Option<Box<dyn DataTransport>> {
    match name {
        TRANSPORT_SERIAL => Some(Box::new(SerialPortDataTransport::default())),
        TRANSPORT_UDP => Some(Box::new(UdpDataTransport::default())),
        TRANSPORT_TCP => Some(Box::new(TcpDataTransport::default())),
        _ => None,
    }
}

/// Create a transport from its configuration.
pub fn transport_from_config(
    config: &TransportConfig,
    poll_interval: Duration,
) -> Box<dyn DataTransport> {
    match config {
        TransportConfig::Serial(serial) => Box::new(
            SerialPortDataTransport::new(serial.clone()).with_poll_interval(poll_interval),
        ),
        TransportConfig::Tcp(net) => {
            Box::new(TcpDataTransport::new(net.clone()).with_poll_interval(poll_interval))
        }
        TransportConfig::Udp(net) => {
            Box::new(UdpDataTransport::new(net.clone()).with_poll_interval(poll_interval))
        }
    }
}

/// Poll `read_available` until it yields bytes or `timeout` elapses.
///
/// The elapsed time is accounted in whole poll intervals. A zero timeout
/// polls forever.
pub(crate) fn poll_receive<F>(
    timeout: Duration,
    poll_interval: Duration,
    mut read_available: F,
) -> Result<Vec<u8>, TransportError>
where
    F: FnMut() -> Result<Vec<u8>, TransportError>,
{
    let mut waited = Duration::ZERO;
    let mut data = read_available()?;

    while data.is_empty() && (timeout.is_zero() || waited < timeout) {
        std::thread::sleep(poll_interval);
        waited += poll_interval;
        data = read_available()?;
    }

    if data.is_empty() {
        return Err(TransportError::Timeout {
            elapsed: waited,
            requested: timeout,
        });
    }

    trace!("Command response: {}", hex(&data));
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_transports() {
        assert_eq!(available_data_transports(), vec!["Serial", "UDP", "TCP"]);
    }

    #[test]
    fn test_create_data_transport_by_name() {
        let tcp = create_data_transport("TCP").expect("tcp");
        assert_eq!(tcp.transport_type(), TRANSPORT_TCP);
        assert!(!tcp.is_connected());
        assert!(create_data_transport("Bluetooth").is_none());
    }

    #[test]
    fn test_poll_receive_times_out_with_requested_duration() {
        let result = poll_receive(Duration::from_millis(40), Duration::from_millis(10), || {
            Ok(Vec::new())
        });
        match result {
            Err(TransportError::Timeout { elapsed, requested }) => {
                assert_eq!(requested, Duration::from_millis(40));
                assert_eq!(elapsed, Duration::from_millis(40));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_poll_receive_returns_first_available_chunk() {
        let mut polls = 0;
        let result = poll_receive(Duration::from_millis(100), Duration::from_millis(5), || {
            polls += 1;
            Ok(match polls {
                3 => vec![0x90, 0x00],
                4 => vec![0xFF],
                _ => Vec::new(),
            })
        })
        .expect("data");
        assert_eq!(result, vec![0x90, 0x00]);
        assert_eq!(polls, 3);
    }

    #[test]
    fn test_poll_receive_propagates_channel_error() {
        let result = poll_receive(Duration::from_millis(100), Duration::from_millis(5), || {
            Err(TransportError::NotConnected)
        });
        assert_eq!(result, Err(TransportError::NotConnected));
    }
}
