//! Serial line data transport.

use super::{DataTransport, TRANSPORT_SERIAL, poll_receive};
use cardlink_common::card::hex;
use cardlink_common::consts::DEFAULT_POLL_INTERVAL_MS;
use cardlink_common::error::TransportError;
use cardlink_common::reader::config::{SerialConfig, TransportConfig};
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, error, trace};

const PORT_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Byte channel over a serial port.
pub struct SerialPortDataTransport {
    config: SerialConfig,
    poll_interval: Duration,
    port: Option<Box<dyn SerialPort>>,
}

impl std::fmt::Debug for SerialPortDataTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortDataTransport")
            .field("config", &self.config)
            .field("poll_interval", &self.poll_interval)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

impl Default for SerialPortDataTransport {
    fn default() -> Self {
        Self::new(SerialConfig::new(default_port_name()))
    }
}

#[cfg(windows)]
fn default_port_name() -> &'static str {
    "COM1"
}

#[cfg(not(windows))]
fn default_port_name() -> &'static str {
    "/dev/ttyS0"
}

impl SerialPortDataTransport {
    /// Create a closed transport for the given port.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            port: None,
        }
    }

    /// Override the receive poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Serial ports visible on this host.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            error!("Cannot enumerate serial ports: {}", e);
            Vec::new()
        }
    }
}

fn read_available(port: &mut Box<dyn SerialPort>) -> Result<Vec<u8>, TransportError> {
    let pending = port
        .bytes_to_read()
        .map_err(|e| TransportError::Io(e.to_string()))? as usize;
    if pending == 0 {
        return Ok(Vec::new());
    }

    let mut data = vec![0u8; pending];
    match port.read(&mut data) {
        Ok(n) => {
            data.truncate(n);
            Ok(data)
        }
        Err(e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
        Err(e) => Err(TransportError::Io(e.to_string())),
    }
}

impl DataTransport for SerialPortDataTransport {
    fn transport_type(&self) -> &'static str {
        TRANSPORT_SERIAL
    }

    fn name(&self) -> String {
        self.config.port_name.clone()
    }

    fn connect(&mut self) -> bool {
        if self.port.is_some() {
            self.disconnect();
        }

        match serialport::new(&self.config.port_name, self.config.baud_rate)
            .timeout(PORT_IO_TIMEOUT)
            .open()
        {
            Ok(port) => {
                debug!(
                    "Serial transport opened {} at {} baud",
                    self.config.port_name, self.config.baud_rate
                );
                self.port = Some(port);
                true
            }
            Err(e) => {
                error!("Cannot open serial port {}: {}", self.config.port_name, e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial transport {} closed", self.config.port_name);
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) {
        let Some(port) = self.port.as_mut() else {
            error!(
                "Cannot send on serial port {}: not connected",
                self.config.port_name
            );
            return;
        };

        trace!("Send command: {}", hex(data));
        if let Err(e) = port.write_all(data).and_then(|()| port.flush()) {
            error!("Serial send failed: {}", e);
        }
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let poll_interval = self.poll_interval;
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        poll_receive(timeout, poll_interval, || read_available(port))
    }

    fn config(&self) -> TransportConfig {
        TransportConfig::Serial(self.config.clone())
    }

    fn set_config(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        match config {
            TransportConfig::Serial(serial) => {
                self.config = serial;
                Ok(())
            }
            other => Err(TransportError::InvalidConfig(format!(
                "serial transport cannot use {other:?}"
            ))),
        }
    }

    fn default_node_name(&self) -> &'static str {
        "SerialPortDataTransport"
    }
}
