//! TCP data transport.

use super::{DataTransport, TRANSPORT_TCP, poll_receive};
use cardlink_common::card::hex;
use cardlink_common::consts::DEFAULT_POLL_INTERVAL_MS;
use cardlink_common::error::TransportError;
use cardlink_common::reader::config::{NetworkConfig, TransportConfig};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_CHUNK: usize = 1024;

/// Byte channel over a TCP connection.
#[derive(Debug)]
pub struct TcpDataTransport {
    config: NetworkConfig,
    poll_interval: Duration,
    stream: Option<TcpStream>,
}

impl Default for TcpDataTransport {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl TcpDataTransport {
    /// Create a closed transport for the given endpoint.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            stream: None,
        }
    }

    /// Override the receive poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Configured endpoint.
    pub fn network_config(&self) -> &NetworkConfig {
        &self.config
    }

    fn endpoint(&self) -> Result<SocketAddr, TransportError> {
        let ip = self
            .config
            .ip()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(SocketAddr::new(ip, self.config.port))
    }
}

/// Drain everything currently buffered on the socket without blocking.
fn read_available(stream: &mut TcpStream) -> Result<Vec<u8>, TransportError> {
    stream
        .set_nonblocking(true)
        .map_err(|e| TransportError::Io(e.to_string()))?;

    let mut data = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    let result = loop {
        match stream.read(&mut chunk) {
            Ok(0) if data.is_empty() => {
                break Err(TransportError::Io("connection closed by peer".to_string()));
            }
            Ok(0) => break Ok(()),
            Ok(n) => data.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(TransportError::Io(e.to_string())),
        }
    };

    stream
        .set_nonblocking(false)
        .map_err(|e| TransportError::Io(e.to_string()))?;
    result.map(|()| data)
}

impl DataTransport for TcpDataTransport {
    fn transport_type(&self) -> &'static str {
        TRANSPORT_TCP
    }

    fn name(&self) -> String {
        format!("{}:{}", self.config.ip_address, self.config.port)
    }

    fn connect(&mut self) -> bool {
        if self.stream.is_some() {
            self.disconnect();
        }

        let endpoint = match self.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!("Cannot connect TCP transport: {}", e);
                return false;
            }
        };

        match TcpStream::connect_timeout(&endpoint, CONNECT_TIMEOUT) {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Cannot disable Nagle on {}: {}", endpoint, e);
                }
                debug!("TCP transport connected to {}", endpoint);
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                error!("Cannot connect TCP transport to {}: {}", endpoint, e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone.
            let _ = stream.shutdown(Shutdown::Both);
            debug!("TCP transport {} disconnected", self.name());
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) {
        let Some(stream) = self.stream.as_mut() else {
            error!("Cannot send on TCP transport {}: not connected", self.name());
            return;
        };

        trace!("Send command: {}", hex(data));
        if let Err(e) = stream.write_all(data).and_then(|()| stream.flush()) {
            error!("TCP send failed: {}", e);
        }
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let poll_interval = self.poll_interval;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        poll_receive(timeout, poll_interval, || read_available(stream))
    }

    fn config(&self) -> TransportConfig {
        TransportConfig::Tcp(self.config.clone())
    }

    fn set_config(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        match config {
            TransportConfig::Tcp(net) => {
                self.config = net;
                Ok(())
            }
            other => Err(TransportError::InvalidConfig(format!(
                "TCP transport cannot use {other:?}"
            ))),
        }
    }

    fn default_node_name(&self) -> &'static str {
        "TcpDataTransport"
    }
}

impl Drop for TcpDataTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardlink_common::consts::{DEFAULT_IP_ADDRESS, DEFAULT_NETWORK_PORT};
    use std::net::TcpListener;

    #[test]
    fn test_default_endpoint() {
        let transport = TcpDataTransport::default();
        assert_eq!(
            transport.name(),
            format!("{DEFAULT_IP_ADDRESS}:{DEFAULT_NETWORK_PORT}")
        );
    }

    #[test]
    fn test_receive_without_connection() {
        let mut transport = TcpDataTransport::default();
        assert_eq!(
            transport.receive(Duration::from_millis(10)),
            Err(TransportError::NotConnected)
        );
    }

    #[test]
    fn test_send_without_connection_is_noop() {
        let mut transport = TcpDataTransport::default();
        transport.send(&[0x00, 0xA4]);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_rejects_udp_config() {
        let mut transport = TcpDataTransport::default();
        let result = transport.set_config(TransportConfig::Udp(NetworkConfig::default()));
        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }

    #[test]
    fn test_connect_twice_replaces_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let mut transport = TcpDataTransport::new(NetworkConfig::new("127.0.0.1", port));
        assert!(transport.connect());
        assert!(transport.connect());
        assert!(transport.is_connected());

        transport.disconnect();
        assert!(!transport.is_connected());
        transport.disconnect();
    }

    #[test]
    fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let mut transport = TcpDataTransport::new(NetworkConfig::new("127.0.0.1", port));
        assert!(!transport.connect());
        assert!(!transport.is_connected());
    }
}
