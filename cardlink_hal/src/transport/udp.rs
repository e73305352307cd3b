//! UDP data transport.

use super::{DataTransport, TRANSPORT_UDP, poll_receive};
use cardlink_common::card::hex;
use cardlink_common::consts::DEFAULT_POLL_INTERVAL_MS;
use cardlink_common::error::TransportError;
use cardlink_common::reader::config::{NetworkConfig, TransportConfig};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;
use tracing::{debug, error, trace};

const MAX_DATAGRAM: usize = 65_507;

/// Byte channel over a connected UDP socket.
///
/// Each `receive()` poll drains every datagram queued on the socket.
#[derive(Debug)]
pub struct UdpDataTransport {
    config: NetworkConfig,
    poll_interval: Duration,
    socket: Option<UdpSocket>,
}

impl Default for UdpDataTransport {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl UdpDataTransport {
    /// Create a closed transport for the given endpoint.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            socket: None,
        }
    }

    /// Override the receive poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn open(&self) -> Result<UdpSocket, TransportError> {
        let ip = self
            .config
            .ip()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        let local = match ip {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).map_err(|e| TransportError::Io(e.to_string()))?;
        socket
            .connect(SocketAddr::new(ip, self.config.port))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(socket)
    }
}

fn read_available(socket: &UdpSocket) -> Result<Vec<u8>, TransportError> {
    let mut data = Vec::new();
    let mut datagram = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv(&mut datagram) {
            Ok(n) => data.extend_from_slice(&datagram[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(data),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // ICMP port unreachable from an earlier send; the peer may come up later.
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("UDP peer {} unreachable: {}", socket_peer(socket), e);
                return Ok(data);
            }
            Err(e) => return Err(TransportError::Io(e.to_string())),
        }
    }
}

fn socket_peer(socket: &UdpSocket) -> String {
    socket
        .peer_addr()
        .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string())
}

impl DataTransport for UdpDataTransport {
    fn transport_type(&self) -> &'static str {
        TRANSPORT_UDP
    }

    fn name(&self) -> String {
        format!("{}:{}", self.config.ip_address, self.config.port)
    }

    fn connect(&mut self) -> bool {
        if self.socket.is_some() {
            self.disconnect();
        }

        match self.open() {
            Ok(socket) => {
                debug!("UDP transport bound to {}", self.name());
                self.socket = Some(socket);
                true
            }
            Err(e) => {
                error!("Cannot open UDP transport to {}: {}", self.name(), e);
                false
            }
        }
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            debug!("UDP transport {} closed", self.name());
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn send(&mut self, data: &[u8]) {
        let Some(socket) = self.socket.as_ref() else {
            error!("Cannot send on UDP transport {}: not connected", self.name());
            return;
        };

        trace!("Send command: {}", hex(data));
        if let Err(e) = socket.send(data) {
            error!("UDP send failed: {}", e);
        }
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        poll_receive(timeout, self.poll_interval, || read_available(socket))
    }

    fn config(&self) -> TransportConfig {
        TransportConfig::Udp(self.config.clone())
    }

    fn set_config(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        match config {
            TransportConfig::Udp(net) => {
                self.config = net;
                Ok(())
            }
            other => Err(TransportError::InvalidConfig(format!(
                "UDP transport cannot use {other:?}"
            ))),
        }
    }

    fn default_node_name(&self) -> &'static str {
        "UdpDataTransport"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_exchange() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().expect("addr").port();

        let mut transport = UdpDataTransport::new(NetworkConfig::new("127.0.0.1", port))
            .with_poll_interval(Duration::from_millis(10));
        assert!(transport.connect());

        transport.send(&[0x01, 0x02]);
        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).expect("recv");
        assert_eq!(&buf[..n], &[0x01, 0x02]);

        peer.send_to(&[0x90, 0x00], from).expect("reply");
        let data = transport
            .receive(Duration::from_millis(500))
            .expect("receive");
        assert_eq!(data, vec![0x90, 0x00]);
    }

    #[test]
    fn test_receive_times_out() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().expect("addr").port();

        let mut transport = UdpDataTransport::new(NetworkConfig::new("127.0.0.1", port))
            .with_poll_interval(Duration::from_millis(10));
        assert!(transport.connect());
        let result = transport.receive(Duration::from_millis(30));
        assert!(matches!(result, Err(TransportError::Timeout { .. })));
    }

    #[test]
    fn test_unreachable_peer_times_out() {
        let peer = UdpSocket::bind("127.0.0.1:0").expect("bind peer");
        let port = peer.local_addr().expect("addr").port();
        drop(peer);

        let mut transport = UdpDataTransport::new(NetworkConfig::new("127.0.0.1", port))
            .with_poll_interval(Duration::from_millis(20));
        assert!(transport.connect());
        transport.send(&[0x00, 0xA4, 0x00, 0x00]);

        match transport.receive(Duration::from_millis(200)) {
            Err(TransportError::Timeout { requested, .. }) => {
                assert_eq!(requested, Duration::from_millis(200));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(transport.is_connected());
    }

    #[test]
    fn test_connect_with_invalid_address() {
        let mut transport = UdpDataTransport::new(NetworkConfig::new("reader.local", 9559));
        assert!(!transport.connect());
    }
}
