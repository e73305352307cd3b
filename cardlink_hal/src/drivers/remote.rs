//! Remote reader provider.
//!
//! Drives a virtual reader reached through a [`DataTransport`]. Every
//! message is framed with a 2-byte big-endian length. A one-byte message is
//! a control request:
//!
//! | Byte | Request   | Answer          |
//! |------|-----------|-----------------|
//! | `00` | power off | none            |
//! | `01` | power on  | none            |
//! | `02` | reset     | none            |
//! | `04` | get ATR   | ATR frame       |
//!
//! Any longer message is a command APDU answered by one response frame. An
//! empty ATR frame means no card is present.

use crate::reader::{CardConnection, ReaderBackend, ReaderProvider, atr_protocol};
use crate::transport::{DataTransport, transport_from_config};
use cardlink_common::card::hex;
use cardlink_common::error::{ReaderError, TransportError};
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::{Atr, DisconnectAction, ShareMode};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Provider type name.
pub const PROVIDER_TYPE: &str = "Remote";

/// Default time allowed for a complete answer frame.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

const CTRL_POWER_OFF: u8 = 0x00;
const CTRL_POWER_ON: u8 = 0x01;
const CTRL_RESET: u8 = 0x02;
const CTRL_GET_ATR: u8 = 0x04;

/// Frame a message with its 2-byte big-endian length.
///
/// # Errors
/// `ReaderError::Backend` if the message exceeds 65535 bytes.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ReaderError> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        ReaderError::Backend(format!("{} bytes do not fit one frame", payload.len()))
    })?;
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split the first complete frame off `pending`.
///
/// Returns `None` until `pending` holds the length header and the whole
/// payload.
pub fn take_frame(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let [hi, lo, ..] = pending.as_slice() else {
        return None;
    };
    let len = usize::from(u16::from_be_bytes([*hi, *lo]));
    if pending.len() < len + 2 {
        return None;
    }
    let payload = pending[2..len + 2].to_vec();
    pending.drain(..len + 2);
    Some(payload)
}

// ─── Backend ────────────────────────────────────────────────────────

/// Backend of a virtual reader behind a data transport.
pub struct RemoteBackend {
    transport: Box<dyn DataTransport>,
    pending: Vec<u8>,
    response_timeout: Duration,
    card_open: bool,
}

impl RemoteBackend {
    /// Create a backend over `transport`.
    pub fn new(transport: Box<dyn DataTransport>) -> Self {
        Self {
            transport,
            pending: Vec::new(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            card_open: false,
        }
    }

    /// Override the time allowed for a complete answer frame.
    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    fn ensure_connected(&self) -> Result<(), ReaderError> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(ReaderError::NotConnectedToReader)
        }
    }

    fn send_frame(&mut self, payload: &[u8]) -> Result<(), ReaderError> {
        self.ensure_connected()?;
        let frame = encode_frame(payload)?;
        self.transport.send(&frame);
        Ok(())
    }

    fn read_frame(&mut self, window: Duration) -> Result<Vec<u8>, ReaderError> {
        let start = Instant::now();
        loop {
            if let Some(payload) = take_frame(&mut self.pending) {
                trace!("Remote frame: {}", hex(&payload));
                return Ok(payload);
            }

            let elapsed = start.elapsed();
            if elapsed >= window {
                return Err(TransportError::Timeout {
                    elapsed,
                    requested: window,
                }
                .into());
            }
            let chunk = self.transport.receive(window - elapsed)?;
            self.pending.extend_from_slice(&chunk);
        }
    }

    /// Read one answer frame. On failure the late answer, if any, is
    /// discarded so the next request reads its own answer.
    fn receive_frame(&mut self) -> Result<Vec<u8>, ReaderError> {
        let result = self.read_frame(self.response_timeout);
        if result.is_err() {
            self.resync();
        }
        result
    }

    fn resync(&mut self) {
        match self.read_frame(self.response_timeout) {
            Ok(late) => warn!("Dropped late remote frame: {}", hex(&late)),
            Err(e) => debug!("No late remote frame: {}", e),
        }
        self.pending.clear();
    }

    fn request_atr(&mut self) -> Result<Vec<u8>, ReaderError> {
        self.send_frame(&[CTRL_GET_ATR])?;
        self.receive_frame()
    }

    fn power_on(&mut self, control: u8) -> Result<CardConnection, ReaderError> {
        let atr = self.request_atr()?;
        if atr.is_empty() {
            return Err(ReaderError::NoCard);
        }
        self.send_frame(&[control])?;
        self.card_open = true;
        Ok(CardConnection {
            protocol: atr_protocol(&atr),
            atr: Atr::new(&atr),
            reader_name: self.transport.name(),
        })
    }
}

impl ReaderBackend for RemoteBackend {
    fn backend_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn connect_to_reader(&mut self) -> Result<(), ReaderError> {
        if self.transport.is_connected() || self.transport.connect() {
            self.pending.clear();
            debug!("Remote reader reachable at {}", self.transport.name());
            Ok(())
        } else {
            Err(ReaderError::Transport(TransportError::NotConnected))
        }
    }

    fn disconnect_from_reader(&mut self) {
        if self.card_open {
            self.disconnect_card(DisconnectAction::Unpower);
        }
        self.transport.disconnect();
        self.pending.clear();
    }

    fn card_presence(&mut self) -> Result<Option<String>, ReaderError> {
        let atr = self.request_atr()?;
        Ok((!atr.is_empty()).then(|| self.transport.name()))
    }

    fn connect_card(&mut self, _share_mode: ShareMode) -> Result<CardConnection, ReaderError> {
        self.power_on(CTRL_POWER_ON)
    }

    fn reconnect_card(&mut self, _share_mode: ShareMode) -> Result<CardConnection, ReaderError> {
        if !self.card_open {
            return Err(ReaderError::CardNotConnected);
        }
        self.power_on(CTRL_RESET)
    }

    fn disconnect_card(&mut self, action: DisconnectAction) {
        if !self.card_open {
            return;
        }
        self.card_open = false;
        let control = match action {
            DisconnectAction::Leave => return,
            DisconnectAction::Reset => CTRL_RESET,
            DisconnectAction::Unpower | DisconnectAction::Eject => CTRL_POWER_OFF,
        };
        if let Err(e) = self.send_frame(&[control]) {
            warn!("Cannot release remote card: {}", e);
        }
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ReaderError> {
        if !self.card_open {
            return Err(ReaderError::CardNotConnected);
        }
        if command.len() < 2 {
            return Err(ReaderError::Backend(format!(
                "command {} is shorter than an APDU header",
                hex(command)
            )));
        }
        self.send_frame(command)?;
        self.receive_frame()
    }

    fn data_transport(&self) -> Option<&dyn DataTransport> {
        Some(self.transport.as_ref())
    }

    fn set_data_transport(&mut self, transport: Box<dyn DataTransport>) -> bool {
        self.transport.disconnect();
        self.transport = transport;
        self.pending.clear();
        self.card_open = false;
        true
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        self.transport.disconnect();
    }
}

// ─── Provider ───────────────────────────────────────────────────────

/// Provider of readers reached through a data transport.
///
/// The reader list is the set of transports configured so far; a reader
/// unit without a `transport` section cannot be served.
#[derive(Debug, Default)]
pub struct RemoteProvider {
    readers: Vec<String>,
}

impl RemoteProvider {
    /// Create a provider.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReaderProvider for RemoteProvider {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn refresh_reader_list(&mut self) -> bool {
        true
    }

    fn reader_list(&self) -> Vec<String> {
        self.readers.clone()
    }

    fn create_backend(&self, config: &ReaderUnitConfig) -> Option<Box<dyn ReaderBackend>> {
        let Some(transport) = &config.transport else {
            warn!("Reader '{}' has no transport configured", config.name);
            return None;
        };
        let transport = transport_from_config(transport, config.poll_interval());
        debug!("Remote reader '{}' over {}", config.name, transport.name());
        Some(Box::new(RemoteBackend::new(transport)))
    }
}

/// Factory function to create a remote provider instance.
pub fn create_provider() -> Box<dyn ReaderProvider> {
    Box::new(RemoteProvider::new())
}
