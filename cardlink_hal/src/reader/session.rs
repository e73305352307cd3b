//! Reader connection state machine.
//!
//! ```text
//! Disconnected ──connect_to_reader──▶ ReaderConnected ──connect──▶ CardConnected
//!      ▲                                 │    ▲                       │
//!      └──────disconnect_from_reader─────┘    └───────disconnect──────┘
//! ```
//!
//! One session is shared by a reader unit, its proxies and every adapter
//! bound to chips created on it.

use super::{PresenceEvent, ReaderBackend};
use crate::card::Chip;
use cardlink_common::card::hex;
use cardlink_common::error::ReaderError;
use cardlink_common::reader::types::{
    Atr, CardProtocol, DisconnectAction, ReaderState, ShareMode,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

pub(crate) struct ReaderSession {
    backend: Box<dyn ReaderBackend>,
    state: ReaderState,
    atr: Atr,
    share_mode: ShareMode,
    disconnect_action: DisconnectAction,
    active_protocol: Option<CardProtocol>,
    connected_name: Option<String>,
    poll_interval: Duration,
    chip: Option<Arc<dyn Chip>>,
}

impl ReaderSession {
    pub(crate) fn new(
        backend: Box<dyn ReaderBackend>,
        share_mode: ShareMode,
        disconnect_action: DisconnectAction,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            state: ReaderState::Disconnected,
            atr: Atr::default(),
            share_mode,
            disconnect_action,
            active_protocol: None,
            connected_name: None,
            poll_interval,
            chip: None,
        }
    }

    pub(crate) fn configure(
        &mut self,
        share_mode: ShareMode,
        disconnect_action: DisconnectAction,
        poll_interval: Duration,
    ) {
        self.share_mode = share_mode;
        self.disconnect_action = disconnect_action;
        self.poll_interval = poll_interval;
    }

    // ─── Accessors ──────────────────────────────────────────────────

    pub(crate) fn state(&self) -> ReaderState {
        self.state
    }

    pub(crate) fn atr(&self) -> &Atr {
        &self.atr
    }

    pub(crate) fn share_mode(&self) -> ShareMode {
        self.share_mode
    }

    pub(crate) fn active_protocol(&self) -> Option<CardProtocol> {
        self.active_protocol
    }

    pub(crate) fn connected_name(&self) -> Option<&str> {
        self.connected_name.as_deref()
    }

    pub(crate) fn backend(&self) -> &dyn ReaderBackend {
        self.backend.as_ref()
    }

    pub(crate) fn backend_mut(&mut self) -> &mut dyn ReaderBackend {
        self.backend.as_mut()
    }

    // ─── Chip Cache ─────────────────────────────────────────────────

    /// Chip of the current card handle, shared by every unit on this session.
    pub(crate) fn chip(&self) -> Option<&Arc<dyn Chip>> {
        self.chip.as_ref()
    }

    /// Cache `chip` unless another unit cached one first; returns the cached chip.
    pub(crate) fn cache_chip(&mut self, chip: Arc<dyn Chip>) -> Arc<dyn Chip> {
        Arc::clone(self.chip.get_or_insert(chip))
    }

    pub(crate) fn clear_chip(&mut self) {
        self.chip = None;
    }

    // ─── Reader Session ─────────────────────────────────────────────

    pub(crate) fn connect_to_reader(&mut self) -> bool {
        if self.state != ReaderState::Disconnected {
            return true;
        }
        match self.backend.connect_to_reader() {
            Ok(()) => {
                debug!("Connected to {} reader", self.backend.backend_type());
                self.state = ReaderState::ReaderConnected;
                true
            }
            Err(e) => {
                warn!(
                    "Cannot connect to {} reader: {}",
                    self.backend.backend_type(),
                    e
                );
                false
            }
        }
    }

    pub(crate) fn disconnect_from_reader(&mut self) {
        self.chip = None;
        if self.state == ReaderState::CardConnected {
            self.disconnect(self.disconnect_action);
        }
        if self.state != ReaderState::Disconnected {
            self.backend.disconnect_from_reader();
            self.state = ReaderState::Disconnected;
            self.connected_name = None;
            debug!("Disconnected from {} reader", self.backend.backend_type());
        }
    }

    // ─── Presence ───────────────────────────────────────────────────

    fn wait_timeout(maxwait: Duration) -> Option<Duration> {
        (!maxwait.is_zero()).then_some(maxwait)
    }

    pub(crate) fn wait_insertion(&mut self, maxwait: Duration) -> bool {
        if self.state == ReaderState::CardConnected {
            warn!("Cannot wait for insertion while a card is connected");
            return false;
        }
        if !self.connect_to_reader() {
            return false;
        }

        let timeout = Self::wait_timeout(maxwait);
        match self
            .backend
            .wait_card_presence(true, timeout, self.poll_interval)
        {
            Ok(PresenceEvent::Inserted(reader)) => {
                info!("Card inserted on {}", reader);
                self.connected_name = Some(reader);
                true
            }
            Ok(_) => {
                debug!("No card inserted within {:?}", maxwait);
                false
            }
            Err(e) => {
                warn!("Insertion wait failed: {}", e);
                false
            }
        }
    }

    pub(crate) fn wait_removal(&mut self, maxwait: Duration) -> bool {
        if !self.connect_to_reader() {
            return false;
        }

        let timeout = Self::wait_timeout(maxwait);
        match self
            .backend
            .wait_card_presence(false, timeout, self.poll_interval)
        {
            Ok(PresenceEvent::Removed) => {
                info!("Card removed");
                self.chip = None;
                if self.state == ReaderState::CardConnected {
                    self.backend.disconnect_card(DisconnectAction::Leave);
                    self.state = ReaderState::ReaderConnected;
                    self.active_protocol = None;
                }
                self.connected_name = None;
                true
            }
            Ok(_) => {
                debug!("Card still present after {:?}", maxwait);
                false
            }
            Err(e) => {
                warn!("Removal wait failed: {}", e);
                false
            }
        }
    }

    // ─── Card Handle ────────────────────────────────────────────────

    pub(crate) fn connect(&mut self, share_mode: ShareMode) -> bool {
        self.chip = None;
        if !self.connect_to_reader() {
            return false;
        }
        if self.state == ReaderState::CardConnected {
            self.disconnect(self.disconnect_action);
        }

        match self.backend.connect_card(share_mode) {
            Ok(connection) => {
                debug!(
                    "Card connected on {} ({:?}), ATR {}",
                    connection.reader_name, connection.protocol, connection.atr
                );
                self.atr = connection.atr;
                self.active_protocol = Some(connection.protocol);
                self.connected_name = Some(connection.reader_name);
                self.share_mode = share_mode;
                self.state = ReaderState::CardConnected;
                true
            }
            Err(e) => {
                warn!("Cannot connect to card: {}", e);
                false
            }
        }
    }

    pub(crate) fn reconnect(&mut self) -> bool {
        if self.state != ReaderState::CardConnected {
            warn!("Cannot reconnect: no card handle");
            return false;
        }

        match self.backend.reconnect_card(self.share_mode) {
            Ok(connection) => {
                debug!("Card reconnected, ATR {}", connection.atr);
                self.atr = connection.atr;
                self.active_protocol = Some(connection.protocol);
                self.connected_name = Some(connection.reader_name);
                true
            }
            Err(e) => {
                warn!("Cannot reconnect to card: {}", e);
                false
            }
        }
    }

    pub(crate) fn disconnect(&mut self, action: DisconnectAction) {
        self.chip = None;
        if self.state != ReaderState::CardConnected {
            return;
        }
        self.backend.disconnect_card(action);
        self.state = ReaderState::ReaderConnected;
        self.active_protocol = None;
        debug!("Card disconnected ({:?})", action);
    }

    pub(crate) fn default_disconnect_action(&self) -> DisconnectAction {
        self.disconnect_action
    }

    // ─── Card I/O ───────────────────────────────────────────────────

    pub(crate) fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ReaderError> {
        if self.state != ReaderState::CardConnected {
            return Err(ReaderError::CardNotConnected);
        }
        trace!("APDU command: {}", hex(command));
        let response = self.backend.transmit(command)?;
        trace!("APDU response: {}", hex(&response));
        Ok(response)
    }

    pub(crate) fn card_serial_number(&mut self) -> Result<Vec<u8>, ReaderError> {
        if self.state != ReaderState::CardConnected {
            return Err(ReaderError::CardNotConnected);
        }
        self.backend.card_serial_number()
    }

    pub(crate) fn reader_serial_number(&mut self) -> Result<Vec<u8>, ReaderError> {
        if !self.connect_to_reader() {
            return Err(ReaderError::NotConnectedToReader);
        }
        self.backend.reader_serial_number()
    }
}

impl Drop for ReaderSession {
    fn drop(&mut self) {
        self.disconnect_from_reader();
    }
}
