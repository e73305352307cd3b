//! Reader providers, backends and reader units.
//!
//! A [`ReaderProvider`] enumerates the readers of one technology and creates
//! a [`ReaderBackend`] per reader unit. The backend is the low-level handle
//! (reader session, card handle, transmit); [`ReaderUnit`] layers the
//! connection state machine, ATR-based card type resolution and chip
//! creation on top of it.

pub mod atr;
pub(crate) mod session;
pub mod unit;

pub use atr::{atr_protocol, card_type_from_atr};
pub use unit::ReaderUnit;

use crate::transport::DataTransport;
use cardlink_common::card::hex;
use cardlink_common::error::ReaderError;
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::{Atr, CardProtocol, DisconnectAction, ShareMode};
use std::time::{Duration, Instant};

/// PC/SC part 3 GET DATA command returning the card UID.
pub const GET_UID_COMMAND: [u8; 5] = [0xFF, 0xCA, 0x00, 0x00, 0x00];

/// Card handle opened by [`ReaderBackend::connect_card`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardConnection {
    /// Answer-To-Reset of the card.
    pub atr: Atr,
    /// Negotiated protocol.
    pub protocol: CardProtocol,
    /// Physical reader holding the card.
    pub reader_name: String,
}

/// Outcome of a presence wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A card is present on the named reader.
    Inserted(String),
    /// No card is present.
    Removed,
    /// The wait timed out before the requested state was reached.
    TimedOut,
}

/// Enumerates readers of one technology.
pub trait ReaderProvider: Send {
    /// Provider type name (`PCSC`, `Remote`, ...).
    fn provider_type(&self) -> &str;

    /// Refresh the list of attached readers.
    fn refresh_reader_list(&mut self) -> bool;

    /// Names of the attached readers, as of the last refresh.
    fn reader_list(&self) -> Vec<String>;

    /// Create the backend of a reader unit.
    fn create_backend(&self, config: &ReaderUnitConfig) -> Option<Box<dyn ReaderBackend>>;
}

/// Low-level reader handle used by a reader unit.
///
/// Backends report failures as errors; the reader unit turns them into the
/// boolean contract of its connection operations.
pub trait ReaderBackend: Send {
    /// Backend type name, used to pick reader-specific commands.
    fn backend_type(&self) -> &str;

    /// Open the reader session.
    ///
    /// # Errors
    /// `ReaderError::Backend` or `ReaderError::Transport` if the reader is unreachable.
    fn connect_to_reader(&mut self) -> Result<(), ReaderError>;

    /// Close the reader session.
    fn disconnect_from_reader(&mut self);

    /// Reader currently holding a card, `None` if no card is present.
    ///
    /// # Errors
    /// `ReaderError` if the reader cannot be queried.
    fn card_presence(&mut self) -> Result<Option<String>, ReaderError>;

    /// Block until a card is present (`present`) or absent, or `timeout` elapses.
    ///
    /// `None` waits forever. The default implementation polls
    /// [`card_presence`](Self::card_presence) every `poll_interval`.
    ///
    /// # Errors
    /// `ReaderError` if the reader cannot be queried.
    fn wait_card_presence(
        &mut self,
        present: bool,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> Result<PresenceEvent, ReaderError> {
        let start = Instant::now();
        loop {
            match (self.card_presence()?, present) {
                (Some(reader), true) => return Ok(PresenceEvent::Inserted(reader)),
                (None, false) => return Ok(PresenceEvent::Removed),
                _ => {}
            }
            if let Some(limit) = timeout {
                let elapsed = start.elapsed();
                if elapsed >= limit {
                    return Ok(PresenceEvent::TimedOut);
                }
                std::thread::sleep(poll_interval.min(limit - elapsed));
            } else {
                std::thread::sleep(poll_interval);
            }
        }
    }

    /// Open a card handle on the present card.
    ///
    /// # Errors
    /// `ReaderError::NoCard` if no card is present, `ReaderError::Backend` otherwise.
    fn connect_card(&mut self, share_mode: ShareMode) -> Result<CardConnection, ReaderError>;

    /// Re-establish the open card handle.
    ///
    /// # Errors
    /// `ReaderError::CardNotConnected` without an open handle.
    fn reconnect_card(&mut self, share_mode: ShareMode) -> Result<CardConnection, ReaderError>;

    /// Release the card handle.
    fn disconnect_card(&mut self, action: DisconnectAction);

    /// Exchange one command with the card.
    ///
    /// # Errors
    /// `ReaderError::CardNotConnected` without an open handle.
    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ReaderError>;

    /// Card UID.
    ///
    /// # Errors
    /// `ReaderError::Backend` if the card rejects the UID query.
    fn card_serial_number(&mut self) -> Result<Vec<u8>, ReaderError> {
        let mut response = self.transmit(&GET_UID_COMMAND)?;
        match response.as_slice() {
            [.., 0x90, 0x00] => {
                response.truncate(response.len() - 2);
                Ok(response)
            }
            _ => Err(ReaderError::Backend(format!(
                "GET DATA UID failed: {}",
                hex(&response)
            ))),
        }
    }

    /// Serial number of the reader itself.
    ///
    /// # Errors
    /// `ReaderError::Backend` if the reader does not expose one.
    fn reader_serial_number(&mut self) -> Result<Vec<u8>, ReaderError> {
        Err(ReaderError::Backend(format!(
            "{} readers have no serial number",
            self.backend_type()
        )))
    }

    /// Data transport used to reach the reader, if any.
    fn data_transport(&self) -> Option<&dyn DataTransport> {
        None
    }

    /// Replace the data transport. Returns false if the backend has none.
    fn set_data_transport(&mut self, _transport: Box<dyn DataTransport>) -> bool {
        false
    }
}
