//! PC/SC reader provider.
//!
//! Requires the `pcsc` feature and a running PC/SC service (pcsc-lite or
//! WinSCard). A reader unit bound to no particular reader listens on every
//! reader reported by the service and connects to the first one holding a
//! card.

use crate::reader::{CardConnection, ReaderBackend, ReaderProvider};
use cardlink_common::error::ReaderError;
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::{Atr, CardProtocol, DisconnectAction, ShareMode};
use pcsc::{Attribute, Card, Context, Disposition, Protocol, Protocols, ReaderState, Scope, State};
use std::ffi::CString;
use std::time::Duration;
use tracing::{debug, warn};

/// Provider type name.
pub const PROVIDER_TYPE: &str = "PCSC";

fn backend_error(context: &str, err: pcsc::Error) -> ReaderError {
    ReaderError::Backend(format!("{context}: {err}"))
}

fn list_readers(ctx: &Context) -> Result<Vec<CString>, ReaderError> {
    match ctx.list_readers_owned() {
        Ok(readers) => Ok(readers),
        Err(pcsc::Error::NoReadersAvailable) => Ok(Vec::new()),
        Err(e) => Err(backend_error("cannot list readers", e)),
    }
}

fn share_mode(mode: ShareMode) -> pcsc::ShareMode {
    match mode {
        ShareMode::Shared => pcsc::ShareMode::Shared,
        ShareMode::Exclusive => pcsc::ShareMode::Exclusive,
        ShareMode::Direct => pcsc::ShareMode::Direct,
    }
}

fn disposition(action: DisconnectAction) -> Disposition {
    match action {
        DisconnectAction::Leave => Disposition::LeaveCard,
        DisconnectAction::Reset => Disposition::ResetCard,
        DisconnectAction::Unpower => Disposition::UnpowerCard,
        DisconnectAction::Eject => Disposition::EjectCard,
    }
}

// ─── Backend ────────────────────────────────────────────────────────

/// Backend over one PC/SC context.
pub struct PcscBackend {
    reader: Option<String>,
    ctx: Option<Context>,
    card: Option<(Card, String)>,
}

impl PcscBackend {
    /// Create a backend bound to `reader`, or to every reader if `None`.
    pub fn new(reader: Option<String>) -> Self {
        Self {
            reader,
            ctx: None,
            card: None,
        }
    }

    fn context(&self) -> Result<&Context, ReaderError> {
        self.ctx.as_ref().ok_or(ReaderError::NotConnectedToReader)
    }

    fn candidate_readers(&self) -> Result<Vec<CString>, ReaderError> {
        let readers = list_readers(self.context()?)?;
        Ok(match &self.reader {
            Some(name) => readers
                .into_iter()
                .filter(|r| r.to_string_lossy() == name.as_str())
                .collect(),
            None => readers,
        })
    }

    fn connection(card: &Card, reader_name: &str) -> Result<CardConnection, ReaderError> {
        let status = card
            .status2_owned()
            .map_err(|e| backend_error("cannot read card status", e))?;
        let protocol = match status.protocol2() {
            Some(Protocol::T0) => CardProtocol::T0,
            Some(Protocol::T1) => CardProtocol::T1,
            _ => CardProtocol::Raw,
        };
        Ok(CardConnection {
            atr: Atr::new(status.atr()),
            protocol,
            reader_name: reader_name.to_string(),
        })
    }
}

impl ReaderBackend for PcscBackend {
    fn backend_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn connect_to_reader(&mut self) -> Result<(), ReaderError> {
        if self.ctx.is_none() {
            let ctx = Context::establish(Scope::User)
                .map_err(|e| backend_error("cannot establish PC/SC context", e))?;
            self.ctx = Some(ctx);
        }
        Ok(())
    }

    fn disconnect_from_reader(&mut self) {
        self.disconnect_card(DisconnectAction::Leave);
        self.ctx = None;
    }

    fn card_presence(&mut self) -> Result<Option<String>, ReaderError> {
        let readers = self.candidate_readers()?;
        if readers.is_empty() {
            return Ok(None);
        }
        let mut states: Vec<ReaderState> = readers
            .into_iter()
            .map(|reader| ReaderState::new(reader, State::UNAWARE))
            .collect();
        self.context()?
            .get_status_change(Duration::ZERO, &mut states)
            .map_err(|e| backend_error("cannot query reader status", e))?;

        Ok(states
            .iter()
            .find(|state| state.event_state().contains(State::PRESENT))
            .map(|state| state.name().to_string_lossy().into_owned()))
    }

    fn connect_card(&mut self, mode: ShareMode) -> Result<CardConnection, ReaderError> {
        self.disconnect_card(DisconnectAction::Leave);
        let reader = self.card_presence()?.ok_or(ReaderError::NoCard)?;
        let name = CString::new(reader.as_str())
            .map_err(|e| ReaderError::Backend(format!("invalid reader name: {e}")))?;
        let card = self
            .context()?
            .connect(&name, share_mode(mode), Protocols::ANY)
            .map_err(|e| match e {
                pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => ReaderError::NoCard,
                e => backend_error("cannot connect to card", e),
            })?;
        let connection = Self::connection(&card, &reader)?;
        self.card = Some((card, reader));
        Ok(connection)
    }

    fn reconnect_card(&mut self, mode: ShareMode) -> Result<CardConnection, ReaderError> {
        let (card, reader) = self.card.as_mut().ok_or(ReaderError::CardNotConnected)?;
        card.reconnect(share_mode(mode), Protocols::ANY, Disposition::ResetCard)
            .map_err(|e| backend_error("cannot reconnect to card", e))?;
        Self::connection(card, reader)
    }

    fn disconnect_card(&mut self, action: DisconnectAction) {
        if let Some((card, reader)) = self.card.take() {
            if let Err((_, e)) = card.disconnect(disposition(action)) {
                warn!("Cannot disconnect card on {}: {}", reader, e);
            }
        }
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ReaderError> {
        let (card, _) = self.card.as_ref().ok_or(ReaderError::CardNotConnected)?;
        let mut buffer = [0u8; pcsc::MAX_BUFFER_SIZE];
        let response = card
            .transmit(command, &mut buffer)
            .map_err(|e| backend_error("transmit failed", e))?;
        Ok(response.to_vec())
    }

    fn reader_serial_number(&mut self) -> Result<Vec<u8>, ReaderError> {
        let (card, _) = self.card.as_ref().ok_or(ReaderError::CardNotConnected)?;
        card.get_attribute_owned(Attribute::VendorIfdSerialNo)
            .map_err(|e| backend_error("reader serial number unavailable", e))
    }
}

// ─── Provider ───────────────────────────────────────────────────────

/// Provider of the readers known to the PC/SC service.
#[derive(Debug, Default)]
pub struct PcscProvider {
    readers: Vec<String>,
}

impl PcscProvider {
    /// Create a provider; the reader list is empty until refreshed.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReaderProvider for PcscProvider {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn refresh_reader_list(&mut self) -> bool {
        let result = Context::establish(Scope::User)
            .map_err(|e| backend_error("cannot establish PC/SC context", e))
            .and_then(|ctx| list_readers(&ctx));
        match result {
            Ok(readers) => {
                self.readers = readers
                    .iter()
                    .map(|r| r.to_string_lossy().into_owned())
                    .collect();
                debug!("{} PC/SC readers attached", self.readers.len());
                true
            }
            Err(e) => {
                warn!("Cannot refresh PC/SC reader list: {}", e);
                false
            }
        }
    }

    fn reader_list(&self) -> Vec<String> {
        self.readers.clone()
    }

    fn create_backend(&self, config: &ReaderUnitConfig) -> Option<Box<dyn ReaderBackend>> {
        Some(Box::new(PcscBackend::new(config.reader.clone())))
    }
}

/// Factory function to create a PC/SC provider instance.
pub fn create_provider() -> Box<dyn ReaderProvider> {
    Box::new(PcscProvider::new())
}
