//! Generic ISO7816-4 chip and commands.
//!
//! Used whenever no plugin provides a chip for the resolved card type. The
//! chip keeps the requested card type string so callers still see what the
//! ATR resolved to.

use super::adapter::ReaderCardAdapter;
use super::apdu::{ApduResponse, data_length};
use super::storage::{Iso7816StorageCardService, StorageCardService};
use super::{AccessInfo, Chip, Commands, Location};
use cardlink_common::error::{CardError, ReaderError};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Card family name of ISO7816 locations and access infos.
pub const ISO7816_CARD_TYPE: &str = "ISO7816";

/// Highest offset addressable by the short P1-P2 form.
pub const MAX_SHORT_OFFSET: u16 = 0x7FFF;

const CLA_ISO: u8 = 0x00;
const INS_ERASE_BINARY: u8 = 0x0E;
const INS_VERIFY: u8 = 0x20;
const INS_CHANGE_REFERENCE_DATA: u8 = 0x24;
const INS_SELECT_FILE: u8 = 0xA4;
const INS_READ_BINARY: u8 = 0xB0;
const INS_WRITE_BINARY: u8 = 0xD0;
const INS_UPDATE_BINARY: u8 = 0xD6;

// ─── Chip ───────────────────────────────────────────────────────────

/// Generic ISO7816 chip.
#[derive(Default)]
pub struct Iso7816Chip {
    card_type: String,
    identifier: Vec<u8>,
    commands: Option<Arc<dyn Commands>>,
}

impl Iso7816Chip {
    /// Create a chip reporting `card_type`.
    pub fn new(card_type: impl Into<String>) -> Self {
        Self {
            card_type: card_type.into(),
            identifier: Vec::new(),
            commands: None,
        }
    }
}

impl Chip for Iso7816Chip {
    fn card_type(&self) -> &str {
        &self.card_type
    }

    fn chip_identifier(&self) -> &[u8] {
        &self.identifier
    }

    fn set_chip_identifier(&mut self, identifier: Vec<u8>) {
        self.identifier = identifier;
    }

    fn commands(&self) -> Option<Arc<dyn Commands>> {
        self.commands.clone()
    }

    fn set_commands(&mut self, commands: Box<dyn Commands>) {
        self.commands = Some(Arc::from(commands));
    }

    fn storage_service(&self) -> Option<Box<dyn StorageCardService>> {
        let commands = self.commands.clone()?;
        Some(Box::new(Iso7816StorageCardService::new(commands)))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for Iso7816Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iso7816Chip")
            .field("card_type", &self.card_type)
            .field("identifier", &self.identifier)
            .field("has_commands", &self.commands.is_some())
            .finish()
    }
}

// ─── Commands ───────────────────────────────────────────────────────

/// ISO7816-4 interindustry commands.
///
/// Every command returns the parsed response; status words are left to the
/// caller.
#[derive(Debug, Default)]
pub struct Iso7816Commands {
    adapter: Option<Arc<ReaderCardAdapter>>,
}

impl Iso7816Commands {
    /// Create unbound commands.
    pub fn new() -> Self {
        Self::default()
    }

    fn adapter(&self) -> Result<&ReaderCardAdapter, CardError> {
        self.adapter
            .as_deref()
            .ok_or(CardError::Reader(ReaderError::CardNotConnected))
    }

    fn response(raw: Result<Vec<u8>, ReaderError>) -> Result<ApduResponse, CardError> {
        ApduResponse::parse(&raw?)
    }

    fn offset_p1p2(offset: u16) -> Result<(u8, u8), CardError> {
        if offset > MAX_SHORT_OFFSET {
            return Err(CardError::InvalidLocation(format!(
                "offset {offset:#06X} exceeds {MAX_SHORT_OFFSET:#06X}"
            )));
        }
        let [p1, p2] = offset.to_be_bytes();
        Ok((p1, p2))
    }

    fn pin_length(data: &[u8]) -> Result<u8, CardError> {
        data_length(data).map_err(|e| CardError::InvalidAccessInfo(e.to_string()))
    }

    /// SELECT FILE by file identifier, no response data.
    pub fn select_file(&self, file_id: u16) -> Result<ApduResponse, CardError> {
        let fid = file_id.to_be_bytes();
        Self::response(self.adapter()?.send_apdu_command(
            CLA_ISO,
            INS_SELECT_FILE,
            0x00,
            0x0C,
            data_length(&fid)?,
            &fid,
        ))
    }

    /// SELECT FILE by file identifier, returning the FCP template.
    pub fn select_file_fcp(&self, file_id: u16) -> Result<ApduResponse, CardError> {
        let fid = file_id.to_be_bytes();
        Self::response(self.adapter()?.send_apdu_command_le(
            CLA_ISO,
            INS_SELECT_FILE,
            0x00,
            0x04,
            data_length(&fid)?,
            &fid,
            0x00,
        ))
    }

    /// READ BINARY from the current EF.
    pub fn read_binary(&self, offset: u16, le: u8) -> Result<ApduResponse, CardError> {
        let (p1, p2) = Self::offset_p1p2(offset)?;
        Self::response(
            self.adapter()?
                .send_apdu_command_expect(CLA_ISO, INS_READ_BINARY, p1, p2, le),
        )
    }

    /// UPDATE BINARY (overwrite) in the current EF.
    pub fn update_binary(&self, offset: u16, data: &[u8]) -> Result<ApduResponse, CardError> {
        let (p1, p2) = Self::offset_p1p2(offset)?;
        let lc = data_length(data)?;
        Self::response(
            self.adapter()?
                .send_apdu_command(CLA_ISO, INS_UPDATE_BINARY, p1, p2, lc, data),
        )
    }

    /// WRITE BINARY (one-time or OR write) in the current EF.
    pub fn write_binary(&self, offset: u16, data: &[u8]) -> Result<ApduResponse, CardError> {
        let (p1, p2) = Self::offset_p1p2(offset)?;
        let lc = data_length(data)?;
        Self::response(
            self.adapter()?
                .send_apdu_command(CLA_ISO, INS_WRITE_BINARY, p1, p2, lc, data),
        )
    }

    /// ERASE BINARY from `offset` to the end of the current EF.
    pub fn erase_binary(&self, offset: u16) -> Result<ApduResponse, CardError> {
        let (p1, p2) = Self::offset_p1p2(offset)?;
        Self::response(
            self.adapter()?
                .send_apdu_header(CLA_ISO, INS_ERASE_BINARY, p1, p2),
        )
    }

    /// VERIFY the reference data `reference` with `pin`.
    pub fn verify(&self, reference: u8, pin: &[u8]) -> Result<ApduResponse, CardError> {
        let lc = Self::pin_length(pin)?;
        Self::response(
            self.adapter()?
                .send_apdu_command(CLA_ISO, INS_VERIFY, 0x00, reference, lc, pin),
        )
    }

    /// CHANGE REFERENCE DATA from `old_pin` to `new_pin`.
    pub fn change_reference_data(
        &self,
        reference: u8,
        old_pin: &[u8],
        new_pin: &[u8],
    ) -> Result<ApduResponse, CardError> {
        let mut data = Vec::with_capacity(old_pin.len() + new_pin.len());
        data.extend_from_slice(old_pin);
        data.extend_from_slice(new_pin);
        let lc = Self::pin_length(&data)?;
        Self::response(self.adapter()?.send_apdu_command(
            CLA_ISO,
            INS_CHANGE_REFERENCE_DATA,
            0x00,
            reference,
            lc,
            &data,
        ))
    }
}

impl Commands for Iso7816Commands {
    fn commands_type(&self) -> &str {
        ISO7816_CARD_TYPE
    }

    fn reader_card_adapter(&self) -> Option<&Arc<ReaderCardAdapter>> {
        self.adapter.as_ref()
    }

    fn set_reader_card_adapter(&mut self, adapter: Arc<ReaderCardAdapter>) {
        self.adapter = Some(adapter);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Location & Access ──────────────────────────────────────────────

/// Elementary file and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iso7816Location {
    /// Elementary file identifier.
    pub file_id: u16,
    /// Byte offset within the file.
    pub offset: u16,
}

impl Iso7816Location {
    /// Create a location.
    pub fn new(file_id: u16, offset: u16) -> Self {
        Self { file_id, offset }
    }
}

impl Location for Iso7816Location {
    fn card_type(&self) -> &str {
        ISO7816_CARD_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// PIN verified against a reference data object.
#[derive(Clone, PartialEq, Eq)]
pub struct Iso7816AccessInfo {
    /// Reference data qualifier (VERIFY P2).
    pub reference: u8,
    /// PIN bytes.
    pub pin: Vec<u8>,
}

impl Iso7816AccessInfo {
    /// Create an access info.
    pub fn new(reference: u8, pin: impl Into<Vec<u8>>) -> Self {
        Self {
            reference,
            pin: pin.into(),
        }
    }
}

impl fmt::Debug for Iso7816AccessInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iso7816AccessInfo")
            .field("reference", &self.reference)
            .field("pin", &"***")
            .finish()
    }
}

impl AccessInfo for Iso7816AccessInfo {
    fn card_type(&self) -> &str {
        ISO7816_CARD_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::downcast_chip;

    #[test]
    fn test_chip_keeps_requested_type() {
        let chip = Iso7816Chip::new("DESFireEV1");
        assert_eq!(chip.card_type(), "DESFireEV1");
        assert!(chip.commands().is_none());
        assert!(chip.storage_service().is_none());
    }

    #[test]
    fn test_chip_capability_query() {
        let chip: Box<dyn Chip> = Box::new(Iso7816Chip::new("GENERIC_T1"));
        assert!(downcast_chip::<Iso7816Chip>(chip.as_ref()).is_some());
    }

    #[test]
    fn test_unbound_commands_fail() {
        let commands = Iso7816Commands::new();
        assert_eq!(
            commands.select_file(0x3F00),
            Err(CardError::Reader(ReaderError::CardNotConnected))
        );
    }

    #[test]
    fn test_offset_limit() {
        let commands = Iso7816Commands::new();
        assert!(matches!(
            commands.read_binary(0x8000, 0x10),
            Err(CardError::InvalidLocation(_))
        ));
    }

    #[test]
    fn test_oversized_pin_rejected_before_sending() {
        let commands = Iso7816Commands::new();
        assert!(matches!(
            commands.verify(0x80, &[0x31; 256]),
            Err(CardError::InvalidAccessInfo(_))
        ));
        assert!(matches!(
            commands.change_reference_data(0x80, &[0x31; 128], &[0x32; 128]),
            Err(CardError::InvalidAccessInfo(_))
        ));
    }

    #[test]
    fn test_access_info_debug_masks_pin() {
        let access = Iso7816AccessInfo::new(0x80, b"1234".to_vec());
        assert!(!format!("{access:?}").contains("1234"));
    }
}
