//! Storage card service.
//!
//! A storage service reads, writes and erases card memory addressed by a
//! [`Location`], after authenticating with an [`AccessInfo`]. Failures
//! raised by the card are [`CardError`]s; the reader stays connected.

use super::iso7816::{Iso7816AccessInfo, Iso7816Commands, Iso7816Location, MAX_SHORT_OFFSET};
use super::{AccessInfo, Commands, Location, downcast_commands};
use cardlink_common::card::CardBehavior;
use cardlink_common::error::CardError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest data block sent or requested in one short APDU.
const MAX_CHUNK: usize = 0xFF;

/// Reads, writes and erases card memory.
pub trait StorageCardService: Send {
    /// Card family served.
    fn card_type(&self) -> &str;

    /// Erase the whole addressable content.
    ///
    /// # Errors
    /// `CardError` if the card refuses the erase.
    fn erase(&self) -> Result<(), CardError>;

    /// Erase one location after authenticating with `access`.
    ///
    /// # Errors
    /// `CardError::AuthenticationRejected` if `access` is refused.
    fn erase_location(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
    ) -> Result<(), CardError>;

    /// Authenticate with `access`, optionally rotate to `new_access`, then write `data`.
    ///
    /// # Errors
    /// `CardError::AuthenticationRejected` if `access` is refused.
    fn write_data(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
        new_access: Option<&dyn AccessInfo>,
        data: &[u8],
        behavior: CardBehavior,
    ) -> Result<(), CardError>;

    /// Authenticate with `access`, then read up to `buffer.len()` bytes.
    ///
    /// Returns the number of bytes read.
    ///
    /// # Errors
    /// `CardError::AuthenticationRejected` if `access` is refused.
    fn read_data(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
        buffer: &mut [u8],
        behavior: CardBehavior,
    ) -> Result<usize, CardError>;

    /// Read the header preceding the data at `location`.
    ///
    /// Copies at most `buffer.len()` bytes and returns the full header length.
    ///
    /// # Errors
    /// `CardError::AuthenticationRejected` if `access` is refused.
    fn read_data_header(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
        buffer: &mut [u8],
    ) -> Result<usize, CardError>;
}

/// Storage over ISO7816-4 transparent elementary files.
///
/// The header of a file is its FCP template.
pub struct Iso7816StorageCardService {
    commands: Arc<dyn Commands>,
}

impl Iso7816StorageCardService {
    /// Create a service over the chip's commands.
    pub fn new(commands: Arc<dyn Commands>) -> Self {
        Self { commands }
    }

    fn iso(&self) -> Result<&Iso7816Commands, CardError> {
        downcast_commands::<Iso7816Commands>(self.commands.as_ref()).ok_or_else(|| {
            CardError::Unsupported(format!(
                "{} commands cannot serve ISO7816 storage",
                self.commands.commands_type()
            ))
        })
    }

    fn location(location: &dyn Location) -> Result<&Iso7816Location, CardError> {
        location
            .as_any()
            .downcast_ref::<Iso7816Location>()
            .ok_or_else(|| CardError::InvalidLocation(format!("{location:?}")))
    }

    fn access(access: Option<&dyn AccessInfo>) -> Result<Option<&Iso7816AccessInfo>, CardError> {
        access
            .map(|info| {
                info.as_any()
                    .downcast_ref::<Iso7816AccessInfo>()
                    .ok_or_else(|| CardError::InvalidAccessInfo(format!("{info:?}")))
            })
            .transpose()
    }

    fn authenticate(&self, access: Option<&Iso7816AccessInfo>) -> Result<(), CardError> {
        let Some(access) = access else {
            return Ok(());
        };
        let response = self.iso()?.verify(access.reference, &access.pin)?;
        match (response.sw1, response.sw2) {
            (0x90, 0x00) => Ok(()),
            (0x63, _) | (0x69, 0x82) | (0x69, 0x83) => {
                warn!(
                    "VERIFY rejected for reference {:#04X}: {:04X}",
                    access.reference,
                    response.status_word()
                );
                Err(CardError::AuthenticationRejected {
                    sw1: response.sw1,
                    sw2: response.sw2,
                })
            }
            (sw1, sw2) => Err(CardError::Status { sw1, sw2 }),
        }
    }

    fn select(&self, location: &Iso7816Location) -> Result<(), CardError> {
        self.iso()?.select_file(location.file_id)?.check()?;
        Ok(())
    }

    fn checked_end(location: &Iso7816Location, len: usize) -> Result<(), CardError> {
        let end = usize::from(location.offset) + len;
        if len > 0 && end - 1 > usize::from(MAX_SHORT_OFFSET) {
            return Err(CardError::InvalidLocation(format!(
                "{len} bytes at offset {:#06X} exceed the addressable range",
                location.offset
            )));
        }
        Ok(())
    }
}

impl StorageCardService for Iso7816StorageCardService {
    fn card_type(&self) -> &str {
        super::iso7816::ISO7816_CARD_TYPE
    }

    fn erase(&self) -> Result<(), CardError> {
        self.iso()?.erase_binary(0)?.check()?;
        Ok(())
    }

    fn erase_location(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
    ) -> Result<(), CardError> {
        let location = Self::location(location)?;
        let access = Self::access(access)?;

        self.select(location)?;
        self.authenticate(access)?;
        self.iso()?.erase_binary(location.offset)?.check()?;
        debug!(
            "Erased EF {:04X} from offset {}",
            location.file_id, location.offset
        );
        Ok(())
    }

    fn write_data(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
        new_access: Option<&dyn AccessInfo>,
        data: &[u8],
        behavior: CardBehavior,
    ) -> Result<(), CardError> {
        let location = Self::location(location)?;
        let access = Self::access(access)?;
        let new_access = Self::access(new_access)?;
        Self::checked_end(location, data.len())?;

        self.select(location)?;
        self.authenticate(access)?;

        if let Some(new_access) = new_access {
            let current = access.ok_or_else(|| {
                CardError::InvalidAccessInfo(
                    "changing reference data requires the current access info".to_string(),
                )
            })?;
            self.iso()?
                .change_reference_data(new_access.reference, &current.pin, &new_access.pin)?
                .check()?;
            debug!("Reference data {:#04X} changed", new_access.reference);
        }

        let iso = self.iso()?;
        let append = behavior.contains(CardBehavior::APPEND_ONLY);
        let mut offset = location.offset;
        for chunk in data.chunks(MAX_CHUNK) {
            let response = if append {
                iso.write_binary(offset, chunk)?
            } else {
                iso.update_binary(offset, chunk)?
            };
            response.check()?;
            offset += chunk.len() as u16;
        }
        Ok(())
    }

    fn read_data(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
        buffer: &mut [u8],
        _behavior: CardBehavior,
    ) -> Result<usize, CardError> {
        let location = Self::location(location)?;
        let access = Self::access(access)?;
        Self::checked_end(location, buffer.len())?;

        self.select(location)?;
        self.authenticate(access)?;

        let iso = self.iso()?;
        let mut read = 0;
        while read < buffer.len() {
            let wanted = (buffer.len() - read).min(MAX_CHUNK);
            let offset = location.offset + read as u16;
            let response = iso.read_binary(offset, wanted as u8)?;
            match (response.sw1, response.sw2) {
                // 6282: end of file reached before Le bytes.
                (0x90, 0x00) | (0x62, 0x82) => {}
                // 6B00: offset past the end of file.
                (0x6B, 0x00) if read > 0 => break,
                (sw1, sw2) => return Err(CardError::Status { sw1, sw2 }),
            }

            let got = response.data.len().min(wanted);
            buffer[read..read + got].copy_from_slice(&response.data[..got]);
            read += got;
            if got < wanted {
                break;
            }
        }
        Ok(read)
    }

    fn read_data_header(
        &self,
        location: &dyn Location,
        access: Option<&dyn AccessInfo>,
        buffer: &mut [u8],
    ) -> Result<usize, CardError> {
        let location = Self::location(location)?;
        let access = Self::access(access)?;

        self.authenticate(access)?;
        let response = self.iso()?.select_file_fcp(location.file_id)?.check()?;

        let copied = response.data.len().min(buffer.len());
        buffer[..copied].copy_from_slice(&response.data[..copied]);
        Ok(response.data.len())
    }
}
