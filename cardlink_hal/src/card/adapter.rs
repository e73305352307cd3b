//! Reader/card adapter.
//!
//! The adapter is the only path from commands to the card. It forwards raw
//! command bytes through the reader unit's session and returns the raw
//! response, status word included; interpreting the status word is up to
//! the caller.

use super::apdu::ApduCommand;
use crate::reader::session::ReaderSession;
use cardlink_common::error::ReaderError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Sends commands to the card of one reader unit.
pub struct ReaderCardAdapter {
    session: Arc<Mutex<ReaderSession>>,
}

impl ReaderCardAdapter {
    pub(crate) fn new(session: Arc<Mutex<ReaderSession>>) -> Self {
        Self { session }
    }

    /// Send raw command bytes.
    ///
    /// # Errors
    /// `ReaderError::CardNotConnected` without a card handle, or the backend failure.
    pub fn send_command(&self, command: &[u8]) -> Result<Vec<u8>, ReaderError> {
        self.session.lock().transmit(command)
    }

    /// Send an APDU with command data: `CLA INS P1 P2 Lc data`.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn send_apdu_command(
        &self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        lc: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, ReaderError> {
        self.send_command(&ApduCommand::new(cla, ins, p1, p2).data_with_lc(lc, data).build())
    }

    /// Send an APDU with command data and expected length: `CLA INS P1 P2 Lc data Le`.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    #[allow(clippy::too_many_arguments)]
    pub fn send_apdu_command_le(
        &self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        lc: u8,
        data: &[u8],
        le: u8,
    ) -> Result<Vec<u8>, ReaderError> {
        self.send_command(
            &ApduCommand::new(cla, ins, p1, p2)
                .data_with_lc(lc, data)
                .le(le)
                .build(),
        )
    }

    /// Send an APDU expecting data: `CLA INS P1 P2 Le`.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn send_apdu_command_expect(
        &self,
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        le: u8,
    ) -> Result<Vec<u8>, ReaderError> {
        self.send_command(&ApduCommand::new(cla, ins, p1, p2).le(le).build())
    }

    /// Send a header-only APDU: `CLA INS P1 P2`.
    ///
    /// # Errors
    /// See [`send_command`](Self::send_command).
    pub fn send_apdu_header(&self, cla: u8, ins: u8, p1: u8, p2: u8) -> Result<Vec<u8>, ReaderError> {
        self.send_command(&ApduCommand::new(cla, ins, p1, p2).build())
    }
}

impl fmt::Debug for ReaderCardAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderCardAdapter").finish_non_exhaustive()
    }
}
