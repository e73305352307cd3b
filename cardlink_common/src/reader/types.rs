//! Reader value types.
//!
//! This module defines the data structures describing a reader session:
//! - `Atr` - bounded Answer-To-Reset buffer
//! - `ShareMode` / `DisconnectAction` / `CardProtocol` - card handle parameters
//! - `ReaderState` - reader unit connection state

use crate::consts::MAX_ATR_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Answer-To-Reset bytes of the last connected card.
///
/// Storage is bounded to [`MAX_ATR_LEN`] bytes; longer input is truncated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Atr {
    bytes: heapless::Vec<u8, MAX_ATR_LEN>,
}

impl Atr {
    /// Build an ATR from raw bytes, keeping at most [`MAX_ATR_LEN`] of them.
    pub fn new(bytes: &[u8]) -> Self {
        let len = bytes.len().min(MAX_ATR_LEN);
        let mut stored = heapless::Vec::new();
        // Bounded by capacity above.
        let _ = stored.extend_from_slice(&bytes[..len]);
        Self { bytes: stored }
    }

    /// Raw ATR bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of stored bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if no ATR was read yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy the ATR into `buffer`, bounded by its length.
    ///
    /// Returns the number of bytes copied.
    pub fn copy_to(&self, buffer: &mut [u8]) -> usize {
        let len = self.bytes.len().min(buffer.len());
        buffer[..len].copy_from_slice(&self.bytes[..len]);
        len
    }
}

impl fmt::Display for Atr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::card::hex(&self.bytes))
    }
}

/// Exclusivity under which a card handle is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShareMode {
    /// Other applications may use the card concurrently.
    #[default]
    Shared,
    /// This handle has exclusive access.
    Exclusive,
    /// Direct access to the reader, no card required.
    Direct,
}

/// Card state requested when releasing a card handle.
///
/// The exact effect is reader-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectAction {
    /// Leave the card powered.
    #[default]
    Leave,
    /// Warm reset the card.
    Reset,
    /// Power the card down.
    Unpower,
    /// Eject the card if the reader supports it.
    Eject,
}

/// Transmission protocol negotiated with the card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardProtocol {
    /// ISO7816-3 character protocol.
    T0,
    /// ISO7816-3 block protocol.
    T1,
    /// Raw reader-specific protocol.
    Raw,
}

/// Connection state of a reader unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaderState {
    /// No session with the reader.
    #[default]
    Disconnected,
    /// Session open, no card handle.
    ReaderConnected,
    /// Card handle bound.
    CardConnected,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReaderState::Disconnected => "disconnected",
            ReaderState::ReaderConnected => "reader-connected",
            ReaderState::CardConnected => "card-connected",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atr_truncates_to_capacity() {
        let long = [0xAAu8; 100];
        let atr = Atr::new(&long);
        assert_eq!(atr.len(), MAX_ATR_LEN);
    }

    #[test]
    fn test_atr_copy_to_bounded() {
        let atr = Atr::new(&[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80]);
        let mut small = [0u8; 4];
        assert_eq!(atr.copy_to(&mut small), 4);
        assert_eq!(small, [0x3B, 0x81, 0x80, 0x01]);

        let mut large = [0u8; 16];
        assert_eq!(atr.copy_to(&mut large), 6);
    }

    #[test]
    fn test_atr_display_hex() {
        let atr = Atr::new(&[0x3B, 0x0F]);
        assert_eq!(atr.to_string(), "3B 0F");
    }

    #[test]
    fn test_defaults() {
        assert_eq!(ShareMode::default(), ShareMode::Shared);
        assert_eq!(DisconnectAction::default(), DisconnectAction::Leave);
        assert_eq!(ReaderState::default(), ReaderState::Disconnected);
    }
}
