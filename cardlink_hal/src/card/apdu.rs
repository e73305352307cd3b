//! APDU (Application Protocol Data Unit) framing.

use cardlink_common::card::hex;
use cardlink_common::error::CardError;
use std::fmt;

/// Short Lc byte for `data`.
///
/// # Errors
/// `CardError::Unsupported` if `data` does not fit a short APDU.
pub fn data_length(data: &[u8]) -> Result<u8, CardError> {
    u8::try_from(data.len()).map_err(|_| {
        CardError::Unsupported(format!("{} bytes of command data exceed a short APDU", data.len()))
    })
}

/// Command APDU builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    lc: Option<u8>,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    /// Create a header-only command.
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            lc: None,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data with an explicit Lc byte.
    pub fn data_with_lc(mut self, lc: u8, data: &[u8]) -> Self {
        self.lc = Some(lc);
        self.data = data.to_vec();
        self
    }

    /// Set expected response length.
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes.
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];
        if let Some(lc) = self.lc {
            apdu.push(lc);
            apdu.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            apdu.push(le);
        }
        apdu
    }
}

/// Response APDU split into data and status word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Response data (without status word).
    pub data: Vec<u8>,
    /// Status word SW1.
    pub sw1: u8,
    /// Status word SW2.
    pub sw2: u8,
}

impl ApduResponse {
    /// Split a raw response.
    ///
    /// # Errors
    /// `CardError::MalformedResponse` if the response is shorter than a status word.
    pub fn parse(raw: &[u8]) -> Result<Self, CardError> {
        match raw {
            [data @ .., sw1, sw2] => Ok(Self {
                data: data.to_vec(),
                sw1: *sw1,
                sw2: *sw2,
            }),
            _ => Err(CardError::MalformedResponse(format!(
                "response too short: [{}]",
                hex(raw)
            ))),
        }
    }

    /// Check if the response indicates success (9000).
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Get the full status word as a 16-bit value.
    pub fn status_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    /// Fail with `CardError::Status` unless the response is 9000.
    ///
    /// # Errors
    /// `CardError::Status` carrying the returned status word.
    pub fn check(self) -> Result<Self, CardError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CardError::Status {
                sw1: self.sw1,
                sw2: self.sw2,
            })
        }
    }
}

impl fmt::Display for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:02X}{:02X}", hex(&self.data), self.sw1, self.sw2)
    }
}
