//! Simulated ISO7816 card.
//!
//! Answers the interindustry commands used by the storage service plus the
//! PC/SC GET DATA UID pseudo-APDU. Transparent EFs live in memory; PINs
//! carry a retry counter.

use cardlink_common::reader::types::CardProtocol;
use std::collections::{BTreeMap, HashMap, HashSet};

const SW_OK: [u8; 2] = [0x90, 0x00];
const SW_END_OF_FILE: [u8; 2] = [0x62, 0x82];
const SW_WRONG_LENGTH: [u8; 2] = [0x67, 0x00];
const SW_SECURITY_NOT_SATISFIED: [u8; 2] = [0x69, 0x82];
const SW_AUTH_BLOCKED: [u8; 2] = [0x69, 0x83];
const SW_NO_EF_SELECTED: [u8; 2] = [0x69, 0x86];
const SW_FILE_NOT_FOUND: [u8; 2] = [0x6A, 0x82];
const SW_REFERENCE_NOT_FOUND: [u8; 2] = [0x6A, 0x88];
const SW_WRONG_OFFSET: [u8; 2] = [0x6B, 0x00];
const SW_INS_NOT_SUPPORTED: [u8; 2] = [0x6D, 0x00];

/// ATR of the generic contact card (T=1).
pub const ISO7816_T1_ATR: [u8; 10] = [0x3B, 0x92, 0x11, 0x81, 0x31, 0xFE, 0x45, 0x41, 0x42, 0x00];
/// ATR of a DESFire EV1.
pub const DESFIRE_EV1_ATR: [u8; 11] = [
    0x3B, 0x86, 0x80, 0x01, 0x06, 0x75, 0x77, 0x81, 0x02, 0x80, 0x00,
];
/// ATR of a Mifare Classic 1K behind a PC/SC reader.
pub const MIFARE_1K_ATR: [u8; 20] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x6A,
];

#[derive(Debug, Clone)]
struct Pin {
    value: Vec<u8>,
    retries: u8,
    max_retries: u8,
}

/// In-memory card answering APDUs.
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    atr: Vec<u8>,
    uid: Vec<u8>,
    protocol: CardProtocol,
    files: BTreeMap<u16, Vec<u8>>,
    protected: HashMap<u16, u8>,
    pins: HashMap<u8, Pin>,
    verified: HashSet<u8>,
    selected: Option<u16>,
}

impl SimulatedCard {
    /// Card with the given ATR and UID.
    pub fn new(atr: &[u8], uid: Vec<u8>, protocol: CardProtocol) -> Self {
        Self {
            atr: atr.to_vec(),
            uid,
            protocol,
            files: BTreeMap::new(),
            protected: HashMap::new(),
            pins: HashMap::new(),
            verified: HashSet::new(),
            selected: None,
        }
    }

    /// Generic ISO7816 T=1 card.
    pub fn iso7816(uid: Vec<u8>) -> Self {
        Self::new(&ISO7816_T1_ATR, uid, CardProtocol::T1)
    }

    /// DESFire EV1 card.
    pub fn desfire_ev1(uid: Vec<u8>) -> Self {
        Self::new(&DESFIRE_EV1_ATR, uid, CardProtocol::T1)
    }

    /// Mifare Classic 1K card.
    pub fn mifare_1k(uid: Vec<u8>) -> Self {
        Self::new(&MIFARE_1K_ATR, uid, CardProtocol::T1)
    }

    /// Add a transparent EF.
    pub fn with_file(mut self, file_id: u16, content: Vec<u8>) -> Self {
        self.files.insert(file_id, content);
        self
    }

    /// Add a PIN under a reference.
    pub fn with_pin(mut self, reference: u8, pin: &[u8], retries: u8) -> Self {
        self.pins.insert(
            reference,
            Pin {
                value: pin.to_vec(),
                retries,
                max_retries: retries,
            },
        );
        self
    }

    /// Require a verified `reference` to access `file_id`.
    pub fn protect_file(mut self, file_id: u16, reference: u8) -> Self {
        self.protected.insert(file_id, reference);
        self
    }

    /// Answer-To-Reset.
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Card UID.
    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    /// Protocol negotiated on connect.
    pub fn protocol(&self) -> CardProtocol {
        self.protocol
    }

    /// Content of a file.
    pub fn file(&self, file_id: u16) -> Option<&[u8]> {
        self.files.get(&file_id).map(Vec::as_slice)
    }

    /// Remaining retries of a PIN.
    pub fn pin_retries(&self, reference: u8) -> Option<u8> {
        self.pins.get(&reference).map(|pin| pin.retries)
    }

    /// Warm reset: clears the security state and the current file.
    pub fn reset(&mut self) {
        self.verified.clear();
        self.selected = None;
    }

    /// Process one command APDU and return the response APDU.
    pub fn process(&mut self, apdu: &[u8]) -> Vec<u8> {
        let [cla, ins, p1, p2, body @ ..] = apdu else {
            return SW_WRONG_LENGTH.to_vec();
        };
        let offset = usize::from(u16::from_be_bytes([*p1, *p2]));
        let data = command_data(body);

        match (*cla, *ins) {
            (0xFF, 0xCA) => respond(self.uid.clone(), SW_OK),
            (0x00, 0xA4) => self.select(data, *p2),
            (0x00, 0xB0) => self.read_binary(offset, body.last().copied().unwrap_or(0)),
            (0x00, 0xD6) => self.store(offset, data, |cell, byte| *cell = byte),
            (0x00, 0xD0) => self.store(offset, data, |cell, byte| *cell |= byte),
            (0x00, 0x0E) => self.erase(offset),
            (0x00, 0x20) => self.verify(*p2, data),
            (0x00, 0x24) => self.change_reference_data(*p2, data),
            _ => SW_INS_NOT_SUPPORTED.to_vec(),
        }
    }

    fn select(&mut self, data: &[u8], p2: u8) -> Vec<u8> {
        let [hi, lo] = data else {
            return SW_WRONG_LENGTH.to_vec();
        };
        let file_id = u16::from_be_bytes([*hi, *lo]);
        let Some(content) = self.files.get(&file_id) else {
            return SW_FILE_NOT_FOUND.to_vec();
        };
        self.selected = Some(file_id);

        if p2 == 0x04 {
            let [size_hi, size_lo] = (content.len() as u16).to_be_bytes();
            let fcp = vec![
                0x62, 0x08, 0x80, 0x02, size_hi, size_lo, 0x83, 0x02, *hi, *lo,
            ];
            respond(fcp, SW_OK)
        } else {
            SW_OK.to_vec()
        }
    }

    fn accessible_file(&self) -> Result<u16, [u8; 2]> {
        let file_id = self.selected.ok_or(SW_NO_EF_SELECTED)?;
        match self.protected.get(&file_id) {
            Some(reference) if !self.verified.contains(reference) => {
                Err(SW_SECURITY_NOT_SATISFIED)
            }
            _ => Ok(file_id),
        }
    }

    fn read_binary(&mut self, offset: usize, le: u8) -> Vec<u8> {
        let file_id = match self.accessible_file() {
            Ok(file_id) => file_id,
            Err(sw) => return sw.to_vec(),
        };
        let content = self.files.get(&file_id).map(Vec::as_slice).unwrap_or_default();
        if offset > content.len() {
            return SW_WRONG_OFFSET.to_vec();
        }

        let wanted = if le == 0 { 256 } else { usize::from(le) };
        let end = (offset + wanted).min(content.len());
        let data = content[offset..end].to_vec();
        let sw = if data.len() < wanted { SW_END_OF_FILE } else { SW_OK };
        respond(data, sw)
    }

    fn store(&mut self, offset: usize, data: &[u8], write: impl Fn(&mut u8, u8)) -> Vec<u8> {
        let file_id = match self.accessible_file() {
            Ok(file_id) => file_id,
            Err(sw) => return sw.to_vec(),
        };
        let content = self.files.entry(file_id).or_default();
        if content.len() < offset + data.len() {
            content.resize(offset + data.len(), 0x00);
        }
        for (cell, byte) in content[offset..].iter_mut().zip(data) {
            write(cell, *byte);
        }
        SW_OK.to_vec()
    }

    fn erase(&mut self, offset: usize) -> Vec<u8> {
        let file_id = match self.accessible_file() {
            Ok(file_id) => file_id,
            Err(sw) => return sw.to_vec(),
        };
        let content = self.files.entry(file_id).or_default();
        if offset > content.len() {
            return SW_WRONG_OFFSET.to_vec();
        }
        content[offset..].fill(0x00);
        SW_OK.to_vec()
    }

    fn check_pin(&mut self, reference: u8, candidate: &[u8]) -> Result<(), [u8; 2]> {
        let pin = self.pins.get_mut(&reference).ok_or(SW_REFERENCE_NOT_FOUND)?;
        if pin.retries == 0 {
            return Err(SW_AUTH_BLOCKED);
        }
        if pin.value == candidate {
            pin.retries = pin.max_retries;
            Ok(())
        } else {
            pin.retries -= 1;
            self.verified.remove(&reference);
            Err([0x63, 0xC0 | (pin.retries & 0x0F)])
        }
    }

    fn verify(&mut self, reference: u8, candidate: &[u8]) -> Vec<u8> {
        match self.check_pin(reference, candidate) {
            Ok(()) => {
                self.verified.insert(reference);
                SW_OK.to_vec()
            }
            Err(sw) => sw.to_vec(),
        }
    }

    fn change_reference_data(&mut self, reference: u8, data: &[u8]) -> Vec<u8> {
        let Some(old_len) = self.pins.get(&reference).map(|pin| pin.value.len()) else {
            return SW_REFERENCE_NOT_FOUND.to_vec();
        };
        if data.len() <= old_len {
            return SW_WRONG_LENGTH.to_vec();
        }
        let (old, new) = data.split_at(old_len);
        if let Err(sw) = self.check_pin(reference, old) {
            return sw.to_vec();
        }
        if let Some(pin) = self.pins.get_mut(&reference) {
            pin.value = new.to_vec();
        }
        self.verified.insert(reference);
        SW_OK.to_vec()
    }
}

/// Command data of a short APDU body (`Lc data [Le]`), empty for case 1/2.
fn command_data(body: &[u8]) -> &[u8] {
    match body {
        [lc, rest @ ..] if !rest.is_empty() => {
            let len = usize::from(*lc).min(rest.len());
            &rest[..len]
        }
        _ => &[],
    }
}

fn respond(mut data: Vec<u8>, sw: [u8; 2]) -> Vec<u8> {
    data.extend_from_slice(&sw);
    data
}
