//! Sample unified plugin module.
//!
//! Built as `libsampleunifiedplugin.so`; dropping it into a plugin folder
//! makes the following types available:
//!
//! - chip and commands `SampleTag` (ISO 7816 storage tag)
//! - key diversification `SampleXor`
//!
//! Entry points follow the table in `cardlink_hal::plugin::abi`.

#![allow(non_snake_case)]

use cardlink_common::consts::PLUGIN_ABI_VERSION;
use cardlink_common::error::CardError;
use cardlink_hal::card::{Chip, Commands, Iso7816Chip, Iso7816Commands, KeyDiversification};
use cardlink_hal::plugin::abi::{export_object, write_object_name};
use std::any::Any;
use std::ffi::{c_char, c_void};

/// Card type published by this module.
pub const SAMPLE_TAG: &str = "SampleTag";
/// Diversification type published by this module.
pub const SAMPLE_XOR: &str = "SampleXor";

const CHIP_TYPES: [&str; 1] = [SAMPLE_TAG];

/// Toy diversification: the master key XOR-ed with the repeated input.
#[derive(Debug, Default)]
pub struct XorDiversification;

impl KeyDiversification for XorDiversification {
    fn diversification_type(&self) -> &str {
        SAMPLE_XOR
    }

    fn init_diversification(&self, identifier: &[u8], aid: u32, key_no: u8) -> Vec<u8> {
        let mut input = identifier.to_vec();
        input.extend_from_slice(&aid.to_be_bytes()[1..]);
        input.push(key_no);
        input
    }

    fn diversified_key(&self, key: &[u8], diversify: &[u8]) -> Result<Vec<u8>, CardError> {
        if key.len() != 16 {
            return Err(CardError::InvalidAccessInfo(format!(
                "{SAMPLE_XOR} expects a 16 byte master key, got {}",
                key.len()
            )));
        }
        if diversify.is_empty() {
            return Ok(key.to_vec());
        }
        Ok(key
            .iter()
            .zip(diversify.iter().cycle())
            .map(|(k, d)| k ^ d)
            .collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Entry Points ───────────────────────────────────────────────────

#[unsafe(no_mangle)]
pub extern "C" fn getLibraryName() -> *const c_char {
    c"sample".as_ptr()
}

#[unsafe(no_mangle)]
pub extern "C" fn getPluginAbiVersion() -> u32 {
    PLUGIN_ABI_VERSION
}

/// # Safety
///
/// `buf` must be null or valid for `len` bytes of writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn getChipInfoAt(index: u32, buf: *mut c_char, len: usize) -> bool {
    match CHIP_TYPES.get(index as usize) {
        // SAFETY: forwarded caller contract.
        Some(name) => unsafe { write_object_name(name, buf, len) },
        None => false,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn getSampleTagChip() -> *mut c_void {
    export_object::<dyn Chip>(Box::new(Iso7816Chip::new(SAMPLE_TAG)))
}

#[unsafe(no_mangle)]
pub extern "C" fn getSampleTagCommands() -> *mut c_void {
    export_object::<dyn Commands>(Box::new(Iso7816Commands::new()))
}

#[unsafe(no_mangle)]
pub extern "C" fn getSampleXorDiversification() -> *mut c_void {
    export_object::<dyn KeyDiversification>(Box::new(XorDiversification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardlink_hal::plugin::abi::import_object;
    use std::ffi::CStr;

    #[test]
    fn test_library_name() {
        let name = unsafe { CStr::from_ptr(getLibraryName()) };
        assert_eq!(name.to_str().expect("utf8"), "sample");
        assert_eq!(getPluginAbiVersion(), PLUGIN_ABI_VERSION);
    }

    #[test]
    fn test_chip_enumeration() {
        let mut buf = [0 as c_char; 32];
        assert!(unsafe { getChipInfoAt(0, buf.as_mut_ptr(), buf.len()) });
        let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
        assert_eq!(name.to_str().expect("utf8"), SAMPLE_TAG);
        assert!(!unsafe { getChipInfoAt(1, buf.as_mut_ptr(), buf.len()) });
    }

    #[test]
    fn test_exported_objects() {
        let chip = unsafe { import_object::<dyn Chip>(getSampleTagChip()) }.expect("chip");
        assert_eq!(chip.card_type(), SAMPLE_TAG);

        let commands =
            unsafe { import_object::<dyn Commands>(getSampleTagCommands()) }.expect("commands");
        assert!(commands.reader_card_adapter().is_none());

        let diversification = unsafe {
            import_object::<dyn KeyDiversification>(getSampleXorDiversification())
        }
        .expect("diversification");
        assert_eq!(diversification.diversification_type(), SAMPLE_XOR);
    }

    #[test]
    fn test_xor_diversification() {
        let div = XorDiversification;
        let input = div.init_diversification(&[0x04, 0x11], 0x00A1_B2C3, 2);
        assert_eq!(input, vec![0x04, 0x11, 0xA1, 0xB2, 0xC3, 0x02]);

        let key = [0xFFu8; 16];
        let derived = div.diversified_key(&key, &input).expect("key");
        assert_eq!(derived.len(), 16);
        assert_eq!(derived[0], 0xFB);
        assert_eq!(derived[6], 0xFB);
        assert!(matches!(
            div.diversified_key(&[0u8; 8], &input),
            Err(CardError::InvalidAccessInfo(_))
        ));
    }
}
