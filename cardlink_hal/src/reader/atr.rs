//! ATR to card type resolution.
//!
//! Resolution is a pure function of the ATR bytes:
//!
//! 1. exact match against [`KNOWN_ATRS`], first match wins;
//! 2. generic family derived from the ATR structure (PC/SC part 3 card
//!    name code, contactless T=CL marker, first protocol indicator);
//! 3. otherwise [`UNKNOWN_CARD_TYPE`].

use cardlink_common::consts::UNKNOWN_CARD_TYPE;
use cardlink_common::reader::types::CardProtocol;

/// Contactless card without a more specific family.
pub const GENERIC_T_CL: &str = "GENERIC_T_CL";
/// Contact card speaking T=0.
pub const GENERIC_T0: &str = "GENERIC_T0";
/// Contact card speaking T=1.
pub const GENERIC_T1: &str = "GENERIC_T1";
/// PC/SC storage card with an unlisted card name code.
pub const GENERIC_TAG: &str = "GenericTag";

/// Known ATRs, matched byte for byte.
pub const KNOWN_ATRS: &[(&[u8], &str)] = &[
    (
        &[
            0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00,
            0x01, 0x00, 0x00, 0x00, 0x00, 0x6A,
        ],
        "Mifare1K",
    ),
    (
        &[
            0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00,
            0x02, 0x00, 0x00, 0x00, 0x00, 0x69,
        ],
        "Mifare4K",
    ),
    (
        &[
            0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06, 0x03, 0x00,
            0x03, 0x00, 0x00, 0x00, 0x00, 0x68,
        ],
        "MifareUltralight",
    ),
    (&[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80], "DESFire"),
    (
        &[
            0x3B, 0x86, 0x80, 0x01, 0x06, 0x75, 0x77, 0x81, 0x02, 0x80, 0x00,
        ],
        "DESFireEV1",
    ),
    (
        &[
            0x3B, 0xDF, 0x18, 0xFF, 0x81, 0xF1, 0xFE, 0x43, 0x00, 0x3F, 0x03, 0x83, 0x4D, 0x49,
            0x46, 0x41, 0x52, 0x45, 0x20, 0x50, 0x6C, 0x75, 0x73, 0x20, 0x53, 0x41, 0x4D, 0x3B,
        ],
        "SAM_AV2",
    ),
];

/// PC/SC part 3 storage card prefix up to the RID (`A0 00 00 03 06`).
const PCSC_STORAGE_PREFIX: [u8; 12] = [
    0x3B, 0x8F, 0x80, 0x01, 0x80, 0x4F, 0x0C, 0xA0, 0x00, 0x00, 0x03, 0x06,
];

/// Card type of the given ATR.
///
/// ```
/// use cardlink_hal::reader::card_type_from_atr;
///
/// assert_eq!(card_type_from_atr(&[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80]), "DESFire");
/// assert_eq!(card_type_from_atr(&[]), "UNKNOWN");
/// ```
pub fn card_type_from_atr(atr: &[u8]) -> &'static str {
    KNOWN_ATRS
        .iter()
        .find(|(pattern, _)| *pattern == atr)
        .map(|(_, card_type)| *card_type)
        .or_else(|| generic_family(atr))
        .unwrap_or(UNKNOWN_CARD_TYPE)
}

fn pcsc_storage_card(atr: &[u8]) -> Option<&'static str> {
    if atr.len() < 15 || atr[..PCSC_STORAGE_PREFIX.len()] != PCSC_STORAGE_PREFIX {
        return None;
    }
    let code = u16::from_be_bytes([atr[13], atr[14]]);
    Some(match code {
        0x0001 => "Mifare1K",
        0x0002 => "Mifare4K",
        0x0003 => "MifareUltralight",
        0x0012 => "TagIt",
        0x0014 => "ICode2",
        0x0016 => "ICode1",
        0x0017..=0x0020 => "iCLASS",
        0x0026 => "MifareMini",
        0x003A => "MifareUltralightC",
        _ => GENERIC_TAG,
    })
}

/// Interface TDi bytes of a well-formed ATR.
fn interface_tds(atr: &[u8]) -> Option<heapless::Vec<u8, 8>> {
    let (&ts, _) = atr.split_first()?;
    if ts != 0x3B && ts != 0x3F {
        return None;
    }

    let t0 = *atr.get(1)?;
    let historical_len = usize::from(t0 & 0x0F);
    let mut indicator = t0 >> 4;
    let mut pos = 2;
    let mut tds = heapless::Vec::new();

    loop {
        // TAi, TBi, TCi present bits.
        pos += (indicator & 0x07).count_ones() as usize;
        if indicator & 0x08 == 0 {
            break;
        }
        let td = *atr.get(pos)?;
        tds.push(td).ok()?;
        pos += 1;
        indicator = td >> 4;
    }

    if pos + historical_len > atr.len() {
        return None;
    }
    Some(tds)
}

fn generic_family(atr: &[u8]) -> Option<&'static str> {
    if let Some(card_type) = pcsc_storage_card(atr) {
        return Some(card_type);
    }

    let tds = interface_tds(atr)?;
    if let [0x80, 0x01, ..] = tds.as_slice() {
        return Some(GENERIC_T_CL);
    }
    match tds.first().map_or(0, |td| td & 0x0F) {
        0 => Some(GENERIC_T0),
        1 => Some(GENERIC_T1),
        _ => None,
    }
}

/// Protocol announced by the ATR.
///
/// T=1 if any TDi offers it, T=0 if the first offer is T=0 or no TD1 is
/// present, raw otherwise (including malformed ATRs).
pub fn atr_protocol(atr: &[u8]) -> CardProtocol {
    let Some(tds) = interface_tds(atr) else {
        return CardProtocol::Raw;
    };
    if tds.iter().any(|td| td & 0x0F == 1) {
        return CardProtocol::T1;
    }
    match tds.first().map_or(0, |td| td & 0x0F) {
        0 => CardProtocol::T0,
        _ => CardProtocol::Raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_matches() {
        for (pattern, card_type) in KNOWN_ATRS {
            assert_eq!(card_type_from_atr(pattern), *card_type);
        }
    }

    #[test]
    fn test_pcsc_storage_code() {
        let mut atr = KNOWN_ATRS[0].0.to_vec();
        atr[13] = 0x00;
        atr[14] = 0x26;
        assert_eq!(card_type_from_atr(&atr), "MifareMini");

        atr[14] = 0x3A;
        assert_eq!(card_type_from_atr(&atr), "MifareUltralightC");

        atr[14] = 0x99;
        assert_eq!(card_type_from_atr(&atr), GENERIC_TAG);
    }

    #[test]
    fn test_contactless_generic() {
        // 3B 8A 80 01 + 10 historical bytes + TCK
        let mut atr = vec![0x3B, 0x8A, 0x80, 0x01];
        atr.extend_from_slice(&[0x00; 10]);
        atr.push(0x00);
        assert_eq!(card_type_from_atr(&atr), GENERIC_T_CL);
    }

    #[test]
    fn test_contact_generic_protocols() {
        // No TD1: T=0 implied.
        assert_eq!(card_type_from_atr(&[0x3B, 0x02, 0x14, 0x50]), GENERIC_T0);
        // TA1, TD1 = T=1, TD2 announcing TA3 and TB3.
        assert_eq!(
            card_type_from_atr(&[
                0x3B, 0x92, 0x11, 0x81, 0x31, 0xFE, 0x45, 0x41, 0x42, 0x00
            ]),
            GENERIC_T1
        );
    }

    #[test]
    fn test_invalid_atrs_unknown() {
        assert_eq!(card_type_from_atr(&[]), UNKNOWN_CARD_TYPE);
        assert_eq!(card_type_from_atr(&[0x00, 0x11]), UNKNOWN_CARD_TYPE);
        // Truncated historical bytes.
        assert_eq!(card_type_from_atr(&[0x3B, 0x0F, 0x01]), UNKNOWN_CARD_TYPE);
        // TD1 announced but missing.
        assert_eq!(card_type_from_atr(&[0x3B, 0x80]), UNKNOWN_CARD_TYPE);
    }

    #[test]
    fn test_atr_protocol() {
        assert_eq!(atr_protocol(&[0x3B, 0x02, 0x14, 0x50]), CardProtocol::T0);
        assert_eq!(
            atr_protocol(&[0x3B, 0x92, 0x11, 0x81, 0x31, 0xFE, 0x45, 0x41, 0x42, 0x00]),
            CardProtocol::T1
        );
        // Contactless: TD1 = T=0, TD2 = T=1.
        assert_eq!(
            atr_protocol(&[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80]),
            CardProtocol::T1
        );
        assert_eq!(atr_protocol(&[]), CardProtocol::Raw);
    }
}
