//! ISO7816 storage service tests through a simulated reader.

use cardlink_common::card::CardBehavior;
use cardlink_common::config::PluginSettings;
use cardlink_common::error::CardError;
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::ReaderState;
use cardlink_hal::card::{
    Iso7816AccessInfo, Iso7816Commands, Iso7816Location, StorageCardService, downcast_commands,
};
use cardlink_hal::drivers::simulation::{SimulatedCard, SimulatedHardware, SimulationProvider};
use cardlink_hal::plugin::PluginRegistry;
use cardlink_hal::reader::ReaderUnit;
use std::sync::Arc;

const DATA_FILE: u16 = 0x0101;
const OPEN_FILE: u16 = 0x0102;
const PIN_REFERENCE: u8 = 0x80;

fn connected_unit() -> (ReaderUnit, SimulatedHardware) {
    let hardware = SimulatedHardware::new("Sim Reader 0");
    hardware.insert_card(
        SimulatedCard::iso7816(vec![0x01, 0x02, 0x03, 0x04])
            .with_file(DATA_FILE, vec![0x00; 16])
            .with_file(OPEN_FILE, b"public data".to_vec())
            .with_pin(PIN_REFERENCE, b"1234", 3)
            .protect_file(DATA_FILE, PIN_REFERENCE),
    );
    let provider = SimulationProvider::with_hardware(hardware.clone());
    let registry = Arc::new(PluginRegistry::new(PluginSettings::default()));
    let mut unit = ReaderUnit::with_provider(
        ReaderUnitConfig::new("desk", "Simulation"),
        &provider,
        registry,
    )
    .expect("unit");
    assert!(unit.connect());
    (unit, hardware)
}

fn service(unit: &mut ReaderUnit) -> Box<dyn StorageCardService> {
    unit.single_chip()
        .expect("chip")
        .storage_service()
        .expect("storage service")
}

fn pin() -> Iso7816AccessInfo {
    Iso7816AccessInfo::new(PIN_REFERENCE, b"1234".to_vec())
}

#[test]
fn test_write_then_read() {
    let (mut unit, hardware) = connected_unit();
    let service = service(&mut unit);
    let location = Iso7816Location::new(DATA_FILE, 4);
    let access = pin();

    service
        .write_data(&location, Some(&access), None, b"card", CardBehavior::empty())
        .expect("write");
    assert_eq!(
        hardware.file_contents(DATA_FILE).expect("file")[4..8],
        *b"card"
    );

    let mut buffer = [0u8; 4];
    let read = service
        .read_data(&location, Some(&access), &mut buffer, CardBehavior::empty())
        .expect("read");
    assert_eq!(read, 4);
    assert_eq!(&buffer, b"card");
}

#[test]
fn test_read_stops_at_end_of_file() {
    let (mut unit, _) = connected_unit();
    let service = service(&mut unit);

    let mut buffer = [0u8; 64];
    let read = service
        .read_data(
            &Iso7816Location::new(OPEN_FILE, 0),
            None,
            &mut buffer,
            CardBehavior::empty(),
        )
        .expect("read");
    assert_eq!(&buffer[..read], b"public data");
}

#[test]
fn test_write_grows_file_across_chunks() {
    let (mut unit, hardware) = connected_unit();
    let service = service(&mut unit);
    let data: Vec<u8> = (0..600u16).map(|i| (i % 251) as u8).collect();

    service
        .write_data(
            &Iso7816Location::new(OPEN_FILE, 0),
            None,
            None,
            &data,
            CardBehavior::empty(),
        )
        .expect("write");
    assert_eq!(hardware.file_contents(OPEN_FILE).expect("file"), data);

    let mut buffer = vec![0u8; 600];
    let read = service
        .read_data(
            &Iso7816Location::new(OPEN_FILE, 0),
            None,
            &mut buffer,
            CardBehavior::empty(),
        )
        .expect("read");
    assert_eq!(read, 600);
    assert_eq!(buffer, data);
}

#[test]
fn test_append_only_uses_write_binary() {
    let (mut unit, hardware) = connected_unit();
    let service = service(&mut unit);
    let location = Iso7816Location::new(DATA_FILE, 0);
    let access = pin();

    service
        .write_data(&location, Some(&access), None, &[0x0F], CardBehavior::empty())
        .expect("update");
    service
        .write_data(&location, Some(&access), None, &[0xF0], CardBehavior::APPEND_ONLY)
        .expect("write");
    assert_eq!(hardware.file_contents(DATA_FILE).expect("file")[0], 0xFF);
}

#[test]
fn test_erase_location() {
    let (mut unit, hardware) = connected_unit();
    let service = service(&mut unit);

    service
        .erase_location(&Iso7816Location::new(OPEN_FILE, 6), None)
        .expect("erase");
    assert_eq!(
        hardware.file_contents(OPEN_FILE).expect("file"),
        b"public\0\0\0\0\0".to_vec()
    );
}

#[test]
fn test_erase_whole_selected_file() {
    let (mut unit, hardware) = connected_unit();
    let service = service(&mut unit);
    assert_eq!(
        service.erase(),
        Err(CardError::Status { sw1: 0x69, sw2: 0x86 })
    );

    let mut buffer = [0u8; 6];
    service
        .read_data(
            &Iso7816Location::new(OPEN_FILE, 0),
            None,
            &mut buffer,
            CardBehavior::empty(),
        )
        .expect("read");
    service.erase().expect("erase");
    assert_eq!(hardware.file_contents(OPEN_FILE).expect("file"), vec![0u8; 11]);
}

#[test]
fn test_commands_send_short_apdus() {
    let (mut unit, hardware) = connected_unit();
    let chip = unit.single_chip().expect("chip");
    let commands = chip.commands().expect("commands");
    let iso = downcast_commands::<Iso7816Commands>(commands.as_ref()).expect("iso commands");
    let before = hardware.transmitted().len();

    iso.select_file(OPEN_FILE).expect("select");
    iso.read_binary(0x0102, 0x04).expect("read");
    iso.update_binary(0x0000, b"PU").expect("update");
    iso.erase_binary(0x0006).expect("erase");
    iso.verify(PIN_REFERENCE, b"1234").expect("verify");
    iso.select_file_fcp(OPEN_FILE).expect("select fcp");

    assert_eq!(
        hardware.transmitted()[before..].to_vec(),
        vec![
            vec![0x00, 0xA4, 0x00, 0x0C, 0x02, 0x01, 0x02],
            vec![0x00, 0xB0, 0x01, 0x02, 0x04],
            vec![0x00, 0xD6, 0x00, 0x00, 0x02, b'P', b'U'],
            vec![0x00, 0x0E, 0x00, 0x06],
            vec![0x00, 0x20, 0x00, 0x80, 0x04, b'1', b'2', b'3', b'4'],
            vec![0x00, 0xA4, 0x00, 0x04, 0x02, 0x01, 0x02, 0x00],
        ]
    );
}

#[test]
fn test_read_header_returns_fcp() {
    let (mut unit, _) = connected_unit();
    let service = service(&mut unit);

    let mut header = [0u8; 4];
    let len = service
        .read_data_header(&Iso7816Location::new(OPEN_FILE, 0), None, &mut header)
        .expect("header");
    assert_eq!(len, 10);
    assert_eq!(header, [0x62, 0x08, 0x80, 0x02]);
}

#[test]
fn test_rejected_verify_keeps_card_connected() {
    let (mut unit, _) = connected_unit();
    let service = service(&mut unit);
    let wrong = Iso7816AccessInfo::new(PIN_REFERENCE, b"0000".to_vec());

    let mut buffer = [0u8; 4];
    let result = service.read_data(
        &Iso7816Location::new(DATA_FILE, 0),
        Some(&wrong),
        &mut buffer,
        CardBehavior::empty(),
    );
    assert_eq!(
        result,
        Err(CardError::AuthenticationRejected {
            sw1: 0x63,
            sw2: 0xC2
        })
    );
    assert_eq!(unit.state(), ReaderState::CardConnected);
    assert!(unit.card_serial_number().is_ok());
}

#[test]
fn test_protected_file_without_access_fails() {
    let (mut unit, _) = connected_unit();
    let service = service(&mut unit);

    let mut buffer = [0u8; 4];
    let result = service.read_data(
        &Iso7816Location::new(DATA_FILE, 0),
        None,
        &mut buffer,
        CardBehavior::empty(),
    );
    assert_eq!(result, Err(CardError::Status { sw1: 0x69, sw2: 0x82 }));
}

#[test]
fn test_change_reference_data() {
    let (mut unit, _) = connected_unit();
    let service = service(&mut unit);
    let location = Iso7816Location::new(DATA_FILE, 0);
    let new_pin = Iso7816AccessInfo::new(PIN_REFERENCE, b"98765".to_vec());

    service
        .write_data(&location, Some(&pin()), Some(&new_pin), &[0x42], CardBehavior::empty())
        .expect("rotate");

    let mut buffer = [0u8; 1];
    assert!(matches!(
        service.read_data(&location, Some(&pin()), &mut buffer, CardBehavior::empty()),
        Err(CardError::AuthenticationRejected { .. })
    ));
    service
        .read_data(&location, Some(&new_pin), &mut buffer, CardBehavior::empty())
        .expect("read with new pin");
    assert_eq!(buffer, [0x42]);
}

#[test]
fn test_disconnected_card_reports_reader_error() {
    let (mut unit, _) = connected_unit();
    let service = service(&mut unit);
    unit.disconnect();

    let mut buffer = [0u8; 1];
    assert!(matches!(
        service.read_data(
            &Iso7816Location::new(OPEN_FILE, 0),
            None,
            &mut buffer,
            CardBehavior::empty()
        ),
        Err(CardError::Reader(_))
    ));
}
