//! Reader unit state machine tests against the simulation provider.

use cardlink_common::config::PluginSettings;
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::{CardProtocol, DisconnectAction, ReaderState, ShareMode};
use cardlink_hal::card::{Chip, Iso7816Chip, downcast_chip};
use cardlink_hal::driver_registry::ProviderRegistry;
use cardlink_hal::drivers::simulation::{
    DESFIRE_EV1_ATR, SimulatedCard, SimulatedHardware, SimulationProvider,
};
use cardlink_hal::plugin::{PluginRegistry, StaticLibrary, StaticLoader};
use cardlink_hal::reader::ReaderUnit;
use std::sync::Arc;
use std::time::Duration;

const READER_NAME: &str = "Sim Reader 0";

fn registry() -> Arc<PluginRegistry> {
    Arc::new(PluginRegistry::new(PluginSettings::default()))
}

fn config(name: &str) -> ReaderUnitConfig {
    let mut config = ReaderUnitConfig::new(name, "Simulation");
    config.poll_interval_ms = 10;
    config
}

fn unit_with_card(card: Option<SimulatedCard>) -> (ReaderUnit, SimulatedHardware) {
    let hardware = SimulatedHardware::new(READER_NAME);
    if let Some(card) = card {
        hardware.insert_card(card);
    }
    let provider = SimulationProvider::with_hardware(hardware.clone());
    let unit = ReaderUnit::with_provider(config("door"), &provider, registry()).expect("unit");
    (unit, hardware)
}

fn iso_card() -> SimulatedCard {
    SimulatedCard::iso7816(vec![0xDE, 0xAD, 0xBE, 0xEF])
}

#[test]
fn test_initial_state() {
    let (unit, _) = unit_with_card(None);
    assert_eq!(unit.state(), ReaderState::Disconnected);
    assert!(!unit.is_connected());
    assert_eq!(unit.connected_name(), None);
    assert_eq!(unit.card_type(), "UNKNOWN");
    assert_eq!(unit.get_atr(&mut [0u8; 8]), 0);
}

#[test]
fn test_unknown_provider_rejected() {
    let result = ReaderUnit::new(ReaderUnitConfig::new("door", "NoSuchReader"), registry());
    assert!(result.is_err());
}

#[test]
fn test_new_resolves_builtin_provider() {
    let unit = ReaderUnit::new(config("door"), registry()).expect("unit");
    assert_eq!(unit.backend_type(), "Simulation");
    assert!(unit.connect_to_reader());
    assert_eq!(unit.state(), ReaderState::ReaderConnected);
}

#[test]
fn test_connection_lifecycle() {
    let (mut unit, hardware) = unit_with_card(Some(iso_card()));

    assert!(unit.wait_insertion(Duration::from_millis(200)));
    assert_eq!(unit.state(), ReaderState::ReaderConnected);
    assert_eq!(unit.connected_name().as_deref(), Some(READER_NAME));

    assert!(unit.connect());
    assert_eq!(unit.state(), ReaderState::CardConnected);
    assert_eq!(unit.active_protocol(), Some(CardProtocol::T1));
    assert_eq!(unit.card_serial_number().expect("uid"), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(hardware.open_handles(), 1);

    unit.disconnect();
    assert_eq!(unit.state(), ReaderState::ReaderConnected);
    assert_eq!(hardware.open_handles(), 0);

    unit.disconnect_from_reader();
    assert_eq!(unit.state(), ReaderState::Disconnected);
}

#[test]
fn test_wait_insertion_times_out_without_card() {
    let (unit, _) = unit_with_card(None);
    assert!(!unit.wait_insertion(Duration::from_millis(50)));
    assert_eq!(unit.connected_name(), None);
}

#[test]
fn test_wait_insertion_while_connected_fails() {
    let (mut unit, _) = unit_with_card(Some(iso_card()));
    assert!(unit.connect());
    assert!(!unit.wait_insertion(Duration::from_millis(50)));
    assert_eq!(unit.state(), ReaderState::CardConnected);
}

#[test]
fn test_wait_removal_releases_handle() {
    let (mut unit, hardware) = unit_with_card(Some(iso_card()));
    assert!(unit.connect());
    assert!(!unit.wait_removal(Duration::from_millis(30)));

    hardware.remove_card();
    assert!(unit.wait_removal(Duration::from_millis(200)));
    assert_eq!(unit.state(), ReaderState::ReaderConnected);
    assert_eq!(unit.connected_name(), None);
    assert_eq!(hardware.open_handles(), 0);
}

#[test]
fn test_repeated_connect_holds_single_handle() {
    let (mut unit, hardware) = unit_with_card(Some(iso_card()));
    for _ in 0..5 {
        assert!(unit.connect());
    }
    assert!(hardware.max_open_handles() <= 1);
    assert_eq!(hardware.open_handles(), 1);
}

#[test]
fn test_connect_without_card_fails() {
    let (mut unit, _) = unit_with_card(None);
    assert!(!unit.connect());
    assert_eq!(unit.state(), ReaderState::ReaderConnected);
}

#[test]
fn test_connect_with_share_mode() {
    let (mut unit, _) = unit_with_card(Some(iso_card()));
    assert!(unit.connect_with(ShareMode::Exclusive));
    assert_eq!(unit.share_mode(), ShareMode::Exclusive);
}

#[test]
fn test_reconnect_requires_handle() {
    let (mut unit, _) = unit_with_card(Some(iso_card()));
    assert!(!unit.reconnect());

    assert!(unit.connect());
    assert!(unit.reconnect());
    assert_eq!(unit.state(), ReaderState::CardConnected);

    unit.disconnect_with(DisconnectAction::Reset);
    assert!(!unit.reconnect());
}

#[test]
fn test_get_atr_bounded_by_buffer() {
    let (mut unit, _) = unit_with_card(Some(SimulatedCard::desfire_ev1(vec![0x04, 0x01])));
    assert!(unit.connect());

    let mut small = [0u8; 4];
    assert_eq!(unit.get_atr(&mut small), 4);
    assert_eq!(small, &DESFIRE_EV1_ATR[..4]);

    let mut large = [0u8; 32];
    assert_eq!(unit.get_atr(&mut large), DESFIRE_EV1_ATR.len());
    assert_eq!(unit.atr().as_bytes(), &DESFIRE_EV1_ATR[..]);
}

#[test]
fn test_proxy_shares_target_session() {
    let (target, _) = unit_with_card(Some(iso_card()));
    let (mut proxy, _) = unit_with_card(None);
    proxy.set_name("proxy");
    proxy.make_proxy(&target, target.configuration().clone());

    let direct = target.wait_insertion(Duration::from_millis(5000));
    let direct_name = target.connected_name();
    let proxied = proxy.wait_insertion(Duration::from_millis(5000));

    assert_eq!(direct, proxied);
    assert_eq!(proxy.connected_name(), direct_name);
    assert_eq!(proxy.name(), "proxy");

    assert!(proxy.connect());
    assert_eq!(target.state(), ReaderState::CardConnected);
}

#[test]
fn test_proxy_card_swap_refreshes_target_chip() {
    let (mut target, hardware) =
        unit_with_card(Some(SimulatedCard::desfire_ev1(vec![0x04, 0x01])));
    let (mut proxy, _) = unit_with_card(None);
    proxy.make_proxy(&target, target.configuration().clone());

    assert!(target.connect());
    let before = target.single_chip().expect("chip");
    assert_eq!(before.card_type(), "DESFireEV1");

    proxy.disconnect();
    hardware.insert_card(iso_card());
    assert!(proxy.connect());

    let proxied = proxy.single_chip().expect("proxy chip");
    let direct = target.single_chip().expect("target chip");
    assert_eq!(direct.card_type(), "GENERIC_T1");
    assert_eq!(direct.chip_identifier(), &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert!(Arc::ptr_eq(&proxied, &direct));
    assert!(!Arc::ptr_eq(&before, &direct));
}

#[test]
fn test_single_chip_cached_per_connection() {
    let (mut unit, _) = unit_with_card(Some(SimulatedCard::desfire_ev1(vec![0x04, 0x01])));
    assert!(unit.single_chip().is_none());
    assert!(unit.connect());

    let chip = unit.single_chip().expect("chip");
    assert_eq!(chip.card_type(), "DESFireEV1");
    assert_eq!(chip.chip_identifier(), &[0x04, 0x01]);
    assert!(downcast_chip::<Iso7816Chip>(chip.as_ref()).is_some());

    let again = unit.single_chip().expect("chip");
    assert!(Arc::ptr_eq(&chip, &again));
    assert_eq!(unit.chip_list().len(), 1);

    unit.disconnect();
    assert!(unit.single_chip().is_none());
}

#[test]
fn test_forced_card_type() {
    let (mut unit, _) = unit_with_card(Some(iso_card()));
    unit.set_card_type("CustomTag");
    assert!(unit.connect());
    assert_eq!(unit.single_chip().expect("chip").card_type(), "CustomTag");

    unit.set_card_type("UNKNOWN");
    assert_eq!(unit.single_chip().expect("chip").card_type(), "GENERIC_T1");
}

#[test]
fn test_chip_from_card_plugin() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir
        .path()
        .join(format!("tagscardsplugin.{}", std::env::consts::DLL_EXTENSION));
    std::fs::write(&path, b"module").expect("write");

    let mut loader = StaticLoader::new();
    loader.register(
        path,
        StaticLibrary::new("tags").with_chip("DESFireEV1", || {
            let mut chip = Iso7816Chip::new("DESFireEV1");
            chip.set_chip_identifier(vec![0xFF]);
            Some(Box::new(chip) as Box<dyn Chip>)
        }),
    );
    let registry = Arc::new(PluginRegistry::with_loader(
        PluginSettings::new([dir.path()]),
        Box::new(loader),
        ProviderRegistry::with_builtins(),
    ));

    let hardware = SimulatedHardware::new(READER_NAME);
    hardware.insert_card(SimulatedCard::desfire_ev1(vec![0x04, 0x02]));
    let provider = SimulationProvider::with_hardware(hardware);
    let mut unit = ReaderUnit::with_provider(config("door"), &provider, registry).expect("unit");
    assert!(unit.connect());

    let chip = unit.single_chip().expect("chip");
    assert_eq!(chip.card_type(), "DESFireEV1");
    // Identifier refreshed from the connected card.
    assert_eq!(chip.chip_identifier(), &[0x04, 0x02]);
    assert!(chip.commands().is_some());
}

#[test]
fn test_reader_serial_number() {
    let (unit, _) = unit_with_card(None);
    assert_eq!(
        unit.reader_serial_number().expect("serial"),
        format!("SIM-{READER_NAME}").into_bytes()
    );
}

#[test]
fn test_serialize_round_trip() {
    let (mut unit, _) = unit_with_card(None);
    let mut updated = unit.configuration().clone();
    updated.share_mode = ShareMode::Exclusive;
    updated.disconnect_action = DisconnectAction::Unpower;
    updated.card_type = Some("Mifare1K".to_string());
    unit.set_configuration(updated.clone());

    let mut table = toml::Table::new();
    unit.serialize(&mut table).expect("serialize");
    let node = table.get("door").expect("node").clone();

    let (mut restored, _) = unit_with_card(None);
    restored.unserialize(&node).expect("unserialize");
    assert_eq!(restored.configuration(), &updated);
    assert_eq!(restored.card_type(), "Mifare1K");
}

#[test]
fn test_unserialize_rejects_invalid_node() {
    let (mut unit, _) = unit_with_card(None);
    let node = toml::Value::String("not a table".to_string());
    assert!(unit.unserialize(&node).is_err());
}
