//! Configuration file loading tests.
//!
//! Full deployment files: reader sections with every transport kind,
//! validation failures surfacing the offending reader, and TOML round trip.

use cardlink_common::config::{CardlinkConfig, ConfigError, ConfigLoader, LogLevel};
use cardlink_common::reader::config::{NetworkConfig, SerialConfig, TransportConfig};
use cardlink_common::reader::types::{DisconnectAction, ShareMode};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, content: &str) -> std::path::PathBuf {
    let path = dir.join("cardlink.toml");
    fs::write(&path, content).expect("write config");
    path
}

const DEPLOYMENT: &str = r#"
[shared]
log_level = "trace"
service_name = "turnstile-3"

[plugins]
folders = ["/opt/cardlink/plugins"]

[[readers]]
name = "desk"

[[readers]]
name = "gate"
provider = "Remote"
share_mode = "exclusive"
disconnect_action = "unpower"
poll_interval_ms = 50

[readers.transport]
type = "tcp"
ip_address = "10.1.0.7"
port = 35963

[[readers]]
name = "kiosk"
provider = "VendorSerial"
card_type = "DESFireEV1"

[readers.transport]
type = "serial"
port_name = "/dev/ttyS1"
baud_rate = 115200
"#;

#[test]
fn test_deployment_file_loads() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(dir.path(), DEPLOYMENT);

    let config = CardlinkConfig::load(&path).expect("load");
    config.validate().expect("valid");

    assert_eq!(config.shared.log_level, LogLevel::Trace);
    assert_eq!(config.readers.len(), 3);

    let desk = &config.readers[0];
    assert_eq!(desk.provider, "PCSC");
    assert!(desk.transport.is_none());

    let gate = &config.readers[1];
    assert_eq!(gate.share_mode, ShareMode::Exclusive);
    assert_eq!(gate.disconnect_action, DisconnectAction::Unpower);
    assert_eq!(
        gate.transport,
        Some(TransportConfig::Tcp(NetworkConfig::new("10.1.0.7", 35963)))
    );

    let kiosk = &config.readers[2];
    assert_eq!(kiosk.card_type.as_deref(), Some("DESFireEV1"));
    let mut serial = SerialConfig::new("/dev/ttyS1");
    serial.baud_rate = 115_200;
    assert_eq!(kiosk.transport, Some(TransportConfig::Serial(serial)));
}

#[test]
fn test_invalid_transport_fails_validation() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"
[shared]
service_name = "turnstile-3"

[[readers]]
name = "gate"
provider = "Remote"

[readers.transport]
type = "udp"
ip_address = "gate.local"
"#,
    );

    let config = CardlinkConfig::load(&path).expect("load");
    assert!(matches!(
        config.validate(),
        Err(ConfigError::ValidationError(msg)) if msg.contains("gate.local")
    ));
}

#[test]
fn test_unknown_transport_kind_is_parse_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(
        dir.path(),
        r#"
[shared]
service_name = "turnstile-3"

[[readers]]
name = "gate"

[readers.transport]
type = "bluetooth"
"#,
    );

    assert!(matches!(
        CardlinkConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_missing_shared_section_is_parse_error() {
    let dir = TempDir::new().expect("tempdir");
    let path = write_config(dir.path(), "[plugins]\nfolders = []\n");
    assert!(matches!(
        CardlinkConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_config_serializes_back() {
    let config: CardlinkConfig = toml::from_str(DEPLOYMENT).expect("parse");
    let text = toml::to_string(&config).expect("serialize");
    let reparsed: CardlinkConfig = toml::from_str(&text).expect("reparse");
    assert_eq!(reparsed.readers, config.readers);
    assert_eq!(reparsed.plugins, config.plugins);
}
