//! Workspace-wide constants.

/// Maximum number of ATR bytes kept by a reader unit.
pub const MAX_ATR_LEN: usize = 64;

/// Card type reported when an ATR cannot be classified.
pub const UNKNOWN_CARD_TYPE: &str = "UNKNOWN";

/// Default interval between two availability polls of a data transport.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default IP address of a networked reader.
pub const DEFAULT_IP_ADDRESS: &str = "127.0.0.1";

/// Default TCP/UDP port of a networked reader.
pub const DEFAULT_NETWORK_PORT: u16 = 9559;

/// Default serial line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Host plugin ABI version. Plugins exporting a different
/// `getPluginAbiVersion` value are skipped at scan time.
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Maximum length (including the terminating NUL) of a type name
/// written by a plugin enumeration entry point.
pub const PLUGIN_OBJECT_MAX_LEN: usize = 256;
