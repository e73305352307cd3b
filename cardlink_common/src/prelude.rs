//! Prelude module for common re-exports.
//!
//! ```rust
//! use cardlink_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::logging::init_tracing;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{CardlinkConfig, ConfigError, ConfigLoader, PluginSettings, SharedConfig};
pub use crate::reader::config::{NetworkConfig, ReaderUnitConfig, SerialConfig, TransportConfig};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{CardError, PluginError, ReaderError, TransportError};

// ─── Reader & Card Types ────────────────────────────────────────────
pub use crate::card::{CardBehavior, hex};
pub use crate::reader::types::{Atr, CardProtocol, DisconnectAction, ReaderState, ShareMode};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{MAX_ATR_LEN, UNKNOWN_CARD_TYPE};
