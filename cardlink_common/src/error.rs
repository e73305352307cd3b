//! Error types shared across the workspace.
//!
//! Each concern gets its own enum so callers can tell a dead channel
//! apart from a card that merely refused an operation:
//!
//! - `TransportError` - byte channel failures (the only place a timeout is raised)
//! - `ReaderError` - reader session and card handle failures
//! - `CardError` - card protocol and authentication failures; the channel stays usable
//! - `PluginError` - plugin module probing and loading failures (contained by the registry)

use std::time::Duration;
use thiserror::Error;

/// Error types for data transport operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel is not open.
    #[error("Transport not connected")]
    NotConnected,

    /// No byte became available before the requested timeout elapsed.
    #[error("Receive timeout ({elapsed:?} > {requested:?})")]
    Timeout {
        /// Time spent polling the channel.
        elapsed: Duration,
        /// Timeout requested by the caller.
        requested: Duration,
    },

    /// Underlying I/O failure.
    #[error("Transport I/O error: {0}")]
    Io(String),

    /// The transport configuration cannot be applied.
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),
}

/// Error types for reader session and card handle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReaderError {
    /// No session is open with the reader.
    #[error("Not connected to reader")]
    NotConnectedToReader,

    /// No card is present on the reader.
    #[error("No card present")]
    NoCard,

    /// The operation requires a connected card handle.
    #[error("Card handle not connected")]
    CardNotConnected,

    /// The reader backend reported a failure.
    #[error("Reader backend error: {0}")]
    Backend(String),

    /// No reader provider is registered under this name.
    #[error("Reader provider not found: {0}")]
    ProviderNotFound(String),

    /// The underlying data transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Error types for card protocol operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    /// The card answered with an unexpected status word.
    #[error("Card returned status {sw1:02X}{sw2:02X}")]
    Status {
        /// Status byte 1.
        sw1: u8,
        /// Status byte 2.
        sw2: u8,
    },

    /// The card rejected the supplied access information.
    #[error("Authentication rejected by card (status {sw1:02X}{sw2:02X})")]
    AuthenticationRejected {
        /// Status byte 1.
        sw1: u8,
        /// Status byte 2.
        sw2: u8,
    },

    /// The location does not belong to this card family or is out of range.
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// The access information does not belong to this card family.
    #[error("Invalid access info: {0}")]
    InvalidAccessInfo(String),

    /// The operation is not supported by this card family.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The card response is too short to carry a status word.
    #[error("Malformed card response: {0}")]
    MalformedResponse(String),

    /// The reader or transport failed underneath the card operation.
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

impl From<TransportError> for CardError {
    fn from(err: TransportError) -> Self {
        CardError::Reader(ReaderError::Transport(err))
    }
}

/// Error types for plugin module handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The dynamic library could not be loaded.
    #[error("Failed to load plugin {path}: {reason}")]
    LoadFailed {
        /// Module path.
        path: String,
        /// Loader diagnostic.
        reason: String,
    },

    /// The module does not export the `getLibraryName` marker.
    #[error("Plugin {0} has no library entry point")]
    MissingEntryPoint(String),

    /// The module was built against a different plugin ABI.
    #[error("Plugin {path} has ABI version {found}, host expects {expected}")]
    AbiMismatch {
        /// Module path.
        path: String,
        /// Version exported by the module.
        found: u32,
        /// Version expected by the host.
        expected: u32,
    },

    /// The module faulted while being probed.
    #[error("Plugin {path} faulted: {reason}")]
    Fault {
        /// Module path.
        path: String,
        /// Fault description.
        reason: String,
    },
}
