//! # Cardlink HAL Library
//!
//! Smart-card reader access layer with pluggable reader providers and card
//! families.
//!
//! Reader providers, chips, commands and key diversifications are resolved
//! by type name through the [`plugin::PluginRegistry`]: dynamically loaded
//! plugin modules first, then the providers compiled into this crate.
//!
//! # Module Structure
//!
//! - [`plugin`] - Plugin module discovery, loading and factory resolution
//! - [`driver_registry`] - Built-in reader provider registration
//! - [`drivers`] - Built-in reader providers (simulation, remote, PC/SC)
//! - [`reader`] - Reader unit state machine and ATR resolution
//! - [`card`] - Chips, commands, the reader/card adapter and card services
//! - [`transport`] - Serial, TCP and UDP data transports
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          cardlink_hal                            │
//! │  ┌─────────────────┐   ┌──────────────┐   ┌───────────────────┐  │
//! │  │ PluginRegistry  │◄──│  ReaderUnit  │──►│  ReaderBackend    │  │
//! │  │ (plugins +      │   │ (state,ATR)  │   │  (trait object)   │  │
//! │  │  builtins)      │   └──────┬───────┘   └─────────┬─────────┘  │
//! │  └─────────────────┘          │                     │            │
//! │                               ▼                     ▼            │
//! │                  ┌─────────────────────┐   ┌───────────────────┐ │
//! │                  │ Chip ─► Commands ─► │   │  DataTransport    │ │
//! │                  │ ReaderCardAdapter   │   │  (serial/tcp/udp) │ │
//! │                  └─────────────────────┘   └───────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod card;
pub mod driver_registry;
pub mod drivers;
pub mod plugin;
pub mod reader;
pub mod transport;

// Re-export key types for convenience
pub use crate::driver_registry::ProviderRegistry;
pub use crate::plugin::{PluginCategory, PluginRegistry};
pub use crate::reader::ReaderUnit;
