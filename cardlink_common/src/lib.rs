//! Cardlink Common Library
//!
//! This crate provides the shared vocabulary for all cardlink workspace
//! crates: error types, configuration loading, logging bootstrap and the
//! value types exchanged between reader units, plugins and card services.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`error`] - Error enums for transports, readers, cards and plugins
//! - [`logging`] - Tracing subscriber bootstrap
//! - [`reader`] - Reader unit configuration and value types
//! - [`card`] - Card service flags and byte helpers
//! - [`consts`] - Workspace-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use cardlink_common::prelude::*;
//!
//! let atr = Atr::new(&[0x3B, 0x81, 0x80, 0x01, 0x80, 0x80]);
//! assert_eq!(atr.len(), 6);
//! ```

pub mod card;
pub mod config;
pub mod consts;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod reader;
