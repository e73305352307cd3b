//! Reader unit configuration and value types.
//!
//! This module contains the types exchanged between reader units,
//! reader backends and data transports.

pub mod config;
pub mod types;
