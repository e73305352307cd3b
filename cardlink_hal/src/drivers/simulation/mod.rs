//! Simulation reader provider.
//!
//! This module provides a software reader and card for development and
//! testing without physical hardware.

mod backend;
mod card;
mod hardware;

pub use backend::{DEFAULT_READER_NAME, SimulationBackend, SimulationProvider};
pub use card::{DESFIRE_EV1_ATR, ISO7816_T1_ATR, MIFARE_1K_ATR, SimulatedCard};
pub use hardware::SimulatedHardware;

use crate::reader::ReaderProvider;

/// Provider type name.
pub const PROVIDER_TYPE: &str = "Simulation";

/// Factory function to create a simulation provider instance.
pub fn create_provider() -> Box<dyn ReaderProvider> {
    Box::new(SimulationProvider::new())
}
