//! Built-in reader providers.
//!
//! - [`simulation`] - In-memory reader and card for development and testing
//! - [`remote`] - Reader reached over a data transport (serial, TCP, UDP)
//! - `pcsc` - PC/SC readers (feature `pcsc`)
//!
//! # Adding New Providers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement [`ReaderProvider`](crate::reader::ReaderProvider) and
//!    [`ReaderBackend`](crate::reader::ReaderBackend)
//! 3. Register the provider in [`register_builtin_providers`]

#[cfg(feature = "pcsc")]
pub mod pcsc;
pub mod remote;
pub mod simulation;

use crate::driver_registry::ProviderRegistry;

/// Register every built-in provider.
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(simulation::PROVIDER_TYPE, simulation::create_provider);
    registry.register(remote::PROVIDER_TYPE, remote::create_provider);

    #[cfg(feature = "pcsc")]
    registry.register(pcsc::PROVIDER_TYPE, pcsc::create_provider);
}
