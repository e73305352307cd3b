//! Plugin modules.
//!
//! - [`abi`] - exported C symbols and object hand-over helpers
//! - [`library`] - module loading seam (native shared libraries, static modules)
//! - [`registry`] - discovery and typed factory resolution

pub mod abi;
pub mod library;
pub mod registry;

pub use library::{
    ChipFactory, CommandsFactory, DynLibrary, KeyDiversificationFactory, LibraryLoader,
    NativeLoader, ReaderProviderFactory, StaticLibrary, StaticLoader, TypeEnumerator,
};
pub use registry::{LoadedModule, PluginCategory, PluginRegistry};
