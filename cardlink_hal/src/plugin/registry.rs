//! Plugin registry.
//!
//! Discovers plugin modules in the configured folders and resolves typed
//! factories by name. The registry is an explicit context object: build one
//! per application (or per test) and share it behind an `Arc`.
//!
//! # Discovery
//!
//! A file is a candidate if its extension is the platform library extension
//! and its stem ends with `readersplugin`, `cardsplugin` or `unifiedplugin`.
//! A candidate is kept only if it loads, exports `getLibraryName`, and its
//! optional `getPluginAbiVersion` matches [`PLUGIN_ABI_VERSION`]. Any failure
//! skips that one module.
//!
//! # Precedence
//!
//! Loaded modules are keyed by path. When several modules export the same
//! factory symbol, the module whose path sorts first wins. Plugins win over
//! the built-in providers of the [`ProviderRegistry`].

use super::abi::{
    CHIP_INFO_SYMBOL, READER_INFO_SYMBOL, chip_symbol, commands_symbol, diversification_symbol,
    reader_symbol,
};
use super::library::{DynLibrary, LibraryLoader, NativeLoader};
use crate::card::{Chip, Commands, KeyDiversification};
use crate::driver_registry::ProviderRegistry;
use crate::reader::ReaderProvider;
use crate::transport::{self, DataTransport};
use cardlink_common::config::PluginSettings;
use cardlink_common::consts::PLUGIN_ABI_VERSION;
use cardlink_common::error::PluginError;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Category declared by a module's file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginCategory {
    /// Reader providers and commands.
    Readers,
    /// Chips and key diversification.
    Cards,
    /// Both of the above.
    Unified,
}

impl PluginCategory {
    const ALL: [PluginCategory; 3] = [
        PluginCategory::Readers,
        PluginCategory::Cards,
        PluginCategory::Unified,
    ];

    /// File stem suffix declaring this category.
    pub fn file_suffix(self) -> &'static str {
        match self {
            PluginCategory::Readers => "readersplugin",
            PluginCategory::Cards => "cardsplugin",
            PluginCategory::Unified => "unifiedplugin",
        }
    }

    /// Category of a candidate module file, `None` if the file is not a plugin.
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        if extension != std::env::consts::DLL_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|category| stem.ends_with(category.file_suffix()))
    }

    /// True if a module of this category answers `requested` lookups.
    pub fn serves(self, requested: PluginCategory) -> bool {
        self == requested || self == PluginCategory::Unified
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PluginCategory::Readers => "readers",
            PluginCategory::Cards => "cards",
            PluginCategory::Unified => "unified",
        };
        f.write_str(text)
    }
}

/// A module kept by the registry.
#[derive(Clone)]
pub struct LoadedModule {
    path: PathBuf,
    category: PluginCategory,
    library_name: String,
    library: Arc<dyn DynLibrary>,
}

impl LoadedModule {
    /// Module file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Category declared by the file name.
    pub fn category(&self) -> PluginCategory {
        self.category
    }

    /// Value of the module's `getLibraryName` marker.
    pub fn library_name(&self) -> &str {
        &self.library_name
    }
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("path", &self.path)
            .field("category", &self.category)
            .field("library_name", &self.library_name)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs a module-provided factory, turning a panic into `None`.
fn invoke<T>(module: &str, symbol: &str, create: impl FnOnce() -> Option<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(create)) {
        Ok(object) => {
            if object.is_none() {
                warn!("{} in {} returned no object", symbol, module);
            }
            object
        }
        Err(payload) => {
            warn!(
                "{} in {} faulted: {}",
                symbol,
                module,
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

/// Registry of plugin modules and built-in providers.
pub struct PluginRegistry {
    settings: PluginSettings,
    loader: Box<dyn LibraryLoader>,
    modules: RwLock<BTreeMap<String, LoadedModule>>,
    builtins: ProviderRegistry,
}

impl PluginRegistry {
    /// Create a registry loading shared libraries from `settings.folders`,
    /// with every built-in provider available.
    pub fn new(settings: PluginSettings) -> Self {
        Self::with_loader(
            settings,
            Box::new(NativeLoader),
            ProviderRegistry::with_builtins(),
        )
    }

    /// Create a registry with an explicit module loader and built-in set.
    pub fn with_loader(
        settings: PluginSettings,
        loader: Box<dyn LibraryLoader>,
        builtins: ProviderRegistry,
    ) -> Self {
        Self {
            settings,
            loader,
            modules: RwLock::new(BTreeMap::new()),
            builtins,
        }
    }

    /// Plugin search settings.
    pub fn settings(&self) -> &PluginSettings {
        &self.settings
    }

    /// Built-in providers.
    pub fn builtins(&self) -> &ProviderRegistry {
        &self.builtins
    }

    // ─── Discovery ──────────────────────────────────────────────────

    /// Walk the plugin folders and load every new candidate module.
    ///
    /// Already loaded paths are skipped, so repeated scans are idempotent.
    /// A missing folder or a failing module is logged and skipped.
    ///
    /// Returns the number of modules loaded by this call.
    pub fn scan(&self) -> usize {
        let mut modules = self.modules.write();
        let mut loaded = 0;

        for folder in &self.settings.folders {
            let entries = match std::fs::read_dir(folder) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Cannot scan plugin folder {}: {}", folder.display(), e);
                    continue;
                }
            };

            let mut candidates: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            candidates.sort();

            for path in candidates {
                let Some(category) = PluginCategory::from_file_name(&path) else {
                    continue;
                };
                let key = path.to_string_lossy().into_owned();
                if modules.contains_key(&key) {
                    continue;
                }

                debug!("Probing {} plugin {}", category, key);
                match self.probe(&path) {
                    Ok((library_name, library)) => {
                        info!("Loaded {} plugin '{}' from {}", category, library_name, key);
                        modules.insert(
                            key,
                            LoadedModule {
                                path,
                                category,
                                library_name,
                                library,
                            },
                        );
                        loaded += 1;
                    }
                    Err(e) => warn!("Skipping plugin: {}", e),
                }
            }
        }

        loaded
    }

    fn probe(&self, path: &Path) -> Result<(String, Arc<dyn DynLibrary>), PluginError> {
        let loader = self.loader.as_ref();
        let probe_module = || -> Result<(String, Arc<dyn DynLibrary>), PluginError> {
            let library = loader.load(path)?;
            let name = library
                .library_name()
                .ok_or_else(|| PluginError::MissingEntryPoint(path.display().to_string()))?;
            match library.abi_version() {
                Some(found) if found != PLUGIN_ABI_VERSION => Err(PluginError::AbiMismatch {
                    path: path.display().to_string(),
                    found,
                    expected: PLUGIN_ABI_VERSION,
                }),
                _ => Ok((name, library)),
            }
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(probe_module));

        outcome.unwrap_or_else(|payload| {
            Err(PluginError::Fault {
                path: path.display().to_string(),
                reason: panic_message(payload.as_ref()),
            })
        })
    }

    fn ensure_scanned(&self) {
        let empty = self.modules.read().is_empty();
        if empty {
            self.scan();
        }
    }

    /// Paths of the loaded modules, in discovery order.
    pub fn loaded_modules(&self) -> Vec<PathBuf> {
        self.modules
            .read()
            .values()
            .map(|module| module.path.clone())
            .collect()
    }

    /// Snapshot of the loaded modules, in discovery order.
    pub fn modules(&self) -> Vec<LoadedModule> {
        self.modules.read().values().cloned().collect()
    }

    // ─── Resolution ─────────────────────────────────────────────────

    /// First factory exported by a module serving `category`.
    ///
    /// The module table lock is released before the caller runs the factory.
    fn find_factory<F: ?Sized>(
        &self,
        category: PluginCategory,
        lookup: impl Fn(&dyn DynLibrary) -> Option<Arc<F>>,
    ) -> Option<(String, Arc<F>)> {
        self.ensure_scanned();
        let modules = self.modules.read();

        for (key, module) in modules.iter() {
            if !module.category.serves(category) {
                continue;
            }
            match panic::catch_unwind(AssertUnwindSafe(|| lookup(module.library.as_ref()))) {
                Ok(Some(factory)) => return Some((key.clone(), factory)),
                Ok(None) => {}
                Err(payload) => warn!(
                    "Symbol lookup in {} faulted: {}",
                    key,
                    panic_message(payload.as_ref())
                ),
            }
        }
        None
    }

    /// Create the reader provider `reader_type`.
    ///
    /// Looks up `get<reader_type>Reader` in reader modules, then the built-in
    /// providers. Returns `None` for an unknown type.
    pub fn resolve_reader_provider(&self, reader_type: &str) -> Option<Box<dyn ReaderProvider>> {
        let symbol = reader_symbol(reader_type);
        let from_plugin = self
            .find_factory(PluginCategory::Readers, |library| {
                library.reader_provider_factory(&symbol)
            })
            .and_then(|(module, factory)| {
                invoke(&module, &symbol, || factory.create_reader_provider())
            });
        if from_plugin.is_some() {
            return from_plugin;
        }

        if let Some(factory) = self.builtins.get_factory(reader_type) {
            return Some(factory());
        }

        debug!("No reader provider for type {}", reader_type);
        None
    }

    /// Create the chip `chip_type` from a card module.
    pub fn resolve_chip(&self, chip_type: &str) -> Option<Box<dyn Chip>> {
        let symbol = chip_symbol(chip_type);
        self.find_factory(PluginCategory::Cards, |library| library.chip_factory(&symbol))
            .and_then(|(module, factory)| invoke(&module, &symbol, || factory.create_chip()))
    }

    /// Create the commands `commands_type` from a reader module.
    ///
    /// Commands are tied to the reader technology, so they are exported
    /// by reader modules (`<CardType><ReaderType>`) or unified modules.
    pub fn resolve_commands(&self, commands_type: &str) -> Option<Box<dyn Commands>> {
        let symbol = commands_symbol(commands_type);
        self.find_factory(PluginCategory::Readers, |library| {
            library.commands_factory(&symbol)
        })
        .and_then(|(module, factory)| invoke(&module, &symbol, || factory.create_commands()))
    }

    /// Create the key diversification `diversification_type` from a card module.
    pub fn resolve_key_diversification(
        &self,
        diversification_type: &str,
    ) -> Option<Box<dyn KeyDiversification>> {
        let symbol = diversification_symbol(diversification_type);
        self.find_factory(PluginCategory::Cards, |library| {
            library.diversification_factory(&symbol)
        })
        .and_then(|(module, factory)| {
            invoke(&module, &symbol, || factory.create_key_diversification())
        })
    }

    // ─── Enumeration ────────────────────────────────────────────────

    /// Type names advertised by every loaded module, in discovery order.
    ///
    /// `Cards` collects `getChipInfoAt`, `Readers` collects `getReaderInfoAt`,
    /// `Unified` collects both. The file name category is not consulted.
    pub fn list_available(&self, category: PluginCategory) -> Vec<String> {
        self.ensure_scanned();
        let symbols: &[&str] = match category {
            PluginCategory::Readers => &[READER_INFO_SYMBOL],
            PluginCategory::Cards => &[CHIP_INFO_SYMBOL],
            PluginCategory::Unified => &[READER_INFO_SYMBOL, CHIP_INFO_SYMBOL],
        };

        let modules = self.modules.read();
        let mut names = Vec::new();
        for (key, module) in modules.iter() {
            for symbol in symbols {
                let listed = panic::catch_unwind(AssertUnwindSafe(|| {
                    module
                        .library
                        .type_enumerator(symbol)
                        .map(|enumerator| enumerator.entries())
                        .unwrap_or_default()
                }));
                match listed {
                    Ok(entries) => names.extend(entries),
                    Err(payload) => warn!(
                        "{} in {} faulted: {}",
                        symbol,
                        key,
                        panic_message(payload.as_ref())
                    ),
                }
            }
        }
        names
    }

    /// Reader types from plugins followed by the built-in providers.
    pub fn available_readers(&self) -> Vec<String> {
        let mut names = self.list_available(PluginCategory::Readers);
        for builtin in self.builtins.list_providers() {
            if !names.iter().any(|name| name == builtin) {
                names.push(builtin.to_string());
            }
        }
        names
    }

    /// Chip types advertised by card modules.
    pub fn available_cards(&self) -> Vec<String> {
        self.list_available(PluginCategory::Cards)
    }

    /// Names of the built-in data transports.
    pub fn available_data_transports(&self) -> Vec<&'static str> {
        transport::available_data_transports()
    }

    /// Create a built-in data transport by name.
    pub fn create_data_transport(&self, name: &str) -> Option<Box<dyn DataTransport>> {
        let created = transport::create_data_transport(name);
        if created.is_none() {
            debug!("No data transport named {}", name);
        }
        created
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("settings", &self.settings)
            .field("modules", &self.loaded_modules())
            .field("builtins", &self.builtins.list_providers())
            .finish()
    }
}
