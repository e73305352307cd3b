//! Loaded plugin modules.
//!
//! [`DynLibrary`] is the seam between the registry and the way a module is
//! actually brought into the process: [`NativeLoader`] opens shared
//! libraries with `libloading`, [`StaticLoader`] serves modules linked into
//! the host binary.

use super::abi::{
    ABI_VERSION_SYMBOL, AbiVersionFn, CHIP_INFO_SYMBOL, LIBRARY_NAME_SYMBOL, LibraryNameFn,
    ObjectFactoryFn, ObjectInfoAtFn, READER_INFO_SYMBOL, chip_symbol, commands_symbol,
    diversification_symbol, import_object, reader_symbol,
};
use crate::card::{Chip, Commands, KeyDiversification};
use crate::reader::ReaderProvider;
use cardlink_common::consts::PLUGIN_OBJECT_MAX_LEN;
use cardlink_common::error::PluginError;
use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound on enumerated type names, guards against a module that never ends its list.
const MAX_ENUMERATED_TYPES: u32 = 1024;

// ─── Factories ──────────────────────────────────────────────────────

/// Creates reader provider instances.
pub trait ReaderProviderFactory: Send + Sync {
    /// Create a fresh provider.
    fn create_reader_provider(&self) -> Option<Box<dyn ReaderProvider>>;
}

impl<F> ReaderProviderFactory for F
where
    F: Fn() -> Option<Box<dyn ReaderProvider>> + Send + Sync,
{
    fn create_reader_provider(&self) -> Option<Box<dyn ReaderProvider>> {
        self()
    }
}

/// Creates chip instances.
pub trait ChipFactory: Send + Sync {
    /// Create a fresh chip.
    fn create_chip(&self) -> Option<Box<dyn Chip>>;
}

impl<F> ChipFactory for F
where
    F: Fn() -> Option<Box<dyn Chip>> + Send + Sync,
{
    fn create_chip(&self) -> Option<Box<dyn Chip>> {
        self()
    }
}

/// Creates commands instances.
pub trait CommandsFactory: Send + Sync {
    /// Create fresh commands.
    fn create_commands(&self) -> Option<Box<dyn Commands>>;
}

impl<F> CommandsFactory for F
where
    F: Fn() -> Option<Box<dyn Commands>> + Send + Sync,
{
    fn create_commands(&self) -> Option<Box<dyn Commands>> {
        self()
    }
}

/// Creates key diversification instances.
pub trait KeyDiversificationFactory: Send + Sync {
    /// Create a fresh diversification algorithm.
    fn create_key_diversification(&self) -> Option<Box<dyn KeyDiversification>>;
}

impl<F> KeyDiversificationFactory for F
where
    F: Fn() -> Option<Box<dyn KeyDiversification>> + Send + Sync,
{
    fn create_key_diversification(&self) -> Option<Box<dyn KeyDiversification>> {
        self()
    }
}

/// Indexed list of type names exported by a module.
pub trait TypeEnumerator: Send + Sync {
    /// Type name at `index`, `None` past the end.
    fn entry_at(&self, index: u32) -> Option<String>;

    /// Every type name, in module order.
    fn entries(&self) -> Vec<String> {
        (0..MAX_ENUMERATED_TYPES)
            .map_while(|index| self.entry_at(index))
            .collect()
    }
}

impl TypeEnumerator for Vec<String> {
    fn entry_at(&self, index: u32) -> Option<String> {
        self.get(index as usize).cloned()
    }
}

// ─── Library Seam ───────────────────────────────────────────────────

/// A module brought into the process.
///
/// Lookups take full symbol names as built by the helpers in
/// [`abi`](super::abi).
pub trait DynLibrary: Send + Sync {
    /// Value of the `getLibraryName` marker, `None` if the marker is absent.
    fn library_name(&self) -> Option<String>;

    /// Value of `getPluginAbiVersion`, `None` if not exported.
    fn abi_version(&self) -> Option<u32>;

    /// Reader provider factory exported under `symbol`.
    fn reader_provider_factory(&self, symbol: &str) -> Option<Arc<dyn ReaderProviderFactory>>;

    /// Chip factory exported under `symbol`.
    fn chip_factory(&self, symbol: &str) -> Option<Arc<dyn ChipFactory>>;

    /// Commands factory exported under `symbol`.
    fn commands_factory(&self, symbol: &str) -> Option<Arc<dyn CommandsFactory>>;

    /// Key diversification factory exported under `symbol`.
    fn diversification_factory(&self, symbol: &str)
    -> Option<Arc<dyn KeyDiversificationFactory>>;

    /// Type enumerator exported under `symbol`.
    fn type_enumerator(&self, symbol: &str) -> Option<Arc<dyn TypeEnumerator>>;
}

/// Brings a module file into the process.
pub trait LibraryLoader: Send + Sync {
    /// Load the module at `path`.
    ///
    /// # Errors
    /// `PluginError::LoadFailed` if the file is not a loadable module.
    fn load(&self, path: &Path) -> Result<Arc<dyn DynLibrary>, PluginError>;
}

// ─── Native Modules ─────────────────────────────────────────────────

/// Loads shared libraries from disk.
///
/// Loaded libraries stay mapped for the process lifetime: objects they
/// created carry vtables pointing into the module.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl LibraryLoader for NativeLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn DynLibrary>, PluginError> {
        // SAFETY: loading runs module initializers; plugin folders are trusted.
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            PluginError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let library = Arc::new(library);
        // Never unloaded.
        std::mem::forget(Arc::clone(&library));
        Ok(Arc::new(NativeLibrary { library }))
    }
}

/// A shared library opened by [`NativeLoader`].
#[derive(Debug)]
pub struct NativeLibrary {
    library: Arc<libloading::Library>,
}

impl NativeLibrary {
    fn symbol<T: Copy>(&self, name: &str) -> Option<T> {
        // SAFETY: T is one of the fn pointer types of the plugin ABI.
        unsafe { self.library.get::<T>(name.as_bytes()) }
            .ok()
            .map(|symbol| *symbol)
    }

    fn factory(&self, symbol: &str) -> Option<Arc<NativeFactory>> {
        self.symbol::<ObjectFactoryFn>(symbol).map(|create| {
            Arc::new(NativeFactory {
                _library: Arc::clone(&self.library),
                create,
            })
        })
    }
}

impl DynLibrary for NativeLibrary {
    fn library_name(&self) -> Option<String> {
        let name_fn = self.symbol::<LibraryNameFn>(LIBRARY_NAME_SYMBOL)?;
        // SAFETY: the marker returns a static nul-terminated string or null.
        let ptr = unsafe { name_fn() };
        if ptr.is_null() {
            return Some(String::new());
        }
        // SAFETY: non-null marker value is a valid C string.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    fn abi_version(&self) -> Option<u32> {
        let version_fn = self.symbol::<AbiVersionFn>(ABI_VERSION_SYMBOL)?;
        // SAFETY: exported with the AbiVersionFn signature.
        Some(unsafe { version_fn() })
    }

    fn reader_provider_factory(&self, symbol: &str) -> Option<Arc<dyn ReaderProviderFactory>> {
        self.factory(symbol)
            .map(|f| f as Arc<dyn ReaderProviderFactory>)
    }

    fn chip_factory(&self, symbol: &str) -> Option<Arc<dyn ChipFactory>> {
        self.factory(symbol).map(|f| f as Arc<dyn ChipFactory>)
    }

    fn commands_factory(&self, symbol: &str) -> Option<Arc<dyn CommandsFactory>> {
        self.factory(symbol).map(|f| f as Arc<dyn CommandsFactory>)
    }

    fn diversification_factory(
        &self,
        symbol: &str,
    ) -> Option<Arc<dyn KeyDiversificationFactory>> {
        self.factory(symbol)
            .map(|f| f as Arc<dyn KeyDiversificationFactory>)
    }

    fn type_enumerator(&self, symbol: &str) -> Option<Arc<dyn TypeEnumerator>> {
        self.symbol::<ObjectInfoAtFn>(symbol).map(|info_at| {
            Arc::new(NativeEnumerator {
                _library: Arc::clone(&self.library),
                info_at,
            }) as Arc<dyn TypeEnumerator>
        })
    }
}

struct NativeFactory {
    _library: Arc<libloading::Library>,
    create: ObjectFactoryFn,
}

impl NativeFactory {
    /// # Safety
    /// The factory symbol must export an object of type `T`.
    unsafe fn create<T: ?Sized>(&self) -> Option<Box<T>> {
        // SAFETY: the library is kept alive by self; the caller picks T.
        unsafe { import_object::<T>((self.create)()) }
    }
}

impl ReaderProviderFactory for NativeFactory {
    fn create_reader_provider(&self) -> Option<Box<dyn ReaderProvider>> {
        // SAFETY: get<Type>Reader exports Box<dyn ReaderProvider>.
        unsafe { self.create::<dyn ReaderProvider>() }
    }
}

impl ChipFactory for NativeFactory {
    fn create_chip(&self) -> Option<Box<dyn Chip>> {
        // SAFETY: get<Type>Chip exports Box<dyn Chip>.
        unsafe { self.create::<dyn Chip>() }
    }
}

impl CommandsFactory for NativeFactory {
    fn create_commands(&self) -> Option<Box<dyn Commands>> {
        // SAFETY: get<Type>Commands exports Box<dyn Commands>.
        unsafe { self.create::<dyn Commands>() }
    }
}

impl KeyDiversificationFactory for NativeFactory {
    fn create_key_diversification(&self) -> Option<Box<dyn KeyDiversification>> {
        // SAFETY: get<Type>Diversification exports Box<dyn KeyDiversification>.
        unsafe { self.create::<dyn KeyDiversification>() }
    }
}

struct NativeEnumerator {
    _library: Arc<libloading::Library>,
    info_at: ObjectInfoAtFn,
}

impl TypeEnumerator for NativeEnumerator {
    fn entry_at(&self, index: u32) -> Option<String> {
        let mut buf = [0u8; PLUGIN_OBJECT_MAX_LEN];
        // SAFETY: buf is valid for PLUGIN_OBJECT_MAX_LEN bytes.
        let found =
            unsafe { (self.info_at)(index, buf.as_mut_ptr().cast::<c_char>(), buf.len()) };
        if !found {
            return None;
        }
        CStr::from_bytes_until_nul(&buf)
            .ok()
            .map(|name| name.to_string_lossy().into_owned())
    }
}

// ─── Static Modules ─────────────────────────────────────────────────

/// A module linked into the host binary.
///
/// Built with the `with_*` methods; type names passed to `with_reader` and
/// `with_chip` are also published by the module's type enumerators.
///
/// ```
/// use cardlink_hal::plugin::StaticLibrary;
///
/// let library = StaticLibrary::new("vendor-tags").with_abi_version(1);
/// ```
#[derive(Clone, Default)]
pub struct StaticLibrary {
    name: Option<String>,
    abi_version: Option<u32>,
    readers: HashMap<String, Arc<dyn ReaderProviderFactory>>,
    chips: HashMap<String, Arc<dyn ChipFactory>>,
    commands: HashMap<String, Arc<dyn CommandsFactory>>,
    diversifications: HashMap<String, Arc<dyn KeyDiversificationFactory>>,
    reader_types: Vec<String>,
    chip_types: Vec<String>,
}

impl StaticLibrary {
    /// Create a module carrying the `getLibraryName` marker.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Create a module without the marker. The registry rejects it.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Export `getPluginAbiVersion`.
    pub fn with_abi_version(mut self, version: u32) -> Self {
        self.abi_version = Some(version);
        self
    }

    /// Export `get<reader_type>Reader`.
    pub fn with_reader<F>(mut self, reader_type: &str, factory: F) -> Self
    where
        F: ReaderProviderFactory + 'static,
    {
        self.readers
            .insert(reader_symbol(reader_type), Arc::new(factory));
        self.reader_types.push(reader_type.to_string());
        self
    }

    /// Export `get<chip_type>Chip`.
    pub fn with_chip<F>(mut self, chip_type: &str, factory: F) -> Self
    where
        F: ChipFactory + 'static,
    {
        self.chips.insert(chip_symbol(chip_type), Arc::new(factory));
        self.chip_types.push(chip_type.to_string());
        self
    }

    /// Export `get<commands_type>Commands`.
    pub fn with_commands<F>(mut self, commands_type: &str, factory: F) -> Self
    where
        F: CommandsFactory + 'static,
    {
        self.commands
            .insert(commands_symbol(commands_type), Arc::new(factory));
        self
    }

    /// Export `get<diversification_type>Diversification`.
    pub fn with_diversification<F>(mut self, diversification_type: &str, factory: F) -> Self
    where
        F: KeyDiversificationFactory + 'static,
    {
        self.diversifications
            .insert(diversification_symbol(diversification_type), Arc::new(factory));
        self
    }
}

impl DynLibrary for StaticLibrary {
    fn library_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn abi_version(&self) -> Option<u32> {
        self.abi_version
    }

    fn reader_provider_factory(&self, symbol: &str) -> Option<Arc<dyn ReaderProviderFactory>> {
        self.readers.get(symbol).cloned()
    }

    fn chip_factory(&self, symbol: &str) -> Option<Arc<dyn ChipFactory>> {
        self.chips.get(symbol).cloned()
    }

    fn commands_factory(&self, symbol: &str) -> Option<Arc<dyn CommandsFactory>> {
        self.commands.get(symbol).cloned()
    }

    fn diversification_factory(
        &self,
        symbol: &str,
    ) -> Option<Arc<dyn KeyDiversificationFactory>> {
        self.diversifications.get(symbol).cloned()
    }

    fn type_enumerator(&self, symbol: &str) -> Option<Arc<dyn TypeEnumerator>> {
        let types = match symbol {
            READER_INFO_SYMBOL if !self.reader_types.is_empty() => &self.reader_types,
            CHIP_INFO_SYMBOL if !self.chip_types.is_empty() => &self.chip_types,
            _ => return None,
        };
        Some(Arc::new(types.clone()))
    }
}

/// Serves [`StaticLibrary`] modules registered under file paths.
///
/// The registry still discovers modules by scanning folders; a file at a
/// registered path stands in for the shared library.
#[derive(Clone, Default)]
pub struct StaticLoader {
    libraries: HashMap<PathBuf, StaticLibrary>,
}

impl StaticLoader {
    /// Create an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `library` for the file at `path`.
    pub fn register(&mut self, path: impl Into<PathBuf>, library: StaticLibrary) {
        self.libraries.insert(path.into(), library);
    }
}

impl LibraryLoader for StaticLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn DynLibrary>, PluginError> {
        self.libraries
            .get(path)
            .map(|library| Arc::new(library.clone()) as Arc<dyn DynLibrary>)
            .ok_or_else(|| PluginError::LoadFailed {
                path: path.display().to_string(),
                reason: "no static module registered at this path".to_string(),
            })
    }
}
