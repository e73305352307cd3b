//! Registry of built-in reader providers.
//!
//! Provides a `ProviderRegistry` struct for registering and retrieving
//! reader provider factories compiled into the host. Plugin modules are
//! consulted first; this registry is the fallback. Uses constructor
//! injection rather than global state.

use crate::reader::ReaderProvider;
use cardlink_common::error::ReaderError;
use std::collections::HashMap;

/// Constructor of a built-in reader provider.
pub type ProviderFactory = fn() -> Box<dyn ReaderProvider>;

/// Registry of built-in reader providers.
///
/// Constructed at startup, populated via `register()`, and passed to the
/// `PluginRegistry` by value.
pub struct ProviderRegistry {
    factories: HashMap<&'static str, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry holding every provider compiled into this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_builtin_providers(&mut registry);
        registry
    }

    /// Register a provider factory.
    ///
    /// # Panics
    /// Panics if a provider with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: ProviderFactory) {
        if self.factories.contains_key(name) {
            panic!("Reader provider '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a provider factory by name.
    pub fn get_factory(&self, name: &str) -> Option<ProviderFactory> {
        self.factories.get(name).copied()
    }

    /// Create a provider instance by name.
    ///
    /// # Errors
    /// Returns `ReaderError::ProviderNotFound` if no provider with the given name is registered.
    pub fn create_provider(&self, name: &str) -> Result<Box<dyn ReaderProvider>, ReaderError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| ReaderError::ProviderNotFound(name.to_string()))?;
        Ok(factory())
    }

    /// List all registered provider names, sorted.
    pub fn list_providers(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderBackend;
    use cardlink_common::reader::config::ReaderUnitConfig;

    struct TestProvider;

    impl ReaderProvider for TestProvider {
        fn provider_type(&self) -> &str {
            "Test"
        }

        fn refresh_reader_list(&mut self) -> bool {
            true
        }

        fn reader_list(&self) -> Vec<String> {
            vec!["Test Reader 0".to_string()]
        }

        fn create_backend(&self, _config: &ReaderUnitConfig) -> Option<Box<dyn ReaderBackend>> {
            None
        }
    }

    fn create_test_provider() -> Box<dyn ReaderProvider> {
        Box::new(TestProvider)
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = ProviderRegistry::new();
        reg.register("Test", create_test_provider);

        let provider = reg.create_provider("Test").expect("should create");
        assert_eq!(provider.provider_type(), "Test");
        assert_eq!(provider.reader_list().len(), 1);
    }

    #[test]
    fn registry_provider_not_found() {
        let reg = ProviderRegistry::new();
        let result = reg.create_provider("NoSuchReader");
        assert!(matches!(result, Err(ReaderError::ProviderNotFound(_))));
    }

    #[test]
    fn registry_list_providers_sorted() {
        let mut reg = ProviderRegistry::new();
        reg.register("beta", create_test_provider);
        reg.register("alpha", create_test_provider);
        assert_eq!(reg.list_providers(), vec!["alpha", "beta"]);
    }

    #[test]
    fn registry_builtins_include_simulation() {
        let reg = ProviderRegistry::with_builtins();
        assert!(reg.list_providers().contains(&"Simulation"));
        assert!(reg.list_providers().contains(&"Remote"));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = ProviderRegistry::new();
        reg.register("dup", create_test_provider);
        reg.register("dup", create_test_provider);
    }
}
