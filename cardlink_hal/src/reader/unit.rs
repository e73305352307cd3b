//! Reader unit.
//!
//! A reader unit owns one reader session (or shares the session of the unit
//! it proxies) and is the entry point for applications: wait for a card,
//! connect, resolve its type and get a [`Chip`] bound to this reader.
//!
//! Connection operations return `bool` and log the cause of a failure.
//!
//! # Example
//!
//! ```
//! use cardlink_common::config::PluginSettings;
//! use cardlink_common::reader::config::ReaderUnitConfig;
//! use cardlink_hal::drivers::simulation::{SimulatedCard, SimulatedHardware, SimulationProvider};
//! use cardlink_hal::plugin::PluginRegistry;
//! use cardlink_hal::reader::ReaderUnit;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let hardware = SimulatedHardware::new("Sim Reader 0");
//! hardware.insert_card(SimulatedCard::desfire_ev1(vec![0x04, 0x11, 0x22, 0x33]));
//!
//! let registry = Arc::new(PluginRegistry::new(PluginSettings::default()));
//! let provider = SimulationProvider::with_hardware(hardware);
//! let mut unit = ReaderUnit::with_provider(
//!     ReaderUnitConfig::new("door", "Simulation"),
//!     &provider,
//!     registry,
//! )
//! .expect("reader unit");
//!
//! assert!(unit.wait_insertion(Duration::from_millis(100)));
//! assert!(unit.connect());
//! let chip = unit.single_chip().expect("chip");
//! assert_eq!(chip.card_type(), "DESFireEV1");
//! ```

use super::atr::card_type_from_atr;
use super::session::ReaderSession;
use super::{ReaderBackend, ReaderProvider};
use crate::card::{Chip, Commands, Iso7816Chip, Iso7816Commands, ReaderCardAdapter};
use crate::plugin::PluginRegistry;
use crate::transport::DataTransport;
use cardlink_common::config::ConfigError;
use cardlink_common::consts::UNKNOWN_CARD_TYPE;
use cardlink_common::error::ReaderError;
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::{
    Atr, CardProtocol, DisconnectAction, ReaderState, ShareMode,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A reader seen by the application.
pub struct ReaderUnit {
    name: String,
    config: ReaderUnitConfig,
    session: Arc<Mutex<ReaderSession>>,
    registry: Arc<PluginRegistry>,
    card_type: String,
}

static_assertions::assert_impl_all!(ReaderUnit: Send, Sync);
static_assertions::assert_impl_all!(ReaderCardAdapter: Send, Sync);

impl ReaderUnit {
    /// Create a reader unit, resolving its provider through the registry.
    ///
    /// # Errors
    /// `ReaderError::ProviderNotFound` if no plugin or built-in provides
    /// `config.provider`, `ReaderError::Backend` if the provider cannot serve
    /// the configuration.
    pub fn new(config: ReaderUnitConfig, registry: Arc<PluginRegistry>) -> Result<Self, ReaderError> {
        let provider = registry
            .resolve_reader_provider(&config.provider)
            .ok_or_else(|| ReaderError::ProviderNotFound(config.provider.clone()))?;
        Self::with_provider(config, provider.as_ref(), registry)
    }

    /// Create a reader unit from an explicit provider.
    ///
    /// # Errors
    /// `ReaderError::Backend` if the provider cannot serve the configuration.
    pub fn with_provider(
        config: ReaderUnitConfig,
        provider: &dyn ReaderProvider,
        registry: Arc<PluginRegistry>,
    ) -> Result<Self, ReaderError> {
        let backend = provider.create_backend(&config).ok_or_else(|| {
            ReaderError::Backend(format!(
                "{} provider cannot create reader '{}'",
                provider.provider_type(),
                config.name
            ))
        })?;
        Ok(Self::with_backend(config, backend, registry))
    }

    /// Create a reader unit over an existing backend.
    pub fn with_backend(
        config: ReaderUnitConfig,
        backend: Box<dyn ReaderBackend>,
        registry: Arc<PluginRegistry>,
    ) -> Self {
        let session = ReaderSession::new(
            backend,
            config.share_mode,
            config.disconnect_action,
            config.poll_interval(),
        );
        Self {
            name: config.name.clone(),
            card_type: config
                .card_type
                .clone()
                .unwrap_or_else(|| UNKNOWN_CARD_TYPE.to_string()),
            config,
            session: Arc::new(Mutex::new(session)),
            registry,
        }
    }

    // ─── Identity & Configuration ───────────────────────────────────

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the unit.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.config.name = self.name.clone();
    }

    /// Current configuration.
    pub fn configuration(&self) -> &ReaderUnitConfig {
        &self.config
    }

    /// Apply a configuration to this unit.
    ///
    /// Share mode, disconnect action, poll interval, forced card type and
    /// name take effect immediately. Provider and transport are bound at
    /// construction time.
    pub fn set_configuration(&mut self, config: ReaderUnitConfig) {
        self.session.lock().configure(
            config.share_mode,
            config.disconnect_action,
            config.poll_interval(),
        );
        self.name = config.name.clone();
        self.card_type = config
            .card_type
            .clone()
            .unwrap_or_else(|| UNKNOWN_CARD_TYPE.to_string());
        self.config = config;
    }

    /// Plugin registry used for chip creation.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Turn this unit into a proxy of `target`.
    ///
    /// Every state machine and I/O operation then acts on the target's
    /// session; this unit keeps its own name.
    pub fn make_proxy(&mut self, target: &ReaderUnit, target_config: ReaderUnitConfig) {
        debug!("Reader unit {} now proxies {}", self.name, target.name);
        self.session.lock().clear_chip();
        self.session = Arc::clone(&target.session);
        self.card_type = target_config
            .card_type
            .clone()
            .unwrap_or_else(|| UNKNOWN_CARD_TYPE.to_string());
        self.config = ReaderUnitConfig {
            name: self.name.clone(),
            ..target_config
        };
    }

    // ─── State ──────────────────────────────────────────────────────

    /// Connection state.
    pub fn state(&self) -> ReaderState {
        self.session.lock().state()
    }

    /// True while a card handle is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ReaderState::CardConnected
    }

    /// Physical reader of the detected card.
    pub fn connected_name(&self) -> Option<String> {
        self.session.lock().connected_name().map(str::to_string)
    }

    /// Share mode of the current or last card handle.
    pub fn share_mode(&self) -> ShareMode {
        self.session.lock().share_mode()
    }

    /// Protocol of the open card handle.
    pub fn active_protocol(&self) -> Option<CardProtocol> {
        self.session.lock().active_protocol()
    }

    /// Forced card type, [`UNKNOWN_CARD_TYPE`] when resolved from the ATR.
    pub fn card_type(&self) -> &str {
        &self.card_type
    }

    /// Force the card type used by chip creation. `"UNKNOWN"` restores ATR resolution.
    pub fn set_card_type(&mut self, card_type: impl Into<String>) {
        self.card_type = card_type.into();
        self.session.lock().clear_chip();
    }

    // ─── Reader Session ─────────────────────────────────────────────

    /// Open the reader session. No-op if already open.
    pub fn connect_to_reader(&self) -> bool {
        self.session.lock().connect_to_reader()
    }

    /// Close the reader session, releasing any card handle first.
    pub fn disconnect_from_reader(&mut self) {
        self.session.lock().disconnect_from_reader();
    }

    /// Wait until a card is present. `Duration::ZERO` waits forever.
    ///
    /// Fails if a card handle is already open.
    pub fn wait_insertion(&self, maxwait: Duration) -> bool {
        self.session.lock().wait_insertion(maxwait)
    }

    /// Wait until no card is present. `Duration::ZERO` waits forever.
    pub fn wait_removal(&mut self, maxwait: Duration) -> bool {
        self.session.lock().wait_removal(maxwait)
    }

    // ─── Card Handle ────────────────────────────────────────────────

    /// Open a card handle with the configured share mode.
    pub fn connect(&mut self) -> bool {
        self.connect_with(self.config.share_mode)
    }

    /// Open a card handle, releasing the previous one first.
    pub fn connect_with(&mut self, share_mode: ShareMode) -> bool {
        let connected = self.session.lock().connect(share_mode);
        if connected {
            info!("Reader unit {} connected to card", self.name);
        }
        connected
    }

    /// Re-establish the card handle with the last share mode.
    pub fn reconnect(&self) -> bool {
        self.session.lock().reconnect()
    }

    /// Release the card handle with the configured disconnect action.
    pub fn disconnect(&mut self) {
        let action = self.session.lock().default_disconnect_action();
        self.disconnect_with(action);
    }

    /// Release the card handle.
    pub fn disconnect_with(&mut self, action: DisconnectAction) {
        self.session.lock().disconnect(action);
    }

    /// UID of the connected card.
    ///
    /// # Errors
    /// `ReaderError::CardNotConnected` without a card handle.
    pub fn card_serial_number(&self) -> Result<Vec<u8>, ReaderError> {
        self.session.lock().card_serial_number()
    }

    /// Serial number of the reader.
    ///
    /// # Errors
    /// `ReaderError` if the reader does not expose one.
    pub fn reader_serial_number(&self) -> Result<Vec<u8>, ReaderError> {
        self.session.lock().reader_serial_number()
    }

    /// Copy the last ATR into `buffer`; returns the number of bytes copied.
    pub fn get_atr(&self, buffer: &mut [u8]) -> usize {
        self.session.lock().atr().copy_to(buffer)
    }

    /// Last ATR read.
    pub fn atr(&self) -> Atr {
        self.session.lock().atr().clone()
    }

    /// Backend type of the session.
    pub fn backend_type(&self) -> String {
        self.session.lock().backend().backend_type().to_string()
    }

    /// Name of the backend's data transport, if it has one.
    pub fn data_transport_name(&self) -> Option<String> {
        self.session.lock().backend().data_transport().map(|transport| transport.name())
    }

    /// Replace the backend's data transport.
    pub fn set_data_transport(&self, transport: Box<dyn DataTransport>) -> bool {
        self.session.lock().backend_mut().set_data_transport(transport)
    }

    // ─── Chips ──────────────────────────────────────────────────────

    /// Card type resolved from `atr`.
    pub fn card_type_from_atr(&self, atr: &[u8]) -> String {
        card_type_from_atr(atr).to_string()
    }

    /// Create a chip of `chip_type` bound to this reader unit.
    ///
    /// The chip comes from a card plugin, or is a generic ISO7816 chip
    /// reporting `chip_type`. Commands are looked up as
    /// `<chip_type><backend_type>`, then `<chip_type>`, then the generic
    /// ISO7816 commands.
    pub fn create_chip(&self, chip_type: &str) -> Arc<dyn Chip> {
        let mut chip = self.registry.resolve_chip(chip_type).unwrap_or_else(|| {
            debug!("No chip plugin for {}, using generic ISO7816 chip", chip_type);
            Box::new(Iso7816Chip::new(chip_type))
        });

        let backend_type = self.backend_type();
        let mut commands: Box<dyn Commands> = self
            .registry
            .resolve_commands(&format!("{chip_type}{backend_type}"))
            .or_else(|| self.registry.resolve_commands(chip_type))
            .unwrap_or_else(|| Box::new(Iso7816Commands::new()));
        commands.set_reader_card_adapter(Arc::new(ReaderCardAdapter::new(Arc::clone(
            &self.session,
        ))));
        chip.set_commands(commands);

        if self.is_connected() {
            match self.card_serial_number() {
                Ok(identifier) => chip.set_chip_identifier(identifier),
                Err(e) => debug!("No serial number for {} chip: {}", chip_type, e),
            }
        }

        Arc::from(chip)
    }

    /// Chip of the connected card, created once per connection.
    ///
    /// Uses the forced card type, or the type resolved from the ATR. The
    /// chip is cached on the session, so a proxy and its target see the
    /// same chip until the card handle changes.
    pub fn single_chip(&mut self) -> Option<Arc<dyn Chip>> {
        let atr = {
            let session = self.session.lock();
            if let Some(chip) = session.chip() {
                return Some(Arc::clone(chip));
            }
            if session.state() != ReaderState::CardConnected {
                return None;
            }
            session.atr().clone()
        };

        let chip_type = if self.card_type == UNKNOWN_CARD_TYPE {
            self.card_type_from_atr(atr.as_bytes())
        } else {
            self.card_type.clone()
        };
        debug!("Reader unit {} resolved card type {}", self.name, chip_type);

        let chip = self.create_chip(&chip_type);
        Some(self.session.lock().cache_chip(chip))
    }

    /// Chips of the connected cards.
    pub fn chip_list(&mut self) -> Vec<Arc<dyn Chip>> {
        self.single_chip().into_iter().collect()
    }

    // ─── Persistence ────────────────────────────────────────────────

    /// Write the unit configuration as a child node of `parent`, keyed by unit name.
    ///
    /// # Errors
    /// `ConfigError::ParseError` if the configuration cannot be represented.
    pub fn serialize(&self, parent: &mut toml::Table) -> Result<(), ConfigError> {
        let node =
            toml::Value::try_from(&self.config).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        parent.insert(self.name.clone(), node);
        Ok(())
    }

    /// Restore the unit configuration from a node written by `serialize()`.
    ///
    /// # Errors
    /// `ConfigError::ParseError` for a malformed node, `ConfigError::ValidationError`
    /// for an invalid configuration.
    pub fn unserialize(&mut self, node: &toml::Value) -> Result<(), ConfigError> {
        let config: ReaderUnitConfig = node
            .clone()
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        self.set_configuration(config);
        Ok(())
    }
}

impl Drop for ReaderUnit {
    fn drop(&mut self) {
        // The cached chip's adapter holds the session.
        self.session.lock().clear_chip();
    }
}

impl fmt::Debug for ReaderUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderUnit")
            .field("name", &self.name)
            .field("provider", &self.config.provider)
            .field("card_type", &self.card_type)
            .finish_non_exhaustive()
    }
}
