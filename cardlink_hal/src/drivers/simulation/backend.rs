//! Simulation reader backend and provider.

use super::hardware::SimulatedHardware;
use super::PROVIDER_TYPE;
use crate::reader::{CardConnection, ReaderBackend, ReaderProvider};
use cardlink_common::error::ReaderError;
use cardlink_common::reader::config::ReaderUnitConfig;
use cardlink_common::reader::types::{Atr, DisconnectAction, ShareMode};
use tracing::{debug, trace};

/// Name of the reader created by [`SimulationProvider::new`].
pub const DEFAULT_READER_NAME: &str = "Simulated Reader 0";

// ─── Backend ────────────────────────────────────────────────────────

/// Backend driving one [`SimulatedHardware`].
#[derive(Debug)]
pub struct SimulationBackend {
    hardware: SimulatedHardware,
    reader_connected: bool,
    handle_open: bool,
}

impl SimulationBackend {
    /// Create a backend over `hardware`.
    pub fn new(hardware: SimulatedHardware) -> Self {
        Self {
            hardware,
            reader_connected: false,
            handle_open: false,
        }
    }

    /// The driven hardware.
    pub fn hardware(&self) -> &SimulatedHardware {
        &self.hardware
    }

    fn ensure_reader(&self) -> Result<(), ReaderError> {
        if !self.reader_connected {
            return Err(ReaderError::NotConnectedToReader);
        }
        if !self.hardware.is_reader_available() {
            return Err(ReaderError::Backend(format!(
                "reader '{}' is unavailable",
                self.hardware.reader_name()
            )));
        }
        Ok(())
    }

    fn connection(&self) -> Result<CardConnection, ReaderError> {
        let reader_name = self.hardware.reader_name();
        self.hardware
            .with_card(|card| {
                card.reset();
                CardConnection {
                    atr: Atr::new(card.atr()),
                    protocol: card.protocol(),
                    reader_name,
                }
            })
            .ok_or(ReaderError::NoCard)
    }

    fn release_handle(&mut self) {
        if self.handle_open {
            self.hardware.close_handle();
            self.handle_open = false;
        }
    }
}

impl ReaderBackend for SimulationBackend {
    fn backend_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn connect_to_reader(&mut self) -> Result<(), ReaderError> {
        if !self.hardware.is_reader_available() {
            return Err(ReaderError::Backend(format!(
                "reader '{}' is unavailable",
                self.hardware.reader_name()
            )));
        }
        self.reader_connected = true;
        Ok(())
    }

    fn disconnect_from_reader(&mut self) {
        self.release_handle();
        self.reader_connected = false;
    }

    fn card_presence(&mut self) -> Result<Option<String>, ReaderError> {
        self.ensure_reader()?;
        Ok(self
            .hardware
            .has_card()
            .then(|| self.hardware.reader_name()))
    }

    fn connect_card(&mut self, share_mode: ShareMode) -> Result<CardConnection, ReaderError> {
        self.ensure_reader()?;
        let connection = self.connection()?;
        self.release_handle();
        self.hardware.open_handle();
        self.handle_open = true;
        debug!(
            "Simulated card connected on {} ({:?})",
            connection.reader_name, share_mode
        );
        Ok(connection)
    }

    fn reconnect_card(&mut self, _share_mode: ShareMode) -> Result<CardConnection, ReaderError> {
        if !self.handle_open {
            return Err(ReaderError::CardNotConnected);
        }
        self.connection()
    }

    fn disconnect_card(&mut self, action: DisconnectAction) {
        if self.handle_open && action != DisconnectAction::Leave {
            self.hardware.with_card(|card| card.reset());
        }
        self.release_handle();
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Vec<u8>, ReaderError> {
        if !self.handle_open {
            return Err(ReaderError::CardNotConnected);
        }
        self.hardware.record_command(command);
        let response = self
            .hardware
            .with_card(|card| card.process(command))
            .ok_or(ReaderError::NoCard)?;
        trace!("Simulated exchange of {} bytes", command.len());
        Ok(response)
    }

    fn reader_serial_number(&mut self) -> Result<Vec<u8>, ReaderError> {
        self.ensure_reader()?;
        Ok(format!("SIM-{}", self.hardware.reader_name()).into_bytes())
    }
}

impl Drop for SimulationBackend {
    fn drop(&mut self) {
        self.release_handle();
    }
}

// ─── Provider ───────────────────────────────────────────────────────

/// Provider of one simulated reader.
#[derive(Debug, Clone)]
pub struct SimulationProvider {
    hardware: SimulatedHardware,
}

impl SimulationProvider {
    /// Provider with an empty reader named [`DEFAULT_READER_NAME`].
    pub fn new() -> Self {
        Self::with_hardware(SimulatedHardware::new(DEFAULT_READER_NAME))
    }

    /// Provider over existing hardware.
    pub fn with_hardware(hardware: SimulatedHardware) -> Self {
        Self { hardware }
    }

    /// The simulated hardware.
    pub fn hardware(&self) -> &SimulatedHardware {
        &self.hardware
    }
}

impl Default for SimulationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ReaderProvider for SimulationProvider {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn refresh_reader_list(&mut self) -> bool {
        true
    }

    fn reader_list(&self) -> Vec<String> {
        if self.hardware.is_reader_available() {
            vec![self.hardware.reader_name()]
        } else {
            Vec::new()
        }
    }

    fn create_backend(&self, config: &ReaderUnitConfig) -> Option<Box<dyn ReaderBackend>> {
        if let Some(reader) = &config.reader {
            if *reader != self.hardware.reader_name() {
                debug!("No simulated reader named '{}'", reader);
                return None;
            }
        }
        Some(Box::new(SimulationBackend::new(self.hardware.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulatedCard;

    #[test]
    fn test_connect_card_requires_card() {
        let hardware = SimulatedHardware::new("Sim");
        let mut backend = SimulationBackend::new(hardware.clone());
        backend.connect_to_reader().expect("reader");
        assert_eq!(
            backend.connect_card(ShareMode::Shared),
            Err(ReaderError::NoCard)
        );

        hardware.insert_card(SimulatedCard::iso7816(vec![0x01, 0x02]));
        let connection = backend.connect_card(ShareMode::Shared).expect("card");
        assert_eq!(connection.reader_name, "Sim");
        assert_eq!(backend.card_serial_number().expect("uid"), vec![0x01, 0x02]);
    }

    #[test]
    fn test_reconnect_releases_previous_handle() {
        let hardware = SimulatedHardware::new("Sim");
        hardware.insert_card(SimulatedCard::iso7816(vec![0x01]));
        let mut backend = SimulationBackend::new(hardware.clone());
        backend.connect_to_reader().expect("reader");
        backend.connect_card(ShareMode::Shared).expect("card");
        backend.connect_card(ShareMode::Exclusive).expect("card");
        assert_eq!(hardware.max_open_handles(), 1);

        drop(backend);
        assert_eq!(hardware.open_handles(), 0);
    }

    #[test]
    fn test_provider_filters_reader_name() {
        let provider = SimulationProvider::new();
        let mut config = ReaderUnitConfig::new("door", PROVIDER_TYPE);
        assert!(provider.create_backend(&config).is_some());

        config.reader = Some("Other Reader".to_string());
        assert!(provider.create_backend(&config).is_none());
    }

    #[test]
    fn test_unavailable_reader_refuses_session() {
        let hardware = SimulatedHardware::new("Sim");
        hardware.set_reader_available(false);
        let mut backend = SimulationBackend::new(hardware);
        assert!(matches!(
            backend.connect_to_reader(),
            Err(ReaderError::Backend(_))
        ));
    }
}
