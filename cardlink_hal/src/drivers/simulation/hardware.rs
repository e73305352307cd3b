//! Shared simulated reader hardware.
//!
//! A `SimulatedHardware` is a cheap handle; clones share the same reader
//! slot, so a test can insert or remove cards while a reader unit holds the
//! backend.

use super::card::SimulatedCard;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug)]
struct HardwareState {
    reader_name: String,
    card: Option<SimulatedCard>,
    reader_available: bool,
    open_handles: usize,
    max_open_handles: usize,
    commands: Vec<Vec<u8>>,
}

/// One simulated reader with an optional card.
#[derive(Debug, Clone)]
pub struct SimulatedHardware {
    state: Arc<Mutex<HardwareState>>,
}

impl SimulatedHardware {
    /// Create an empty reader named `reader_name`.
    pub fn new(reader_name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HardwareState {
                reader_name: reader_name.into(),
                card: None,
                reader_available: true,
                open_handles: 0,
                max_open_handles: 0,
                commands: Vec::new(),
            })),
        }
    }

    /// Reader name.
    pub fn reader_name(&self) -> String {
        self.state.lock().reader_name.clone()
    }

    /// Put a card on the reader, replacing any present one.
    pub fn insert_card(&self, card: SimulatedCard) {
        self.state.lock().card = Some(card);
    }

    /// Take the card off the reader.
    pub fn remove_card(&self) -> Option<SimulatedCard> {
        self.state.lock().card.take()
    }

    /// True if a card is on the reader.
    pub fn has_card(&self) -> bool {
        self.state.lock().card.is_some()
    }

    /// Make the reader reachable or not.
    pub fn set_reader_available(&self, available: bool) {
        self.state.lock().reader_available = available;
    }

    /// True if the reader is reachable.
    pub fn is_reader_available(&self) -> bool {
        self.state.lock().reader_available
    }

    /// Card handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Highest number of simultaneously open card handles seen.
    pub fn max_open_handles(&self) -> usize {
        self.state.lock().max_open_handles
    }

    /// Current content of a file on the inserted card.
    pub fn file_contents(&self, file_id: u16) -> Option<Vec<u8>> {
        let state = self.state.lock();
        state.card.as_ref()?.file(file_id).map(<[u8]>::to_vec)
    }

    /// Command APDUs transmitted to the reader, oldest first.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.state.lock().commands.clone()
    }

    pub(super) fn record_command(&self, command: &[u8]) {
        self.state.lock().commands.push(command.to_vec());
    }

    pub(super) fn open_handle(&self) {
        let mut state = self.state.lock();
        state.open_handles += 1;
        state.max_open_handles = state.max_open_handles.max(state.open_handles);
    }

    pub(super) fn close_handle(&self) {
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
    }

    /// Run `f` on the inserted card.
    pub(super) fn with_card<R>(&self, f: impl FnOnce(&mut SimulatedCard) -> R) -> Option<R> {
        self.state.lock().card.as_mut().map(f)
    }
}
