//! Chip, commands and card services.
//!
//! A [`Chip`] is an identified card. Its [`Commands`] encode protocol
//! operations and reach the card through a [`ReaderCardAdapter`] bound to
//! the reader unit that created the chip. Services such as
//! [`StorageCardService`] implement use cases on top of the commands.
//!
//! Card families live in plugins; [`iso7816`] is the built-in fallback used
//! when no plugin knows the card type.

pub mod adapter;
pub mod apdu;
pub mod iso7816;
pub mod storage;

pub use adapter::ReaderCardAdapter;
pub use apdu::{ApduCommand, ApduResponse};
pub use iso7816::{Iso7816AccessInfo, Iso7816Chip, Iso7816Commands, Iso7816Location};
pub use storage::{Iso7816StorageCardService, StorageCardService};

use cardlink_common::error::CardError;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// An identified card.
pub trait Chip: Any + Send + Sync {
    /// Resolved card type.
    fn card_type(&self) -> &str;

    /// Card identifier (serial number), empty until read.
    fn chip_identifier(&self) -> &[u8];

    /// Set the card identifier.
    fn set_chip_identifier(&mut self, identifier: Vec<u8>);

    /// Commands bound to this chip.
    fn commands(&self) -> Option<Arc<dyn Commands>>;

    /// Bind the commands. Each chip owns its own commands instance.
    fn set_commands(&mut self, commands: Box<dyn Commands>);

    /// Storage service of this chip, if the family supports one.
    fn storage_service(&self) -> Option<Box<dyn StorageCardService>> {
        None
    }

    /// Concrete type access for capability queries.
    fn as_any(&self) -> &dyn Any;
}

/// Protocol operations of one card family.
pub trait Commands: Any + Send + Sync {
    /// Commands type name.
    fn commands_type(&self) -> &str;

    /// Adapter used to reach the card.
    fn reader_card_adapter(&self) -> Option<&Arc<ReaderCardAdapter>>;

    /// Bind the adapter.
    fn set_reader_card_adapter(&mut self, adapter: Arc<ReaderCardAdapter>);

    /// Concrete type access for capability queries.
    fn as_any(&self) -> &dyn Any;
}

/// Key diversification algorithm.
pub trait KeyDiversification: Any + Send + Sync {
    /// Algorithm name.
    fn diversification_type(&self) -> &str;

    /// Build the diversification input for a card and key slot.
    fn init_diversification(&self, identifier: &[u8], aid: u32, key_no: u8) -> Vec<u8>;

    /// Derive the card key from a master key and diversification input.
    ///
    /// # Errors
    /// `CardError::InvalidAccessInfo` if the master key has the wrong size.
    fn diversified_key(&self, key: &[u8], diversify: &[u8]) -> Result<Vec<u8>, CardError>;

    /// Concrete type access for capability queries.
    fn as_any(&self) -> &dyn Any;
}

/// Addressing within a card.
pub trait Location: Any + Debug + Send + Sync {
    /// Card family this location belongs to.
    fn card_type(&self) -> &str;

    /// Concrete type access.
    fn as_any(&self) -> &dyn Any;
}

/// Key material reference authorizing a service operation.
pub trait AccessInfo: Any + Debug + Send + Sync {
    /// Card family this access info belongs to.
    fn card_type(&self) -> &str;

    /// Concrete type access.
    fn as_any(&self) -> &dyn Any;
}

/// Concrete chip type, `None` if `chip` is another family.
pub fn downcast_chip<T: Chip>(chip: &dyn Chip) -> Option<&T> {
    chip.as_any().downcast_ref::<T>()
}

/// Concrete commands type, `None` if `commands` is another family.
pub fn downcast_commands<T: Commands>(commands: &dyn Commands) -> Option<&T> {
    commands.as_any().downcast_ref::<T>()
}
