//! A minimal SD memory card that answers the host through the bridge.
//!
//! The card is SDHC (block addressed, 512-byte sectors) and read-only. [`sd_card`] splits it in
//! two halves that share nothing but a pair of atomics:
//!
//! - [`CardCommands`] implements [`sdproxy_core::SdProtocol`]. It runs on the real-time thread,
//!   keeps the card state machine and never touches the backend.
//! - [`CardData`] implements [`sdproxy_core::SdDataSource`]. It runs on the data thread and
//!   loads sectors from the [`BlockBackend`] when the data loop asks for bytes.

mod backend;
mod card;
mod data;
mod mailbox;
pub mod registers;

pub use backend::{BackendError, BlockBackend, FileBackend, MemBackend, SECTOR_SIZE};
pub use card::{sd_card, CardCommands, CardState, CardStatus};
pub use data::CardData;
pub use registers::CardIdentity;
