//! gNB PHY Timing Engine Library
//! 
//! This crate implements the slot-level behaviour of an NR gNB PHY running
//! inside a discrete-event simulation: DCI/HARQ timing derived from the slot
//! pattern, the allocation store, the control message pipeline, channel
//! access for shared spectrum, and a reference MAC to drive it.

pub mod phy;
pub mod mac;
pub mod sim;

use common::{NumerologyError, PatternError, Rnti, SfnSf};
use interfaces::InterfaceError;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("No allocation stored for slot {0}")]
    SlotNotFound(SfnSf),

    #[error("Numerology mismatch: expected {expected}, found {found}")]
    NumerologyMismatch { expected: u8, found: u8 },

    #[error("Slot {sfn} declares {declared} symbols but its allocations use {used}")]
    SymbolAccountingMismatch { sfn: SfnSf, declared: u32, used: u32 },

    #[error("RNTI {0} is not attached")]
    UeNotAttached(Rnti),
    
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Numerology(#[from] NumerologyError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Interface(#[from] InterfaceError),
}
