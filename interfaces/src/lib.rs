//! PHY Collaborator Interfaces Library
//! 
//! This crate defines what the gNB PHY exchanges with the components around
//! it: control messages, the MAC/spectrum/channel-access/fronthaul SAPs and
//! the trace sinks used for slot statistics.

pub mod message_types;
pub mod sap;
pub mod trace;

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
