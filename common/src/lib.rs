//! Common Utilities and Types Library
//! 
//! This crate provides shared types and utilities used across the NR gNB
//! simulation model: slot identifiers, slot patterns, DCI and allocation records.

pub mod types;
pub mod utils;
pub mod sfnsf;
pub mod pattern;
pub mod dci;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
pub use sfnsf::SfnSf;
pub use pattern::{PatternError, TddPattern};
pub use dci::*;
