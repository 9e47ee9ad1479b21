//! Common Utilities and Types Library
//!
//! This crate provides shared types, timing utilities and task executors used
//! across the GNodeB PHY implementation.

pub mod executors;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use types::*;
pub use utils::*;
