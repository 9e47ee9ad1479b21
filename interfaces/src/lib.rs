//! PHY Boundary Interfaces Library
//!
//! This crate defines what crosses the boundary between the radio-facing
//! (lower) PHY and the protocol-facing (upper) PHY: the shared sample buffers,
//! the slot contexts that identify them and the notifier/handler traits each
//! side implements.

pub mod lower_phy;
pub mod message_types;
pub mod prach_buffer;
pub mod resource_grid;
pub mod upper_phy;

pub use lower_phy::{
    LowerPhyErrorNotifier, LowerPhyRxSymbolNotifier, LowerPhyTimingNotifier, UplinkRequestHandler,
};
pub use message_types::*;
pub use prach_buffer::{PrachBuffer, PrachFormat};
pub use resource_grid::ResourceGrid;
pub use upper_phy::{UpperPhyErrorNotifier, UpperPhyRxResultsNotifier, UpperPhyTimingNotifier};
