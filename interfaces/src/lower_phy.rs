//! Radio-Facing (Lower PHY) Interfaces
//!
//! Implemented or consumed by the layer that drives the radio timeline. Every
//! method is called from a real-time thread and must not block.

use crate::message_types::{
    LowerPhyRxSymbolContext, LowerPhyTimingContext, PrachBufferContext, ResourceGridContext,
};
use crate::prach_buffer::PrachBuffer;
use crate::resource_grid::ResourceGrid;
use std::sync::Arc;

/// Accepts capture requests from the upper PHY
pub trait UplinkRequestHandler: Send + Sync {
    /// Capture the PRACH occasion described by `context` into `buffer`
    fn request_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>);

    /// Capture the uplink slot described by `context` into `grid`
    fn request_uplink_slot(&self, context: &ResourceGridContext, grid: Arc<ResourceGrid>);
}

/// Slot timing events produced by the radio timeline
///
/// For every slot the events arrive in this order: TTI boundary, uplink half
/// slot, uplink full slot.
pub trait LowerPhyTimingNotifier: Send + Sync {
    /// A new slot starts; its downlink data must already be available
    fn on_tti_boundary(&self, context: &LowerPhyTimingContext);

    /// First half of the uplink slot has been received
    fn on_ul_half_slot_boundary(&self, context: &LowerPhyTimingContext);

    /// The whole uplink slot has been received
    fn on_ul_full_slot_boundary(&self, context: &LowerPhyTimingContext);
}

/// Completion of capture requests
pub trait LowerPhyRxSymbolNotifier: Send + Sync {
    /// The PRACH window has been fully captured into `buffer`
    fn on_rx_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>);

    /// `context.nof_symbols` symbols of the uplink slot are available in `grid`
    fn on_rx_symbol(&self, context: &LowerPhyRxSymbolContext, grid: Arc<ResourceGrid>);
}

/// Runtime errors detected by the radio timeline
pub trait LowerPhyErrorNotifier: Send + Sync {
    /// The grid for `context` was not available in time
    fn on_late_resource_grid(&self, context: &ResourceGridContext);

    /// The PRACH request arrived after its window elapsed
    fn on_prach_request_late(&self, context: &PrachBufferContext);

    /// Too many PRACH requests in flight
    fn on_prach_request_overflow(&self, context: &PrachBufferContext);
}
