//! Protocol-Facing (Upper PHY) Interfaces
//!
//! Implemented by the layer above the PHY (MAC/FAPI adaptor) to receive
//! timing, results and runtime errors.

use crate::message_types::{
    PrachResults, PucchResults, PuschResults, UpperPhyErrorContext, UpperPhyTimingContext,
};

/// Slot timing as seen by the protocol layer
pub trait UpperPhyTimingNotifier: Send + Sync {
    fn on_tti_boundary(&self, context: &UpperPhyTimingContext);

    fn on_ul_half_slot_boundary(&self, context: &UpperPhyTimingContext);

    fn on_ul_full_slot_boundary(&self, context: &UpperPhyTimingContext);
}

/// Uplink processing results
///
/// Called from worker threads, never from the slot-boundary thread.
pub trait UpperPhyRxResultsNotifier: Send + Sync {
    fn on_new_prach_results(&self, results: &PrachResults);

    fn on_new_pusch_results(&self, results: &PuschResults);

    fn on_new_pucch_results(&self, results: &PucchResults);
}

/// Runtime overload conditions
pub trait UpperPhyErrorNotifier: Send + Sync {
    fn on_late_resource_grid(&self, context: &UpperPhyErrorContext);

    fn on_prach_request_late(&self, context: &UpperPhyErrorContext);

    fn on_prach_request_overflow(&self, context: &UpperPhyErrorContext);
}
