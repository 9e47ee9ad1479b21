//! Uplink Request Processor
//!
//! Binds PRACH and uplink slot capture requests to pooled buffers and hands
//! them to the radio-facing request handler. Capture results come back later
//! through the receive path; this side only submits.
//!
//! A request whose slot is already behind the latest TTI boundary can no longer
//! be captured. It is reported to the error notifier and not forwarded.

use crate::phy::prach_buffer_pool::PrachBufferPool;
use common::types::SlotPoint;
use interfaces::{LowerPhyErrorNotifier, PrachBufferContext, ResourceGrid, ResourceGridContext, UplinkRequestHandler};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

const NO_SLOT: u64 = u64::MAX;

/// Request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkRequestStats {
    pub prach_requests: u64,
    pub uplink_slot_requests: u64,
    pub late_prach_requests: u64,
    pub late_uplink_slot_requests: u64,
    pub prach_overflows: u64,
}

#[derive(Default)]
struct Counters {
    prach_requests: AtomicU64,
    uplink_slot_requests: AtomicU64,
    late_prach_requests: AtomicU64,
    late_uplink_slot_requests: AtomicU64,
    prach_overflows: AtomicU64,
}

pub struct UplinkRequestProcessor {
    prach_pool: Arc<PrachBufferPool>,
    handler: Arc<dyn UplinkRequestHandler>,
    error_notifier: Arc<dyn LowerPhyErrorNotifier>,
    /// Latest TTI boundary, numerology in the upper half
    current_slot: AtomicU64,
    counters: Counters,
}

impl UplinkRequestProcessor {
    pub fn new(
        prach_pool: Arc<PrachBufferPool>,
        handler: Arc<dyn UplinkRequestHandler>,
        error_notifier: Arc<dyn LowerPhyErrorNotifier>,
    ) -> Self {
        Self {
            prach_pool,
            handler,
            error_notifier,
            current_slot: AtomicU64::new(NO_SLOT),
            counters: Counters::default(),
        }
    }

    /// Record the slot of a new TTI boundary
    pub fn handle_tti_boundary(&self, slot: SlotPoint) {
        let packed = ((slot.numerology() as u64) << 32) | slot.to_uint() as u64;
        self.current_slot.store(packed, Ordering::Release);
    }

    /// Slot of the latest TTI boundary
    pub fn current_slot(&self) -> Option<SlotPoint> {
        match self.current_slot.load(Ordering::Acquire) {
            NO_SLOT => None,
            packed => Some(SlotPoint::new((packed >> 32) as u8, packed as u32)),
        }
    }

    fn is_late(&self, slot: SlotPoint) -> bool {
        match self.current_slot() {
            Some(current) if current.numerology() == slot.numerology() => slot < current,
            _ => false,
        }
    }

    /// Request the capture of a PRACH occasion
    pub fn process_prach_request(&self, context: &PrachBufferContext) {
        self.counters.prach_requests.fetch_add(1, Ordering::Relaxed);

        if self.is_late(context.slot) {
            self.counters.late_prach_requests.fetch_add(1, Ordering::Relaxed);
            self.error_notifier.on_prach_request_late(context);
            return;
        }

        let Some(buffer) = self.prach_pool.get_prach_buffer() else {
            self.counters.prach_overflows.fetch_add(1, Ordering::Relaxed);
            self.error_notifier.on_prach_request_overflow(context);
            return;
        };

        trace!(slot = %context.slot, sector = context.sector, format = ?context.format, "PRACH request");
        self.handler.request_prach_window(context, buffer);
    }

    /// Request the capture of an uplink slot into `grid`
    ///
    /// An accepted grid is cleared before it is handed to the radio. A late one
    /// is left untouched.
    pub fn process_uplink_slot_request(&self, context: &ResourceGridContext, grid: Arc<ResourceGrid>) {
        self.counters.uplink_slot_requests.fetch_add(1, Ordering::Relaxed);

        if self.is_late(context.slot) {
            self.counters.late_uplink_slot_requests.fetch_add(1, Ordering::Relaxed);
            self.error_notifier.on_late_resource_grid(context);
            return;
        }

        grid.set_all_zero();
        trace!(slot = %context.slot, sector = context.sector, port = context.port, "Uplink slot request");
        self.handler.request_uplink_slot(context, grid);
    }

    pub fn stats(&self) -> UplinkRequestStats {
        UplinkRequestStats {
            prach_requests: self.counters.prach_requests.load(Ordering::Relaxed),
            uplink_slot_requests: self.counters.uplink_slot_requests.load(Ordering::Relaxed),
            late_prach_requests: self.counters.late_prach_requests.load(Ordering::Relaxed),
            late_uplink_slot_requests: self.counters.late_uplink_slot_requests.load(Ordering::Relaxed),
            prach_overflows: self.counters.prach_overflows.load(Ordering::Relaxed),
        }
    }
}
