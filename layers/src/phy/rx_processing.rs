//! Uplink Receive Processing
//!
//! Receives capture completions from the radio side and moves the heavy
//! processing onto a task executor, so the radio thread only enqueues work.
//! Results are reported to the protocol layer from the executor threads.
//!
//! Each sector has its own executor. Given ordered executors, such as one
//! strand per sector, results of a sector are reported in capture order.

use crate::phy::adapters::Connector;
use crate::phy::softbuffer::SoftbufferPool;
use common::executors::TaskExecutor;
use interfaces::{
    LowerPhyRxSymbolContext, LowerPhyRxSymbolNotifier, PrachBuffer, PrachBufferContext, PrachPreamble,
    PrachResults, PucchResults, PuschResults, ResourceGrid, UpperPhyRxResultsNotifier,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Detects preambles in a captured PRACH window
pub trait PrachDetector: Send + Sync {
    fn detect(&self, context: &PrachBufferContext, buffer: &PrachBuffer) -> Vec<PrachPreamble>;
}

/// Everything decoded from one uplink slot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UplinkSlotResults {
    pub pusch: Vec<PuschResults>,
    pub pucch: Vec<PucchResults>,
}

/// Decodes the physical channels of a received uplink slot
pub trait UplinkSlotProcessor: Send + Sync {
    fn process_slot(
        &self,
        context: &LowerPhyRxSymbolContext,
        grid: &ResourceGrid,
        softbuffers: &SoftbufferPool,
    ) -> UplinkSlotResults;
}

/// Dispatches received captures to the executor of their sector
pub struct UplinkRxHandler {
    executors: Vec<Arc<dyn TaskExecutor>>,
    prach_detector: Arc<dyn PrachDetector>,
    slot_processor: Arc<dyn UplinkSlotProcessor>,
    softbuffers: Arc<SoftbufferPool>,
    results_notifier: Arc<Connector<dyn UpperPhyRxResultsNotifier>>,
    nof_symbols_per_slot: usize,
    nof_dropped: AtomicU64,
}

impl UplinkRxHandler {
    /// `executors` is indexed by sector
    pub fn new(
        executors: Vec<Arc<dyn TaskExecutor>>,
        prach_detector: Arc<dyn PrachDetector>,
        slot_processor: Arc<dyn UplinkSlotProcessor>,
        softbuffers: Arc<SoftbufferPool>,
        results_notifier: Arc<Connector<dyn UpperPhyRxResultsNotifier>>,
        nof_symbols_per_slot: usize,
    ) -> Self {
        Self {
            executors,
            prach_detector,
            slot_processor,
            softbuffers,
            results_notifier,
            nof_symbols_per_slot,
            nof_dropped: AtomicU64::new(0),
        }
    }

    /// Captures that could not be queued for processing
    pub fn nof_dropped(&self) -> u64 {
        self.nof_dropped.load(Ordering::Relaxed)
    }

    fn executor(&self, sector: usize) -> &Arc<dyn TaskExecutor> {
        match self.executors.get(sector) {
            Some(executor) => executor,
            None => panic!("Sector index {} exceeds the {} configured sectors", sector, self.executors.len()),
        }
    }
}

impl LowerPhyRxSymbolNotifier for UplinkRxHandler {
    fn on_rx_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>) {
        let notifier = self.results_notifier.get().clone();
        let detector = self.prach_detector.clone();
        let context = *context;

        let queued = self.executor(context.sector).execute(Box::new(move || {
            let preambles = detector.detect(&context, &buffer);
            // Release the buffer before reporting so the pool sees it idle
            drop(buffer);
            trace!(slot = %context.slot, nof_preambles = preambles.len(), "PRACH processed");
            notifier.on_new_prach_results(&PrachResults { context, preambles });
        }));

        if !queued {
            self.nof_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(slot = %context.slot, sector = context.sector, "Dropped PRACH window, executor is full");
        }
    }

    fn on_rx_symbol(&self, context: &LowerPhyRxSymbolContext, grid: Arc<ResourceGrid>) {
        let notifier = self.results_notifier.get().clone();
        if context.nof_symbols < self.nof_symbols_per_slot {
            return;
        }

        let processor = self.slot_processor.clone();
        let softbuffers = self.softbuffers.clone();
        let context = *context;

        let queued = self.executor(context.sector).execute(Box::new(move || {
            let results = processor.process_slot(&context, &grid, &softbuffers);
            for pucch in &results.pucch {
                notifier.on_new_pucch_results(pucch);
            }
            for pusch in &results.pusch {
                notifier.on_new_pusch_results(pusch);
            }
        }));

        if !queued {
            self.nof_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(slot = %context.slot, sector = context.sector, "Dropped uplink slot, executor is full");
        }
    }
}
