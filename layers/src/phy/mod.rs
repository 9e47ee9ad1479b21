//! Upper Physical Layer (PHY)
//!
//! Buffer pools, uplink request handling and event plumbing between the
//! radio-facing lower PHY and the protocol layer. [`UpperPhy`] owns every piece
//! and is the single access point for both sides.
//!
//! Bring-up order:
//! 1. build the lower PHY with unbound adapters,
//! 2. build the [`UpperPhy`],
//! 3. connect the adapters to the handlers the upper PHY exposes and the
//!    upper PHY's request handler to the lower PHY,
//! 4. set the protocol-side notifiers,
//! 5. start the radio timeline.

pub mod adapters;
pub mod prach_buffer_pool;
pub mod resource_grid_pool;
pub mod rx_processing;
pub mod softbuffer;
pub mod timing;
pub mod uplink_request_processor;

pub use adapters::{Connector, PhyErrorAdapter, PhyRxResultsAdapter, PhyTimingAdapter, RequestHandlerAdapter};
pub use prach_buffer_pool::{PrachBufferPool, PrachBufferPoolConfig};
pub use resource_grid_pool::{ResourceGridPool, ResourceGridPoolConfig};
pub use rx_processing::{PrachDetector, UplinkRxHandler, UplinkSlotProcessor, UplinkSlotResults};
pub use softbuffer::{Softbuffer, SoftbufferIdentifier, SoftbufferPool, SoftbufferPoolConfig, UniqueSoftbuffer};
pub use timing::TimingDistributor;
pub use uplink_request_processor::{UplinkRequestProcessor, UplinkRequestStats};

use crate::LayerError;
use common::executors::{
    SyncTaskExecutor, TaskExecutor, TaskStrand, TaskWorkerPool, TaskWorkerPoolConfig, TaskWorkerPoolExecutor,
};
use common::types::SlotPoint;
use interfaces::{
    LowerPhyRxSymbolNotifier, PrachBufferContext, ResourceGrid, ResourceGridContext,
    UplinkRequestHandler, UpperPhyErrorContext, UpperPhyErrorNotifier, UpperPhyRxResultsNotifier,
    UpperPhyTimingContext, UpperPhyTimingNotifier,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, trace};

/// Upper PHY configuration
#[derive(Debug, Clone)]
pub struct UpperPhyConfig {
    /// Downlink resource grids handed to the protocol layer for transmission
    pub dl_grid_pool: ResourceGridPoolConfig,
    /// Uplink resource grids the radio captures into
    pub ul_grid_pool: ResourceGridPoolConfig,
    pub prach_pool: PrachBufferPoolConfig,
    pub softbuffer_pool: SoftbufferPoolConfig,
    /// Workers running uplink processing
    pub worker_pool: TaskWorkerPoolConfig,
    /// OFDM symbols in a complete uplink slot
    pub nof_symbols_per_slot: usize,
    /// Finish uplink processing before returning to the radio thread
    pub blocking_processing: bool,
}

/// Upper PHY counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpperPhyStats {
    pub requests: UplinkRequestStats,
    pub late_resource_grids: u64,
    pub late_prach_requests: u64,
    pub prach_overflows: u64,
    pub stale_grid_requests: u64,
    pub dropped_rx_captures: u64,
    pub reserved_softbuffers: usize,
    pub pending_tasks: usize,
}

/// Slot bookkeeping on each timing event before it reaches the protocol layer
struct UpperPhyTimingHandler {
    processor: Arc<UplinkRequestProcessor>,
    softbuffers: Arc<SoftbufferPool>,
    notifier: Arc<Connector<dyn UpperPhyTimingNotifier>>,
}

impl UpperPhyTimingNotifier for UpperPhyTimingHandler {
    fn on_tti_boundary(&self, context: &UpperPhyTimingContext) {
        let notifier = self.notifier.get();
        self.processor.handle_tti_boundary(context.slot);
        self.softbuffers.run_slot(context.slot);
        notifier.on_tti_boundary(context);
    }

    fn on_ul_half_slot_boundary(&self, context: &UpperPhyTimingContext) {
        self.notifier.get().on_ul_half_slot_boundary(context);
    }

    fn on_ul_full_slot_boundary(&self, context: &UpperPhyTimingContext) {
        self.notifier.get().on_ul_full_slot_boundary(context);
    }
}

/// Counts runtime errors and reports them to the protocol layer
struct UpperPhyErrorHandler {
    notifier: Arc<Connector<dyn UpperPhyErrorNotifier>>,
    late_resource_grids: AtomicU64,
    late_prach_requests: AtomicU64,
    prach_overflows: AtomicU64,
}

impl UpperPhyErrorNotifier for UpperPhyErrorHandler {
    fn on_late_resource_grid(&self, context: &UpperPhyErrorContext) {
        self.late_resource_grids.fetch_add(1, Ordering::Relaxed);
        self.notifier.get().on_late_resource_grid(context);
    }

    fn on_prach_request_late(&self, context: &UpperPhyErrorContext) {
        self.late_prach_requests.fetch_add(1, Ordering::Relaxed);
        self.notifier.get().on_prach_request_late(context);
    }

    fn on_prach_request_overflow(&self, context: &UpperPhyErrorContext) {
        self.prach_overflows.fetch_add(1, Ordering::Relaxed);
        self.notifier.get().on_prach_request_overflow(context);
    }
}

/// Upper PHY facade
pub struct UpperPhy {
    config: UpperPhyConfig,
    dl_grid_pool: Arc<ResourceGridPool>,
    ul_grid_pool: Arc<ResourceGridPool>,
    softbuffer_pool: Arc<SoftbufferPool>,
    worker_pool: Arc<TaskWorkerPool>,
    request_handler: Arc<RequestHandlerAdapter>,
    processor: Arc<UplinkRequestProcessor>,
    timing_handler: Arc<UpperPhyTimingHandler>,
    rx_handler: Arc<UplinkRxHandler>,
    error_handler: Arc<UpperPhyErrorHandler>,
    timing_notifier: Arc<Connector<dyn UpperPhyTimingNotifier>>,
    results_notifier: Arc<Connector<dyn UpperPhyRxResultsNotifier>>,
    error_notifier: Arc<Connector<dyn UpperPhyErrorNotifier>>,
}

impl UpperPhy {
    /// Allocate the pools, start the workers and wire the internal handlers
    pub fn new(
        config: UpperPhyConfig,
        prach_detector: Arc<dyn PrachDetector>,
        slot_processor: Arc<dyn UplinkSlotProcessor>,
    ) -> Result<Self, LayerError> {
        if config.nof_symbols_per_slot == 0 || config.nof_symbols_per_slot > config.ul_grid_pool.nof_symbols {
            return Err(LayerError::ConfigurationError(format!(
                "{} symbols per slot do not fit an uplink grid of {} symbols",
                config.nof_symbols_per_slot, config.ul_grid_pool.nof_symbols
            )));
        }

        let dl_grid_pool = Arc::new(ResourceGridPool::new(config.dl_grid_pool.clone())?);
        let ul_grid_pool = Arc::new(ResourceGridPool::new(config.ul_grid_pool.clone())?);
        let prach_pool = Arc::new(PrachBufferPool::new(config.prach_pool.clone())?);
        let softbuffer_pool = Arc::new(SoftbufferPool::new(config.softbuffer_pool.clone())?);
        let worker_pool = Arc::new(TaskWorkerPool::new(config.worker_pool.clone())?);

        let timing_notifier = Arc::new(Connector::new("Upper PHY timing notifier"));
        let results_notifier = Arc::new(Connector::new("Upper PHY rx results notifier"));
        let error_notifier = Arc::new(Connector::new("Upper PHY error notifier"));

        let error_handler = Arc::new(UpperPhyErrorHandler {
            notifier: error_notifier.clone(),
            late_resource_grids: AtomicU64::new(0),
            late_prach_requests: AtomicU64::new(0),
            prach_overflows: AtomicU64::new(0),
        });
        let processor_errors = Arc::new(PhyErrorAdapter::default());
        processor_errors.connect(error_handler.clone());

        let request_handler = Arc::new(RequestHandlerAdapter::default());
        let processor = Arc::new(UplinkRequestProcessor::new(
            prach_pool.clone(),
            request_handler.clone(),
            processor_errors,
        ));

        let timing_handler = Arc::new(UpperPhyTimingHandler {
            processor: processor.clone(),
            softbuffers: softbuffer_pool.clone(),
            notifier: timing_notifier.clone(),
        });

        // One strand per sector keeps each sector's results in capture order
        let executors: Vec<Arc<dyn TaskExecutor>> = (0..config.ul_grid_pool.nof_sectors)
            .map(|sector| {
                let strand = TaskStrand::new(
                    format!("{}_sector{}", config.worker_pool.name, sector),
                    TaskWorkerPoolExecutor::new(worker_pool.clone()),
                    config.worker_pool.queue_capacity,
                );
                if config.blocking_processing {
                    Arc::new(SyncTaskExecutor::new(strand)) as Arc<dyn TaskExecutor>
                } else {
                    Arc::new(strand) as Arc<dyn TaskExecutor>
                }
            })
            .collect();
        let rx_handler = Arc::new(UplinkRxHandler::new(
            executors,
            prach_detector,
            slot_processor,
            softbuffer_pool.clone(),
            results_notifier.clone(),
            config.nof_symbols_per_slot,
        ));

        info!(
            dl_grids = dl_grid_pool.nof_grids(),
            ul_grids = ul_grid_pool.nof_grids(),
            prach_buffers = prach_pool.capacity(),
            softbuffers = config.softbuffer_pool.max_softbuffers,
            workers = worker_pool.nof_workers(),
            blocking = config.blocking_processing,
            "Upper PHY created"
        );

        Ok(Self {
            config,
            dl_grid_pool,
            ul_grid_pool,
            softbuffer_pool,
            worker_pool,
            request_handler,
            processor,
            timing_handler,
            rx_handler,
            error_handler,
            timing_notifier,
            results_notifier,
            error_notifier,
        })
    }

    pub fn dl_grid_pool(&self) -> &Arc<ResourceGridPool> {
        &self.dl_grid_pool
    }

    pub fn ul_grid_pool(&self) -> &Arc<ResourceGridPool> {
        &self.ul_grid_pool
    }

    pub fn uplink_request_processor(&self) -> &Arc<UplinkRequestProcessor> {
        &self.processor
    }

    /// Downlink grid for the protocol layer to fill
    pub fn get_downlink_grid(&self, context: &ResourceGridContext) -> Arc<ResourceGrid> {
        self.dl_grid_pool.get_resource_grid(context)
    }

    /// Request the capture of a PRACH occasion
    pub fn request_prach(&self, context: &PrachBufferContext) {
        self.processor.process_prach_request(context);
    }

    /// Request the capture of every receive port of an uplink slot
    ///
    /// The grids come from the uplink pool; each is cleared once its request is
    /// accepted.
    pub fn request_uplink_slot(&self, slot: SlotPoint, sector: usize) {
        for port in 0..self.config.ul_grid_pool.nof_antenna_ports {
            let context = ResourceGridContext { slot, sector, port };
            let grid = self.ul_grid_pool.get_resource_grid(&context);
            self.processor.process_uplink_slot_request(&context, grid);
        }
        trace!(slot = %slot, sector, "Requested uplink slot");
    }

    /// Timing events from the radio side, after context translation
    pub fn timing_handler(&self) -> Arc<dyn UpperPhyTimingNotifier> {
        self.timing_handler.clone()
    }

    /// Capture completions from the radio side
    pub fn rx_symbol_handler(&self) -> Arc<dyn LowerPhyRxSymbolNotifier> {
        self.rx_handler.clone()
    }

    /// Runtime errors from the radio side, after context translation
    pub fn error_handler(&self) -> Arc<dyn UpperPhyErrorNotifier> {
        self.error_handler.clone()
    }

    /// Bind the radio-side handler that executes capture requests
    pub fn connect_request_handler(&self, handler: Arc<dyn UplinkRequestHandler>) {
        self.request_handler.connect(handler);
    }

    pub fn set_timing_notifier(&self, notifier: Arc<dyn UpperPhyTimingNotifier>) {
        self.timing_notifier.connect(notifier);
    }

    pub fn set_rx_results_notifier(&self, notifier: Arc<dyn UpperPhyRxResultsNotifier>) {
        self.results_notifier.connect(notifier);
    }

    pub fn set_error_notifier(&self, notifier: Arc<dyn UpperPhyErrorNotifier>) {
        self.error_notifier.connect(notifier);
    }

    /// Block until every uplink task queued so far has completed
    pub fn wait_pending_tasks(&self) {
        self.worker_pool.wait_pending_tasks();
    }

    pub fn stats(&self) -> UpperPhyStats {
        UpperPhyStats {
            requests: self.processor.stats(),
            late_resource_grids: self.error_handler.late_resource_grids.load(Ordering::Relaxed),
            late_prach_requests: self.error_handler.late_prach_requests.load(Ordering::Relaxed),
            prach_overflows: self.error_handler.prach_overflows.load(Ordering::Relaxed),
            stale_grid_requests: self.dl_grid_pool.nof_stale_requests() + self.ul_grid_pool.nof_stale_requests(),
            dropped_rx_captures: self.rx_handler.nof_dropped(),
            reserved_softbuffers: self.softbuffer_pool.nof_reserved(),
            pending_tasks: self.worker_pool.nof_pending_tasks(),
        }
    }

    /// Drain and stop the workers
    pub fn stop(&self) {
        self.worker_pool.stop();
        info!("Upper PHY stopped");
    }
}
