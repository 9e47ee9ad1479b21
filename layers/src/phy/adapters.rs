//! Notifier Adapters
//!
//! Shims between the radio-facing and protocol-facing halves of the PHY. Both
//! halves are built independently, so every adapter starts unbound and is
//! connected to its target once the whole graph exists. Forwarding through an
//! unbound adapter is a wiring bug and panics.

use interfaces::{
    LowerPhyErrorNotifier, LowerPhyRxSymbolNotifier, LowerPhyRxSymbolContext, LowerPhyTimingContext,
    LowerPhyTimingNotifier, PrachBuffer, PrachBufferContext, ResourceGrid, ResourceGridContext,
    UplinkRequestHandler, UpperPhyErrorContext, UpperPhyErrorNotifier, UpperPhyTimingContext,
    UpperPhyTimingNotifier,
};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Late-bound reference to a collaborator
pub struct Connector<T: ?Sized> {
    name: &'static str,
    target: OnceLock<Arc<T>>,
}

impl<T: ?Sized> Connector<T> {
    /// Unbound connector; `name` identifies it in panic messages
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            target: OnceLock::new(),
        }
    }

    /// Bind the target
    ///
    /// # Panics
    /// If the connector is already bound.
    pub fn connect(&self, target: Arc<T>) {
        if self.target.set(target).is_err() {
            panic!("{} adapter is already connected", self.name);
        }
        debug!(adapter = self.name, "Adapter connected");
    }

    pub fn is_connected(&self) -> bool {
        self.target.get().is_some()
    }

    /// Bound target
    ///
    /// # Panics
    /// If `connect` has not been called yet.
    pub fn get(&self) -> &Arc<T> {
        match self.target.get() {
            Some(target) => target,
            None => panic!("{} adapter is not connected", self.name),
        }
    }
}

/// Forwards radio timing events to the protocol side
pub struct PhyTimingAdapter {
    upper: Connector<dyn UpperPhyTimingNotifier>,
}

impl Default for PhyTimingAdapter {
    fn default() -> Self {
        Self {
            upper: Connector::new("Timing"),
        }
    }
}

impl PhyTimingAdapter {
    pub fn connect(&self, notifier: Arc<dyn UpperPhyTimingNotifier>) {
        self.upper.connect(notifier);
    }
}

impl LowerPhyTimingNotifier for PhyTimingAdapter {
    fn on_tti_boundary(&self, context: &LowerPhyTimingContext) {
        self.upper.get().on_tti_boundary(&UpperPhyTimingContext::from(context));
    }

    fn on_ul_half_slot_boundary(&self, context: &LowerPhyTimingContext) {
        self.upper.get().on_ul_half_slot_boundary(&UpperPhyTimingContext::from(context));
    }

    fn on_ul_full_slot_boundary(&self, context: &LowerPhyTimingContext) {
        self.upper.get().on_ul_full_slot_boundary(&UpperPhyTimingContext::from(context));
    }
}

/// Forwards completed captures to the uplink receive handler
pub struct PhyRxResultsAdapter {
    rx_handler: Connector<dyn LowerPhyRxSymbolNotifier>,
}

impl Default for PhyRxResultsAdapter {
    fn default() -> Self {
        Self {
            rx_handler: Connector::new("Rx results"),
        }
    }
}

impl PhyRxResultsAdapter {
    pub fn connect(&self, handler: Arc<dyn LowerPhyRxSymbolNotifier>) {
        self.rx_handler.connect(handler);
    }
}

impl LowerPhyRxSymbolNotifier for PhyRxResultsAdapter {
    fn on_rx_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>) {
        self.rx_handler.get().on_rx_prach_window(context, buffer);
    }

    fn on_rx_symbol(&self, context: &LowerPhyRxSymbolContext, grid: Arc<ResourceGrid>) {
        self.rx_handler.get().on_rx_symbol(context, grid);
    }
}

/// Forwards radio runtime errors to the protocol side
pub struct PhyErrorAdapter {
    upper: Connector<dyn UpperPhyErrorNotifier>,
}

impl Default for PhyErrorAdapter {
    fn default() -> Self {
        Self {
            upper: Connector::new("Error"),
        }
    }
}

impl PhyErrorAdapter {
    pub fn connect(&self, notifier: Arc<dyn UpperPhyErrorNotifier>) {
        self.upper.connect(notifier);
    }
}

impl LowerPhyErrorNotifier for PhyErrorAdapter {
    fn on_late_resource_grid(&self, context: &ResourceGridContext) {
        let upper = self.upper.get();
        warn!(slot = %context.slot, sector = context.sector, port = context.port, "Late resource grid");
        upper.on_late_resource_grid(&UpperPhyErrorContext::from(context));
    }

    fn on_prach_request_late(&self, context: &PrachBufferContext) {
        let upper = self.upper.get();
        warn!(slot = %context.slot, sector = context.sector, "Late PRACH request");
        upper.on_prach_request_late(&UpperPhyErrorContext::from(context));
    }

    fn on_prach_request_overflow(&self, context: &PrachBufferContext) {
        let upper = self.upper.get();
        warn!(slot = %context.slot, sector = context.sector, "PRACH request overflow");
        upper.on_prach_request_overflow(&UpperPhyErrorContext::from(context));
    }
}

/// Forwards capture requests to the radio-facing request handler
pub struct RequestHandlerAdapter {
    lower: Connector<dyn UplinkRequestHandler>,
}

impl Default for RequestHandlerAdapter {
    fn default() -> Self {
        Self {
            lower: Connector::new("Request handler"),
        }
    }
}

impl RequestHandlerAdapter {
    pub fn connect(&self, handler: Arc<dyn UplinkRequestHandler>) {
        self.lower.connect(handler);
    }
}

impl UplinkRequestHandler for RequestHandlerAdapter {
    fn request_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>) {
        self.lower.get().request_prach_window(context, buffer);
    }

    fn request_uplink_slot(&self, context: &ResourceGridContext, grid: Arc<ResourceGrid>) {
        self.lower.get().request_uplink_slot(context, grid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::{SlotPoint, SubcarrierSpacing};
    use interfaces::PrachFormat;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn timing_context(count: u32) -> LowerPhyTimingContext {
        LowerPhyTimingContext {
            slot: SlotPoint::new(1, count),
            sector: 0,
            time_point: Instant::now(),
            sample_timestamp: count as u64 * 61_440,
        }
    }

    fn prach_context() -> PrachBufferContext {
        PrachBufferContext {
            sector: 1,
            port: 0,
            slot: SlotPoint::new(1, 19),
            start_symbol: 0,
            format: PrachFormat::Format0,
            rb_offset: 0,
            pusch_scs: SubcarrierSpacing::Scs30,
        }
    }

    fn grid_context() -> ResourceGridContext {
        ResourceGridContext {
            slot: SlotPoint::new(1, 4),
            sector: 0,
            port: 0,
        }
    }

    #[derive(Default)]
    struct RecordingTiming {
        events: Mutex<Vec<(&'static str, UpperPhyTimingContext)>>,
    }

    impl UpperPhyTimingNotifier for RecordingTiming {
        fn on_tti_boundary(&self, context: &UpperPhyTimingContext) {
            self.events.lock().push(("tti", *context));
        }

        fn on_ul_half_slot_boundary(&self, context: &UpperPhyTimingContext) {
            self.events.lock().push(("half", *context));
        }

        fn on_ul_full_slot_boundary(&self, context: &UpperPhyTimingContext) {
            self.events.lock().push(("full", *context));
        }
    }

    #[derive(Default)]
    struct RecordingErrors {
        events: Mutex<Vec<(&'static str, UpperPhyErrorContext)>>,
    }

    impl UpperPhyErrorNotifier for RecordingErrors {
        fn on_late_resource_grid(&self, context: &UpperPhyErrorContext) {
            self.events.lock().push(("late_grid", *context));
        }

        fn on_prach_request_late(&self, context: &UpperPhyErrorContext) {
            self.events.lock().push(("late_prach", *context));
        }

        fn on_prach_request_overflow(&self, context: &UpperPhyErrorContext) {
            self.events.lock().push(("overflow", *context));
        }
    }

    #[test]
    fn test_connector_binds_once() {
        let connector: Connector<dyn UpperPhyTimingNotifier> = Connector::new("Test");
        assert!(!connector.is_connected());
        connector.connect(Arc::new(RecordingTiming::default()));
        assert!(connector.is_connected());
    }

    #[test]
    #[should_panic(expected = "already connected")]
    fn test_connector_double_connect() {
        let connector: Connector<dyn UpperPhyTimingNotifier> = Connector::new("Test");
        connector.connect(Arc::new(RecordingTiming::default()));
        connector.connect(Arc::new(RecordingTiming::default()));
    }

    #[test]
    fn test_timing_adapter_strips_radio_fields() {
        let adapter = PhyTimingAdapter::default();
        let upper = Arc::new(RecordingTiming::default());
        adapter.connect(upper.clone());

        let context = timing_context(42);
        adapter.on_tti_boundary(&context);
        adapter.on_ul_half_slot_boundary(&context);
        adapter.on_ul_full_slot_boundary(&context);

        let events = upper.events.lock();
        let names: Vec<_> = events.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["tti", "half", "full"]);
        assert!(events.iter().all(|(_, ctx)| ctx.slot == SlotPoint::new(1, 42)));
    }

    #[test]
    fn test_error_adapter_translates_contexts() {
        let adapter = PhyErrorAdapter::default();
        let upper = Arc::new(RecordingErrors::default());
        adapter.connect(upper.clone());

        adapter.on_late_resource_grid(&grid_context());
        adapter.on_prach_request_late(&prach_context());
        adapter.on_prach_request_overflow(&prach_context());

        let events = upper.events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ("late_grid", UpperPhyErrorContext { slot: SlotPoint::new(1, 4), sector: 0 }));
        assert_eq!(events[2], ("overflow", UpperPhyErrorContext { slot: SlotPoint::new(1, 19), sector: 1 }));
    }

    #[test]
    #[should_panic(expected = "Timing adapter is not connected")]
    fn test_timing_adapter_not_connected() {
        PhyTimingAdapter::default().on_tti_boundary(&timing_context(0));
    }

    #[test]
    #[should_panic(expected = "Rx results adapter is not connected")]
    fn test_rx_results_adapter_not_connected() {
        let grid = Arc::new(ResourceGrid::new(14, 12));
        let context = LowerPhyRxSymbolContext {
            slot: SlotPoint::new(1, 0),
            sector: 0,
            port: 0,
            nof_symbols: 14,
        };
        PhyRxResultsAdapter::default().on_rx_symbol(&context, grid);
    }

    #[test]
    #[should_panic(expected = "Error adapter is not connected")]
    fn test_error_adapter_not_connected() {
        PhyErrorAdapter::default().on_prach_request_overflow(&prach_context());
    }

    #[test]
    #[should_panic(expected = "Request handler adapter is not connected")]
    fn test_request_handler_adapter_not_connected() {
        let buffer = Arc::new(PrachBuffer::new(1, 839));
        RequestHandlerAdapter::default().request_prach_window(&prach_context(), buffer);
    }
}
