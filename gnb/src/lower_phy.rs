//! Simulated Lower PHY
//!
//! Drives the radio timeline on a dedicated thread without a radio. Every slot
//! it transmits the downlink grids, emits the three timing events and captures
//! the uplink slots and PRACH windows requested for that slot, filling them with
//! noise and, on PRACH occasions, an occasional synthetic preamble.

use crate::processors::{generate_preamble, zc_root};
use anyhow::Context;
use common::executors::{set_current_thread_priority, RealTimePriority};
use common::types::{SlotPoint, SubcarrierSpacing};
use common::utils::time;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use interfaces::{
    LowerPhyErrorNotifier, LowerPhyRxSymbolContext, LowerPhyRxSymbolNotifier, LowerPhyTimingContext,
    LowerPhyTimingNotifier, PrachBuffer, PrachBufferContext, ResourceGrid, ResourceGridContext,
    UplinkRequestHandler,
};
use layers::phy::{Connector, PhyErrorAdapter, PhyRxResultsAdapter, ResourceGridPool, TimingDistributor};
use num_complex::Complex32;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Simulated radio parameters
#[derive(Debug, Clone)]
pub struct LowerPhyConfig {
    pub scs: SubcarrierSpacing,
    pub nof_sectors: usize,
    pub nof_tx_ports: usize,
    pub nof_symbols: usize,
    pub nof_subcarriers: usize,
    /// Slot duration multiplier; 1.0 is real time
    pub slot_time_scale: f64,
    /// Capture requests buffered between two slots
    pub max_pending_requests: usize,
    /// Probability of a preamble in each PRACH window
    pub preamble_probability: f64,
    /// PRACH root sequence index used for synthetic preambles
    pub prach_root_sequence_index: u16,
    /// Uplink noise amplitude
    pub noise_amplitude: f32,
    pub priority: Option<RealTimePriority>,
}

/// Lower PHY counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LowerPhyStats {
    pub slots: u64,
    pub late_slots: u64,
    pub tx_grids: u64,
    pub ul_captures: u64,
    pub prach_captures: u64,
    pub injected_preambles: u64,
    pub rejected_requests: u64,
}

#[derive(Default)]
struct Counters {
    slots: AtomicU64,
    late_slots: AtomicU64,
    tx_grids: AtomicU64,
    ul_captures: AtomicU64,
    prach_captures: AtomicU64,
    injected_preambles: AtomicU64,
    rejected_requests: AtomicU64,
}

enum CaptureRequest {
    Prach(PrachBufferContext, Arc<PrachBuffer>),
    UplinkSlot(ResourceGridContext, Arc<ResourceGrid>),
}

/// Requests waiting for their slot
#[derive(Default)]
struct Pending {
    prach: Vec<(PrachBufferContext, Arc<PrachBuffer>)>,
    uplink: Vec<(ResourceGridContext, Arc<ResourceGrid>)>,
}

pub struct SimulatedLowerPhy {
    config: LowerPhyConfig,
    timing: Arc<TimingDistributor>,
    rx: Arc<PhyRxResultsAdapter>,
    errors: Arc<PhyErrorAdapter>,
    dl_grids: Connector<ResourceGridPool>,
    request_tx: Sender<CaptureRequest>,
    request_rx: Receiver<CaptureRequest>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

impl SimulatedLowerPhy {
    /// Build the lower PHY with its adapters still unbound
    pub fn new(config: LowerPhyConfig) -> Self {
        let (request_tx, request_rx) = bounded(config.max_pending_requests.max(1));
        Self {
            config,
            timing: Arc::new(TimingDistributor::new()),
            rx: Arc::new(PhyRxResultsAdapter::default()),
            errors: Arc::new(PhyErrorAdapter::default()),
            dl_grids: Connector::new("Downlink grid pool"),
            request_tx,
            request_rx,
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Timing events fan out from here
    pub fn timing(&self) -> &Arc<TimingDistributor> {
        &self.timing
    }

    /// Capture completions leave through this adapter
    pub fn rx_adapter(&self) -> &Arc<PhyRxResultsAdapter> {
        &self.rx
    }

    /// Runtime errors leave through this adapter
    pub fn error_adapter(&self) -> &Arc<PhyErrorAdapter> {
        &self.errors
    }

    /// Grids to transmit
    pub fn connect_downlink_grids(&self, pool: Arc<ResourceGridPool>) {
        self.dl_grids.connect(pool);
    }

    pub fn stats(&self) -> LowerPhyStats {
        LowerPhyStats {
            slots: self.counters.slots.load(Ordering::Relaxed),
            late_slots: self.counters.late_slots.load(Ordering::Relaxed),
            tx_grids: self.counters.tx_grids.load(Ordering::Relaxed),
            ul_captures: self.counters.ul_captures.load(Ordering::Relaxed),
            prach_captures: self.counters.prach_captures.load(Ordering::Relaxed),
            injected_preambles: self.counters.injected_preambles.load(Ordering::Relaxed),
            rejected_requests: self.counters.rejected_requests.load(Ordering::Relaxed),
        }
    }

    /// Start the radio timeline thread
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Lower PHY already running");
            return Ok(());
        }

        let phy = self.clone();
        let handle = std::thread::Builder::new()
            .name("lower_phy".to_string())
            .spawn(move || phy.run())
            .context("Failed to spawn the lower PHY thread")?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    /// Stop the timeline and wait for the thread
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Lower PHY thread panicked");
            }
        }
    }

    fn slot_duration(&self) -> Duration {
        time::slot_duration(self.config.scs).mul_f64(self.config.slot_time_scale.max(0.0))
    }

    fn samples_per_slot(&self) -> u64 {
        (self.config.nof_subcarriers.next_power_of_two() * self.config.nof_symbols) as u64
    }

    fn run(self: Arc<Self>) {
        if let Some(priority) = self.config.priority {
            if let Err(e) = set_current_thread_priority(priority) {
                warn!("Lower PHY runs without real-time priority: {}", e);
            }
        }

        let slot_duration = self.slot_duration();
        info!(
            scs_khz = self.config.scs.to_khz(),
            slot_duration_us = slot_duration.as_micros() as u64,
            "Lower PHY timeline started"
        );

        let start = Instant::now();
        let mut slot = SlotPoint::new(self.config.scs.numerology(), 0);
        let mut pending = Pending::default();
        let mut count: u64 = 0;

        while self.running.load(Ordering::Acquire) {
            let deadline = start + slot_duration.mul_f64(count as f64);
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            } else if now - deadline > slot_duration {
                self.counters.late_slots.fetch_add(1, Ordering::Relaxed);
            }

            self.run_slot(slot, count * self.samples_per_slot(), &mut pending);
            slot += 1;
            count += 1;
        }

        info!(slots = count, "Lower PHY timeline stopped");
    }

    fn run_slot(&self, slot: SlotPoint, sample_timestamp: u64, pending: &mut Pending) {
        let context = LowerPhyTimingContext {
            slot,
            sector: 0,
            time_point: Instant::now(),
            sample_timestamp,
        };
        self.counters.slots.fetch_add(1, Ordering::Relaxed);

        self.transmit(slot);
        self.timing.on_tti_boundary(&context);

        for request in self.request_rx.try_iter() {
            match request {
                CaptureRequest::Prach(ctx, buffer) => pending.prach.push((ctx, buffer)),
                CaptureRequest::UplinkSlot(ctx, grid) => pending.uplink.push((ctx, grid)),
            }
        }

        let uplink = self.take_due_uplink(slot, pending);
        let half = self.config.nof_symbols / 2;
        for (ctx, grid) in &uplink {
            self.capture_symbols(grid, 0..half);
            self.notify_rx_symbols(ctx, grid, half);
        }
        self.timing.on_ul_half_slot_boundary(&context);

        for (ctx, grid) in uplink {
            self.capture_symbols(&grid, half..self.config.nof_symbols);
            self.notify_rx_symbols(&ctx, &grid, self.config.nof_symbols);
            self.counters.ul_captures.fetch_add(1, Ordering::Relaxed);
        }

        for (ctx, buffer) in self.take_due_prach(slot, pending) {
            self.capture_prach(&ctx, &buffer);
            self.counters.prach_captures.fetch_add(1, Ordering::Relaxed);
            self.rx.on_rx_prach_window(&ctx, buffer);
        }
        self.timing.on_ul_full_slot_boundary(&context);
    }

    /// Read out every downlink grid of the slot
    fn transmit(&self, slot: SlotPoint) {
        let pool = self.dl_grids.get();
        for sector in 0..self.config.nof_sectors {
            for port in 0..self.config.nof_tx_ports {
                let grid = pool.get_resource_grid(&ResourceGridContext { slot, sector, port });
                if !grid.is_empty() {
                    self.counters.tx_grids.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn take_due_uplink(&self, slot: SlotPoint, pending: &mut Pending) -> Vec<(ResourceGridContext, Arc<ResourceGrid>)> {
        let mut due = Vec::new();
        let mut keep = Vec::new();
        for (ctx, grid) in pending.uplink.drain(..) {
            if ctx.slot.numerology() != slot.numerology() || ctx.slot < slot {
                self.errors.on_late_resource_grid(&ctx);
            } else if ctx.slot == slot {
                due.push((ctx, grid));
            } else {
                keep.push((ctx, grid));
            }
        }
        pending.uplink = keep;
        due
    }

    fn take_due_prach(&self, slot: SlotPoint, pending: &mut Pending) -> Vec<(PrachBufferContext, Arc<PrachBuffer>)> {
        let mut due = Vec::new();
        let mut keep = Vec::new();
        for (ctx, buffer) in pending.prach.drain(..) {
            if ctx.slot.numerology() != slot.numerology() || ctx.slot < slot {
                self.errors.on_prach_request_late(&ctx);
            } else if ctx.slot == slot {
                due.push((ctx, buffer));
            } else {
                keep.push((ctx, buffer));
            }
        }
        pending.prach = keep;
        due
    }

    fn noise(&self, rng: &mut impl Rng) -> Complex32 {
        let a = self.config.noise_amplitude;
        if a <= 0.0 {
            return Complex32::new(0.0, 0.0);
        }
        Complex32::new(rng.gen_range(-a..a), rng.gen_range(-a..a))
    }

    fn capture_symbols(&self, grid: &ResourceGrid, symbols: std::ops::Range<usize>) {
        let mut rng = rand::thread_rng();
        let mut writer = grid.writer();
        for symbol in symbols {
            // Symbol 0 carries noise only; the rest a unit reference on the lower half of the band
            let samples: Vec<Complex32> = (0..grid.nof_subcarriers())
                .map(|sc| {
                    let signal = if symbol > 0 && sc < grid.nof_subcarriers() / 2 {
                        Complex32::new(1.0, 0.0)
                    } else {
                        Complex32::new(0.0, 0.0)
                    };
                    signal + self.noise(&mut rng)
                })
                .collect();
            writer.put_symbol(symbol, 0, &samples);
        }
    }

    fn notify_rx_symbols(&self, ctx: &ResourceGridContext, grid: &Arc<ResourceGrid>, nof_symbols: usize) {
        let rx_context = LowerPhyRxSymbolContext {
            slot: ctx.slot,
            sector: ctx.sector,
            port: ctx.port,
            nof_symbols,
        };
        self.rx.on_rx_symbol(&rx_context, grid.clone());
    }

    fn capture_prach(&self, ctx: &PrachBufferContext, buffer: &PrachBuffer) {
        let mut rng = rand::thread_rng();
        let length = buffer.sequence_length();
        let preamble = if rng.gen_bool(self.config.preamble_probability.clamp(0.0, 1.0)) {
            let index = rng.gen_range(0..interfaces::prach_buffer::constants::MAX_NUM_PREAMBLES);
            self.counters.injected_preambles.fetch_add(1, Ordering::Relaxed);
            debug!(slot = %ctx.slot, sector = ctx.sector, preamble = index, "Injecting PRACH preamble");
            Some(generate_preamble(zc_root(self.config.prach_root_sequence_index, length), length, index))
        } else {
            None
        };

        for symbol in 0..buffer.nof_symbols() {
            let samples: Vec<Complex32> = (0..length)
                .map(|n| preamble.as_ref().map_or(Complex32::new(0.0, 0.0), |p| p[n]) + self.noise(&mut rng))
                .collect();
            buffer.write_symbol(symbol, &samples);
        }
        buffer.mark_completed();
    }
}

impl UplinkRequestHandler for SimulatedLowerPhy {
    fn request_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>) {
        match self.request_tx.try_send(CaptureRequest::Prach(*context, buffer)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.rejected_requests.fetch_add(1, Ordering::Relaxed);
                self.errors.on_prach_request_overflow(context);
            }
        }
    }

    fn request_uplink_slot(&self, context: &ResourceGridContext, grid: Arc<ResourceGrid>) {
        match self.request_tx.try_send(CaptureRequest::UplinkSlot(*context, grid)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.rejected_requests.fetch_add(1, Ordering::Relaxed);
                self.errors.on_late_resource_grid(context);
            }
        }
    }
}

impl Drop for SimulatedLowerPhy {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::{PrachFormat, UpperPhyErrorContext, UpperPhyErrorNotifier};
    use layers::phy::ResourceGridPoolConfig;

    fn config(max_pending_requests: usize) -> LowerPhyConfig {
        LowerPhyConfig {
            scs: SubcarrierSpacing::Scs30,
            nof_sectors: 1,
            nof_tx_ports: 1,
            nof_symbols: 14,
            nof_subcarriers: 24,
            slot_time_scale: 1.0,
            max_pending_requests,
            preamble_probability: 1.0,
            prach_root_sequence_index: 1,
            noise_amplitude: 0.01,
            priority: None,
        }
    }

    #[derive(Default)]
    struct Rx {
        symbols: Mutex<Vec<(SlotPoint, usize)>>,
        prach: Mutex<Vec<(PrachBufferContext, bool)>>,
    }

    impl LowerPhyRxSymbolNotifier for Rx {
        fn on_rx_prach_window(&self, context: &PrachBufferContext, buffer: Arc<PrachBuffer>) {
            self.prach.lock().push((*context, buffer.is_completed()));
        }

        fn on_rx_symbol(&self, context: &LowerPhyRxSymbolContext, _grid: Arc<ResourceGrid>) {
            self.symbols.lock().push((context.slot, context.nof_symbols));
        }
    }

    #[derive(Default)]
    struct Errors {
        events: Mutex<Vec<(&'static str, UpperPhyErrorContext)>>,
    }

    impl UpperPhyErrorNotifier for Errors {
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

    fn wired(max_pending_requests: usize) -> (SimulatedLowerPhy, Arc<Rx>, Arc<Errors>) {
        let phy = SimulatedLowerPhy::new(config(max_pending_requests));
        let rx = Arc::new(Rx::default());
        let errors = Arc::new(Errors::default());
        phy.rx_adapter().connect(rx.clone());
        phy.error_adapter().connect(errors.clone());
        let pool = ResourceGridPool::new(ResourceGridPoolConfig {
            nof_slots_in_pool: 4,
            nof_sectors: 1,
            nof_antenna_ports: 1,
            nof_symbols: 14,
            nof_subcarriers: 24,
            check_reuse: false,
        })
        .unwrap();
        phy.connect_downlink_grids(Arc::new(pool));
        (phy, rx, errors)
    }

    fn prach_context(slot: SlotPoint) -> PrachBufferContext {
        PrachBufferContext {
            sector: 0,
            port: 0,
            slot,
            start_symbol: 0,
            format: PrachFormat::FormatB4,
            rb_offset: 0,
            pusch_scs: SubcarrierSpacing::Scs30,
        }
    }

    #[test]
    fn test_captures_requests_in_their_slot() {
        let (phy, rx, errors) = wired(8);
        let slot = SlotPoint::new(1, 5);
        let grid = Arc::new(ResourceGrid::new(14, 24));

        phy.request_uplink_slot(&ResourceGridContext { slot: slot + 1, sector: 0, port: 0 }, grid.clone());
        phy.request_prach_window(&prach_context(slot + 1), Arc::new(PrachBuffer::new(12, 139)));

        let mut pending = Pending::default();
        phy.run_slot(slot, 0, &mut pending);
        assert!(rx.symbols.lock().is_empty());
        assert_eq!(pending.uplink.len(), 1);

        phy.run_slot(slot + 1, 0, &mut pending);
        assert_eq!(*rx.symbols.lock(), vec![(slot + 1, 7), (slot + 1, 14)]);
        assert_eq!(rx.prach.lock().len(), 1);
        assert!(rx.prach.lock()[0].1);
        assert!(!grid.is_empty());
        assert!(errors.events.lock().is_empty());

        let stats = phy.stats();
        assert_eq!(stats.slots, 2);
        assert_eq!(stats.ul_captures, 1);
        assert_eq!(stats.injected_preambles, 1);
    }

    #[test]
    fn test_missed_requests_are_reported_late() {
        let (phy, rx, errors) = wired(8);
        let slot = SlotPoint::new(1, 10);
        phy.request_uplink_slot(&ResourceGridContext { slot: slot - 1, sector: 0, port: 0 }, Arc::new(ResourceGrid::new(14, 24)));
        phy.request_prach_window(&prach_context(slot - 2), Arc::new(PrachBuffer::new(12, 139)));

        phy.run_slot(slot, 0, &mut Pending::default());
        assert!(rx.symbols.lock().is_empty());
        let names: Vec<_> = errors.events.lock().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["late_grid", "late_prach"]);
    }

    #[test]
    fn test_full_request_queue_is_reported() {
        let (phy, _rx, errors) = wired(1);
        let slot = SlotPoint::new(1, 0);
        phy.request_prach_window(&prach_context(slot), Arc::new(PrachBuffer::new(12, 139)));
        phy.request_prach_window(&prach_context(slot), Arc::new(PrachBuffer::new(12, 139)));

        assert_eq!(errors.events.lock().len(), 1);
        assert_eq!(errors.events.lock()[0].0, "overflow");
        assert_eq!(phy.stats().rejected_requests, 1);
    }

    #[test]
    fn test_timeline_thread_starts_and_stops() {
        let (phy, _rx, _errors) = wired(8);
        let phy = Arc::new(phy);
        phy.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        phy.stop();
        assert!(phy.stats().slots > 0);
    }

    #[test]
    #[should_panic(expected = "Downlink grid pool adapter is not connected")]
    fn test_slot_without_downlink_grids() {
        let phy = SimulatedLowerPhy::new(config(8));
        phy.run_slot(SlotPoint::new(1, 0), 0, &mut Pending::default());
    }
}
