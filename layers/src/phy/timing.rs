//! Slot Timing Distribution
//!
//! Fans the radio timeline's slot boundary events out to every subscriber.

use common::types::SlotPoint;
use interfaces::{LowerPhyTimingContext, LowerPhyTimingNotifier};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{trace, warn};

/// Delivers timing events to subscribers in subscription order
#[derive(Default)]
pub struct TimingDistributor {
    subscribers: RwLock<Vec<Arc<dyn LowerPhyTimingNotifier>>>,
    last_tti_boundary: Mutex<Option<SlotPoint>>,
}

impl TimingDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber; it receives every event emitted from now on
    pub fn subscribe(&self, subscriber: Arc<dyn LowerPhyTimingNotifier>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn nof_subscribers(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Subscribers at the time of the call, without holding the list lock
    fn snapshot(&self) -> Vec<Arc<dyn LowerPhyTimingNotifier>> {
        self.subscribers.read().clone()
    }

    /// Slot of the most recent TTI boundary
    pub fn last_tti_boundary(&self) -> Option<SlotPoint> {
        *self.last_tti_boundary.lock()
    }

    /// Emit the three boundary events of one slot in order
    pub fn run_slot(&self, context: &LowerPhyTimingContext) {
        self.on_tti_boundary(context);
        self.on_ul_half_slot_boundary(context);
        self.on_ul_full_slot_boundary(context);
    }
}

impl LowerPhyTimingNotifier for TimingDistributor {
    fn on_tti_boundary(&self, context: &LowerPhyTimingContext) {
        {
            let mut last = self.last_tti_boundary.lock();
            if let Some(previous) = *last {
                if previous.numerology() == context.slot.numerology() && context.slot - previous != 1 {
                    warn!(
                        slot = %context.slot,
                        previous = %previous,
                        sector = context.sector,
                        "Discontinuous TTI boundary"
                    );
                }
            }
            *last = Some(context.slot);
        }

        trace!(slot = %context.slot, sector = context.sector, "TTI boundary");
        for subscriber in self.snapshot() {
            subscriber.on_tti_boundary(context);
        }
    }

    fn on_ul_half_slot_boundary(&self, context: &LowerPhyTimingContext) {
        for subscriber in self.snapshot() {
            subscriber.on_ul_half_slot_boundary(context);
        }
    }

    fn on_ul_full_slot_boundary(&self, context: &LowerPhyTimingContext) {
        for subscriber in self.snapshot() {
            subscriber.on_ul_full_slot_boundary(context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    struct Recorder {
        id: usize,
        log: Arc<Mutex<Vec<(usize, &'static str, SlotPoint)>>>,
    }

    impl LowerPhyTimingNotifier for Recorder {
        fn on_tti_boundary(&self, context: &LowerPhyTimingContext) {
            self.log.lock().push((self.id, "tti", context.slot));
        }

        fn on_ul_half_slot_boundary(&self, context: &LowerPhyTimingContext) {
            self.log.lock().push((self.id, "half", context.slot));
        }

        fn on_ul_full_slot_boundary(&self, context: &LowerPhyTimingContext) {
            self.log.lock().push((self.id, "full", context.slot));
        }
    }

    fn context(slot: SlotPoint) -> LowerPhyTimingContext {
        LowerPhyTimingContext {
            slot,
            sector: 0,
            time_point: Instant::now(),
            sample_timestamp: 0,
        }
    }

    #[test]
    fn test_fan_out_in_order() {
        let distributor = TimingDistributor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for id in 0..2 {
            distributor.subscribe(Arc::new(Recorder { id, log: log.clone() }));
        }
        assert_eq!(distributor.nof_subscribers(), 2);

        let slot = SlotPoint::new(0, 7);
        distributor.run_slot(&context(slot));

        let log = log.lock();
        assert_eq!(
            *log,
            vec![
                (0, "tti", slot),
                (1, "tti", slot),
                (0, "half", slot),
                (1, "half", slot),
                (0, "full", slot),
                (1, "full", slot),
            ]
        );
    }

    /// Subscribes another recorder from inside its own callback
    struct Subscriber {
        distributor: Arc<TimingDistributor>,
        log: Arc<Mutex<Vec<(usize, &'static str, SlotPoint)>>>,
    }

    impl LowerPhyTimingNotifier for Subscriber {
        fn on_tti_boundary(&self, context: &LowerPhyTimingContext) {
            self.log.lock().push((0, "tti", context.slot));
            self.distributor.subscribe(Arc::new(Recorder {
                id: 1,
                log: self.log.clone(),
            }));
        }

        fn on_ul_half_slot_boundary(&self, _context: &LowerPhyTimingContext) {}

        fn on_ul_full_slot_boundary(&self, _context: &LowerPhyTimingContext) {}
    }

    #[test]
    fn test_subscribe_from_callback() {
        let distributor = Arc::new(TimingDistributor::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        distributor.subscribe(Arc::new(Subscriber {
            distributor: distributor.clone(),
            log: log.clone(),
        }));

        let slot = SlotPoint::new(0, 3);
        distributor.on_tti_boundary(&context(slot));
        assert_eq!(distributor.nof_subscribers(), 2);
        assert_eq!(*log.lock(), vec![(0, "tti", slot)]);

        // The late subscriber sees events from the next one on
        distributor.on_ul_half_slot_boundary(&context(slot));
        assert_eq!(*log.lock(), vec![(0, "tti", slot), (1, "half", slot)]);
    }

    #[test]
    fn test_tracks_last_tti_boundary_across_wrap() {
        let distributor = TimingDistributor::new();
        assert_eq!(distributor.last_tti_boundary(), None);

        let last = SlotPoint::new(0, 10_239);
        distributor.run_slot(&context(last));
        distributor.run_slot(&context(last + 1));
        assert_eq!(distributor.last_tti_boundary(), Some(SlotPoint::new(0, 0)));
    }
}
