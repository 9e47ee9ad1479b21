//! Protocol Layer Stub
//!
//! Plays the MAC side of the upper PHY interface: schedules an uplink capture
//! for every slot and sector, requests PRACH windows on the configured period,
//! fills downlink grids ahead of transmission and counts what comes back.

use common::types::{SlotPoint, SubcarrierSpacing};
use interfaces::{
    PrachBufferContext, PrachFormat, PrachResults, PucchResults, PuschResults, ResourceGridContext,
    UpperPhyErrorContext, UpperPhyErrorNotifier, UpperPhyRxResultsNotifier, UpperPhyTimingContext,
    UpperPhyTimingNotifier,
};
use layers::phy::UpperPhy;
use num_complex::Complex32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;
use tracing::{debug, info, trace, warn};

/// Slots between filling a downlink grid and its transmission
pub const DL_TX_ADVANCE_SLOTS: i32 = 2;

/// Scheduling parameters of the stub
#[derive(Debug, Clone)]
pub struct ProtocolStubConfig {
    pub scs: SubcarrierSpacing,
    pub nof_sectors: usize,
    pub nof_tx_ports: usize,
    pub prach_format: PrachFormat,
    pub prach_period_slots: u32,
    pub prach_rb_offset: u32,
}

/// Protocol-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    pub slots: u64,
    pub prach_windows: u64,
    pub preambles: u64,
    pub pusch_crc_ok: u64,
    pub pusch_crc_ko: u64,
    pub pucch: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    slots: AtomicU64,
    prach_windows: AtomicU64,
    preambles: AtomicU64,
    pusch_crc_ok: AtomicU64,
    pusch_crc_ko: AtomicU64,
    pucch: AtomicU64,
    errors: AtomicU64,
}

pub struct ProtocolStub {
    config: ProtocolStubConfig,
    upper: Weak<UpperPhy>,
    counters: Counters,
}

impl ProtocolStub {
    pub fn new(config: ProtocolStubConfig, upper: Weak<UpperPhy>) -> Self {
        Self {
            config,
            upper,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> ProtocolStats {
        ProtocolStats {
            slots: self.counters.slots.load(Ordering::Relaxed),
            prach_windows: self.counters.prach_windows.load(Ordering::Relaxed),
            preambles: self.counters.preambles.load(Ordering::Relaxed),
            pusch_crc_ok: self.counters.pusch_crc_ok.load(Ordering::Relaxed),
            pusch_crc_ko: self.counters.pusch_crc_ko.load(Ordering::Relaxed),
            pucch: self.counters.pucch.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn is_prach_occasion(&self, slot: SlotPoint) -> bool {
        slot.to_uint() % self.config.prach_period_slots == 0
    }

    /// Write a reference symbol into every downlink grid of `slot`
    fn fill_downlink(&self, upper: &UpperPhy, slot: SlotPoint) {
        for sector in 0..self.config.nof_sectors {
            for port in 0..self.config.nof_tx_ports {
                let grid = upper.get_downlink_grid(&ResourceGridContext { slot, sector, port });
                let mut writer = grid.writer();
                writer.set_all_zero();
                let pilot = vec![Complex32::new(1.0, 0.0); grid.nof_subcarriers()];
                writer.put_symbol(0, 0, &pilot);
            }
        }
    }
}

impl UpperPhyTimingNotifier for ProtocolStub {
    fn on_tti_boundary(&self, context: &UpperPhyTimingContext) {
        self.counters.slots.fetch_add(1, Ordering::Relaxed);
        let Some(upper) = self.upper.upgrade() else {
            return;
        };

        self.fill_downlink(&upper, context.slot + DL_TX_ADVANCE_SLOTS);

        for sector in 0..self.config.nof_sectors {
            upper.request_uplink_slot(context.slot, sector);

            if self.is_prach_occasion(context.slot) {
                upper.request_prach(&PrachBufferContext {
                    sector,
                    port: 0,
                    slot: context.slot,
                    start_symbol: 0,
                    format: self.config.prach_format,
                    rb_offset: self.config.prach_rb_offset,
                    pusch_scs: self.config.scs,
                });
            }
        }
    }

    fn on_ul_half_slot_boundary(&self, context: &UpperPhyTimingContext) {
        trace!(slot = %context.slot, "UL half slot");
    }

    fn on_ul_full_slot_boundary(&self, context: &UpperPhyTimingContext) {
        trace!(slot = %context.slot, "UL full slot");
    }
}

impl UpperPhyRxResultsNotifier for ProtocolStub {
    fn on_new_prach_results(&self, results: &PrachResults) {
        self.counters.prach_windows.fetch_add(1, Ordering::Relaxed);
        self.counters.preambles.fetch_add(results.preambles.len() as u64, Ordering::Relaxed);
        for preamble in &results.preambles {
            info!(
                slot = %results.context.slot,
                sector = results.context.sector,
                preamble = preamble.preamble_index,
                ta_us = preamble.time_advance_us,
                snr_db = preamble.snr_db,
                "PRACH preamble detected"
            );
        }
    }

    fn on_new_pusch_results(&self, results: &PuschResults) {
        if results.crc_ok {
            self.counters.pusch_crc_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.pusch_crc_ko.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            slot = %results.slot,
            rnti = results.rnti.value(),
            harq_id = results.harq_id,
            crc_ok = results.crc_ok,
            sinr_db = results.sinr_db,
            "PUSCH"
        );
    }

    fn on_new_pucch_results(&self, results: &PucchResults) {
        self.counters.pucch.fetch_add(1, Ordering::Relaxed);
        trace!(slot = %results.slot, rnti = results.rnti.value(), sr = results.sr_detected, "PUCCH");
    }
}

impl UpperPhyErrorNotifier for ProtocolStub {
    fn on_late_resource_grid(&self, context: &UpperPhyErrorContext) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(slot = %context.slot, sector = context.sector, "Uplink slot lost, resource grid late");
    }

    fn on_prach_request_late(&self, context: &UpperPhyErrorContext) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(slot = %context.slot, sector = context.sector, "PRACH window lost, request late");
    }

    fn on_prach_request_overflow(&self, context: &UpperPhyErrorContext) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(slot = %context.slot, sector = context.sector, "PRACH window lost, too many requests");
    }
}
