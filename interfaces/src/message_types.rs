//! Message Types for Lower/Upper PHY Communication
//!
//! Contexts that identify buffers and events, and the uplink results reported
//! to the protocol layer. Lower-PHY contexts carry radio timing details; the
//! upper-PHY ones only carry what the protocol layer needs.

use crate::prach_buffer::PrachFormat;
use common::types::{Rnti, SlotPoint, SubcarrierSpacing};
use std::time::Instant;

/// Identifies one resource grid instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceGridContext {
    /// Slot the grid belongs to
    pub slot: SlotPoint,
    /// Sector identifier
    pub sector: usize,
    /// Antenna port
    pub port: usize,
}

/// Identifies one PRACH capture window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrachBufferContext {
    /// Sector identifier
    pub sector: usize,
    /// Receive port
    pub port: usize,
    /// Slot in which the PRACH occasion starts
    pub slot: SlotPoint,
    /// First OFDM symbol of the occasion within the slot
    pub start_symbol: usize,
    /// Preamble format
    pub format: PrachFormat,
    /// Frequency offset of the occasion in resource blocks
    pub rb_offset: u32,
    /// Subcarrier spacing of the uplink data channel
    pub pusch_scs: SubcarrierSpacing,
}

/// Timing event as seen by the radio-facing layer
#[derive(Debug, Clone, Copy)]
pub struct LowerPhyTimingContext {
    /// Slot the event refers to
    pub slot: SlotPoint,
    /// Sector that produced the event
    pub sector: usize,
    /// Wall-clock instant of the boundary
    pub time_point: Instant,
    /// Baseband sample count at the boundary
    pub sample_timestamp: u64,
}

/// Timing event as seen by the protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpperPhyTimingContext {
    /// Slot the event refers to
    pub slot: SlotPoint,
}

impl From<&LowerPhyTimingContext> for UpperPhyTimingContext {
    fn from(context: &LowerPhyTimingContext) -> Self {
        Self { slot: context.slot }
    }
}

/// Progress of an uplink slot capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowerPhyRxSymbolContext {
    /// Slot being captured
    pub slot: SlotPoint,
    /// Sector identifier
    pub sector: usize,
    /// Receive port
    pub port: usize,
    /// Number of symbols already written into the grid
    pub nof_symbols: usize,
}

/// Runtime error context reported to the protocol layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpperPhyErrorContext {
    /// Slot the failed request targeted
    pub slot: SlotPoint,
    /// Sector identifier
    pub sector: usize,
}

impl From<&ResourceGridContext> for UpperPhyErrorContext {
    fn from(context: &ResourceGridContext) -> Self {
        Self {
            slot: context.slot,
            sector: context.sector,
        }
    }
}

impl From<&PrachBufferContext> for UpperPhyErrorContext {
    fn from(context: &PrachBufferContext) -> Self {
        Self {
            slot: context.slot,
            sector: context.sector,
        }
    }
}

/// Detected PRACH preamble
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrachPreamble {
    /// Preamble index (0-63)
    pub preamble_index: u8,
    /// Estimated timing advance in microseconds
    pub time_advance_us: f32,
    /// Detection metric in dB
    pub power_db: f32,
    /// Estimated SNR in dB
    pub snr_db: f32,
}

/// Result of processing one PRACH window
#[derive(Debug, Clone, PartialEq)]
pub struct PrachResults {
    /// Window the results belong to
    pub context: PrachBufferContext,
    /// Detected preambles, possibly empty
    pub preambles: Vec<PrachPreamble>,
}

/// Result of decoding one PUSCH transmission
#[derive(Debug, Clone, PartialEq)]
pub struct PuschResults {
    pub slot: SlotPoint,
    pub sector: usize,
    pub rnti: Rnti,
    /// HARQ process
    pub harq_id: u8,
    /// Transport block CRC
    pub crc_ok: bool,
    pub sinr_db: f32,
}

/// Result of decoding one PUCCH transmission
#[derive(Debug, Clone, PartialEq)]
pub struct PucchResults {
    pub slot: SlotPoint,
    pub sector: usize,
    pub rnti: Rnti,
    /// Scheduling request detected
    pub sr_detected: bool,
    /// HARQ-ACK bits
    pub harq_ack: Vec<bool>,
}
