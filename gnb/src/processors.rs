//! Uplink Channel Processors
//!
//! Minimal detectors plugged into the upper PHY: a Zadoff-Chu correlation PRACH
//! detector and a power-based uplink slot processor standing in for the PUSCH
//! and PUCCH decoders.

use common::types::{Rnti, SlotPoint};
use interfaces::prach_buffer::constants::MAX_NUM_PREAMBLES;
use interfaces::{
    LowerPhyRxSymbolContext, PrachBuffer, PrachBufferContext, PrachPreamble, PucchResults, PuschResults,
    ResourceGrid,
};
use layers::phy::{PrachDetector, SoftbufferIdentifier, SoftbufferPool, UplinkSlotProcessor, UplinkSlotResults};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::{debug, trace};

/// Zadoff-Chu sequence
/// x_u(n) = exp(-j * pi * u * n * (n + 1) / N_zc)
pub fn generate_zc_sequence(root: u16, length: usize) -> Vec<Complex32> {
    let n_zc = length as f32;
    let u = root as f32;
    (0..length)
        .map(|n| {
            let n_f = n as f32;
            let phase = -std::f32::consts::PI * u * n_f * (n_f + 1.0) / n_zc;
            Complex32::from_polar(1.0, phase)
        })
        .collect()
}

/// Root sequence index mapped into the valid range 1..N_zc
pub fn zc_root(root_sequence_index: u16, length: usize) -> u16 {
    (root_sequence_index as usize % (length - 1) + 1) as u16
}

/// Cyclic shift between consecutive preambles of one root
pub fn cyclic_shift(length: usize) -> usize {
    (length / MAX_NUM_PREAMBLES).max(1)
}

/// Frequency-domain preamble for `preamble_index`
pub fn generate_preamble(root: u16, length: usize, preamble_index: usize) -> Vec<Complex32> {
    let shift = (preamble_index * cyclic_shift(length)) as f32;
    generate_zc_sequence(root, length)
        .into_iter()
        .enumerate()
        .map(|(k, x)| x * Complex32::from_polar(1.0, 2.0 * std::f32::consts::PI * k as f32 * shift / length as f32))
        .collect()
}

struct RootCorrelator {
    root_sequence: Vec<Complex32>,
    fft: Arc<dyn Fft<f32>>,
}

/// Single-root PRACH detector
pub struct ZcPrachDetector {
    long: RootCorrelator,
    short: RootCorrelator,
    threshold: f32,
}

impl ZcPrachDetector {
    pub fn new(root_sequence_index: u16, threshold: f32) -> Self {
        let mut planner = FftPlanner::new();
        let correlator = |length: usize, planner: &mut FftPlanner<f32>| RootCorrelator {
            root_sequence: generate_zc_sequence(zc_root(root_sequence_index, length), length),
            fft: planner.plan_fft_forward(length),
        };
        Self {
            long: correlator(interfaces::prach_buffer::constants::LONG_SEQUENCE_LENGTH, &mut planner),
            short: correlator(interfaces::prach_buffer::constants::SHORT_SEQUENCE_LENGTH, &mut planner),
            threshold,
        }
    }

    /// Correlation power summed over all symbols, normalised to the received energy
    fn correlate(&self, correlator: &RootCorrelator, buffer: &PrachBuffer) -> Vec<f32> {
        let length = correlator.root_sequence.len();
        let samples = buffer.samples();
        let mut power = vec![0.0f32; length];
        let mut energy = 0.0f32;
        let mut scratch = vec![Complex32::new(0.0, 0.0); length];

        for row in samples.rows() {
            for ((dst, &y), &x) in scratch.iter_mut().zip(row.iter()).zip(correlator.root_sequence.iter()) {
                *dst = y * x.conj();
                energy += y.norm_sqr();
            }
            correlator.fft.process(&mut scratch);
            for (p, c) in power.iter_mut().zip(scratch.iter()) {
                *p += c.norm_sqr();
            }
        }

        if energy > 0.0 {
            let norm = 1.0 / (length as f32 * energy);
            power.iter_mut().for_each(|p| *p *= norm);
        }
        power
    }
}

impl PrachDetector for ZcPrachDetector {
    fn detect(&self, context: &PrachBufferContext, buffer: &PrachBuffer) -> Vec<PrachPreamble> {
        let correlator = if context.format.is_long() { &self.long } else { &self.short };
        let length = correlator.root_sequence.len();
        if buffer.sequence_length() != length {
            debug!(
                slot = %context.slot,
                buffer_length = buffer.sequence_length(),
                length,
                "PRACH buffer does not match the preamble format"
            );
            return Vec::new();
        }

        let power = self.correlate(correlator, buffer);
        let noise = power.iter().sum::<f32>() / length as f32;
        let shift = cyclic_shift(length);
        let nof_preambles = (length / shift).min(MAX_NUM_PREAMBLES);

        // PRACH subcarrier spacing in kHz
        let prach_scs_khz = if context.format.is_long() {
            1.25
        } else {
            context.pusch_scs.to_khz() as f32
        };

        let mut preambles = Vec::new();
        for index in 0..nof_preambles {
            let window = &power[index * shift..(index + 1) * shift];
            let Some((offset, &peak)) = window.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1)) else {
                continue;
            };
            if peak < self.threshold {
                continue;
            }

            let snr = if noise > 0.0 { peak / noise } else { f32::INFINITY };
            preambles.push(PrachPreamble {
                preamble_index: index as u8,
                time_advance_us: offset as f32 * 1e3 / (length as f32 * prach_scs_khz),
                power_db: 10.0 * peak.log10(),
                snr_db: 10.0 * snr.log10(),
            });
        }

        trace!(slot = %context.slot, nof_preambles = preambles.len(), "PRACH detection");
        preambles
    }
}

/// Stand-in PUSCH/PUCCH decoder for one simulated UE
///
/// Reports a PUCCH scheduling request on every slot with receive energy and a
/// PUSCH transmission whose CRC depends on the measured SINR. HARQ state lives
/// in the softbuffer pool like a real decoder's would.
pub struct PowerSlotProcessor {
    rnti: Rnti,
    nof_harq_processes: u8,
    min_sinr_db: f32,
}

impl PowerSlotProcessor {
    pub fn new(rnti: Rnti, nof_harq_processes: u8, min_sinr_db: f32) -> Self {
        Self {
            rnti,
            nof_harq_processes: nof_harq_processes.max(1),
            min_sinr_db,
        }
    }

    fn harq_id(&self, slot: SlotPoint) -> u8 {
        (slot.to_uint() % self.nof_harq_processes as u32) as u8
    }
}

impl UplinkSlotProcessor for PowerSlotProcessor {
    fn process_slot(
        &self,
        context: &LowerPhyRxSymbolContext,
        grid: &ResourceGrid,
        softbuffers: &SoftbufferPool,
    ) -> UplinkSlotResults {
        // The simulated UE only transmits on the first port
        if context.port != 0 {
            return UplinkSlotResults::default();
        }

        let reader = grid.reader();
        let powers: Vec<f32> = (0..context.nof_symbols).map(|symbol| reader.symbol_power(symbol)).collect();
        drop(reader);

        let Some(noise) = powers.iter().copied().reduce(f32::min) else {
            return UplinkSlotResults::default();
        };
        let signal = powers.iter().sum::<f32>() / powers.len() as f32;
        if signal <= 0.0 {
            return UplinkSlotResults::default();
        }
        let sinr_db = if noise > 0.0 { 10.0 * (signal / noise).log10() } else { f32::INFINITY };

        let harq_id = self.harq_id(context.slot);
        let identifier = SoftbufferIdentifier {
            rnti: self.rnti,
            harq_ack_id: harq_id,
        };
        let softbuffer = softbuffers.reserve(context.slot, identifier, 1, true);
        let crc_ok = softbuffer.is_valid() && sinr_db >= self.min_sinr_db;
        if softbuffer.is_valid() {
            softbuffer.data().set_codeblock_crc(0, crc_ok);
        }

        UplinkSlotResults {
            pusch: vec![PuschResults {
                slot: context.slot,
                sector: context.sector,
                rnti: self.rnti,
                harq_id,
                crc_ok,
                sinr_db,
            }],
            pucch: vec![PucchResults {
                slot: context.slot,
                sector: context.sector,
                rnti: self.rnti,
                sr_detected: true,
                harq_ack: Vec::new(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::SubcarrierSpacing;
    use interfaces::PrachFormat;
    use layers::phy::SoftbufferPoolConfig;

    fn prach_context(format: PrachFormat) -> PrachBufferContext {
        PrachBufferContext {
            sector: 0,
            port: 0,
            slot: SlotPoint::new(1, 0),
            start_symbol: 0,
            format,
            rb_offset: 0,
            pusch_scs: SubcarrierSpacing::Scs30,
        }
    }

    #[test]
    fn test_zc_sequence_generation() {
        let seq = generate_zc_sequence(1, 839);
        assert_eq!(seq.len(), 839);
        for c in &seq {
            assert!((c.norm() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_detects_injected_preamble() {
        let detector = ZcPrachDetector::new(1, 0.3);
        for (format, index) in [(PrachFormat::FormatB4, 5usize), (PrachFormat::Format0, 42)] {
            let length = format.sequence_length();
            let buffer = PrachBuffer::new(format.num_symbols(), length);
            let preamble = generate_preamble(zc_root(1, length), length, index);
            for symbol in 0..format.num_symbols() {
                buffer.write_symbol(symbol, &preamble);
            }

            let detected = detector.detect(&prach_context(format), &buffer);
            assert_eq!(detected.len(), 1, "format {:?}", format);
            assert_eq!(detected[0].preamble_index as usize, index);
            assert!(detected[0].time_advance_us.abs() < 1e-3);
        }
    }

    #[test]
    fn test_empty_window_has_no_preambles() {
        let detector = ZcPrachDetector::new(1, 0.3);
        let buffer = PrachBuffer::new(1, 839);
        assert!(detector.detect(&prach_context(PrachFormat::Format0), &buffer).is_empty());

        let mismatched = PrachBuffer::new(1, 139);
        assert!(detector.detect(&prach_context(PrachFormat::Format0), &mismatched).is_empty());
    }

    #[test]
    fn test_slot_processor_reports_harq_process() {
        let processor = PowerSlotProcessor::new(Rnti(0x4601), 8, 3.0);
        let softbuffers = SoftbufferPool::new(SoftbufferPoolConfig::default()).unwrap();
        let grid = ResourceGrid::new(14, 12);
        for symbol in 0..14 {
            let amplitude = if symbol == 0 { 0.1 } else { 1.0 };
            grid.put(symbol, 0, Complex32::new(amplitude, 0.0));
        }
        let context = LowerPhyRxSymbolContext {
            slot: SlotPoint::new(1, 13),
            sector: 0,
            port: 0,
            nof_symbols: 14,
        };

        let results = processor.process_slot(&context, &grid, &softbuffers);
        assert_eq!(results.pusch.len(), 1);
        assert_eq!(results.pusch[0].harq_id, 5);
        assert!(results.pusch[0].crc_ok);
        assert!(results.pucch[0].sr_detected);
        assert_eq!(softbuffers.nof_reserved(), 1);

        let other_port = LowerPhyRxSymbolContext { port: 1, ..context };
        assert_eq!(processor.process_slot(&other_port, &grid, &softbuffers), UplinkSlotResults::default());
    }
}
