//! PRACH Capture Buffer
//!
//! Frequency-domain samples of one PRACH occasion, plus the flag the
//! radio-facing side raises once the window has been fully captured.

use ndarray::Array2;
use num_complex::Complex32;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// PRACH constants according to 3GPP
pub mod constants {
    /// Long sequence length (for formats 0-3)
    pub const LONG_SEQUENCE_LENGTH: usize = 839;
    /// Short sequence length (for formats A1-C2)
    pub const SHORT_SEQUENCE_LENGTH: usize = 139;
    /// Maximum number of preambles
    pub const MAX_NUM_PREAMBLES: usize = 64;
}

/// PRACH format type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrachFormat {
    /// Format 0: 839 sequence length, 1ms duration
    Format0,
    /// Format 1: 839 sequence length, 2ms duration
    Format1,
    /// Format 2: 839 sequence length, 4ms duration
    Format2,
    /// Format 3: 839 sequence length, 4ms duration
    Format3,
    /// Format A1: 139 sequence length (short)
    FormatA1,
    /// Format A2: 139 sequence length (short)
    FormatA2,
    /// Format A3: 139 sequence length (short)
    FormatA3,
    /// Format B1: 139 sequence length (short)
    FormatB1,
    /// Format B4: 139 sequence length (short)
    FormatB4,
    /// Format C0: 139 sequence length (short)
    FormatC0,
    /// Format C2: 139 sequence length (short)
    FormatC2,
}

impl PrachFormat {
    /// Check if this is a long preamble format
    pub fn is_long(&self) -> bool {
        matches!(self, Self::Format0 | Self::Format1 | Self::Format2 | Self::Format3)
    }

    /// Get sequence length for this format
    pub fn sequence_length(&self) -> usize {
        if self.is_long() {
            constants::LONG_SEQUENCE_LENGTH
        } else {
            constants::SHORT_SEQUENCE_LENGTH
        }
    }

    /// Get number of PRACH symbols
    pub fn num_symbols(&self) -> usize {
        match self {
            Self::Format0 => 1,
            Self::Format1 => 2,
            Self::Format2 => 4,
            Self::Format3 => 4,
            Self::FormatA1 => 2,
            Self::FormatA2 => 4,
            Self::FormatA3 => 6,
            Self::FormatB1 => 2,
            Self::FormatB4 => 12,
            Self::FormatC0 => 1,
            Self::FormatC2 => 4,
        }
    }
}

/// Capture buffer for one PRACH window
#[derive(Debug)]
pub struct PrachBuffer {
    nof_symbols: usize,
    sequence_length: usize,
    /// [symbol, sequence element]
    samples: RwLock<Array2<Complex32>>,
    completed: AtomicBool,
}

impl PrachBuffer {
    /// Allocate a zeroed buffer
    pub fn new(nof_symbols: usize, sequence_length: usize) -> Self {
        Self {
            nof_symbols,
            sequence_length,
            samples: RwLock::new(Array2::zeros((nof_symbols, sequence_length))),
            completed: AtomicBool::new(false),
        }
    }

    /// Number of PRACH symbols the buffer holds
    pub fn nof_symbols(&self) -> usize {
        self.nof_symbols
    }

    /// Number of samples per symbol
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    /// Store the samples of one PRACH symbol
    pub fn write_symbol(&self, symbol: usize, samples: &[Complex32]) {
        assert!(
            symbol < self.nof_symbols,
            "PRACH symbol {} exceeds buffer size {}",
            symbol,
            self.nof_symbols
        );
        assert!(
            samples.len() <= self.sequence_length,
            "PRACH symbol of {} samples does not fit in sequence length {}",
            samples.len(),
            self.sequence_length
        );

        let mut data = self.samples.write();
        let mut row = data.row_mut(symbol);
        for (dst, &src) in row.iter_mut().zip(samples.iter()) {
            *dst = src;
        }
    }

    /// Shared access to all captured samples
    pub fn samples(&self) -> RwLockReadGuard<'_, Array2<Complex32>> {
        self.samples.read()
    }

    /// Mark the capture window as complete
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    /// True once the capture window is complete
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Clear the completion flag before the buffer is handed out again
    pub fn reset(&self) {
        self.completed.store(false, Ordering::Release);
    }
}
