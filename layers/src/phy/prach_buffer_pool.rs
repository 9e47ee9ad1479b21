//! PRACH Buffer Pool
//!
//! Fixed set of PRACH capture buffers sized to the maximum number of concurrent
//! PRACH requests. A buffer is idle once every handle to it outside the pool has
//! been dropped; it then returns to circulation without an explicit free call.

use crate::LayerError;
use interfaces::{PrachBuffer, PrachFormat};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// PRACH buffer pool dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrachBufferPoolConfig {
    /// Maximum number of concurrent PRACH requests
    pub nof_buffers: usize,
    /// PRACH symbols per buffer
    pub nof_symbols: usize,
    /// Samples per PRACH symbol
    pub sequence_length: usize,
}

impl PrachBufferPoolConfig {
    /// Buffers large enough for the given preamble format
    pub fn for_format(format: PrachFormat, nof_buffers: usize) -> Self {
        Self {
            nof_buffers,
            nof_symbols: format.num_symbols(),
            sequence_length: format.sequence_length(),
        }
    }
}

/// Pool of reusable PRACH capture buffers
pub struct PrachBufferPool {
    config: PrachBufferPoolConfig,
    buffers: Vec<Arc<PrachBuffer>>,
    /// Next entry to probe
    cursor: Mutex<usize>,
    nof_overflows: AtomicU64,
}

impl PrachBufferPool {
    /// Allocate every buffer of the pool
    pub fn new(config: PrachBufferPoolConfig) -> Result<Self, LayerError> {
        if config.nof_buffers == 0 || config.nof_symbols == 0 || config.sequence_length == 0 {
            return Err(LayerError::ConfigurationError(format!(
                "PRACH buffer pool dimensions must not be zero: {:?}",
                config
            )));
        }

        let buffers = (0..config.nof_buffers)
            .map(|_| Arc::new(PrachBuffer::new(config.nof_symbols, config.sequence_length)))
            .collect();

        debug!(
            nof_buffers = config.nof_buffers,
            nof_symbols = config.nof_symbols,
            sequence_length = config.sequence_length,
            "Created PRACH buffer pool"
        );

        Ok(Self {
            config,
            buffers,
            cursor: Mutex::new(0),
            nof_overflows: AtomicU64::new(0),
        })
    }

    /// Pool configuration
    pub fn config(&self) -> &PrachBufferPoolConfig {
        &self.config
    }

    /// Total number of buffers
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Number of buffers not held by anyone outside the pool
    pub fn nof_available(&self) -> usize {
        self.buffers.iter().filter(|b| Arc::strong_count(b) == 1).count()
    }

    /// Number of requests that found the pool exhausted
    pub fn nof_overflows(&self) -> u64 {
        self.nof_overflows.load(Ordering::Relaxed)
    }

    /// Hand out an idle buffer
    ///
    /// Returns `None` when every buffer is still held by an in-flight request.
    /// The caller reports this as an overflow; it is expected under heavy random
    /// access load.
    pub fn get_prach_buffer(&self) -> Option<Arc<PrachBuffer>> {
        // Handouts are serialised by the cursor lock, so a strong count of one
        // cannot grow between the check and the clone.
        let mut cursor = self.cursor.lock();
        let capacity = self.buffers.len();

        for offset in 0..capacity {
            let index = (*cursor + offset) % capacity;
            let buffer = &self.buffers[index];
            if Arc::strong_count(buffer) == 1 {
                *cursor = (index + 1) % capacity;
                buffer.reset();
                return Some(buffer.clone());
            }
        }

        self.nof_overflows.fetch_add(1, Ordering::Relaxed);
        None
    }
}
