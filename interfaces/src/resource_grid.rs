//! Resource Grid Buffer
//!
//! Symbol-by-subcarrier complex sample buffer for one antenna port of one slot.
//! Grids are owned by a pool and overwritten slot after slot; they are never
//! freed individually.

use ndarray::{Array2, ArrayView1};
use num_complex::Complex32;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Resource grid for one slot and one antenna port
///
/// Readers and writers are handed out independently. The grid does not order
/// them: the caller guarantees that a slot is fully written before it is read.
#[derive(Debug)]
pub struct ResourceGrid {
    nof_symbols: usize,
    nof_subcarriers: usize,
    /// [symbol, subcarrier]
    data: RwLock<Array2<Complex32>>,
}

impl ResourceGrid {
    /// Allocate a zeroed grid
    pub fn new(nof_symbols: usize, nof_subcarriers: usize) -> Self {
        Self {
            nof_symbols,
            nof_subcarriers,
            data: RwLock::new(Array2::zeros((nof_symbols, nof_subcarriers))),
        }
    }

    /// Number of OFDM symbols
    pub fn nof_symbols(&self) -> usize {
        self.nof_symbols
    }

    /// Number of subcarriers
    pub fn nof_subcarriers(&self) -> usize {
        self.nof_subcarriers
    }

    /// Shared read access
    pub fn reader(&self) -> ResourceGridReader<'_> {
        ResourceGridReader {
            data: self.data.read(),
        }
    }

    /// Exclusive write access
    pub fn writer(&self) -> ResourceGridWriter<'_> {
        ResourceGridWriter {
            data: self.data.write(),
        }
    }

    /// Write a single resource element
    pub fn put(&self, symbol: usize, subcarrier: usize, value: Complex32) {
        self.writer().put(symbol, subcarrier, value);
    }

    /// Read a single resource element
    pub fn get(&self, symbol: usize, subcarrier: usize) -> Complex32 {
        self.reader().get(symbol, subcarrier)
    }

    /// Zero the whole grid
    pub fn set_all_zero(&self) {
        self.writer().set_all_zero();
    }

    /// True if every resource element is zero
    pub fn is_empty(&self) -> bool {
        self.reader().is_empty()
    }
}

fn check_bounds(data: &Array2<Complex32>, symbol: usize, subcarrier: usize) {
    let (nof_symbols, nof_subcarriers) = data.dim();
    assert!(
        symbol < nof_symbols,
        "Symbol index {} exceeds the number of symbols {}",
        symbol,
        nof_symbols
    );
    assert!(
        subcarrier < nof_subcarriers,
        "Subcarrier index {} exceeds the number of subcarriers {}",
        subcarrier,
        nof_subcarriers
    );
}

/// Read capability over a resource grid
pub struct ResourceGridReader<'a> {
    data: RwLockReadGuard<'a, Array2<Complex32>>,
}

impl ResourceGridReader<'_> {
    /// Read a single resource element
    pub fn get(&self, symbol: usize, subcarrier: usize) -> Complex32 {
        check_bounds(&self.data, symbol, subcarrier);
        self.data[(symbol, subcarrier)]
    }

    /// View of all subcarriers of one symbol
    pub fn symbol(&self, symbol: usize) -> ArrayView1<'_, Complex32> {
        check_bounds(&self.data, symbol, 0);
        self.data.row(symbol)
    }

    /// Average power of one symbol
    pub fn symbol_power(&self, symbol: usize) -> f32 {
        let row = self.symbol(symbol);
        if row.is_empty() {
            return 0.0;
        }
        row.iter().map(|re| re.norm_sqr()).sum::<f32>() / row.len() as f32
    }

    /// True if every resource element is zero
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|re| re.re == 0.0 && re.im == 0.0)
    }
}

/// Write capability over a resource grid
pub struct ResourceGridWriter<'a> {
    data: RwLockWriteGuard<'a, Array2<Complex32>>,
}

impl ResourceGridWriter<'_> {
    /// Write a single resource element
    pub fn put(&mut self, symbol: usize, subcarrier: usize, value: Complex32) {
        check_bounds(&self.data, symbol, subcarrier);
        self.data[(symbol, subcarrier)] = value;
    }

    /// Write consecutive subcarriers of one symbol starting at `start_subcarrier`
    pub fn put_symbol(&mut self, symbol: usize, start_subcarrier: usize, values: &[Complex32]) {
        if values.is_empty() {
            return;
        }
        check_bounds(&self.data, symbol, start_subcarrier + values.len() - 1);
        let mut row = self.data.row_mut(symbol);
        for (i, &value) in values.iter().enumerate() {
            row[start_subcarrier + i] = value;
        }
    }

    /// Zero the whole grid
    pub fn set_all_zero(&mut self) {
        self.data.fill(Complex32::new(0.0, 0.0));
    }
}
