//! Resource Grid Pool
//!
//! Ring of resource grids allocated once at bring-up and reused slot after slot.
//! An entry is selected purely by index: (slot modulo pool depth, sector,
//! antenna port). Nothing tracks whether an entry is still in use, so the pool
//! depth must exceed the worst-case latency between requesting a grid and
//! consuming it. A request for slot `N + depth` returns the storage of slot `N`
//! with its previous contents untouched.

use crate::LayerError;
use common::types::SlotPoint;
use interfaces::{ResourceGrid, ResourceGridContext};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resource grid pool dimensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGridPoolConfig {
    /// Number of slots kept in the ring
    pub nof_slots_in_pool: usize,
    /// Number of sectors
    pub nof_sectors: usize,
    /// Number of antenna ports per sector
    pub nof_antenna_ports: usize,
    /// OFDM symbols per grid
    pub nof_symbols: usize,
    /// Subcarriers per grid
    pub nof_subcarriers: usize,
    /// Track requests that reach further into the past than the pool depth
    #[serde(default)]
    pub check_reuse: bool,
}

impl ResourceGridPoolConfig {
    fn validate(&self) -> Result<(), LayerError> {
        let dimensions = [
            ("nof_slots_in_pool", self.nof_slots_in_pool),
            ("nof_sectors", self.nof_sectors),
            ("nof_antenna_ports", self.nof_antenna_ports),
            ("nof_symbols", self.nof_symbols),
            ("nof_subcarriers", self.nof_subcarriers),
        ];
        for (name, value) in dimensions {
            if value == 0 {
                return Err(LayerError::ConfigurationError(format!(
                    "resource grid pool dimension {} must not be zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Marks an entry that was never handed out
const NEVER_REQUESTED: u64 = u64::MAX;

fn pack_slot(slot: SlotPoint) -> u64 {
    ((slot.numerology() as u64) << 32) | slot.to_uint() as u64
}

fn unpack_slot(packed: u64) -> SlotPoint {
    SlotPoint::new((packed >> 32) as u8, packed as u32)
}

/// Pre-allocated ring of resource grids
pub struct ResourceGridPool {
    config: ResourceGridPoolConfig,
    grids: Vec<Arc<ResourceGrid>>,
    /// Newest slot each entry was handed out for; only filled when `check_reuse` is set
    last_requested: Vec<AtomicU64>,
    nof_stale_requests: AtomicU64,
}

impl ResourceGridPool {
    /// Allocate every grid of the pool
    pub fn new(config: ResourceGridPoolConfig) -> Result<Self, LayerError> {
        config.validate()?;

        let nof_grids = config.nof_slots_in_pool * config.nof_sectors * config.nof_antenna_ports;
        let grids = (0..nof_grids)
            .map(|_| Arc::new(ResourceGrid::new(config.nof_symbols, config.nof_subcarriers)))
            .collect();
        let last_requested = if config.check_reuse {
            (0..nof_grids).map(|_| AtomicU64::new(NEVER_REQUESTED)).collect()
        } else {
            Vec::new()
        };

        debug!(
            nof_grids,
            nof_slots = config.nof_slots_in_pool,
            nof_sectors = config.nof_sectors,
            nof_ports = config.nof_antenna_ports,
            "Created resource grid pool"
        );

        Ok(Self {
            config,
            grids,
            last_requested,
            nof_stale_requests: AtomicU64::new(0),
        })
    }

    /// Pool configuration
    pub fn config(&self) -> &ResourceGridPoolConfig {
        &self.config
    }

    /// Total number of grids
    pub fn nof_grids(&self) -> usize {
        self.grids.len()
    }

    /// Requests that reached further into the past than the pool depth
    ///
    /// Always zero unless `check_reuse` is enabled.
    pub fn nof_stale_requests(&self) -> u64 {
        self.nof_stale_requests.load(Ordering::Relaxed)
    }

    fn index(&self, context: &ResourceGridContext) -> usize {
        assert!(
            context.sector < self.config.nof_sectors,
            "Sector {} exceeds the number of sectors {}",
            context.sector,
            self.config.nof_sectors
        );
        assert!(
            context.port < self.config.nof_antenna_ports,
            "Antenna port {} exceeds the number of ports {}",
            context.port,
            self.config.nof_antenna_ports
        );

        let ring_index = context.slot.to_uint() as usize % self.config.nof_slots_in_pool;
        (ring_index * self.config.nof_sectors + context.sector) * self.config.nof_antenna_ports + context.port
    }

    /// Get the grid for a slot, sector and port
    pub fn get_resource_grid(&self, context: &ResourceGridContext) -> Arc<ResourceGrid> {
        let index = self.index(context);
        if self.config.check_reuse {
            self.track_request(index, context);
        }
        self.grids[index].clone()
    }

    fn track_request(&self, index: usize, context: &ResourceGridContext) {
        let entry = &self.last_requested[index];
        let previous = entry.load(Ordering::Acquire);
        if previous != NEVER_REQUESTED {
            let previous_slot = unpack_slot(previous);
            if previous_slot.numerology() == context.slot.numerology() && context.slot < previous_slot {
                self.nof_stale_requests.fetch_add(1, Ordering::Relaxed);
                warn!(
                    slot = %context.slot,
                    newest = %previous_slot,
                    sector = context.sector,
                    port = context.port,
                    depth = self.config.nof_slots_in_pool,
                    "Resource grid requested for a slot older than the pool depth allows"
                );
                return;
            }
        }
        entry.store(pack_slot(context.slot), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex32;

    fn config(depth: usize, sectors: usize, ports: usize) -> ResourceGridPoolConfig {
        ResourceGridPoolConfig {
            nof_slots_in_pool: depth,
            nof_sectors: sectors,
            nof_antenna_ports: ports,
            nof_symbols: 14,
            nof_subcarriers: 24,
            check_reuse: false,
        }
    }

    fn context(slot: u32, sector: usize, port: usize) -> ResourceGridContext {
        ResourceGridContext {
            slot: SlotPoint::new(0, slot),
            sector,
            port,
        }
    }

    #[test]
    fn test_zero_dimension_is_rejected() {
        let mut cfg = config(4, 1, 1);
        cfg.nof_subcarriers = 0;
        assert!(matches!(ResourceGridPool::new(cfg), Err(LayerError::ConfigurationError(_))));

        let mut cfg = config(4, 1, 1);
        cfg.nof_slots_in_pool = 0;
        assert!(ResourceGridPool::new(cfg).is_err());
    }

    #[test]
    fn test_same_context_returns_same_grid() {
        let pool = ResourceGridPool::new(config(4, 2, 2)).unwrap();
        assert_eq!(pool.nof_grids(), 16);

        let a = pool.get_resource_grid(&context(5, 1, 1));
        let b = pool.get_resource_grid(&context(5, 1, 1));
        assert!(Arc::ptr_eq(&a, &b));

        a.put(2, 3, Complex32::new(0.25, 0.75));
        assert_eq!(b.get(2, 3), Complex32::new(0.25, 0.75));
    }

    #[test]
    fn test_distinct_sectors_and_ports_do_not_alias() {
        let pool = ResourceGridPool::new(config(2, 2, 2)).unwrap();
        let mut grids = Vec::new();
        for slot in 0..2 {
            for sector in 0..2 {
                for port in 0..2 {
                    grids.push(pool.get_resource_grid(&context(slot, sector, port)));
                }
            }
        }
        for i in 0..grids.len() {
            for j in (i + 1)..grids.len() {
                assert!(!Arc::ptr_eq(&grids[i], &grids[j]));
            }
        }
    }

    #[test]
    fn test_ring_reuse_keeps_previous_contents() {
        let depth = 4;
        let pool = ResourceGridPool::new(config(depth, 1, 1)).unwrap();

        let grids: Vec<_> = (0..depth as u32).map(|slot| pool.get_resource_grid(&context(slot, 0, 0))).collect();
        grids[0].put(0, 0, Complex32::new(1.0, 0.0));
        grids[0].put(5, 9, Complex32::new(-1.0, 2.0));

        let wrapped = pool.get_resource_grid(&context(depth as u32, 0, 0));
        assert!(Arc::ptr_eq(&wrapped, &grids[0]));
        assert_eq!(wrapped.get(0, 0), Complex32::new(1.0, 0.0));
        assert_eq!(wrapped.get(5, 9), Complex32::new(-1.0, 2.0));

        wrapped.put(0, 0, Complex32::new(3.0, 0.0));
        assert_eq!(grids[0].get(0, 0), Complex32::new(3.0, 0.0));
    }

    #[test]
    fn test_slot_wrap_maps_into_ring() {
        let pool = ResourceGridPool::new(config(3, 1, 1)).unwrap();
        let last = SlotPoint::new(0, 10_239);
        let grid = pool.get_resource_grid(&ResourceGridContext { slot: last, sector: 0, port: 0 });
        let same = pool.get_resource_grid(&context(10_239 % 3, 0, 0));
        assert!(Arc::ptr_eq(&grid, &same));
    }

    #[test]
    #[should_panic(expected = "Sector 2 exceeds")]
    fn test_sector_out_of_range() {
        let pool = ResourceGridPool::new(config(4, 2, 1)).unwrap();
        let _ = pool.get_resource_grid(&context(0, 2, 0));
    }

    #[test]
    #[should_panic(expected = "Antenna port 1 exceeds")]
    fn test_port_out_of_range() {
        let pool = ResourceGridPool::new(config(4, 1, 1)).unwrap();
        let _ = pool.get_resource_grid(&context(0, 0, 1));
    }

    #[test]
    fn test_reuse_check_counts_stale_requests() {
        let mut cfg = config(2, 1, 1);
        cfg.check_reuse = true;
        let pool = ResourceGridPool::new(cfg).unwrap();

        let _ = pool.get_resource_grid(&context(10, 0, 0));
        let _ = pool.get_resource_grid(&context(12, 0, 0));
        assert_eq!(pool.nof_stale_requests(), 0);

        // Slot 8 maps onto the entry already handed out for slot 12
        let stale = pool.get_resource_grid(&context(8, 0, 0));
        let current = pool.get_resource_grid(&context(12, 0, 0));
        assert!(Arc::ptr_eq(&stale, &current));
        assert_eq!(pool.nof_stale_requests(), 1);
    }

    #[test]
    fn test_reuse_check_disabled_by_default() {
        let pool = ResourceGridPool::new(config(2, 1, 1)).unwrap();
        let _ = pool.get_resource_grid(&context(12, 0, 0));
        let _ = pool.get_resource_grid(&context(8, 0, 0));
        assert_eq!(pool.nof_stale_requests(), 0);
    }
}
