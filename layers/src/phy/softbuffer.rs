//! HARQ Softbuffers
//!
//! A softbuffer keeps the soft bits of every codeblock of one HARQ process so
//! retransmissions can be combined with earlier attempts. Access is exclusive:
//! a [`UniqueSoftbuffer`] locks the buffer for its whole lifetime and unlocks
//! it when released or dropped.

use common::types::{Rnti, SlotPoint};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Soft bits and decoding state of one HARQ process
#[derive(Debug)]
pub struct SoftbufferData {
    codeblocks: Vec<Vec<i8>>,
    crc: Vec<bool>,
    nof_codeblocks: usize,
}

impl SoftbufferData {
    /// Number of codeblocks in the current transport block
    pub fn nof_codeblocks(&self) -> usize {
        self.nof_codeblocks
    }

    /// Soft bits of a codeblock
    pub fn codeblock(&self, index: usize) -> &[i8] {
        assert!(
            index < self.nof_codeblocks,
            "Codeblock {} exceeds the number of codeblocks {}",
            index,
            self.nof_codeblocks
        );
        &self.codeblocks[index]
    }

    /// Mutable soft bits of a codeblock
    pub fn codeblock_mut(&mut self, index: usize) -> &mut [i8] {
        assert!(
            index < self.nof_codeblocks,
            "Codeblock {} exceeds the number of codeblocks {}",
            index,
            self.nof_codeblocks
        );
        &mut self.codeblocks[index]
    }

    /// CRC status of every codeblock
    pub fn codeblocks_crc(&self) -> &[bool] {
        &self.crc[..self.nof_codeblocks]
    }

    pub fn set_codeblock_crc(&mut self, index: usize, ok: bool) {
        assert!(index < self.nof_codeblocks, "Codeblock {} exceeds the number of codeblocks", index);
        self.crc[index] = ok;
    }

    fn set_nof_codeblocks(&mut self, nof_codeblocks: usize) {
        assert!(
            nof_codeblocks <= self.codeblocks.len(),
            "{} codeblocks exceed the softbuffer capacity of {}",
            nof_codeblocks,
            self.codeblocks.len()
        );
        self.nof_codeblocks = nof_codeblocks;
    }

    fn reset_codeblocks_crc(&mut self) {
        self.crc.iter_mut().for_each(|crc| *crc = false);
        self.codeblocks.iter_mut().for_each(|cb| cb.fill(0));
    }
}

/// Lockable soft-decision storage of one HARQ process
#[derive(Debug)]
pub struct Softbuffer {
    locked: AtomicBool,
    data: Mutex<SoftbufferData>,
}

impl Softbuffer {
    pub fn new(max_nof_codeblocks: usize, max_codeblock_size: usize) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: Mutex::new(SoftbufferData {
                codeblocks: vec![vec![0; max_codeblock_size]; max_nof_codeblocks],
                crc: vec![false; max_nof_codeblocks],
                nof_codeblocks: 0,
            }),
        }
    }

    /// Whether an accessor currently holds the softbuffer
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn lock(&self) {
        let was_locked = self.locked.swap(true, Ordering::AcqRel);
        assert!(!was_locked, "Softbuffer is already locked");
    }

    fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    fn data(&self) -> MutexGuard<'_, SoftbufferData> {
        self.data.lock()
    }
}

/// Exclusive handle to a locked softbuffer
///
/// Either empty or bound to a softbuffer it has locked. Moving the handle moves
/// the lock; `std::mem::take` leaves an empty handle behind.
#[derive(Debug, Default)]
pub struct UniqueSoftbuffer {
    softbuffer: Option<Arc<Softbuffer>>,
}

impl UniqueSoftbuffer {
    /// Lock `softbuffer` and bind to it
    ///
    /// Panics if the softbuffer is already locked by another accessor.
    pub fn new(softbuffer: Arc<Softbuffer>) -> Self {
        softbuffer.lock();
        Self {
            softbuffer: Some(softbuffer),
        }
    }

    /// Whether the handle is bound to a softbuffer
    pub fn is_valid(&self) -> bool {
        self.softbuffer.is_some()
    }

    /// Bound softbuffer
    pub fn get(&self) -> &Softbuffer {
        match &self.softbuffer {
            Some(softbuffer) => softbuffer,
            None => panic!("Invalid softbuffer accessor"),
        }
    }

    /// Lock the soft-decision data for reading or combining
    pub fn data(&self) -> MutexGuard<'_, SoftbufferData> {
        self.get().data()
    }

    /// Unlock the softbuffer and leave the handle empty
    pub fn release(&mut self) {
        if let Some(softbuffer) = self.softbuffer.take() {
            softbuffer.unlock();
        }
    }
}

impl Deref for UniqueSoftbuffer {
    type Target = Softbuffer;

    fn deref(&self) -> &Softbuffer {
        self.get()
    }
}

impl Drop for UniqueSoftbuffer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Softbuffer pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftbufferPoolConfig {
    /// Number of HARQ processes that can hold a softbuffer at once
    pub max_softbuffers: usize,
    /// Codeblocks per softbuffer
    pub max_nof_codeblocks: usize,
    /// Soft bits per codeblock
    pub max_codeblock_size: usize,
    /// Slots a reservation survives without being renewed
    pub expire_timeout_slots: u32,
}

impl Default for SoftbufferPoolConfig {
    fn default() -> Self {
        Self {
            max_softbuffers: 64,
            max_nof_codeblocks: 8,
            max_codeblock_size: 3 * 8448,
            expire_timeout_slots: 100,
        }
    }
}

/// HARQ process a softbuffer is reserved for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoftbufferIdentifier {
    pub rnti: Rnti,
    pub harq_ack_id: u8,
}

#[derive(Debug)]
struct Reservation {
    identifier: SoftbufferIdentifier,
    expires_at: SlotPoint,
}

struct PoolEntry {
    softbuffer: Arc<Softbuffer>,
    reservation: Option<Reservation>,
}

/// Maps HARQ processes one-to-one onto a fixed set of softbuffers
pub struct SoftbufferPool {
    config: SoftbufferPoolConfig,
    entries: Mutex<Vec<PoolEntry>>,
}

impl SoftbufferPool {
    pub fn new(config: SoftbufferPoolConfig) -> Result<Self, crate::LayerError> {
        if config.max_softbuffers == 0 || config.max_nof_codeblocks == 0 || config.max_codeblock_size == 0 {
            return Err(crate::LayerError::ConfigurationError(format!(
                "softbuffer pool dimensions must not be zero: {:?}",
                config
            )));
        }

        let entries = (0..config.max_softbuffers)
            .map(|_| PoolEntry {
                softbuffer: Arc::new(Softbuffer::new(config.max_nof_codeblocks, config.max_codeblock_size)),
                reservation: None,
            })
            .collect();

        Ok(Self {
            config,
            entries: Mutex::new(entries),
        })
    }

    pub fn config(&self) -> &SoftbufferPoolConfig {
        &self.config
    }

    /// Number of softbuffers bound to a HARQ process
    pub fn nof_reserved(&self) -> usize {
        self.entries.lock().iter().filter(|e| e.reservation.is_some()).count()
    }

    /// Reserve the softbuffer of a HARQ process
    ///
    /// Returns an empty accessor when the HARQ process softbuffer is still
    /// locked by another accessor or when no softbuffer is free.
    pub fn reserve(
        &self,
        slot: SlotPoint,
        identifier: SoftbufferIdentifier,
        nof_codeblocks: usize,
        new_data: bool,
    ) -> UniqueSoftbuffer {
        if nof_codeblocks > self.config.max_nof_codeblocks {
            warn!(
                slot = %slot,
                rnti = identifier.rnti.0,
                nof_codeblocks,
                max = self.config.max_nof_codeblocks,
                "Transport block needs more codeblocks than a softbuffer holds"
            );
            return UniqueSoftbuffer::default();
        }

        let expires_at = slot + self.config.expire_timeout_slots as i32;
        let mut entries = self.entries.lock();

        let existing = entries
            .iter()
            .position(|e| e.reservation.as_ref().map(|r| r.identifier) == Some(identifier));

        let index = match existing {
            Some(index) => {
                if entries[index].softbuffer.is_locked() {
                    warn!(
                        slot = %slot,
                        rnti = identifier.rnti.0,
                        harq_ack_id = identifier.harq_ack_id,
                        "Softbuffer is still in use"
                    );
                    return UniqueSoftbuffer::default();
                }
                index
            }
            None => match entries.iter().position(|e| e.reservation.is_none()) {
                Some(index) => index,
                None => {
                    warn!(
                        slot = %slot,
                        rnti = identifier.rnti.0,
                        harq_ack_id = identifier.harq_ack_id,
                        "No softbuffer available"
                    );
                    return UniqueSoftbuffer::default();
                }
            },
        };

        let entry = &mut entries[index];
        let fresh = existing.is_none();
        entry.reservation = Some(Reservation { identifier, expires_at });
        {
            let mut data = entry.softbuffer.data();
            data.set_nof_codeblocks(nof_codeblocks);
            if new_data || fresh {
                data.reset_codeblocks_crc();
            }
        }

        trace!(
            slot = %slot,
            rnti = identifier.rnti.0,
            harq_ack_id = identifier.harq_ack_id,
            new_data,
            "Reserved softbuffer"
        );
        UniqueSoftbuffer::new(entry.softbuffer.clone())
    }

    /// Free reservations that expired before `slot` and are not locked
    pub fn run_slot(&self, slot: SlotPoint) {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            let expired = match &entry.reservation {
                Some(reservation) => {
                    reservation.expires_at.numerology() == slot.numerology() && reservation.expires_at < slot
                }
                None => false,
            };
            if expired && !entry.softbuffer.is_locked() {
                if let Some(reservation) = entry.reservation.take() {
                    debug!(
                        slot = %slot,
                        rnti = reservation.identifier.rnti.0,
                        harq_ack_id = reservation.identifier.harq_ack_id,
                        "Softbuffer reservation expired"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier(rnti: u16, harq: u8) -> SoftbufferIdentifier {
        SoftbufferIdentifier {
            rnti: Rnti(rnti),
            harq_ack_id: harq,
        }
    }

    fn small_pool(max_softbuffers: usize) -> SoftbufferPool {
        SoftbufferPool::new(SoftbufferPoolConfig {
            max_softbuffers,
            max_nof_codeblocks: 4,
            max_codeblock_size: 16,
            expire_timeout_slots: 10,
        })
        .unwrap()
    }

    #[test]
    fn test_accessor_lifecycle() {
        let softbuffer = Arc::new(Softbuffer::new(2, 8));
        let mut accessor = UniqueSoftbuffer::new(softbuffer.clone());
        assert!(accessor.is_valid());
        assert!(softbuffer.is_locked());

        accessor.release();
        assert!(!accessor.is_valid());
        assert!(!softbuffer.is_locked());

        // Idempotent
        accessor.release();
        assert!(!accessor.is_valid());
    }

    #[test]
    fn test_move_keeps_lock_and_take_empties_source() {
        let softbuffer = Arc::new(Softbuffer::new(2, 8));
        let accessor = UniqueSoftbuffer::new(softbuffer.clone());

        let moved = accessor;
        assert!(moved.is_valid());
        assert!(softbuffer.is_locked());

        let mut holder = moved;
        let taken = std::mem::take(&mut holder);
        assert!(!holder.is_valid());
        assert!(taken.is_valid());
        assert!(softbuffer.is_locked());

        drop(holder);
        assert!(softbuffer.is_locked());
        drop(taken);
        assert!(!softbuffer.is_locked());
    }

    #[test]
    #[should_panic(expected = "Invalid softbuffer accessor")]
    fn test_get_on_empty_accessor() {
        let accessor = UniqueSoftbuffer::default();
        let _ = accessor.get();
    }

    #[test]
    #[should_panic(expected = "Softbuffer is already locked")]
    fn test_double_lock() {
        let softbuffer = Arc::new(Softbuffer::new(1, 4));
        let _first = UniqueSoftbuffer::new(softbuffer.clone());
        let _second = UniqueSoftbuffer::new(softbuffer);
    }

    #[test]
    fn test_second_reservation_while_locked_is_empty() {
        let pool = small_pool(4);
        let slot = SlotPoint::new(1, 0);
        let first = pool.reserve(slot, identifier(0x4601, 0), 2, true);
        assert!(first.is_valid());

        let second = pool.reserve(slot, identifier(0x4601, 0), 2, false);
        assert!(!second.is_valid());

        drop(first);
        let third = pool.reserve(slot + 1, identifier(0x4601, 0), 2, false);
        assert!(third.is_valid());
        assert_eq!(pool.nof_reserved(), 1);
    }

    #[test]
    fn test_concurrent_reservations_hold_one_accessor_at_a_time() {
        use std::sync::atomic::AtomicUsize;

        let pool = Arc::new(small_pool(2));
        let holders = Arc::new(AtomicUsize::new(0));
        let granted = Arc::new(AtomicUsize::new(0));
        let id = identifier(0x4601, 1);

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let pool = pool.clone();
                let holders = holders.clone();
                let granted = granted.clone();
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        let slot = SlotPoint::new(1, i);
                        let mut accessor = pool.reserve(slot, id, 2, i % 2 == 0);
                        if !accessor.is_valid() {
                            continue;
                        }
                        assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                        granted.fetch_add(1, Ordering::Relaxed);
                        accessor.data().codeblock_mut(0)[0] = t as i8;
                        std::thread::yield_now();
                        assert_eq!(accessor.data().codeblock(0)[0], t as i8);
                        holders.fetch_sub(1, Ordering::SeqCst);
                        if i % 3 == 0 {
                            accessor.release();
                        }
                    }
                })
            })
            .collect();

        for i in 0..200u32 {
            pool.run_slot(SlotPoint::new(1, i));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(granted.load(Ordering::Relaxed) > 0);
        assert!(!pool.entries.lock().iter().any(|e| e.softbuffer.is_locked()));
    }

    #[test]
    fn test_retransmission_keeps_soft_bits() {
        let pool = small_pool(2);
        let id = identifier(0x4601, 3);
        let slot = SlotPoint::new(0, 10);

        {
            let accessor = pool.reserve(slot, id, 2, true);
            let mut data = accessor.data();
            data.codeblock_mut(1)[0] = 42;
            data.set_codeblock_crc(0, true);
        }

        let accessor = pool.reserve(slot + 8, id, 2, false);
        {
            let data = accessor.data();
            assert_eq!(data.codeblock(1)[0], 42);
            assert_eq!(data.codeblocks_crc(), &[true, false]);
        }
        drop(accessor);

        let accessor = pool.reserve(slot + 16, id, 2, true);
        let data = accessor.data();
        assert_eq!(data.codeblock(1)[0], 0);
        assert_eq!(data.codeblocks_crc(), &[false, false]);
    }

    #[test]
    fn test_exhausted_pool_returns_empty() {
        let pool = small_pool(1);
        let slot = SlotPoint::new(0, 0);
        let _a = pool.reserve(slot, identifier(1, 0), 1, true);
        let b = pool.reserve(slot, identifier(2, 0), 1, true);
        assert!(!b.is_valid());

        let too_big = small_pool(1).reserve(slot, identifier(3, 0), 5, true);
        assert!(!too_big.is_valid());
    }

    #[test]
    fn test_run_slot_frees_expired_unlocked_reservations() {
        let pool = small_pool(2);
        let slot = SlotPoint::new(0, 100);

        drop(pool.reserve(slot, identifier(1, 0), 1, true));
        let held = pool.reserve(slot, identifier(2, 0), 1, true);
        assert_eq!(pool.nof_reserved(), 2);

        pool.run_slot(slot + 10);
        assert_eq!(pool.nof_reserved(), 2);

        pool.run_slot(slot + 11);
        assert_eq!(pool.nof_reserved(), 1);

        drop(held);
        pool.run_slot(slot + 12);
        assert_eq!(pool.nof_reserved(), 0);
    }
}
