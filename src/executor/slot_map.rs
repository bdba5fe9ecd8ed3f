//! Per-unit hash bucketing.
//!
//! A [`HashSlotMap`] groups the rows of one processing unit by hash code
//! before any group lookup happens. Each distinct hash gets a dense slot
//! number in first-seen order and a list of the rows that produced it.
//! The map is reset after every unit; resetting bumps an epoch stamp instead
//! of clearing the table, so the cost does not depend on capacity.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Multiplier used to spread hash codes over table positions.
const SPREAD: u64 = 0x9e37_79b9_7f4a_7c15;

/// Open-addressing map from hash code to slot, plus per-slot row lists.
#[derive(Debug)]
pub struct HashSlotMap {
    /// Hash code stored at each table position.
    keys: Vec<u64>,
    /// Slot stored at each table position.
    values: Vec<u32>,
    /// Epoch in which each position was written; stale positions are empty.
    stamps: Vec<u32>,
    /// Current epoch.
    epoch: u32,
    /// Table size minus one (table size is a power of two).
    mask: usize,
    /// Live table entries.
    entries: usize,
    /// Hash code of each slot.
    hashes: Vec<u64>,
    /// Row positions of each slot; inner vectors keep their capacity.
    rows: Vec<Vec<i64>>,
    /// Slots in use this unit.
    used: usize,
}

impl HashSlotMap {
    /// Creates a map sized for units of `unit_size` rows.
    #[must_use]
    pub fn with_capacity(unit_size: usize) -> Self {
        let size = (unit_size.max(8) * 2).next_power_of_two();
        Self {
            keys: vec![0; size],
            values: vec![0; size],
            stamps: vec![0; size],
            epoch: 1,
            mask: size - 1,
            entries: 0,
            hashes: Vec::with_capacity(unit_size),
            rows: Vec::new(),
            used: 0,
        }
    }

    #[inline]
    fn position(&self, hash: u64) -> usize {
        (hash.wrapping_mul(SPREAD).rotate_left(32) as usize) & self.mask
    }

    /// Looks up the slot for `hash`.
    #[must_use]
    pub fn get(&self, hash: u64) -> Option<usize> {
        let mut pos = self.position(hash);
        loop {
            if self.stamps[pos] != self.epoch {
                return None;
            }
            if self.keys[pos] == hash {
                return Some(self.values[pos] as usize);
            }
            pos = (pos + 1) & self.mask;
        }
    }

    /// Maps `hash` to `slot`.
    pub fn set(&mut self, hash: u64, slot: usize) {
        if (self.entries + 1) * 2 > self.keys.len() {
            self.grow();
        }
        self.insert_entry(hash, slot as u32);

        if slot >= self.hashes.len() {
            self.hashes.resize(slot + 1, 0);
        }
        if slot >= self.rows.len() {
            self.rows.resize_with(slot + 1, Vec::new);
        }
        self.hashes[slot] = hash;
        self.used = self.used.max(slot + 1);
    }

    fn insert_entry(&mut self, hash: u64, slot: u32) {
        let mut pos = self.position(hash);
        loop {
            if self.stamps[pos] != self.epoch {
                self.stamps[pos] = self.epoch;
                self.keys[pos] = hash;
                self.values[pos] = slot;
                self.entries += 1;
                return;
            }
            if self.keys[pos] == hash {
                self.values[pos] = slot;
                return;
            }
            pos = (pos + 1) & self.mask;
        }
    }

    fn grow(&mut self) {
        let live: Vec<(u64, u32)> = (0..self.keys.len())
            .filter(|&pos| self.stamps[pos] == self.epoch)
            .map(|pos| (self.keys[pos], self.values[pos]))
            .collect();
        let size = self.keys.len() * 2;
        self.keys = vec![0; size];
        self.values = vec![0; size];
        self.stamps = vec![0; size];
        self.epoch = 1;
        self.mask = size - 1;
        self.entries = 0;
        for (hash, slot) in live {
            self.insert_entry(hash, slot);
        }
    }

    /// Appends `row` to the slot of `hash`, assigning the next slot if the
    /// hash is new in this unit. Returns the slot.
    pub fn bucket_row(&mut self, hash: u64, row: i64) -> usize {
        let slot = match self.get(hash) {
            Some(slot) => slot,
            None => {
                let slot = self.used;
                self.set(hash, slot);
                slot
            }
        };
        self.rows[slot].push(row);
        slot
    }

    /// Number of slots in use.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used
    }

    /// Returns true if no slot is in use.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Number of table positions.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.keys.len()
    }

    /// Hash code of `slot`.
    #[must_use]
    pub fn hash(&self, slot: usize) -> u64 {
        self.hashes[slot]
    }

    /// Rows collected in `slot`, in arrival order.
    #[must_use]
    pub fn rows(&self, slot: usize) -> &[i64] {
        &self.rows[slot]
    }

    /// Mutable row list of `slot`.
    pub fn rows_mut(&mut self, slot: usize) -> &mut Vec<i64> {
        &mut self.rows[slot]
    }

    /// Iterates `(hash, rows)` for every slot in slot order.
    pub fn buckets(&self) -> impl Iterator<Item = (u64, &[i64])> + '_ {
        (0..self.used).map(|slot| (self.hashes[slot], self.rows[slot].as_slice()))
    }

    /// Clears all buckets, keeping the allocated storage.
    pub fn reset(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if self.epoch == 0 {
            self.stamps.fill(0);
            self.epoch = 1;
        }
        for rows in &mut self.rows[..self.used] {
            rows.clear();
        }
        self.hashes.clear();
        self.entries = 0;
        self.used = 0;
    }
}

/// Pool of reusable slot maps shared by operator instances.
///
/// A map is borrowed when an operator starts and returned on teardown; it is
/// never shared between operators while borrowed.
#[derive(Debug)]
pub struct SlotMapPool {
    idle: Mutex<Vec<HashSlotMap>>,
    max_idle: usize,
    unit_size: usize,
    borrowed: AtomicUsize,
}

impl SlotMapPool {
    /// Creates a pool that keeps at most `max_idle` maps sized for `unit_size`.
    #[must_use]
    pub fn new(max_idle: usize, unit_size: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            unit_size,
            borrowed: AtomicUsize::new(0),
        }
    }

    /// Borrows a map, reusing an idle one when available.
    #[must_use]
    pub fn get(&self) -> HashSlotMap {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        let recycled = self.idle.lock().pop();
        recycled.unwrap_or_else(|| HashSlotMap::with_capacity(self.unit_size))
    }

    /// Returns a borrowed map.
    pub fn put(&self, mut map: HashSlotMap) {
        map.reset();
        self.borrowed.fetch_sub(1, Ordering::Relaxed);
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(map);
        }
    }

    /// Maps currently borrowed.
    #[must_use]
    pub fn borrowed(&self) -> usize {
        self.borrowed.load(Ordering::Relaxed)
    }

    /// Maps waiting in the pool.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}
