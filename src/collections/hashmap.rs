// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Open-addressed hash map with linear probing and backward-shift
//! deletion.
//!
//! Slots are kept in a single contiguous power-of-two array. An empty
//! slot is marked by the key's reserved *sentinel* value, so the sentinel
//! key itself can never be inserted; `insert` rejects it up front. The
//! table expands at 90% load by doubling and reinserting every live
//! entry. Deletion repairs the probe chain in place instead of leaving
//! tombstones: entries between the freed slot and the next empty slot are
//! shifted back when their natural position lies outside the vacated arc.

use crate::error::ZError;

const DEFAULT_CAPACITY: usize = 16;

/// Key contract of [`OpenHashMap`].
///
/// Mirrors the capability tuple the map needs per key type: a hash, an
/// equality (via `PartialEq`) and the reserved never-a-real-key sentinel
/// that encodes an empty slot.
pub trait SentinelKey: PartialEq + Clone {
    /// The reserved key marking an empty slot. Must never compare equal
    /// to a live key.
    fn sentinel() -> Self;

    fn is_sentinel(&self) -> bool;

    fn key_hash(&self) -> u64;
}

impl SentinelKey for u32 {
    fn sentinel() -> Self {
        u32::MAX
    }

    fn is_sentinel(&self) -> bool {
        *self == u32::MAX
    }

    fn key_hash(&self) -> u64 {
        (*self as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
    }
}

#[derive(Debug, Clone)]
struct Slot<K, V> {
    key: K,
    value: Option<V>,
}

#[derive(Debug)]
pub struct OpenHashMap<K, V> {
    slots: Vec<Slot<K, V>>,
    capacity: usize,
    len: usize,
    resizable: bool,
}

impl<K: SentinelKey, V> OpenHashMap<K, V> {
    /// `capacity` must be a non-zero power of two; anything else falls
    /// back to the default capacity.
    pub fn init(capacity: usize, resizable: bool) -> Self {
        let capacity = if capacity == 0 || !capacity.is_power_of_two() {
            DEFAULT_CAPACITY
        } else {
            capacity
        };
        Self {
            slots: Vec::new(),
            capacity,
            len: 0,
            resizable,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn wrap(idx: usize, capacity: usize) -> usize {
        idx & (capacity - 1)
    }

    fn alloc_slots(capacity: usize) -> Vec<Slot<K, V>> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot {
                key: K::sentinel(),
                value: None,
            });
        }
        slots
    }

    fn expand(&mut self) {
        let old = std::mem::replace(
            &mut self.slots,
            Self::alloc_slots(self.capacity * 2),
        );
        self.capacity *= 2;
        self.len = 0;
        for slot in old {
            if let Some(value) = slot.value {
                // Reinsertion into the doubled table cannot fail.
                self.place(slot.key, value);
            }
        }
    }

    /// Probe-and-write without load-factor bookkeeping checks.
    fn place(&mut self, key: K, value: V) {
        let mut idx = Self::wrap(key.key_hash() as usize, self.capacity);
        loop {
            let slot = &mut self.slots[idx];
            if slot.key.is_sentinel() {
                slot.key = key;
                slot.value = Some(value);
                self.len += 1;
                return;
            }
            if slot.key == key {
                slot.value = Some(value);
                return;
            }
            idx = Self::wrap(idx + 1, self.capacity);
        }
    }

    /// Insert or replace. The sentinel key is rejected with
    /// `InvalidInput`; a full non-resizable table fails with `Overflow`.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), ZError> {
        if key.is_sentinel() {
            return Err(ZError::InvalidInput);
        }
        // Table storage is allocated lazily on first insert.
        if self.slots.is_empty() {
            self.slots = Self::alloc_slots(self.capacity);
        } else if self.len * 10 >= self.capacity * 9 {
            if self.resizable {
                self.expand();
            } else if self.len == self.capacity {
                return Err(ZError::Overflow);
            }
        }
        self.place(key, value);
        Ok(())
    }

    fn find_idx(&self, key: &K) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let mut idx = Self::wrap(key.key_hash() as usize, self.capacity);
        loop {
            let slot = &self.slots[idx];
            if slot.key.is_sentinel() {
                return None;
            }
            if &slot.key == key {
                return Some(idx);
            }
            idx = Self::wrap(idx + 1, self.capacity);
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.find_idx(key)
            .and_then(|idx| self.slots[idx].value.as_ref())
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.find_idx(key)
            .and_then(|idx| self.slots[idx].value.as_mut())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.find_idx(key).is_some()
    }

    /// Remove an entry and repair the probe chain by backward shift: walk
    /// forward from the freed slot, moving each displaced entry back when
    /// its natural bucket lies outside the half-open arc
    /// `(freed_slot, current]` modulo capacity.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let mut del_idx = self.find_idx(key)?;
        let slot = &mut self.slots[del_idx];
        let removed = slot.value.take();
        slot.key = K::sentinel();
        self.len -= 1;

        let mut idx = del_idx;
        loop {
            idx = Self::wrap(idx + 1, self.capacity);
            if self.slots[idx].key.is_sentinel() {
                break;
            }
            let natural =
                Self::wrap(self.slots[idx].key.key_hash() as usize, self.capacity);
            let should_move = if idx > del_idx {
                natural <= del_idx || natural > idx
            } else {
                natural <= del_idx && natural > idx
            };
            if should_move {
                self.slots.swap(del_idx, idx);
                // The vacated slot moved forward; the one left behind at
                // `idx` is now the sentinel from the swap.
                del_idx = idx;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.key = K::sentinel();
            slot.value = None;
        }
        self.len = 0;
    }

    /// Live entries in table order. Callers needing declaration order
    /// sort by key afterwards.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slots.iter().filter_map(|slot| {
            slot.value.as_ref().map(|value| (&slot.key, value))
        })
    }

    /// Slot index currently holding `key`. Exposed for probe-chain
    /// integrity checks in tests.
    pub fn slot_of(&self, key: &K) -> Option<usize> {
        self.find_idx(key)
    }
}
