// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use anyhow::Result;
use zenoh_client_rs::{
    collections::hashmap::{OpenHashMap, SentinelKey},
    error::ZError,
};

/// Key with a pinned hash so probe chains can be laid out by hand.
#[derive(Debug, Clone, PartialEq)]
struct PinnedKey {
    id: u32,
    bucket: u64,
}

impl PinnedKey {
    fn new(id: u32, bucket: u64) -> Self {
        Self { id, bucket }
    }
}

impl SentinelKey for PinnedKey {
    fn sentinel() -> Self {
        Self {
            id: u32::MAX,
            bucket: 0,
        }
    }

    fn is_sentinel(&self) -> bool {
        self.id == u32::MAX
    }

    fn key_hash(&self) -> u64 {
        self.bucket
    }
}

#[test]
fn test_insert_get_remove() -> Result<()> {
    let mut map: OpenHashMap<u32, String> = OpenHashMap::init(16, true);
    assert!(map.is_empty());
    assert_eq!(map.get(&7), None);

    map.insert(7, "seven".to_string())?;
    map.insert(8, "eight".to_string())?;
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&7).map(String::as_str), Some("seven"));
    assert_eq!(map.get(&8).map(String::as_str), Some("eight"));

    // Replacing keeps the length.
    map.insert(7, "SEVEN".to_string())?;
    assert_eq!(map.len(), 2);
    assert_eq!(map.get(&7).map(String::as_str), Some("SEVEN"));

    assert_eq!(map.remove(&7), Some("SEVEN".to_string()));
    assert_eq!(map.remove(&7), None);
    assert_eq!(map.get(&7), None);
    assert_eq!(map.len(), 1);
    Ok(())
}

#[test]
fn test_sentinel_key_is_rejected() {
    let mut map: OpenHashMap<u32, u32> = OpenHashMap::init(8, true);
    let err = map.insert(u32::MAX, 1).expect_err("sentinel must be rejected");
    assert_eq!(err, ZError::InvalidInput);
    assert!(map.is_empty());
}

#[test]
fn test_expansion_at_ninety_percent() -> Result<()> {
    let mut map: OpenHashMap<u32, u32> = OpenHashMap::init(8, true);
    for i in 0..100u32 {
        map.insert(i, i * 10)?;
    }
    assert_eq!(map.len(), 100);
    assert!(map.capacity() >= 128);
    for i in 0..100u32 {
        assert_eq!(map.get(&i), Some(&(i * 10)), "key {i} after expansion");
    }
    Ok(())
}

#[test]
fn test_non_resizable_overflow() -> Result<()> {
    let mut map: OpenHashMap<u32, u32> = OpenHashMap::init(8, false);
    for i in 0..8u32 {
        map.insert(i, i)?;
    }
    let err = map.insert(8, 8).expect_err("table is full");
    assert_eq!(err, ZError::Overflow);
    assert_eq!(map.len(), 8);
    Ok(())
}

#[test]
fn test_model_agreement() -> Result<()> {
    // Pseudo-random op sequence checked against std::HashMap after each
    // step. Deterministic seed keeps failures reproducible.
    let mut map: OpenHashMap<u32, u64> = OpenHashMap::init(16, true);
    let mut model: HashMap<u32, u64> = HashMap::new();

    let mut x: u64 = 0x2545_f491_4f6c_dd1d;
    for step in 0..2000 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        let key = (x % 97) as u32;
        match x % 3 {
            0 => {
                map.insert(key, x)?;
                model.insert(key, x);
            },
            1 => {
                assert_eq!(map.remove(&key), model.remove(&key), "step {step}");
            },
            _ => {},
        }
        assert_eq!(map.get(&key), model.get(&key), "step {step}");
        assert_eq!(map.len(), model.len(), "step {step}");
    }
    for (key, value) in &model {
        assert_eq!(map.get(key), Some(value));
    }
    Ok(())
}

#[test]
fn test_backward_shift_preserves_chain() -> Result<()> {
    // Capacity 8, four keys all hashing to bucket 3: they land in slots
    // 3, 4, 5 and 6.
    let mut map: OpenHashMap<PinnedKey, u32> = OpenHashMap::init(8, false);
    let keys: Vec<PinnedKey> = (0..4).map(|i| PinnedKey::new(i, 3)).collect();
    for (i, key) in keys.iter().enumerate() {
        map.insert(key.clone(), i as u32)?;
        assert_eq!(map.slot_of(key), Some(3 + i));
    }

    // Removing the entry in slot 4 must shift the later two back.
    map.remove(&keys[1]);
    for (i, key) in keys.iter().enumerate() {
        if i == 1 {
            assert_eq!(map.get(key), None);
            continue;
        }
        assert_eq!(map.get(key), Some(&(i as u32)), "key {i} survives");
    }
    assert!(map.slot_of(&keys[2]).expect("present") <= 5);
    assert!(map.slot_of(&keys[3]).expect("present") <= 6);
    Ok(())
}

#[test]
fn test_backward_shift_wrap_around() -> Result<()> {
    // Chain starting near the end of the table wraps to slot 0.
    let mut map: OpenHashMap<PinnedKey, u32> = OpenHashMap::init(8, false);
    let keys: Vec<PinnedKey> = (0..3).map(|i| PinnedKey::new(i, 7)).collect();
    for (i, key) in keys.iter().enumerate() {
        map.insert(key.clone(), i as u32)?;
    }
    assert_eq!(map.slot_of(&keys[0]), Some(7));
    assert_eq!(map.slot_of(&keys[1]), Some(0));
    assert_eq!(map.slot_of(&keys[2]), Some(1));

    map.remove(&keys[0]);
    assert_eq!(map.get(&keys[1]), Some(&1));
    assert_eq!(map.get(&keys[2]), Some(&2));
    assert_eq!(map.slot_of(&keys[1]), Some(7));
    assert_eq!(map.slot_of(&keys[2]), Some(0));
    Ok(())
}

#[test]
fn test_entries_do_not_move_without_removal() -> Result<()> {
    // A displaced entry whose natural bucket lies inside the vacated arc
    // must stay put.
    let mut map: OpenHashMap<PinnedKey, u32> = OpenHashMap::init(8, false);
    let at3 = PinnedKey::new(0, 3);
    let at4 = PinnedKey::new(1, 4);
    map.insert(at3.clone(), 0)?;
    map.insert(at4.clone(), 1)?;
    assert_eq!(map.slot_of(&at4), Some(4));

    // Slot 4 is at4's natural bucket; removing slot 3 must not drag it
    // backwards.
    map.remove(&at3);
    assert_eq!(map.slot_of(&at4), Some(4));
    assert_eq!(map.get(&at4), Some(&1));
    Ok(())
}
