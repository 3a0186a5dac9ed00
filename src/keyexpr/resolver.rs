// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Resolution of `(scope id, suffix)` key expressions against the
//! session's declared resource prefixes, memoised in the LRU cache.

use anyhow::{Result, bail};

use crate::{
    collections::{hashmap::OpenHashMap, lru_cache::{CacheValue, LruCache}},
    error::ZError,
    keyexpr::{KeyExpr, Mapping},
};

/// A memoised resolution. Hash and equality cover the lookup key
/// `(scope, suffix, mapping)`; `expanded` is the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeResolution {
    pub scope: u16,
    pub suffix: String,
    pub mapping: Mapping,
    pub expanded: String,
}

impl KeResolution {
    pub fn probe(ke: &KeyExpr) -> Self {
        Self {
            scope: ke.scope,
            suffix: ke.suffix.clone(),
            mapping: ke.mapping,
            expanded: String::new(),
        }
    }
}

impl CacheValue for KeResolution {
    fn value_hash(&self) -> u64 {
        // FNV-1a over the lookup key portion.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        let mut mix = |b: u8| {
            h ^= b as u64;
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        };
        for b in self.scope.to_le_bytes() {
            mix(b);
        }
        mix(match self.mapping {
            Mapping::Local => 0,
            Mapping::Remote => 1,
        });
        for b in self.suffix.as_bytes() {
            mix(*b);
        }
        h
    }

    fn value_eq(&self, other: &Self) -> bool {
        self.scope == other.scope
            && self.mapping == other.mapping
            && self.suffix == other.suffix
    }
}

/// Expand a key expression to its full string form.
///
/// A scoped expression concatenates the declared prefix for its id with
/// the carried suffix (the declarer includes any separator in the
/// suffix). Unknown ids fail with `UnknownResource`. Resolutions go
/// through `cache` so repeated samples on the same wire expression skip
/// the table lookup.
pub fn resolve(
    ke: &KeyExpr,
    resources: &OpenHashMap<u32, String>,
    cache: &mut LruCache<KeResolution>,
) -> Result<String> {
    if !ke.has_scope() {
        if ke.suffix.is_empty() {
            bail!(ZError::InvalidKeyExpression);
        }
        return Ok(ke.suffix.clone());
    }

    let probe = KeResolution::probe(ke);
    if let Some(hit) = cache.get(&probe) {
        return Ok(hit.expanded.clone());
    }

    let Some(prefix) = resources.get(&(ke.scope as u32)) else {
        bail!(ZError::UnknownResource);
    };
    let mut expanded = String::with_capacity(prefix.len() + ke.suffix.len());
    expanded.push_str(prefix);
    expanded.push_str(&ke.suffix);

    let mut entry = probe;
    entry.expanded = expanded.clone();
    cache.insert(entry)?;
    Ok(expanded)
}
