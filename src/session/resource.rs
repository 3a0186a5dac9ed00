// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Declaration tables: the per-direction registries behind the session
//! mutex.

use crate::{
    collections::{hashmap::OpenHashMap, lru_cache::LruCache},
    handlers::Handler,
    keyexpr::resolver::KeResolution,
    session::{Sample, query::Query},
};

/// A locally declared subscriber: its expanded key expression and the
/// handler samples are delivered through. The handler is owned here; the
/// user-side [`crate::session::entity::Subscriber`] only carries the id.
#[derive(Debug)]
pub struct SubscriberState {
    pub id: u32,
    pub key: String,
    pub handler: Handler<Sample>,
}

#[derive(Debug)]
pub struct QueryableState {
    pub id: u32,
    pub key: String,
    pub complete: bool,
    pub distance: u16,
    pub handler: Handler<Query>,
}

#[derive(Debug)]
pub struct PublisherState {
    pub id: u32,
    pub key: String,
}

/// Everything the session mutex protects: five numeric-id tables per
/// direction plus the key-expression resolution cache.
///
/// Local tables hold this session's declarations, remote tables the
/// peer's. Resource tables map numeric prefixes; the other tables map
/// entity ids to their expanded key expressions (and handlers for the
/// local subscriber/queryable tables).
#[derive(Debug)]
pub struct DeclTables {
    pub local_resources: OpenHashMap<u32, String>,
    pub remote_resources: OpenHashMap<u32, String>,
    pub local_subscribers: OpenHashMap<u32, SubscriberState>,
    pub remote_subscribers: OpenHashMap<u32, String>,
    pub local_queryables: OpenHashMap<u32, QueryableState>,
    pub remote_queryables: OpenHashMap<u32, String>,
    pub local_publishers: OpenHashMap<u32, PublisherState>,
    pub remote_publishers: OpenHashMap<u32, String>,
    pub local_tokens: OpenHashMap<u32, String>,
    pub remote_tokens: OpenHashMap<u32, String>,
    pub ke_cache: LruCache<KeResolution>,
}

impl DeclTables {
    pub fn new(ke_cache_capacity: usize) -> Self {
        Self {
            local_resources: OpenHashMap::init(16, true),
            remote_resources: OpenHashMap::init(16, true),
            local_subscribers: OpenHashMap::init(16, true),
            remote_subscribers: OpenHashMap::init(16, true),
            local_queryables: OpenHashMap::init(16, true),
            remote_queryables: OpenHashMap::init(16, true),
            local_publishers: OpenHashMap::init(16, true),
            remote_publishers: OpenHashMap::init(16, true),
            local_tokens: OpenHashMap::init(16, true),
            remote_tokens: OpenHashMap::init(16, true),
            ke_cache: LruCache::init(ke_cache_capacity),
        }
    }
}
