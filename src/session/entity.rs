// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! User-facing entity handles. Each handle carries its numeric id and a
//! weak back-reference; the declaration state itself lives in the
//! session tables and is torn down by `undeclare_*` or session close.

use std::sync::Weak;

use anyhow::Result;
use bytes::Bytes;

use crate::{error::ZError, session::session::Session};

fn session_of(weak: &Weak<Session>) -> Result<std::sync::Arc<Session>> {
    weak.upgrade().ok_or_else(|| ZError::SessionClosed.into())
}

/// A declared subscriber. Samples flow to the handler given at
/// declaration time until `undeclare` (or session close).
#[derive(Debug)]
pub struct Subscriber {
    pub(crate) session: Weak<Session>,
    pub(crate) id: u32,
}

impl Subscriber {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn undeclare(self) -> Result<()> {
        session_of(&self.session)?.undeclare_subscriber(self.id).await
    }
}

/// A declared publisher bound to one key expression.
#[derive(Debug)]
pub struct Publisher {
    pub(crate) session: Weak<Session>,
    pub(crate) id: u32,
    pub(crate) key: String,
}

impl Publisher {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn keyexpr(&self) -> &str {
        &self.key
    }

    pub async fn put(&self, payload: Bytes) -> Result<()> {
        session_of(&self.session)?.put(&self.key, payload).await
    }

    pub async fn delete(&self) -> Result<()> {
        session_of(&self.session)?.delete(&self.key).await
    }

    pub async fn undeclare(self) -> Result<()> {
        session_of(&self.session)?.undeclare_publisher(self.id).await
    }
}

/// A declared queryable answering queries on its key expression.
#[derive(Debug)]
pub struct Queryable {
    pub(crate) session: Weak<Session>,
    pub(crate) id: u32,
}

impl Queryable {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn undeclare(self) -> Result<()> {
        session_of(&self.session)?.undeclare_queryable(self.id).await
    }
}

/// A liveliness token: its presence announces this session is alive on
/// the token's key expression.
#[derive(Debug)]
pub struct LivelinessToken {
    pub(crate) session: Weak<Session>,
    pub(crate) id: u32,
}

impl LivelinessToken {
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub async fn undeclare(self) -> Result<()> {
        session_of(&self.session)?.undeclare_token(self.id).await
    }
}
