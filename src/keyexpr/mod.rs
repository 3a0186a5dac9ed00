// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Key-expression engine: canonicalization, intersection/inclusion tests
//! and resolution of `(resource id, suffix)` pairs against the session's
//! declared prefixes.

pub mod canon;
pub mod intersect;
pub mod resolver;

use anyhow::{Result, bail};

use crate::error::ZError;

/// Mapping direction of the numeric resource id carried by a key
/// expression: ids declared by this session or by the peer live in
/// separate tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mapping {
    #[default]
    Local,
    Remote,
}

/// A key expression as it travels through the session layer: an optional
/// numeric scope id referring to a declared prefix, plus a suffix.
///
/// Scope id `0` means "no prefix"; such an expression must carry a
/// non-empty suffix. A scoped expression may have an empty suffix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyExpr {
    pub scope: u16,
    pub suffix: String,
    pub mapping: Mapping,
}

impl KeyExpr {
    /// Build a scope-less key expression, rejecting non-canonical input.
    pub fn new(suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        canon::check(&suffix)?;
        Ok(Self {
            scope: 0,
            suffix,
            mapping: Mapping::Local,
        })
    }

    /// Build a scope-less key expression, canonicalizing what can be
    /// repaired and rejecting the rest.
    pub fn autocanonize(suffix: impl Into<String>) -> Result<Self> {
        let suffix = canon::canonize(suffix.into())?;
        Ok(Self {
            scope: 0,
            suffix,
            mapping: Mapping::Local,
        })
    }

    pub fn from_scope(scope: u16, suffix: impl Into<String>, mapping: Mapping) -> Result<Self> {
        let suffix = suffix.into();
        if scope == 0 && suffix.is_empty() {
            bail!(ZError::InvalidKeyExpression);
        }
        Ok(Self {
            scope,
            suffix,
            mapping,
        })
    }

    #[inline]
    pub fn has_scope(&self) -> bool {
        self.scope != 0
    }
}

impl std::fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_scope() {
            write!(f, "{}:{}", self.scope, self.suffix)
        } else {
            f.write_str(&self.suffix)
        }
    }
}
