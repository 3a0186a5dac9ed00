// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Canonical-form rules for key expressions.
//!
//! A key expression is canonical iff it is non-empty, has no leading or
//! trailing `/`, no empty chunk (`//`), no chunk equal to `$*`, no two
//! adjacent `**` chunks, and no `**` chunk directly followed by `*`
//! (which is reordered to `*/**`).

use anyhow::{Result, bail};

use crate::error::ZError;

/// Structural defects that cannot be repaired by canonicalization.
fn check_structure(ke: &str) -> Result<()> {
    if ke.is_empty() || ke.starts_with('/') || ke.ends_with('/') {
        bail!(ZError::InvalidKeyExpression);
    }
    for chunk in ke.split('/') {
        if chunk.is_empty() {
            bail!(ZError::InvalidKeyExpression);
        }
    }
    Ok(())
}

/// Reject any non-canonical input.
pub fn check(ke: &str) -> Result<()> {
    check_structure(ke)?;
    let chunks: Vec<&str> = ke.split('/').collect();
    for (i, chunk) in chunks.iter().enumerate() {
        if *chunk == "$*" {
            bail!(ZError::InvalidKeyExpression);
        }
        if *chunk == "**" {
            match chunks.get(i + 1) {
                Some(&"**") | Some(&"*") => bail!(ZError::InvalidKeyExpression),
                _ => {},
            }
        }
    }
    Ok(())
}

/// Canonicalize what can be repaired: collapse `**/**` into `**` and
/// reorder `**/*` into `*/**`. Structural defects (empty chunks, leading
/// or trailing `/`) stay errors. A verbatim `$*` chunk passes through
/// untouched: rewriting it into the `*` wildcard would change its
/// meaning from literal to wildcard.
pub fn canonize(ke: String) -> Result<String> {
    check_structure(&ke)?;
    let mut chunks: Vec<&str> = ke.split('/').collect();

    // Collapse runs of `**`.
    let mut out: Vec<&str> = Vec::with_capacity(chunks.len());
    for chunk in chunks.drain(..) {
        if chunk == "**" && out.last() == Some(&"**") {
            continue;
        }
        out.push(chunk);
    }
    // Bubble every `*` in front of a preceding `**`; the pair matches the
    // same set of keys in either order.
    let mut i = 1;
    while i < out.len() {
        if out[i] == "*" && out[i - 1] == "**" {
            out.swap(i - 1, i);
            if i > 1 {
                i -= 1;
                continue;
            }
        }
        i += 1;
    }

    // The collapse and reorder passes eliminated every `**/**` and
    // `**/*` pair, so the result needs no second validation.
    Ok(out.join("/"))
}

pub fn is_canon(ke: &str) -> bool {
    check(ke).is_ok()
}
