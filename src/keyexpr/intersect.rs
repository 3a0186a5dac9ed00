// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Intersection and inclusion over slash-separated key expressions.
//!
//! `*` matches exactly one non-empty chunk, `**` matches zero or more
//! chunks; every other chunk (including `$*`-escaped verbatim chunks)
//! matches only its literal self.

/// Do `a` and `b` share at least one concrete key? Commutative.
pub fn intersects(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('/').collect();
    let b: Vec<&str> = b.split('/').collect();
    chunks_intersect(&a, &b)
}

/// Is every concrete key matched by `b` also matched by `a`?
pub fn includes(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('/').collect();
    let b: Vec<&str> = b.split('/').collect();
    chunks_include(&a, &b)
}

fn chunk_intersects(a: &str, b: &str) -> bool {
    a == b || (a == "*" && !b.is_empty()) || (b == "*" && !a.is_empty())
}

fn chunks_intersect(a: &[&str], b: &[&str]) -> bool {
    if a.is_empty() && b.is_empty() {
        return true;
    }
    if a.first() == Some(&"**") {
        // `**` consumes zero chunks of b, or one and stays.
        if chunks_intersect(&a[1..], b) {
            return true;
        }
        return !b.is_empty() && chunks_intersect(a, &b[1..]);
    }
    if b.first() == Some(&"**") {
        return chunks_intersect(b, a);
    }
    match (a.first(), b.first()) {
        (Some(ca), Some(cb)) => {
            chunk_intersects(ca, cb) && chunks_intersect(&a[1..], &b[1..])
        },
        _ => false,
    }
}

fn chunks_include(a: &[&str], b: &[&str]) -> bool {
    if a.first() == Some(&"**") {
        // `**` covers zero chunks of b, or one and stays.
        if chunks_include(&a[1..], b) {
            return true;
        }
        return !b.is_empty() && chunks_include(a, &b[1..]);
    }
    match (a.first(), b.first()) {
        (None, None) => true,
        (Some(ca), Some(cb)) => {
            // `**` in b matches arbitrarily long tails; only an `**` head
            // in a (handled above) can cover it.
            let covers = *cb != "**" && (*ca == *cb || *ca == "*");
            covers && chunks_include(&a[1..], &b[1..])
        },
        _ => false,
    }
}
