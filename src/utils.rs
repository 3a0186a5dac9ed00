// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Write;

use rand::RngExt;

use crate::proto::core::ZenohId;

/// Generates a random 8-byte ZenohId and returns:
/// - the `ZenohId` for direct use on the wire
/// - a `String` containing its hexadecimal representation (no prefix)
pub fn generate_zid() -> (ZenohId, String) {
    let mut bytes = [0u8; 8];
    rand::rng().fill(&mut bytes);

    // All-zero ids are reserved on the wire.
    if bytes.iter().all(|b| *b == 0) {
        bytes[0] = 1;
    }

    let mut hex = String::with_capacity(16);
    for byte in &bytes {
        write!(&mut hex, "{byte:02x}").expect("Writing to String cannot fail");
    }

    let zid = ZenohId::new(&bytes).expect("8 bytes is a valid id length");
    (zid, hex)
}
