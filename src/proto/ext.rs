// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Message extensions.
//!
//! Every message whose header carries the `Z` flag is followed by a chain
//! of extensions: `more(0x80) | encoding(0x60) | id(0x1f)` header bytes,
//! each followed by an encoding-specific body. Unknown extensions are
//! skipped without failing the message, preserving forward compatibility.

use crate::{
    codec::{buf::Reader, prim},
    error::ZError,
};

/// Extension carries no body.
pub const EXT_ENC_UNIT: u8 = 0x00;
/// Extension body is a single `vle`.
pub const EXT_ENC_ZINT: u8 = 0x20;
/// Extension body is a length-prefixed byte block.
pub const EXT_ENC_ZBUF: u8 = 0x40;

const EXT_ENC_MASK: u8 = 0x60;
const EXT_MORE: u8 = 0x80;

/// Skip the extension chain following a message whose `Z` flag was set.
pub fn skip_all(r: &mut Reader<'_>) -> Result<(), ZError> {
    loop {
        let header = r.read_u8()?;
        match header & EXT_ENC_MASK {
            EXT_ENC_UNIT => {},
            EXT_ENC_ZINT => {
                let _ = prim::read_vle(r)?;
            },
            EXT_ENC_ZBUF => {
                let len = prim::read_vle_usize(r)?;
                r.skip(len)?;
            },
            _ => return Err(ZError::MalformedPacket),
        }
        if header & EXT_MORE == 0 {
            return Ok(());
        }
    }
}

/// Skip extensions when the carrying header says they are present.
pub fn skip_if_present(r: &mut Reader<'_>, has_ext: bool) -> Result<(), ZError> {
    if has_ext {
        skip_all(r)?;
    }
    Ok(())
}
