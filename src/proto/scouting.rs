// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scouting messages exchanged over UDP before a session exists.

use crate::{
    codec::{
        buf::{Reader, Writer},
        prim,
    },
    error::ZError,
    proto::{
        core::{WhatAmI, ZenohId},
        ext, header,
    },
};

/// Probe for reachable peers. The `what` mask narrows which roles are
/// asked to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scout {
    pub version: u8,
    pub what: WhatAmI,
    pub zid: Option<ZenohId>,
}

/// Answer to a Scout: who we are and where we can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub version: u8,
    pub whatami: WhatAmI,
    pub zid: ZenohId,
    pub locators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoutingMessage {
    Scout(Scout),
    Hello(Hello),
}

impl ScoutingMessage {
    pub fn encode(&self, w: &mut Writer) -> Result<(), ZError> {
        match self {
            Self::Scout(m) => {
                let mut h = header::MID_SCOUT;
                header::with_flag(&mut h, header::FLAG_SCOUT_I, m.zid.is_some());
                w.write_u8(h);
                w.write_u8(m.version);
                w.write_u8(m.what.bits());
                if let Some(zid) = &m.zid {
                    zid.encode(w);
                }
            },
            Self::Hello(m) => {
                let mut h = header::MID_HELLO;
                header::with_flag(&mut h, header::FLAG_HELLO_L, !m.locators.is_empty());
                w.write_u8(h);
                w.write_u8(m.version);
                w.write_u8(m.whatami.bits());
                m.zid.encode(w);
                if !m.locators.is_empty() {
                    prim::write_vle(w, m.locators.len() as u64);
                    for loc in &m.locators {
                        prim::write_string(w, loc);
                    }
                }
            },
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let h = r.read_u8()?;
        let msg = match header::mid(h) {
            header::MID_SCOUT => {
                let version = r.read_u8()?;
                let what = WhatAmI::decode_byte(r.read_u8()?)?;
                let zid = if header::has_flag(h, header::FLAG_SCOUT_I) {
                    Some(ZenohId::decode(r)?)
                } else {
                    None
                };
                Self::Scout(Scout { version, what, zid })
            },
            header::MID_HELLO => {
                let version = r.read_u8()?;
                let whatami = WhatAmI::decode_byte(r.read_u8()?)?;
                let zid = ZenohId::decode(r)?;
                let mut locators = Vec::new();
                if header::has_flag(h, header::FLAG_HELLO_L) {
                    let n = prim::read_vle_usize(r)?;
                    locators.reserve(n);
                    for _ in 0..n {
                        locators.push(prim::read_string(r)?);
                    }
                }
                Self::Hello(Hello {
                    version,
                    whatami,
                    zid,
                    locators,
                })
            },
            _ => return Err(ZError::MalformedPacket),
        };
        ext::skip_if_present(r, header::has_flag(h, header::FLAG_Z))?;
        Ok(msg)
    }
}
