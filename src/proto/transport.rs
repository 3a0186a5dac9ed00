// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Transport-layer messages: the session handshake, keep-alive, close and
//! the frame/fragment containers.

use bytes::Bytes;

use crate::{
    codec::{
        buf::{Reader, Writer},
        prim,
    },
    error::ZError,
    proto::{
        core::{Channel, CloseReason, Resolution, WhatAmI, ZenohId},
        ext, header,
        network::NetworkMessage,
    },
};

/// A lease on a whole-second boundary travels as seconds with the `T`
/// flag set.
#[inline]
fn whole_seconds(lease_ms: u64) -> bool {
    lease_ms % 1_000 == 0
}

fn write_lease(w: &mut Writer, lease_ms: u64) {
    if whole_seconds(lease_ms) {
        prim::write_vle(w, lease_ms / 1_000);
    } else {
        prim::write_vle(w, lease_ms);
    }
}

fn read_lease(r: &mut Reader<'_>, in_seconds: bool) -> Result<u64, ZError> {
    let v = prim::read_vle(r)?;
    if in_seconds {
        v.checked_mul(1_000).ok_or(ZError::MalformedPacket)
    } else {
        Ok(v)
    }
}

/// Batch/resolution parameters negotiated by Init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeParams {
    pub batch_size: u16,
    pub sn_resolution: Resolution,
    pub request_id_resolution: Resolution,
}

impl SizeParams {
    fn encode(&self, w: &mut Writer) {
        prim::write_u16_le(w, self.batch_size);
        w.write_u8((self.sn_resolution as u8) | ((self.request_id_resolution as u8) << 2));
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let batch_size = prim::read_u16_le(r)?;
        let res = r.read_u8()?;
        Ok(Self {
            batch_size,
            sn_resolution: Resolution::from_code(res & 0x03)?,
            request_id_resolution: Resolution::from_code((res >> 2) & 0x03)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSyn {
    pub version: u8,
    pub whatami: WhatAmI,
    pub zid: ZenohId,
    pub params: Option<SizeParams>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitAck {
    pub version: u8,
    pub whatami: WhatAmI,
    pub zid: ZenohId,
    pub params: Option<SizeParams>,
    pub cookie: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSyn {
    /// Lease in milliseconds.
    pub lease_ms: u64,
    pub initial_sn: u64,
    pub cookie: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAck {
    pub lease_ms: u64,
    pub initial_sn: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub reason: CloseReason,
    /// Whole-session close as opposed to a single-link close.
    pub session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub sn: u64,
    pub payload: Vec<NetworkMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub channel: Channel,
    pub more: bool,
    pub sn: u64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub version: u8,
    pub whatami: WhatAmI,
    pub zid: ZenohId,
    pub lease_ms: u64,
    pub params: Option<SizeParams>,
    pub next_sn: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    InitSyn(InitSyn),
    InitAck(InitAck),
    OpenSyn(OpenSyn),
    OpenAck(OpenAck),
    Close(Close),
    KeepAlive,
    Frame(Frame),
    Fragment(Fragment),
    Join(Join),
}

impl TransportMessage {
    pub fn encode(&self, w: &mut Writer) -> Result<(), ZError> {
        match self {
            Self::InitSyn(m) => {
                let mut h = header::MID_T_INIT;
                header::with_flag(&mut h, header::FLAG_T_INIT_S, m.params.is_some());
                w.write_u8(h);
                w.write_u8(m.version);
                w.write_u8(m.whatami.bits());
                m.zid.encode(w);
                if let Some(params) = &m.params {
                    params.encode(w);
                }
            },
            Self::InitAck(m) => {
                let mut h = header::MID_T_INIT | header::FLAG_T_INIT_A;
                header::with_flag(&mut h, header::FLAG_T_INIT_S, m.params.is_some());
                w.write_u8(h);
                w.write_u8(m.version);
                w.write_u8(m.whatami.bits());
                m.zid.encode(w);
                if let Some(params) = &m.params {
                    params.encode(w);
                }
                prim::write_bytes(w, &m.cookie);
            },
            Self::OpenSyn(m) => {
                let mut h = header::MID_T_OPEN;
                header::with_flag(&mut h, header::FLAG_T_OPEN_T, whole_seconds(m.lease_ms));
                w.write_u8(h);
                write_lease(w, m.lease_ms);
                prim::write_vle(w, m.initial_sn);
                prim::write_bytes(w, &m.cookie);
            },
            Self::OpenAck(m) => {
                let mut h = header::MID_T_OPEN | header::FLAG_T_OPEN_A;
                header::with_flag(&mut h, header::FLAG_T_OPEN_T, whole_seconds(m.lease_ms));
                w.write_u8(h);
                write_lease(w, m.lease_ms);
                prim::write_vle(w, m.initial_sn);
            },
            Self::Close(m) => {
                let mut h = header::MID_T_CLOSE;
                header::with_flag(&mut h, header::FLAG_T_CLOSE_S, m.session);
                w.write_u8(h);
                w.write_u8(m.reason as u8);
            },
            Self::KeepAlive => {
                w.write_u8(header::MID_T_KEEP_ALIVE);
            },
            Self::Frame(m) => {
                let mut h = header::MID_T_FRAME;
                header::with_flag(
                    &mut h,
                    header::FLAG_T_FRAME_R,
                    m.channel == Channel::Reliable,
                );
                w.write_u8(h);
                prim::write_vle(w, m.sn);
                // Network messages are self-delimiting; they run back to
                // back until the end of the transport message.
                for msg in &m.payload {
                    msg.encode(w)?;
                }
            },
            Self::Fragment(m) => {
                let mut h = header::MID_T_FRAGMENT;
                header::with_flag(
                    &mut h,
                    header::FLAG_T_FRAGMENT_R,
                    m.channel == Channel::Reliable,
                );
                header::with_flag(&mut h, header::FLAG_T_FRAGMENT_M, m.more);
                w.write_u8(h);
                prim::write_vle(w, m.sn);
                w.write_slice(&m.payload);
            },
            Self::Join(m) => {
                let mut h = header::MID_T_JOIN;
                header::with_flag(&mut h, header::FLAG_T_JOIN_S, m.params.is_some());
                header::with_flag(&mut h, header::FLAG_T_JOIN_T, whole_seconds(m.lease_ms));
                w.write_u8(h);
                w.write_u8(m.version);
                w.write_u8(m.whatami.bits());
                m.zid.encode(w);
                write_lease(w, m.lease_ms);
                if let Some(params) = &m.params {
                    params.encode(w);
                }
                prim::write_vle(w, m.next_sn);
            },
        }
        Ok(())
    }

    /// Decode one transport message spanning the whole of `r`.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let h = r.read_u8()?;
        let has_ext = header::has_flag(h, header::FLAG_Z);
        let msg = match header::mid(h) {
            header::MID_T_INIT => {
                let version = r.read_u8()?;
                let whatami = WhatAmI::decode_byte(r.read_u8()?)?;
                let zid = ZenohId::decode(r)?;
                let params = if header::has_flag(h, header::FLAG_T_INIT_S) {
                    Some(SizeParams::decode(r)?)
                } else {
                    None
                };
                if header::has_flag(h, header::FLAG_T_INIT_A) {
                    let cookie = Bytes::copy_from_slice(prim::read_bytes(r)?);
                    Self::InitAck(InitAck {
                        version,
                        whatami,
                        zid,
                        params,
                        cookie,
                    })
                } else {
                    Self::InitSyn(InitSyn {
                        version,
                        whatami,
                        zid,
                        params,
                    })
                }
            },
            header::MID_T_OPEN => {
                let lease_ms = read_lease(r, header::has_flag(h, header::FLAG_T_OPEN_T))?;
                let initial_sn = prim::read_vle(r)?;
                if header::has_flag(h, header::FLAG_T_OPEN_A) {
                    Self::OpenAck(OpenAck {
                        lease_ms,
                        initial_sn,
                    })
                } else {
                    let cookie = Bytes::copy_from_slice(prim::read_bytes(r)?);
                    Self::OpenSyn(OpenSyn {
                        lease_ms,
                        initial_sn,
                        cookie,
                    })
                }
            },
            header::MID_T_CLOSE => Self::Close(Close {
                reason: CloseReason::from_u8(r.read_u8()?)?,
                session: header::has_flag(h, header::FLAG_T_CLOSE_S),
            }),
            header::MID_T_KEEP_ALIVE => Self::KeepAlive,
            header::MID_T_FRAME => {
                let channel = if header::has_flag(h, header::FLAG_T_FRAME_R) {
                    Channel::Reliable
                } else {
                    Channel::BestEffort
                };
                let sn = prim::read_vle(r)?;
                let mut payload = Vec::new();
                while !r.is_empty() {
                    payload.push(NetworkMessage::decode(r)?);
                }
                return Ok(Self::Frame(Frame {
                    channel,
                    sn,
                    payload,
                }));
            },
            header::MID_T_FRAGMENT => {
                let channel = if header::has_flag(h, header::FLAG_T_FRAGMENT_R) {
                    Channel::Reliable
                } else {
                    Channel::BestEffort
                };
                let sn = prim::read_vle(r)?;
                let payload = Bytes::copy_from_slice(r.read_rest());
                return Ok(Self::Fragment(Fragment {
                    channel,
                    more: header::has_flag(h, header::FLAG_T_FRAGMENT_M),
                    sn,
                    payload,
                }));
            },
            header::MID_T_JOIN => {
                let version = r.read_u8()?;
                let whatami = WhatAmI::decode_byte(r.read_u8()?)?;
                let zid = ZenohId::decode(r)?;
                let lease_ms = read_lease(r, header::has_flag(h, header::FLAG_T_JOIN_T))?;
                let params = if header::has_flag(h, header::FLAG_T_JOIN_S) {
                    Some(SizeParams::decode(r)?)
                } else {
                    None
                };
                let next_sn = prim::read_vle(r)?;
                Self::Join(Join {
                    version,
                    whatami,
                    zid,
                    lease_ms,
                    params,
                    next_sn,
                })
            },
            _ => return Err(ZError::MalformedPacket),
        };
        ext::skip_if_present(r, has_ext)?;
        Ok(msg)
    }

    /// Encode with the little-endian `u16` stream length prefix.
    pub fn encode_on_stream(&self, w: &mut Writer) -> Result<(), ZError> {
        let mut body = Writer::new();
        self.encode(&mut body)?;
        if body.len() > u16::MAX as usize {
            return Err(ZError::Overflow);
        }
        prim::write_u16_le(w, body.len() as u16);
        w.write_slice(body.as_slice());
        Ok(())
    }
}
