// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Network-layer messages carried inside transport frames.

use crate::{
    codec::{
        buf::{Reader, Writer},
        prim,
    },
    error::ZError,
    keyexpr::Mapping,
    proto::{
        core::WireExpr,
        ext, header,
        zenoh::{PushBody, RequestBody, ResponseBody},
    },
};

/// One entity declaration or undeclaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Resource { id: u16, key: WireExpr },
    ForgetResource { id: u16 },
    Publisher { id: u32, key: WireExpr },
    ForgetPublisher { id: u32 },
    Subscriber { id: u32, key: WireExpr },
    ForgetSubscriber { id: u32 },
    Queryable {
        id: u32,
        key: WireExpr,
        complete: bool,
        distance: u16,
    },
    ForgetQueryable { id: u32 },
    Token { id: u32, key: WireExpr },
    ForgetToken { id: u32 },
}

impl Declaration {
    fn encode(&self, w: &mut Writer) {
        match self {
            Self::Resource { id, key } => {
                w.write_u8(header::DECL_RESOURCE);
                prim::write_vle(w, *id as u64);
                key.encode(w);
            },
            Self::ForgetResource { id } => {
                w.write_u8(header::DECL_FORGET_RESOURCE);
                prim::write_vle(w, *id as u64);
            },
            Self::Publisher { id, key } => {
                w.write_u8(header::DECL_PUBLISHER);
                prim::write_vle(w, *id as u64);
                key.encode(w);
            },
            Self::ForgetPublisher { id } => {
                w.write_u8(header::DECL_FORGET_PUBLISHER);
                prim::write_vle(w, *id as u64);
            },
            Self::Subscriber { id, key } => {
                w.write_u8(header::DECL_SUBSCRIBER);
                prim::write_vle(w, *id as u64);
                key.encode(w);
            },
            Self::ForgetSubscriber { id } => {
                w.write_u8(header::DECL_FORGET_SUBSCRIBER);
                prim::write_vle(w, *id as u64);
            },
            Self::Queryable {
                id,
                key,
                complete,
                distance,
            } => {
                w.write_u8(header::DECL_QUERYABLE);
                prim::write_vle(w, *id as u64);
                key.encode(w);
                w.write_u8(*complete as u8);
                prim::write_vle(w, *distance as u64);
            },
            Self::ForgetQueryable { id } => {
                w.write_u8(header::DECL_FORGET_QUERYABLE);
                prim::write_vle(w, *id as u64);
            },
            Self::Token { id, key } => {
                w.write_u8(header::DECL_TOKEN);
                prim::write_vle(w, *id as u64);
                key.encode(w);
            },
            Self::ForgetToken { id } => {
                w.write_u8(header::DECL_FORGET_TOKEN);
                prim::write_vle(w, *id as u64);
            },
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let decl_id = r.read_u8()?;
        Ok(match decl_id {
            header::DECL_RESOURCE => Self::Resource {
                id: prim::read_vle_u16(r)?,
                key: WireExpr::decode(r)?,
            },
            header::DECL_FORGET_RESOURCE => Self::ForgetResource {
                id: prim::read_vle_u16(r)?,
            },
            header::DECL_PUBLISHER => Self::Publisher {
                id: prim::read_vle_u32(r)?,
                key: WireExpr::decode(r)?,
            },
            header::DECL_FORGET_PUBLISHER => Self::ForgetPublisher {
                id: prim::read_vle_u32(r)?,
            },
            header::DECL_SUBSCRIBER => Self::Subscriber {
                id: prim::read_vle_u32(r)?,
                key: WireExpr::decode(r)?,
            },
            header::DECL_FORGET_SUBSCRIBER => Self::ForgetSubscriber {
                id: prim::read_vle_u32(r)?,
            },
            header::DECL_QUERYABLE => Self::Queryable {
                id: prim::read_vle_u32(r)?,
                key: WireExpr::decode(r)?,
                complete: r.read_u8()? != 0,
                distance: prim::read_vle_u16(r)?,
            },
            header::DECL_FORGET_QUERYABLE => Self::ForgetQueryable {
                id: prim::read_vle_u32(r)?,
            },
            header::DECL_TOKEN => Self::Token {
                id: prim::read_vle_u32(r)?,
                key: WireExpr::decode(r)?,
            },
            header::DECL_FORGET_TOKEN => Self::ForgetToken {
                id: prim::read_vle_u32(r)?,
            },
            _ => return Err(ZError::MalformedPacket),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Declare(Declaration),
    Push {
        key: WireExpr,
        mapping: Mapping,
        body: PushBody,
    },
    Request {
        id: u32,
        key: WireExpr,
        mapping: Mapping,
        body: RequestBody,
    },
    Response {
        id: u32,
        key: WireExpr,
        mapping: Mapping,
        body: ResponseBody,
    },
    ResponseFinal {
        id: u32,
    },
}

fn encode_keyed_header(mid: u8, key: &WireExpr, mapping: Mapping) -> u8 {
    let mut h = mid;
    header::with_flag(&mut h, header::FLAG_N_N, key.has_suffix());
    header::with_flag(&mut h, header::FLAG_N_M, mapping == Mapping::Remote);
    h
}

fn decode_keyed(r: &mut Reader<'_>, h: u8) -> Result<(WireExpr, Mapping), ZError> {
    let scope = prim::read_vle_u16(r)?;
    let suffix = if header::has_flag(h, header::FLAG_N_N) {
        prim::read_string(r)?
    } else {
        String::new()
    };
    let mapping = if header::has_flag(h, header::FLAG_N_M) {
        Mapping::Remote
    } else {
        Mapping::Local
    };
    Ok((WireExpr { scope, suffix }, mapping))
}

impl NetworkMessage {
    pub fn encode(&self, w: &mut Writer) -> Result<(), ZError> {
        match self {
            Self::Declare(decl) => {
                w.write_u8(header::MID_N_DECLARE);
                decl.encode(w);
            },
            Self::Push { key, mapping, body } => {
                w.write_u8(encode_keyed_header(header::MID_N_PUSH, key, *mapping));
                key.encode_scope(w);
                if key.has_suffix() {
                    prim::write_string(w, &key.suffix);
                }
                body.encode(w)?;
            },
            Self::Request {
                id,
                key,
                mapping,
                body,
            } => {
                w.write_u8(encode_keyed_header(header::MID_N_REQUEST, key, *mapping));
                prim::write_vle(w, *id as u64);
                key.encode_scope(w);
                if key.has_suffix() {
                    prim::write_string(w, &key.suffix);
                }
                body.encode(w)?;
            },
            Self::Response {
                id,
                key,
                mapping,
                body,
            } => {
                w.write_u8(encode_keyed_header(header::MID_N_RESPONSE, key, *mapping));
                prim::write_vle(w, *id as u64);
                key.encode_scope(w);
                if key.has_suffix() {
                    prim::write_string(w, &key.suffix);
                }
                body.encode(w)?;
            },
            Self::ResponseFinal { id } => {
                w.write_u8(header::MID_N_RESPONSE_FINAL);
                prim::write_vle(w, *id as u64);
            },
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let h = r.read_u8()?;
        let msg = match header::mid(h) {
            header::MID_N_DECLARE => Self::Declare(Declaration::decode(r)?),
            header::MID_N_PUSH => {
                let (key, mapping) = decode_keyed(r, h)?;
                Self::Push {
                    key,
                    mapping,
                    body: PushBody::decode(r)?,
                }
            },
            header::MID_N_REQUEST => {
                let id = prim::read_vle_u32(r)?;
                let (key, mapping) = decode_keyed(r, h)?;
                Self::Request {
                    id,
                    key,
                    mapping,
                    body: RequestBody::decode(r)?,
                }
            },
            header::MID_N_RESPONSE => {
                let id = prim::read_vle_u32(r)?;
                let (key, mapping) = decode_keyed(r, h)?;
                Self::Response {
                    id,
                    key,
                    mapping,
                    body: ResponseBody::decode(r)?,
                }
            },
            header::MID_N_RESPONSE_FINAL => Self::ResponseFinal {
                id: prim::read_vle_u32(r)?,
            },
            _ => return Err(ZError::MalformedPacket),
        };
        ext::skip_if_present(r, header::has_flag(h, header::FLAG_Z))?;
        Ok(msg)
    }
}
