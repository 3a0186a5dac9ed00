// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Zenoh-layer message bodies carried inside Push, Request and Response.

use bytes::Bytes;

use crate::{
    codec::{
        buf::{Reader, Writer},
        prim,
    },
    error::ZError,
    proto::{ext, header},
};

/// Body of a Push: a sample to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushBody {
    /// A value written to the key expression.
    Put { payload: Bytes },
    /// A deletion of the key expression; carries no payload.
    Del,
}

impl PushBody {
    pub fn encode(&self, w: &mut Writer) -> Result<(), ZError> {
        match self {
            Self::Put { payload } => {
                w.write_u8(header::MID_Z_DATA);
                prim::write_bytes(w, payload);
            },
            Self::Del => {
                w.write_u8(header::MID_Z_DATA | header::FLAG_Z_DATA_D);
            },
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let h = r.read_u8()?;
        if header::mid(h) != header::MID_Z_DATA {
            return Err(ZError::MalformedPacket);
        }
        let body = if header::has_flag(h, header::FLAG_Z_DATA_D) {
            Self::Del
        } else {
            Self::Put {
                payload: Bytes::copy_from_slice(prim::read_bytes(r)?),
            }
        };
        ext::skip_if_present(r, header::has_flag(h, header::FLAG_Z))?;
        Ok(body)
    }
}

/// Body of a Request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Query {
        parameters: String,
        payload: Option<Bytes>,
    },
    /// Pull of a pull-mode subscription; kept for wire completeness.
    Pull,
}

impl RequestBody {
    pub fn encode(&self, w: &mut Writer) -> Result<(), ZError> {
        match self {
            Self::Query {
                parameters,
                payload,
            } => {
                let mut h = header::MID_Z_QUERY;
                header::with_flag(&mut h, header::FLAG_Z_QUERY_B, payload.is_some());
                w.write_u8(h);
                prim::write_string(w, parameters);
                if let Some(payload) = payload {
                    prim::write_bytes(w, payload);
                }
            },
            Self::Pull => {
                w.write_u8(header::MID_Z_PULL);
            },
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let h = r.read_u8()?;
        let body = match header::mid(h) {
            header::MID_Z_QUERY => {
                let parameters = prim::read_string(r)?;
                let payload = if header::has_flag(h, header::FLAG_Z_QUERY_B) {
                    Some(Bytes::copy_from_slice(prim::read_bytes(r)?))
                } else {
                    None
                };
                Self::Query {
                    parameters,
                    payload,
                }
            },
            header::MID_Z_PULL => Self::Pull,
            _ => return Err(ZError::MalformedPacket),
        };
        ext::skip_if_present(r, header::has_flag(h, header::FLAG_Z))?;
        Ok(body)
    }
}

/// Body of a Response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Reply { payload: Bytes },
    Err { payload: Bytes },
    /// Acknowledgment without data; kept for wire completeness.
    Ack,
}

impl ResponseBody {
    pub fn encode(&self, w: &mut Writer) -> Result<(), ZError> {
        match self {
            Self::Reply { payload } => {
                w.write_u8(header::MID_Z_REPLY);
                prim::write_bytes(w, payload);
            },
            Self::Err { payload } => {
                w.write_u8(header::MID_Z_ERR);
                prim::write_bytes(w, payload);
            },
            Self::Ack => {
                w.write_u8(header::MID_Z_ACK);
            },
        }
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, ZError> {
        let h = r.read_u8()?;
        let body = match header::mid(h) {
            header::MID_Z_REPLY => Self::Reply {
                payload: Bytes::copy_from_slice(prim::read_bytes(r)?),
            },
            header::MID_Z_ERR => Self::Err {
                payload: Bytes::copy_from_slice(prim::read_bytes(r)?),
            },
            header::MID_Z_ACK => Self::Ack,
            _ => return Err(ZError::MalformedPacket),
        };
        ext::skip_if_present(r, header::has_flag(h, header::FLAG_Z))?;
        Ok(body)
    }
}
