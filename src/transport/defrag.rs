// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Receive-side reassembly: the length-prefixed stream deframer and the
//! per-channel fragment buffer.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::ZError;

/// Accumulates raw stream bytes and yields one length-prefixed message
/// at a time, regardless of how the transport segmented them.
#[derive(Debug, Default)]
pub struct StreamDeframer {
    acc: BytesMut,
}

impl StreamDeframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.acc.extend_from_slice(chunk);
    }

    /// Next complete message body, without its length prefix. `None`
    /// while the accumulator holds only a partial message.
    pub fn next_message(&mut self) -> Option<Bytes> {
        if self.acc.len() < 2 {
            return None;
        }
        let len = u16::from_le_bytes([self.acc[0], self.acc[1]]) as usize;
        if self.acc.len() < 2 + len {
            return None;
        }
        self.acc.advance(2);
        Some(self.acc.split_to(len).freeze())
    }
}

/// Per-channel fragment reassembly buffer.
///
/// Fragment payloads are concatenated until the final fragment arrives.
/// A buffer growing past `max_size` is a protocol violation and
/// invalidates the transport.
#[derive(Debug)]
pub struct DefragBuffer {
    buf: BytesMut,
    active: bool,
    max_size: usize,
}

impl DefragBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            active: false,
            max_size,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Append one fragment payload. Returns the reassembled message once
    /// the fragment with `more == false` lands.
    pub fn push(&mut self, payload: &[u8], more: bool) -> Result<Option<Bytes>, ZError> {
        if self.buf.len() + payload.len() > self.max_size {
            self.reset();
            return Err(ZError::Overflow);
        }
        self.buf.extend_from_slice(payload);
        self.active = true;
        if more {
            return Ok(None);
        }
        self.active = false;
        Ok(Some(self.buf.split().freeze()))
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.active = false;
    }
}
