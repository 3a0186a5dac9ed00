// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

/// Error kinds shared by the codec, collections, transport and session
/// layers.
///
/// Fallible APIs return `anyhow::Result`; a `ZError` is attached as the
/// source so callers that care about the kind can recover it with
/// `err.downcast_ref::<ZError>()`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ZError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid input")]
    InvalidInput,
    #[error("malformed packet")]
    MalformedPacket,
    #[error("not enough data")]
    NotEnoughData,
    #[error("invalid key expression")]
    InvalidKeyExpression,
    #[error("unknown resource id")]
    UnknownResource,
    #[error("entity declaration failed")]
    EntityDeclarationFailed,
    #[error("unknown entity")]
    EntityUnknown,
    #[error("query does not match any local entity")]
    QueryNotMatch,
    #[error("collection overflow")]
    Overflow,
    #[error("session closed")]
    SessionClosed,
    #[error("timeout")]
    Timeout,
    #[error("link error")]
    LinkError,
    #[error("unsupported")]
    Unsupported,
}
