// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::{io::AsyncReadExt, net::tcp::OwnedReadHalf, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::buf::Reader,
    error::ZError,
    proto::transport::TransportMessage,
};

pub(super) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(anyhow!(ZError::SessionClosed).context(format!("{label} cancelled"))),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(anyhow::Error::new(e).context(ZError::LinkError)),
                Err(_) => Err(anyhow!(ZError::Timeout).context(format!("{label} timeout"))),
            }
        }
    }
}

/// Read one length-prefixed transport message straight off a read half.
/// Used during the handshake, before the read task owns the socket.
pub(super) async fn read_message_direct(
    r: &mut OwnedReadHalf,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TransportMessage> {
    let mut len_buf = [0u8; 2];
    io_with_timeout("read length prefix", r.read_exact(&mut len_buf), io_timeout, cancel)
        .await?;
    let len = u16::from_le_bytes(len_buf) as usize;

    let mut body = vec![0u8; len];
    io_with_timeout("read message body", r.read_exact(&mut body), io_timeout, cancel)
        .await?;

    let mut reader = Reader::new(&body);
    Ok(TransportMessage::decode(&mut reader)?)
}
