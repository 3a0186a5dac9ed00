// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scouting: locate peers over UDP before any session exists.

use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result, bail};
use tokio::{net::UdpSocket, time::timeout};
use tracing::debug;

use crate::{
    cfg::config::Config,
    codec::buf::{Reader, Writer},
    error::ZError,
    proto::{
        core::{PROTOCOL_VERSION, WhatAmI, ZenohId},
        scouting::{Hello, Scout, ScoutingMessage},
    },
    transport::link::Locator,
};

/// Send one Scout datagram and wait for the first matching Hello, up to
/// the configured scouting timeout.
pub async fn scout(
    cfg: &Config,
    what: WhatAmI,
    zid: Option<ZenohId>,
) -> Result<Option<Hello>> {
    let locator = Locator::from_str(&cfg.scouting.multicast_address)?;
    if locator.protocol != "udp" {
        bail!(ZError::Unsupported);
    }

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind scouting socket")?;

    let mut w = Writer::new();
    ScoutingMessage::Scout(Scout {
        version: PROTOCOL_VERSION,
        what,
        zid,
    })
    .encode(&mut w)?;
    socket
        .send_to(w.as_slice(), &locator.address)
        .await
        .context("failed to send scout")?;
    debug!(to = %locator, "scout sent");

    let deadline = Duration::from_millis(cfg.scouting.timeout_ms);
    let mut buf = [0u8; 2048];
    let until = tokio::time::Instant::now() + deadline;
    loop {
        let remaining = until.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let Ok(received) = timeout(remaining, socket.recv_from(&mut buf)).await else {
            return Ok(None);
        };
        let (n, from) = received.context("scouting socket failed")?;
        let mut reader = Reader::new(&buf[..n]);
        match ScoutingMessage::decode(&mut reader) {
            Ok(ScoutingMessage::Hello(hello)) => {
                if hello.whatami.intersects(what) {
                    debug!(%from, zid = %hello.zid, "hello received");
                    return Ok(Some(hello));
                }
            },
            Ok(ScoutingMessage::Scout(_)) => {},
            Err(e) => debug!(%from, "ignoring malformed scouting datagram: {e}"),
        }
    }
}
