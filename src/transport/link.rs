// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Locator parsing and the TCP link dialer.

use std::{fmt, net::IpAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use tokio::{net::TcpStream, time::timeout};

use crate::error::ZError;

const KNOWN_PROTOCOLS: &[&str] = &["tcp", "udp", "ws", "serial", "bt", "ble", "raweth"];

/// A parsed locator string `protocol/address[?params]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub protocol: String,
    pub address: String,
    pub params: Option<String>,
}

impl FromStr for Locator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (protocol, rest) = s
            .split_once('/')
            .ok_or_else(|| anyhow!("locator {s:?} is missing a protocol separator"))?;
        if !KNOWN_PROTOCOLS.contains(&protocol) {
            bail!("unknown locator protocol {protocol:?}");
        }
        let (address, params) = match rest.split_once('?') {
            Some((address, params)) => (address, Some(params.to_string())),
            None => (rest, None),
        };
        if address.is_empty() {
            bail!("locator {s:?} has an empty address");
        }
        Ok(Self {
            protocol: protocol.to_string(),
            address: address.to_string(),
            params,
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.address)?;
        if let Some(params) = &self.params {
            write!(f, "?{params}")?;
        }
        Ok(())
    }
}

impl Locator {
    /// Multicast is indicated by the address form, not the protocol.
    pub fn is_multicast(&self) -> bool {
        self.address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.address)
            .trim_matches(['[', ']'])
            .parse::<IpAddr>()
            .map(|ip| ip.is_multicast())
            .unwrap_or(false)
    }

    /// Dial a stream link. Only TCP is dialable from this crate; other
    /// protocols belong to platform back-ends.
    pub async fn connect_stream(&self, deadline: Duration) -> Result<TcpStream> {
        if self.protocol != "tcp" {
            bail!(ZError::Unsupported);
        }
        let stream = timeout(deadline, TcpStream::connect(&self.address))
            .await
            .map_err(|_| ZError::Timeout)
            .with_context(|| format!("connect to {self} timed out"))?
            .with_context(|| format!("failed to connect to {self}"))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}
