// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{cfg::enums::Mode, proto::core::Resolution};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Parameters that travel over the wire during Init/Open negotiation.
    pub session: SessionConfig,
    /// Peer discovery settings used before a link exists.
    pub scouting: ScoutingConfig,
    /// Implementation/runtime parameters that never reach the wire.
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Session identity and negotiated transport limits.
pub struct SessionConfig {
    #[serde(rename = "Mode")]
    /// Role taken when opening the session (client or peer).
    pub mode: Mode,

    #[serde(default, rename = "Connect")]
    /// Locators dialed at open, tried in order.
    pub connect: Vec<String>,

    #[serde(default, rename = "Listen")]
    /// Local locators to bind (peer mode only).
    pub listen: Vec<String>,

    #[serde(rename = "BatchSize")]
    /// Largest transport message this side is willing to receive.
    pub batch_size: u16,

    #[serde(rename = "LeaseMs")]
    /// Lease duration advertised to the peer, in milliseconds.
    pub lease_ms: u32,

    #[serde(rename = "SequenceNumberResolution")]
    /// Proposed sequence-number width class, one of {8, 16, 32, 64}.
    pub sequence_number_resolution: u8,

    #[serde(rename = "RequestIdResolution")]
    /// Proposed request-id width class, one of {8, 16, 32, 64}.
    pub request_id_resolution: u8,

    #[serde(rename = "FragmentReassemblyMaxBytes")]
    /// Upper bound on a defragmentation buffer before the transport is
    /// closed as invalid.
    pub fragment_reassembly_max_bytes: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Scouting knobs.
pub struct ScoutingConfig {
    #[serde(rename = "MulticastAddress")]
    /// Locator the Scout datagram is sent to.
    pub multicast_address: String,

    #[serde(rename = "TimeoutMs")]
    /// How long to wait for Hello answers.
    pub timeout_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings.
pub struct RuntimeConfig {
    #[serde(rename = "ConnectTimeout", with = "serde_secs")]
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    #[serde(rename = "HandshakeTimeout", with = "serde_secs")]
    /// Per-step timeout of the Init/Open handshake.
    pub handshake_timeout: Duration,

    #[serde(rename = "QueryTimeout", with = "serde_secs")]
    /// Default deadline applied to `get` when the caller gives none.
    pub query_timeout: Duration,

    #[serde(rename = "KeCacheCapacity")]
    /// Entries kept by the key-expression resolution cache.
    pub ke_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                mode: Mode::Client,
                connect: Vec::new(),
                listen: Vec::new(),
                batch_size: u16::MAX,
                lease_ms: 10_000,
                sequence_number_resolution: 32,
                request_id_resolution: 32,
                fragment_reassembly_max_bytes: 1 << 20,
            },
            scouting: ScoutingConfig {
                multicast_address: "udp/224.0.0.224:7446".to_string(),
                timeout_ms: 1_000,
            },
            runtime: RuntimeConfig {
                connect_timeout: Duration::from_secs(10),
                handshake_timeout: Duration::from_secs(3),
                query_timeout: Duration::from_secs(10),
                ke_cache_capacity: 64,
            },
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.session.batch_size > 0, "BatchSize must be > 0");
        ensure!(self.session.lease_ms > 0, "LeaseMs must be > 0");
        ensure!(
            matches!(self.session.sequence_number_resolution, 8 | 16 | 32 | 64),
            "SequenceNumberResolution must be one of 8, 16, 32, 64"
        );
        ensure!(
            matches!(self.session.request_id_resolution, 8 | 16 | 32 | 64),
            "RequestIdResolution must be one of 8, 16, 32, 64"
        );
        ensure!(
            self.session.fragment_reassembly_max_bytes > 0,
            "FragmentReassemblyMaxBytes must be > 0"
        );

        match self.session.mode {
            Mode::Client => {
                // A client with no configured endpoint falls back to
                // scouting, so an empty connect list is allowed.
                ensure!(
                    self.session.listen.is_empty(),
                    "Listen is only valid in peer mode"
                );
            },
            Mode::Peer => {
                ensure!(
                    !self.session.listen.is_empty() || !self.session.connect.is_empty(),
                    "peer mode needs Listen or Connect locators"
                );
            },
        }

        ensure!(
            self.runtime.ke_cache_capacity > 0,
            "KeCacheCapacity must be > 0"
        );
        Ok(())
    }

    pub fn sn_resolution(&self) -> Resolution {
        // Validated above; an invalid width cannot reach here.
        Resolution::from_width_bits(self.session.sequence_number_resolution)
            .unwrap_or_default()
    }

    pub fn request_id_resolution(&self) -> Resolution {
        Resolution::from_width_bits(self.session.request_id_resolution).unwrap_or_default()
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.session.lease_ms as u64)
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
