// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::proto::core::WhatAmI;

/// Session role enumeration.
///
/// A client leans on one router (or peer) for all routing; a peer
/// additionally accepts incoming links on its listen locators.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    #[serde(rename = "client", alias = "Client", alias = "CLIENT")]
    Client,
    #[serde(rename = "peer", alias = "Peer", alias = "PEER")]
    Peer,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Client => "client",
            Mode::Peer => "peer",
        })
    }
}

impl Mode {
    pub fn whatami(self) -> WhatAmI {
        match self {
            Mode::Client => WhatAmI::CLIENT,
            Mode::Peer => WhatAmI::PEER,
        }
    }
}
