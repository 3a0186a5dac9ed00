// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use serial_test::serial;
use tokio::net::UdpSocket;
use zenoh_client_rs::{
    cfg::config::Config,
    codec::buf::{Reader, Writer},
    proto::{
        core::{PROTOCOL_VERSION, WhatAmI},
        scouting::{Hello, ScoutingMessage},
    },
    session::scout::scout,
    utils::generate_zid,
};

use crate::integration_tests::common::router_zid;

/// A one-shot Hello responder standing in for a router's scouting
/// listener. Plain UDP: the multicast address form is exercised at the
/// locator level, delivery-wise unicast behaves the same here.
async fn spawn_responder(locators: Vec<String>) -> Result<(String, tokio::task::JoinHandle<Result<ScoutingMessage>>)> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let address = format!("udp/{}", socket.local_addr()?);
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        let (n, from) = socket.recv_from(&mut buf).await?;
        let mut r = Reader::new(&buf[..n]);
        let scout_msg = ScoutingMessage::decode(&mut r)?;

        let mut w = Writer::new();
        ScoutingMessage::Hello(Hello {
            version: PROTOCOL_VERSION,
            whatami: WhatAmI::ROUTER,
            zid: router_zid(),
            locators,
        })
        .encode(&mut w)?;
        socket.send_to(w.as_slice(), from).await?;
        Ok(scout_msg)
    });
    Ok((address, handle))
}

#[tokio::test]
#[serial]
async fn test_scout_hello_exchange() -> Result<()> {
    let (address, responder) =
        spawn_responder(vec!["tcp/127.0.0.1:7447".to_string()]).await?;

    let mut cfg = Config::default();
    cfg.scouting.multicast_address = address;
    cfg.scouting.timeout_ms = 1_000;

    let (zid, _) = generate_zid();
    let hello = scout(&cfg, WhatAmI::ROUTER | WhatAmI::PEER, Some(zid))
        .await?
        .expect("responder must be found");
    assert_eq!(hello.version, PROTOCOL_VERSION);
    assert_eq!(hello.whatami, WhatAmI::ROUTER);
    assert_eq!(hello.zid, router_zid());
    assert_eq!(hello.locators, vec!["tcp/127.0.0.1:7447".to_string()]);

    // The responder saw our Scout with the id attached.
    let observed = responder.await??;
    let ScoutingMessage::Scout(observed) = observed else {
        bail!("responder captured a non-Scout message");
    };
    assert_eq!(observed.version, PROTOCOL_VERSION);
    assert_eq!(observed.what, WhatAmI::ROUTER | WhatAmI::PEER);
    assert_eq!(observed.zid, Some(zid));
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_scout_times_out_quietly() -> Result<()> {
    // Nobody listens on this socket's address once it is dropped.
    let placeholder = UdpSocket::bind("127.0.0.1:0").await?;
    let address = format!("udp/{}", placeholder.local_addr()?);
    drop(placeholder);

    let mut cfg = Config::default();
    cfg.scouting.multicast_address = address;
    cfg.scouting.timeout_ms = 200;

    let hello = scout(&cfg, WhatAmI::ROUTER, None).await?;
    assert!(hello.is_none());
    Ok(())
}
