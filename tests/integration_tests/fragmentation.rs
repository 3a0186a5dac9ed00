// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Result, bail};
use bytes::Bytes;
use serial_test::serial;
use tokio::time::timeout;
use zenoh_client_rs::{
    handlers::{
        Handler,
        channel::{DropPolicy, fifo_channel},
    },
    keyexpr::Mapping,
    proto::{core::WireExpr, network::NetworkMessage, zenoh::PushBody},
    session::session::Session,
};

use crate::integration_tests::common::{MockRouter, test_config};

#[tokio::test]
#[serial]
async fn test_incoming_fragments_reassemble() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let (tx, rx) = fifo_channel(4, DropPolicy::BlockOnFull);
    session
        .declare_subscriber("demo/big/**", Handler::Fifo(tx))
        .await?;
    let _ = timeout(Duration::from_secs(5), link.read_network()).await??;

    // A payload far beyond any single chunk, delivered in 512-byte
    // fragments.
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let push = NetworkMessage::Push {
        key: WireExpr::new(0, "demo/big/blob"),
        mapping: Mapping::Remote,
        body: PushBody::Put {
            payload: Bytes::from(payload.clone()),
        },
    };
    link.send_fragmented(&push, 512).await?;

    let sample = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("reassembled sample must arrive");
    assert_eq!(sample.keyexpr, "demo/big/blob");
    assert_eq!(&sample.payload[..], &payload[..]);

    session.close().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_outgoing_oversized_put_is_fragmented() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    // Shrink the negotiated batch so a modest payload must fragment.
    let mut cfg = test_config(&locator);
    cfg.session.batch_size = 1024;

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(cfg).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    session
        .put("demo/big/out", Bytes::from(payload.clone()))
        .await?;

    // Collect fragments until the More flag clears, then decode the
    // reassembled network message.
    let mut reassembled = Vec::new();
    let mut fragments = 0usize;
    let mut expected_sn: Option<u64> = None;
    loop {
        let msg = timeout(
            Duration::from_secs(5),
            link.read_message_skip_keepalive(),
        )
        .await??;
        let zenoh_client_rs::proto::transport::TransportMessage::Fragment(frag) = msg
        else {
            bail!("expected a fragment, got {msg:?}");
        };
        if let Some(expected) = expected_sn {
            assert_eq!(frag.sn, expected, "fragment sequence numbers ascend");
        }
        expected_sn = Some(frag.sn + 1);
        fragments += 1;
        reassembled.extend_from_slice(&frag.payload);
        if !frag.more {
            break;
        }
    }
    assert!(fragments > 1, "payload must span multiple fragments");

    let mut r = zenoh_client_rs::codec::buf::Reader::new(&reassembled);
    let decoded = NetworkMessage::decode(&mut r)?;
    let NetworkMessage::Push { key, body, .. } = decoded else {
        bail!("expected a push");
    };
    assert_eq!(key.suffix, "demo/big/out");
    assert_eq!(
        body,
        PushBody::Put {
            payload: Bytes::from(payload),
        }
    );

    session.close().await;
    Ok(())
}
