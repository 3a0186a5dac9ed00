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
    proto::{
        core::{Channel, CloseReason, WireExpr},
        network::NetworkMessage,
        transport::{Close, Frame, TransportMessage},
        zenoh::PushBody,
    },
    session::session::Session,
};

use crate::integration_tests::common::{MockRouter, RouterLink, test_config};

async fn wait_closed(session: &Session) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !session.is_closed() {
        if tokio::time::Instant::now() > deadline {
            bail!("session never closed");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

fn sample_push(suffix: &str) -> NetworkMessage {
    NetworkMessage::Push {
        key: WireExpr::new(0, suffix),
        mapping: Mapping::Remote,
        body: PushBody::Put {
            payload: Bytes::from_static(b"x"),
        },
    }
}

/// Expect a Close message, tolerating interleaved keep-alives.
async fn read_close(link: &mut RouterLink) -> Result<Close> {
    loop {
        let msg = timeout(Duration::from_secs(5), link.read_message()).await??;
        match msg {
            TransportMessage::KeepAlive => continue,
            TransportMessage::Close(close) => return Ok(close),
            other => bail!("expected Close, got {other:?}"),
        }
    }
}

#[tokio::test]
#[serial]
async fn test_duplicate_reliable_sn_closes_session() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let (tx, _rx) = fifo_channel(4, DropPolicy::DropNew);
    session
        .declare_subscriber("demo/**", Handler::Fifo(tx))
        .await?;
    let _ = timeout(Duration::from_secs(5), link.read_network()).await??;

    // Send sn 0 twice on the reliable channel.
    link.send_frame(sample_push("demo/a")).await?;
    link.write_message(&TransportMessage::Frame(Frame {
        channel: Channel::Reliable,
        sn: 0,
        payload: vec![sample_push("demo/b")],
    }))
    .await?;

    let close = read_close(&mut link).await?;
    assert_eq!(close.reason, CloseReason::Invalid);
    wait_closed(&session).await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_stale_best_effort_sn_is_dropped_silently() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let (tx, rx) = fifo_channel(4, DropPolicy::BlockOnFull);
    session
        .declare_subscriber("demo/**", Handler::Fifo(tx))
        .await?;
    let _ = timeout(Duration::from_secs(5), link.read_network()).await??;

    // Two best-effort frames with the same sequence number: the second
    // is a duplicate and must be dropped without closing anything.
    for suffix in ["demo/a", "demo/a"] {
        link.write_message(&TransportMessage::Frame(Frame {
            channel: Channel::BestEffort,
            sn: 0,
            payload: vec![sample_push(suffix)],
        }))
        .await?;
    }
    // A later in-order frame still arrives.
    link.write_message(&TransportMessage::Frame(Frame {
        channel: Channel::BestEffort,
        sn: 1,
        payload: vec![sample_push("demo/b")],
    }))
    .await?;

    let first = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("first sample");
    assert_eq!(first.keyexpr, "demo/a");
    let second = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("second sample");
    assert_eq!(second.keyexpr, "demo/b");
    assert!(rx.try_recv().is_none(), "duplicate was dropped");
    assert!(!session.is_closed());

    session.close().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_fragment_gap_closes_session() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    // First fragment carries sn 0; the second jumps to sn 5.
    let push = sample_push("demo/gap");
    let mut body = zenoh_client_rs::codec::buf::Writer::new();
    push.encode(&mut body)?;
    let bytes = body.as_slice();
    let mid = bytes.len() / 2;

    link.write_message(&TransportMessage::Fragment(
        zenoh_client_rs::proto::transport::Fragment {
            channel: Channel::Reliable,
            more: true,
            sn: 0,
            payload: Bytes::copy_from_slice(&bytes[..mid]),
        },
    ))
    .await?;
    link.write_message(&TransportMessage::Fragment(
        zenoh_client_rs::proto::transport::Fragment {
            channel: Channel::Reliable,
            more: false,
            sn: 5,
            payload: Bytes::copy_from_slice(&bytes[mid..]),
        },
    ))
    .await?;

    let close = read_close(&mut link).await?;
    assert_eq!(close.reason, CloseReason::Invalid);
    wait_closed(&session).await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_frame_interleaved_with_fragments_closes_session() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let push = sample_push("demo/restart");
    let mut body = zenoh_client_rs::codec::buf::Writer::new();
    push.encode(&mut body)?;

    // Fragmented message left incomplete, then a plain frame.
    link.write_message(&TransportMessage::Fragment(
        zenoh_client_rs::proto::transport::Fragment {
            channel: Channel::Reliable,
            more: true,
            sn: 0,
            payload: Bytes::copy_from_slice(body.as_slice()),
        },
    ))
    .await?;
    link.write_message(&TransportMessage::Frame(Frame {
        channel: Channel::Reliable,
        sn: 1,
        payload: vec![sample_push("demo/other")],
    }))
    .await?;

    let close = read_close(&mut link).await?;
    assert_eq!(close.reason, CloseReason::Invalid);
    wait_closed(&session).await?;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_peer_close_is_observed() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    link.write_message(&TransportMessage::Close(Close {
        reason: CloseReason::Generic,
        session: true,
    }))
    .await?;

    wait_closed(&session).await?;

    // Sends after the close fail cleanly.
    let err = session
        .put("demo/after", Bytes::from_static(b"x"))
        .await
        .expect_err("session is closed");
    assert!(err.to_string().contains("closed") || err.downcast_ref::<zenoh_client_rs::error::ZError>().is_some());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_oversized_defrag_closes_session() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let mut cfg = test_config(&locator);
    cfg.session.fragment_reassembly_max_bytes = 1024;

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(cfg).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    // Feed fragments past the reassembly bound.
    for sn in 0..3u64 {
        link.write_message(&TransportMessage::Fragment(
            zenoh_client_rs::proto::transport::Fragment {
                channel: Channel::Reliable,
                more: true,
                sn,
                payload: Bytes::from(vec![0u8; 512]),
            },
        ))
        .await?;
    }

    let close = read_close(&mut link).await?;
    assert_eq!(close.reason, CloseReason::Invalid);
    wait_closed(&session).await?;
    Ok(())
}
