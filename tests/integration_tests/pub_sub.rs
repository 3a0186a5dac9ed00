// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Result, bail};
use serial_test::serial;
use tokio::time::timeout;
use zenoh_client_rs::{
    handlers::{
        Handler,
        channel::{DropPolicy, fifo_channel},
    },
    keyexpr::Mapping,
    proto::network::{Declaration, NetworkMessage},
    session::{SampleKind, session::Session},
};

use crate::integration_tests::common::{MockRouter, test_config};

#[tokio::test]
#[serial]
async fn test_publish_subscribe_end_to_end() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    // Subscriber side.
    let accept = tokio::spawn(async move { router.accept().await });
    let sub_session = Session::open(test_config(&locator)).await?;
    let (mut sub_link, _) = timeout(Duration::from_secs(5), accept).await???;

    let (tx, rx) = fifo_channel(8, DropPolicy::BlockOnFull);
    let subscriber = sub_session
        .declare_subscriber("demo/example/**", Handler::Fifo(tx))
        .await?;

    // The router observes the declaration before any sample.
    let declare = timeout(Duration::from_secs(5), sub_link.read_network()).await??;
    let NetworkMessage::Declare(Declaration::Subscriber { id, key }) = declare else {
        bail!("expected a subscriber declaration, got {declare:?}");
    };
    assert_eq!(id, subscriber.id());
    assert_eq!(key.suffix, "demo/example/**");

    // Route one matching and one non-matching sample back.
    sub_link
        .send_frame(NetworkMessage::Push {
            key: zenoh_client_rs::proto::core::WireExpr::new(0, "demo/example/a"),
            mapping: Mapping::Remote,
            body: zenoh_client_rs::proto::zenoh::PushBody::Put {
                payload: bytes::Bytes::from_static(b"hi"),
            },
        })
        .await?;
    sub_link
        .send_frame(NetworkMessage::Push {
            key: zenoh_client_rs::proto::core::WireExpr::new(0, "other/key"),
            mapping: Mapping::Remote,
            body: zenoh_client_rs::proto::zenoh::PushBody::Put {
                payload: bytes::Bytes::from_static(b"nope"),
            },
        })
        .await?;

    let sample = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("one sample must arrive");
    assert_eq!(sample.keyexpr, "demo/example/a");
    assert_eq!(&sample.payload[..], &[0x68, 0x69]);
    assert_eq!(sample.kind, SampleKind::Put);

    // The non-matching sample was filtered out.
    assert!(rx.try_recv().is_none());

    sub_session.close().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_publisher_emits_push() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let publisher = session.declare_publisher("demo/example/a").await?;
    let declare = timeout(Duration::from_secs(5), link.read_network()).await??;
    let NetworkMessage::Declare(Declaration::Publisher { key, .. }) = declare else {
        bail!("expected a publisher declaration, got {declare:?}");
    };
    assert_eq!(key.suffix, "demo/example/a");

    publisher.put(bytes::Bytes::from_static(b"hi")).await?;
    let push = timeout(Duration::from_secs(5), link.read_network()).await??;
    let NetworkMessage::Push { key, body, .. } = push else {
        bail!("expected a push, got {push:?}");
    };
    assert_eq!(key.suffix, "demo/example/a");
    assert_eq!(
        body,
        zenoh_client_rs::proto::zenoh::PushBody::Put {
            payload: bytes::Bytes::from_static(b"hi"),
        }
    );

    publisher.delete().await?;
    let push = timeout(Duration::from_secs(5), link.read_network()).await??;
    let NetworkMessage::Push { body, .. } = push else {
        bail!("expected a push, got {push:?}");
    };
    assert_eq!(body, zenoh_client_rs::proto::zenoh::PushBody::Del);

    session.close().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_undeclare_subscriber_sends_forget() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let (tx, rx) = fifo_channel(8, DropPolicy::BlockOnFull);
    let subscriber = session
        .declare_subscriber("demo/**", Handler::Fifo(tx))
        .await?;
    let sub_id = subscriber.id();
    let _ = timeout(Duration::from_secs(5), link.read_network()).await??;

    subscriber.undeclare().await?;
    let forget = timeout(Duration::from_secs(5), link.read_network()).await??;
    let NetworkMessage::Declare(Declaration::ForgetSubscriber { id }) = forget else {
        bail!("expected a forget declaration, got {forget:?}");
    };
    assert_eq!(id, sub_id);

    // The channel was closed by the undeclaration.
    assert_eq!(timeout(Duration::from_secs(1), rx.recv()).await?, None);

    session.close().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_scoped_sample_resolves_through_declared_resource() -> Result<()> {
    let router = MockRouter::bind().await?;
    let locator = router.locator.clone();

    let accept = tokio::spawn(async move { router.accept().await });
    let session = Session::open(test_config(&locator)).await?;
    let (mut link, _) = timeout(Duration::from_secs(5), accept).await???;

    let (tx, rx) = fifo_channel(8, DropPolicy::BlockOnFull);
    session
        .declare_subscriber("demo/example/**", Handler::Fifo(tx))
        .await?;
    let _ = timeout(Duration::from_secs(5), link.read_network()).await??;

    // The router declares resource 7 = "demo/example/" and pushes a
    // sample compressed against it.
    link.send_frame(NetworkMessage::Declare(Declaration::Resource {
        id: 7,
        key: zenoh_client_rs::proto::core::WireExpr::new(0, "demo/example/"),
    }))
    .await?;
    link.send_frame(NetworkMessage::Push {
        key: zenoh_client_rs::proto::core::WireExpr::new(7, "a"),
        mapping: Mapping::Remote,
        body: zenoh_client_rs::proto::zenoh::PushBody::Put {
            payload: bytes::Bytes::from_static(b"hi"),
        },
    })
    .await?;

    let sample = timeout(Duration::from_secs(5), rx.recv())
        .await?
        .expect("resolved sample must arrive");
    assert_eq!(sample.keyexpr, "demo/example/a");
    assert_eq!(&sample.payload[..], b"hi");

    session.close().await;
    Ok(())
}
