// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing::info;
use zenoh_client_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    handlers::{Handler, channel::{DropPolicy, fifo_channel}},
    session::session::Session,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("tests/config_logger.yaml")?;

    // Load config
    let cfg = resolve_config_path("tests/config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    info!("Opening session...");
    let session = Session::open(cfg).await?;

    let keyexpr = "demo/example/**";
    info!("Declaring subscriber on '{keyexpr}'...");
    let (tx, rx) = fifo_channel(16, DropPolicy::BlockOnFull);
    let subscriber = session
        .declare_subscriber(keyexpr, Handler::Fifo(tx))
        .await?;

    while let Some(sample) = rx.recv().await {
        info!(
            "Received ('{}': '{}')",
            sample.keyexpr,
            String::from_utf8_lossy(&sample.payload)
        );
    }

    subscriber.undeclare().await?;
    session.close().await;
    Ok(())
}
