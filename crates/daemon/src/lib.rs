// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IQRF gateway daemon: bridges a serial-attached mesh coordinator to JSON
//! messaging transports through the DPA transaction engine.

pub mod api;
pub mod channel;
pub mod config;
pub mod db;
pub mod dpa;
pub mod error;
pub mod hex;
pub mod sandbox;
pub mod splitter;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::mng::{MngApi, ModeState};
use crate::api::raw::RawApi;
use crate::api::standard::StandardApi;
use crate::channel::cdc::CdcLink;
use crate::channel::{Channel, ChannelLink, ChannelState};
use crate::config::{Cli, DaemonConfig};
use crate::db::Database;
use crate::dpa::engine::DpaEngine;
use crate::sandbox::DriverSandbox;
use crate::splitter::{MessageSplitter, SchemaRegistry};

/// Load the configuration file and run until shutdown.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DaemonConfig::load(&cli.configuration)?;
    let link = Arc::new(CdcLink::open(&config.channel.interface, config.channel.baud_rate)?);
    run_with_link(config, link).await
}

/// Assemble and run the daemon on an already-constructed channel link.
pub async fn run_with_link(
    config: DaemonConfig,
    link: Arc<dyn ChannelLink>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let database = Arc::new(Database::open(&config.database.path)?);

    // Driver sandbox, fed from the stored driver set.
    let sandbox = Arc::new(DriverSandbox::new());
    match database.driver_code_bundle() {
        Ok(code) if !code.trim().is_empty() => {
            if let Err(e) = sandbox.load(code).await {
                tracing::warn!(err = %e, "stored drivers failed to load");
            }
        }
        Ok(_) => tracing::info!("no drivers stored, sandbox starts empty"),
        Err(e) => tracing::warn!(err = %e, "driver read failed, sandbox starts empty"),
    }

    // Channel and engine.
    let channel = Channel::open(
        link,
        config.channel.busy_retries,
        config.channel.busy_backoff(),
        shutdown.child_token(),
    )
    .await;
    if channel.state() == ChannelState::NotReady {
        tracing::warn!(
            interface = %config.channel.interface,
            "channel is not ready, sends will fail until it recovers"
        );
    }
    let engine = DpaEngine::start(
        channel.clone(),
        config.engine.default_timeout_ms,
        config.engine.queue_capacity,
        config.engine.on_channel_down,
        config.engine.rf_mode,
        shutdown.child_token(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("engine start failed: {e}"))?;
    if config.engine.bootstrap && channel.state() == ChannelState::Ready {
        engine.bootstrap().await;
        let params = engine.params().await;
        tracing::info!(
            module_id = params.module_id,
            os_build = params.os_build,
            bonded = params.bonded_devices.len(),
            discovered = params.discovered_devices.len(),
            "coordinator parameters cached"
        );
    }

    // Splitter and API handlers.
    let mut schemas = SchemaRegistry::new();
    if let Some(ref dir) = config.schema_dir {
        schemas.load_dir(dir);
    }
    let splitter = MessageSplitter::new(
        schemas,
        config.api_worker_count(),
        config.transports.queue_capacity,
    );
    let mode = Arc::new(ModeState::default());
    splitter
        .register_handler(
            RawApi::FILTERS,
            Arc::new(RawApi::new(engine.clone(), config.instance_id.clone())),
        )
        .await?;
    splitter
        .register_handler(
            StandardApi::FILTERS,
            Arc::new(StandardApi::new(
                engine.clone(),
                Arc::clone(&sandbox),
                config.instance_id.clone(),
            )),
        )
        .await?;
    splitter
        .register_handler(
            MngApi::FILTERS,
            Arc::new(MngApi::new(Arc::clone(&mode), config.instance_id.clone())),
        )
        .await?;
    api::spawn_async_notifier(engine.clone(), splitter.clone(), shutdown.child_token());

    // Transports last, so nothing arrives before the handlers exist.
    transport::start(
        &config.transports,
        splitter.clone(),
        Arc::clone(&database),
        shutdown.child_token(),
    )
    .await?;

    tracing::info!(instance = %config.instance_id, "iqrf gateway daemon running");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received, shutting down"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
    Ok(())
}
