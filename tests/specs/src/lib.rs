// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process gateway harness for the end-to-end scenario suite.
//!
//! Assembles the real engine, sandbox, splitter, and API handlers over the
//! simulation channel link; tests act as the device on one side and as a
//! messaging transport on the other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use iqrfgd::api::mng::{MngApi, ModeState};
use iqrfgd::api::raw::RawApi;
use iqrfgd::api::standard::StandardApi;
use iqrfgd::channel::sim::SimLink;
use iqrfgd::channel::{Channel, ChannelLink};
use iqrfgd::config::OnChannelDown;
use iqrfgd::dpa::engine::DpaEngine;
use iqrfgd::dpa::params::RfMode;
use iqrfgd::sandbox::DriverSandbox;
use iqrfgd::splitter::{MessageSplitter, SchemaRegistry};

/// Test drivers for the coordinator AddrInfo flow: `devNr` decodes from the
/// DPA value byte, `did` from the second response byte.
pub const ADDR_INFO_DRIVERS: &str = r#"
var iqrf = {
    embed: {
        coordinator: {
            AddrInfo_Request_req: function (p) {
                return { pnum: "00", pcmd: "00", rdata: "" };
            },
            AddrInfo_Response_rsp: function (p) {
                var bytes = p.rdata === "" ? [] : p.rdata.split(".");
                return {
                    devNr: parseInt(p.dpaval, 16),
                    did: bytes.length > 1 ? parseInt(bytes[1], 16) : 0
                };
            }
        }
    }
};
"#;

pub struct Gateway {
    pub splitter: MessageSplitter,
    pub engine: DpaEngine,
    pub link: Arc<SimLink>,
    pub cancel: CancellationToken,
}

impl Gateway {
    /// Build a full in-process gateway. Returns the harness plus the stream
    /// of frames the daemon writes to the simulated device.
    pub async fn start(
        schemas: SchemaRegistry,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>)> {
        let (link, writes) = SimLink::new();
        let cancel = CancellationToken::new();

        let channel = Channel::open(
            Arc::clone(&link) as Arc<dyn ChannelLink>,
            4,
            Duration::from_millis(100),
            cancel.clone(),
        )
        .await;
        let engine = DpaEngine::start(
            channel,
            500,
            32,
            OnChannelDown::Hold,
            RfMode::Std,
            cancel.clone(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("engine start failed: {e}"))?;

        let sandbox = Arc::new(DriverSandbox::new());
        sandbox.load(ADDR_INFO_DRIVERS.to_owned()).await?;

        let splitter = MessageSplitter::new(schemas, 4, 16);
        let instance = "iqrfgd2-test".to_owned();
        splitter
            .register_handler(RawApi::FILTERS, Arc::new(RawApi::new(engine.clone(), instance.clone())))
            .await?;
        splitter
            .register_handler(
                StandardApi::FILTERS,
                Arc::new(StandardApi::new(engine.clone(), sandbox, instance.clone())),
            )
            .await?;
        splitter
            .register_handler(
                MngApi::FILTERS,
                Arc::new(MngApi::new(Arc::new(ModeState::default()), instance)),
            )
            .await?;
        iqrfgd::api::spawn_async_notifier(engine.clone(), splitter.clone(), cancel.child_token());

        Ok((Self { splitter, engine, link, cancel }, writes))
    }

    /// Register a test transport and return its outbound stream.
    pub async fn transport(&self, id: &str) -> mpsc::Receiver<serde_json::Value> {
        self.splitter.register_transport(id).await
    }

    /// Push a JSON request in through the splitter.
    pub async fn request(&self, transport_id: &str, text: &str) {
        self.splitter.on_inbound(transport_id, text).await;
    }
}
