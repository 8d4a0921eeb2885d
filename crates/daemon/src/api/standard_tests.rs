// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::channel::sim::SimLink;
use crate::channel::{Channel, ChannelLink};
use crate::config::OnChannelDown;
use crate::dpa::params::RfMode;
use crate::splitter::ApiHandler;

const COORDINATOR_DRIVERS: &str = r#"
var iqrf = {
    embed: {
        coordinator: {
            AddrInfo_Request_req: function (p) {
                return { pnum: "00", pcmd: "00", rdata: "" };
            },
            AddrInfo_Response_rsp: function (p) {
                var bytes = p.rdata === "" ? [] : p.rdata.split(".");
                return {
                    devNr: parseInt(bytes[0], 16),
                    did: parseInt(bytes[1], 16)
                };
            }
        }
    }
};
"#;

async fn harness() -> (StandardApi, Arc<SimLink>, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
    let (link, writes) = SimLink::new();
    let cancel = CancellationToken::new();
    let channel = Channel::open(
        Arc::clone(&link) as Arc<dyn ChannelLink>,
        4,
        Duration::from_millis(100),
        cancel.clone(),
    )
    .await;
    let engine = crate::dpa::engine::DpaEngine::start(
        channel,
        500,
        32,
        OnChannelDown::Hold,
        RfMode::Std,
        cancel,
    )
    .await
    .unwrap();
    let sandbox = Arc::new(DriverSandbox::new());
    sandbox.load(COORDINATOR_DRIVERS.to_owned()).await.unwrap();
    (StandardApi::new(engine, sandbox, "iqrfgd2-1".to_owned()), link, writes)
}

#[test]
fn mtype_maps_to_driver_path() {
    assert_eq!(
        mtype_to_driver_path("iqrfEmbedCoordinator_AddrInfo").unwrap(),
        "iqrf.embed.coordinator.AddrInfo"
    );
    assert_eq!(
        mtype_to_driver_path("iqrfEmbedOs_Read").unwrap(),
        "iqrf.embed.os.Read"
    );
    assert_eq!(
        mtype_to_driver_path("iqrfSensor_ReadSensorsWithTypes").unwrap(),
        "iqrf.sensor.ReadSensorsWithTypes"
    );
    assert_eq!(
        mtype_to_driver_path("iqrfBinaryoutput_Enumerate").unwrap(),
        "iqrf.binaryoutput.Enumerate"
    );
    assert!(mtype_to_driver_path("bogus").is_none());
    assert!(mtype_to_driver_path("iqrfNoUnderscore").is_none());
}

#[test]
fn camel_splitting() {
    assert_eq!(split_camel("EmbedCoordinator"), vec!["Embed", "Coordinator"]);
    assert_eq!(split_camel("Sensor"), vec!["Sensor"]);
}

#[tokio::test]
async fn addr_info_end_to_end() {
    let (api, link, mut writes) = harness().await;

    let responder = tokio::spawn(async move {
        let written = writes.recv().await.unwrap();
        assert_eq!(written, vec![0x00, 0x00, 0x00, 0x00, 0xff, 0xff]);
        link.inject_frame(vec![0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x40, 0x40, 0x2a]);
    });

    let doc = json!({
        "mType": "iqrfEmbedCoordinator_AddrInfo",
        "data": {
            "msgId": "m1",
            "returnVerbose": true,
            "req": { "nAdr": 0, "param": {} }
        }
    });
    let response = api.handle("test", "iqrfEmbedCoordinator_AddrInfo", doc).await;
    responder.await.unwrap();

    assert_eq!(response["data"]["msgId"], "m1");
    assert_eq!(response["data"]["status"], 0);
    let rsp = &response["data"]["rsp"];
    assert_eq!(rsp["nAdr"], 0);
    assert_eq!(rsp["rCode"], 0);
    assert_eq!(rsp["result"]["devNr"], 64);
    assert_eq!(rsp["result"]["did"], 42);
    assert!(!response["data"]["raw"]["response"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_driver_reports_status_six() {
    let (api, _link, _writes) = harness().await;
    let doc = json!({
        "mType": "iqrfEmbedNode_Read",
        "data": { "msgId": "m2", "req": { "nAdr": 1, "param": {} } }
    });
    let response = api.handle("test", "iqrfEmbedNode_Read", doc).await;
    assert_eq!(response["data"]["status"], 6);
    assert_eq!(response["data"]["statusStr"], "driver-not-found");
}

#[tokio::test]
async fn missing_nadr_is_invalid_request() {
    let (api, _link, _writes) = harness().await;
    let doc = json!({
        "mType": "iqrfEmbedCoordinator_AddrInfo",
        "data": { "msgId": "m3", "req": { "param": {} } }
    });
    let response = api.handle("test", "iqrfEmbedCoordinator_AddrInfo", doc).await;
    assert_eq!(response["data"]["status"], 7);
}

#[tokio::test]
async fn transaction_failure_propagates_status() {
    let (api, _link, _writes) = harness().await;
    // Nobody answers; the coordinator-local deadline expires.
    let doc = json!({
        "mType": "iqrfEmbedCoordinator_AddrInfo",
        "data": { "msgId": "m4", "req": { "nAdr": 0, "param": {} } }
    });
    let response = api.handle("test", "iqrfEmbedCoordinator_AddrInfo", doc).await;
    assert_eq!(response["data"]["status"], 1);
    assert_eq!(response["data"]["rsp"]["result"], serde_json::Value::Null);
}
