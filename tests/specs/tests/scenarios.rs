// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios: JSON request in, simulated coordinator on the wire,
//! JSON response out.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use iqrfgd::dpa::engine::SubmitOptions;
use iqrfgd::dpa::DpaFrame;
use iqrfgd::splitter::SchemaRegistry;
use iqrfgd_specs::Gateway;

#[tokio::test]
async fn coordinator_local_happy_path() -> anyhow::Result<()> {
    let (gateway, mut writes) = Gateway::start(SchemaRegistry::new()).await?;
    let mut out = gateway.transport("test").await;

    let link = Arc::clone(&gateway.link);
    let responder = tokio::spawn(async move {
        let written = writes.recv().await.unwrap();
        assert_eq!(written, vec![0x00, 0x00, 0x00, 0x00, 0xff, 0xff]);
        link.inject_frame(vec![0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x40, 0x04, 0x2a]);
    });

    gateway
        .request(
            "test",
            r#"{"mType":"iqrfEmbedCoordinator_AddrInfo","data":{"msgId":"m1","returnVerbose":true,"req":{"nAdr":0,"param":{}}}}"#,
        )
        .await;

    let response = out.recv().await.unwrap();
    responder.await?;

    assert_eq!(response["mType"], "iqrfEmbedCoordinator_AddrInfo");
    assert_eq!(response["data"]["msgId"], "m1");
    assert_eq!(response["data"]["status"], 0);
    assert_eq!(response["data"]["rsp"]["result"]["devNr"], 64);
    assert_eq!(response["data"]["rsp"]["result"]["did"], 42);
    assert!(!response["data"]["raw"]["response"].as_str().unwrap().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remote_request_with_caller_timeout_override() -> anyhow::Result<()> {
    let (gateway, mut writes) = Gateway::start(SchemaRegistry::new()).await?;
    let mut out = gateway.transport("test").await;

    let link = Arc::clone(&gateway.link);
    let responder = tokio::spawn(async move {
        let written = writes.recv().await.unwrap();
        assert_eq!(&written[..4], &[0x01, 0x00, 0x06, 0x00]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        // hops_req=3, timeslot=20, hops_resp=3 -> computed deadline 650 ms.
        link.inject_frame(vec![0x01, 0x00, 0x06, 0xff, 0xff, 0xff, 0xff, 0xff, 0x03, 0x14, 0x03]);
        // 900 ms later: only the caller's 2000 ms override keeps this alive.
        tokio::time::sleep(Duration::from_millis(900)).await;
        link.inject_frame(vec![0x01, 0x00, 0x06, 0x80, 0xff, 0xff, 0x00, 0x5a, 0x07]);
    });

    gateway
        .request(
            "test",
            r#"{"mType":"iqrfRawHdp","data":{"msgId":"m2","timeout":2000,"returnVerbose":true,"req":{"nAdr":1,"pNum":6,"pCmd":0}}}"#,
        )
        .await;

    let response = out.recv().await.unwrap();
    responder.await?;

    assert_eq!(response["data"]["msgId"], "m2");
    assert_eq!(response["data"]["status"], 0);
    let raw = &response["data"]["raw"];
    let confirmation_ts = raw["confirmationTs"].as_str().unwrap();
    let response_ts = raw["responseTs"].as_str().unwrap();
    assert!(!confirmation_ts.is_empty());
    assert!(confirmation_ts <= response_ts);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn remote_request_times_out_without_response() -> anyhow::Result<()> {
    let (gateway, mut writes) = Gateway::start(SchemaRegistry::new()).await?;
    let mut out = gateway.transport("test").await;

    let link = Arc::clone(&gateway.link);
    let responder = tokio::spawn(async move {
        let _ = writes.recv().await.unwrap();
        link.inject_frame(vec![0x01, 0x00, 0x06, 0xff, 0xff, 0xff, 0xff, 0xff, 0x03, 0x14, 0x03]);
        // No response ever arrives.
    });

    gateway
        .request(
            "test",
            r#"{"mType":"iqrfRawHdp","data":{"msgId":"m3","returnVerbose":true,"req":{"nAdr":1,"pNum":6,"pCmd":0}}}"#,
        )
        .await;

    let response = out.recv().await.unwrap();
    responder.await?;

    assert_eq!(response["data"]["status"], 1);
    assert!(response["data"]["statusStr"].as_str().unwrap().contains("timeout"));
    assert_eq!(response["data"]["raw"]["response"], "");
    assert!(!response["data"]["raw"]["confirmation"].as_str().unwrap().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exclusive_access_starves_normal_submissions_until_release() -> anyhow::Result<()> {
    let (gateway, mut writes) = Gateway::start(SchemaRegistry::new()).await?;

    let exclusive = gateway.engine.acquire_exclusive()?;

    let request = DpaFrame::request(0, 0, 0, 0xffff, &[])?;
    let stalled = gateway.engine.submit(request.clone(), SubmitOptions::default()).await;

    let link = Arc::clone(&gateway.link);
    let responder = tokio::spawn(async move {
        for _ in 0..11 {
            let _ = writes.recv().await.unwrap();
            // Each device turnaround takes 10 ms of simulated time.
            tokio::time::sleep(Duration::from_millis(10)).await;
            link.inject_frame(vec![0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x40, 0x04, 0x2a]);
        }
    });

    for _ in 0..10 {
        let result = exclusive.submit(request.clone(), SubmitOptions::default()).wait().await;
        assert!(result.is_ok());
    }
    drop(exclusive);

    let result = stalled.wait().await;
    responder.await?;

    assert!(result.is_ok());
    // The normal submission waited out ten exclusive transactions.
    assert!(result.queued_ms >= 100, "queued for {} ms", result.queued_ms);
    Ok(())
}

#[tokio::test]
async fn unsupported_mtype_is_rejected() -> anyhow::Result<()> {
    let (gateway, _writes) = Gateway::start(SchemaRegistry::new()).await?;
    let mut out = gateway.transport("test").await;

    gateway
        .request("test", r#"{"mType":"bogus_Something","data":{"msgId":"m5"}}"#)
        .await;

    let response = out.recv().await.unwrap();
    assert_eq!(response["mType"], "error_UnsupportedMsg");
    assert_eq!(response["data"]["msgId"], "m5");
    assert_eq!(response["data"]["status"], 8);
    Ok(())
}

#[tokio::test]
async fn schema_violation_is_rejected_with_member() -> anyhow::Result<()> {
    let mut schemas = SchemaRegistry::new();
    schemas.insert_request(
        "iqrfEmbedCoordinator_AddrInfo",
        &json!({
            "type": "object",
            "properties": {
                "data": {
                    "type": "object",
                    "properties": {
                        "req": { "type": "object", "required": ["nAdr"] }
                    },
                    "required": ["req", "msgId"]
                }
            },
            "required": ["data"]
        }),
    );
    let (gateway, _writes) = Gateway::start(schemas).await?;
    let mut out = gateway.transport("test").await;

    gateway
        .request(
            "test",
            r#"{"mType":"iqrfEmbedCoordinator_AddrInfo","data":{"msgId":"m6","req":{}}}"#,
        )
        .await;

    let response = out.recv().await.unwrap();
    assert_eq!(response["mType"], "error_InvalidMsg");
    assert_eq!(response["data"]["msgId"], "m6");
    assert_eq!(response["data"]["status"], 7);
    assert_eq!(response["data"]["rsp"]["direction"], "request");
    assert_eq!(response["data"]["rsp"]["violatingMember"], "/data/req/nAdr");
    Ok(())
}

#[tokio::test]
async fn async_frames_fan_out_to_all_transports() -> anyhow::Result<()> {
    let (gateway, _writes) = Gateway::start(SchemaRegistry::new()).await?;
    let mut a = gateway.transport("a").await;
    let mut b = gateway.transport("b").await;

    gateway
        .link
        .inject_frame(vec![0x02, 0x00, 0x0d, 0x80, 0xff, 0xff, 0x80, 0x00, 0x01]);

    for out in [&mut a, &mut b] {
        let event = out.recv().await.unwrap();
        assert_eq!(event["mType"], "iqrfRaw");
        assert_eq!(event["data"]["msgId"], "async");
        assert_eq!(event["data"]["rsp"]["rData"], "02.00.0d.80.ff.ff.80.00.01");
    }
    Ok(())
}
