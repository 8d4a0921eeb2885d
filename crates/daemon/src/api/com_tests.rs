// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use chrono::Local;
use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::dpa::transaction::DpaTransaction;
use crate::dpa::{DpaFrame, HWPID_ANY};

fn completed_result() -> TransactionResult {
    let request = DpaFrame::request(0, 0, 0, HWPID_ANY, &[]).unwrap();
    let mut txn = DpaTransaction::new(request, -1, Duration::from_millis(500));
    txn.mark_sent(Instant::now(), Local::now());
    let response =
        DpaFrame::from_bytes(vec![0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x40, 0x04, 0x2a])
            .unwrap();
    txn.on_frame(&response, Instant::now(), Local::now());
    txn.seal()
}

#[test]
fn parse_reads_envelope_fields() {
    let doc = json!({
        "mType": "iqrfRaw",
        "data": { "msgId": "m1", "timeout": 1500, "returnVerbose": true, "repeat": 3 }
    });
    let com = Com::parse("iqrfRaw", &doc).unwrap();
    assert_eq!(com.msg_id, "m1");
    assert_eq!(com.timeout_ms, 1500);
    assert!(com.verbose);
    assert_eq!(com.repeat, 3);
}

#[test]
fn parse_defaults_optional_fields() {
    let doc = json!({ "mType": "iqrfRaw", "data": { "msgId": "m1" } });
    let com = Com::parse("iqrfRaw", &doc).unwrap();
    assert_eq!(com.timeout_ms, -1);
    assert!(!com.verbose);
    assert_eq!(com.repeat, 1);
}

#[test]
fn parse_requires_msg_id() {
    let doc = json!({ "mType": "iqrfRaw", "data": {} });
    assert!(Com::parse("iqrfRaw", &doc).is_none());
}

#[test]
fn terse_response_has_no_raw_block() {
    let doc = json!({ "mType": "iqrfRaw", "data": { "msgId": "m1" } });
    let com = Com::parse("iqrfRaw", &doc).unwrap();
    let result = completed_result();
    let response = com.create_response(json!({"x": 1}), Some(&result), 0, "ok", "iqrfgd2-1");

    assert_eq!(response["mType"], "iqrfRaw");
    assert_eq!(response["data"]["msgId"], "m1");
    assert_eq!(response["data"]["status"], 0);
    assert_eq!(response["data"]["rsp"]["x"], 1);
    assert!(response["data"].get("raw").is_none());
    assert!(response["data"].get("statusStr").is_none());
}

#[test]
fn error_response_carries_status_str() {
    let doc = json!({ "mType": "iqrfRaw", "data": { "msgId": "m1" } });
    let com = Com::parse("iqrfRaw", &doc).unwrap();
    let response = com.create_response(json!({}), None, 1, "timeout", "iqrfgd2-1");
    assert_eq!(response["data"]["status"], 1);
    assert_eq!(response["data"]["statusStr"], "timeout");
}

#[test]
fn verbose_response_carries_raw_frames() {
    let doc = json!({
        "mType": "iqrfRaw",
        "data": { "msgId": "m1", "returnVerbose": true, "timeout": 900 }
    });
    let com = Com::parse("iqrfRaw", &doc).unwrap();
    let result = completed_result();
    let response = com.create_response(json!({}), Some(&result), 0, "ok", "iqrfgd2-1");

    let raw = &response["data"]["raw"];
    assert_eq!(raw["request"], "00.00.00.00.ff.ff");
    assert_eq!(raw["response"], "00.00.00.80.00.00.00.40.04.2a");
    assert_eq!(raw["confirmation"], "");
    assert_eq!(raw["confirmationTs"], "");
    assert!(!raw["requestTs"].as_str().unwrap().is_empty());
    assert!(!raw["responseTs"].as_str().unwrap().is_empty());
    assert_eq!(response["data"]["timeout"], 900);
    assert_eq!(response["data"]["insId"], "iqrfgd2-1");
    assert_eq!(response["data"]["statusStr"], "ok");
}
