// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw DPA handlers: `iqrfRaw` carries the whole frame as hex, `iqrfRawHdp`
//! carries decomposed header fields plus payload bytes.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dpa::engine::{DpaEngine, SubmitOptions};
use crate::dpa::transaction::TransactionResult;
use crate::dpa::{DpaFrame, HWPID_ANY, MAX_FRAME_LEN};
use crate::error::GwError;
use crate::hex;
use crate::splitter::ApiHandler;

use super::com::Com;

/// Handler for the raw DPA message family.
pub struct RawApi {
    engine: DpaEngine,
    instance_id: String,
}

impl RawApi {
    pub const FILTERS: &'static [&'static str] = &["iqrfRaw"];

    pub fn new(engine: DpaEngine, instance_id: String) -> Self {
        Self { engine, instance_id }
    }

    async fn handle_raw(&self, com: &Com, doc: &Value) -> Value {
        let Some(r_data) = doc.pointer("/data/req/rData").and_then(Value::as_str) else {
            return self.invalid(com, "rData missing");
        };
        let Some(bytes) = hex::parse_binary(r_data, MAX_FRAME_LEN) else {
            return self.invalid(com, "rData is not valid hex");
        };
        let request = match DpaFrame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(_) => return self.invalid(com, "rData is not a valid DPA frame"),
        };

        let result = self.execute(com, request).await;
        let r_data = result
            .response
            .as_ref()
            .map(|f| hex::encode_binary(f.as_bytes()))
            .unwrap_or_default();
        let (status, status_str) = status_of(&result);
        com.create_response(json!({ "rData": r_data }), Some(&result), status, &status_str, &self.instance_id)
    }

    async fn handle_raw_hdp(&self, com: &Com, doc: &Value) -> Value {
        let req = doc.pointer("/data/req").cloned().unwrap_or(Value::Null);
        let Some(nadr) = req.get("nAdr").and_then(Value::as_u64) else {
            return self.invalid(com, "nAdr missing");
        };
        let Some(pnum) = req.get("pNum").and_then(Value::as_u64) else {
            return self.invalid(com, "pNum missing");
        };
        let Some(pcmd) = req.get("pCmd").and_then(Value::as_u64) else {
            return self.invalid(com, "pCmd missing");
        };
        let hwpid = req.get("hwpId").and_then(Value::as_u64).unwrap_or(u64::from(HWPID_ANY));
        let payload: Vec<u8> = req
            .get("pData")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_u64).map(|b| b as u8).collect())
            .unwrap_or_default();

        let request =
            match DpaFrame::request(nadr as u16, pnum as u8, pcmd as u8, hwpid as u16, &payload) {
                Ok(frame) => frame,
                Err(_) => return self.invalid(com, "frame exceeds DPA limits"),
            };

        let result = self.execute(com, request).await;
        let rsp = match result.response.as_ref() {
            Some(response) => json!({
                "nAdr": response.nadr(),
                "pNum": response.pnum(),
                "pCmd": response.pcmd(),
                "hwpId": response.hwpid(),
                "rCode": response.rcode(),
                "dpaVal": response.dpaval(),
                "pData": response.response_payload(),
            }),
            None => json!({
                "nAdr": nadr,
                "pNum": pnum,
                "pCmd": pcmd,
                "hwpId": hwpid,
                "pData": [],
            }),
        };
        let (status, status_str) = status_of(&result);
        com.create_response(rsp, Some(&result), status, &status_str, &self.instance_id)
    }

    async fn execute(&self, com: &Com, request: DpaFrame) -> TransactionResult {
        let opts = SubmitOptions { timeout_ms: com.timeout_ms, repeat: com.repeat };
        self.engine.execute(request, opts).await
    }

    fn invalid(&self, com: &Com, detail: &str) -> Value {
        com.create_response(
            Value::Null,
            None,
            GwError::InvalidRequest.status_code(),
            detail,
            &self.instance_id,
        )
    }
}

/// Status pair of a sealed transaction result.
pub(crate) fn status_of(result: &TransactionResult) -> (i32, String) {
    if result.is_ok() {
        (0, "ok".to_owned())
    } else {
        (result.error_code, result.error_str.clone())
    }
}

#[async_trait]
impl ApiHandler for RawApi {
    async fn handle(&self, _messaging_id: &str, m_type: &str, doc: Value) -> Value {
        let Some(com) = Com::parse(m_type, &doc) else {
            return envelope_error(m_type);
        };
        match m_type {
            "iqrfRaw" => self.handle_raw(&com, &doc).await,
            "iqrfRawHdp" => self.handle_raw_hdp(&com, &doc).await,
            _ => self.invalid(&com, "unknown raw message type"),
        }
    }
}

/// Response for messages whose `data` envelope could not be parsed.
pub(crate) fn envelope_error(m_type: &str) -> Value {
    json!({
        "mType": m_type,
        "data": {
            "msgId": "unknown",
            "rsp": null,
            "status": GwError::InvalidRequest.status_code(),
            "statusStr": "msgId missing",
        }
    })
}

#[cfg(test)]
#[path = "raw_tests.rs"]
mod tests;
