// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Common request envelope and response construction shared by the API
//! handlers.

use serde_json::{json, Value};

use crate::dpa::transaction::TransactionResult;
use crate::hex;

/// Parsed `data` envelope of an inbound API message.
#[derive(Debug, Clone)]
pub struct Com {
    pub msg_id: String,
    pub m_type: String,
    /// Caller timeout in ms; −1 selects the computed defaults.
    pub timeout_ms: i32,
    pub verbose: bool,
    pub repeat: u32,
}

impl Com {
    /// Parse the envelope. `msgId` is required; everything else defaults.
    pub fn parse(m_type: &str, doc: &Value) -> Option<Self> {
        let msg_id = doc.pointer("/data/msgId")?.as_str()?.to_owned();
        let timeout_ms = doc
            .pointer("/data/timeout")
            .and_then(Value::as_i64)
            .map(|t| t.clamp(0, i32::MAX as i64) as i32)
            .unwrap_or(-1);
        let verbose =
            doc.pointer("/data/returnVerbose").and_then(Value::as_bool).unwrap_or(false);
        let repeat = doc
            .pointer("/data/repeat")
            .and_then(Value::as_u64)
            .map(|r| r.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(1);
        Some(Self { msg_id, m_type: m_type.to_owned(), timeout_ms, verbose, repeat })
    }

    /// Build the response document: echoed mType and msgId, the payload
    /// under `data/rsp`, status, and for verbose callers the raw frame
    /// block with timestamps.
    pub fn create_response(
        &self,
        payload: Value,
        result: Option<&TransactionResult>,
        status: i32,
        status_str: &str,
        instance_id: &str,
    ) -> Value {
        let mut data = json!({
            "msgId": self.msg_id,
            "rsp": payload,
            "status": status,
        });
        let obj = data.as_object_mut();
        if let Some(obj) = obj {
            if self.verbose && self.timeout_ms != -1 {
                obj.insert("timeout".to_owned(), json!(self.timeout_ms));
            }
            if self.verbose || status != 0 {
                obj.insert("statusStr".to_owned(), json!(status_str));
            }
            if self.verbose {
                obj.insert("insId".to_owned(), json!(instance_id));
                obj.insert("raw".to_owned(), raw_block(result));
            }
        }
        json!({ "mType": self.m_type, "data": data })
    }
}

/// The `data/raw` block: frames hex-encoded, timestamps in local microsecond
/// format, empty strings where nothing was observed.
fn raw_block(result: Option<&TransactionResult>) -> Value {
    let Some(result) = result else {
        return json!({
            "request": "",
            "requestTs": "",
            "confirmation": "",
            "confirmationTs": "",
            "response": "",
            "responseTs": "",
        });
    };
    json!({
        "request": hex::encode_binary(result.request.as_bytes()),
        "requestTs": hex::encode_timestamp(result.request_ts),
        "confirmation": result
            .confirmation
            .as_ref()
            .map(|f| hex::encode_binary(f.as_bytes()))
            .unwrap_or_default(),
        "confirmationTs": hex::encode_timestamp(result.confirmation_ts),
        "response": result
            .response
            .as_ref()
            .map(|f| hex::encode_binary(f.as_bytes()))
            .unwrap_or_default(),
        "responseTs": hex::encode_timestamp(result.response_ts),
    })
}

#[cfg(test)]
#[path = "com_tests.rs"]
mod tests;
