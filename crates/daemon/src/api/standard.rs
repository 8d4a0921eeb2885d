// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Standard-peripheral handler: mTypes like `iqrfEmbedCoordinator_AddrInfo`
//! are mapped to driver paths (`iqrf.embed.coordinator.AddrInfo`), encoded
//! to frames by the `_Request_req` driver function and decoded from frames
//! by `_Response_rsp`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::dpa::engine::{DpaEngine, SubmitOptions};
use crate::dpa::{DpaFrame, HWPID_ANY, MAX_FRAME_LEN, REQUEST_HEADER_LEN};
use crate::error::GwError;
use crate::hex;
use crate::sandbox::DriverSandbox;
use crate::splitter::ApiHandler;

use super::com::Com;
use super::raw::{envelope_error, status_of};

/// Handler for the standard peripheral message families.
pub struct StandardApi {
    engine: DpaEngine,
    sandbox: Arc<DriverSandbox>,
    instance_id: String,
}

/// What `_Request_req` driver functions return.
#[derive(Debug)]
struct DriverRequest {
    pnum: u8,
    pcmd: u8,
    payload: Vec<u8>,
}

impl StandardApi {
    pub const FILTERS: &'static [&'static str] =
        &["iqrfEmbed", "iqrfSensor", "iqrfBinaryoutput", "iqrfLight", "iqrfDali"];

    pub fn new(engine: DpaEngine, sandbox: Arc<DriverSandbox>, instance_id: String) -> Self {
        Self { engine, sandbox, instance_id }
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

    fn driver_error(&self, com: &Com, err: &GwError) -> Value {
        com.create_response(
            Value::Null,
            None,
            err.status_code(),
            &err.to_string(),
            &self.instance_id,
        )
    }

    async fn encode_request(&self, path: &str, param: &Value) -> Result<DriverRequest, GwError> {
        let encoded = self
            .sandbox
            .call(&format!("{path}_Request_req"), &param.to_string())
            .await?;
        let value: Value = serde_json::from_str(&encoded)
            .map_err(|_| driver_shape_error("unparseable encode result"))?;

        let pnum = hex_field(&value, "pnum").ok_or_else(|| driver_shape_error("pnum missing"))?;
        let pcmd = hex_field(&value, "pcmd").ok_or_else(|| driver_shape_error("pcmd missing"))?;
        let payload = match value.get("rdata").and_then(Value::as_str) {
            Some(rdata) => hex::parse_binary(rdata, MAX_FRAME_LEN - REQUEST_HEADER_LEN)
                .ok_or_else(|| driver_shape_error("rdata is not valid hex"))?,
            None => Vec::new(),
        };
        Ok(DriverRequest { pnum: pnum as u8, pcmd: pcmd as u8, payload })
    }

    async fn decode_response(&self, path: &str, response: &DpaFrame) -> Result<Value, GwError> {
        let raw_hdp = json!({
            "pnum": format!("{:02x}", response.pnum()),
            "pcmd": format!("{:02x}", response.pcmd()),
            "rcode": format!("{:02x}", response.rcode().unwrap_or(0)),
            "dpaval": format!("{:02x}", response.dpaval().unwrap_or(0)),
            "rdata": hex::encode_binary(response.response_payload()),
        });
        let decoded = self
            .sandbox
            .call(&format!("{path}_Response_rsp"), &raw_hdp.to_string())
            .await?;
        serde_json::from_str(&decoded).map_err(|_| driver_shape_error("unparseable decode result"))
    }
}

#[async_trait]
impl ApiHandler for StandardApi {
    async fn handle(&self, _messaging_id: &str, m_type: &str, doc: Value) -> Value {
        let Some(com) = Com::parse(m_type, &doc) else {
            return envelope_error(m_type);
        };
        let Some(path) = mtype_to_driver_path(m_type) else {
            return self.invalid(&com, "message type does not name a driver");
        };

        let req = doc.pointer("/data/req").cloned().unwrap_or(Value::Null);
        let Some(nadr) = req.get("nAdr").and_then(Value::as_u64) else {
            return self.invalid(&com, "nAdr missing");
        };
        let hwpid =
            req.get("hwpId").and_then(Value::as_u64).unwrap_or(u64::from(HWPID_ANY)) as u16;
        let param = req.get("param").cloned().unwrap_or_else(|| json!({}));

        // JSON -> frame through the driver.
        let encoded = match self.encode_request(&path, &param).await {
            Ok(e) => e,
            Err(err) => return self.driver_error(&com, &err),
        };
        let request = match DpaFrame::request(
            nadr as u16,
            encoded.pnum,
            encoded.pcmd,
            hwpid,
            &encoded.payload,
        ) {
            Ok(frame) => frame,
            Err(_) => return self.invalid(&com, "encoded frame exceeds DPA limits"),
        };

        let opts = SubmitOptions { timeout_ms: com.timeout_ms, repeat: com.repeat };
        let result = self.engine.execute(request, opts).await;

        if !result.is_ok() {
            let rsp = json!({ "nAdr": nadr, "hwpId": hwpid, "result": null });
            let (status, status_str) = status_of(&result);
            return com.create_response(rsp, Some(&result), status, &status_str, &self.instance_id);
        }

        // Frame -> JSON through the driver; broadcasts have no response.
        let rsp = match result.response.as_ref() {
            Some(response) => match self.decode_response(&path, response).await {
                Ok(decoded) => json!({
                    "nAdr": response.nadr(),
                    "hwpId": response.hwpid(),
                    "rCode": response.rcode(),
                    "dpaVal": response.dpaval(),
                    "result": decoded,
                }),
                Err(err) => return self.driver_error(&com, &err),
            },
            None => json!({ "nAdr": nadr, "hwpId": hwpid, "result": null }),
        };
        com.create_response(rsp, Some(&result), 0, "ok", &self.instance_id)
    }
}

fn driver_shape_error(detail: &str) -> GwError {
    GwError::Driver(crate::error::DriverFault::Runtime(detail.to_owned()))
}

/// Read a driver hex-string field, tolerating plain numbers.
fn hex_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key) {
        Some(Value::String(s)) => hex::parse_hexa_num(s),
        Some(Value::Number(n)) => n.as_u64(),
        _ => None,
    }
}

/// Map an API message type to its driver path:
/// `iqrfEmbedCoordinator_AddrInfo` → `iqrf.embed.coordinator.AddrInfo`.
pub fn mtype_to_driver_path(m_type: &str) -> Option<String> {
    let rest = m_type.strip_prefix("iqrf")?;
    let (device, method) = rest.split_once('_')?;
    if device.is_empty() || method.is_empty() {
        return None;
    }
    let mut path = String::from("iqrf");
    for segment in split_camel(device) {
        path.push('.');
        path.push_str(&segment.to_lowercase());
    }
    path.push('.');
    path.push_str(method);
    Some(path)
}

/// Split `EmbedCoordinator` into `["Embed", "Coordinator"]`.
fn split_camel(s: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    for c in s.chars() {
        if c.is_uppercase() && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

#[cfg(test)]
#[path = "standard_tests.rs"]
mod tests;
