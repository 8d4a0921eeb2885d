// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon management handler: mode switching and version reporting.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::GwError;
use crate::splitter::ApiHandler;

use super::com::Com;
use super::raw::envelope_error;

/// Operating mode of the daemon. Service mode is the gate for
/// channel-exclusive maintenance flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonMode {
    Operational,
    Service,
    Forwarding,
}

impl DaemonMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operational => "operational",
            Self::Service => "service",
            Self::Forwarding => "forwarding",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "operational" => Some(Self::Operational),
            "service" => Some(Self::Service),
            "forwarding" => Some(Self::Forwarding),
            _ => None,
        }
    }
}

/// Shared mode cell.
pub struct ModeState(AtomicU8);

impl ModeState {
    pub fn new(mode: DaemonMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn get(&self) -> DaemonMode {
        match self.0.load(Ordering::Relaxed) {
            1 => DaemonMode::Service,
            2 => DaemonMode::Forwarding,
            _ => DaemonMode::Operational,
        }
    }

    pub fn set(&self, mode: DaemonMode) {
        self.0.store(mode as u8, Ordering::Relaxed);
    }
}

impl Default for ModeState {
    fn default() -> Self {
        Self::new(DaemonMode::Operational)
    }
}

/// Handler for the `mngDaemon` message family.
pub struct MngApi {
    mode: Arc<ModeState>,
    instance_id: String,
}

impl MngApi {
    pub const FILTERS: &'static [&'static str] = &["mngDaemon"];

    pub fn new(mode: Arc<ModeState>, instance_id: String) -> Self {
        Self { mode, instance_id }
    }

    fn handle_mode(&self, com: &Com, doc: &Value) -> Value {
        let requested = doc.pointer("/data/req/operMode").and_then(Value::as_str).unwrap_or("");
        if !requested.is_empty() {
            let Some(mode) = DaemonMode::parse(requested) else {
                return com.create_response(
                    Value::Null,
                    None,
                    GwError::InvalidRequest.status_code(),
                    "unknown operMode",
                    &self.instance_id,
                );
            };
            tracing::info!(mode = mode.as_str(), "daemon mode changed");
            self.mode.set(mode);
        }
        let rsp = json!({ "operMode": self.mode.get().as_str() });
        com.create_response(rsp, None, 0, "ok", &self.instance_id)
    }

    fn handle_version(&self, com: &Com) -> Value {
        let rsp = json!({ "version": env!("CARGO_PKG_VERSION") });
        com.create_response(rsp, None, 0, "ok", &self.instance_id)
    }
}

#[async_trait]
impl ApiHandler for MngApi {
    async fn handle(&self, _messaging_id: &str, m_type: &str, doc: Value) -> Value {
        let Some(com) = Com::parse(m_type, &doc) else {
            return envelope_error(m_type);
        };
        match m_type {
            "mngDaemon_Mode" => self.handle_mode(&com, &doc),
            "mngDaemon_Version" => self.handle_version(&com),
            _ => com.create_response(
                Value::Null,
                None,
                GwError::UnsupportedMsgType.status_code(),
                "unknown management message type",
                &self.instance_id,
            ),
        }
    }
}

#[cfg(test)]
#[path = "mng_tests.rs"]
mod tests;
