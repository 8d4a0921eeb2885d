// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON ingress/egress multiplexer.
//!
//! Inbound messages are routed to the API handler with the longest matching
//! mType prefix filter; responses travel back to the originating transport
//! through a bounded per-transport queue. Requests and responses are checked
//! against per-mType JSON schemas when one is registered.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock, Semaphore};

use crate::error::GwError;

/// A per-message-type adapter: parse, encode, submit, decode, emit.
#[async_trait]
pub trait ApiHandler: Send + Sync {
    /// Produce the JSON response for one inbound message. Failures become
    /// responses with non-zero `data.status`, never errors.
    async fn handle(&self, messaging_id: &str, m_type: &str, doc: Value) -> Value;
}

/// A schema violation: which member broke which constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub member: String,
    pub violation: String,
}

/// Request/response schemas keyed by mType. Built at startup, immutable
/// afterwards.
#[derive(Default)]
pub struct SchemaRegistry {
    request: HashMap<String, JSONSchema>,
    response: HashMap<String, JSONSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `<mType>-request.json` and `<mType>-response.json` files from a
    /// directory. Files that fail to parse or compile are skipped with a
    /// warning.
    pub fn load_dir(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), err = %e, "schema directory unreadable");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let (m_type, is_request) = if let Some(m) = stem.strip_suffix("-request") {
                (m.to_owned(), true)
            } else if let Some(m) = stem.strip_suffix("-response") {
                (m.to_owned(), false)
            } else {
                continue;
            };
            let schema = std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str::<Value>(&text).ok());
            match schema {
                Some(value) => {
                    if is_request {
                        self.insert_request(&m_type, &value);
                    } else {
                        self.insert_response(&m_type, &value);
                    }
                }
                None => {
                    tracing::warn!(path = %path.display(), "schema file unreadable, skipped");
                }
            }
        }
    }

    pub fn insert_request(&mut self, m_type: &str, schema: &Value) {
        match JSONSchema::compile(schema) {
            Ok(compiled) => {
                self.request.insert(m_type.to_owned(), compiled);
            }
            Err(e) => tracing::warn!(m_type, err = %e, "request schema does not compile"),
        }
    }

    pub fn insert_response(&mut self, m_type: &str, schema: &Value) {
        match JSONSchema::compile(schema) {
            Ok(compiled) => {
                self.response.insert(m_type.to_owned(), compiled);
            }
            Err(e) => tracing::warn!(m_type, err = %e, "response schema does not compile"),
        }
    }

    pub fn validate_request(&self, m_type: &str, doc: &Value) -> Result<(), Violation> {
        Self::validate(self.request.get(m_type), doc)
    }

    pub fn validate_response(&self, m_type: &str, doc: &Value) -> Result<(), Violation> {
        Self::validate(self.response.get(m_type), doc)
    }

    fn validate(schema: Option<&JSONSchema>, doc: &Value) -> Result<(), Violation> {
        let Some(schema) = schema else {
            return Ok(());
        };
        match schema.validate(doc) {
            Ok(()) => Ok(()),
            Err(mut errors) => {
                let violation = match errors.next() {
                    Some(error) => {
                        // Point at the missing member itself, not just the
                        // object that lacks it.
                        let member = match &error.kind {
                            jsonschema::error::ValidationErrorKind::Required { property } => {
                                let name = property.as_str().unwrap_or_default();
                                format!("{}/{}", error.instance_path, name)
                            }
                            _ => error.instance_path.to_string(),
                        };
                        Violation { member, violation: error.to_string() }
                    }
                    None => Violation {
                        member: String::new(),
                        violation: "schema violation".to_owned(),
                    },
                };
                Err(violation)
            }
        }
    }
}

struct HandlerEntry {
    filters: Vec<String>,
    handler: Arc<dyn ApiHandler>,
}

struct SplitterShared {
    handlers: RwLock<Vec<HandlerEntry>>,
    transports: RwLock<HashMap<String, mpsc::Sender<Value>>>,
    schemas: SchemaRegistry,
    workers: Arc<Semaphore>,
    queue_capacity: usize,
}

/// The splitter facade shared by transports and handlers.
#[derive(Clone)]
pub struct MessageSplitter {
    shared: Arc<SplitterShared>,
}

impl MessageSplitter {
    pub fn new(schemas: SchemaRegistry, worker_count: usize, queue_capacity: usize) -> Self {
        Self {
            shared: Arc::new(SplitterShared {
                handlers: RwLock::new(Vec::new()),
                transports: RwLock::new(HashMap::new()),
                schemas,
                workers: Arc::new(Semaphore::new(worker_count.max(1))),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register a handler under a list of mType prefix filters. Identical
    /// filters across handlers are rejected.
    pub async fn register_handler(
        &self,
        filters: &[&str],
        handler: Arc<dyn ApiHandler>,
    ) -> anyhow::Result<()> {
        let mut handlers = self.shared.handlers.write().await;
        for filter in filters {
            let taken = handlers
                .iter()
                .any(|entry| entry.filters.iter().any(|f| f == filter));
            if taken {
                anyhow::bail!("message-type filter already registered: {filter}");
            }
        }
        handlers.push(HandlerEntry {
            filters: filters.iter().map(|f| (*f).to_owned()).collect(),
            handler,
        });
        Ok(())
    }

    /// Register a transport's bounded outbound queue; the transport drains
    /// the returned receiver.
    pub async fn register_transport(&self, messaging_id: &str) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(self.shared.queue_capacity);
        self.shared.transports.write().await.insert(messaging_id.to_owned(), tx);
        rx
    }

    pub async fn unregister_transport(&self, messaging_id: &str) {
        self.shared.transports.write().await.remove(messaging_id);
    }

    /// Ingress entry point for transports.
    pub async fn on_inbound(&self, messaging_id: &str, text: &str) {
        let doc: Value = match serde_json::from_str(text) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::debug!(messaging_id, err = %e, "unparseable message");
                let response = json_parse_error(&e.to_string());
                let _ = self.send_message(messaging_id, response).await;
                return;
            }
        };

        let msg_id =
            doc.pointer("/data/msgId").and_then(Value::as_str).unwrap_or("unknown").to_owned();
        let m_type = match doc.get("mType").and_then(Value::as_str) {
            Some(m) => m.to_owned(),
            None => {
                let response = invalid_msg_error(
                    &msg_id,
                    "unknown",
                    "request",
                    "/mType",
                    "required member missing",
                );
                let _ = self.send_message(messaging_id, response).await;
                return;
            }
        };

        let handler = self.find_handler(&m_type).await;
        let Some(handler) = handler else {
            tracing::debug!(%m_type, "unsupported message type");
            let response = unsupported_msg_error(&msg_id, &m_type);
            let _ = self.send_message(messaging_id, response).await;
            return;
        };

        if let Err(v) = self.shared.schemas.validate_request(&m_type, &doc) {
            let response = invalid_msg_error(&msg_id, &m_type, "request", &v.member, &v.violation);
            let _ = self.send_message(messaging_id, response).await;
            return;
        }

        // Handler calls run on a bounded worker pool; each call may suspend
        // on the engine submit queue.
        let splitter = self.clone();
        let messaging_id = messaging_id.to_owned();
        let workers = Arc::clone(&self.shared.workers);
        tokio::spawn(async move {
            let Ok(_permit) = workers.acquire().await else {
                return;
            };
            let response = handler.handle(&messaging_id, &m_type, doc).await;

            if let Err(v) = splitter.shared.schemas.validate_response(&m_type, &response) {
                tracing::warn!(%m_type, member = %v.member, "response failed validation, suppressed");
                let error =
                    invalid_msg_error(&msg_id, &m_type, "response", &v.member, &v.violation);
                let _ = splitter.send_message(&messaging_id, error).await;
                return;
            }
            let _ = splitter.send_message(&messaging_id, response).await;
        });
    }

    async fn find_handler(&self, m_type: &str) -> Option<Arc<dyn ApiHandler>> {
        let handlers = self.shared.handlers.read().await;
        let mut best: Option<(&str, &Arc<dyn ApiHandler>)> = None;
        for entry in handlers.iter() {
            for filter in &entry.filters {
                if m_type.starts_with(filter.as_str())
                    && best.map_or(true, |(current, _)| filter.len() > current.len())
                {
                    best = Some((filter, &entry.handler));
                }
            }
        }
        best.map(|(_, handler)| Arc::clone(handler))
    }

    /// Route a response to the originating transport. A full queue yields
    /// `error_MessageQueueFull` back through the same transport when
    /// possible.
    pub async fn send_message(&self, messaging_id: &str, doc: Value) -> Result<(), GwError> {
        let transports = self.shared.transports.read().await;
        let Some(tx) = transports.get(messaging_id) else {
            tracing::warn!(messaging_id, "response for unknown transport dropped");
            return Ok(());
        };
        match tx.try_send(doc) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(original)) => {
                tracing::warn!(messaging_id, "transport queue full");
                let msg_id = original
                    .pointer("/data/msgId")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let m_type =
                    original.get("mType").and_then(Value::as_str).unwrap_or("unknown");
                let error = queue_full_error(msg_id, m_type, messaging_id, self.shared.queue_capacity);
                if tx.try_send(error).is_err() {
                    tracing::warn!(messaging_id, "queue-full notice also dropped");
                }
                Err(GwError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(messaging_id, "transport gone, response dropped");
                Ok(())
            }
        }
    }

    /// Deliver an unsolicited message to every registered transport.
    pub async fn broadcast(&self, doc: Value) {
        let ids: Vec<String> =
            self.shared.transports.read().await.keys().cloned().collect();
        for id in ids {
            let _ = self.send_message(&id, doc.clone()).await;
        }
    }
}

// -- Synthetic error responses -------------------------------------------------

fn json_parse_error(message: &str) -> Value {
    json!({
        "mType": "error_JsonParse",
        "data": {
            "msgId": "unknown",
            "rsp": { "message": message },
            "status": GwError::InvalidRequest.status_code(),
            "statusStr": "Unable to parse JSON message.",
        }
    })
}

fn unsupported_msg_error(msg_id: &str, m_type: &str) -> Value {
    json!({
        "mType": "error_UnsupportedMsg",
        "data": {
            "msgId": msg_id,
            "rsp": { "mType": m_type },
            "status": GwError::UnsupportedMsgType.status_code(),
            "statusStr": "Unknown or unsupported message type.",
        }
    })
}

fn invalid_msg_error(
    msg_id: &str,
    m_type: &str,
    direction: &str,
    member: &str,
    violation: &str,
) -> Value {
    json!({
        "mType": "error_InvalidMsg",
        "data": {
            "msgId": msg_id,
            "rsp": {
                "mType": m_type,
                "direction": direction,
                "violatingMember": member,
                "violation": violation,
            },
            "status": GwError::InvalidRequest.status_code(),
            "statusStr": "Invalid message contents.",
        }
    })
}

fn queue_full_error(msg_id: &str, m_type: &str, queue_type: &str, queue_length: usize) -> Value {
    json!({
        "mType": "error_MessageQueueFull",
        "data": {
            "msgId": msg_id,
            "rsp": {
                "mType": m_type,
                "queueType": queue_type,
                "queueLength": queue_length,
            },
            "status": GwError::QueueFull.status_code(),
            "statusStr": "Message queue full.",
        }
    })
}

#[cfg(test)]
#[path = "splitter_tests.rs"]
mod tests;
