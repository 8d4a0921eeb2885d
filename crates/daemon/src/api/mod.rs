// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API handlers: per-message-type adapters between the JSON surface and the
//! DPA engine, plus the asynchronous notification forwarder.

pub mod com;
pub mod mng;
pub mod raw;
pub mod standard;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::dpa::engine::DpaEngine;
use crate::hex;
use crate::splitter::MessageSplitter;

/// Forward asynchronous DPA frames to every transport as `iqrfRaw` messages
/// with the reserved `async` msgId.
pub fn spawn_async_notifier(
    engine: DpaEngine,
    splitter: MessageSplitter,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut frames = engine.subscribe_async("json-api-raw").await;
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = frames.recv() => match frame {
                    Some(f) => f,
                    None => break,
                },
            };
            tracing::debug!(nadr = frame.nadr(), "forwarding async frame");
            let message = json!({
                "mType": "iqrfRaw",
                "data": {
                    "msgId": "async",
                    "rsp": { "rData": hex::encode_binary(frame.as_bytes()) },
                    "status": 0,
                }
            });
            splitter.broadcast(message).await;
        }
    });
}
