// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UDP datagram transport.
//!
//! One socket, one messaging id (`udp`). Responses go back to the peer that
//! sent the matching msgId; unsolicited messages go to the most recent peer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::UdpConfig;
use crate::splitter::MessageSplitter;

/// Messaging id of the UDP transport.
pub const MESSAGING_ID: &str = "udp";

/// Largest datagram the transport accepts.
const MAX_DATAGRAM: usize = 65_507;

#[derive(Default)]
struct PeerBook {
    by_msg_id: HashMap<String, SocketAddr>,
    last: Option<SocketAddr>,
}

/// Bind the socket and spawn the ingress and egress tasks.
pub async fn serve(
    config: &UdpConfig,
    splitter: MessageSplitter,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let socket = Arc::new(UdpSocket::bind(&config.bind).await?);
    tracing::info!(bind = %config.bind, "udp transport listening");

    let peers = Arc::new(Mutex::new(PeerBook::default()));
    let mut outbound = splitter.register_transport(MESSAGING_ID).await;

    // Egress: responses and broadcasts back to their peers.
    {
        let socket = Arc::clone(&socket);
        let peers = Arc::clone(&peers);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let doc = tokio::select! {
                    _ = cancel.cancelled() => break,
                    doc = outbound.recv() => match doc {
                        Some(d) => d,
                        None => break,
                    },
                };
                let addr = {
                    let Ok(mut book) = peers.lock() else { break };
                    doc.pointer("/data/msgId")
                        .and_then(Value::as_str)
                        .and_then(|id| book.by_msg_id.remove(id))
                        .or(book.last)
                };
                let Some(addr) = addr else {
                    tracing::debug!("udp response with no known peer dropped");
                    continue;
                };
                let Ok(text) = serde_json::to_string(&doc) else { continue };
                if let Err(e) = socket.send_to(text.as_bytes(), addr).await {
                    tracing::debug!(err = %e, "udp send failed");
                }
            }
        });
    }

    // Ingress: datagrams into the splitter.
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = tokio::select! {
                _ = cancel.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(err = %e, "udp receive failed");
                        break;
                    }
                },
            };
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                tracing::debug!(peer = %addr, "non-utf8 datagram dropped");
                continue;
            };
            let parsed: Option<Value> = serde_json::from_str(text).ok();
            let msg_id = parsed
                .as_ref()
                .and_then(|doc| doc.pointer("/data/msgId"))
                .and_then(Value::as_str);
            if let Some(msg_id) = msg_id {
                if let Ok(mut book) = peers.lock() {
                    book.by_msg_id.insert(msg_id.to_owned(), addr);
                    book.last = Some(addr);
                }
            }
            splitter.on_inbound(MESSAGING_ID, text).await;
        }
    });

    Ok(())
}
