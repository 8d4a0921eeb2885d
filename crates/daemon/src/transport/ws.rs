// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server transport.
//!
//! Each connection gets its own messaging id (`ws-<n>`) so responses travel
//! back to the client that asked; broadcasts reach every connection. Auth,
//! when enabled, validates an API token passed as a query parameter before
//! the upgrade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::WsConfig;
use crate::db::Database;
use crate::splitter::MessageSplitter;

use super::auth;

pub struct WsState {
    splitter: MessageSplitter,
    db: Arc<Database>,
    auth_required: bool,
    next_conn: AtomicU64,
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// API token (`iqrfgd2;<id>;<secret>`).
    pub token: Option<String>,
}

/// Bind the listener and spawn the server task.
pub async fn serve(
    config: &WsConfig,
    splitter: MessageSplitter,
    db: Arc<Database>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let state = Arc::new(WsState {
        splitter,
        db,
        auth_required: config.auth_required,
        next_conn: AtomicU64::new(1),
    });
    let router = Router::new().route("/ws", get(ws_handler)).with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "websocket transport listening");

    tokio::spawn(async move {
        if let Err(e) =
            axum::serve(listener, router).with_graceful_shutdown(cancel.cancelled_owned()).await
        {
            tracing::error!(err = %e, "websocket transport failed");
        }
    });
    Ok(())
}

/// `GET /ws`: WebSocket upgrade.
async fn ws_handler(
    State(state): State<Arc<WsState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if state.auth_required {
        let verdict = match query.token.as_deref() {
            Some(token) => {
                auth::validate_token(&state.db, token, chrono::Utc::now().timestamp()).map(|_| ())
            }
            None => Err(crate::error::GwError::Auth(crate::error::AuthFault::NotFound)),
        };
        if let Err(e) = verdict {
            tracing::debug!(err = %e, "websocket auth rejected");
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from(e.as_str()))
                .unwrap_or_default()
                .into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_connection(state, socket)).into_response()
}

/// Per-connection loop: drain the splitter queue outward, feed client text
/// inward.
async fn handle_connection(state: Arc<WsState>, socket: WebSocket) {
    let conn = state.next_conn.fetch_add(1, Ordering::Relaxed);
    let messaging_id = format!("ws-{conn}");
    let mut outbound = state.splitter.register_transport(&messaging_id).await;
    tracing::debug!(%messaging_id, "websocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            doc = outbound.recv() => {
                let Some(doc) = doc else { break };
                let Ok(text) = serde_json::to_string(&doc) else { continue };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.splitter.on_inbound(&messaging_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%messaging_id, err = %e, "websocket error");
                        break;
                    }
                    _ => {} // ping/pong/binary ignored
                }
            }
        }
    }

    state.splitter.unregister_transport(&messaging_id).await;
    tracing::debug!(%messaging_id, "websocket client disconnected");
}
