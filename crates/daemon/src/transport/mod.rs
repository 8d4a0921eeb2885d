// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging transports.
//!
//! Each transport registers a bounded outbound queue with the splitter under
//! its messaging id and feeds inbound JSON back through
//! [`MessageSplitter::on_inbound`]. The daemon ships a WebSocket server and
//! a UDP datagram transport; further transports only need this contract.

pub mod auth;
pub mod udp;
pub mod ws;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::TransportsConfig;
use crate::db::Database;
use crate::splitter::MessageSplitter;

/// Bind and spawn every configured transport.
pub async fn start(
    config: &TransportsConfig,
    splitter: MessageSplitter,
    db: Arc<Database>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(ws_config) = &config.websocket {
        ws::serve(ws_config, splitter.clone(), Arc::clone(&db), cancel.child_token()).await?;
    }
    if let Some(udp_config) = &config.udp {
        udp::serve(udp_config, splitter.clone(), cancel.child_token()).await?;
    }
    Ok(())
}
