// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process simulation link for tests and offline operation.
//!
//! Tests observe written frames through the receiver returned by [`SimLink::new`]
//! and inject inbound frames, busy spells, and link drops.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelError;

use super::{ChannelLink, LinkEvent, SendOutcome};

pub struct SimLink {
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    writes_tx: mpsc::UnboundedSender<Vec<u8>>,
    busy_remaining: AtomicU32,
    fail_handshake: AtomicBool,
    fail_writes: AtomicBool,
}

impl SimLink {
    /// Create a link plus the stream of frames written through it.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (writes_tx, writes_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Self {
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            writes_tx,
            busy_remaining: AtomicU32::new(0),
            fail_handshake: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        });
        (link, writes_rx)
    }

    /// Deliver an inbound frame to the channel.
    pub fn inject_frame(&self, bytes: Vec<u8>) {
        let _ = self.events_tx.send(LinkEvent::Frame(bytes));
    }

    /// Simulate the device dropping off.
    pub fn inject_down(&self) {
        let _ = self.events_tx.send(LinkEvent::Down);
    }

    /// Simulate the device recovering.
    pub fn inject_up(&self) {
        let _ = self.events_tx.send(LinkEvent::Up);
    }

    /// Answer the next `n` writes with the vendor busy status.
    pub fn set_busy(&self, n: u32) {
        self.busy_remaining.store(n, Ordering::Relaxed);
    }

    /// Make the open-time test handshake fail.
    pub fn set_fail_handshake(&self, fail: bool) {
        self.fail_handshake.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl ChannelLink for SimLink {
    async fn test(&self) -> Result<(), ChannelError> {
        if self.fail_handshake.load(Ordering::Relaxed) {
            Err(ChannelError::Io("simulated handshake failure".to_owned()))
        } else {
            Ok(())
        }
    }

    async fn send(&self, frame: &[u8]) -> Result<SendOutcome, ChannelError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(ChannelError::Io("simulated write failure".to_owned()));
        }
        if self
            .busy_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(SendOutcome::Busy);
        }
        let _ = self.writes_tx.send(frame.to_vec());
        Ok(SendOutcome::Accepted)
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>> {
        self.events_rx.lock().ok().and_then(|mut guard| guard.take())
    }
}
