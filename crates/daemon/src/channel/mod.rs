// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-writer channel to the serial-attached coordinator.
//!
//! The channel owns the device link, serializes writes, and fans inbound
//! frames out to subscriber slots: one Normal, one Exclusive, any number of
//! Sniffers. While an Exclusive slot exists, Normal writes are rejected and
//! inbound frames bypass the Normal slot.

pub mod cdc;
pub mod sim;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::ChannelError;

/// Subscriber slot modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Normal,
    Exclusive,
    Sniffer,
}

/// Channel readiness, driven by open/close outcomes and the test handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotReady,
    Ready,
}

/// Events delivered to subscriber slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// An inbound frame, or for sniffers also an outbound one.
    Frame(Vec<u8>),
    /// The channel dropped to `NotReady`.
    Down,
}

/// Events produced by a device link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(Vec<u8>),
    Down,
    /// The device recovered; queued work may resume.
    Up,
}

/// Outcome of a single link write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    /// Vendor busy; the channel retries with backoff.
    Busy,
}

/// The raw device under the channel. Production uses the CDC serial link;
/// tests plug in an in-process mock.
#[async_trait]
pub trait ChannelLink: Send + Sync {
    /// Vendor test handshake, run once at open.
    async fn test(&self) -> Result<(), ChannelError>;

    /// Write one frame to the device.
    async fn send(&self, frame: &[u8]) -> Result<SendOutcome, ChannelError>;

    /// Take the inbound event stream. Yields `None` after the first call.
    fn events(&self) -> Option<mpsc::UnboundedReceiver<LinkEvent>>;
}

struct Slot {
    id: u64,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

#[derive(Default)]
struct SlotTable {
    normal: Option<Slot>,
    exclusive: Option<Slot>,
    sniffers: Vec<Slot>,
}

enum ChannelCtl {
    Release { id: u64, mode: AccessMode },
}

struct ChannelShared {
    link: Arc<dyn ChannelLink>,
    slots: RwLock<SlotTable>,
    state_tx: watch::Sender<ChannelState>,
    ctl_tx: mpsc::UnboundedSender<ChannelCtl>,
    /// Serializes link writes; the device accepts one frame at a time.
    write_gate: Mutex<()>,
    next_token: AtomicU64,
    busy_retries: u32,
    busy_backoff: Duration,
    cancel: CancellationToken,
}

/// Scoped handle to a subscriber slot. Dropping the token releases the slot
/// by message to the channel worker; the token never mutates channel state
/// directly.
#[derive(Debug)]
pub struct AccessToken {
    id: u64,
    mode: AccessMode,
    shared: std::sync::Weak<ChannelShared>,
    ctl_tx: mpsc::UnboundedSender<ChannelCtl>,
}

impl AccessToken {
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Send through this token's access mode.
    pub async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let shared = self.shared.upgrade().ok_or(ChannelError::NotReady)?;
        Channel::send_inner(&shared, frame, self.mode).await
    }
}

impl Drop for AccessToken {
    fn drop(&mut self) {
        let _ = self.ctl_tx.send(ChannelCtl::Release { id: self.id, mode: self.mode });
    }
}

/// The channel facade handed to the engine and services.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
    state_rx: watch::Receiver<ChannelState>,
}

impl Channel {
    /// Open a channel over the given link: run the vendor test handshake and
    /// start the reader and control workers. A failed handshake leaves the
    /// channel `NotReady`; sends then fail fast.
    pub async fn open(
        link: Arc<dyn ChannelLink>,
        busy_retries: u32,
        busy_backoff: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let initial = match link.test().await {
            Ok(()) => ChannelState::Ready,
            Err(e) => {
                tracing::warn!(err = %e, "channel test handshake failed");
                ChannelState::NotReady
            }
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ChannelShared {
            link,
            slots: RwLock::new(SlotTable::default()),
            state_tx,
            ctl_tx,
            write_gate: Mutex::new(()),
            next_token: AtomicU64::new(1),
            busy_retries,
            busy_backoff,
            cancel,
        });

        if let Some(events) = shared.link.events() {
            tokio::spawn(reader_loop(Arc::clone(&shared), events));
        }
        tokio::spawn(control_loop(Arc::clone(&shared), ctl_rx));

        Self { shared, state_rx }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Watch for state transitions (used by the engine's hold-until-recovery
    /// queue policy).
    pub fn state_watch(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Register a subscriber slot and return its token plus the event stream.
    ///
    /// Fails with `mode-busy` when the Normal or Exclusive slot is taken.
    pub async fn get_access(
        &self,
        mode: AccessMode,
    ) -> Result<(AccessToken, mpsc::UnboundedReceiver<ChannelEvent>), ChannelError> {
        let mut slots = self.shared.slots.write().await;
        let id = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Slot { id, tx };
        match mode {
            AccessMode::Normal => {
                if slots.normal.is_some() {
                    return Err(ChannelError::ModeBusy);
                }
                slots.normal = Some(slot);
            }
            AccessMode::Exclusive => {
                if slots.exclusive.is_some() {
                    return Err(ChannelError::ModeBusy);
                }
                slots.exclusive = Some(slot);
            }
            AccessMode::Sniffer => slots.sniffers.push(slot),
        }
        drop(slots);

        let token = AccessToken {
            id,
            mode,
            shared: Arc::downgrade(&self.shared),
            ctl_tx: self.shared.ctl_tx.clone(),
        };
        Ok((token, rx))
    }

    /// Send a frame under the given access mode.
    pub async fn send(&self, frame: &[u8], mode: AccessMode) -> Result<(), ChannelError> {
        Self::send_inner(&self.shared, frame, mode).await
    }

    async fn send_inner(
        shared: &Arc<ChannelShared>,
        frame: &[u8],
        mode: AccessMode,
    ) -> Result<(), ChannelError> {
        if *shared.state_tx.borrow() != ChannelState::Ready {
            return Err(ChannelError::NotReady);
        }
        match mode {
            AccessMode::Sniffer => return Err(ChannelError::SnifferWriteForbidden),
            AccessMode::Normal => {
                if shared.slots.read().await.exclusive.is_some() {
                    return Err(ChannelError::ExclusiveActive);
                }
            }
            AccessMode::Exclusive => {}
        }

        let _gate = shared.write_gate.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match shared.link.send(frame).await {
                Ok(SendOutcome::Accepted) => {
                    // Sniffers observe outgoing frames too.
                    let slots = shared.slots.read().await;
                    for sniffer in &slots.sniffers {
                        let _ = sniffer.tx.send(ChannelEvent::Frame(frame.to_vec()));
                    }
                    return Ok(());
                }
                Ok(SendOutcome::Busy) => {
                    if attempt >= shared.busy_retries {
                        tracing::warn!(attempt, "device busy, giving up");
                        return Err(ChannelError::ChannelBusy);
                    }
                    tracing::debug!(attempt, "device busy, retrying");
                    tokio::time::sleep(shared.busy_backoff).await;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "link write failed");
                    mark_down(shared).await;
                    return Err(e);
                }
            }
        }
    }
}

/// Transition to `NotReady` and inject a synthetic down event into every
/// current slot.
async fn mark_down(shared: &Arc<ChannelShared>) {
    if *shared.state_tx.borrow() == ChannelState::NotReady {
        return;
    }
    let _ = shared.state_tx.send(ChannelState::NotReady);
    let slots = shared.slots.read().await;
    for slot in slots
        .normal
        .iter()
        .chain(slots.exclusive.iter())
        .chain(slots.sniffers.iter())
    {
        let _ = slot.tx.send(ChannelEvent::Down);
    }
}

async fn reader_loop(
    shared: Arc<ChannelShared>,
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(e) => e,
                None => {
                    mark_down(&shared).await;
                    break;
                }
            },
        };
        match event {
            LinkEvent::Frame(frame) => dispatch_frame(&shared, frame).await,
            LinkEvent::Down => mark_down(&shared).await,
            LinkEvent::Up => {
                let _ = shared.state_tx.send(ChannelState::Ready);
            }
        }
    }
}

/// Deliver an inbound frame: Exclusive slot if present, else Normal slot,
/// always plus all sniffers.
async fn dispatch_frame(shared: &Arc<ChannelShared>, frame: Vec<u8>) {
    let slots = shared.slots.read().await;
    for sniffer in &slots.sniffers {
        let _ = sniffer.tx.send(ChannelEvent::Frame(frame.clone()));
    }
    let target = slots.exclusive.as_ref().or(slots.normal.as_ref());
    match target {
        Some(slot) => {
            let _ = slot.tx.send(ChannelEvent::Frame(frame));
        }
        None => {
            tracing::debug!(len = frame.len(), "inbound frame with no subscriber, dropped");
        }
    }
}

async fn control_loop(shared: Arc<ChannelShared>, mut ctl_rx: mpsc::UnboundedReceiver<ChannelCtl>) {
    loop {
        let ctl = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            ctl = ctl_rx.recv() => match ctl {
                Some(c) => c,
                None => break,
            },
        };
        match ctl {
            ChannelCtl::Release { id, mode } => {
                let mut slots = shared.slots.write().await;
                match mode {
                    AccessMode::Normal => {
                        if slots.normal.as_ref().is_some_and(|s| s.id == id) {
                            slots.normal = None;
                        }
                    }
                    AccessMode::Exclusive => {
                        if slots.exclusive.as_ref().is_some_and(|s| s.id == id) {
                            slots.exclusive = None;
                        }
                    }
                    AccessMode::Sniffer => slots.sniffers.retain(|s| s.id != id),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
