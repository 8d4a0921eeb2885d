// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The DPA transaction engine: admission, strict FIFO ordering, exclusive
//! access arbitration, async event fan-out, and the coordinator-parameter
//! cache.
//!
//! One worker drives exactly one transaction at a time against the channel.
//! Submitters suspend until their transaction seals. An exclusive holder
//! submits through a distinct path that bypasses the normal queue; the
//! running transaction always completes first.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Local;
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::{AccessMode, AccessToken, Channel, ChannelEvent, ChannelState};
use crate::config::OnChannelDown;
use crate::error::{ChannelError, GwError};

use super::params::{
    self, CoordinatorParameters, Observation, CMD_COORDINATOR_BONDED_DEVICES,
    CMD_COORDINATOR_DISCOVERED_DEVICES, CMD_OS_READ, PNUM_COORDINATOR, PNUM_OS,
};
use super::transaction::{DpaTransaction, FrameDisposition, TransactionResult};
use super::{DpaFrame, HWPID_ANY};

/// Per-submission options.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// Caller timeout in ms; −1 selects the computed defaults.
    pub timeout_ms: i32,
    /// Total admissions on non-success terminals; never applied to Aborted.
    pub repeat: u32,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self { timeout_ms: -1, repeat: 1 }
    }
}

struct Submission {
    request: DpaFrame,
    opts: SubmitOptions,
    reply: oneshot::Sender<TransactionResult>,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
    enqueued_at: Instant,
}

enum EngineCmd {
    Acquire,
    Release,
    Run(Submission),
}

/// Awaitable handle for a submitted transaction.
pub struct PendingTransaction {
    rx: oneshot::Receiver<TransactionResult>,
    cancel: CancellationToken,
    started: Arc<AtomicBool>,
    request: DpaFrame,
}

impl PendingTransaction {
    /// Request cancellation. Effective only while the transaction is still
    /// queued; the currently-executing transaction cannot be cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Suspend until the transaction seals.
    pub async fn wait(mut self) -> TransactionResult {
        tokio::select! {
            result = &mut self.rx => {
                return result.unwrap_or_else(|_| aborted_result(self.request.clone()));
            }
            _ = self.cancel.cancelled() => {}
        }
        if !self.started.load(Ordering::Acquire) {
            // Still queued: the worker discards it on pop.
            return aborted_result(self.request.clone());
        }
        // Already on the wire; it runs to completion.
        let result = self.rx.await;
        result.unwrap_or_else(|_| aborted_result(self.request.clone()))
    }
}

fn aborted_result(request: DpaFrame) -> TransactionResult {
    let mut txn = DpaTransaction::new(request, -1, std::time::Duration::from_millis(0));
    txn.abort();
    txn.seal()
}

struct EngineShared {
    submit_tx: mpsc::Sender<Submission>,
    cmd_tx: mpsc::UnboundedSender<EngineCmd>,
    exclusive_held: AtomicBool,
    default_timeout_ms: AtomicU64,
    params: RwLock<Arc<CoordinatorParameters>>,
    subscribers: RwLock<IndexMap<String, mpsc::UnboundedSender<DpaFrame>>>,
    cancel: CancellationToken,
}

/// Handle for the exclusive-submission path. Dropping it resumes normal
/// queue processing.
pub struct ExclusiveAccess {
    shared: Arc<EngineShared>,
}

impl ExclusiveAccess {
    /// Submit through the path that bypasses the normal queue.
    pub fn submit(&self, request: DpaFrame, opts: SubmitOptions) -> PendingTransaction {
        let (submission, pending) = make_submission(request, opts);
        let _ = self.shared.cmd_tx.send(EngineCmd::Run(submission));
        pending
    }
}

impl Drop for ExclusiveAccess {
    fn drop(&mut self) {
        self.shared.exclusive_held.store(false, Ordering::Release);
        let _ = self.shared.cmd_tx.send(EngineCmd::Release);
    }
}

fn make_submission(request: DpaFrame, opts: SubmitOptions) -> (Submission, PendingTransaction) {
    let (reply_tx, reply_rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    let started = Arc::new(AtomicBool::new(false));
    let submission = Submission {
        request: request.clone(),
        opts,
        reply: reply_tx,
        cancel: cancel.clone(),
        started: Arc::clone(&started),
        enqueued_at: Instant::now(),
    };
    let pending = PendingTransaction { rx: reply_rx, cancel, started, request };
    (submission, pending)
}

/// The engine facade handed to API handlers and services.
#[derive(Clone)]
pub struct DpaEngine {
    shared: Arc<EngineShared>,
}

impl DpaEngine {
    /// Start the engine worker on the given channel. The worker takes the
    /// channel's Normal slot.
    pub async fn start(
        channel: Channel,
        default_timeout_ms: u64,
        queue_capacity: usize,
        on_channel_down: OnChannelDown,
        rf_mode: params::RfMode,
        cancel: CancellationToken,
    ) -> Result<Self, ChannelError> {
        let (token, events) = channel.get_access(AccessMode::Normal).await?;
        let (submit_tx, submit_rx) = mpsc::channel(queue_capacity);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let initial = CoordinatorParameters { rf_mode, ..Default::default() };

        let shared = Arc::new(EngineShared {
            submit_tx,
            cmd_tx,
            exclusive_held: AtomicBool::new(false),
            default_timeout_ms: AtomicU64::new(default_timeout_ms),
            params: RwLock::new(Arc::new(initial)),
            subscribers: RwLock::new(IndexMap::new()),
            cancel: cancel.clone(),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            channel,
            token,
            events,
            submit_rx,
            cmd_rx,
            exclusive_active: false,
            on_channel_down,
        };
        tokio::spawn(worker.run());

        Ok(Self { shared })
    }

    /// Admit a transaction to the FIFO queue. Suspends while the queue is at
    /// capacity.
    pub async fn submit(&self, request: DpaFrame, opts: SubmitOptions) -> PendingTransaction {
        let (submission, pending) = make_submission(request, opts);
        if self.shared.submit_tx.send(submission).await.is_err() {
            // Worker gone; the pending handle resolves as aborted.
            tracing::warn!("engine worker is gone, submission dropped");
        }
        pending
    }

    /// Submit and wait for the sealed result.
    pub async fn execute(&self, request: DpaFrame, opts: SubmitOptions) -> TransactionResult {
        self.submit(request, opts).await.wait().await
    }

    /// Take the exclusive-submission path. Fails with `exclusive-busy` while
    /// another holder exists.
    pub fn acquire_exclusive(&self) -> Result<ExclusiveAccess, GwError> {
        if self
            .shared
            .exclusive_held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GwError::ExclusiveBusy);
        }
        let _ = self.shared.cmd_tx.send(EngineCmd::Acquire);
        Ok(ExclusiveAccess { shared: Arc::clone(&self.shared) })
    }

    /// Register an async-notification subscriber. Frames are delivered in
    /// registration order across subscribers, in arrival order per frame.
    pub async fn subscribe_async(&self, subscriber_id: &str) -> mpsc::UnboundedReceiver<DpaFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.write().await.insert(subscriber_id.to_owned(), tx);
        rx
    }

    pub async fn unsubscribe_async(&self, subscriber_id: &str) {
        self.shared.subscribers.write().await.shift_remove(subscriber_id);
    }

    /// Consistent snapshot of the coordinator parameters.
    pub async fn params(&self) -> Arc<CoordinatorParameters> {
        Arc::clone(&*self.shared.params.read().await)
    }

    pub fn default_timeout_ms(&self) -> u64 {
        self.shared.default_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn set_default_timeout_ms(&self, timeout_ms: u64) {
        self.shared.default_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    /// Issue the startup reads: OS identity, bonded devices, discovered
    /// devices. The worker's observation hook folds the responses into the
    /// parameter cache; failures leave the fields at their defaults.
    pub async fn bootstrap(&self) {
        let reads = [
            (PNUM_OS, CMD_OS_READ),
            (PNUM_COORDINATOR, CMD_COORDINATOR_BONDED_DEVICES),
            (PNUM_COORDINATOR, CMD_COORDINATOR_DISCOVERED_DEVICES),
        ];
        for (pnum, pcmd) in reads {
            let Ok(request) = DpaFrame::request(0, pnum, pcmd, HWPID_ANY, &[]) else {
                continue;
            };
            let result = self.execute(request, SubmitOptions::default()).await;
            if !result.is_ok() {
                tracing::warn!(pnum, pcmd, status = result.error_code, "bootstrap read failed");
            }
        }
    }
}

struct Worker {
    shared: Arc<EngineShared>,
    channel: Channel,
    token: AccessToken,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    submit_rx: mpsc::Receiver<Submission>,
    cmd_rx: mpsc::UnboundedReceiver<EngineCmd>,
    exclusive_active: bool,
    on_channel_down: OnChannelDown,
}

impl Worker {
    async fn run(mut self) {
        loop {
            // Exclusive-path commands outrank the normal queue.
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                Some(cmd) = self.cmd_rx.recv() => match cmd {
                    EngineCmd::Acquire => self.exclusive_active = true,
                    EngineCmd::Release => self.exclusive_active = false,
                    EngineCmd::Run(sub) => self.run_submission(sub).await,
                },
                Some(sub) = self.submit_rx.recv(), if !self.exclusive_active => {
                    self.run_submission(sub).await;
                }
                Some(event) = self.events.recv() => self.on_idle_event(event).await,
            }
        }
    }

    /// Frames arriving while no transaction runs: async notifications and
    /// stragglers from timed-out transactions.
    async fn on_idle_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Frame(bytes) => match DpaFrame::from_bytes(bytes) {
                Ok(frame) if frame.is_async() => self.publish_async(frame).await,
                Ok(frame) => {
                    tracing::debug!(nadr = frame.nadr(), pnum = frame.pnum(), "stray frame dropped");
                }
                Err(_) => tracing::debug!("undersized frame dropped"),
            },
            ChannelEvent::Down => {
                tracing::warn!("channel went down while idle");
            }
        }
    }

    async fn publish_async(&self, frame: DpaFrame) {
        let subscribers = self.shared.subscribers.read().await;
        for (id, tx) in subscribers.iter() {
            if tx.send(frame.clone()).is_err() {
                tracing::debug!(subscriber = %id, "async subscriber gone");
            }
        }
    }

    async fn run_submission(&mut self, sub: Submission) {
        if sub.cancel.is_cancelled() {
            // Cancelled while queued; the submitter already unblocked.
            return;
        }

        // Channel not ready: fail fast or hold until recovery per policy.
        if self.channel.state() != ChannelState::Ready {
            match self.on_channel_down {
                OnChannelDown::Fail => {
                    let mut txn = new_transaction(&self.shared, &sub);
                    txn.fail_network();
                    let _ = sub.reply.send(txn.seal());
                    return;
                }
                OnChannelDown::Hold => {
                    let mut watch = self.channel.state_watch();
                    tokio::select! {
                        _ = self.shared.cancel.cancelled() => return,
                        _ = sub.cancel.cancelled() => return,
                        r = watch.wait_for(|s| *s == ChannelState::Ready) => {
                            if r.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }

        sub.started.store(true, Ordering::Release);
        let queued_ms = sub.enqueued_at.elapsed().as_millis() as u64;
        let repeats = sub.opts.repeat.max(1);

        let mut result = None;
        for attempt in 0..repeats {
            let outcome = self.run_once(&sub, queued_ms).await;
            let terminal_ok = outcome.is_ok();
            let aborted = outcome.error_code == super::transaction::error_code::ABORTED;
            result = Some(outcome);
            if terminal_ok || aborted {
                break;
            }
            if attempt + 1 < repeats {
                tracing::debug!(attempt = attempt + 1, "re-admitting failed transaction");
            }
        }

        if let Some(result) = result {
            self.observe(&sub.request, &result).await;
            let _ = sub.reply.send(result);
        }
    }

    async fn run_once(&mut self, sub: &Submission, queued_ms: u64) -> TransactionResult {
        let mut txn = new_transaction(&self.shared, sub);
        txn.set_queued_ms(queued_ms);

        if let Err(e) = self.token.send(sub.request.as_bytes()).await {
            tracing::warn!(err = %e, "request write failed");
            txn.fail_network();
            return txn.seal();
        }
        txn.mark_sent(Instant::now(), Local::now());

        while !txn.is_terminal() {
            let deadline = match txn.deadline() {
                Some(d) => d,
                None => break,
            };
            tokio::select! {
                _ = self.shared.cancel.cancelled() => txn.abort(),
                _ = tokio::time::sleep_until(deadline) => txn.on_timeout(),
                event = self.events.recv() => match event {
                    Some(ChannelEvent::Frame(bytes)) => match DpaFrame::from_bytes(bytes) {
                        Ok(frame) => {
                            if txn.on_frame(&frame, Instant::now(), Local::now())
                                == FrameDisposition::Async
                            {
                                self.publish_async(frame).await;
                            }
                        }
                        Err(_) => tracing::debug!("undersized frame dropped"),
                    },
                    Some(ChannelEvent::Down) => {
                        // Ignore down notices queued before a recovery.
                        if self.channel.state() != ChannelState::Ready {
                            txn.fail_network();
                        }
                    }
                    None => txn.fail_network(),
                },
            }
        }
        txn.seal()
    }

    /// Keep the coordinator-parameter cache current from responses flowing
    /// through the engine.
    async fn observe(&self, request: &DpaFrame, result: &TransactionResult) {
        let Some(ref response) = result.response else {
            return;
        };
        if response.pnum() == PNUM_OS && request.pcmd() == CMD_OS_READ {
            let mut snapshot = (**self.shared.params.read().await).clone();
            if params::apply_os_read(&mut snapshot, response) {
                *self.shared.params.write().await = Arc::new(snapshot);
            }
            return;
        }
        let mut snapshot = (**self.shared.params.read().await).clone();
        let observation = params::apply_observation(&mut snapshot, request, response);
        if snapshot != **self.shared.params.read().await {
            *self.shared.params.write().await = Arc::new(snapshot);
        }
        if observation == Observation::RefreshDiscovered {
            self.spawn_refresh_discovered();
        }
    }

    /// A discovery ran: re-read the discovered-devices bitmap through the
    /// normal queue, off the worker task. The observation hook applies the
    /// refreshed bitmap when the read completes.
    fn spawn_refresh_discovered(&self) {
        let engine = DpaEngine { shared: Arc::clone(&self.shared) };
        tokio::spawn(async move {
            let Ok(request) = DpaFrame::request(
                0,
                PNUM_COORDINATOR,
                CMD_COORDINATOR_DISCOVERED_DEVICES,
                HWPID_ANY,
                &[],
            ) else {
                return;
            };
            let result = engine.execute(request, SubmitOptions::default()).await;
            if !result.is_ok() {
                tracing::debug!(status = result.error_code, "discovered-devices refresh failed");
            }
        });
    }
}

fn new_transaction(shared: &Arc<EngineShared>, sub: &Submission) -> DpaTransaction {
    let default_timeout =
        std::time::Duration::from_millis(shared.default_timeout_ms.load(Ordering::Relaxed));
    DpaTransaction::new(sub.request.clone(), sub.opts.timeout_ms, default_timeout)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
