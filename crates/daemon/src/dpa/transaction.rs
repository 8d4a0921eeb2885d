// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One in-flight DPA request: request → confirmation → response → timeout.
//!
//! The state machine is pure; the engine worker feeds it frames, instants,
//! and timeouts, and drives the channel. Remote requests first expect a
//! coordinator confirmation carrying routing info, which determines the
//! response deadline: `hops × timeslot × 10 ms + 50 ms`, clamped to
//! [100 ms, 11 s]. A caller-supplied timeout ≥ 0 overrides the computed
//! value for every phase.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;

use super::{DpaFrame, NADR_BROADCAST, NADR_COORDINATOR};

/// Coordinator-local requests default to this deadline.
const LOCAL_TIMEOUT: Duration = Duration::from_millis(100);
/// Safety margin added to the hop-computed response deadline.
const RESPONSE_SAFETY_MARGIN: Duration = Duration::from_millis(50);
/// Absolute floor of the response deadline.
const RESPONSE_FLOOR: Duration = Duration::from_millis(100);
/// Absolute ceiling of the response deadline.
const RESPONSE_CEILING: Duration = Duration::from_millis(11_000);
/// Milliseconds per timeslot unit in the deadline formula.
const TIMESLOT_UNIT_MS: u64 = 10;

/// Transaction lifecycle. Transitions are strictly monotonic forward;
/// `Aborted` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransactionState {
    Created,
    Sent,
    ConfirmationAwaiting,
    ConfirmationReceived,
    ResponseAwaiting,
    Completed,
    TimedOut,
    Aborted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Aborted)
    }
}

/// Stable error codes of a sealed transaction.
pub mod error_code {
    pub const OK: i32 = 0;
    pub const TIMEOUT: i32 = 1;
    pub const ABORTED: i32 = 2;
    pub const NETWORK: i32 = 3;
    pub const MALFORMED: i32 = 4;
}

/// What the transaction did with an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Frame advanced the transaction.
    Consumed,
    /// Asynchronous unsolicited frame; must go to the async path.
    Async,
    /// Frame does not belong to this transaction.
    Ignored,
}

/// Sealed outcome of a transaction, moved to the caller on completion.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    pub request: DpaFrame,
    pub confirmation: Option<DpaFrame>,
    pub response: Option<DpaFrame>,
    pub error_code: i32,
    pub error_str: String,
    pub request_ts: Option<DateTime<Local>>,
    pub confirmation_ts: Option<DateTime<Local>>,
    pub response_ts: Option<DateTime<Local>>,
    /// Time spent queued before the request reached the channel.
    pub queued_ms: u64,
}

impl TransactionResult {
    pub fn is_ok(&self) -> bool {
        self.error_code == error_code::OK
    }
}

/// The request → confirmation → response state machine.
#[derive(Debug)]
pub struct DpaTransaction {
    state: TransactionState,
    request: DpaFrame,
    confirmation: Option<DpaFrame>,
    response: Option<DpaFrame>,
    request_ts: Option<DateTime<Local>>,
    confirmation_ts: Option<DateTime<Local>>,
    response_ts: Option<DateTime<Local>>,
    /// Caller override in ms; −1 means use computed defaults.
    user_timeout_ms: i32,
    /// Confirmation-phase default when no override is given.
    default_timeout: Duration,
    deadline: Option<Instant>,
    error_code: i32,
    queued_ms: u64,
}

impl DpaTransaction {
    pub fn new(request: DpaFrame, user_timeout_ms: i32, default_timeout: Duration) -> Self {
        Self {
            state: TransactionState::Created,
            request,
            confirmation: None,
            response: None,
            request_ts: None,
            confirmation_ts: None,
            response_ts: None,
            user_timeout_ms,
            default_timeout,
            deadline: None,
            error_code: error_code::OK,
            queued_ms: 0,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn request(&self) -> &DpaFrame {
        &self.request
    }

    pub fn is_broadcast(&self) -> bool {
        self.request.nadr() == NADR_BROADCAST
    }

    pub fn is_coordinator_local(&self) -> bool {
        self.request.nadr() == NADR_COORDINATOR
    }

    /// Deadline of the current phase; meaningful only while non-terminal
    /// and sent.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn set_queued_ms(&mut self, queued_ms: u64) {
        self.queued_ms = queued_ms;
    }

    fn user_override(&self) -> Option<Duration> {
        (self.user_timeout_ms >= 0).then(|| Duration::from_millis(self.user_timeout_ms as u64))
    }

    /// The request was written to the channel.
    pub fn mark_sent(&mut self, now: Instant, wall: DateTime<Local>) {
        debug_assert_eq!(self.state, TransactionState::Created);
        self.request_ts = Some(wall);
        let phase_timeout = if self.is_coordinator_local() {
            self.user_override().unwrap_or(LOCAL_TIMEOUT)
        } else {
            self.user_override().unwrap_or(self.default_timeout)
        };
        self.deadline = Some(now + phase_timeout);
        self.state = if self.is_coordinator_local() {
            TransactionState::Sent
        } else {
            TransactionState::ConfirmationAwaiting
        };
    }

    /// Response deadline computed from confirmation routing info.
    fn response_timeout(&self, hops_response: u8, timeslot: u8) -> Duration {
        if let Some(user) = self.user_override() {
            return user;
        }
        let computed = Duration::from_millis(
            u64::from(hops_response) * u64::from(timeslot) * TIMESLOT_UNIT_MS,
        ) + RESPONSE_SAFETY_MARGIN;
        computed.clamp(RESPONSE_FLOOR, RESPONSE_CEILING)
    }

    /// Feed an inbound frame. Async frames never alter transaction state.
    pub fn on_frame(&mut self, frame: &DpaFrame, now: Instant, wall: DateTime<Local>) -> FrameDisposition {
        if frame.is_async() {
            return FrameDisposition::Async;
        }
        match self.state {
            TransactionState::Sent => {
                // Coordinator-local: the response arrives directly.
                if frame.is_response() && !frame.is_confirmation() && frame.answers(&self.request) {
                    self.response = Some(frame.clone());
                    self.response_ts = Some(wall);
                    self.state = TransactionState::Completed;
                    FrameDisposition::Consumed
                } else {
                    FrameDisposition::Ignored
                }
            }
            TransactionState::ConfirmationAwaiting => {
                if frame.is_confirmation()
                    && frame.nadr() == self.request.nadr()
                    && frame.pnum() == self.request.pnum()
                {
                    self.confirmation = Some(frame.clone());
                    self.confirmation_ts = Some(wall);
                    if self.is_broadcast() {
                        // Broadcasts never produce a response.
                        self.state = TransactionState::Completed;
                    } else if let Some(info) = frame.confirmation_info() {
                        self.deadline =
                            Some(now + self.response_timeout(info.hops_response, info.timeslot));
                        self.state = TransactionState::ResponseAwaiting;
                    } else {
                        self.error_code = error_code::MALFORMED;
                        self.state = TransactionState::TimedOut;
                    }
                    FrameDisposition::Consumed
                } else {
                    FrameDisposition::Ignored
                }
            }
            TransactionState::ResponseAwaiting => {
                if frame.is_response() && !frame.is_confirmation() && frame.answers(&self.request) {
                    self.response = Some(frame.clone());
                    self.response_ts = Some(wall);
                    self.state = TransactionState::Completed;
                    FrameDisposition::Consumed
                } else {
                    FrameDisposition::Ignored
                }
            }
            _ => FrameDisposition::Ignored,
        }
    }

    /// The current phase deadline elapsed.
    pub fn on_timeout(&mut self) {
        if !self.is_terminal() {
            self.error_code = error_code::TIMEOUT;
            self.state = TransactionState::TimedOut;
        }
    }

    /// The caller cancelled a not-yet-sealed transaction.
    pub fn abort(&mut self) {
        if !self.is_terminal() {
            self.error_code = error_code::ABORTED;
            self.state = TransactionState::Aborted;
        }
    }

    /// The channel dropped to `NotReady` mid-flight.
    pub fn fail_network(&mut self) {
        if !self.is_terminal() {
            self.error_code = error_code::NETWORK;
            self.state = TransactionState::TimedOut;
        }
    }

    /// Seal into an immutable result. Callable only in a terminal state.
    pub fn seal(self) -> TransactionResult {
        debug_assert!(self.is_terminal());
        let error_str = match self.error_code {
            error_code::OK => "ok".to_owned(),
            error_code::TIMEOUT => "timeout: no response within deadline".to_owned(),
            error_code::ABORTED => "aborted".to_owned(),
            error_code::NETWORK => "network-down".to_owned(),
            error_code::MALFORMED => "malformed-response".to_owned(),
            other => format!("error {other}"),
        };
        TransactionResult {
            request: self.request,
            confirmation: self.confirmation,
            response: self.response,
            error_code: self.error_code,
            error_str,
            request_ts: self.request_ts,
            confirmation_ts: self.confirmation_ts,
            response_ts: self.response_ts,
            queued_ms: self.queued_ms,
        }
    }
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;
