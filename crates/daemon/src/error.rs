// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error taxonomy for the gateway API.
///
/// The integer codes are part of the wire contract: they appear verbatim in
/// `data.status` of every JSON response and must stay stable across releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GwError {
    /// No response arrived within the transaction deadline.
    Timeout,
    /// The transaction was cancelled before completion.
    Aborted,
    /// The serial channel is not ready.
    NetworkDown,
    /// Response frame too short or header mismatch.
    MalformedResponse,
    /// Exclusive access is already held by another caller.
    ExclusiveBusy,
    /// Driver lookup, evaluation, or execution failed.
    Driver(DriverFault),
    /// Request failed JSON schema validation.
    InvalidRequest,
    /// No handler is registered for the message type.
    UnsupportedMsgType,
    /// A transport send queue rejected the message.
    QueueFull,
    /// API token missing, malformed, expired, or revoked.
    Auth(AuthFault),
}

/// Failure modes of the driver sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverFault {
    NotFound,
    /// Carries the driver's own error string.
    Runtime(String),
    LoadError(String),
    Reentrant,
}

/// Failure modes of API token validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFault {
    InvalidFormat,
    UnsupportedType,
    NotFound,
    Expired,
    Revoked,
    Mismatch,
}

impl GwError {
    /// Stable status code carried in `data.status`.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Timeout => 1,
            Self::Aborted => 2,
            Self::NetworkDown => 3,
            Self::MalformedResponse => 4,
            Self::ExclusiveBusy => 5,
            Self::Driver(_) => 6,
            Self::InvalidRequest => 7,
            Self::UnsupportedMsgType => 8,
            Self::QueueFull => 9,
            Self::Auth(_) => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::NetworkDown => "network-down",
            Self::MalformedResponse => "malformed-response",
            Self::ExclusiveBusy => "exclusive-busy",
            Self::Driver(DriverFault::NotFound) => "driver-not-found",
            Self::Driver(DriverFault::Runtime(_)) => "driver-runtime-error",
            Self::Driver(DriverFault::LoadError(_)) => "driver-load-error",
            Self::Driver(DriverFault::Reentrant) => "driver-reentrant",
            Self::InvalidRequest => "invalid-request",
            Self::UnsupportedMsgType => "unsupported-mtype",
            Self::QueueFull => "queue-full",
            Self::Auth(AuthFault::InvalidFormat) => "auth-invalid-format",
            Self::Auth(AuthFault::UnsupportedType) => "auth-unsupported-type",
            Self::Auth(AuthFault::NotFound) => "auth-not-found",
            Self::Auth(AuthFault::Expired) => "auth-expired",
            Self::Auth(AuthFault::Revoked) => "auth-revoked",
            Self::Auth(AuthFault::Mismatch) => "auth-mismatch",
        }
    }
}

impl fmt::Display for GwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Driver(DriverFault::Runtime(msg)) => {
                write!(f, "driver-runtime-error: {msg}")
            }
            Self::Driver(DriverFault::LoadError(msg)) => {
                write!(f, "driver-load-error: {msg}")
            }
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for GwError {}

/// Errors local to the channel layer, mapped onto [`GwError`] by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Channel state is `NotReady`.
    NotReady,
    /// Requested slot is already occupied.
    ModeBusy,
    /// Write attempted through a sniffer token.
    SnifferWriteForbidden,
    /// Exclusive slot is active, normal writes are blocked.
    ExclusiveActive,
    /// The device kept reporting busy after all retries.
    ChannelBusy,
    /// I/O failure on the underlying device.
    Io(String),
}

impl ChannelError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotReady => "not-ready",
            Self::ModeBusy => "mode-busy",
            Self::SnifferWriteForbidden => "sniffer-write-forbidden",
            Self::ExclusiveActive => "exclusive-active",
            Self::ChannelBusy => "channel-busy",
            Self::Io(_) => "io",
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "io: {msg}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl std::error::Error for ChannelError {}
