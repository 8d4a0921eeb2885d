// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use chrono::Local;
use tokio::time::Instant;

use super::*;
use crate::dpa::HWPID_ANY;

const DEFAULT: Duration = Duration::from_millis(500);

fn local_request() -> DpaFrame {
    DpaFrame::request(0x0000, 0x00, 0x00, HWPID_ANY, &[]).unwrap()
}

fn remote_request(nadr: u16) -> DpaFrame {
    DpaFrame::request(nadr, 0x06, 0x00, HWPID_ANY, &[]).unwrap()
}

fn confirmation(nadr: u16, hops_req: u8, timeslot: u8, hops_resp: u8) -> DpaFrame {
    let lo = (nadr & 0xff) as u8;
    let hi = (nadr >> 8) as u8;
    DpaFrame::from_bytes(vec![lo, hi, 0x06, 0xff, 0xff, 0xff, 0xff, 0xff, hops_req, timeslot, hops_resp])
        .unwrap()
}

fn remote_response(nadr: u16) -> DpaFrame {
    let lo = (nadr & 0xff) as u8;
    let hi = (nadr >> 8) as u8;
    DpaFrame::from_bytes(vec![lo, hi, 0x06, 0x80, 0xff, 0xff, 0x00, 0x5a, 0x01]).unwrap()
}

#[test]
fn local_request_completes_on_direct_response() {
    let mut txn = DpaTransaction::new(local_request(), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    assert_eq!(txn.state(), TransactionState::Sent);
    // Default local deadline is 100 ms.
    assert_eq!(txn.deadline().unwrap(), now + Duration::from_millis(100));

    let rsp = DpaFrame::from_bytes(vec![0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0x40, 0x04, 0x2a])
        .unwrap();
    assert_eq!(txn.on_frame(&rsp, now, Local::now()), FrameDisposition::Consumed);
    assert_eq!(txn.state(), TransactionState::Completed);

    let result = txn.seal();
    assert!(result.is_ok());
    assert!(result.confirmation.is_none());
    assert_eq!(result.response.unwrap().response_payload(), &[0x04, 0x2a]);
}

#[test]
fn remote_request_waits_for_confirmation_then_response() {
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    assert_eq!(txn.state(), TransactionState::ConfirmationAwaiting);
    assert_eq!(txn.deadline().unwrap(), now + DEFAULT);

    let at_conf = now + Duration::from_millis(20);
    assert_eq!(
        txn.on_frame(&confirmation(1, 3, 20, 3), at_conf, Local::now()),
        FrameDisposition::Consumed
    );
    assert_eq!(txn.state(), TransactionState::ResponseAwaiting);
    // 3 hops x 20 timeslot x 10 ms + 50 ms margin = 650 ms after confirmation.
    assert_eq!(txn.deadline().unwrap(), at_conf + Duration::from_millis(650));

    assert_eq!(
        txn.on_frame(&remote_response(1), at_conf, Local::now()),
        FrameDisposition::Consumed
    );
    assert_eq!(txn.state(), TransactionState::Completed);

    let result = txn.seal();
    assert!(result.is_ok());
    assert!(result.confirmation.is_some());
    assert!(result.confirmation_ts.is_some());
    assert!(result.request_ts.unwrap() <= result.confirmation_ts.unwrap());
    assert!(result.confirmation_ts.unwrap() <= result.response_ts.unwrap());
}

#[test]
fn user_timeout_overrides_computed_deadline() {
    let mut txn = DpaTransaction::new(remote_request(1), 2000, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    assert_eq!(txn.deadline().unwrap(), now + Duration::from_millis(2000));

    txn.on_frame(&confirmation(1, 3, 20, 3), now, Local::now());
    // Override wins over the 650 ms computed value.
    assert_eq!(txn.deadline().unwrap(), now + Duration::from_millis(2000));
}

#[test]
fn response_deadline_floor_and_ceiling() {
    // 1 hop x 1 timeslot x 10 ms + 50 ms = 60 ms, below the 100 ms floor.
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    txn.on_frame(&confirmation(1, 1, 1, 1), now, Local::now());
    assert_eq!(txn.deadline().unwrap(), now + Duration::from_millis(100));

    // 239 hops x 255 timeslot x 10 ms blows past the 11 s ceiling.
    let mut txn = DpaTransaction::new(remote_request(2), -1, DEFAULT);
    let conf = confirmation(2, 239, 255, 239);
    txn.mark_sent(now, Local::now());
    txn.on_frame(&conf, now, Local::now());
    assert_eq!(txn.deadline().unwrap(), now + Duration::from_millis(11_000));
}

#[test]
fn broadcast_completes_at_confirmation() {
    let mut txn = DpaTransaction::new(remote_request(NADR_BROADCAST), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    txn.on_frame(&confirmation(NADR_BROADCAST, 3, 20, 3), now, Local::now());
    assert_eq!(txn.state(), TransactionState::Completed);
    let result = txn.seal();
    assert!(result.is_ok());
    assert!(result.response.is_none());
}

#[test]
fn timeout_while_awaiting_confirmation() {
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    txn.mark_sent(Instant::now(), Local::now());
    txn.on_timeout();
    assert_eq!(txn.state(), TransactionState::TimedOut);
    let result = txn.seal();
    assert_eq!(result.error_code, error_code::TIMEOUT);
    assert!(result.response.is_none());
}

#[test]
fn timeout_after_confirmation_keeps_confirmation() {
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    txn.on_frame(&confirmation(1, 3, 20, 3), now, Local::now());
    txn.on_timeout();
    let result = txn.seal();
    assert_eq!(result.error_code, error_code::TIMEOUT);
    assert!(result.confirmation.is_some());
    assert!(result.response.is_none());
}

#[test]
fn async_frame_never_alters_state() {
    let mut txn = DpaTransaction::new(remote_request(2), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());

    // Async frame from the same node and peripheral.
    let async_frame =
        DpaFrame::from_bytes(vec![0x02, 0x00, 0x06, 0x80, 0xff, 0xff, 0x80, 0x00]).unwrap();
    assert_eq!(txn.on_frame(&async_frame, now, Local::now()), FrameDisposition::Async);
    assert_eq!(txn.state(), TransactionState::ConfirmationAwaiting);
}

#[test]
fn unrelated_frame_ignored() {
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    txn.on_frame(&confirmation(1, 3, 20, 3), now, Local::now());

    // Response from a different node.
    assert_eq!(txn.on_frame(&remote_response(9), now, Local::now()), FrameDisposition::Ignored);
    assert_eq!(txn.state(), TransactionState::ResponseAwaiting);
}

#[test]
fn abort_from_any_non_terminal_state() {
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    txn.abort();
    assert_eq!(txn.state(), TransactionState::Aborted);

    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    txn.mark_sent(Instant::now(), Local::now());
    txn.abort();
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(txn.seal().error_code, error_code::ABORTED);
}

#[test]
fn terminal_state_is_sticky() {
    let mut txn = DpaTransaction::new(local_request(), -1, DEFAULT);
    let now = Instant::now();
    txn.mark_sent(now, Local::now());
    txn.on_timeout();
    assert_eq!(txn.state(), TransactionState::TimedOut);
    // A late abort or frame must not move a sealed transaction.
    txn.abort();
    assert_eq!(txn.state(), TransactionState::TimedOut);
}

#[test]
fn network_failure_seals_with_network_code() {
    let mut txn = DpaTransaction::new(remote_request(1), -1, DEFAULT);
    txn.mark_sent(Instant::now(), Local::now());
    txn.fail_network();
    let result = txn.seal();
    assert_eq!(result.error_code, error_code::NETWORK);
}
