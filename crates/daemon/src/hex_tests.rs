// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn encode_binary_dot_separated() {
    assert_eq!(encode_binary(&[0x00, 0xa5, 0xb1]), "00.a5.b1");
}

#[test]
fn encode_binary_empty() {
    assert_eq!(encode_binary(&[]), "");
}

#[test]
fn parse_binary_dot_separated() {
    assert_eq!(parse_binary("00.a5.b1", 64), Some(vec![0x00, 0xa5, 0xb1]));
}

#[test]
fn parse_binary_space_separated() {
    assert_eq!(parse_binary("00 a5 b1", 64), Some(vec![0x00, 0xa5, 0xb1]));
}

#[test]
fn parse_binary_rejects_garbage() {
    assert!(parse_binary("00.zz", 64).is_none());
}

#[test]
fn parse_binary_respects_maxlen() {
    assert!(parse_binary("00.01.02", 2).is_none());
    assert_eq!(parse_binary("00.01", 2), Some(vec![0x00, 0x01]));
}

#[test]
fn parse_binary_empty_string() {
    assert_eq!(parse_binary("", 64), Some(vec![]));
}

#[test]
fn parse_hexa_num_u16() {
    assert_eq!(parse_hexa_num("ffff"), Some(0xffff));
    assert_eq!(parse_hexa_num("00"), Some(0));
    assert!(parse_hexa_num("xyz").is_none());
}

#[test]
fn encode_timestamp_none_is_empty() {
    assert_eq!(encode_timestamp(None), "");
}

#[test]
fn encode_timestamp_has_micros() {
    let ts = Local::now();
    let s = encode_timestamp(Some(ts));
    // YYYY-MM-DDThh:mm:ss.uuuuuu
    assert_eq!(s.len(), 26);
    assert_eq!(&s[10..11], "T");
    assert_eq!(&s[19..20], ".");
}

#[test]
fn round_trip_frame() {
    let frame = vec![0x01, 0x00, 0x06, 0x80, 0xff, 0xff, 0x00, 0x5a];
    let encoded = encode_binary(&frame);
    assert_eq!(parse_binary(&encoded, 64), Some(frame));
}
