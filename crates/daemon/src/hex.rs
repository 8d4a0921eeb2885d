// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hex and timestamp encodings used by the verbose `data.raw` response block.
//!
//! Frames render as dot-separated lowercase byte pairs (`"00.a5.b1"`);
//! parsing accepts dot or space separation. Timestamps render as local time
//! `YYYY-MM-DDThh:mm:ss.uuuuuu`.

use chrono::{DateTime, Local};

/// Encode binary data as dot-separated hex byte pairs.
pub fn encode_binary(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push('.');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Parse hex-encoded binary data with dot or space separation.
///
/// Returns `None` on any malformed pair or when the result would exceed
/// `maxlen` bytes.
pub fn parse_binary(from: &str, maxlen: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    for tok in from.split(|c| c == '.' || c == ' ').filter(|t| !t.is_empty()) {
        if out.len() >= maxlen {
            return None;
        }
        out.push(u8::from_str_radix(tok, 16).ok()?);
    }
    Some(out)
}

/// Parse a single hex number (no separator), e.g. `"ffff"` for an hwpid.
pub fn parse_hexa_num(from: &str) -> Option<u64> {
    u64::from_str_radix(from.trim(), 16).ok()
}

/// Encode a timestamp as `YYYY-MM-DDThh:mm:ss.uuuuuu` local time.
///
/// Absent timestamps encode as the empty string.
pub fn encode_timestamp(ts: Option<DateTime<Local>>) -> String {
    match ts {
        Some(t) => t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
#[path = "hex_tests.rs"]
mod tests;
