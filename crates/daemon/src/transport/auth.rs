// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API token validation for external transports.
//!
//! Token format: `iqrfgd2;<id:u32>;<secret:base64 32 bytes>`. Validation
//! compares SHA-256(salt ‖ secret) against the stored hash in constant time
//! and honors the `expires_at` and `revoked` flags.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::db::{ApiTokenRecord, Database};
use crate::error::{AuthFault, GwError};

/// Token type accepted by this daemon.
pub const TOKEN_PREFIX: &str = "iqrfgd2";
/// Decoded secret length in bytes.
pub const SECRET_LEN: usize = 32;

/// Parsed wire token before database lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    pub id: u32,
    pub secret: Vec<u8>,
}

/// Constant-time byte comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Parse the `prefix;id;secret` wire format.
pub fn parse_token(token: &str) -> Result<ParsedToken, GwError> {
    let parts: Vec<&str> = token.split(';').collect();
    if parts.len() != 3 {
        return Err(GwError::Auth(AuthFault::InvalidFormat));
    }
    if parts[0] != TOKEN_PREFIX {
        return Err(GwError::Auth(AuthFault::UnsupportedType));
    }
    let id: u32 = parts[1].parse().map_err(|_| GwError::Auth(AuthFault::InvalidFormat))?;
    let secret =
        BASE64.decode(parts[2]).map_err(|_| GwError::Auth(AuthFault::InvalidFormat))?;
    if secret.len() != SECRET_LEN {
        return Err(GwError::Auth(AuthFault::InvalidFormat));
    }
    Ok(ParsedToken { id, secret })
}

/// SHA-256 over salt ‖ secret.
pub fn hash_secret(salt: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret);
    hasher.finalize().to_vec()
}

/// Validate a wire token against the stored record set.
pub fn validate_token(
    db: &Database,
    token: &str,
    now_epoch: i64,
) -> Result<ApiTokenRecord, GwError> {
    let parsed = parse_token(token)?;
    let record = db
        .api_token(parsed.id)
        .map_err(|e| {
            tracing::warn!(err = %e, "token lookup failed");
            GwError::Auth(AuthFault::NotFound)
        })?
        .ok_or(GwError::Auth(AuthFault::NotFound))?;

    if record.revoked {
        return Err(GwError::Auth(AuthFault::Revoked));
    }
    if record.expires_at != 0 && record.expires_at < now_epoch {
        return Err(GwError::Auth(AuthFault::Expired));
    }

    let salt =
        BASE64.decode(&record.salt).map_err(|_| GwError::Auth(AuthFault::Mismatch))?;
    let stored_hash =
        BASE64.decode(&record.hash).map_err(|_| GwError::Auth(AuthFault::Mismatch))?;
    let computed = hash_secret(&salt, &parsed.secret);
    if !constant_time_eq(&computed, &stored_hash) {
        return Err(GwError::Auth(AuthFault::Mismatch));
    }
    Ok(record)
}

/// Mint a new token: returns the wire token string after persisting the
/// salted hash.
pub fn issue_token(
    db: &Database,
    owner: &str,
    expires_at: i64,
    service: bool,
    now_epoch: i64,
) -> Result<String, GwError> {
    use rand::RngCore;

    let mut salt = [0u8; 16];
    let mut secret = [0u8; SECRET_LEN];
    rand::rng().fill_bytes(&mut salt);
    rand::rng().fill_bytes(&mut secret);

    let hash = hash_secret(&salt, &secret);
    let id = db
        .insert_api_token(
            owner,
            &BASE64.encode(salt),
            &BASE64.encode(hash),
            now_epoch,
            expires_at,
            service,
        )
        .map_err(|e| {
            tracing::warn!(err = %e, "token insert failed");
            GwError::Auth(AuthFault::NotFound)
        })?;
    Ok(format!("{TOKEN_PREFIX};{id};{}", BASE64.encode(secret)))
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
