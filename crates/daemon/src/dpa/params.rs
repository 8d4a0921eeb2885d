// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cached coordinator parameters: identity, version, bonded and discovered
//! nodes, routing hops. The engine refreshes the cache at startup and keeps
//! it current by observing coordinator responses passing through it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::DpaFrame;

/// Coordinator peripheral number.
pub const PNUM_COORDINATOR: u8 = 0x00;
/// OS peripheral number.
pub const PNUM_OS: u8 = 0x02;

/// Coordinator commands the engine issues or observes.
pub const CMD_COORDINATOR_ADDR_INFO: u8 = 0x00;
pub const CMD_COORDINATOR_DISCOVERED_DEVICES: u8 = 0x01;
pub const CMD_COORDINATOR_BONDED_DEVICES: u8 = 0x02;
pub const CMD_COORDINATOR_CLEAR_ALL_BONDS: u8 = 0x03;
pub const CMD_COORDINATOR_BOND_NODE: u8 = 0x04;
pub const CMD_COORDINATOR_REMOVE_BOND: u8 = 0x05;
pub const CMD_COORDINATOR_DISCOVERY: u8 = 0x07;
pub const CMD_COORDINATOR_SET_HOPS: u8 = 0x09;

/// OS Read command.
pub const CMD_OS_READ: u8 = 0x00;

/// RF communication mode of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RfMode {
    #[default]
    Std,
    Lp,
}

/// Immutable-after-init coordinator record, published by snapshot swap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorParameters {
    pub module_id: u32,
    pub os_version: u8,
    pub os_build: u16,
    pub dpa_version: u16,
    pub tr_type: u8,
    pub rf_mode: RfMode,
    pub bonded_devices: BTreeSet<u8>,
    pub discovered_devices: BTreeSet<u8>,
    pub hops_request: u8,
    pub hops_response: u8,
}

/// Follow-up work an observation may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    None,
    /// A discovery ran; the discovered-devices bitmap must be re-read.
    RefreshDiscovered,
}

/// Parse an OS Read response payload into identity fields.
///
/// Layout: moduleId[4 le] osVersion[1] trType[1] osBuild[2 le]; the DPA
/// version rides in the dpaval byte convention of the enumeration flow and
/// is filled in separately when known.
pub fn apply_os_read(params: &mut CoordinatorParameters, response: &DpaFrame) -> bool {
    let p = response.response_payload();
    if p.len() < 8 {
        return false;
    }
    params.module_id = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
    params.os_version = p[4];
    params.tr_type = p[5];
    params.os_build = u16::from_le_bytes([p[6], p[7]]);
    true
}

/// Parse a 32-byte device bitmap payload (bonded or discovered devices).
pub fn parse_device_bitmap(payload: &[u8]) -> BTreeSet<u8> {
    let mut devices = BTreeSet::new();
    for (byte_idx, byte) in payload.iter().take(32).enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                devices.insert((byte_idx * 8 + bit) as u8);
            }
        }
    }
    devices
}

/// Update the cache from an observed coordinator response. Returns what
/// follow-up refresh, if any, the observation requires.
pub fn apply_observation(
    params: &mut CoordinatorParameters,
    request: &DpaFrame,
    response: &DpaFrame,
) -> Observation {
    if response.pnum() != PNUM_COORDINATOR || response.rcode() != Some(0) {
        return Observation::None;
    }
    match request.pcmd() {
        CMD_COORDINATOR_BOND_NODE => {
            // Response payload: bonded address, device count.
            if let Some(&addr) = response.response_payload().first() {
                params.bonded_devices.insert(addr);
            }
            Observation::None
        }
        CMD_COORDINATOR_REMOVE_BOND => {
            // The address rides in the request payload.
            if let Some(&addr) = request.request_payload().first() {
                params.bonded_devices.remove(&addr);
                params.discovered_devices.remove(&addr);
            }
            Observation::None
        }
        CMD_COORDINATOR_CLEAR_ALL_BONDS => {
            params.bonded_devices.clear();
            params.discovered_devices.clear();
            Observation::None
        }
        CMD_COORDINATOR_BONDED_DEVICES => {
            params.bonded_devices = parse_device_bitmap(response.response_payload());
            Observation::None
        }
        CMD_COORDINATOR_DISCOVERED_DEVICES => {
            params.discovered_devices = parse_device_bitmap(response.response_payload());
            Observation::None
        }
        CMD_COORDINATOR_SET_HOPS => {
            // The new hop pair rides in the request payload.
            let p = request.request_payload();
            if p.len() >= 2 {
                params.hops_request = p[0];
                params.hops_response = p[1];
            }
            Observation::None
        }
        CMD_COORDINATOR_DISCOVERY => Observation::RefreshDiscovered,
        _ => Observation::None,
    }
}

#[cfg(test)]
#[path = "params_tests.rs"]
mod tests;
