/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Admission filter for WL-1 frames.
//!
//! Two stages, cheapest first:
//!
//! 1. **Light** – header checks: RSU-originated echoes, TTL, protocol version.
//! 2. **Heavy** – severity threshold and the responsibility region /
//!    travel-direction check.  The region check is a stub that always passes
//!    and reports a fixed distance.

use serde::Deserialize;
use tracing::debug;

use crate::wire::WirelessPacket;

/// Decide whether a raw WL-1 frame concerns this RSU.
pub trait Filter: Send + Sync {
    /// `Some(distance_m)` if the frame passes every check.
    fn pass(&self, packet: &WirelessPacket, rsu_id: u32) -> Option<u32>;
}

// ── Parameters ────────────────────────────────────────────────────────────────

/// Thresholds applied by [`RsuFilter`].  Loaded from the `filter:` section
/// of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub protocol_version: u8,
    /// Only original vehicle broadcasts carry this TTL.
    pub required_ttl: u8,
    pub min_severity: u8,
    /// `msg_type` used by RSUs; such frames are our own kind and dropped.
    pub rsu_msg_type: u8,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            required_ttl: 3,
            min_severity: 2,
            rsu_msg_type: 1,
        }
    }
}

/// Distance reported while the region check is stubbed.
pub const STUB_DISTANCE_M: u32 = 120;

// ── RsuFilter ─────────────────────────────────────────────────────────────────

/// Why a frame was dropped.  Only used for debug logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    FromRsu,
    Ttl(u8),
    Version(u8),
    Severity(u8),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RsuFilter {
    params: FilterParams,
}

impl RsuFilter {
    pub fn new(params: FilterParams) -> Self {
        Self { params }
    }

    fn light(&self, packet: &WirelessPacket) -> Result<(), Rejection> {
        let header = &packet.payload.header;
        if header.msg_type == self.params.rsu_msg_type {
            return Err(Rejection::FromRsu);
        }
        if header.ttl != self.params.required_ttl {
            return Err(Rejection::Ttl(header.ttl));
        }
        if header.version != self.params.protocol_version {
            return Err(Rejection::Version(header.version));
        }
        Ok(())
    }

    fn heavy(&self, packet: &WirelessPacket, _rsu_id: u32) -> Result<u32, Rejection> {
        let severity = packet.payload.accident.severity;
        if severity < self.params.min_severity {
            return Err(Rejection::Severity(severity));
        }
        // TODO: rectangular responsibility region + up/down-bound direction
        // match once the RSU's region parameters are part of the config.
        Ok(STUB_DISTANCE_M)
    }
}

impl Filter for RsuFilter {
    fn pass(&self, packet: &WirelessPacket, rsu_id: u32) -> Option<u32> {
        let verdict = self
            .light(packet)
            .and_then(|()| self.heavy(packet, rsu_id));
        match verdict {
            Ok(distance) => Some(distance),
            Err(reason) => {
                debug!(
                    accident_id = packet.payload.accident.id,
                    ?reason,
                    "WL-1 frame filtered"
                );
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
