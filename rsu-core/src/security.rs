/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Security wrap / strip for both links.
//!
//! The core only sees payloads; packets with their security trailer or
//! token exist at the link edges.  [`PassThroughSecurity`] is the current
//! stub: it never rejects and fills trailers with fixed patterns.

use crate::wire::{
    WiredInboundPacket, WiredInboundPayload, WiredOutboundPacket, WiredOutboundPayload,
    WirelessPacket, WirelessPayload, WIRED_TOKEN_LEN, WIRELESS_SECURITY_LEN,
};

/// Verify/strip inbound packets and wrap outbound payloads.
///
/// `*_strip` returns `None` when verification fails; the frame is then
/// dropped by the caller.
pub trait Security: Send + Sync {
    fn wireless_strip(&self, packet: &WirelessPacket) -> Option<WirelessPayload>;
    fn wireless_wrap(&self, payload: &WirelessPayload) -> WirelessPacket;
    fn wired_strip(&self, packet: &WiredInboundPacket) -> Option<WiredInboundPayload>;
    fn wired_wrap(&self, payload: &WiredOutboundPayload) -> WiredOutboundPacket;
}

/// Trailer byte written by [`PassThroughSecurity::wireless_wrap`].
pub const DUMMY_SIGNATURE_BYTE: u8 = 0xEE;

/// Accept-everything security layer.
///
/// * Wireless wrap: 192-byte trailer of `0xEE`.
/// * Wired wrap: zeroed token with the RSU id (LE `u32`) in bytes `0..4`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughSecurity;

impl Security for PassThroughSecurity {
    fn wireless_strip(&self, packet: &WirelessPacket) -> Option<WirelessPayload> {
        Some(packet.payload)
    }

    fn wireless_wrap(&self, payload: &WirelessPayload) -> WirelessPacket {
        WirelessPacket {
            payload: *payload,
            security: [DUMMY_SIGNATURE_BYTE; WIRELESS_SECURITY_LEN],
        }
    }

    fn wired_strip(&self, packet: &WiredInboundPacket) -> Option<WiredInboundPayload> {
        Some(packet.payload)
    }

    fn wired_wrap(&self, payload: &WiredOutboundPayload) -> WiredOutboundPacket {
        let mut token = [0u8; WIRED_TOKEN_LEN];
        token[..4].copy_from_slice(&payload.rsu_id.to_le_bytes());
        WiredOutboundPacket {
            payload: *payload,
            token,
        }
    }
}
