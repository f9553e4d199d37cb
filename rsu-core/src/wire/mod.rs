/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Byte-exact codec for the WL-1 (vehicle ↔ RSU) and wired (RSU ↔ server)
//! packets.
//!
//! Every packet is little-endian and byte-packed, no padding:
//!
//! | Packet | Size | Layout |
//! |---|---|---|
//! | [`AccidentInfo`] | 32 B | direction u16, lane u8, severity u8, time u64, id u64, lat/lon/alt i32 |
//! | [`WirelessPayload`] | 64 B | header(4) + sender(28) + accident(32) |
//! | [`WirelessPacket`] | 256 B | payload(64) + security(192) |
//! | [`WiredOutboundPayload`] | 48 B | rsu_id u32 + accident(32) + rsu_info(12) |
//! | [`WiredOutboundPacket`] | 64 B | payload(48) + token(16) |
//! | [`WiredInboundPayload`] | 48 B | rsu_id u32 + accident(32) + server_info(12) |
//! | [`WiredInboundPacket`] | 64 B | payload(48) + token(16) |
//!
//! The pipeline treats the decoded structs as opaque structured payloads;
//! only the links and the security layer look at bytes.

pub mod packets;

pub use packets::{
    AccidentInfo, RsuInfo, SenderInfo, ServerInfo, WiredInboundPacket, WiredInboundPayload,
    WiredOutboundPacket, WiredOutboundPayload, WirelessHeader, WirelessPacket, WirelessPayload,
    WIRED_TOKEN_LEN, WIRELESS_SECURITY_LEN,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// Fewer bytes than the fixed packet size were supplied.
    #[error("{packet}: need {expected} bytes, got {actual}")]
    Truncated {
        packet: &'static str,
        expected: usize,
        actual: usize,
    },
}

// ── WireFormat ────────────────────────────────────────────────────────────────

/// Fixed-size little-endian wire representation.
///
/// Implementors only describe field order (`put` / `get`); length checks
/// and buffer handling live in the provided methods.
pub trait WireFormat: Sized {
    /// Encoded size in bytes.
    const LEN: usize;
    /// Name used in [`WireError`] messages.
    const NAME: &'static str;

    fn put<B: BufMut>(&self, buf: &mut B);

    /// Read `Self::LEN` bytes.  Callers guarantee `buf` holds enough.
    fn get<B: Buf>(buf: &mut B) -> Self;

    /// Append the encoding to `out`.
    fn encode(&self, out: &mut BytesMut) {
        out.reserve(Self::LEN);
        self.put(out);
    }

    fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(Self::LEN);
        self.encode(&mut out);
        out.freeze()
    }

    /// Decode the leading `Self::LEN` bytes of `src`.
    ///
    /// # Errors
    /// [`WireError::Truncated`] when `src` is shorter than `Self::LEN`.
    fn decode(src: &[u8]) -> Result<Self, WireError> {
        if src.len() < Self::LEN {
            return Err(WireError::Truncated {
                packet: Self::NAME,
                expected: Self::LEN,
                actual: src.len(),
            });
        }
        let mut buf = &src[..Self::LEN];
        Ok(Self::get(&mut buf))
    }
}
