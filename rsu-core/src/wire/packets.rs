/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Packet structs and their field order.

use bytes::{Buf, BufMut};

use super::WireFormat;

/// Size of the WL-1 security trailer.
pub const WIRELESS_SECURITY_LEN: usize = 192;

/// Size of the wired authentication token.
pub const WIRED_TOKEN_LEN: usize = 16;

// ── AccidentInfo (32 B) ───────────────────────────────────────────────────────

/// Accident description embedded in every packet type.
///
/// Positions are in 1e-7 degrees (lat/lon) and centimetres (alt); `time`
/// is the Unix time in milliseconds at which the accident was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccidentInfo {
    pub direction: u16,
    pub lane: u8,
    pub severity: u8,
    pub time: u64,
    pub id: u64,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
}

impl WireFormat for AccidentInfo {
    const LEN: usize = 32;
    const NAME: &'static str = "accident info";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.direction);
        buf.put_u8(self.lane);
        buf.put_u8(self.severity);
        buf.put_u64_le(self.time);
        buf.put_u64_le(self.id);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_i32_le(self.alt);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            direction: buf.get_u16_le(),
            lane: buf.get_u8(),
            severity: buf.get_u8(),
            time: buf.get_u64_le(),
            id: buf.get_u64_le(),
            lat: buf.get_i32_le(),
            lon: buf.get_i32_le(),
            alt: buf.get_i32_le(),
        }
    }
}

// ── WL-1 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WirelessHeader {
    pub version: u8,
    pub msg_type: u8,
    pub ttl: u8,
    pub reserved: u8,
}

impl WireFormat for WirelessHeader {
    const LEN: usize = 4;
    const NAME: &'static str = "wireless header";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type);
        buf.put_u8(self.ttl);
        buf.put_u8(self.reserved);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            version: buf.get_u8(),
            msg_type: buf.get_u8(),
            ttl: buf.get_u8(),
            reserved: buf.get_u8(),
        }
    }
}

/// Who transmitted the frame (vehicle or RSU) and where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    pub sender_id: u32,
    pub send_time: u64,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub reserved: [u8; 4],
}

impl WireFormat for SenderInfo {
    const LEN: usize = 28;
    const NAME: &'static str = "sender info";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.sender_id);
        buf.put_u64_le(self.send_time);
        buf.put_i32_le(self.lat);
        buf.put_i32_le(self.lon);
        buf.put_i32_le(self.alt);
        buf.put_slice(&self.reserved);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let sender_id = buf.get_u32_le();
        let send_time = buf.get_u64_le();
        let lat = buf.get_i32_le();
        let lon = buf.get_i32_le();
        let alt = buf.get_i32_le();
        let mut reserved = [0u8; 4];
        buf.copy_to_slice(&mut reserved);
        Self {
            sender_id,
            send_time,
            lat,
            lon,
            alt,
            reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WirelessPayload {
    pub header: WirelessHeader,
    pub sender: SenderInfo,
    pub accident: AccidentInfo,
}

impl WireFormat for WirelessPayload {
    const LEN: usize = 64;
    const NAME: &'static str = "wireless payload";

    fn put<B: BufMut>(&self, buf: &mut B) {
        self.header.put(buf);
        self.sender.put(buf);
        self.accident.put(buf);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            header: WirelessHeader::get(buf),
            sender: SenderInfo::get(buf),
            accident: AccidentInfo::get(buf),
        }
    }
}

/// Complete WL-1 frame as it travels over the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirelessPacket {
    pub payload: WirelessPayload,
    pub security: [u8; WIRELESS_SECURITY_LEN],
}

impl Default for WirelessPacket {
    fn default() -> Self {
        Self {
            payload: WirelessPayload::default(),
            security: [0u8; WIRELESS_SECURITY_LEN],
        }
    }
}

impl WireFormat for WirelessPacket {
    const LEN: usize = 256;
    const NAME: &'static str = "wireless packet";

    fn put<B: BufMut>(&self, buf: &mut B) {
        self.payload.put(buf);
        buf.put_slice(&self.security);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let payload = WirelessPayload::get(buf);
        let mut security = [0u8; WIRELESS_SECURITY_LEN];
        buf.copy_to_slice(&mut security);
        Self { payload, security }
    }
}

// ── Wired outbound (RSU → server) ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RsuInfo {
    /// Distance from the RSU to the accident, metres.
    pub distance: u16,
    pub acc_flag: u16,
    /// Unix ms at which the RSU received the vehicle report.
    pub rsu_rx_time: u64,
}

impl WireFormat for RsuInfo {
    const LEN: usize = 12;
    const NAME: &'static str = "rsu info";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16_le(self.distance);
        buf.put_u16_le(self.acc_flag);
        buf.put_u64_le(self.rsu_rx_time);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            distance: buf.get_u16_le(),
            acc_flag: buf.get_u16_le(),
            rsu_rx_time: buf.get_u64_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WiredOutboundPayload {
    pub rsu_id: u32,
    pub accident: AccidentInfo,
    pub rsu_info: RsuInfo,
}

impl WireFormat for WiredOutboundPayload {
    const LEN: usize = 48;
    const NAME: &'static str = "wired outbound payload";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.rsu_id);
        self.accident.put(buf);
        self.rsu_info.put(buf);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            rsu_id: buf.get_u32_le(),
            accident: AccidentInfo::get(buf),
            rsu_info: RsuInfo::get(buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WiredOutboundPacket {
    pub payload: WiredOutboundPayload,
    pub token: [u8; WIRED_TOKEN_LEN],
}

impl WireFormat for WiredOutboundPacket {
    const LEN: usize = 64;
    const NAME: &'static str = "wired outbound packet";

    fn put<B: BufMut>(&self, buf: &mut B) {
        self.payload.put(buf);
        buf.put_slice(&self.token);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let payload = WiredOutboundPayload::get(buf);
        let mut token = [0u8; WIRED_TOKEN_LEN];
        buf.copy_to_slice(&mut token);
        Self { payload, token }
    }
}

// ── Wired inbound (server → RSU) ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerInfo {
    pub server_tx_time: u64,
    /// Rebroadcast period requested by the server, seconds.
    pub period_sec: u16,
    /// Non-zero = accident active, zero = alarm off.
    pub acc_flag: u16,
}

impl WireFormat for ServerInfo {
    const LEN: usize = 12;
    const NAME: &'static str = "server info";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u64_le(self.server_tx_time);
        buf.put_u16_le(self.period_sec);
        buf.put_u16_le(self.acc_flag);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            server_tx_time: buf.get_u64_le(),
            period_sec: buf.get_u16_le(),
            acc_flag: buf.get_u16_le(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WiredInboundPayload {
    pub rsu_id: u32,
    pub accident: AccidentInfo,
    pub server_info: ServerInfo,
}

impl WireFormat for WiredInboundPayload {
    const LEN: usize = 48;
    const NAME: &'static str = "wired inbound payload";

    fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.rsu_id);
        self.accident.put(buf);
        self.server_info.put(buf);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        Self {
            rsu_id: buf.get_u32_le(),
            accident: AccidentInfo::get(buf),
            server_info: ServerInfo::get(buf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WiredInboundPacket {
    pub payload: WiredInboundPayload,
    pub token: [u8; WIRED_TOKEN_LEN],
}

impl WireFormat for WiredInboundPacket {
    const LEN: usize = 64;
    const NAME: &'static str = "wired inbound packet";

    fn put<B: BufMut>(&self, buf: &mut B) {
        self.payload.put(buf);
        buf.put_slice(&self.token);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        let payload = WiredInboundPayload::get(buf);
        let mut token = [0u8; WIRED_TOKEN_LEN];
        buf.copy_to_slice(&mut token);
        Self { payload, token }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireError;
    use bytes::BytesMut;

    fn sample_accident() -> AccidentInfo {
        AccidentInfo {
            direction: 90,
            lane: 1,
            severity: 3,
            time: 0x0102_0304_0506_0708,
            id: 9999,
            lat: 37_000_000,
            lon: 127_000_000,
            alt: -5,
        }
    }

    // ── Sizes ─────────────────────────────────────────────────────────────────

    #[test]
    fn encoded_sizes_match_layout_table() {
        assert_eq!(sample_accident().to_bytes().len(), 32);
        assert_eq!(WirelessPayload::default().to_bytes().len(), 64);
        assert_eq!(WirelessPacket::default().to_bytes().len(), 256);
        assert_eq!(WiredOutboundPayload::default().to_bytes().len(), 48);
        assert_eq!(WiredOutboundPacket::default().to_bytes().len(), 64);
        assert_eq!(WiredInboundPayload::default().to_bytes().len(), 48);
        assert_eq!(WiredInboundPacket::default().to_bytes().len(), 64);
    }

    // ── Field offsets ─────────────────────────────────────────────────────────

    #[test]
    fn accident_info_fields_sit_at_documented_offsets() {
        let b = sample_accident().to_bytes();
        assert_eq!(&b[0..2], &90u16.to_le_bytes());
        assert_eq!(b[2], 1);
        assert_eq!(b[3], 3);
        assert_eq!(&b[4..12], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&b[12..20], &9999u64.to_le_bytes());
        assert_eq!(&b[20..24], &37_000_000i32.to_le_bytes());
        assert_eq!(&b[24..28], &127_000_000i32.to_le_bytes());
        assert_eq!(&b[28..32], &(-5i32).to_le_bytes());
    }

    #[test]
    fn wireless_packet_decodes_vehicle_frame() {
        // Frame as built by a vehicle: header, sender, accident, 0xEE trailer.
        let mut raw = Vec::with_capacity(256);
        raw.extend_from_slice(&[1, 0, 3, 0]);
        raw.extend_from_slice(&1234u32.to_le_bytes());
        raw.extend_from_slice(&42u64.to_le_bytes());
        raw.extend_from_slice(&37_000_000i32.to_le_bytes());
        raw.extend_from_slice(&127_000_000i32.to_le_bytes());
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw.extend_from_slice(&[0u8; 4]);
        raw.extend_from_slice(&sample_accident().to_bytes());
        raw.extend_from_slice(&[0xEE; 192]);
        assert_eq!(raw.len(), 256);

        let pkt = WirelessPacket::decode(&raw).unwrap();
        assert_eq!(pkt.payload.header.version, 1);
        assert_eq!(pkt.payload.header.msg_type, 0);
        assert_eq!(pkt.payload.header.ttl, 3);
        assert_eq!(pkt.payload.sender.sender_id, 1234);
        assert_eq!(pkt.payload.sender.send_time, 42);
        assert_eq!(pkt.payload.accident, sample_accident());
        assert!(pkt.security.iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn wired_outbound_rsu_info_follows_accident() {
        let payload = WiredOutboundPayload {
            rsu_id: 200,
            accident: sample_accident(),
            rsu_info: RsuInfo {
                distance: 120,
                acc_flag: 1,
                rsu_rx_time: 77,
            },
        };
        let b = payload.to_bytes();
        assert_eq!(&b[0..4], &200u32.to_le_bytes());
        assert_eq!(&b[4..36], &sample_accident().to_bytes()[..]);
        assert_eq!(&b[36..38], &120u16.to_le_bytes());
        assert_eq!(&b[38..40], &1u16.to_le_bytes());
        assert_eq!(&b[40..48], &77u64.to_le_bytes());
    }

    #[test]
    fn wired_inbound_server_info_decodes() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&200u32.to_le_bytes());
        raw.extend_from_slice(&sample_accident().to_bytes());
        raw.extend_from_slice(&1_700_000_000_000u64.to_le_bytes());
        raw.extend_from_slice(&2u16.to_le_bytes());
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.extend_from_slice(&[0xAB; 16]);

        let pkt = WiredInboundPacket::decode(&raw).unwrap();
        assert_eq!(pkt.payload.rsu_id, 200);
        assert_eq!(pkt.payload.accident.id, 9999);
        assert_eq!(pkt.payload.server_info.server_tx_time, 1_700_000_000_000);
        assert_eq!(pkt.payload.server_info.period_sec, 2);
        assert_eq!(pkt.payload.server_info.acc_flag, 0);
        assert_eq!(pkt.token, [0xAB; 16]);
    }

    #[test]
    fn encode_appends_back_to_back_frames() {
        let first = WiredOutboundPacket {
            payload: WiredOutboundPayload {
                rsu_id: 200,
                accident: sample_accident(),
                ..Default::default()
            },
            token: [1; WIRED_TOKEN_LEN],
        };
        let mut second = first;
        second.payload.accident.id = 42;

        let mut out = BytesMut::from(&b"hdr"[..]);
        first.encode(&mut out);
        second.encode(&mut out);

        assert_eq!(out.len(), 3 + 2 * WiredOutboundPacket::LEN);
        assert_eq!(&out[..3], b"hdr");
        let body = &out[3..];
        assert_eq!(WiredOutboundPacket::decode(body).unwrap(), first);
        let tail = &body[WiredOutboundPacket::LEN..];
        assert_eq!(WiredOutboundPacket::decode(tail).unwrap().payload.accident.id, 42);
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    #[test]
    fn undersized_frame_is_truncated_error() {
        let err = WiredInboundPacket::decode(&[0u8; 63]).unwrap_err();
        assert_eq!(
            err,
            WireError::Truncated {
                packet: "wired inbound packet",
                expected: 64,
                actual: 63,
            }
        );
    }

    #[test]
    fn oversized_input_decodes_leading_bytes() {
        let mut raw = sample_accident().to_bytes().to_vec();
        raw.extend_from_slice(&[0xFF; 8]);
        assert_eq!(AccidentInfo::decode(&raw).unwrap(), sample_accident());
    }
}
