/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Edge worker loops: link I/O, decoding, dispatch.
//!
//! Each worker moves frames between a link and a queue and contains its
//! own failures: malformed frames are dropped at `debug`, a dead link ends
//! the worker at `warn`.  Nothing here touches the accident table.

use tracing::{debug, info, trace, warn};

use crate::accident::{Event, OutboundAirCommand, ServerUpdate, WirelessReport};
use crate::clock::wall_clock_ms;
use crate::config::Position;
use crate::filter::{Filter, FilterParams};
use crate::link::{FrameSink, FrameSource};
use crate::queue::{BoundedQueue, RejectReason};
use crate::security::Security;
use crate::shutdown::Shutdown;
use crate::uplink::UplinkMessage;
use crate::wire::{
    SenderInfo, WireFormat, WiredInboundPacket, WiredInboundPayload, WirelessHeader,
    WirelessPacket, WirelessPayload,
};

/// TTL of RSU rebroadcasts.  Vehicles relay with TTL 3, so the filter
/// never mistakes a rebroadcast for an original report.
pub const RELAY_TTL: u8 = 2;

/// Counters returned by every edge worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub dropped: u64,
    pub errors: u64,
}

// ── Link readers ──────────────────────────────────────────────────────────────

/// Read frames from `source` into `out` until shutdown or link failure.
pub fn receive(
    source: &dyn FrameSource,
    out: &BoundedQueue<Vec<u8>>,
    shutdown: &Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while !shutdown.is_triggered() {
        match source.recv() {
            Ok(Some(frame)) => match out.push(frame) {
                Ok(()) => stats.processed += 1,
                Err(rejected) if rejected.reason == RejectReason::Stopped => break,
                Err(_) => {
                    stats.dropped += 1;
                    trace!(queue = out.name(), "frame dropped, queue full");
                }
            },
            Ok(None) => {}
            Err(e) => {
                stats.errors += 1;
                warn!(error = %e, "link receive failed, reader exiting");
                break;
            }
        }
    }
    stats
}

// ── Wireless ingress ──────────────────────────────────────────────────────────

/// Decode → filter → strip → `Event::WirelessReport`.
pub fn wireless_ingress(
    raw: &BoundedQueue<Vec<u8>>,
    events: &BoundedQueue<Event>,
    filter: &dyn Filter,
    security: &dyn Security,
    rsu_id: u32,
    shutdown: &Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(frame) = raw.pop() {
        if shutdown.is_triggered() {
            break;
        }
        if frame.len() != WirelessPacket::LEN {
            stats.dropped += 1;
            debug!(len = frame.len(), "WL-1 frame with wrong size dropped");
            continue;
        }
        let packet = match WirelessPacket::decode(&frame) {
            Ok(p) => p,
            Err(e) => {
                stats.dropped += 1;
                debug!(error = %e, "malformed WL-1 frame dropped");
                continue;
            }
        };
        let Some(distance_m) = filter.pass(&packet, rsu_id) else {
            stats.dropped += 1;
            continue;
        };
        let Some(payload) = security.wireless_strip(&packet) else {
            stats.dropped += 1;
            debug!(accident_id = packet.payload.accident.id, "WL-1 security check failed");
            continue;
        };

        let report = WirelessReport {
            accident: payload.accident,
            distance_m,
            rx_time_ms: wall_clock_ms(),
        };
        if events.push(Event::WirelessReport(report)).is_err() {
            break;
        }
        stats.processed += 1;
    }
    stats
}

// ── Air TX ────────────────────────────────────────────────────────────────────

/// Identity stamped on every rebroadcast.
#[derive(Debug, Clone, Copy)]
pub struct AirIdentity {
    pub rsu_id: u32,
    pub position: Position,
    pub filter: FilterParams,
}

impl AirIdentity {
    fn payload(&self, command: &OutboundAirCommand) -> WirelessPayload {
        WirelessPayload {
            header: WirelessHeader {
                version: self.filter.protocol_version,
                msg_type: self.filter.rsu_msg_type,
                ttl: RELAY_TTL,
                reserved: 0,
            },
            sender: SenderInfo {
                sender_id: self.rsu_id,
                send_time: wall_clock_ms(),
                lat: self.position.lat,
                lon: self.position.lon,
                alt: self.position.alt,
                reserved: [0; 4],
            },
            accident: command.details.accident,
        }
    }
}

/// Air command → WL-1 payload → wrap → broadcast.
pub fn air_tx(
    air: &BoundedQueue<OutboundAirCommand>,
    sink: &dyn FrameSink,
    security: &dyn Security,
    identity: &AirIdentity,
    shutdown: &Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(command) = air.pop() {
        if shutdown.is_triggered() {
            break;
        }
        let packet = security.wireless_wrap(&identity.payload(&command));
        match sink.send(&packet.to_bytes()) {
            Ok(()) => {
                stats.processed += 1;
                trace!(accident_id = command.accident_id, "accident rebroadcast");
            }
            Err(e) => {
                stats.errors += 1;
                warn!(accident_id = command.accident_id, error = %e, "rebroadcast failed");
            }
        }
    }
    stats
}

// ── Server ingress ────────────────────────────────────────────────────────────

fn strip_inbound(frame: &[u8], security: &dyn Security) -> Option<WiredInboundPayload> {
    if frame.len() != WiredInboundPacket::LEN {
        debug!(len = frame.len(), "server frame with wrong size dropped");
        return None;
    }
    let packet = match WiredInboundPacket::decode(frame) {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "malformed server frame dropped");
            return None;
        }
    };
    let payload = security.wired_strip(&packet);
    if payload.is_none() {
        debug!(accident_id = packet.payload.accident.id, "server token rejected");
    }
    payload
}

/// Server-initiated commands: link → strip → server inbound queue.
pub fn command_rx(
    source: &dyn FrameSource,
    inbound: &BoundedQueue<WiredInboundPayload>,
    security: &dyn Security,
    shutdown: &Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while !shutdown.is_triggered() {
        let frame = match source.recv() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                stats.errors += 1;
                warn!(error = %e, "command server failed, no more server commands");
                break;
            }
        };
        let Some(payload) = strip_inbound(&frame, security) else {
            stats.dropped += 1;
            continue;
        };
        info!(
            accident_id = payload.accident.id,
            acc_flag = payload.server_info.acc_flag,
            "server command received"
        );
        if inbound.push(payload).is_err() {
            break;
        }
        stats.processed += 1;
    }
    stats
}

/// Immediate responses on the uplink: each one ACKs the pending report for
/// its accident and is then handled like a server command.
pub fn uplink_rx(
    source: &dyn FrameSource,
    wired_out: &BoundedQueue<UplinkMessage>,
    inbound: &BoundedQueue<WiredInboundPayload>,
    security: &dyn Security,
    shutdown: &Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while !shutdown.is_triggered() {
        let frame = match source.recv() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                stats.errors += 1;
                if !shutdown.is_triggered() {
                    warn!(error = %e, "uplink lost, running without server responses");
                }
                break;
            }
        };
        let Some(payload) = strip_inbound(&frame, security) else {
            stats.dropped += 1;
            continue;
        };
        if wired_out.push(UplinkMessage::Ack(payload.accident.id)).is_err() {
            break;
        }
        if inbound.push(payload).is_err() {
            break;
        }
        stats.processed += 1;
    }
    stats
}

/// Server inbound queue → `Event::ServerUpdate`.
pub fn server_dispatch(
    inbound: &BoundedQueue<WiredInboundPayload>,
    events: &BoundedQueue<Event>,
    shutdown: &Shutdown,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(payload) = inbound.pop() {
        if shutdown.is_triggered() {
            break;
        }
        if events
            .push(Event::ServerUpdate(ServerUpdate::from(&payload)))
            .is_err()
        {
            break;
        }
        stats.processed += 1;
    }
    stats
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RsuFilter;
    use crate::queue::OverflowPolicy;
    use crate::security::PassThroughSecurity;
    use crate::wire::{AccidentInfo, ServerInfo};

    fn queue<T>(policy: OverflowPolicy) -> BoundedQueue<T> {
        BoundedQueue::new("test", 8, policy).unwrap()
    }

    fn vehicle_frame(id: u64, ttl: u8) -> Vec<u8> {
        let mut pkt = WirelessPacket::default();
        pkt.payload.header.version = 1;
        pkt.payload.header.ttl = ttl;
        pkt.payload.accident.id = id;
        pkt.payload.accident.severity = 3;
        pkt.to_bytes().to_vec()
    }

    #[test]
    fn wireless_ingress_turns_valid_frames_into_reports() {
        let raw = queue(OverflowPolicy::DropNewest);
        let events = queue(OverflowPolicy::Block);
        raw.push(vehicle_frame(0x9999, 3)).unwrap();
        raw.push(vehicle_frame(1, 2)).unwrap(); // relayed, filtered
        raw.push(vec![0u8; 64]).unwrap(); // wrong size
        raw.stop();

        let stats = wireless_ingress(
            &raw,
            &events,
            &RsuFilter::default(),
            &PassThroughSecurity,
            200,
            &Shutdown::new(),
        );
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dropped, 2);

        events.stop();
        let Some(Event::WirelessReport(r)) = events.pop() else {
            panic!("expected a wireless report");
        };
        assert_eq!(r.accident.id, 0x9999);
        assert_eq!(r.distance_m, crate::filter::STUB_DISTANCE_M);
        assert!(events.is_empty());
    }

    #[test]
    fn rebroadcast_is_marked_as_rsu_relay() {
        let identity = AirIdentity {
            rsu_id: 200,
            position: Position {
                lat: 10,
                lon: 20,
                alt: 30,
            },
            filter: FilterParams::default(),
        };
        let command = OutboundAirCommand {
            accident_id: 42,
            details: crate::accident::ServerAccidentDetails {
                accident: AccidentInfo {
                    id: 42,
                    ..Default::default()
                },
                ..Default::default()
            },
        };
        let payload = identity.payload(&command);
        assert_eq!(payload.header.msg_type, 1);
        assert_eq!(payload.header.ttl, RELAY_TTL);
        assert_eq!(payload.sender.sender_id, 200);
        assert_eq!(payload.sender.lon, 20);
        assert_eq!(payload.accident.id, 42);

        let pkt = PassThroughSecurity.wireless_wrap(&payload);
        assert_eq!(RsuFilter::default().pass(&pkt, 200), None, "own rebroadcast is filtered");
    }

    #[test]
    fn dispatch_converts_payloads_to_server_updates() {
        let inbound = queue(OverflowPolicy::Block);
        let events = queue(OverflowPolicy::Block);
        inbound
            .push(WiredInboundPayload {
                rsu_id: 200,
                accident: AccidentInfo {
                    id: 42,
                    ..Default::default()
                },
                server_info: ServerInfo {
                    server_tx_time: 1,
                    period_sec: 2,
                    acc_flag: 0,
                },
            })
            .unwrap();
        inbound.stop();

        let stats = server_dispatch(&inbound, &events, &Shutdown::new());
        assert_eq!(stats.processed, 1);
        events.stop();
        match events.pop() {
            Some(Event::ServerUpdate(u)) => {
                assert_eq!(u.accident_id, 42);
                assert!(!u.is_active());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn workers_stop_on_shutdown_without_processing() {
        let raw = queue(OverflowPolicy::DropNewest);
        let events = queue(OverflowPolicy::Block);
        raw.push(vehicle_frame(1, 3)).unwrap();
        let shutdown = Shutdown::new();
        shutdown.trigger();
        raw.stop();

        let stats = wireless_ingress(
            &raw,
            &events,
            &RsuFilter::default(),
            &PassThroughSecurity,
            200,
            &shutdown,
        );
        assert_eq!(stats, WorkerStats::default());
        assert!(events.is_empty());
    }
}
