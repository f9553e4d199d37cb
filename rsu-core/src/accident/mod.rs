/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Accident tracking: events in, commands out.
//!
//! ```text
//!  wireless ingress ──WirelessReport──┐
//!  server dispatch  ──ServerUpdate────┼──► [events] ──► AccidentStateMachine ──┬──► [wired outbound] ──► ReliableSender
//!  timer            ──Tick────────────┘                     │                   └──► [air outbound]   ──► WL-1 broadcast
//!                                                          alarm
//! ```
//!
//! The [`AccidentTable`] and the alarm output are owned by the state machine
//! thread alone, which is why neither needs a lock.

pub mod machine;
pub mod table;

pub use machine::{AccidentStateMachine, MachineConfig, MachineExit, MachineStats};
pub use table::{AccidentRecord, AccidentTable};

use crate::clock::Millis;
use crate::wire::{AccidentInfo, WiredInboundPayload, WiredOutboundPayload};

// ── Events ────────────────────────────────────────────────────────────────────

/// Accident reported by a vehicle and admitted by the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WirelessReport {
    /// Accident id, position, severity and direction as broadcast.
    pub accident: AccidentInfo,
    /// Distance from this RSU, metres.
    pub distance_m: u32,
    /// Unix ms at which the frame was received.
    pub rx_time_ms: u64,
}

impl WirelessReport {
    pub fn accident_id(&self) -> u64 {
        self.accident.id
    }
}

/// Latest server-side view of an accident, kept for rebroadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerAccidentDetails {
    pub accident: AccidentInfo,
    pub server_tx_time: u64,
    pub period_sec: u16,
}

/// Accident on/off command (or immediate response) from the traffic server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerUpdate {
    pub accident_id: u64,
    /// Non-zero = active.
    pub active_flag: u16,
    pub details: ServerAccidentDetails,
}

impl ServerUpdate {
    pub fn is_active(&self) -> bool {
        self.active_flag != 0
    }
}

impl From<&WiredInboundPayload> for ServerUpdate {
    fn from(payload: &WiredInboundPayload) -> Self {
        Self {
            accident_id: payload.accident.id,
            active_flag: payload.server_info.acc_flag,
            details: ServerAccidentDetails {
                accident: payload.accident,
                server_tx_time: payload.server_info.server_tx_time,
                period_sec: payload.server_info.period_sec,
            },
        }
    }
}

/// Input of the accident state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    WirelessReport(WirelessReport),
    ServerUpdate(ServerUpdate),
    /// Periodic tick; carries the monotonic time at which the timer fired.
    Tick(Millis),
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Accident snapshot for the server, before the security wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundWiredCommand {
    /// Key used to match the server's acknowledgement.  Server responses
    /// only carry the accident id, so this is the accident id.
    pub command_id: u64,
    pub payload: WiredOutboundPayload,
}

/// Accident snapshot to rebroadcast to vehicles, before the security wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundAirCommand {
    pub accident_id: u64,
    pub details: ServerAccidentDetails,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::ServerInfo;

    #[test]
    fn server_update_from_inbound_payload() {
        let payload = WiredInboundPayload {
            rsu_id: 200,
            accident: AccidentInfo {
                id: 42,
                severity: 3,
                ..Default::default()
            },
            server_info: ServerInfo {
                server_tx_time: 1_000,
                period_sec: 2,
                acc_flag: 1,
            },
        };
        let update = ServerUpdate::from(&payload);
        assert_eq!(update.accident_id, 42);
        assert!(update.is_active());
        assert_eq!(update.details.accident.severity, 3);
        assert_eq!(update.details.period_sec, 2);
    }

    #[test]
    fn zero_flag_means_inactive() {
        let update = ServerUpdate {
            accident_id: 1,
            active_flag: 0,
            details: ServerAccidentDetails::default(),
        };
        assert!(!update.is_active());
    }
}
