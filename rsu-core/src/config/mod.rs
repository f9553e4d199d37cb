/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! RSU configuration loading.
//!
//! Every field is optional; anything missing falls back to the built-in
//! defaults below.  The expected YAML structure is:
//! ```yaml
//! rsu:
//!   id: 200
//!   position: { lat: 375665000, lon: 1269780000, alt: 3800 }
//! wireless:
//!   bind_ip: "0.0.0.0"
//!   listen_port: 30000
//!   broadcast_ip: "255.255.255.255"
//!   tx_port: 30001
//! server:
//!   ip: "127.0.0.1"
//!   port: 20615
//!   bind_ip: "0.0.0.0"
//!   local_port: 20905
//! alarm:
//!   gpiochip: "gpioa"
//!   line: 17
//! timing:
//!   tick_period_ms: 2000
//!   alert_ttl_ms: 15000      # null: alerts only clear on a server "off"
//!   ack_timeout_ms: 1000
//!   max_retry: 3
//!   retry_scan_ms: 200
//! filter:
//!   protocol_version: 1
//!   required_ttl: 3
//!   min_severity: 2
//!   rsu_msg_type: 1
//! capacity:
//!   accident_table: 256
//!   pending_sends: 64
//!   timers: 2048
//!   wireless_raw: 1024
//!   events: 2048
//!   wired_outbound: 1024
//!   server_inbound: 1024
//!   air_outbound: 1024
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::accident::MachineConfig;
use crate::clock::Millis;
use crate::filter::FilterParams;
use crate::uplink::SenderConfig;

// ── Sections ──────────────────────────────────────────────────────────────────

/// Fixed RSU position, broadcast as the sender of every rebroadcast.
/// Latitude/longitude in 1e-7 degrees, altitude in centimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Position {
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RsuSection {
    pub id: u32,
    pub position: Position,
}

impl Default for RsuSection {
    fn default() -> Self {
        Self {
            id: 200,
            position: Position::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WirelessSection {
    pub bind_ip: IpAddr,
    pub listen_port: u16,
    pub broadcast_ip: IpAddr,
    pub tx_port: u16,
}

impl Default for WirelessSection {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: 30000,
            broadcast_ip: IpAddr::V4(Ipv4Addr::BROADCAST),
            tx_port: 30001,
        }
    }
}

impl WirelessSection {
    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_ip, self.tx_port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub ip: IpAddr,
    pub port: u16,
    /// Wired-side address the command listener binds to.
    pub bind_ip: IpAddr,
    /// Port on which server-initiated commands are accepted.
    pub local_port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 20615,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port: 20905,
        }
    }
}

impl ServerSection {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Listen address for server-initiated commands.
    pub fn command_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.local_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AlarmSection {
    /// Chip name, label, or `/dev` path.
    pub gpiochip: String,
    pub line: u32,
}

impl Default for AlarmSection {
    fn default() -> Self {
        Self {
            gpiochip: String::from("gpioa"),
            line: 17,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub tick_period_ms: Millis,
    /// `None` (YAML `null`) disables expiry.
    pub alert_ttl_ms: Option<Millis>,
    pub ack_timeout_ms: Millis,
    pub max_retry: u32,
    pub retry_scan_ms: Millis,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            tick_period_ms: 2_000,
            alert_ttl_ms: Some(15_000),
            ack_timeout_ms: 1_000,
            max_retry: 3,
            retry_scan_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CapacitySection {
    pub accident_table: usize,
    pub pending_sends: usize,
    pub timers: usize,
    pub wireless_raw: usize,
    pub events: usize,
    pub wired_outbound: usize,
    pub server_inbound: usize,
    pub air_outbound: usize,
}

impl Default for CapacitySection {
    fn default() -> Self {
        Self {
            accident_table: 256,
            pending_sends: 64,
            timers: 2048,
            wireless_raw: 1024,
            events: 2048,
            wired_outbound: 1024,
            server_inbound: 1024,
            air_outbound: 1024,
        }
    }
}

impl CapacitySection {
    fn named(&self) -> [(&'static str, usize); 8] {
        [
            ("accident_table", self.accident_table),
            ("pending_sends", self.pending_sends),
            ("timers", self.timers),
            ("wireless_raw", self.wireless_raw),
            ("events", self.events),
            ("wired_outbound", self.wired_outbound),
            ("server_inbound", self.server_inbound),
            ("air_outbound", self.air_outbound),
        ]
    }
}

// ── RsuConfig ─────────────────────────────────────────────────────────────────

/// Static configuration, loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RsuConfig {
    pub rsu: RsuSection,
    pub wireless: WirelessSection,
    pub server: ServerSection,
    pub alarm: AlarmSection,
    pub timing: TimingSection,
    pub filter: FilterParams,
    pub capacity: CapacitySection,
}

impl RsuConfig {
    /// Parse and validate `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid YAML for
    /// this layout, or fails [`validate`](Self::validate).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading RSU configuration from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open configuration file: {}", path.display()))?;

        let config: RsuConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.capacity.named() {
            if value == 0 {
                bail!("capacity.{name} must be greater than zero");
            }
        }
        if self.timing.tick_period_ms == 0 {
            bail!("timing.tick_period_ms must be greater than zero");
        }
        if self.timing.ack_timeout_ms == 0 {
            bail!("timing.ack_timeout_ms must be greater than zero");
        }
        if self.timing.retry_scan_ms == 0 {
            bail!("timing.retry_scan_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn machine(&self) -> MachineConfig {
        MachineConfig {
            rsu_id: self.rsu.id,
            tick_period_ms: self.timing.tick_period_ms,
            alert_ttl_ms: self.timing.alert_ttl_ms,
            table_capacity: self.capacity.accident_table,
        }
    }

    pub fn sender(&self) -> SenderConfig {
        SenderConfig {
            ack_timeout_ms: self.timing.ack_timeout_ms,
            max_retry: self.timing.max_retry,
            pending_capacity: self.capacity.pending_sends,
            retry_scan_ms: self.timing.retry_scan_ms,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
