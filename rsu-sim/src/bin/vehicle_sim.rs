/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Vehicle simulator: broadcasts WL-1 accident reports at an RSU.
//!
//! ```text
//! vehicle-sim --target 127.0.0.1:30000 --accident-id 9999 --count 5
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tracing::info;

use rsu_core::clock::wall_clock_ms;
use rsu_core::security::DUMMY_SIGNATURE_BYTE;
use rsu_core::wire::{WireFormat, WirelessPacket, WIRELESS_SECURITY_LEN};

#[derive(Debug, Parser)]
#[command(name = "vehicle-sim", about = "Broadcast WL-1 accident reports")]
struct Cli {
    /// RSU wireless endpoint (unicast or broadcast).
    #[arg(short = 't', long = "target", default_value = "127.0.0.1:30000")]
    target: SocketAddr,

    /// Accident identifier carried in every report.
    #[arg(short = 'a', long = "accident-id", default_value_t = 9999)]
    accident_id: u64,

    #[arg(long = "vehicle-id", default_value_t = 1234)]
    vehicle_id: u32,

    /// Reported severity (the RSU drops anything below its threshold).
    #[arg(long = "severity", default_value_t = 3)]
    severity: u8,

    /// Header TTL.  Vehicles send 3; relayed frames carry a lower value.
    #[arg(long = "ttl", default_value_t = 3)]
    ttl: u8,

    #[arg(long = "lat", default_value_t = 37_000_000, allow_hyphen_values = true)]
    lat: i32,

    #[arg(long = "lon", default_value_t = 127_000_000, allow_hyphen_values = true)]
    lon: i32,

    /// Number of reports to send.
    #[arg(short = 'n', long = "count", default_value_t = 1)]
    count: u32,

    /// Delay between reports in milliseconds.
    #[arg(short = 'i', long = "interval-ms", default_value_t = 1000)]
    interval_ms: u64,
}

fn report(cli: &Cli) -> WirelessPacket {
    let now = wall_clock_ms();
    let mut pkt = WirelessPacket::default();

    let header = &mut pkt.payload.header;
    header.version = 1;
    header.msg_type = 0;
    header.ttl = cli.ttl;

    let sender = &mut pkt.payload.sender;
    sender.sender_id = cli.vehicle_id;
    sender.send_time = now;
    sender.lat = cli.lat;
    sender.lon = cli.lon;

    let accident = &mut pkt.payload.accident;
    accident.direction = 90;
    accident.lane = 1;
    accident.severity = cli.severity;
    accident.time = now;
    accident.id = cli.accident_id;
    accident.lat = cli.lat;
    accident.lon = cli.lon;

    pkt.security = [DUMMY_SIGNATURE_BYTE; WIRELESS_SECURITY_LEN];
    pkt
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .context("Cannot bind UDP socket")?;
    socket.set_broadcast(true)?;

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    for seq in 1..=cli.count {
        ticker.tick().await;
        let frame = report(&cli).to_bytes();
        socket
            .send_to(&frame, cli.target)
            .await
            .with_context(|| format!("send to {} failed", cli.target))?;
        info!(
            seq,
            target = %cli.target,
            accident_id = cli.accident_id,
            bytes = frame.len(),
            "WL-1 report sent"
        );
    }

    info!(sent = cli.count, "Done");
    Ok(())
}
