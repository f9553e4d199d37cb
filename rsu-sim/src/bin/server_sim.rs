/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Traffic server simulator.
//!
//! Accepts RSU uplink connections, logs every accident report and answers
//! each one with a server response that doubles as the ACK.  With
//! `--off-after` it later pushes an "off" command for the same accident to
//! the RSU command port.
//!
//! ```text
//! server-sim --listen 0.0.0.0:20615 --off-after 10 --rsu-command 127.0.0.1:20905
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use rsu_core::clock::wall_clock_ms;
use rsu_core::wire::{
    ServerInfo, WireFormat, WiredInboundPacket, WiredInboundPayload, WiredOutboundPacket,
    WiredOutboundPayload,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "server-sim", about = "Simulated traffic server for the RSU uplink")]
struct Cli {
    /// Address the uplink listener binds to.
    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0:20615")]
    listen: SocketAddr,

    /// Rebroadcast period advertised in responses, in seconds.
    #[arg(short = 'p', long = "period", default_value_t = 2)]
    period_sec: u16,

    /// Do not answer reports (exercises the RSU retry path).
    #[arg(long = "no-ack", default_value_t = false)]
    no_ack: bool,

    /// Send an "off" command this many seconds after the first report.
    #[arg(long = "off-after")]
    off_after: Option<u64>,

    /// RSU command port used by `--off-after`.
    #[arg(long = "rsu-command", default_value = "127.0.0.1:20905")]
    rsu_command: SocketAddr,
}

fn response(report: &WiredOutboundPayload, period_sec: u16, acc_flag: u16) -> WiredInboundPacket {
    WiredInboundPacket {
        payload: WiredInboundPayload {
            rsu_id: report.rsu_id,
            accident: report.accident,
            server_info: ServerInfo {
                server_tx_time: wall_clock_ms(),
                period_sec,
                acc_flag,
            },
        },
        ..Default::default()
    }
}

async fn send_off(target: SocketAddr, report: WiredOutboundPayload, delay: Duration) {
    tokio::time::sleep(delay).await;
    let frame = response(&report, 0, 0).to_bytes();
    let result: std::io::Result<()> = async {
        let mut stream = TcpStream::connect(target).await?;
        stream.write_all(&frame).await
    }
    .await;
    match result {
        Ok(()) => info!(
            %target,
            rsu_id = report.rsu_id,
            accident_id = report.accident.id,
            "Off command sent"
        ),
        Err(e) => warn!(%target, error = %e, "Off command failed"),
    }
}

async fn serve(mut stream: TcpStream, peer: SocketAddr, cli: Cli) {
    let mut buf = vec![0u8; WiredOutboundPacket::LEN];
    let mut off_scheduled = false;
    loop {
        if let Err(e) = stream.read_exact(&mut buf).await {
            info!(%peer, reason = %e, "RSU disconnected");
            return;
        }
        let report = match WiredOutboundPacket::decode(&buf) {
            Ok(pkt) => pkt.payload,
            Err(e) => {
                warn!(%peer, error = %e, "Undecodable report");
                continue;
            }
        };
        info!(
            %peer,
            rsu_id = report.rsu_id,
            accident_id = report.accident.id,
            severity = report.accident.severity,
            distance = report.rsu_info.distance,
            acc_flag = report.rsu_info.acc_flag,
            "Accident report"
        );

        if !cli.no_ack {
            let reply = response(&report, cli.period_sec, 1).to_bytes();
            if let Err(e) = stream.write_all(&reply).await {
                warn!(%peer, error = %e, "Response write failed");
                return;
            }
        }

        if let (Some(secs), false) = (cli.off_after, off_scheduled) {
            off_scheduled = true;
            tokio::spawn(send_off(cli.rsu_command, report, Duration::from_secs(secs)));
        }
    }
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

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Cannot bind {}", cli.listen))?;
    info!(listen = %cli.listen, ack = !cli.no_ack, "Server simulator ready");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(%peer, "RSU connected");
                    tokio::spawn(serve(stream, peer, cli.clone()));
                }
                Err(e) => error!(error = %e, "accept failed"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
