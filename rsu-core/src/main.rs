/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::net::IpAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use rsu_core::alarm::{AlarmOutput, SysfsGpioAlarm};
use rsu_core::clock::MonotonicClock;
use rsu_core::config::RsuConfig;
use rsu_core::filter::RsuFilter;
use rsu_core::link::{FrameSource, TcpCommandServer, TcpUplink, UdpBroadcastLink};
use rsu_core::pipeline::{Collaborators, Links, Pipeline, Uplink};
use rsu_core::security::PassThroughSecurity;
use rsu_core::wire::{WireFormat, WiredInboundPacket};

/// Receive poll interval for every link; bounds shutdown latency.
const LINK_POLL: Duration = Duration::from_millis(200);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

// ── CLI argument definition ───────────────────────────────────────────────────

/// Roadside unit control core.
///
/// Example:
///   rsu-core -c /etc/rsu/rsu.yaml -i 201 -s 10.0.0.1 -p 20615
#[derive(Debug, Parser)]
#[command(
    name = "rsu-core",
    about = "RSU control core – relays accident alerts between vehicles and the traffic server",
    long_about = None,
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// RSU identifier (overrides rsu.id).
    #[arg(short = 'i', long = "rsu-id")]
    rsu_id: Option<u32>,

    /// Traffic server address (overrides server.ip).
    #[arg(short = 's', long = "server-ip")]
    server_ip: Option<IpAddr>,

    /// Traffic server port (overrides server.port).
    #[arg(short = 'p', long = "server-port")]
    server_port: Option<u16>,

    /// WL-1 UDP listen port (overrides wireless.listen_port).
    #[arg(short = 'l', long = "listen-port")]
    listen_port: Option<u16>,

    /// Port for server-initiated commands (overrides server.local_port).
    #[arg(short = 'L', long = "local-port")]
    local_port: Option<u16>,

    /// Debug logging (RUST_LOG still takes precedence).
    #[arg(short = 'v', long = "verbose", default_value_t = false)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut RsuConfig) {
        if let Some(id) = self.rsu_id {
            config.rsu.id = id;
        }
        if let Some(ip) = self.server_ip {
            config.server.ip = ip;
        }
        if let Some(port) = self.server_port {
            config.server.port = port;
        }
        if let Some(port) = self.listen_port {
            config.wireless.listen_port = port;
        }
        if let Some(port) = self.local_port {
            config.server.local_port = port;
        }
    }
}

// ── Startup ───────────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> Result<RsuConfig> {
    let mut config = match &cli.config {
        Some(path) => RsuConfig::load_from_file(path)?,
        None => {
            warn!("No configuration file provided, using built-in defaults");
            RsuConfig::default()
        }
    };
    cli.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Open every link.  Only the wireless socket is required; the command
/// listener and the uplink degrade to absent.
fn open_links(config: &RsuConfig) -> Result<Links> {
    let wireless = Arc::new(
        UdpBroadcastLink::bind(
            config.wireless.bind_ip,
            config.wireless.listen_port,
            config.wireless.broadcast_addr(),
            LINK_POLL,
        )
        .with_context(|| {
            format!(
                "Cannot bind wireless socket {}:{}",
                config.wireless.bind_ip, config.wireless.listen_port
            )
        })?,
    );

    let command_addr = config.server.command_addr();
    let commands = match TcpCommandServer::bind(command_addr, LINK_POLL, WiredInboundPacket::LEN) {
        Ok(server) => Some(Arc::new(server) as Arc<dyn FrameSource>),
        Err(e) => {
            warn!(%command_addr, error = %e, "command listener unavailable");
            None
        }
    };

    let server = config.server.addr();
    let uplink = match TcpUplink::connect(
        server,
        CONNECT_TIMEOUT,
        LINK_POLL,
        WiredInboundPacket::LEN,
    ) {
        Ok(link) => {
            let link = Arc::new(link);
            Some(Uplink {
                tx: link.clone(),
                rx: link,
            })
        }
        Err(e) => {
            warn!(%server, error = %e, "server unreachable, running offline");
            None
        }
    };

    Ok(Links {
        wireless_rx: wireless.clone(),
        wireless_tx: wireless,
        commands,
        uplink,
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                    _ = term.recv() => info!("SIGTERM received"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot watch SIGTERM, waiting for SIGINT only"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot watch SIGINT");
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // Level is controlled by the RUST_LOG env-var (e.g. RUST_LOG=debug).
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_thread_names(true)
        .init();

    info!("RSU core starting up...");

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    info!(
        rsu_id      = config.rsu.id,
        wireless    = %format!("{}:{}", config.wireless.bind_ip, config.wireless.listen_port),
        server      = %config.server.addr(),
        commands    = %config.server.command_addr(),
        gpiochip    = %config.alarm.gpiochip,
        line        = config.alarm.line,
        "Configuration"
    );

    let links = match open_links(&config) {
        Ok(links) => links,
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    };

    let alarm = config.alarm.clone();
    let parts = Collaborators {
        links,
        filter: Arc::new(RsuFilter::new(config.filter)),
        security: Arc::new(PassThroughSecurity),
        open_alarm: Box::new(move || {
            SysfsGpioAlarm::open(&alarm.gpiochip, alarm.line)
                .map(|a| Box::new(a) as Box<dyn AlarmOutput>)
        }),
        clock: Arc::new(MonotonicClock::new()),
    };

    let pipeline = match Pipeline::start(&config, parts) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to start pipeline: {}", e);
            process::exit(1);
        }
    };

    wait_for_signal().await;

    // Joins block; keep them off the runtime thread.
    match tokio::task::spawn_blocking(move || pipeline.stop()).await {
        Ok(report) => info!(
            forwarded = report.machine.map_or(0, |m| m.reports_forwarded),
            acked = report.sender.map_or(0, |s| s.acked),
            "RSU core shut down cleanly"
        ),
        Err(e) => {
            error!("Shutdown task failed: {}", e);
            process::exit(1);
        }
    }
}
