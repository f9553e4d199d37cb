/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Reliable delivery of accident reports to the traffic server.
//!
//! [`ReliableSender`] owns the pending table.  Commands and ACKs reach it
//! through the same queue, so the table is touched by one thread only:
//!
//! ```text
//!  state machine ──Command──┐
//!                           ├──► [wired outbound] ──► ReliableSender ──wrap──► TcpUplink
//!  uplink_rx     ──Ack(id)──┘                              │
//!                                        every wake: retransmit / retire stale entries
//! ```
//!
//! Server responses carry no message id, so a command is identified by its
//! accident id.  Sending again for an id that is still pending replaces the
//! old entry and resets its retry budget.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::accident::OutboundWiredCommand;
use crate::clock::{Clock, Millis};
use crate::link::FrameSink;
use crate::queue::{BoundedQueue, PopTimeout};
use crate::security::Security;
use crate::shutdown::Shutdown;
use crate::wire::WireFormat;

/// Input of the reliable sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkMessage {
    /// New report to deliver.
    Command(OutboundWiredCommand),
    /// The server answered for this command id.
    Ack(u64),
}

/// One transmitted report waiting for the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub command_id: u64,
    /// Time of the last (re)transmission.
    pub sent_time: Millis,
    pub retry_count: u32,
    /// Wrapped packet, ready for retransmission.
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    pub ack_timeout_ms: Millis,
    pub max_retry: u32,
    pub pending_capacity: usize,
    /// Longest the loop sleeps before scanning for timeouts.
    pub retry_scan_ms: Millis,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 1_000,
            max_retry: 3,
            pending_capacity: 64,
            retry_scan_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub sent: u64,
    pub retransmitted: u64,
    pub acked: u64,
    /// Gave up after `max_retry` retransmissions.
    pub retired: u64,
    /// Sent once without tracking because the pending table was full.
    pub untracked: u64,
    pub send_errors: u64,
    /// Dropped because the uplink is offline.
    pub offline_drops: u64,
    /// Still pending when the sender stopped.
    pub abandoned: u64,
}

// ── ReliableSender ────────────────────────────────────────────────────────────

pub struct ReliableSender {
    config: SenderConfig,
    input: Arc<BoundedQueue<UplinkMessage>>,
    /// `None` when the server could not be reached at startup.
    sink: Option<Arc<dyn FrameSink>>,
    security: Arc<dyn Security>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    pending: Vec<PendingSend>,
    stats: SenderStats,
}

impl ReliableSender {
    pub fn new(
        config: SenderConfig,
        input: Arc<BoundedQueue<UplinkMessage>>,
        sink: Option<Arc<dyn FrameSink>>,
        security: Arc<dyn Security>,
        clock: Arc<dyn Clock>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            pending: Vec::with_capacity(config.pending_capacity),
            config,
            input,
            sink,
            security,
            clock,
            shutdown,
            stats: SenderStats::default(),
        }
    }

    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Process messages until the input queue stops or shutdown is
    /// signalled, scanning for timeouts after every wake.
    pub fn run(mut self) -> SenderStats {
        let scan = Duration::from_millis(self.config.retry_scan_ms);
        info!(
            online = self.sink.is_some(),
            ack_timeout_ms = self.config.ack_timeout_ms,
            max_retry = self.config.max_retry,
            "reliable sender started"
        );

        loop {
            match self.input.pop_timeout(scan) {
                PopTimeout::Item(msg) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    let now = self.clock.now_ms();
                    self.handle(msg, now);
                }
                PopTimeout::TimedOut => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                }
                PopTimeout::Stopped => break,
            }
            let now = self.clock.now_ms();
            self.scan(now);
        }

        self.stats.abandoned = self.pending.len() as u64;
        info!(
            sent = self.stats.sent,
            acked = self.stats.acked,
            retired = self.stats.retired,
            abandoned = self.stats.abandoned,
            "reliable sender stopped"
        );
        self.stats
    }

    pub fn handle(&mut self, msg: UplinkMessage, now: Millis) {
        match msg {
            UplinkMessage::Command(command) => self.send(command, now),
            UplinkMessage::Ack(id) => self.ack(id),
        }
    }

    fn send(&mut self, command: OutboundWiredCommand, now: Millis) {
        let Some(sink) = self.sink.as_ref() else {
            self.stats.offline_drops += 1;
            warn!(accident_id = command.command_id, "uplink offline, report dropped");
            return;
        };

        let payload = self.security.wired_wrap(&command.payload).to_bytes();
        if transmit(sink.as_ref(), &payload, command.command_id) {
            self.stats.sent += 1;
        } else {
            self.stats.send_errors += 1;
        }

        let entry = PendingSend {
            command_id: command.command_id,
            sent_time: now,
            retry_count: 0,
            payload,
        };
        if let Some(existing) = self
            .pending
            .iter_mut()
            .find(|p| p.command_id == command.command_id)
        {
            debug!(accident_id = command.command_id, "pending send replaced");
            *existing = entry;
        } else if self.pending.len() >= self.config.pending_capacity {
            self.stats.untracked += 1;
            warn!(
                accident_id = command.command_id,
                capacity = self.config.pending_capacity,
                "pending table full, report sent without retry"
            );
        } else {
            self.pending.push(entry);
        }
    }

    fn ack(&mut self, command_id: u64) {
        let before = self.pending.len();
        self.pending.retain(|p| p.command_id != command_id);
        if self.pending.len() < before {
            self.stats.acked += 1;
            debug!(accident_id = command_id, "report acknowledged");
        } else {
            trace!(accident_id = command_id, "response without pending send");
        }
    }

    /// Retransmit entries older than the ACK timeout; retire those whose
    /// retry budget is spent.
    pub fn scan(&mut self, now: Millis) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        let timeout = self.config.ack_timeout_ms;
        let max_retry = self.config.max_retry;
        let stats = &mut self.stats;

        self.pending.retain_mut(|p| {
            if now.saturating_sub(p.sent_time) <= timeout {
                return true;
            }
            if p.retry_count >= max_retry {
                stats.retired += 1;
                warn!(
                    accident_id = p.command_id,
                    retries = p.retry_count,
                    "no ACK from server, report retired"
                );
                return false;
            }
            p.retry_count += 1;
            p.sent_time = now;
            if transmit(sink.as_ref(), &p.payload, p.command_id) {
                stats.retransmitted += 1;
            } else {
                stats.send_errors += 1;
            }
            debug!(accident_id = p.command_id, retry = p.retry_count, "report retransmitted");
            true
        });
    }
}

fn transmit(sink: &dyn FrameSink, frame: &[u8], command_id: u64) -> bool {
    match sink.send(frame) {
        Ok(()) => {
            trace!(accident_id = command_id, len = frame.len(), "uplink frame sent");
            true
        }
        Err(e) => {
            warn!(accident_id = command_id, error = %e, "uplink send failed");
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
