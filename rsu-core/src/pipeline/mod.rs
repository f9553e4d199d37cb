/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Composition root: queues, threads, and their ordered start/stop.
//!
//! ```text
//!  wireless_rx ─► [wireless_raw] ─► wireless_ingress ─┐
//!  command_rx ──┐                                     ├─► [events] ─► state_machine ─┬─► [wired_out] ─► reliable_sender ─► uplink
//!  uplink_rx ───┴► [server_in] ─► server_dispatch ────┘        ▲                     └─► [air_out] ──► air_tx ─► WL-1 broadcast
//!      └──────── Ack ──► [wired_out]                    timer ─┘ Tick
//! ```
//!
//! | Queue | Item | Overflow |
//! |---|---|---|
//! | `wireless_raw` | 256-byte WL-1 frame | drop newest |
//! | `events` | [`Event`] | block |
//! | `wired_out` | [`UplinkMessage`] | block |
//! | `server_in` | [`WiredInboundPayload`] | block |
//! | `air_out` | [`OutboundAirCommand`] | drop oldest |
//!
//! Start order: queues → timer → alarm (best effort) → state machine →
//! reliable sender → consumers → link readers.  Link readers come last so
//! nothing is received before its consumers run.
//!
//! Stop order: stop every queue and raise the shutdown flag → close links
//! → join state machine → stop and join timer → join the remaining
//! workers → close the alarm.

pub mod error;
pub mod workers;

pub use error::PipelineError;
pub use workers::{AirIdentity, WorkerStats, RELAY_TTL};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, info_span, warn, Span};

use crate::accident::{
    AccidentStateMachine, Event, MachineExit, MachineStats, OutboundAirCommand,
};
use crate::alarm::{AlarmError, AlarmOutput};
use crate::clock::Clock;
use crate::config::{CapacitySection, RsuConfig};
use crate::filter::Filter;
use crate::link::{FrameSink, FrameSource};
use crate::queue::{BoundedQueue, OverflowPolicy};
use crate::security::Security;
use crate::shutdown::Shutdown;
use crate::timer::{TimerScheduler, TimerStats};
use crate::uplink::{ReliableSender, SenderStats, UplinkMessage};
use crate::wire::WiredInboundPayload;

/// Deferred alarm construction, run during start after the timer is up.
pub type AlarmOpener =
    Box<dyn FnOnce() -> Result<Box<dyn AlarmOutput>, AlarmError> + Send + 'static>;

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Both halves of the server connection.
pub struct Uplink {
    pub tx: Arc<dyn FrameSink>,
    pub rx: Arc<dyn FrameSource>,
}

pub struct Links {
    pub wireless_rx: Arc<dyn FrameSource>,
    pub wireless_tx: Arc<dyn FrameSink>,
    /// Server-initiated command listener, if it could be bound.
    pub commands: Option<Arc<dyn FrameSource>>,
    /// `None` runs the pipeline offline: wired reports are dropped.
    pub uplink: Option<Uplink>,
}

/// Everything the pipeline needs from outside.
pub struct Collaborators {
    pub links: Links,
    pub filter: Arc<dyn Filter>,
    pub security: Arc<dyn Security>,
    pub open_alarm: AlarmOpener,
    pub clock: Arc<dyn Clock>,
}

// ── Queues ────────────────────────────────────────────────────────────────────

pub struct Queues {
    pub wireless_raw: Arc<BoundedQueue<Vec<u8>>>,
    pub events: Arc<BoundedQueue<Event>>,
    pub wired_out: Arc<BoundedQueue<UplinkMessage>>,
    pub server_in: Arc<BoundedQueue<WiredInboundPayload>>,
    pub air_out: Arc<BoundedQueue<OutboundAirCommand>>,
}

fn queue<T>(
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
) -> Result<Arc<BoundedQueue<T>>, PipelineError> {
    BoundedQueue::new(name, capacity, policy)
        .map(Arc::new)
        .ok_or(PipelineError::InvalidQueueCapacity { queue: name })
}

impl Queues {
    fn new(capacity: &CapacitySection) -> Result<Self, PipelineError> {
        Ok(Self {
            wireless_raw: queue(
                "wireless_raw",
                capacity.wireless_raw,
                OverflowPolicy::DropNewest,
            )?,
            events: queue("events", capacity.events, OverflowPolicy::Block)?,
            wired_out: queue("wired_out", capacity.wired_outbound, OverflowPolicy::Block)?,
            server_in: queue("server_in", capacity.server_inbound, OverflowPolicy::Block)?,
            air_out: queue("air_out", capacity.air_outbound, OverflowPolicy::DropOldest)?,
        })
    }

    fn stop_all(&self) {
        self.wireless_raw.stop();
        self.events.stop();
        self.wired_out.stop();
        self.server_in.stop();
        self.air_out.stop();
    }

    /// Overflow-policy drops per queue.
    pub fn dropped(&self) -> Vec<(&'static str, u64)> {
        vec![
            (self.wireless_raw.name(), self.wireless_raw.dropped_count()),
            (self.events.name(), self.events.dropped_count()),
            (self.wired_out.name(), self.wired_out.dropped_count()),
            (self.server_in.name(), self.server_in.dropped_count()),
            (self.air_out.name(), self.air_out.dropped_count()),
        ]
    }
}

// ── Shutdown report ───────────────────────────────────────────────────────────

/// Per-thread counters collected by [`Pipeline::stop`].  A `None` means the
/// thread was never started or panicked.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub machine: Option<MachineStats>,
    pub sender: Option<SenderStats>,
    pub timer: Option<TimerStats>,
    pub workers: Vec<(&'static str, WorkerStats)>,
    pub dropped: Vec<(&'static str, u64)>,
}

impl ShutdownReport {
    pub fn worker(&self, name: &str) -> Option<WorkerStats> {
        self.workers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, stats)| *stats)
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    queues: Queues,
    timer: Arc<TimerScheduler>,
    shutdown: Shutdown,
    /// Closed during stop so blocked readers return.
    sources: Vec<Arc<dyn FrameSource>>,
    timer_thread: Option<JoinHandle<TimerStats>>,
    machine_thread: Option<JoinHandle<MachineExit>>,
    sender_thread: Option<JoinHandle<SenderStats>>,
    workers: Vec<(&'static str, JoinHandle<WorkerStats>)>,
}

fn spawn<T, F>(name: &'static str, span: Span, f: F) -> Result<JoinHandle<T>, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || span.in_scope(f))
        .map_err(|source| PipelineError::Spawn {
            thread: name,
            source,
        })
}

fn join<T>(name: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            error!(thread = name, "thread panicked");
            None
        }
    }
}

impl Pipeline {
    /// Allocate queues and start every thread in dependency order.
    ///
    /// # Errors
    /// Zero queue/timer capacity, or a thread that cannot be spawned.  On a
    /// spawn failure the threads already running are stopped first.
    pub fn start(config: &RsuConfig, parts: Collaborators) -> Result<Self, PipelineError> {
        let queues = Queues::new(&config.capacity)?;
        let timer = TimerScheduler::new(config.capacity.timers, Arc::clone(&parts.clock))
            .map(Arc::new)
            .ok_or(PipelineError::InvalidTimerCapacity)?;

        let Collaborators {
            links,
            filter,
            security,
            open_alarm,
            clock,
        } = parts;

        let mut sources = vec![Arc::clone(&links.wireless_rx)];
        sources.extend(links.commands.iter().cloned());
        sources.extend(links.uplink.iter().map(|u| Arc::clone(&u.rx)));

        let mut pipeline = Pipeline {
            queues,
            timer,
            shutdown: Shutdown::new(),
            sources,
            timer_thread: None,
            machine_thread: None,
            sender_thread: None,
            workers: Vec::new(),
        };

        match pipeline.launch(config, links, filter, security, open_alarm, clock) {
            Ok(()) => {
                info!(rsu_id = config.rsu.id, "pipeline started");
                Ok(pipeline)
            }
            Err(e) => {
                error!(error = %e, "pipeline start failed, stopping started threads");
                pipeline.halt();
                Err(e)
            }
        }
    }

    fn launch(
        &mut self,
        config: &RsuConfig,
        links: Links,
        filter: Arc<dyn Filter>,
        security: Arc<dyn Security>,
        open_alarm: AlarmOpener,
        clock: Arc<dyn Clock>,
    ) -> Result<(), PipelineError> {
        let q = &self.queues;
        let shutdown = &self.shutdown;

        let timer = Arc::clone(&self.timer);
        self.timer_thread = Some(spawn("timer", info_span!("timer"), move || timer.run())?);

        let alarm = match open_alarm() {
            Ok(alarm) => Some(alarm),
            Err(e) => {
                warn!(error = %e, "alarm output unavailable, running without it");
                None
            }
        };

        let machine = AccidentStateMachine::new(
            config.machine(),
            Arc::clone(&q.events),
            Arc::clone(&q.wired_out),
            Arc::clone(&q.air_out),
            Arc::clone(&self.timer),
            alarm,
            shutdown.clone(),
        );
        self.machine_thread = Some(spawn(
            "state_machine",
            info_span!("state_machine"),
            move || machine.run(),
        )?);

        if links.uplink.is_none() {
            warn!(server = %config.server.addr(), "uplink offline, wired reports will be dropped");
        }
        let sender = ReliableSender::new(
            config.sender(),
            Arc::clone(&q.wired_out),
            links.uplink.as_ref().map(|u| Arc::clone(&u.tx)),
            Arc::clone(&security),
            clock,
            shutdown.clone(),
        );
        self.sender_thread = Some(spawn(
            "reliable_sender",
            info_span!("reliable_sender"),
            move || sender.run(),
        )?);

        // ── Consumers ─────────────────────────────────────────────────────────

        let mut spawned = Vec::new();
        {
            let (air, sink, sec, stop) = (
                Arc::clone(&q.air_out),
                Arc::clone(&links.wireless_tx),
                Arc::clone(&security),
                shutdown.clone(),
            );
            let identity = AirIdentity {
                rsu_id: config.rsu.id,
                position: config.rsu.position,
                filter: config.filter,
            };
            spawned.push((
                "air_tx",
                spawn("air_tx", info_span!("air_tx"), move || {
                    workers::air_tx(&air, sink.as_ref(), sec.as_ref(), &identity, &stop)
                }),
            ));
        }
        {
            let (inbound, events, stop) = (
                Arc::clone(&q.server_in),
                Arc::clone(&q.events),
                shutdown.clone(),
            );
            spawned.push((
                "server_dispatch",
                spawn("server_dispatch", info_span!("server_dispatch"), move || {
                    workers::server_dispatch(&inbound, &events, &stop)
                }),
            ));
        }
        {
            let (raw, events, filt, sec, stop) = (
                Arc::clone(&q.wireless_raw),
                Arc::clone(&q.events),
                Arc::clone(&filter),
                Arc::clone(&security),
                shutdown.clone(),
            );
            let rsu_id = config.rsu.id;
            spawned.push((
                "wireless_ingress",
                spawn("wireless_ingress", info_span!("wireless_ingress"), move || {
                    workers::wireless_ingress(
                        &raw,
                        &events,
                        filt.as_ref(),
                        sec.as_ref(),
                        rsu_id,
                        &stop,
                    )
                }),
            ));
        }

        // ── Link readers ──────────────────────────────────────────────────────

        {
            let (source, raw, stop) = (
                Arc::clone(&links.wireless_rx),
                Arc::clone(&q.wireless_raw),
                shutdown.clone(),
            );
            spawned.push((
                "wireless_rx",
                spawn("wireless_rx", info_span!("wireless_rx"), move || {
                    workers::receive(source.as_ref(), &raw, &stop)
                }),
            ));
        }
        if let Some(commands) = links.commands.as_ref() {
            let (source, inbound, sec, stop) = (
                Arc::clone(commands),
                Arc::clone(&q.server_in),
                Arc::clone(&security),
                shutdown.clone(),
            );
            spawned.push((
                "command_rx",
                spawn("command_rx", info_span!("command_rx"), move || {
                    workers::command_rx(source.as_ref(), &inbound, sec.as_ref(), &stop)
                }),
            ));
        }
        if let Some(uplink) = links.uplink.as_ref() {
            let (source, wired, inbound, sec, stop) = (
                Arc::clone(&uplink.rx),
                Arc::clone(&q.wired_out),
                Arc::clone(&q.server_in),
                Arc::clone(&security),
                shutdown.clone(),
            );
            spawned.push((
                "uplink_rx",
                spawn("uplink_rx", info_span!("uplink_rx"), move || {
                    workers::uplink_rx(source.as_ref(), &wired, &inbound, sec.as_ref(), &stop)
                }),
            ));
        }

        // Keep every handle that did start, even if a later spawn failed.
        let mut first_error = None;
        for (name, result) in spawned {
            match result {
                Ok(handle) => self.workers.push((name, handle)),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn timer(&self) -> &Arc<TimerScheduler> {
        &self.timer
    }

    /// Stop every thread in order and collect their counters.
    pub fn stop(mut self) -> ShutdownReport {
        self.halt()
    }

    fn halt(&mut self) -> ShutdownReport {
        info!("pipeline stopping");
        self.shutdown.trigger();
        self.queues.stop_all();
        for source in self.sources.drain(..) {
            source.close();
        }

        let mut report = ShutdownReport::default();
        let mut alarm = None;
        if let Some(exit) = self
            .machine_thread
            .take()
            .and_then(|h| join("state_machine", h))
        {
            report.machine = Some(exit.stats);
            alarm = exit.alarm;
        }

        self.timer.stop();
        report.timer = self.timer_thread.take().and_then(|h| join("timer", h));
        report.sender = self
            .sender_thread
            .take()
            .and_then(|h| join("reliable_sender", h));
        for (name, handle) in self.workers.drain(..) {
            if let Some(stats) = join(name, handle) {
                report.workers.push((name, stats));
            }
        }

        if let Some(mut alarm) = alarm {
            alarm.close();
        }

        report.dropped = self.queues.dropped();
        for (queue, dropped) in &report.dropped {
            if *dropped > 0 {
                info!(queue = *queue, dropped = *dropped, "queue overflow drops");
            }
        }
        for (name, stats) in &report.workers {
            info!(
                thread = *name,
                processed = stats.processed,
                dropped = stats.dropped,
                errors = stats.errors,
                "worker stopped"
            );
        }
        info!("pipeline stopped");
        report
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.machine_thread.is_some() || self.timer_thread.is_some() {
            self.halt();
        }
    }
}
