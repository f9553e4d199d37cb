/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Single-threaded accident state machine.
//!
//! Per record: `Inactive → Active → (expired | server off) → Inactive`.
//!
//! | Event | Effect |
//! |---|---|
//! | `WirelessReport` | duplicate while Active: ignored. Otherwise activate, arm expiry, alarm ON, forward to the server |
//! | `ServerUpdate` | activate/deactivate per flag, arm expiry, keep details for rebroadcast, alarm = any active |
//! | `Tick` | expire stale records, rebroadcast active ones that have server details, re-arm the tick, alarm = any active |
//!
//! Reports and server updates for the same accident may arrive in either
//! order; every transition above is defined from any prior state.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::alarm::AlarmOutput;
use crate::clock::{Clock, Millis};
use crate::queue::{BoundedQueue, RejectReason};
use crate::shutdown::Shutdown;
use crate::timer::TimerScheduler;
use crate::uplink::UplinkMessage;
use crate::wire::{RsuInfo, WiredOutboundPayload};

use super::{
    AccidentTable, Event, OutboundAirCommand, OutboundWiredCommand, ServerUpdate, WirelessReport,
};

/// `acc_flag` carried by every report forwarded to the server.
const ACCIDENT_ON: u16 = 1;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub rsu_id: u32,
    pub tick_period_ms: Millis,
    /// Lifetime of an alert without a refresh.  `None`: alerts only clear
    /// on an explicit server "off".
    pub alert_ttl_ms: Option<Millis>,
    pub table_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            rsu_id: 200,
            tick_period_ms: 2_000,
            alert_ttl_ms: Some(15_000),
            table_capacity: 256,
        }
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MachineStats {
    pub events: u64,
    pub reports_forwarded: u64,
    pub duplicates: u64,
    pub server_updates: u64,
    pub ticks: u64,
    pub expired: u64,
    pub air_commands: u64,
    pub table_full: u64,
    /// Commands that could not be queued (queue stopped).
    pub dropped_commands: u64,
    pub alarm_failures: u64,
}

/// What the state machine hands back when its loop ends.
pub struct MachineExit {
    pub stats: MachineStats,
    /// Returned so the pipeline can close it after the timer has stopped.
    pub alarm: Option<Box<dyn AlarmOutput>>,
}

// ── AccidentStateMachine ──────────────────────────────────────────────────────

pub struct AccidentStateMachine {
    config: MachineConfig,
    table: AccidentTable,
    events: Arc<BoundedQueue<Event>>,
    wired_out: Arc<BoundedQueue<UplinkMessage>>,
    air_out: Arc<BoundedQueue<OutboundAirCommand>>,
    timer: Arc<TimerScheduler>,
    alarm: Option<Box<dyn AlarmOutput>>,
    /// Last value successfully written.  `None` forces the next write.
    alarm_state: Option<bool>,
    shutdown: Shutdown,
    stats: MachineStats,
}

impl AccidentStateMachine {
    pub fn new(
        config: MachineConfig,
        events: Arc<BoundedQueue<Event>>,
        wired_out: Arc<BoundedQueue<UplinkMessage>>,
        air_out: Arc<BoundedQueue<OutboundAirCommand>>,
        timer: Arc<TimerScheduler>,
        alarm: Option<Box<dyn AlarmOutput>>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            table: AccidentTable::new(config.table_capacity),
            config,
            events,
            wired_out,
            air_out,
            timer,
            alarm,
            alarm_state: None,
            shutdown,
            stats: MachineStats::default(),
        }
    }

    pub fn table(&self) -> &AccidentTable {
        &self.table
    }

    pub fn stats(&self) -> MachineStats {
        self.stats
    }

    /// Last alarm value applied, `None` before the first write.
    pub fn alarm_state(&self) -> Option<bool> {
        self.alarm_state
    }

    fn clock(&self) -> &Arc<dyn Clock> {
        self.timer.clock()
    }

    fn expiry_from(&self, now: Millis) -> Millis {
        match self.config.alert_ttl_ms {
            Some(ttl) => now.saturating_add(ttl),
            None => Millis::MAX,
        }
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    /// Consume events until the queue is stopped or shutdown is signalled.
    ///
    /// Drives the alarm low and schedules the first tick before entering
    /// the loop.
    pub fn run(mut self) -> MachineExit {
        info!(
            rsu_id = self.config.rsu_id,
            tick_period_ms = self.config.tick_period_ms,
            alert_ttl_ms = ?self.config.alert_ttl_ms,
            "state machine started"
        );
        if self.config.alert_ttl_ms.is_none() {
            warn!("alert expiry disabled, alerts only clear on a server \"off\" command");
        }
        self.apply_alarm(false);
        let first = self.clock().now_ms().saturating_add(self.config.tick_period_ms);
        self.schedule_tick(first);

        while let Some(event) = self.events.pop() {
            if self.shutdown.is_triggered() {
                break;
            }
            self.handle(event);
        }

        info!(
            events = self.stats.events,
            forwarded = self.stats.reports_forwarded,
            active = self.table.active_count(),
            "state machine stopped"
        );
        MachineExit {
            stats: self.stats,
            alarm: self.alarm,
        }
    }

    /// Apply one event.  Reports and server updates are stamped with the
    /// current clock; a tick carries its own time.
    pub fn handle(&mut self, event: Event) {
        self.stats.events += 1;
        match event {
            Event::WirelessReport(report) => {
                let now = self.clock().now_ms();
                self.on_wireless_report(report, now);
            }
            Event::ServerUpdate(update) => {
                let now = self.clock().now_ms();
                self.on_server_update(update, now);
            }
            Event::Tick(now) => self.on_tick(now),
        }
    }

    // ── Transitions ───────────────────────────────────────────────────────────

    fn on_wireless_report(&mut self, report: WirelessReport, now: Millis) {
        let id = report.accident_id();
        if self.table.get(id).is_some_and(|r| r.active) {
            self.stats.duplicates += 1;
            debug!(accident_id = id, "duplicate report suppressed");
            return;
        }

        let expire_time = self.expiry_from(now);
        let Some(record) = self.table.upsert(id) else {
            self.stats.table_full += 1;
            warn!(
                accident_id = id,
                capacity = self.table.capacity(),
                "accident table full, report rejected"
            );
            return;
        };
        record.active = true;
        record.expire_time = expire_time;
        info!(
            accident_id = id,
            severity = report.accident.severity,
            distance_m = report.distance_m,
            "accident activated by vehicle report"
        );

        self.apply_alarm(true);

        let command = OutboundWiredCommand {
            command_id: id,
            payload: WiredOutboundPayload {
                rsu_id: self.config.rsu_id,
                accident: report.accident,
                rsu_info: RsuInfo {
                    distance: u16::try_from(report.distance_m).unwrap_or(u16::MAX),
                    acc_flag: ACCIDENT_ON,
                    rsu_rx_time: report.rx_time_ms,
                },
            },
        };
        match self.wired_out.push(UplinkMessage::Command(command)) {
            Ok(()) => self.stats.reports_forwarded += 1,
            Err(rejected) => {
                self.stats.dropped_commands += 1;
                debug!(accident_id = id, reason = ?rejected.reason, "wired command dropped");
            }
        }
    }

    fn on_server_update(&mut self, update: ServerUpdate, now: Millis) {
        self.stats.server_updates += 1;
        let id = update.accident_id;
        let expire_time = self.expiry_from(now);
        let Some(record) = self.table.upsert(id) else {
            self.stats.table_full += 1;
            warn!(
                accident_id = id,
                capacity = self.table.capacity(),
                "accident table full, server update rejected"
            );
            return;
        };

        let was_active = record.active;
        record.active = update.is_active();
        record.expire_time = expire_time;
        record.last_details = Some(update.details);

        match (was_active, record.active) {
            (false, true) => info!(accident_id = id, "accident activated by server"),
            (true, false) => info!(accident_id = id, "accident cleared by server"),
            _ => debug!(accident_id = id, active = record.active, "server update applied"),
        }

        let any_active = self.table.any_active();
        self.apply_alarm(any_active);
    }

    fn on_tick(&mut self, now: Millis) {
        self.stats.ticks += 1;
        trace!(now, "tick");

        let mut expired = 0u64;
        let mut rebroadcast = Vec::new();
        for record in self.table.iter_mut() {
            if !record.active {
                continue;
            }
            if now > record.expire_time {
                record.active = false;
                expired += 1;
                info!(accident_id = record.accident_id, "accident expired");
                continue;
            }
            if let Some(details) = record.last_details {
                rebroadcast.push(OutboundAirCommand {
                    accident_id: record.accident_id,
                    details,
                });
            }
        }
        self.stats.expired += expired;

        for command in rebroadcast {
            match self.air_out.push(command) {
                Ok(()) => self.stats.air_commands += 1,
                Err(rejected) => {
                    self.stats.dropped_commands += 1;
                    if rejected.reason == RejectReason::Stopped {
                        debug!("air queue stopped, rebroadcast abandoned");
                        break;
                    }
                }
            }
        }

        self.schedule_tick(now.saturating_add(self.config.tick_period_ms));
        let any_active = self.table.any_active();
        self.apply_alarm(any_active);
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Arm a timer that posts `Tick` into our own event queue.
    fn schedule_tick(&self, due: Millis) {
        let events = Arc::clone(&self.events);
        let clock = Arc::clone(self.clock());
        let armed = self.timer.add(due, move || {
            // Rejected only once the pipeline is stopping.
            let _ = events.push(Event::Tick(clock.now_ms()));
        });
        if let Err(e) = armed {
            warn!(error = %e, due, "failed to schedule tick");
        }
    }

    /// Write the alarm only when the desired value differs from the last
    /// successful write.
    fn apply_alarm(&mut self, on: bool) {
        if self.alarm_state == Some(on) {
            return;
        }
        let Some(alarm) = self.alarm.as_mut() else {
            self.alarm_state = Some(on);
            return;
        };
        match alarm.set(on) {
            Ok(()) => self.alarm_state = Some(on),
            Err(e) => {
                self.stats.alarm_failures += 1;
                self.alarm_state = None;
                warn!(error = %e, on, "alarm write failed");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accident::ServerAccidentDetails;
    use crate::alarm::AlarmError;
    use crate::clock::ManualClock;
    use crate::queue::OverflowPolicy;
    use crate::wire::AccidentInfo;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct RecordingAlarm(Arc<Mutex<Vec<bool>>>);

    impl AlarmOutput for RecordingAlarm {
        fn set(&mut self, on: bool) -> Result<(), AlarmError> {
            self.0.lock().push(on);
            Ok(())
        }
    }

    struct Rig {
        clock: Arc<ManualClock>,
        wired: Arc<BoundedQueue<UplinkMessage>>,
        air: Arc<BoundedQueue<OutboundAirCommand>>,
        timer: Arc<TimerScheduler>,
        writes: Arc<Mutex<Vec<bool>>>,
        sm: AccidentStateMachine,
    }

    fn rig_with(config: MachineConfig) -> Rig {
        let clock = Arc::new(ManualClock::new(1_000));
        let events = Arc::new(BoundedQueue::new("events", 64, OverflowPolicy::Block).unwrap());
        let wired = Arc::new(BoundedQueue::new("wired", 64, OverflowPolicy::Block).unwrap());
        let air = Arc::new(BoundedQueue::new("air", 64, OverflowPolicy::DropOldest).unwrap());
        let timer = Arc::new(TimerScheduler::new(64, clock.clone()).unwrap());
        let alarm = RecordingAlarm::default();
        let writes = Arc::clone(&alarm.0);
        let sm = AccidentStateMachine::new(
            config,
            events,
            Arc::clone(&wired),
            Arc::clone(&air),
            Arc::clone(&timer),
            Some(Box::new(alarm)),
            Shutdown::new(),
        );
        Rig {
            clock,
            wired,
            air,
            timer,
            writes,
            sm,
        }
    }

    fn rig() -> Rig {
        rig_with(MachineConfig::default())
    }

    fn report(id: u64) -> Event {
        Event::WirelessReport(WirelessReport {
            accident: AccidentInfo {
                id,
                severity: 3,
                ..Default::default()
            },
            distance_m: 120,
            rx_time_ms: 1_700_000_000_000,
        })
    }

    fn details(id: u64) -> ServerAccidentDetails {
        ServerAccidentDetails {
            accident: AccidentInfo {
                id,
                severity: 4,
                lane: 2,
                ..Default::default()
            },
            server_tx_time: 99,
            period_sec: 2,
        }
    }

    fn server(id: u64, flag: u16) -> Event {
        Event::ServerUpdate(ServerUpdate {
            accident_id: id,
            active_flag: flag,
            details: details(id),
        })
    }

    fn drain<T>(q: &BoundedQueue<T>) -> Vec<T> {
        q.stop();
        std::iter::from_fn(|| q.pop()).collect()
    }

    // ── Wireless reports ──────────────────────────────────────────────────────

    #[test]
    fn duplicate_report_is_forwarded_once() {
        let mut r = rig();
        r.sm.handle(report(0x9999));
        r.sm.handle(report(0x9999));

        assert_eq!(r.sm.table().len(), 1);
        assert!(r.sm.table().get(0x9999).unwrap().active);
        assert_eq!(*r.writes.lock(), vec![true]);
        assert_eq!(r.sm.stats().duplicates, 1);

        let sent = drain(&r.wired);
        assert_eq!(sent.len(), 1);
        let UplinkMessage::Command(cmd) = sent[0] else {
            panic!("expected a command, got {:?}", sent[0]);
        };
        assert_eq!(cmd.command_id, 0x9999);
        assert_eq!(cmd.payload.rsu_id, 200);
        assert_eq!(cmd.payload.rsu_info.distance, 120);
        assert_eq!(cmd.payload.rsu_info.acc_flag, 1);
        assert_eq!(cmd.payload.rsu_info.rsu_rx_time, 1_700_000_000_000);
    }

    #[test]
    fn duplicate_does_not_refresh_expiry() {
        let mut r = rig();
        r.sm.handle(report(5));
        let armed = r.sm.table().get(5).unwrap().expire_time;
        r.clock.advance(5_000);
        r.sm.handle(report(5));
        assert_eq!(r.sm.table().get(5).unwrap().expire_time, armed);
    }

    #[test]
    fn report_after_expiry_is_forwarded_again() {
        let mut r = rig();
        r.sm.handle(report(5));
        r.sm.handle(Event::Tick(1_000 + 15_001));
        assert!(!r.sm.table().get(5).unwrap().active);

        r.clock.set(20_000);
        r.sm.handle(report(5));
        assert!(r.sm.table().get(5).unwrap().active);
        assert_eq!(r.sm.table().len(), 1);
        assert_eq!(drain(&r.wired).len(), 2);
    }

    #[test]
    fn distance_saturates_to_wire_width() {
        let mut r = rig();
        r.sm.handle(Event::WirelessReport(WirelessReport {
            accident: AccidentInfo {
                id: 1,
                ..Default::default()
            },
            distance_m: 100_000,
            rx_time_ms: 0,
        }));
        let sent = drain(&r.wired);
        let UplinkMessage::Command(cmd) = sent[0] else {
            panic!("expected a command");
        };
        assert_eq!(cmd.payload.rsu_info.distance, u16::MAX);
    }

    #[test]
    fn full_table_rejects_new_report() {
        let mut r = rig_with(MachineConfig {
            table_capacity: 1,
            ..Default::default()
        });
        r.sm.handle(report(1));
        r.sm.handle(report(2));
        assert_eq!(r.sm.table().len(), 1);
        assert!(r.sm.table().get(2).is_none());
        assert_eq!(r.sm.stats().table_full, 1);
        assert_eq!(drain(&r.wired).len(), 1);
    }

    // ── Server updates ────────────────────────────────────────────────────────

    #[test]
    fn server_on_then_tick_rebroadcasts_details() {
        let mut r = rig();
        r.sm.handle(server(42, 1));
        r.sm.handle(Event::Tick(2_000));

        let air = drain(&r.air);
        assert_eq!(air.len(), 1);
        assert_eq!(air[0].accident_id, 42);
        assert_eq!(air[0].details, details(42));
        assert_eq!(r.sm.alarm_state(), Some(true));
        assert_eq!(*r.writes.lock(), vec![true]);
    }

    #[test]
    fn server_off_clears_alarm_when_nothing_else_active() {
        let mut r = rig();
        r.sm.handle(server(42, 1));
        r.sm.handle(Event::Tick(2_000));
        r.sm.handle(server(42, 0));

        assert!(!r.sm.table().get(42).unwrap().active);
        assert_eq!(*r.writes.lock(), vec![true, false]);
    }

    #[test]
    fn server_off_keeps_alarm_while_another_accident_is_active() {
        let mut r = rig();
        r.sm.handle(report(7));
        r.sm.handle(server(42, 1));
        r.sm.handle(server(42, 0));
        assert_eq!(*r.writes.lock(), vec![true]);
        assert_eq!(r.sm.alarm_state(), Some(true));
    }

    #[test]
    fn server_off_before_report_leaves_record_inactive() {
        let mut r = rig();
        r.sm.handle(server(9, 0));
        assert!(!r.sm.table().get(9).unwrap().active);
        r.sm.handle(report(9));
        assert!(r.sm.table().get(9).unwrap().active);
        assert_eq!(drain(&r.wired).len(), 1);
    }

    #[test]
    fn server_update_for_active_report_enables_rebroadcast() {
        let mut r = rig();
        r.sm.handle(report(3));
        r.sm.handle(Event::Tick(2_000));
        assert!(r.air.is_empty(), "no server details yet");

        r.sm.handle(server(3, 1));
        r.sm.handle(Event::Tick(4_000));
        assert_eq!(drain(&r.air).len(), 1);
    }

    // ── Ticks ─────────────────────────────────────────────────────────────────

    #[test]
    fn tick_expires_stale_records_and_stops_rebroadcast() {
        let mut r = rig();
        r.sm.handle(server(42, 1)); // expires at 16_000
        r.sm.handle(Event::Tick(16_000));
        assert!(r.sm.table().get(42).unwrap().active, "not yet past expiry");

        r.sm.handle(Event::Tick(16_001));
        assert!(!r.sm.table().get(42).unwrap().active);
        assert_eq!(drain(&r.air).len(), 1, "only the first tick rebroadcast");
        assert_eq!(*r.writes.lock(), vec![true, false]);
        assert_eq!(r.sm.stats().expired, 1);
    }

    #[test]
    fn without_ttl_alerts_never_expire() {
        let mut r = rig_with(MachineConfig {
            alert_ttl_ms: None,
            ..Default::default()
        });
        r.sm.handle(server(42, 1));
        r.sm.handle(Event::Tick(Millis::MAX - 1));
        assert!(r.sm.table().get(42).unwrap().active);
    }

    #[test]
    fn tick_reschedules_itself() {
        let mut r = rig();
        assert_eq!(r.timer.pending(), 0);
        r.sm.handle(Event::Tick(2_000));
        assert_eq!(r.timer.next_due(), Some(4_000));
    }

    #[test]
    fn first_tick_is_scheduled_on_run() {
        let r = rig();
        let events = Arc::clone(&r.sm.events);
        events.stop();
        let exit = r.sm.run();
        assert_eq!(r.timer.next_due(), Some(1_000 + 2_000));
        assert!(exit.alarm.is_some());
    }

    // ── Alarm ─────────────────────────────────────────────────────────────────

    struct FailingAlarm;

    impl AlarmOutput for FailingAlarm {
        fn set(&mut self, _on: bool) -> Result<(), AlarmError> {
            Err(AlarmError::ChipNotFound {
                chip: "x".into(),
                root: "/nowhere".into(),
            })
        }
    }

    #[test]
    fn alarm_failure_is_retried_on_next_change() {
        let mut r = rig();
        r.sm.alarm = Some(Box::new(FailingAlarm));
        r.sm.handle(report(1));
        r.sm.handle(Event::Tick(2_000));
        assert_eq!(r.sm.alarm_state(), None);
        assert_eq!(r.sm.stats().alarm_failures, 2);
        assert!(r.sm.table().get(1).unwrap().active);
    }

    #[test]
    fn runs_without_alarm_output() {
        let mut r = rig();
        r.sm.alarm = None;
        r.sm.handle(report(1));
        assert_eq!(r.sm.alarm_state(), Some(true));
    }
}
