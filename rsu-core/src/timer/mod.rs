/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Delayed-callback engine on a monotonic clock.
//!
//! [`TimerScheduler`] keeps pending timers in a binary min-heap keyed by due
//! time (ties broken by insertion order) and runs them from one dedicated
//! thread:
//!
//! ```text
//!            add(due, cb) ──► [ min-heap ] ──► run loop ──► cb()   (lock released)
//!                                 ▲                │
//!          earlier insertion ─────┘ wakes the loop ┘ sleeps until heap top is due
//! ```
//!
//! Timers are fire-and-forget: there is no cancellation, and
//! [`stop`](TimerScheduler::stop) discards everything that has not fired
//! yet without invoking it.  That fits the periodic accident `Tick`, not
//! hard deadlines.

pub mod error;

pub use error::TimerError;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::clock::{Clock, Millis};

/// Work to run when a timer fires.  Replaces a function pointer + opaque
/// argument pair: whatever the callback needs is captured by the closure.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

// ── Heap entry ────────────────────────────────────────────────────────────────

struct TimerEntry {
    due: Millis,
    seq: u64,
    callback: TimerCallback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest due on top.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ── Statistics ────────────────────────────────────────────────────────────────

/// Counters returned by [`TimerScheduler::run`] when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub fired: u64,
    pub rejected_full: u64,
    /// Timers still pending when the scheduler stopped.
    pub discarded: u64,
}

// ── TimerScheduler ────────────────────────────────────────────────────────────

struct State {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    stopped: bool,
    stats: TimerStats,
}

pub struct TimerScheduler {
    capacity: usize,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    wake: Condvar,
}

impl TimerScheduler {
    /// Create a scheduler holding at most `capacity` pending timers.
    ///
    /// Returns `None` for a zero capacity.
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        Some(Self {
            capacity,
            clock,
            state: Mutex::new(State {
                heap: BinaryHeap::with_capacity(capacity),
                next_seq: 0,
                stopped: false,
                stats: TimerStats::default(),
            }),
            wake: Condvar::new(),
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Register `callback` to run at monotonic time `due`.
    ///
    /// Wakes the run loop when the new timer becomes the earliest one, so a
    /// long sleep is shortened immediately.
    ///
    /// # Errors
    /// [`TimerError::Full`] at capacity, [`TimerError::Stopped`] after
    /// [`stop`](Self::stop).  The request is dropped in both cases.
    pub fn add<F>(&self, due: Millis, callback: F) -> Result<(), TimerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(TimerError::Stopped);
        }
        if state.heap.len() >= self.capacity {
            state.stats.rejected_full += 1;
            return Err(TimerError::Full {
                capacity: self.capacity,
            });
        }

        let becomes_earliest = state.heap.peek().map_or(true, |top| due < top.due);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(TimerEntry {
            due,
            seq,
            callback: Box::new(callback),
        });
        drop(state);

        if becomes_earliest {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Due time of the earliest pending timer.
    pub fn next_due(&self) -> Option<Millis> {
        self.state.lock().heap.peek().map(|e| e.due)
    }

    /// Stop the run loop and discard all pending timers.  Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            state.stopped = true;
            state.stats.discarded += state.heap.len() as u64;
            // Release captured resources now rather than at scheduler drop.
            state.heap.clear();
        }
        drop(state);
        self.wake.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Run the scheduler loop on the calling thread until [`stop`](Self::stop).
    ///
    /// Every timer whose due time has passed is popped under the lock and
    /// invoked after the lock is released, so callbacks may call
    /// [`add`](Self::add) without deadlocking.
    pub fn run(&self) -> TimerStats {
        debug!(capacity = self.capacity, "timer loop started");
        let mut due_now: Vec<TimerEntry> = Vec::new();

        loop {
            {
                let mut state = self.state.lock();
                while !state.stopped && state.heap.is_empty() {
                    self.wake.wait(&mut state);
                }
                if state.stopped {
                    break;
                }

                let now = self.clock.now_ms();
                let top_due = state.heap.peek().map_or(now, |e| e.due);
                if top_due > now {
                    let sleep = Duration::from_millis(top_due - now);
                    trace!(sleep_ms = top_due - now, "waiting for next timer");
                    self.wake.wait_for(&mut state, sleep);
                    continue;
                }

                while state.heap.peek().is_some_and(|e| e.due <= now) {
                    if let Some(entry) = state.heap.pop() {
                        due_now.push(entry);
                    }
                }
            }

            let mut batch = due_now.drain(..);
            while let Some(entry) = batch.next() {
                if self.is_stopped() {
                    // Popped but never run; count them with the heap leftovers.
                    self.state.lock().stats.discarded += 1 + batch.len() as u64;
                    break;
                }
                trace!(due = entry.due, "timer fired");
                (entry.callback)();
                self.state.lock().stats.fired += 1;
            }
        }

        let stats = self.state.lock().stats;
        debug!(
            fired = stats.fired,
            discarded = stats.discarded,
            rejected_full = stats.rejected_full,
            "timer loop stopped"
        );
        stats
    }
}

impl fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimerScheduler")
            .field("capacity", &self.capacity)
            .field("pending", &state.heap.len())
            .field("stopped", &state.stopped)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
