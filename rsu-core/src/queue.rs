/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Bounded, thread-safe FIFO shared between pipeline threads.
//!
//! Every hand-off in the RSU pipeline goes through a [`BoundedQueue`]: raw
//! WL-1 frames, state-machine events, uplink commands and air broadcasts.
//! Items are moved in and moved out, so a queued value never has two owners.
//!
//! # Overflow policies
//!
//! | Policy | `push` on a full queue |
//! |---|---|
//! | [`OverflowPolicy::Block`] | waits for space (or `stop()`) |
//! | [`OverflowPolicy::DropNewest`] | rejects the new item, counts a drop |
//! | [`OverflowPolicy::DropOldest`] | evicts the head, counts a drop, accepts the new item |
//!
//! After [`stop`](BoundedQueue::stop) every push is rejected and `pop`
//! drains what is left, then returns `None` forever.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

// ── Policy ────────────────────────────────────────────────────────────────────

/// What `push` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the producer until a consumer frees a slot.
    Block,
    /// Reject the incoming item.
    DropNewest,
    /// Evict the oldest queued item to make room.
    DropOldest,
}

// ── Push rejection ────────────────────────────────────────────────────────────

/// Why a push was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue has been stopped.
    Stopped,
    /// The queue was full under [`OverflowPolicy::DropNewest`].
    Full,
}

/// A refused push.  Ownership of the item goes back to the caller.
pub struct Rejected<T> {
    pub item: T,
    pub reason: RejectReason,
}

impl<T> Rejected<T> {
    /// Take the item back for disposal or retry.
    pub fn into_inner(self) -> T {
        self.item
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`BoundedQueue::pop_timeout`].
#[derive(Debug, PartialEq, Eq)]
pub enum PopTimeout<T> {
    Item(T),
    TimedOut,
    /// Stopped and drained; no item will ever be returned again.
    Stopped,
}

// ── BoundedQueue ──────────────────────────────────────────────────────────────

struct Inner<T> {
    items: VecDeque<T>,
    dropped: u64,
    stopped: bool,
}

/// Fixed-capacity multi-producer / multi-consumer FIFO.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue.
    ///
    /// Returns `None` when `capacity` is zero; a zero-slot queue could
    /// never accept an item under `Block`.
    pub fn new(name: &'static str, capacity: usize, policy: OverflowPolicy) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        Some(Self {
            name,
            capacity,
            policy,
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
                stopped: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Enqueue `item` according to the overflow policy.
    ///
    /// `Ok(())` means the queue now owns the item.  On `Err` the item is
    /// handed back inside [`Rejected`].
    pub fn push(&self, item: T) -> Result<(), Rejected<T>> {
        let mut inner = self.inner.lock();

        if self.policy == OverflowPolicy::Block {
            while !inner.stopped && inner.items.len() >= self.capacity {
                self.not_full.wait(&mut inner);
            }
        }
        if inner.stopped {
            return Err(Rejected {
                item,
                reason: RejectReason::Stopped,
            });
        }

        if inner.items.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropNewest => {
                    inner.dropped += 1;
                    return Err(Rejected {
                        item,
                        reason: RejectReason::Full,
                    });
                }
                OverflowPolicy::DropOldest => {
                    inner.dropped += 1;
                    // Evicted item is dropped here, outside the caller's view.
                    inner.items.pop_front();
                }
                OverflowPolicy::Block => unreachable!("blocking push waited for space"),
            }
        }

        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` only once the queue is stopped and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        while !inner.stopped && inner.items.is_empty() {
            self.not_empty.wait(&mut inner);
        }
        let item = inner.items.pop_front();
        drop(inner);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> PopTimeout<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.stopped && inner.items.is_empty() {
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        match inner.items.pop_front() {
            Some(item) => {
                drop(inner);
                self.not_full.notify_one();
                PopTimeout::Item(item)
            }
            None if inner.stopped => PopTimeout::Stopped,
            None => PopTimeout::TimedOut,
        }
    }

    /// Stop the queue and wake every waiter.  Idempotent.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.stopped = true;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Number of items rejected or evicted by the overflow policy.
    ///
    /// Pushes refused because the queue was stopped are not counted.
    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &inner.items.len())
            .field("dropped", &inner.dropped)
            .field("stopped", &inner.stopped)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn queue(capacity: usize, policy: OverflowPolicy) -> BoundedQueue<u32> {
        BoundedQueue::new("test", capacity, policy).unwrap()
    }

    fn drain(q: &BoundedQueue<u32>) -> Vec<u32> {
        let mut out = Vec::new();
        while let PopTimeout::Item(v) = q.pop_timeout(Duration::ZERO) {
            out.push(v);
        }
        out
    }

    // ── Construction ──────────────────────────────────────────────────────────

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(BoundedQueue::<u32>::new("zero", 0, OverflowPolicy::Block).is_none());
    }

    // ── FIFO + overflow ───────────────────────────────────────────────────────

    #[test]
    fn items_come_out_in_push_order() {
        let q = queue(4, OverflowPolicy::Block);
        for v in 1..=4 {
            q.push(v).unwrap();
        }
        assert_eq!(drain(&q), vec![1, 2, 3, 4]);
    }

    #[test]
    fn drop_newest_keeps_first_items_and_counts_rejection() {
        let q = queue(2, OverflowPolicy::DropNewest);
        assert!(q.push(10).is_ok());
        assert!(q.push(20).is_ok());

        let rejected = q.push(30).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Full);
        assert_eq!(rejected.into_inner(), 30, "ownership returns to the caller");

        assert_eq!(q.dropped_count(), 1);
        assert_eq!(drain(&q), vec![10, 20]);
    }

    #[test]
    fn drop_oldest_evicts_head_and_preserves_order() {
        let q = queue(3, OverflowPolicy::DropOldest);
        for v in 1..=5 {
            assert!(q.push(v).is_ok());
        }
        assert_eq!(q.dropped_count(), 2);
        assert_eq!(drain(&q), vec![3, 4, 5]);
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let q = queue(3, OverflowPolicy::DropOldest);
        for v in 0..100 {
            let _ = q.push(v);
            assert!(q.len() <= q.capacity());
        }
    }

    // ── Stop semantics ────────────────────────────────────────────────────────

    #[test]
    fn push_after_stop_is_rejected_without_counting_a_drop() {
        let q = queue(2, OverflowPolicy::DropNewest);
        q.stop();
        let rejected = q.push(1).unwrap_err();
        assert_eq!(rejected.reason, RejectReason::Stopped);
        assert_eq!(q.dropped_count(), 0);
    }

    #[test]
    fn stopped_queue_drains_then_returns_none_forever() {
        let q = queue(4, OverflowPolicy::Block);
        q.push(1).unwrap();
        q.push(2).unwrap();
        q.stop();
        q.stop(); // idempotent

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop_timeout(Duration::from_millis(5)), PopTimeout::Stopped);
    }

    #[test]
    fn pop_timeout_reports_timeout_on_empty_queue() {
        let q = queue(1, OverflowPolicy::Block);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), PopTimeout::TimedOut);
    }

    #[test]
    fn stop_wakes_blocked_consumer() {
        let q = Arc::new(queue(1, OverflowPolicy::Block));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.stop();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn stop_wakes_blocked_producer_and_returns_item() {
        let q = Arc::new(queue(1, OverflowPolicy::Block));
        q.push(1).unwrap();
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.push(2).map_err(|r| (r.reason, r.into_inner())))
        };
        thread::sleep(Duration::from_millis(20));
        q.stop();
        assert_eq!(
            producer.join().unwrap(),
            Err((RejectReason::Stopped, 2))
        );
    }

    // ── Concurrency ───────────────────────────────────────────────────────────

    #[test]
    fn blocking_queue_loses_nothing_across_threads() {
        let q = Arc::new(queue(8, OverflowPolicy::Block));
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250u32 {
                        q.push(p * 1_000 + i).unwrap();
                    }
                })
            })
            .collect();

        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(v) = q.pop() {
                    seen.push(v);
                }
                seen
            })
        };

        for p in producers {
            p.join().unwrap();
        }
        q.stop();
        let seen = consumer.join().unwrap();

        assert_eq!(seen.len(), 1_000);
        assert_eq!(q.dropped_count(), 0);
        // Per-producer order is preserved.
        for p in 0..4u32 {
            let mine: Vec<u32> = seen.iter().copied().filter(|v| v / 1_000 == p).collect();
            let mut sorted = mine.clone();
            sorted.sort_unstable();
            assert_eq!(mine, sorted, "producer {p} items reordered");
        }
    }
}
