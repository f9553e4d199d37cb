/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Process-wide stop signal observed by every pipeline thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable one-way flag.  Once triggered it stays triggered.
///
/// Used together with [`BoundedQueue::stop`](crate::queue::BoundedQueue::stop):
/// the queue stop wakes blocked threads, the flag tells them not to process
/// anything they were woken with.
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = Shutdown::new();
        let b = a.clone();
        assert!(!b.is_triggered());
        a.trigger();
        assert!(b.is_triggered());
    }
}
