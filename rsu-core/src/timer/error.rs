/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors returned by [`TimerScheduler::add`](super::TimerScheduler::add).

use thiserror::Error;

/// Why a timer could not be registered.
///
/// Neither case is retried by the scheduler; the caller logs and decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimerError {
    /// The heap already holds `capacity` pending timers.
    #[error("timer heap full ({capacity} pending timers)")]
    Full { capacity: usize },

    /// [`TimerScheduler::stop`](super::TimerScheduler::stop) has been called.
    #[error("timer scheduler is stopped")]
    Stopped,
}
