/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::io;

use thiserror::Error;

/// Startup failures.  Once running, nothing in the pipeline is fatal.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("queue '{queue}' needs a non-zero capacity")]
    InvalidQueueCapacity { queue: &'static str },

    #[error("timer scheduler needs a non-zero capacity")]
    InvalidTimerCapacity,

    #[error("failed to spawn thread '{thread}': {source}")]
    Spawn {
        thread: &'static str,
        #[source]
        source: io::Error,
    },
}
