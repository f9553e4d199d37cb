/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! RSU core – accident alert relay between vehicles and the traffic server
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── queue        – BoundedQueue<T> with Block / DropNewest / DropOldest
//! ├── clock        – monotonic + manual clocks
//! ├── timer/       – min-heap TimerScheduler
//! ├── shutdown     – process-wide stop flag
//! ├── wire/        – byte-exact WL-1 and wired packet codec
//! ├── security     – wrap / strip (pass-through stub)
//! ├── filter       – light + heavy WL-1 admission checks
//! ├── alarm        – sysfs GPIO warning light
//! ├── link         – UDP broadcast, TCP uplink, TCP command server
//! ├── accident/    – events, accident table, state machine
//! ├── uplink       – ReliableSender (pending / ACK / retry)
//! ├── pipeline/    – composition root, worker threads, ordered shutdown
//! └── config/      – YAML configuration
//! ```
//!
//! Everything runs on OS threads that talk only through [`queue::BoundedQueue`]
//! and the [`timer::TimerScheduler`].  The accident table and the alarm are
//! owned by the state machine thread.

pub mod accident;
pub mod alarm;
pub mod clock;
pub mod config;
pub mod filter;
pub mod link;
pub mod pipeline;
pub mod queue;
pub mod security;
pub mod shutdown;
pub mod timer;
pub mod uplink;
pub mod wire;
