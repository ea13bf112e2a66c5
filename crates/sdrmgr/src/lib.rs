// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! sdrmgr - VITA-49 resource manager
//!
//! Control-plane daemon for an embedded software-defined-radio platform.
//! Clients send VITA-49 resource-management requests over a local Unix
//! socket or a Serial-RapidIO mailbox; the manager allocates one worker
//! subprocess per stream and routes packets between the link and the
//! worker for the life of the session.
//!
//! # Architecture
//!
//! ```text
//!  +----------------+     southbound      +----------------+
//!  |    Control     | ------------------> |     Worker     |
//!  | (unix / srio)  | <------------------ |   (process)    |
//!  +----------------+     northbound      +----------------+
//!          ^                                      ^
//!          |        +----------------------+      |
//!          +--------|   Daemon event loop  |------+
//!                   |  mio::Poll + timers  |
//!                   +----------------------+
//! ```
//!
//! Every packet travels as an [`Mbuf`]: a fixed-capacity, cursor-addressed
//! byte buffer carrying a small routing record ([`Route`]). Buffers move
//! between queues by ownership transfer, so a buffer has exactly one owner
//! at every point in time.
//!
//! # Quick Start
//!
//! ```bash
//! # Run in the foreground with debug output for all controls
//! sdrmgrd -f -c /etc/sdrmgr/sdrmgr.toml -d 'control*=debug'
//!
//! # Ask the running daemon for its worker table
//! sdrctl --socket /run/sdrmgr.sock workers
//! ```

pub mod config;
pub mod control;
pub mod ctltool;
pub mod daemon;
pub mod error;
pub mod list;
pub mod logging;
pub mod manager;
pub mod mbuf;
pub mod mqueue;
pub mod poll;
pub mod resource;
pub mod route;
pub mod timer;
pub mod vita49;
pub mod worker;

pub use config::{DaemonConfig, InstanceConfig, LoopConfig, ManagerConfig};
pub use control::{Control, Status};
pub use daemon::{Daemon, Phase};
pub use error::{ConfigError, ControlError, DaemonError, MbufError, WorkerError};
pub use list::{GrowList, List};
pub use manager::Manager;
pub use mbuf::{Mbuf, SharedMbuf};
pub use mqueue::{EnqueueError, EnqueueFailure, MQueue, QueueId};
pub use poll::FdSet;
pub use resource::{Resource, ResourceList};
pub use route::{ControlId, Msg, Route, Stats, WorkerId};
pub use timer::{TimerId, TimerList};
pub use vita49::{Kind, Packet, Vita49Error};
pub use worker::{Worker, WorkerState};
