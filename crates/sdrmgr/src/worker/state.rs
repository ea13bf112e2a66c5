// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker lifecycle state machine.
//!
//! ```text
//!            configured            start request / auto_start
//!  CONFIG ─────────────> READY ───────────────────────────────> START
//!                        ^  ^  \ exited, restart flag unset        |  \
//!                        |  |   +──────────> ZOMBIE               |   \ limiter
//!             exit seen  |  | spawn failed                 spawned |    v
//!                        |  +──────────────────────────────────────+  LIMIT
//!                      STOP <────── stop request ───── NORMAL <──+    |
//!                                                        |       +────+
//!                                    unexpected exit ────+──> READY
//! ```
//!
//! [`Lifecycle::tick`] runs once per loop iteration and falls through
//! consecutive states until one has to wait. The class-specific work (argv
//! check, spawn, exit polling, pipe teardown) goes through [`Supervised`].

use std::fmt;
use std::time::Instant;

use mio::Registry;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use crate::control::Status;
use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Config,
    Ready,
    Start,
    Normal,
    Stop,
    Limit,
    Zombie,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Config => "CONFIG",
            WorkerState::Ready => "READY",
            WorkerState::Start => "START",
            WorkerState::Normal => "NORMAL",
            WorkerState::Stop => "STOP",
            WorkerState::Limit => "LIMIT",
            WorkerState::Zombie => "ZOMBIE",
        }
    }

    /// Settled states the shutdown sequence waits for.
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            WorkerState::Config | WorkerState::Ready | WorkerState::Limit | WorkerState::Zombie
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class-specific process handling driven by [`Lifecycle::tick`].
pub trait Supervised {
    /// Setup complete (e.g. an executable is known).
    fn is_configured(&self) -> bool;

    /// Start the managed process and register its pipes.
    fn spawn(&mut self, registry: &Registry) -> Result<(), WorkerError>;

    /// Exit status if the process has exited; negative for a signal.
    fn try_wait(&mut self) -> Result<Option<i32>, WorkerError>;

    /// Close and deregister the pipes. The process is not signalled.
    fn close_pipes(&mut self, registry: &Registry);
}

/// State plus the flags and limiter that decide transitions.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: WorkerState,
    pub auto_start: bool,
    pub restart_on_error: bool,
    pub restart_on_exit: bool,
    pub limiter: RateLimiter,
    armed: bool,
    stop_requested: bool,
    retire: bool,
    unexpected_exit: Option<i32>,
    last_status: Option<i32>,
    starts: u64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: WorkerState::Config,
            auto_start: false,
            restart_on_error: false,
            restart_on_exit: false,
            limiter: RateLimiter::disabled(),
            armed: false,
            stop_requested: false,
            retire: false,
            unexpected_exit: None,
            last_status: None,
            starts: 0,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Exit status of the last process, if one has exited.
    pub fn last_status(&self) -> Option<i32> {
        self.last_status
    }

    /// Successful spawns so far.
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Run the process and keep it running. Revives a zombie.
    pub fn request_start(&mut self) {
        self.armed = true;
        self.stop_requested = false;
        self.retire = false;
        if self.state == WorkerState::Zombie {
            self.unexpected_exit = None;
            self.state = WorkerState::Ready;
        }
    }

    /// Stop the process and wait in READY.
    pub fn request_stop(&mut self) {
        self.armed = false;
        self.auto_start = false;
        self.stop_requested = true;
    }

    /// Stop for good: no restarts, park in ZOMBIE once the process is gone.
    pub fn retire(&mut self) {
        self.request_stop();
        self.restart_on_error = false;
        self.restart_on_exit = false;
        self.retire = true;
    }

    fn enter(&mut self, name: &str, next: WorkerState) {
        debug!(worker = name, from = %self.state, to = %next, "state");
        self.state = next;
    }

    /// Advance as far as possible. Returns `Fatal` only when the process
    /// can no longer be observed.
    pub fn tick<S>(&mut self, name: &str, child: &mut S, registry: &Registry, now: Instant) -> Status
    where
        S: Supervised + ?Sized,
    {
        loop {
            match self.state {
                WorkerState::Config => {
                    if !child.is_configured() {
                        return Status::Retry;
                    }
                    self.enter(name, WorkerState::Ready);
                }

                WorkerState::Ready => {
                    self.stop_requested = false;
                    if self.retire {
                        self.enter(name, WorkerState::Zombie);
                        continue;
                    }
                    if let Some(status) = self.unexpected_exit {
                        let restart = if status == 0 {
                            self.restart_on_exit
                        } else {
                            self.restart_on_error
                        };
                        if !restart {
                            info!(worker = name, status, "not restarting");
                            self.unexpected_exit = None;
                            self.armed = false;
                            self.enter(name, WorkerState::Zombie);
                            continue;
                        }
                    }
                    if !(self.armed || self.auto_start) {
                        return Status::Ready;
                    }
                    self.unexpected_exit = None;
                    self.enter(name, WorkerState::Start);
                }

                WorkerState::Start => {
                    if !self.limiter.allow(now) {
                        warn!(
                            worker = name,
                            limit = self.limiter.count(),
                            period_s = self.limiter.period().as_secs(),
                            "start rate limited"
                        );
                        self.enter(name, WorkerState::Limit);
                        return Status::Ready;
                    }
                    match child.spawn(registry) {
                        Ok(()) => {
                            self.starts += 1;
                            info!(worker = name, starts = self.starts, "started");
                            self.enter(name, WorkerState::Normal);
                            return Status::Ready;
                        }
                        Err(e) => {
                            warn!(worker = name, error = %e, "spawn failed");
                            self.enter(name, WorkerState::Ready);
                            return Status::Retry;
                        }
                    }
                }

                WorkerState::Limit => {
                    if self.stop_requested {
                        self.enter(name, WorkerState::Ready);
                        continue;
                    }
                    if !self.limiter.would_allow(now) {
                        return Status::Ready;
                    }
                    self.enter(name, WorkerState::Start);
                }

                WorkerState::Normal => {
                    if self.stop_requested {
                        child.close_pipes(registry);
                        self.enter(name, WorkerState::Stop);
                        continue;
                    }
                    match child.try_wait() {
                        Ok(None) => return Status::Ready,
                        Ok(Some(status)) => {
                            if status == 0 {
                                info!(worker = name, "exited");
                            } else {
                                warn!(worker = name, status, "exited with error");
                            }
                            child.close_pipes(registry);
                            self.last_status = Some(status);
                            self.unexpected_exit = Some(status);
                            self.enter(name, WorkerState::Ready);
                        }
                        Err(e) => {
                            warn!(worker = name, error = %e, "liveness check failed");
                            return Status::Fatal;
                        }
                    }
                }

                WorkerState::Stop => match child.try_wait() {
                    Ok(None) => return Status::Ready,
                    Ok(Some(status)) => {
                        info!(worker = name, status, "stopped");
                        self.last_status = Some(status);
                        self.enter(name, WorkerState::Ready);
                    }
                    Err(e) => {
                        warn!(worker = name, error = %e, "liveness check failed");
                        return Status::Fatal;
                    }
                },

                WorkerState::Zombie => return Status::Ready,
            }
        }
    }
}
