// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stall watchdog and panic hook.
//!
//! The event loop leaves a [`Breadcrumb`] behind: a heartbeat stamped at
//! the top of every iteration and the step it is currently in. A helper
//! thread samples it and reports an iteration that has not finished within
//! the stall margin, naming the step it is stuck in. The watchdog only
//! reads atomics; it never interrupts the loop.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, warn};

/// Where the loop is within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Step {
    Idle = 0,
    Check,
    Wait,
    Read,
    Process,
    Write,
    Phase,
    Timers,
}

impl Step {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Step::Check,
            2 => Step::Wait,
            3 => Step::Read,
            4 => Step::Process,
            5 => Step::Write,
            6 => Step::Phase,
            7 => Step::Timers,
            _ => Step::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Step::Idle => "idle",
            Step::Check => "check",
            Step::Wait => "wait",
            Step::Read => "read",
            Step::Process => "process",
            Step::Write => "write",
            Step::Phase => "phase",
            Step::Timers => "timers",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loop progress shared with the watchdog thread.
#[derive(Debug)]
pub struct Breadcrumb {
    epoch: Instant,
    beat_ms: AtomicU64,
    iteration: AtomicU64,
    step: AtomicU8,
}

impl Default for Breadcrumb {
    fn default() -> Self {
        Self::new()
    }
}

impl Breadcrumb {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            beat_ms: AtomicU64::new(0),
            iteration: AtomicU64::new(0),
            step: AtomicU8::new(Step::Idle as u8),
        }
    }

    fn millis(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// Stamp the start of an iteration.
    pub fn beat(&self, iteration: u64) {
        self.beat_ms.store(self.millis(Instant::now()), Ordering::Relaxed);
        self.iteration.store(iteration, Ordering::Relaxed);
    }

    pub fn enter(&self, step: Step) {
        self.step.store(step as u8, Ordering::Relaxed);
    }

    pub fn step(&self) -> Step {
        Step::from_u8(self.step.load(Ordering::Relaxed))
    }

    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }
}

/// A stalled iteration, as seen by [`Monitor::sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stall {
    pub iteration: u64,
    pub step: Step,
    pub elapsed: Duration,
}

/// Stall detection without the thread; reports each iteration once.
#[derive(Debug)]
pub struct Monitor {
    margin: Duration,
    reported: Option<u64>,
}

impl Monitor {
    pub fn new(margin: Duration) -> Self {
        Self {
            margin,
            reported: None,
        }
    }

    pub fn sample(&mut self, crumb: &Breadcrumb, now: Instant) -> Option<Stall> {
        let iteration = crumb.iteration();
        if iteration == 0 || crumb.step() == Step::Idle {
            return None;
        }
        let beat = crumb.beat_ms.load(Ordering::Relaxed);
        let elapsed = Duration::from_millis(crumb.millis(now).saturating_sub(beat));
        if elapsed <= self.margin || self.reported == Some(iteration) {
            return None;
        }
        self.reported = Some(iteration);
        Some(Stall {
            iteration,
            step: crumb.step(),
            elapsed,
        })
    }
}

/// Watchdog thread; stopped and joined on drop.
pub struct Watchdog {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn(crumb: Arc<Breadcrumb>, margin: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let tick = (margin / 4).max(Duration::from_millis(10));

        let handle = thread::Builder::new()
            .name("sdrmgr-watchdog".into())
            .spawn(move || {
                let mut monitor = Monitor::new(margin);
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    if let Some(stall) = monitor.sample(&crumb, Instant::now()) {
                        warn!(
                            iteration = stall.iteration,
                            step = %stall.step,
                            elapsed_ms = stall.elapsed.as_millis() as u64,
                            "event loop stalled"
                        );
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Log the panic with a native backtrace and the loop step, then abort.
///
/// No orderly shutdown runs after a panic.
pub fn install_panic_hook(crumb: Arc<Breadcrumb>) {
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::force_capture();
        error!(
            step = %crumb.step(),
            iteration = crumb.iteration(),
            "panic: {info}\n{backtrace}"
        );
        eprintln!("sdrmgrd: {info}\n{backtrace}");
        std::process::abort();
    }));
}
