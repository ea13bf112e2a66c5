// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon event loop.
//!
//! One [`Daemon`] value owns every control, worker, timer and the resource
//! manager. [`Daemon::run_once`] is a single iteration:
//!
//! ```text
//!  1. check controls / worker liveness, declare interest (fd_set)
//!  2. size the wait from the timer list, clamped to [min, max]
//!  3. wait for readiness
//!  4. read: controls -> rx queues, worker stdout -> rx queues
//!  5. process, dispatch southbound and northbound, process again
//!  6. write: tx queues -> peers and worker stdin
//!  7. advance the shutdown phase, reap released workers
//!  8. service due timers
//! ```
//!
//! Shutdown is cooperative:
//!
//! ```text
//!  RUNNING --stop flag--> STOPPING --stop all workers--> WAITING --all idle--> STOPPED
//! ```

pub mod watchdog;

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, trace, warn};

use crate::config::{DaemonConfig, LoopConfig};
use crate::control::{self, Control, Status};
use crate::ctltool::{self, CtlCommand};
use crate::error::{ConfigError, DaemonError};
use crate::list::GrowList;
use crate::manager::{find_sid, Manager, Workers};
use crate::poll::FdSet;
use crate::resource::ResourceList;
use crate::route::{ControlId, Msg, Route};
use crate::timer::TimerList;
use crate::vita49::{self, Kind, Packet};
use crate::worker::{self, WorkerState};

use watchdog::{Breadcrumb, Step, Watchdog};

/// Main loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    /// Stop requested; workers are told to stop on the next iteration.
    Stopping,
    /// Waiting for every worker to go idle.
    Waiting,
    Stopped,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Running => "RUNNING",
            Phase::Stopping => "STOPPING",
            Phase::Waiting => "WAITING",
            Phase::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Stats,
}

pub struct Daemon {
    config: LoopConfig,
    phase: Phase,
    set: FdSet,
    controls: GrowList<Box<dyn Control>>,
    workers: Workers,
    manager: Manager,
    timers: TimerList<Event>,
    stop: Arc<AtomicBool>,
    crumb: Arc<Breadcrumb>,
    watchdog: Option<Watchdog>,
    started: Instant,
    iterations: u64,
}

impl Daemon {
    /// Build every instance named by `config`. Nothing is opened until the
    /// first iteration.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        config.validate()?;
        let max_packet = config.daemon.max_packet;

        let resources = match &config.manager.resources {
            Some(path) => ResourceList::load(path)?,
            None => ResourceList::new(),
        };
        info!(count = resources.len(), "resources loaded");

        let mut controls = GrowList::with_capacity(config.control.len());
        for (i, instance) in config.control.iter().enumerate() {
            let name = config.control_name(i);
            let control = control::registry::build(instance, ControlId(i as u32), &name, max_packet)?;
            debug!(control = %name, class = control.class(), "control created");
            controls.push(control);
        }

        let mut manager = Manager::new(config.manager.clone(), resources, max_packet);
        let mut workers = Workers::with_capacity(config.worker.len());
        for (i, instance) in config.worker.iter().enumerate() {
            let name = config.worker_name(i);
            let id = manager
                .next_worker_id(&workers)
                .ok_or_else(|| ConfigError::Invalid("too many workers".into()))?;
            let worker = worker::registry::build(instance, id, &name, max_packet)?;
            debug!(worker = %name, class = worker.class(), "static worker created");
            workers.push(worker);
        }

        let now = Instant::now();
        let mut timers = TimerList::new();
        if let Some(period) = config.daemon.stats_interval() {
            timers.add_periodic(now, period, Event::Stats);
        }

        let crumb = Arc::new(Breadcrumb::new());
        let watchdog = match config.daemon.stall_margin() {
            Some(margin) => Some(Watchdog::spawn(Arc::clone(&crumb), margin)?),
            None => None,
        };

        Ok(Self {
            config: config.daemon,
            phase: Phase::Running,
            set: FdSet::new()?,
            controls,
            workers,
            manager,
            timers,
            stop: Arc::new(AtomicBool::new(false)),
            crumb,
            watchdog,
            started: now,
            iterations: 0,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn controls(&self) -> &GrowList<Box<dyn Control>> {
        &self.controls
    }

    pub fn workers(&self) -> &Workers {
        &self.workers
    }

    pub fn manager(&self) -> &Manager {
        &self.manager
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Flag a signal handler sets to request shutdown.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Loop progress, for the panic hook.
    pub fn breadcrumb(&self) -> Arc<Breadcrumb> {
        Arc::clone(&self.crumb)
    }

    /// Iterate until the phase reaches STOPPED.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        info!(
            controls = self.controls.len(),
            workers = self.workers.len(),
            resources = self.manager.resources().len(),
            "daemon running"
        );
        while self.phase != Phase::Stopped {
            self.run_once()?;
        }
        info!(iterations = self.iterations, "daemon stopped");
        Ok(())
    }

    /// One loop iteration.
    pub fn run_once(&mut self) -> Result<(), DaemonError> {
        if self.phase == Phase::Stopped {
            return Ok(());
        }
        self.iterations += 1;
        self.crumb.beat(self.iterations);
        let now = Instant::now();

        self.crumb.enter(Step::Check);
        self.check(now);

        self.crumb.enter(Step::Wait);
        let timeout = self
            .timers
            .timeout(now, self.config.timeout_min(), self.config.timeout_max());
        match self.set.wait(timeout) {
            Ok(ready) => trace!(ready, ?timeout, "wait"),
            Err(e) => {
                error!(error = %e, "poll failed");
                self.phase = Phase::Stopped;
                self.crumb.enter(Step::Idle);
                return Err(DaemonError::Poll(e));
            }
        }

        self.crumb.enter(Step::Read);
        self.read();

        self.crumb.enter(Step::Process);
        self.process();
        self.dispatch_southbound();
        self.dispatch_northbound();
        self.process();

        self.crumb.enter(Step::Write);
        self.write();

        self.crumb.enter(Step::Phase);
        self.advance_phase();

        self.crumb.enter(Step::Timers);
        for event in self.timers.expire(Instant::now(), self.config.timer_limit) {
            match event {
                Event::Stats => self.log_stats(),
            }
        }

        self.crumb.enter(Step::Idle);
        Ok(())
    }

    // ========================================================================
    // Loop steps
    // ========================================================================

    fn check(&mut self, now: Instant) {
        self.set.clear();
        let mut fatal = false;

        for control in self.controls.iter_mut() {
            if control.check(self.set.registry(), now) == Status::Fatal {
                fatal = true;
            }
            control.fd_set(&mut self.set);
        }
        for worker in self.workers.iter_mut() {
            if worker.liveness(self.set.registry(), now) == Status::Fatal {
                fatal = true;
            }
            worker.fd_set(&mut self.set);
        }

        if fatal && self.phase == Phase::Running {
            error!("unrecoverable instance, shutting down");
            self.phase = Phase::Stopping;
        }
    }

    fn read(&mut self) {
        for control in self.controls.iter_mut() {
            if control.fd_isset(&self.set) == 0 {
                continue;
            }
            if let Some(msg) = control.read(&mut self.set) {
                let base = control.base_mut();
                if let Err(e) = base.rx.enqueue(msg) {
                    debug!(control = %base.name, reason = ?e.reason, "receive queue full");
                    base.stats.record_drop();
                }
            }
        }
        for worker in self.workers.iter_mut() {
            if worker.fd_isset(&self.set) > 0 {
                worker.read(&mut self.set);
            }
        }
    }

    fn process(&mut self) {
        for control in self.controls.iter_mut() {
            control.process();
        }
        for worker in self.workers.iter_mut() {
            worker.process();
        }
    }

    fn write(&mut self) {
        for control in self.controls.iter_mut() {
            if control.fd_isset(&self.set) > 0 {
                control.write(&mut self.set);
            }
        }
        for worker in self.workers.iter_mut() {
            if worker.fd_isset(&self.set) > 0 {
                worker.write(&mut self.set);
            }
        }
    }

    fn advance_phase(&mut self) {
        match self.phase {
            Phase::Running => {
                if self.stop.load(Ordering::SeqCst) {
                    info!("stop requested");
                    self.phase = Phase::Stopping;
                } else {
                    self.reap();
                }
            }
            Phase::Stopping => {
                for worker in self.workers.iter_mut() {
                    let life = &mut worker.base_mut().lifecycle;
                    life.restart_on_error = false;
                    life.restart_on_exit = false;
                    worker.request_stop();
                }
                info!(workers = self.workers.len(), "stopping workers");
                self.phase = Phase::Waiting;
            }
            Phase::Waiting => {
                if self.workers.iter().all(|w| w.state().is_idle()) {
                    info!("all workers idle");
                    self.phase = Phase::Stopped;
                }
            }
            Phase::Stopped => {}
        }
    }

    /// Free released workers once their process is gone.
    fn reap(&mut self) {
        let mut i = 0;
        while i < self.workers.len() {
            let done = self
                .workers
                .get(i)
                .is_some_and(|w| w.base().reap && w.state() == WorkerState::Zombie);
            if !done {
                i += 1;
                continue;
            }
            if let Some(mut worker) = self.workers.remove(i) {
                worker.close(self.set.registry());
                self.set.forget_worker(worker.id());
                info!(worker = worker.name(), sid = ?worker.base().sid, "worker freed");
            }
        }
    }

    fn log_stats(&self) {
        for control in self.controls.iter() {
            info!(
                control = control.name(),
                peers = control.peers(),
                stats = %control.base().stats,
                "control stats"
            );
        }
        for worker in self.workers.iter() {
            info!(
                worker = worker.name(),
                state = %worker.state(),
                stats = %worker.base().stats,
                "worker stats"
            );
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    fn dispatch_southbound(&mut self) {
        for index in 0..self.controls.len() {
            while let Some(msg) = self.controls.get_mut(index).and_then(|c| c.dequeue()) {
                self.southbound(index, msg);
            }
        }
    }

    /// Route one message received by control `index`.
    fn southbound(&mut self, index: usize, mut msg: Msg) {
        let route = *msg.user();
        let mut pkt = Packet::default();
        match vita49::parse(&mut pkt, &mut msg) {
            Ok(Kind::Control) => self.control_tool(index, msg),
            Ok(Kind::Command) if Manager::is_management(&pkt.command) => {
                if let Some(reply) = self.manager.handle(&pkt, route, &mut self.workers) {
                    self.reply(index, reply);
                }
            }
            Ok(_) => self.forward(index, pkt.header.stream_id, msg),
            Err(e) => {
                warn!(
                    %route,
                    code = e.code(),
                    error = %e,
                    "dropping malformed packet\n{}",
                    msg.hex_dump()
                );
                if let Some(control) = self.controls.get_mut(index) {
                    control.base_mut().stats.record_drop();
                }
            }
        }
    }

    fn reply(&mut self, index: usize, reply: Msg) {
        let Some(control) = self.controls.get_mut(index) else {
            return;
        };
        if let Err(e) = control.enqueue(reply) {
            warn!(control = control.name(), reason = ?e.reason, "reply dropped");
            control.base_mut().stats.record_drop();
        }
    }

    /// Hand a stream packet to the worker serving `sid`, unchanged.
    fn forward(&mut self, index: usize, sid: u32, mut msg: Msg) {
        let Some(worker) = find_sid(&self.workers, sid).and_then(|i| self.workers.get_mut(i)) else {
            debug!(sid, route = %msg.user(), "no worker for stream");
            if let Some(control) = self.controls.get_mut(index) {
                control.base_mut().stats.record_drop();
            }
            return;
        };
        msg.rewind();
        msg.user_mut().worker = Some(worker.id());
        if let Err(e) = worker.enqueue(msg) {
            debug!(worker = worker.name(), reason = ?e.reason, "worker queue full");
            worker.base_mut().stats.record_drop();
        }
    }

    fn dispatch_northbound(&mut self) {
        for index in 0..self.workers.len() {
            loop {
                let Some(worker) = self.workers.get_mut(index) else {
                    break;
                };
                let Some(msg) = worker.dequeue() else {
                    break;
                };
                let owner = worker.base().owner;
                if !self.northbound(owner, msg) {
                    if let Some(worker) = self.workers.get_mut(index) {
                        worker.base_mut().stats.record_drop();
                    }
                }
            }
        }
    }

    /// Deliver worker output to its owner, or to every peer of every control
    /// for a static worker. Returns false when nothing was delivered.
    fn northbound(&mut self, owner: Option<Route>, mut msg: Msg) -> bool {
        msg.rewind();
        let worker = msg.user().worker;

        let Some(owner) = owner else {
            let mut delivered = false;
            for control in self.controls.iter_mut() {
                if control.peers() == 0 {
                    continue;
                }
                let mut copy = msg.clone();
                copy.set_user(Route {
                    control: Some(control.id()),
                    slot: None,
                    worker,
                });
                delivered |= control.enqueue(copy).is_ok();
            }
            return delivered;
        };

        let Some(control) = self.controls.find_mut(|c| Some(c.id()) == owner.control) else {
            return false;
        };
        if !control.has_peer(owner.slot) {
            debug!(control = control.name(), route = %owner, "owner gone, dropping output");
            return false;
        }
        msg.set_user(Route { worker, ..owner });
        match control.enqueue(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(control = control.name(), reason = ?e.reason, "send queue full");
                false
            }
        }
    }

    // ========================================================================
    // Control tool
    // ========================================================================

    fn control_tool(&mut self, index: usize, mut msg: Msg) {
        let route = *msg.user();
        let text = match ctltool::read_text(&mut msg) {
            Ok(line) => match line.parse::<CtlCommand>() {
                Ok(cmd) => {
                    info!(%route, command = %cmd, "control tool");
                    self.run_command(cmd)
                }
                Err(e) => format!("error: {e}\n"),
            },
            Err(e) => {
                warn!(%route, error = %e, "bad control-tool frame");
                format!("error: {e}\n")
            }
        };

        let mut reply = match Msg::try_alloc_with(ctltool::MAX_FRAME, route) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "no buffer for control-tool reply");
                return;
            }
        };
        let text = ctltool::fit_reply(&text);
        let framed = ctltool::begin_reply(&mut reply).and_then(|start| {
            reply.append_fmt(format_args!("{text}"));
            ctltool::finish_reply(&mut reply, start)
        });
        match framed {
            Ok(()) => {
                reply.rewind();
                self.reply(index, reply);
            }
            Err(e) => warn!(error = %e, "cannot frame control-tool reply"),
        }
    }

    fn run_command(&mut self, cmd: CtlCommand) -> String {
        let mut out = String::new();
        match cmd {
            CtlCommand::Status => {
                let _ = writeln!(out, "phase {}", self.phase);
                let _ = writeln!(out, "uptime {}s", self.started.elapsed().as_secs());
                let _ = writeln!(out, "iterations {}", self.iterations);
                let _ = writeln!(out, "resources {}", self.manager.resources().len());
                let _ = writeln!(out, "workers {}", self.workers.len());
                for control in self.controls.iter() {
                    let _ = writeln!(
                        out,
                        "control {} {} peers {} {}",
                        control.name(),
                        control.class(),
                        control.peers(),
                        control.base().stats
                    );
                }
            }
            CtlCommand::Workers => {
                let _ = writeln!(out, "{:<4} {:<16} {:<6} {:<7} {:<8} {:<8} STATS", "ID", "NAME", "SID", "STATE", "PID", "OWNER");
                for worker in self.workers.iter() {
                    let base = worker.base();
                    let sid = base.sid.map_or_else(|| "-".to_string(), |s| s.to_string());
                    let pid = worker.pid().map_or_else(|| "-".to_string(), |p| p.to_string());
                    let owner = base.owner.map_or_else(|| "static".to_string(), |o| o.to_string());
                    let _ = writeln!(
                        out,
                        "{:<4} {:<16} {:<6} {:<7} {:<8} {:<8} {}",
                        base.id.0,
                        base.name,
                        sid,
                        worker.state().as_str(),
                        pid,
                        owner,
                        base.stats
                    );
                }
            }
            CtlCommand::Resources => {
                for r in self.manager.resources().iter() {
                    let _ = writeln!(
                        out,
                        "{} {:<16} tx {} rx {} rate {} freq {}..{}",
                        r.uuid, r.name, r.tx_chans, r.rx_chans, r.max_sample_rate, r.min_freq, r.max_freq
                    );
                }
            }
            CtlCommand::Start(sid) => {
                let result = self.manager.start(sid, &mut self.workers);
                let _ = writeln!(out, "start {sid}: {result:?}");
            }
            CtlCommand::Stop(sid) => {
                let result = self.manager.stop(sid, &mut self.workers);
                let _ = writeln!(out, "stop {sid}: {result:?}");
            }
            CtlCommand::Reap => {
                let mut marked = 0;
                for worker in self.workers.iter_mut() {
                    if worker.state() == WorkerState::Zombie && !worker.base().reap {
                        worker.base_mut().reap = true;
                        marked += 1;
                    }
                }
                let _ = writeln!(out, "reaping {marked}");
            }
            CtlCommand::Help => out.push_str(ctltool::HELP),
        }
        out
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        for control in self.controls.iter_mut() {
            control.close(self.set.registry());
        }
        for worker in self.workers.iter_mut() {
            worker.close(self.set.registry());
        }
        drop(self.watchdog.take());
        debug!("daemon torn down");
    }
}
