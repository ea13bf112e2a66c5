// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Child-process worker.
//!
//! Runs an executable with its stdin and stdout connected to the daemon by
//! non-blocking pipes. Packets written to stdin and read from stdout are
//! raw VITA-49 (or control-tool frames); stderr is inherited so the child
//! logs where the daemon logs.
//!
//! Configuration keys:
//!
//! | key    | meaning                                               |
//! |--------|-------------------------------------------------------|
//! | `exec` | command line, split on whitespace                     |
//! | `arg`  | one more argument, may contain spaces (repeatable)    |
//! | `env`  | `NAME=value` added to the environment (repeatable)    |
//! | `dir`  | working directory                                     |

use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use mio::unix::pipe;
use mio::{Interest, Registry};
use tracing::{debug, trace, warn};

use super::state::Supervised;
use super::{Worker, WorkerBase};
use crate::control::stream::{write_some, FrameReader, ReadEvent};
use crate::control::Status;
use crate::error::{ConfigError, WorkerError};
use crate::poll::{worker_token, FdSet};
use crate::route::{Msg, Route, WorkerId};

const STDIN_SLOT: u32 = 0;
const STDOUT_SLOT: u32 = 1;

/// The managed process and its pipes.
struct Process {
    id: WorkerId,
    max_packet: usize,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    dir: Option<PathBuf>,
    child: Option<Child>,
    stdin: Option<pipe::Sender>,
    stdout: Option<pipe::Receiver>,
    reader: FrameReader<Route>,
    pending: Option<(Msg, usize)>,
}

impl Process {
    fn new(id: WorkerId, max_packet: usize) -> Self {
        Self {
            id,
            max_packet,
            argv: Vec::new(),
            env: Vec::new(),
            dir: None,
            child: None,
            stdin: None,
            stdout: None,
            reader: FrameReader::new(max_packet),
            pending: None,
        }
    }

    fn close_stdin(&mut self, registry: &Registry) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = registry.deregister(&mut stdin);
        }
        self.pending = None;
    }

    fn close_stdout(&mut self, registry: &Registry) {
        if let Some(mut stdout) = self.stdout.take() {
            let _ = registry.deregister(&mut stdout);
        }
        self.reader = FrameReader::new(self.max_packet);
    }

    fn open_pipes(&mut self, child: &mut Child, registry: &Registry) -> io::Result<()> {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(io::Error::other("child pipes missing"));
        };
        let mut stdin = pipe::Sender::from(stdin);
        let mut stdout = pipe::Receiver::from(stdout);
        stdin.set_nonblocking(true)?;
        stdout.set_nonblocking(true)?;
        registry.register(&mut stdin, worker_token(self.id, STDIN_SLOT), Interest::WRITABLE)?;
        if let Err(e) =
            registry.register(&mut stdout, worker_token(self.id, STDOUT_SLOT), Interest::READABLE)
        {
            let _ = registry.deregister(&mut stdin);
            return Err(e);
        }
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.reader = FrameReader::new(self.max_packet);
        Ok(())
    }
}

impl Supervised for Process {
    fn is_configured(&self) -> bool {
        !self.argv.is_empty()
    }

    fn spawn(&mut self, registry: &Registry) -> Result<(), WorkerError> {
        let mut command = {
            let (program, args) = self.argv.split_first().ok_or(WorkerError::NotConfigured)?;
            let mut command = Command::new(program);
            command.args(args);
            command
        };
        command
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(WorkerError::Spawn)?;
        if let Err(e) = self.open_pipes(&mut child, registry) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(WorkerError::Io(e));
        }
        debug!(worker = %self.id, pid = child.id(), argv = ?self.argv, "spawned");
        self.child = Some(child);
        Ok(())
    }

    fn try_wait(&mut self) -> Result<Option<i32>, WorkerError> {
        let Some(child) = self.child.as_mut() else {
            return Ok(Some(0));
        };
        let Some(status) = child.try_wait()? else {
            return Ok(None);
        };
        self.child = None;
        let code = status
            .code()
            .unwrap_or_else(|| -status.signal().unwrap_or(0));
        Ok(Some(code))
    }

    fn close_pipes(&mut self, registry: &Registry) {
        self.close_stdin(registry);
        self.close_stdout(registry);
    }
}

pub struct ProcessWorker {
    base: WorkerBase,
    process: Process,
}

impl ProcessWorker {
    pub fn new(id: WorkerId, name: &str, max_packet: usize) -> Self {
        Self {
            base: WorkerBase::new(id, name, max_packet),
            process: Process::new(id, max_packet),
        }
    }

    /// Program and arguments.
    pub fn argv(&self) -> &[String] {
        &self.process.argv
    }
}

impl Worker for ProcessWorker {
    fn base(&self) -> &WorkerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WorkerBase {
        &mut self.base
    }

    fn class(&self) -> &'static str {
        "process"
    }

    fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "exec" => {
                let argv: Vec<String> = value.split_whitespace().map(String::from).collect();
                if argv.is_empty() {
                    return Err(ConfigError::bad_value(key, value));
                }
                self.process.argv = argv;
            }
            "arg" => self.process.argv.push(value.to_string()),
            "env" => {
                let (name, val) = value
                    .split_once('=')
                    .filter(|(name, _)| !name.is_empty())
                    .ok_or_else(|| ConfigError::bad_value(key, value))?;
                self.process.env.push((name.to_string(), val.to_string()));
            }
            "dir" => self.process.dir = Some(PathBuf::from(value)),
            _ => return self.base.configure(key, value),
        }
        Ok(())
    }

    fn liveness(&mut self, registry: &Registry, now: Instant) -> Status {
        self.base
            .lifecycle
            .tick(&self.base.name, &mut self.process, registry, now)
    }

    fn fd_set(&self, set: &mut FdSet) {
        if let Some(stdout) = &self.process.stdout {
            set.set_read(worker_token(self.base.id, STDOUT_SLOT), stdout.as_raw_fd());
        }
        if let Some(stdin) = &self.process.stdin {
            if self.process.pending.is_some() || !self.base.tx.is_empty() {
                set.set_write(worker_token(self.base.id, STDIN_SLOT), stdin.as_raw_fd());
            }
        }
    }

    fn fd_isset(&self, set: &FdSet) -> usize {
        usize::from(set.is_readable(worker_token(self.base.id, STDOUT_SLOT)))
            + usize::from(set.is_writable(worker_token(self.base.id, STDIN_SLOT)))
    }

    fn read(&mut self, set: &mut FdSet) {
        let token = worker_token(self.base.id, STDOUT_SLOT);
        if !set.is_readable(token) {
            return;
        }
        let route = Route {
            worker: Some(self.base.id),
            ..Route::default()
        };

        while !self.base.rx.is_full() {
            let Some(stdout) = self.process.stdout.as_mut() else {
                return;
            };
            let before = self.process.reader.dropped();
            let event = self.process.reader.read_frame(stdout, || route);
            self.base.stats.dropped += self.process.reader.dropped() - before;
            match event {
                Ok(ReadEvent::Frame(msg)) => {
                    trace!(worker = %self.base.name, len = msg.len(), "rx");
                    self.base.stats.record_rx(msg.len());
                    if let Err(e) = self.base.rx.enqueue(msg) {
                        debug!(worker = %self.base.name, error = %e, "rx queue refused message");
                        self.base.stats.record_drop();
                    }
                }
                Ok(ReadEvent::WouldBlock) => {
                    set.clear_readable(token);
                    return;
                }
                Ok(ReadEvent::Closed) => {
                    debug!(worker = %self.base.name, "stdout closed");
                    self.process.close_stdout(set.registry());
                    set.forget(token);
                    return;
                }
                Err(e) => {
                    warn!(worker = %self.base.name, error = %e, "stdout read failed");
                    self.process.close_stdout(set.registry());
                    set.forget(token);
                    return;
                }
            }
        }
    }

    fn write(&mut self, set: &mut FdSet) {
        let token = worker_token(self.base.id, STDIN_SLOT);
        if !set.is_writable(token) {
            return;
        }
        let Some(stdin) = self.process.stdin.as_mut() else {
            return;
        };
        let (msg, offset) = match self.process.pending.take() {
            Some(pending) => pending,
            None => match self.base.tx.dequeue() {
                Some(msg) => (msg, 0),
                None => return,
            },
        };

        match write_some(stdin, &msg.payload()[offset..]) {
            Ok((n, false)) => {
                trace!(worker = %self.base.name, len = offset + n, "tx");
                self.base.stats.record_tx(offset + n);
            }
            Ok((n, true)) => {
                set.clear_writable(token);
                self.process.pending = Some((msg, offset + n));
            }
            Err(e) => {
                warn!(worker = %self.base.name, error = %e, "stdin write failed");
                self.base.stats.record_drop();
                self.process.close_stdin(set.registry());
                set.forget(token);
            }
        }
    }

    fn pid(&self) -> Option<u32> {
        self.process.child.as_ref().map(Child::id)
    }

    fn close(&mut self, registry: &Registry) {
        self.process.close_pipes(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mbuf::Mbuf;
    use crate::worker::WorkerState;
    use std::time::Duration;

    fn packet(words: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(0x6800_0000u32 | u32::from(words)).to_be_bytes());
        out.resize(usize::from(words) * 4, 0x5a);
        out
    }

    fn step(worker: &mut ProcessWorker, set: &mut FdSet) {
        worker.liveness(set.registry(), Instant::now());
        set.clear();
        worker.fd_set(set);
        set.wait(Duration::from_millis(20)).expect("wait");
        worker.read(set);
        worker.write(set);
    }

    #[test]
    fn test_configure_keys() {
        let mut worker = ProcessWorker::new(WorkerId(1), "w", 1024);
        worker.configure("exec", "/bin/sh -c").expect("exec");
        worker.configure("arg", "exit 3").expect("arg");
        worker.configure("env", "SDR_MODE=rx").expect("env");
        assert_eq!(worker.argv(), &["/bin/sh", "-c", "exit 3"]);
        assert!(worker.configure("env", "=x").is_err());
        assert!(worker.configure("exec", "  ").is_err());
        assert!(worker.configure("restart_on_exit", "yes").is_ok());
    }

    #[test]
    fn test_unconfigured_stays_in_config() {
        let set = FdSet::new().expect("poll");
        let mut worker = ProcessWorker::new(WorkerId(1), "w", 1024);
        worker.base_mut().lifecycle.auto_start = true;
        assert_eq!(worker.liveness(set.registry(), Instant::now()), Status::Retry);
        assert_eq!(worker.state(), WorkerState::Config);
    }

    #[test]
    fn test_cat_echoes_packets() {
        let mut set = FdSet::new().expect("poll");
        let mut worker = ProcessWorker::new(WorkerId(3), "echo", 1024);
        worker.configure("exec", "/bin/cat").expect("exec");
        worker.request_start();
        worker.liveness(set.registry(), Instant::now());
        assert_eq!(worker.state(), WorkerState::Normal);
        assert!(worker.pid().is_some());

        let sent = packet(6);
        worker.enqueue(Mbuf::from_bytes(&sent)).expect("queue");
        let mut echoed = None;
        for _ in 0..100 {
            step(&mut worker, &mut set);
            if let Some(msg) = worker.dequeue() {
                echoed = Some(msg);
                break;
            }
        }
        let echoed = echoed.expect("cat echoed the packet");
        assert_eq!(echoed.payload(), &sent[..]);
        assert_eq!(echoed.user().worker, Some(WorkerId(3)));

        worker.request_stop();
        for _ in 0..100 {
            step(&mut worker, &mut set);
            if worker.state() == WorkerState::Ready {
                break;
            }
        }
        assert_eq!(worker.state(), WorkerState::Ready);
        assert_eq!(worker.base().lifecycle.last_status(), Some(0));
        assert!(worker.pid().is_none());
    }

    #[test]
    fn test_missing_program_returns_to_ready() {
        let set = FdSet::new().expect("poll");
        let mut worker = ProcessWorker::new(WorkerId(4), "ghost", 1024);
        worker
            .configure("exec", "/nonexistent/sdr-stream")
            .expect("exec");
        worker.request_start();
        assert_eq!(worker.liveness(set.registry(), Instant::now()), Status::Retry);
        assert_eq!(worker.state(), WorkerState::Ready);
        assert_eq!(worker.base().lifecycle.starts(), 0);
    }
}
