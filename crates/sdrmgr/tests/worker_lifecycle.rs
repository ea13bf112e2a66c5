// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Static worker lifecycle driven by the event loop.

use sdrmgr::config::{InstanceConfig, LoopConfig};
use sdrmgr::{Daemon, DaemonConfig, WorkerState};

fn daemon(worker: InstanceConfig) -> Daemon {
    let config = DaemonConfig {
        daemon: LoopConfig {
            timeout_min_ms: 1,
            timeout_max_ms: 5,
            stall_margin_ms: 0,
            stats_interval_secs: 0,
            ..LoopConfig::default()
        },
        worker: vec![worker],
        ..DaemonConfig::default()
    };
    Daemon::new(config).expect("daemon")
}

fn run_until(daemon: &mut Daemon, mut done: impl FnMut(&Daemon) -> bool) -> bool {
    for _ in 0..1000 {
        if done(daemon) {
            return true;
        }
        daemon.run_once().expect("iteration");
    }
    done(daemon)
}

fn state(daemon: &Daemon) -> WorkerState {
    daemon.workers().get(0).expect("worker").state()
}

#[test]
fn test_failed_exit_without_restart_parks_in_zombie() {
    let mut d = daemon(
        InstanceConfig::new("process")
            .with("exec", "/bin/sh")
            .with("arg", "-c")
            .with("arg", "exit 3")
            .with("auto_start", true)
            .with("restart_on_error", false),
    );

    assert!(run_until(&mut d, |d| state(d) == WorkerState::Zombie));
    let life = &d.workers().get(0).expect("worker").base().lifecycle;
    assert_eq!(life.last_status(), Some(3));
    assert_eq!(life.starts(), 1);
}

#[test]
fn test_clean_exit_restarts_until_rate_limited() {
    let mut d = daemon(
        InstanceConfig::new("process")
            .with("exec", "/bin/true")
            .with("auto_start", true)
            .with("restart_on_exit", true)
            .with("restart_limit", 2)
            .with("restart_period", 60),
    );

    assert!(run_until(&mut d, |d| state(d) == WorkerState::Limit));
    let life = &d.workers().get(0).expect("worker").base().lifecycle;
    assert_eq!(life.starts(), 2);
    assert_eq!(life.last_status(), Some(0));
}

#[test]
fn test_missing_program_retries_from_ready() {
    let mut d = daemon(
        InstanceConfig::new("process")
            .with("exec", "/nonexistent/sdr-stream")
            .with("auto_start", true),
    );

    for _ in 0..5 {
        d.run_once().expect("iteration");
        assert!(matches!(state(&d), WorkerState::Ready | WorkerState::Start));
    }
    assert_eq!(d.workers().get(0).expect("worker").base().lifecycle.starts(), 0);
}

#[test]
fn test_unconfigured_worker_stays_in_config() {
    let mut d = daemon(InstanceConfig::new("process").with("auto_start", true));
    for _ in 0..3 {
        d.run_once().expect("iteration");
    }
    assert_eq!(state(&d), WorkerState::Config);
}
