// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end tests over the unix control.
//!
//! Each test builds its own daemon on a socket in a temporary directory and
//! drives it one iteration at a time from the test thread, acting as the
//! client on a non-blocking `std` socket in between.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use sdrmgr::config::{InstanceConfig, LoopConfig, ManagerConfig};
use sdrmgr::ctltool;
use sdrmgr::vita49::command::indicator;
use sdrmgr::vita49::context::indicator as ctx;
use sdrmgr::vita49::{self, Command, Context, Kind, Packet, Request, ResultCode, Role};
use sdrmgr::{Daemon, DaemonConfig, Mbuf, Phase, WorkerState};
use tempfile::TempDir;
use uuid::Uuid;

const RX0: &str = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a01";
const TX0: &str = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a02";

const RESOURCES: &str = r#"
[[resource]]
uuid = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a01"
name = "rx0"
rx_chans = 2

[[resource]]
uuid = "4b1f6c0e-2f7e-4a53-9d55-0f8e1c1e0a02"
name = "tx0"
tx_chans = 1
"#;

/// `sh -c cat` ignores the `--sid`/`--rid` arguments appended per stream.
const ECHO: &str = "/bin/sh -c cat";

const MAX_ITERATIONS: usize = 300;

struct Harness {
    daemon: Daemon,
    socket: PathBuf,
    _dir: TempDir,
}

impl Harness {
    fn new(exec: &str, workers: Vec<InstanceConfig>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let resources = dir.path().join("resources.toml");
        std::fs::write(&resources, RESOURCES).expect("write resources");
        let socket = dir.path().join("sdrmgr.sock");

        let config = DaemonConfig {
            daemon: LoopConfig {
                timeout_min_ms: 1,
                timeout_max_ms: 10,
                stall_margin_ms: 0,
                stats_interval_secs: 0,
                ..LoopConfig::default()
            },
            manager: ManagerConfig {
                resources: Some(resources),
                exec: exec.to_string(),
                ..ManagerConfig::default()
            },
            control: vec![InstanceConfig {
                name: Some("local".into()),
                ..InstanceConfig::new("unix")
            }
            .with("path", socket.to_str().expect("utf-8 path"))],
            worker: workers,
        };

        let mut daemon = Daemon::new(config).expect("daemon");
        for _ in 0..10 {
            if socket.exists() {
                break;
            }
            daemon.run_once().expect("iteration");
        }
        assert!(socket.exists(), "control did not open its socket");

        Self {
            daemon,
            socket,
            _dir: dir,
        }
    }

    fn connect(&mut self) -> UnixStream {
        let client = UnixStream::connect(&self.socket).expect("connect");
        client.set_nonblocking(true).expect("nonblocking");
        self.daemon.run_once().expect("accept");
        client
    }

    fn run_until(&mut self, mut done: impl FnMut(&Daemon) -> bool) -> bool {
        for _ in 0..MAX_ITERATIONS {
            if done(&self.daemon) {
                return true;
            }
            self.daemon.run_once().expect("iteration");
        }
        done(&self.daemon)
    }

    /// Iterate until one whole packet or control-tool frame arrives.
    fn receive(&mut self, client: &mut UnixStream) -> Vec<u8> {
        let mut buf = Vec::new();
        for _ in 0..MAX_ITERATIONS {
            self.daemon.run_once().expect("iteration");
            let mut chunk = [0u8; 4096];
            match client.read(&mut chunk) {
                Ok(0) => panic!("daemon closed the connection"),
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("read failed: {e}"),
            }
            if let Some(len) = frame_len(&buf) {
                if buf.len() >= len {
                    assert_eq!(buf.len(), len, "more than one frame arrived");
                    return buf;
                }
            }
        }
        panic!("no reply after {MAX_ITERATIONS} iterations");
    }

    /// Nothing arrives within a few iterations.
    fn silent(&mut self, client: &mut UnixStream) -> bool {
        for _ in 0..20 {
            self.daemon.run_once().expect("iteration");
            let mut chunk = [0u8; 64];
            match client.read(&mut chunk) {
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                _ => return false,
            }
        }
        true
    }

    fn request(&mut self, client: &mut UnixStream, sid: u32, command: Command) -> Command {
        send(client, &encode(&mut Packet::command(sid, command)));
        let reply = decode(&self.receive(client));
        assert_eq!(reply.command.role, Role::Result);
        reply.command
    }

    fn state_of(&self, sid: u32) -> Option<WorkerState> {
        self.daemon
            .workers()
            .find(|w| w.base().sid == Some(sid))
            .map(|w| w.state())
    }
}

fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 8 {
        return None;
    }
    let word0 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if word0 == ctltool::MAGIC {
        return Some(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize);
    }
    Some((word0 & 0xFFFF) as usize * 4)
}

fn uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("uuid")
}

fn encode(pkt: &mut Packet) -> Vec<u8> {
    let mut m: Mbuf = Mbuf::alloc(4096);
    vita49::format(pkt, &mut m).expect("format");
    m.payload().to_vec()
}

fn decode(bytes: &[u8]) -> Packet {
    let mut m: Mbuf = Mbuf::from_bytes(bytes);
    let mut pkt = Packet::default();
    assert_eq!(vita49::parse(&mut pkt, &mut m).expect("parse"), Kind::Command);
    pkt
}

fn send(client: &mut UnixStream, bytes: &[u8]) {
    client.write_all(bytes).expect("send");
}

fn access(rid: &str) -> Command {
    Command::request(Request::Access).with_rids(vec![uuid(rid)])
}

#[test]
fn test_access_allocates_ready_worker() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let reply = h.request(&mut client, 0, access(RX0));
    assert_eq!(reply.result, ResultCode::Success);
    assert!(reply.has(indicator::SID_ASSIGN));
    let sid = reply.sid_assign;
    assert_eq!(h.daemon.workers().len(), 1);

    // Allocated and configured, but not started.
    for _ in 0..5 {
        h.daemon.run_once().expect("iteration");
    }
    assert_eq!(h.state_of(sid), Some(WorkerState::Ready));
}

#[test]
fn test_access_replay_returns_same_sid() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let first = h.request(&mut client, 0, access(RX0));
    let again = h.request(&mut client, 0, access(RX0));
    assert_eq!(again.result, ResultCode::Success);
    assert_eq!(again.sid_assign, first.sid_assign);
    assert_eq!(h.daemon.workers().len(), 1);

    // Another connection is another client.
    let mut other = h.connect();
    let second = h.request(&mut other, 0, access(RX0));
    assert_ne!(second.sid_assign, first.sid_assign);
    assert_eq!(h.daemon.workers().len(), 2);
}

#[test]
fn test_discover_and_errors() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let client_id = Uuid::new_v4();
    let all = h.request(
        &mut client,
        0,
        Command::request(Request::Discover).with_client_id(client_id),
    );
    assert_eq!(all.result, ResultCode::Success);
    assert_eq!(all.resources.len(), 2);
    assert_eq!(all.client_id, client_id);

    let unknown = h.request(&mut client, 0, access("00000000-0000-0000-0000-00000000beef"));
    assert_eq!(unknown.result, ResultCode::NoResource);

    // tx0 has one channel.
    let taken = h.request(&mut client, 0, access(TX0));
    assert_eq!(taken.result, ResultCode::Success);
    let mut other = h.connect();
    let busy = h.request(&mut other, 0, access(TX0));
    assert_eq!(busy.result, ResultCode::Busy);
}

#[test]
fn test_stream_round_trip() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let sid = h.request(&mut client, 0, access(RX0)).sid_assign;
    let started = h.request(&mut client, sid, Command::request(Request::Start));
    assert_eq!(started.result, ResultCode::Success);
    assert!(h.run_until(|d| {
        d.workers().find(|w| w.base().sid == Some(sid)).map(|w| w.state())
            == Some(WorkerState::Normal)
    }));

    let context = Context {
        indicator: ctx::SAMPLE_RATE,
        sample_rate: 500_000.0,
        ..Context::default()
    };
    let bytes = encode(&mut Packet::context(sid, context));
    send(&mut client, &bytes);

    // The worker echoes the packet; it comes back to its owner unchanged.
    let echoed = h.receive(&mut client);
    assert_eq!(echoed, bytes);

    let stopped = h.request(&mut client, sid, Command::request(Request::Stop));
    assert_eq!(stopped.result, ResultCode::Success);
    assert!(h.run_until(|d| {
        d.workers().find(|w| w.base().sid == Some(sid)).map(|w| w.state())
            == Some(WorkerState::Ready)
    }));
}

#[test]
fn test_release_frees_worker() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let sid = h.request(&mut client, 0, access(RX0)).sid_assign;
    let released = h.request(&mut client, sid, Command::request(Request::Release));
    assert_eq!(released.result, ResultCode::Success);
    assert!(h.run_until(|d| d.workers().is_empty()));

    let again = h.request(&mut client, sid, Command::request(Request::Release));
    assert_eq!(again.result, ResultCode::Invalid);
}

#[test]
fn test_malformed_packet_keeps_link() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let mut bad = encode(&mut Packet::command(0, Command::request(Request::Discover)));
    bad[8..12].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    send(&mut client, &bad);
    assert!(h.silent(&mut client));

    let reply = h.request(&mut client, 0, Command::request(Request::Discover));
    assert_eq!(reply.result, ResultCode::Success);
    let local = h.daemon.controls().get(0).expect("control");
    assert_eq!(local.base().stats.dropped, 1);
}

#[test]
fn test_unknown_stream_dropped() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    send(&mut client, &encode(&mut Packet::context(999, Context::default())));
    assert!(h.silent(&mut client));
    assert!(h.daemon.workers().is_empty());
}

#[test]
fn test_static_worker_broadcasts() {
    let beacon = InstanceConfig {
        name: Some("beacon".into()),
        ..InstanceConfig::new("process")
    }
    .with("exec", "/bin/cat")
    .with("sid", 500)
    .with("auto_start", true);
    let mut h = Harness::new(ECHO, vec![beacon]);
    let mut a = h.connect();
    let mut b = h.connect();
    assert!(h.run_until(|d| d.workers().get(0).map(|w| w.state()) == Some(WorkerState::Normal)));

    let bytes = encode(&mut Packet::context(500, Context::default()));
    send(&mut a, &bytes);
    assert_eq!(h.receive(&mut a), bytes);
    assert_eq!(h.receive(&mut b), bytes);
}

#[test]
fn test_control_tool_over_socket() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    send(&mut client, &ctltool::encode_frame("status"));
    let reply = h.receive(&mut client);
    let text = ctltool::decode_frame(&reply).expect("text frame");
    assert!(text.starts_with("phase RUNNING\n"), "{text}");
    assert!(text.contains("control local unix peers 1"), "{text}");

    send(&mut client, &ctltool::encode_frame("reboot"));
    let reply = h.receive(&mut client);
    assert_eq!(
        ctltool::decode_frame(&reply).expect("text frame"),
        "error: unknown command 'reboot'\n"
    );
}

#[test]
fn test_shutdown_stops_streams() {
    let mut h = Harness::new(ECHO, Vec::new());
    let mut client = h.connect();

    let sid = h.request(&mut client, 0, access(RX0)).sid_assign;
    h.request(&mut client, sid, Command::request(Request::Start));
    assert!(h.run_until(|d| {
        d.workers().get(0).map(|w| w.state()) == Some(WorkerState::Normal)
    }));

    h.daemon.stop_handle().store(true, std::sync::atomic::Ordering::SeqCst);
    assert!(h.run_until(|d| d.phase() == Phase::Stopped));
    assert_eq!(h.state_of(sid), Some(WorkerState::Ready));
}
