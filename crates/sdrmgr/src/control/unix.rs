// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local unix-socket control.
//!
//! Listens on a filesystem path and accepts up to `max_clients`
//! connections. Each connection is a raw packet stream (see
//! [`super::stream`]). Slot 0 is the listener; clients get slots
//! `1..=max_clients`, handed out round-robin so a slot is not reused
//! right after its client left.
//!
//! Configuration keys:
//!
//! | key           | default | meaning                          |
//! |---------------|---------|----------------------------------|
//! | `path`        | -       | socket path (required)           |
//! | `max_clients` | 8       | concurrent connections           |

use std::io;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::time::Instant;

use mio::net::{UnixListener, UnixStream};
use mio::{Interest, Registry};
use tracing::{debug, info, trace, warn};

use super::stream::{write_some, FrameReader, ReadEvent};
use super::{Control, ControlBase, Status};
use crate::config::parse_num;
use crate::error::{ConfigError, ControlError};
use crate::list::{GrowList, List};
use crate::mbuf::SharedMbuf;
use crate::poll::{control_token, FdSet, MAX_SLOT};
use crate::route::{ControlId, Msg, Route};

const LISTENER_SLOT: u32 = 0;
const DEFAULT_MAX_CLIENTS: u32 = 8;

/// Pending output for one client: buffer and bytes already written.
type Outgoing = (SharedMbuf<Route>, usize);

struct Client {
    slot: u32,
    stream: UnixStream,
    reader: FrameReader<Route>,
    outbox: List<Outgoing>,
}

impl Client {
    /// An outbox holds at most `limit` messages (`0` = unbounded).
    fn is_full(&self, limit: usize) -> bool {
        limit != 0 && self.outbox.len() >= limit
    }
}

pub struct UnixControl {
    base: ControlBase,
    path: Option<PathBuf>,
    max_clients: u32,
    listener: Option<UnixListener>,
    clients: GrowList<Client>,
    next_slot: u32,
    next_read: usize,
}

impl UnixControl {
    pub fn new(id: ControlId, name: &str, max_packet: usize) -> Self {
        Self {
            base: ControlBase::new(id, name, max_packet),
            path: None,
            max_clients: DEFAULT_MAX_CLIENTS,
            listener: None,
            clients: GrowList::new(),
            next_slot: 1,
            next_read: 0,
        }
    }

    /// Socket path, once configured.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    fn open(&mut self, registry: &Registry) -> Result<(), ControlError> {
        let path = self.path.clone().ok_or(ControlError::Missing("path"))?;
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ControlError::open(path.display(), e)),
        }
        let mut listener =
            UnixListener::bind(&path).map_err(|e| ControlError::open(path.display(), e))?;
        registry
            .register(
                &mut listener,
                control_token(self.base.id, LISTENER_SLOT),
                Interest::READABLE,
            )
            .map_err(|e| ControlError::open(path.display(), e))?;
        info!(control = %self.base.name, path = %path.display(), "listening");
        self.listener = Some(listener);
        Ok(())
    }

    fn free_slot(&mut self) -> Option<u32> {
        for _ in 0..self.max_clients {
            let slot = self.next_slot;
            self.next_slot = if slot >= self.max_clients { 1 } else { slot + 1 };
            if self.clients.find(|c| c.slot == slot).is_none() {
                return Some(slot);
            }
        }
        None
    }

    fn accept(&mut self, set: &mut FdSet) {
        let token = control_token(self.base.id, LISTENER_SLOT);
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            let (mut stream, _) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    set.clear_readable(token);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(control = %self.base.name, error = %e, "accept failed");
                    set.clear_readable(token);
                    return;
                }
            };

            let Some(slot) = self.free_slot() else {
                warn!(
                    control = %self.base.name,
                    max = self.max_clients,
                    "too many clients, refusing connection"
                );
                continue;
            };
            let interest = Interest::READABLE | Interest::WRITABLE;
            if let Err(e) =
                set.registry()
                    .register(&mut stream, control_token(self.base.id, slot), interest)
            {
                warn!(control = %self.base.name, error = %e, "cannot register client");
                continue;
            }
            debug!(control = %self.base.name, slot, "client connected");
            self.clients.push(Client {
                slot,
                stream,
                reader: FrameReader::new(self.base.max_packet),
                outbox: List::new(),
            });
        }
    }

    fn drop_client(&mut self, slot: u32, set: &mut FdSet) {
        let Some(index) = self.clients.position(|c| c.slot == slot) else {
            return;
        };
        if let Some(mut client) = self.clients.remove(index) {
            let _ = set.registry().deregister(&mut client.stream);
            set.forget(control_token(self.base.id, slot));
            let lost = client.outbox.len();
            if lost > 0 {
                self.base.stats.dropped += lost as u64;
            }
            debug!(control = %self.base.name, slot, lost, "client disconnected");
        }
    }

    fn post(&mut self, msg: SharedMbuf<Route>, slot: Option<u32>) {
        let limit = self.base.tx.limit();
        match slot {
            Some(slot) => match self.clients.find_mut(|c| c.slot == slot) {
                Some(client) if client.is_full(limit) => {
                    debug!(control = %self.base.name, slot, "client outbox full, dropping");
                    self.base.stats.record_drop();
                }
                Some(client) => client.outbox.push_tail((msg, 0)),
                None => {
                    debug!(control = %self.base.name, slot, "client gone, dropping reply");
                    self.base.stats.record_drop();
                }
            },
            None => {
                for client in self.clients.iter_mut() {
                    if client.is_full(limit) {
                        trace!(control = %self.base.name, slot = client.slot, "outbox full, skipping");
                        self.base.stats.record_drop();
                    } else {
                        client.outbox.push_tail((msg.clone(), 0));
                    }
                }
            }
        }
    }

    /// True when no connected client can take another message.
    fn all_full(&self) -> bool {
        let limit = self.base.tx.limit();
        !self.clients.is_empty() && self.clients.iter().all(|c| c.is_full(limit))
    }
}

impl Control for UnixControl {
    fn base(&self) -> &ControlBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ControlBase {
        &mut self.base
    }

    fn class(&self) -> &'static str {
        "unix"
    }

    fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "path" => self.path = Some(PathBuf::from(value)),
            "max_clients" => {
                let max: u32 = parse_num(key, value)?;
                if max == 0 || max > MAX_SLOT {
                    return Err(ConfigError::bad_value(key, value));
                }
                self.max_clients = max;
            }
            _ => return self.base.configure(key, value),
        }
        Ok(())
    }

    fn check(&mut self, registry: &Registry, now: Instant) -> Status {
        if self.listener.is_some() {
            return Status::Ready;
        }
        if !self.base.reopen.ready(now) {
            return Status::Retry;
        }
        match self.open(registry) {
            Ok(()) => {
                self.base.reopen.succeeded();
                Status::Ready
            }
            Err(e) if e.is_fatal() => {
                self.base.reopen.failed(now);
                warn!(control = %self.base.name, error = %e, "unusable configuration");
                Status::Fatal
            }
            Err(e) => {
                self.base.reopen.failed(now);
                warn!(
                    control = %self.base.name,
                    error = %e,
                    retry_ms = self.base.reopen.delay().as_millis() as u64,
                    "open failed"
                );
                Status::Retry
            }
        }
    }

    fn fd_set(&self, set: &mut FdSet) {
        if let Some(listener) = &self.listener {
            set.set_read(
                control_token(self.base.id, LISTENER_SLOT),
                listener.as_raw_fd(),
            );
        }
        for client in self.clients.iter() {
            let token = control_token(self.base.id, client.slot);
            set.set_read(token, client.stream.as_raw_fd());
            if !client.outbox.is_empty() {
                set.set_write(token, client.stream.as_raw_fd());
            }
        }
    }

    fn fd_isset(&self, set: &FdSet) -> usize {
        let listener = usize::from(
            self.listener.is_some()
                && set.is_readable(control_token(self.base.id, LISTENER_SLOT)),
        );
        let clients: usize = self
            .clients
            .iter()
            .map(|c| {
                let token = control_token(self.base.id, c.slot);
                usize::from(set.is_readable(token)) + usize::from(set.is_writable(token))
            })
            .sum();
        listener + clients
    }

    fn read(&mut self, set: &mut FdSet) -> Option<Msg> {
        if set.is_readable(control_token(self.base.id, LISTENER_SLOT)) {
            self.accept(set);
        }

        let id = self.base.id;
        let count = self.clients.len();
        let mut found = None;
        let mut dead = Vec::new();
        for step in 0..count {
            let index = (self.next_read + step) % count;
            let Some(client) = self.clients.get_mut(index) else {
                continue;
            };
            let token = control_token(id, client.slot);
            if !set.is_readable(token) {
                continue;
            }
            let route = Route::from_control(id, client.slot);
            let before = client.reader.dropped();
            let event = client.reader.read_frame(&mut client.stream, || route);
            self.base.stats.dropped += client.reader.dropped() - before;
            match event {
                Ok(ReadEvent::Frame(msg)) => {
                    self.next_read = index + 1;
                    found = Some(msg);
                    break;
                }
                Ok(ReadEvent::WouldBlock) => set.clear_readable(token),
                Ok(ReadEvent::Closed) => dead.push(client.slot),
                Err(e) => {
                    warn!(control = %self.base.name, slot = client.slot, error = %e, "read failed");
                    dead.push(client.slot);
                }
            }
        }
        for slot in dead {
            self.drop_client(slot, set);
        }

        if let Some(msg) = &found {
            trace!(control = %self.base.name, route = %msg.user(), len = msg.len(), "rx");
            self.base.stats.record_rx(msg.len());
        }
        found
    }

    fn process(&mut self) {
        while !self.all_full() {
            let Some(msg) = self.base.tx.dequeue() else {
                break;
            };
            let slot = msg.user().slot;
            self.post(msg.share(), slot);
        }
    }

    fn write(&mut self, set: &mut FdSet) {
        let id = self.base.id;
        let mut dead = Vec::new();
        for client in self.clients.iter_mut() {
            let token = control_token(id, client.slot);
            if !set.is_writable(token) {
                continue;
            }
            let Some((msg, offset)) = client.outbox.pop_head() else {
                continue;
            };
            match write_some(&mut client.stream, &msg.payload()[offset..]) {
                Ok((n, false)) => {
                    self.base.stats.record_tx(offset + n);
                    trace!(control = %self.base.name, slot = client.slot, len = offset + n, "tx");
                }
                Ok((n, true)) => {
                    set.clear_writable(token);
                    client.outbox.push_head((msg, offset + n));
                }
                Err(e) => {
                    warn!(control = %self.base.name, slot = client.slot, error = %e, "write failed");
                    dead.push(client.slot);
                }
            }
        }
        for slot in dead {
            self.drop_client(slot, set);
        }
    }

    fn has_peer(&self, slot: Option<u32>) -> bool {
        match slot {
            Some(slot) => self.clients.find(|c| c.slot == slot).is_some(),
            None => !self.clients.is_empty(),
        }
    }

    fn peers(&self) -> usize {
        self.clients.len()
    }

    fn close(&mut self, registry: &Registry) {
        for mut client in self.clients.drain() {
            let _ = registry.deregister(&mut client.stream);
        }
        if let Some(mut listener) = self.listener.take() {
            let _ = registry.deregister(&mut listener);
            if let Some(path) = &self.path {
                let _ = std::fs::remove_file(path);
            }
            info!(control = %self.base.name, "closed");
        }
    }
}

impl Drop for UnixControl {
    fn drop(&mut self) {
        if self.listener.is_some() {
            if let Some(path) = &self.path {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
