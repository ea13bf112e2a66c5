// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readiness sets over `mio::Poll`.
//!
//! The event loop works in select style: every iteration each instance
//! declares which of its descriptors it wants to read or write, the loop
//! waits, then asks which of them are ready. mio is edge-triggered, so
//! [`FdSet`] latches readiness per token until the owner reports
//! `WouldBlock` through [`FdSet::clear_readable`] / [`FdSet::clear_writable`].
//!
//! ```text
//!   set_read/set_write ──> wait() ──> is_readable/is_writable
//!          ^                 |                 |
//!          |            latch events      I/O until WouldBlock
//!          +--------- clear() <────────── clear_readable/writable
//! ```
//!
//! A source is registered once with the [`Registry`] when it is opened and
//! stays registered until it is closed.

use std::collections::{HashMap, HashSet};
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::{Events, Poll, Registry, Token};

use crate::route::{ControlId, WorkerId};

// flag | id (20 bits) | slot (10 bits); fits a 32-bit usize.
const SLOT_BITS: usize = 10;
const SLOT_MASK: usize = (1 << SLOT_BITS) - 1;
const ID_BITS: usize = 20;
const ID_MASK: usize = (1 << ID_BITS) - 1;
const WORKER_FLAG: usize = 1 << (SLOT_BITS + ID_BITS);

/// Highest slot number usable in a token.
pub const MAX_SLOT: u32 = SLOT_MASK as u32;

/// Highest control or worker id usable in a token. Larger ids alias.
pub const MAX_ID: u32 = ID_MASK as u32;

fn encode(flag: usize, id: u32, slot: u32) -> Token {
    Token(flag | ((id as usize & ID_MASK) << SLOT_BITS) | (slot as usize & SLOT_MASK))
}

/// Token for descriptor `slot` of a control.
pub fn control_token(id: ControlId, slot: u32) -> Token {
    encode(0, id.0, slot)
}

/// Token for descriptor `slot` of a worker.
pub fn worker_token(id: WorkerId, slot: u32) -> Token {
    encode(WORKER_FLAG, id.0, slot)
}

/// Slot number encoded in a token.
pub fn token_slot(token: Token) -> u32 {
    (token.0 & SLOT_MASK) as u32
}

#[derive(Debug, Clone, Copy, Default)]
struct Ready {
    read: bool,
    write: bool,
}

/// Read/write interest and latched readiness for one loop iteration.
pub struct FdSet {
    poll: Poll,
    events: Events,
    latched: HashMap<Token, Ready>,
    want_read: HashSet<Token>,
    want_write: HashSet<Token>,
    max_fd: Option<RawFd>,
}

impl FdSet {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            latched: HashMap::new(),
            want_read: HashSet::new(),
            want_write: HashSet::new(),
            max_fd: None,
        })
    }

    /// Registry used to register sources at open time.
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Start a new iteration: drop interest, keep latched readiness.
    pub fn clear(&mut self) {
        self.want_read.clear();
        self.want_write.clear();
        self.max_fd = None;
    }

    fn track(&mut self, fd: RawFd) {
        self.max_fd = Some(self.max_fd.map_or(fd, |max| max.max(fd)));
    }

    pub fn set_read(&mut self, token: Token, fd: RawFd) {
        self.want_read.insert(token);
        self.track(fd);
    }

    pub fn set_write(&mut self, token: Token, fd: RawFd) {
        self.want_write.insert(token);
        self.track(fd);
    }

    /// Largest descriptor declared this iteration.
    pub fn max_fd(&self) -> Option<RawFd> {
        self.max_fd
    }

    /// Number of declared interests that are already satisfied.
    pub fn pending(&self) -> usize {
        let reads = self
            .want_read
            .iter()
            .filter(|t| self.latched.get(t).is_some_and(|r| r.read))
            .count();
        let writes = self
            .want_write
            .iter()
            .filter(|t| self.latched.get(t).is_some_and(|r| r.write))
            .count();
        reads + writes
    }

    /// Wait for readiness; returns the number of satisfied interests.
    ///
    /// Returns immediately when a declared interest is already latched.
    /// An interrupted wait counts as a timeout.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        let timeout = if self.pending() > 0 {
            Duration::ZERO
        } else {
            timeout
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(self.pending()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            let ready = self.latched.entry(event.token()).or_default();
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                ready.read = true;
            }
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                ready.write = true;
            }
        }
        Ok(self.pending())
    }

    pub fn is_readable(&self, token: Token) -> bool {
        self.want_read.contains(&token) && self.latched.get(&token).is_some_and(|r| r.read)
    }

    pub fn is_writable(&self, token: Token) -> bool {
        self.want_write.contains(&token) && self.latched.get(&token).is_some_and(|r| r.write)
    }

    /// Record that a read hit `WouldBlock`.
    pub fn clear_readable(&mut self, token: Token) {
        if let Some(ready) = self.latched.get_mut(&token) {
            ready.read = false;
        }
    }

    /// Record that a write hit `WouldBlock`.
    pub fn clear_writable(&mut self, token: Token) {
        if let Some(ready) = self.latched.get_mut(&token) {
            ready.write = false;
        }
    }

    /// Drop all state for every token of a worker that was freed.
    pub fn forget_worker(&mut self, id: WorkerId) {
        let base = worker_token(id, 0).0;
        let owned = |t: &Token| t.0 & !SLOT_MASK == base;
        self.latched.retain(|t, _| !owned(t));
        self.want_read.retain(|t| !owned(t));
        self.want_write.retain(|t| !owned(t));
    }

    /// Drop all state for a token whose source was deregistered.
    pub fn forget(&mut self, token: Token) {
        self.latched.remove(&token);
        self.want_read.remove(&token);
        self.want_write.remove(&token);
    }
}
