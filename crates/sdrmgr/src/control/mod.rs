// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport controls.
//!
//! A control is one link to clients: the local unix socket or an SRIO
//! mailbox. The event loop drives every control through the same steps:
//!
//! ```text
//! check ──> fd_set ──> [wait] ──> fd_isset ──> read ──> process ──> write
//!   ^                                            |                    |
//!   |                                         rx queue            tx queue
//!   +── reopen after close (rate limited)        v                    ^
//!                                           southbound           northbound
//! ```
//!
//! Classes are resolved by name through [`registry::create`].

pub mod registry;
pub mod srio;
pub mod stream;
pub mod unix;

use std::time::{Duration, Instant};

use mio::Registry;

use crate::config::parse_num;
use crate::error::ConfigError;
use crate::mqueue::{EnqueueError, MQueue};
use crate::poll::FdSet;
use crate::route::{ControlId, Msg, Route, Stats};

/// Result of a check/reopen step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Open and usable.
    Ready,
    /// Not open; another attempt will follow.
    Retry,
    /// Cannot work with this configuration; stop the daemon.
    Fatal,
}

const BACKOFF_MIN: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Reopen rate limit: doubles after each failure, resets on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    next: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: BACKOFF_MIN,
            next: None,
        }
    }
}

impl Backoff {
    /// True when an attempt is allowed now.
    pub fn ready(&self, now: Instant) -> bool {
        self.next.map_or(true, |next| now >= next)
    }

    pub fn failed(&mut self, now: Instant) {
        self.next = Some(now + self.delay);
        self.delay = (self.delay * 2).min(BACKOFF_MAX);
    }

    pub fn succeeded(&mut self) {
        self.delay = BACKOFF_MIN;
        self.next = None;
    }

    /// Delay applied after the next failure.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// State shared by every control class.
#[derive(Debug)]
pub struct ControlBase {
    pub id: ControlId,
    pub name: String,
    /// Received messages waiting for southbound dispatch.
    pub rx: MQueue<Route>,
    /// Messages waiting to be written to a peer.
    pub tx: MQueue<Route>,
    pub stats: Stats,
    /// Largest packet accepted from a peer.
    pub max_packet: usize,
    pub reopen: Backoff,
}

impl ControlBase {
    pub fn new(id: ControlId, name: &str, max_packet: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            rx: MQueue::new(64),
            tx: MQueue::new(256),
            stats: Stats::default(),
            max_packet,
            reopen: Backoff::default(),
        }
    }

    /// Keys common to every class.
    pub fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "name" => self.name = value.to_string(),
            "rx_limit" => self.rx.set_limit(parse_num(key, value)?),
            "tx_limit" => self.tx.set_limit(parse_num(key, value)?),
            "max_packet" => {
                let max: usize = parse_num(key, value)?;
                if max < 16 {
                    return Err(ConfigError::bad_value(key, value));
                }
                self.max_packet = max;
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }
}

/// A transport link.
pub trait Control {
    fn base(&self) -> &ControlBase;

    fn base_mut(&mut self) -> &mut ControlBase;

    /// Registered class name.
    fn class(&self) -> &'static str;

    fn id(&self) -> ControlId {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    /// Apply one configuration pair; unknown keys go to the shared handler.
    fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.base_mut().configure(key, value)
    }

    /// Open or reopen the link. Idempotent once open.
    fn check(&mut self, registry: &Registry, now: Instant) -> Status;

    /// Declare read interest, and write interest when output is pending.
    fn fd_set(&self, set: &mut FdSet);

    /// Number of this control's descriptors that are ready.
    fn fd_isset(&self, set: &FdSet) -> usize;

    /// Read at most one message.
    fn read(&mut self, set: &mut FdSet) -> Option<Msg>;

    /// Write at most one message per ready descriptor.
    fn write(&mut self, set: &mut FdSet);

    /// One step of internal queue processing.
    fn process(&mut self) {}

    /// Queue a message for a peer.
    fn enqueue(&mut self, msg: Msg) -> Result<(), EnqueueError<Route>> {
        self.base_mut().tx.enqueue(msg)
    }

    /// Next received message.
    fn dequeue(&mut self) -> Option<Msg> {
        self.base_mut().rx.dequeue()
    }

    /// True while a peer at `slot` can receive messages.
    fn has_peer(&self, slot: Option<u32>) -> bool;

    /// Connected peers.
    fn peers(&self) -> usize;

    /// Close descriptors; queues and statistics are kept.
    fn close(&mut self, registry: &Registry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_resets() {
        let t0 = Instant::now();
        let mut backoff = Backoff::default();
        assert!(backoff.ready(t0));

        backoff.failed(t0);
        assert!(!backoff.ready(t0));
        assert!(backoff.ready(t0 + BACKOFF_MIN));
        assert_eq!(backoff.delay(), BACKOFF_MIN * 2);

        for _ in 0..10 {
            backoff.failed(t0);
        }
        assert_eq!(backoff.delay(), BACKOFF_MAX);

        backoff.succeeded();
        assert!(backoff.ready(t0));
        assert_eq!(backoff.delay(), BACKOFF_MIN);
    }

    #[test]
    fn test_base_configure() {
        let mut base = ControlBase::new(ControlId(1), "local", 1024);
        base.configure("rx_limit", "4").expect("rx_limit");
        base.configure("name", "uplink").expect("name");
        assert_eq!(base.rx.limit(), 4);
        assert_eq!(base.name, "uplink");

        assert!(matches!(
            base.configure("colour", "red"),
            Err(ConfigError::UnknownKey { .. })
        ));
        assert!(matches!(
            base.configure("max_packet", "8"),
            Err(ConfigError::BadValue { .. })
        ));
    }
}
