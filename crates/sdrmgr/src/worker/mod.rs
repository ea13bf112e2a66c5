// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Managed stream workers.
//!
//! A worker is one supervised process per stream, connected to the daemon
//! by its stdin (southbound) and stdout (northbound). Workers come from the
//! `[[worker]]` configuration section (static) or from an ACCESS request
//! handled by the [`Manager`](crate::manager::Manager) (dynamic, owned by
//! the requesting client).

pub mod limiter;
pub mod process;
pub mod registry;
pub mod state;

use std::time::{Duration, Instant};

use mio::Registry;
use uuid::Uuid;

use crate::config::{parse_bool, parse_num};
use crate::control::Status;
use crate::error::ConfigError;
use crate::mqueue::{EnqueueError, MQueue};
use crate::poll::FdSet;
use crate::route::{Msg, Route, Stats, WorkerId};

pub use limiter::RateLimiter;
pub use state::{Lifecycle, Supervised, WorkerState};

/// State shared by every worker class.
#[derive(Debug)]
pub struct WorkerBase {
    pub id: WorkerId,
    pub name: String,
    /// Output read from the process, waiting for northbound dispatch.
    pub rx: MQueue<Route>,
    /// Input waiting to be written to the process.
    pub tx: MQueue<Route>,
    pub stats: Stats,
    pub lifecycle: Lifecycle,
    pub max_packet: usize,
    /// Stream id clients address this worker by.
    pub sid: Option<u32>,
    /// Client endpoint that receives this worker's output.
    pub owner: Option<Route>,
    pub client_id: Option<Uuid>,
    pub rid: Option<Uuid>,
    /// Free once the worker is a zombie.
    pub reap: bool,
}

impl WorkerBase {
    pub fn new(id: WorkerId, name: &str, max_packet: usize) -> Self {
        Self {
            id,
            name: name.to_string(),
            rx: MQueue::new(64),
            tx: MQueue::new(64),
            stats: Stats::default(),
            lifecycle: Lifecycle::default(),
            max_packet,
            sid: None,
            owner: None,
            client_id: None,
            rid: None,
            reap: false,
        }
    }

    /// Keys common to every class.
    pub fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let life = &mut self.lifecycle;
        match key {
            "name" => self.name = value.to_string(),
            "rx_limit" => self.rx.set_limit(parse_num(key, value)?),
            "tx_limit" => self.tx.set_limit(parse_num(key, value)?),
            "sid" => self.sid = Some(parse_num(key, value)?),
            "rid" => {
                let rid = Uuid::parse_str(value).map_err(|_| ConfigError::bad_value(key, value))?;
                self.rid = Some(rid);
            }
            "auto_start" => life.auto_start = parse_bool(key, value)?,
            "restart_on_error" => life.restart_on_error = parse_bool(key, value)?,
            "restart_on_exit" => life.restart_on_exit = parse_bool(key, value)?,
            "restart_limit" => life.limiter.set_count(parse_num(key, value)?),
            "restart_period" => {
                life.limiter
                    .set_period(Duration::from_secs(parse_num(key, value)?));
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Stream worker bound to a client, not yet configured for a class.
    pub fn bind(&mut self, sid: u32, owner: Route, client_id: Option<Uuid>, rid: Uuid) {
        self.sid = Some(sid);
        self.owner = Some(owner);
        self.client_id = client_id;
        self.rid = Some(rid);
    }
}

/// A supervised stream process.
pub trait Worker {
    fn base(&self) -> &WorkerBase;

    fn base_mut(&mut self) -> &mut WorkerBase;

    /// Registered class name.
    fn class(&self) -> &'static str;

    fn id(&self) -> WorkerId {
        self.base().id
    }

    fn name(&self) -> &str {
        &self.base().name
    }

    fn state(&self) -> WorkerState {
        self.base().lifecycle.state()
    }

    /// Apply one configuration pair; unknown keys go to the shared handler.
    fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.base_mut().configure(key, value)
    }

    /// Advance the lifecycle and check the process is alive.
    fn liveness(&mut self, registry: &Registry, now: Instant) -> Status;

    /// Declare read interest, and write interest when input is pending.
    fn fd_set(&self, set: &mut FdSet);

    /// Number of this worker's descriptors that are ready.
    fn fd_isset(&self, set: &FdSet) -> usize;

    /// Move complete packets from the process to the receive queue.
    fn read(&mut self, set: &mut FdSet);

    /// Write at most one message to the process.
    fn write(&mut self, set: &mut FdSet);

    /// One step of internal queue processing.
    fn process(&mut self) {}

    /// Queue a message for the process.
    fn enqueue(&mut self, msg: Msg) -> Result<(), EnqueueError<Route>> {
        self.base_mut().tx.enqueue(msg)
    }

    /// Next message produced by the process.
    fn dequeue(&mut self) -> Option<Msg> {
        self.base_mut().rx.dequeue()
    }

    fn request_start(&mut self) {
        self.base_mut().lifecycle.request_start();
    }

    fn request_stop(&mut self) {
        self.base_mut().lifecycle.request_stop();
    }

    /// Process id while running.
    fn pid(&self) -> Option<u32>;

    /// Close pipes; the process, if any, is left to exit on its own.
    fn close(&mut self, registry: &Registry);
}
