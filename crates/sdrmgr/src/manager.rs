// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource manager.
//!
//! Answers the management requests a client sends before (and after) it
//! has a stream:
//!
//! | request    | addressed by         | effect                                   |
//! |------------|----------------------|------------------------------------------|
//! | `DISCOVER` | optional RID list    | RESULT carrying the matching resources   |
//! | `ACCESS`   | one RID              | bind a worker to the client, assign SID  |
//! | `RELEASE`  | stream id            | stop the worker for good, reap it        |
//! | `START`    | stream id            | start the worker process                 |
//! | `STOP`     | stream id            | stop the worker process                  |
//!
//! ACCESS is idempotent per client: replaying it for the same resource
//! returns the SID already assigned instead of creating a second worker.
//! Clients are identified by their CLIENT_ID when they send one, else by
//! the link endpoint the request came from.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::list::GrowList;
use crate::poll;
use crate::resource::{Resource, ResourceList};
use crate::route::{Msg, Route, WorkerId};
use crate::vita49::command::indicator;
use crate::vita49::{self, Command, Packet, Request, ResultCode, Role};
use crate::worker::{registry, Worker};

/// The daemon's worker table.
pub type Workers = GrowList<Box<dyn Worker>>;

/// Position of the worker serving `sid`.
pub fn find_sid(workers: &Workers, sid: u32) -> Option<usize> {
    workers.position(|w| w.base().sid == Some(sid))
}

pub struct Manager {
    config: ManagerConfig,
    resources: ResourceList,
    max_packet: usize,
    next_sid: u32,
    next_worker: u32,
    count: u16,
}

impl Manager {
    pub fn new(config: ManagerConfig, resources: ResourceList, max_packet: usize) -> Self {
        if config.exec.trim().is_empty() {
            warn!("manager.exec is empty, stream workers will stay in CONFIG");
        }
        Self {
            config,
            resources,
            max_packet,
            next_sid: 1,
            next_worker: 0,
            count: 0,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn resources(&self) -> &ResourceList {
        &self.resources
    }

    /// Next worker id not held by any worker in `workers`. Ids wrap at
    /// [`poll::MAX_ID`] so readiness tokens never alias.
    pub fn next_worker_id(&mut self, workers: &Workers) -> Option<WorkerId> {
        for _ in 0..=poll::MAX_ID {
            let id = WorkerId(self.next_worker);
            self.next_worker = if self.next_worker >= poll::MAX_ID {
                0
            } else {
                self.next_worker + 1
            };
            if workers.find(|w| w.id() == id).is_none() {
                return Some(id);
            }
        }
        None
    }

    /// True for requests this module answers.
    pub fn is_management(command: &Command) -> bool {
        command.role == Role::Request
            && matches!(
                command.request,
                Request::Discover
                    | Request::Access
                    | Request::Release
                    | Request::Start
                    | Request::Stop
            )
    }

    /// Answer a management request; returns the reply routed back to `route`.
    pub fn handle(&mut self, pkt: &Packet, route: Route, workers: &mut Workers) -> Option<Msg> {
        let cmd = &pkt.command;
        let sid = pkt.header.stream_id;
        debug!(request = ?cmd.request, sid, %route, "management request");

        let (reply, reply_sid) = match cmd.request {
            Request::Discover => (self.discover(cmd), sid),
            Request::Access => self.access(cmd, route, workers),
            Request::Release => (self.release(cmd, sid, workers), sid),
            Request::Start => (
                Command::result(Request::Start, self.start(sid, workers)),
                sid,
            ),
            Request::Stop => (
                Command::result(Request::Stop, self.stop(sid, workers)),
                sid,
            ),
            Request::Other(_) => (Command::result(cmd.request, ResultCode::Invalid), sid),
        };

        let reply = if cmd.has(indicator::CLIENT_ID) {
            reply.with_client_id(cmd.client_id)
        } else {
            reply
        };
        self.format_reply(reply_sid, reply, route)
    }

    fn discover(&self, cmd: &Command) -> Command {
        let found: Vec<Resource> = if cmd.has(indicator::RID_LIST) {
            cmd.rids
                .iter()
                .filter_map(|rid| self.resources.find(rid).cloned())
                .collect()
        } else {
            self.resources.iter().cloned().collect()
        };
        if cmd.has(indicator::RID_LIST) && found.is_empty() {
            return Command::result(Request::Discover, ResultCode::NoResource);
        }
        Command::result(Request::Discover, ResultCode::Success).with_resources(found)
    }

    fn access(&mut self, cmd: &Command, route: Route, workers: &mut Workers) -> (Command, u32) {
        let invalid = (Command::result(Request::Access, ResultCode::Invalid), 0);
        if !cmd.has(indicator::RID_LIST) || cmd.rids.len() != 1 {
            return invalid;
        }
        let rid = cmd.rids[0];
        let Some(resource) = self.resources.find(&rid) else {
            info!(%rid, "access to unknown resource");
            return (Command::result(Request::Access, ResultCode::NoResource), 0);
        };
        let channels = usize::from(resource.tx_chans) + usize::from(resource.rx_chans);
        let client_id = cmd.has(indicator::CLIENT_ID).then_some(cmd.client_id);

        let existing = workers.find(|w| {
            let base = w.base();
            !base.reap
                && base.rid == Some(rid)
                && match client_id {
                    Some(id) => base.client_id == Some(id),
                    None => base.owner.is_some_and(|o| o.same_peer(&route)),
                }
        });
        if let Some(worker) = existing {
            if let Some(sid) = worker.base().sid {
                debug!(sid, %rid, "access replayed, reusing worker");
                return (
                    Command::result(Request::Access, ResultCode::Success).with_sid(sid),
                    sid,
                );
            }
        }

        let in_use = workers
            .iter()
            .filter(|w| !w.base().reap && w.base().rid == Some(rid))
            .count();
        if channels > 0 && in_use >= channels {
            info!(%rid, in_use, "resource busy");
            return (Command::result(Request::Access, ResultCode::Busy), 0);
        }

        let sid = self.allocate_sid(workers);
        let Some(id) = self.next_worker_id(workers) else {
            warn!(sid, %rid, "no free worker id");
            return (Command::result(Request::Access, ResultCode::Failure), 0);
        };
        match self.create_worker(id, sid, rid, client_id, route) {
            Ok(worker) => {
                info!(sid, %rid, worker = worker.name(), owner = %route, "stream allocated");
                workers.push(worker);
                (
                    Command::result(Request::Access, ResultCode::Success).with_sid(sid),
                    sid,
                )
            }
            Err(e) => {
                warn!(sid, %rid, error = %e, "cannot create stream worker");
                (Command::result(Request::Access, ResultCode::Failure), 0)
            }
        }
    }

    fn create_worker(
        &mut self,
        id: WorkerId,
        sid: u32,
        rid: Uuid,
        client_id: Option<Uuid>,
        owner: Route,
    ) -> Result<Box<dyn Worker>, crate::error::ConfigError> {
        let name = format!("stream{sid}");
        let mut worker = registry::create(&self.config.worker_class, id, &name, self.max_packet)?;

        if !self.config.exec.trim().is_empty() {
            worker.configure("exec", &self.config.exec)?;
            for arg in ["--sid".to_string(), sid.to_string(), "--rid".to_string(), rid.to_string()] {
                worker.configure("arg", &arg)?;
            }
        }

        let base = worker.base_mut();
        base.bind(sid, owner, client_id, rid);
        base.lifecycle.restart_on_error = self.config.restart_on_error;
        base.lifecycle.restart_on_exit = self.config.restart_on_exit;
        base.lifecycle.limiter.set_count(self.config.restart_limit);
        base.lifecycle
            .limiter
            .set_period(Duration::from_secs(self.config.restart_period_secs));
        Ok(worker)
    }

    fn allocate_sid(&mut self, workers: &Workers) -> u32 {
        loop {
            let sid = self.next_sid;
            self.next_sid = self.next_sid.checked_add(1).unwrap_or(1);
            if find_sid(workers, sid).is_none() {
                return sid;
            }
        }
    }

    fn release(&mut self, cmd: &Command, sid: u32, workers: &mut Workers) -> Command {
        let Some(index) = find_sid(workers, sid) else {
            return Command::result(Request::Release, ResultCode::Invalid);
        };
        let Some(worker) = workers.get_mut(index) else {
            return Command::result(Request::Release, ResultCode::Invalid);
        };
        let base = worker.base_mut();
        if base.owner.is_none() {
            info!(sid, "static worker cannot be released");
            return Command::result(Request::Release, ResultCode::Invalid);
        }
        if cmd.has(indicator::CLIENT_ID)
            && base.client_id.is_some_and(|id| id != cmd.client_id)
        {
            return Command::result(Request::Release, ResultCode::Busy);
        }
        base.lifecycle.retire();
        base.reap = true;
        info!(sid, worker = %base.name, "stream released");
        Command::result(Request::Release, ResultCode::Success)
    }

    /// Start the worker serving `sid`.
    pub fn start(&self, sid: u32, workers: &mut Workers) -> ResultCode {
        match find_sid(workers, sid).and_then(|i| workers.get_mut(i)) {
            Some(worker) if !worker.base().reap => {
                worker.request_start();
                info!(sid, worker = worker.name(), "start requested");
                ResultCode::Success
            }
            _ => ResultCode::Invalid,
        }
    }

    /// Stop the worker serving `sid`.
    pub fn stop(&self, sid: u32, workers: &mut Workers) -> ResultCode {
        match find_sid(workers, sid).and_then(|i| workers.get_mut(i)) {
            Some(worker) => {
                worker.request_stop();
                info!(sid, worker = worker.name(), "stop requested");
                ResultCode::Success
            }
            None => ResultCode::Invalid,
        }
    }

    fn format_reply(&mut self, sid: u32, reply: Command, route: Route) -> Option<Msg> {
        let request = reply.request;
        let mut pkt = Packet::command(sid, reply);
        pkt.header.count = self.count;

        let mut msg = match Msg::try_alloc_with(self.max_packet, route) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "no buffer for reply");
                return None;
            }
        };
        let result = match vita49::format(&mut pkt, &mut msg) {
            Ok(_) => Ok(()),
            Err(vita49::Vita49Error::MultiPage) => {
                warn!(?request, "reply does not fit one packet");
                msg.reset();
                let mut failure = Packet::command(sid, Command::result(request, ResultCode::Failure));
                failure.header.count = self.count;
                let result = vita49::format(&mut failure, &mut msg).map(|_| ());
                pkt.header.count = failure.header.count;
                result
            }
            Err(e) => Err(e),
        };
        self.count = pkt.header.count;
        match result {
            Ok(()) => {
                msg.rewind();
                Some(msg)
            }
            Err(e) => {
                warn!(error = %e, "cannot format reply");
                None
            }
        }
    }
}
