// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command payload.
//!
//! ```text
//!  31 30 29   24 23        16 15         8 7          0
//! +-----+-------+------------+------------+------------+
//! |role | rsvd  |   result   |  request   |    rsvd    |
//! +-----+-------+------------+------------+------------+
//! |              field indicator                       |
//! +----------------------------------------------------+
//! |   optional fields, in indicator bit order (31..25) |
//! +----------------------------------------------------+
//! ```
//!
//! List fields begin with a word holding the field length in words, that
//! word included. Parsing merges into an existing [`Command`]: scalars are
//! overwritten, lists are extended and indicator bits accumulate.

use uuid::Uuid;

use crate::mbuf::Mbuf;
use crate::resource::{Resource, RESOURCE_WORDS};

use super::fixed::{from_fixed32, to_fixed32, PRIORITY_RADIX};
use super::Vita49Error;

/// Field indicator bits.
pub mod indicator {
    pub const PAGINATION: u32 = 1 << 31;
    pub const CLIENT_ID: u32 = 1 << 30;
    pub const PRIORITY: u32 = 1 << 29;
    pub const RID_LIST: u32 = 1 << 28;
    pub const RESOURCE_LIST: u32 = 1 << 27;
    pub const SID_ASSIGN: u32 = 1 << 26;
    pub const TSTAMP: u32 = 1 << 25;

    /// Every bit with a known field.
    pub const KNOWN: u32 =
        PAGINATION | CLIENT_ID | PRIORITY | RID_LIST | RESOURCE_LIST | SID_ASSIGN | TSTAMP;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Request,
    Result,
    Notify,
}

impl Role {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Role::Request),
            1 => Some(Role::Result),
            2 => Some(Role::Notify),
            _ => None,
        }
    }

    fn bits(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Request {
    #[default]
    Discover,
    Access,
    Release,
    Start,
    Stop,
    Other(u8),
}

impl From<u8> for Request {
    fn from(code: u8) -> Self {
        match code {
            1 => Request::Discover,
            2 => Request::Access,
            3 => Request::Release,
            4 => Request::Start,
            5 => Request::Stop,
            other => Request::Other(other),
        }
    }
}

impl From<Request> for u8 {
    fn from(request: Request) -> u8 {
        match request {
            Request::Discover => 1,
            Request::Access => 2,
            Request::Release => 3,
            Request::Start => 4,
            Request::Stop => 5,
            Request::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultCode {
    #[default]
    Success,
    Failure,
    NoResource,
    Busy,
    Invalid,
    Other(u8),
}

impl From<u8> for ResultCode {
    fn from(code: u8) -> Self {
        match code {
            0 => ResultCode::Success,
            1 => ResultCode::Failure,
            2 => ResultCode::NoResource,
            3 => ResultCode::Busy,
            4 => ResultCode::Invalid,
            other => ResultCode::Other(other),
        }
    }
}

impl From<ResultCode> for u8 {
    fn from(result: ResultCode) -> u8 {
        match result {
            ResultCode::Success => 0,
            ResultCode::Failure => 1,
            ResultCode::NoResource => 2,
            ResultCode::Busy => 3,
            ResultCode::Invalid => 4,
            ResultCode::Other(code) => code,
        }
    }
}

/// When a request takes effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timestamp {
    #[default]
    Immediate,
    Absolute,
    Relative,
}

impl Timestamp {
    fn from_word(word: u32) -> Option<Self> {
        match word {
            0 => Some(Timestamp::Immediate),
            1 => Some(Timestamp::Absolute),
            2 => Some(Timestamp::Relative),
            _ => None,
        }
    }
}

/// Pagination descriptor: page index and page count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub page: u16,
    pub pages: u16,
}

/// Decoded command payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub role: Role,
    pub result: ResultCode,
    pub request: Request,
    pub indicator: u32,
    pub pagination: Pagination,
    pub client_id: Uuid,
    pub priority: f64,
    pub rids: Vec<Uuid>,
    pub resources: Vec<Resource>,
    pub sid_assign: u32,
    pub timestamp: Timestamp,
}

impl Command {
    pub fn has(&self, bit: u32) -> bool {
        self.indicator & bit != 0
    }

    /// Request with no optional fields.
    pub fn request(request: Request) -> Self {
        Self {
            role: Role::Request,
            request,
            ..Self::default()
        }
    }

    /// Result answering `request`.
    pub fn result(request: Request, result: ResultCode) -> Self {
        Self {
            role: Role::Result,
            request,
            result,
            ..Self::default()
        }
    }

    pub fn with_client_id(mut self, id: Uuid) -> Self {
        self.client_id = id;
        self.indicator |= indicator::CLIENT_ID;
        self
    }

    pub fn with_rids(mut self, rids: Vec<Uuid>) -> Self {
        self.rids = rids;
        self.indicator |= indicator::RID_LIST;
        self
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self.indicator |= indicator::RESOURCE_LIST;
        self
    }

    pub fn with_sid(mut self, sid: u32) -> Self {
        self.sid_assign = sid;
        self.indicator |= indicator::SID_ASSIGN;
        self
    }

    pub(crate) fn decode<U>(&mut self, mbuf: &mut Mbuf<U>) -> Result<(), Vita49Error> {
        need(mbuf, 2, "command header")?;
        let word = mbuf.get_be32()?;
        self.role = Role::from_bits(word >> 30).ok_or(Vita49Error::BadField("role"))?;
        self.result = ResultCode::from((word >> 16) as u8);
        self.request = Request::from((word >> 8) as u8);

        let bits = mbuf.get_be32()?;
        if bits & !indicator::KNOWN != 0 {
            return Err(Vita49Error::BadField("command indicator"));
        }
        self.indicator |= bits;

        if bits & indicator::PAGINATION != 0 {
            need(mbuf, 1, "pagination")?;
            let word = mbuf.get_be32()?;
            self.pagination = Pagination {
                page: (word >> 16) as u16,
                pages: word as u16,
            };
            return Err(Vita49Error::Pagination {
                page: self.pagination.page,
                pages: self.pagination.pages,
            });
        }
        if bits & indicator::CLIENT_ID != 0 {
            need(mbuf, 4, "client id")?;
            self.client_id = get_uuid(mbuf)?;
        }
        if bits & indicator::PRIORITY != 0 {
            need(mbuf, 1, "priority")?;
            self.priority = from_fixed32(mbuf.get_be32()?, PRIORITY_RADIX);
        }
        if bits & indicator::RID_LIST != 0 {
            let items = list_items(mbuf, 4, "rid list")?;
            self.rids.reserve(items);
            for _ in 0..items {
                self.rids.push(get_uuid(mbuf)?);
            }
        }
        if bits & indicator::RESOURCE_LIST != 0 {
            let items = list_items(mbuf, RESOURCE_WORDS, "resource list")?;
            self.resources.reserve(items);
            for _ in 0..items {
                self.resources.push(Resource::decode(mbuf)?);
            }
        }
        if bits & indicator::SID_ASSIGN != 0 {
            need(mbuf, 1, "sid assign")?;
            self.sid_assign = mbuf.get_be32()?;
        }
        if bits & indicator::TSTAMP != 0 {
            need(mbuf, 1, "timestamp")?;
            self.timestamp =
                Timestamp::from_word(mbuf.get_be32()?).ok_or(Vita49Error::BadField("timestamp"))?;
        }
        Ok(())
    }

    pub(crate) fn encode<U>(&self, mbuf: &mut Mbuf<U>) -> Result<(), Vita49Error> {
        if self.has(indicator::PAGINATION) {
            return Err(Vita49Error::MultiPage);
        }
        let bits = self.indicator & indicator::KNOWN;
        let word = (self.role.bits() << 30)
            | ((u8::from(self.result) as u32) << 16)
            | ((u8::from(self.request) as u32) << 8);
        mbuf.set_be32(word)?;
        mbuf.set_be32(bits)?;

        if bits & indicator::CLIENT_ID != 0 {
            mbuf.set_bytes_exact(self.client_id.as_bytes())?;
        }
        if bits & indicator::PRIORITY != 0 {
            mbuf.set_be32(to_fixed32(self.priority, PRIORITY_RADIX))?;
        }
        if bits & indicator::RID_LIST != 0 {
            mbuf.set_be32(list_words(self.rids.len(), 4)?)?;
            for rid in &self.rids {
                mbuf.set_bytes_exact(rid.as_bytes())?;
            }
        }
        if bits & indicator::RESOURCE_LIST != 0 {
            mbuf.set_be32(list_words(self.resources.len(), RESOURCE_WORDS)?)?;
            for resource in &self.resources {
                resource.encode(mbuf)?;
            }
        }
        if bits & indicator::SID_ASSIGN != 0 {
            mbuf.set_be32(self.sid_assign)?;
        }
        if bits & indicator::TSTAMP != 0 {
            mbuf.set_be32(self.timestamp as u32)?;
        }
        Ok(())
    }
}

fn need<U>(mbuf: &Mbuf<U>, words: usize, field: &'static str) -> Result<(), Vita49Error> {
    if words * 4 > mbuf.available() {
        Err(Vita49Error::overrun(field))
    } else {
        Ok(())
    }
}

/// Validate a list length word and return the item count.
fn list_items<U>(
    mbuf: &mut Mbuf<U>,
    item_words: usize,
    field: &'static str,
) -> Result<usize, Vita49Error> {
    need(mbuf, 1, field)?;
    let words = mbuf.get_be32()? as usize;
    if words == 0 || (words - 1) % item_words != 0 {
        return Err(Vita49Error::BadField(field));
    }
    need(mbuf, words - 1, field)?;
    Ok((words - 1) / item_words)
}

fn list_words(items: usize, item_words: usize) -> Result<u32, Vita49Error> {
    let words = 1 + items * item_words;
    if words > super::header::MAX_WORDS {
        return Err(Vita49Error::MultiPage);
    }
    Ok(words as u32)
}

fn get_uuid<U>(mbuf: &mut Mbuf<U>) -> Result<Uuid, Vita49Error> {
    let mut bytes = [0u8; 16];
    if mbuf.get_bytes(&mut bytes) != bytes.len() {
        return Err(Vita49Error::overrun("uuid"));
    }
    Ok(Uuid::from_bytes(bytes))
}
