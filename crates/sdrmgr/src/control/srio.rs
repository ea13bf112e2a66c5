// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial RapidIO mailbox control.
//!
//! The mport character device exchanges whole datagrams: one `read`
//! returns one message, one `write` sends one. Every datagram starts with
//! a 16-byte header in host byte order:
//!
//! ```text
//! 0       4       6       8    9       12      16
//! +-------+-------+-------+----+-------+-------+---------------
//! | type  |  dst  |  src  |mbox|  pad  |  len  | payload (len)
//! +-------+-------+-------+----+-------+-------+---------------
//! ```
//!
//! The mailbox is bound once at open time with an ioctl. Inbound messages
//! are routed with `slot = source node`; replies go back to that node.
//!
//! Configuration keys: `device` (required), `mailbox` (0-3, default 0),
//! `node` (local destination id, default 0).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::time::Instant;

use mio::unix::SourceFd;
use mio::{Interest, Registry};
use tracing::{debug, info, trace, warn};

use super::stream::DRAIN_CHUNK;
use super::{Control, ControlBase, Status};
use crate::config::parse_num;
use crate::error::{ConfigError, ControlError, MbufError};
use crate::mbuf::Mbuf;
use crate::poll::{control_token, FdSet};
use crate::route::{ControlId, Msg, Route};

/// Mailbox datagram header size.
pub const SRIO_HEADER_LEN: usize = 16;

/// Datagram type for mailbox messages.
pub const MSG_TYPE_MBOX: u32 = 1;

/// Destination id addressing every node.
pub const BROADCAST_NODE: u16 = 0xFFFF;

const MAX_MAILBOX: u8 = 3;
const DEVICE_SLOT: u32 = 0;

/// `_IOW('m', 1, u32)`: bind the descriptor to an inbound mailbox.
const RIO_MAP_INBOUND_MBOX: u64 = (1 << 30) | (4 << 16) | ((b'm' as u64) << 8) | 1;

/// Mailbox datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrioHeader {
    pub msg_type: u32,
    pub dst: u16,
    pub src: u16,
    pub mailbox: u8,
    pub len: u32,
}

impl SrioHeader {
    pub fn to_bytes(&self) -> [u8; SRIO_HEADER_LEN] {
        let mut out = [0u8; SRIO_HEADER_LEN];
        out[0..4].copy_from_slice(&self.msg_type.to_ne_bytes());
        out[4..6].copy_from_slice(&self.dst.to_ne_bytes());
        out[6..8].copy_from_slice(&self.src.to_ne_bytes());
        out[8] = self.mailbox;
        out[12..16].copy_from_slice(&self.len.to_ne_bytes());
        out
    }

    /// Consume a header at the buffer cursor.
    pub fn decode<U>(mbuf: &mut Mbuf<U>) -> Result<Self, MbufError> {
        if mbuf.available() < SRIO_HEADER_LEN {
            return Err(MbufError::Underrun {
                want: SRIO_HEADER_LEN,
                have: mbuf.available(),
            });
        }
        let msg_type = mbuf.get_u32()?;
        let dst = mbuf.get_u16()?;
        let src = mbuf.get_u16()?;
        let mailbox = mbuf.get_u8()?;
        mbuf.skip(3)?;
        let len = mbuf.get_u32()?;
        Ok(Self {
            msg_type,
            dst,
            src,
            mailbox,
            len,
        })
    }
}

pub struct SrioControl {
    base: ControlBase,
    device: Option<PathBuf>,
    mailbox: u8,
    node: u16,
    file: Option<File>,
}

impl SrioControl {
    pub fn new(id: ControlId, name: &str, max_packet: usize) -> Self {
        Self {
            base: ControlBase::new(id, name, max_packet),
            device: None,
            mailbox: 0,
            node: 0,
            file: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn fd(&self) -> Option<RawFd> {
        self.file.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn open(&mut self, registry: &Registry) -> Result<(), ControlError> {
        let device = self.device.clone().ok_or(ControlError::Missing("device"))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&device)
            .map_err(|e| ControlError::open(device.display(), e))?;

        let mailbox = u32::from(self.mailbox);
        // SAFETY: the descriptor is open for the duration of the call and the
        // argument points at a live u32, as the request expects.
        let rc = unsafe {
            libc::ioctl(
                file.as_raw_fd(),
                RIO_MAP_INBOUND_MBOX as _,
                &mailbox as *const u32,
            )
        };
        if rc < 0 {
            return Err(ControlError::open(
                format!("{} mailbox {}", device.display(), self.mailbox),
                io::Error::last_os_error(),
            ));
        }

        registry
            .register(
                &mut SourceFd(&file.as_raw_fd()),
                control_token(self.base.id, DEVICE_SLOT),
                Interest::READABLE | Interest::WRITABLE,
            )
            .map_err(|e| ControlError::open(device.display(), e))?;

        info!(
            control = %self.base.name,
            device = %device.display(),
            mailbox = self.mailbox,
            "mailbox bound"
        );
        self.file = Some(file);
        Ok(())
    }

    fn shut(&mut self, registry: &Registry) {
        if let Some(file) = self.file.take() {
            let _ = registry.deregister(&mut SourceFd(&file.as_raw_fd()));
        }
    }

    /// Turn a raw datagram into a routed message.
    fn accept_datagram(&mut self, mut msg: Msg, n: usize) -> Option<Msg> {
        let header = match SrioHeader::decode(&mut msg) {
            Ok(h) => h,
            Err(e) => {
                warn!(control = %self.base.name, len = n, error = %e, "runt datagram");
                self.base.stats.record_drop();
                return None;
            }
        };
        let len = header.len as usize;
        if len > n - SRIO_HEADER_LEN {
            warn!(
                control = %self.base.name,
                declared = len,
                got = n - SRIO_HEADER_LEN,
                "truncated datagram"
            );
            self.base.stats.record_drop();
            return None;
        }
        if msg.set_end(SRIO_HEADER_LEN + len).is_err() || msg.set_beg(SRIO_HEADER_LEN).is_err() {
            self.base.stats.record_drop();
            return None;
        }
        msg.set_user(Route::from_control(self.base.id, u32::from(header.src)));
        trace!(control = %self.base.name, src = header.src, len, "rx");
        self.base.stats.record_rx(len);
        Some(msg)
    }
}

impl Control for SrioControl {
    fn base(&self) -> &ControlBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ControlBase {
        &mut self.base
    }

    fn class(&self) -> &'static str {
        "srio"
    }

    fn configure(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "device" => self.device = Some(PathBuf::from(value)),
            "mailbox" => {
                let mailbox: u8 = parse_num(key, value)?;
                if mailbox > MAX_MAILBOX {
                    return Err(ConfigError::bad_value(key, value));
                }
                self.mailbox = mailbox;
            }
            "node" => self.node = parse_num(key, value)?,
            _ => return self.base.configure(key, value),
        }
        Ok(())
    }

    fn check(&mut self, registry: &Registry, now: Instant) -> Status {
        if self.file.is_some() {
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
                warn!(control = %self.base.name, error = %e, "open failed");
                Status::Retry
            }
        }
    }

    fn fd_set(&self, set: &mut FdSet) {
        let Some(fd) = self.fd() else {
            return;
        };
        let token = control_token(self.base.id, DEVICE_SLOT);
        set.set_read(token, fd);
        if !self.base.tx.is_empty() {
            set.set_write(token, fd);
        }
    }

    fn fd_isset(&self, set: &FdSet) -> usize {
        if self.file.is_none() {
            return 0;
        }
        let token = control_token(self.base.id, DEVICE_SLOT);
        usize::from(set.is_readable(token)) + usize::from(set.is_writable(token))
    }

    fn read(&mut self, set: &mut FdSet) -> Option<Msg> {
        let token = control_token(self.base.id, DEVICE_SLOT);
        if !set.is_readable(token) {
            return None;
        }
        let capacity = SRIO_HEADER_LEN + self.base.max_packet;
        let file = self.file.as_mut()?;

        let mut msg = match Msg::try_alloc_with(capacity, Route::default()) {
            Ok(msg) => msg,
            Err(e) => {
                let mut scratch = [0u8; DRAIN_CHUNK];
                match file.read(&mut scratch) {
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        set.clear_readable(token);
                    }
                    _ => {
                        warn!(control = %self.base.name, error = %e, "no buffer, datagram dropped");
                        self.base.stats.record_drop();
                    }
                }
                return None;
            }
        };

        match msg.read_from(file) {
            Ok(0) => {
                set.clear_readable(token);
                None
            }
            Ok(n) => {
                msg.rewind();
                self.accept_datagram(msg, n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                set.clear_readable(token);
                None
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
            Err(e) => {
                warn!(control = %self.base.name, error = %e, "device read failed, reopening");
                self.shut(set.registry());
                set.forget(token);
                None
            }
        }
    }

    fn write(&mut self, set: &mut FdSet) {
        let token = control_token(self.base.id, DEVICE_SLOT);
        if !set.is_writable(token) {
            return;
        }
        let Some(msg) = self.base.tx.dequeue() else {
            return;
        };
        let Some(file) = self.file.as_mut() else {
            if let Err(e) = self.base.tx.requeue(msg) {
                debug!(control = %self.base.name, error = %e, "device closed, message lost");
                self.base.stats.record_drop();
            }
            return;
        };

        let dst = msg
            .user()
            .slot
            .map_or(BROADCAST_NODE, |slot| slot as u16);
        let header = SrioHeader {
            msg_type: MSG_TYPE_MBOX,
            dst,
            src: self.node,
            mailbox: self.mailbox,
            len: msg.len() as u32,
        };
        let mut datagram = Vec::with_capacity(SRIO_HEADER_LEN + msg.len());
        datagram.extend_from_slice(&header.to_bytes());
        datagram.extend_from_slice(msg.payload());

        match file.write(&datagram) {
            Ok(n) if n == datagram.len() => {
                trace!(control = %self.base.name, dst, len = msg.len(), "tx");
                self.base.stats.record_tx(msg.len());
            }
            Ok(n) => {
                warn!(control = %self.base.name, wrote = n, want = datagram.len(), "short datagram write");
                self.base.stats.record_drop();
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                set.clear_writable(token);
                if let Err(e) = self.base.tx.requeue(msg) {
                    debug!(control = %self.base.name, error = %e, "requeue failed");
                    self.base.stats.record_drop();
                }
            }
            Err(e) => {
                warn!(control = %self.base.name, error = %e, "device write failed, reopening");
                self.base.stats.record_drop();
                self.shut(set.registry());
                set.forget(token);
            }
        }
    }

    fn has_peer(&self, _slot: Option<u32>) -> bool {
        self.file.is_some()
    }

    fn peers(&self) -> usize {
        usize::from(self.file.is_some())
    }

    fn close(&mut self, registry: &Registry) {
        if self.file.is_some() {
            self.shut(registry);
            info!(control = %self.base.name, "closed");
        }
    }
}
