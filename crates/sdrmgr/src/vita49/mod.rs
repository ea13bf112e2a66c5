// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! VITA-49 codec.
//!
//! Stateless parse/format of the common header and the two payload kinds
//! the manager speaks: Command and Context. Both operate on a message
//! buffer at its `cur` position.
//!
//! # Wire format
//!
//! ```text
//! +-----------------+-------------------------------------+
//! | common header   | 4 words + optional timestamps       |
//! +-----------------+-------------------------------------+
//! | payload         | Command or Context, indicator-gated |
//! +-----------------+-------------------------------------+
//! ```
//!
//! A buffer whose first word is the control-tool magic is reported as
//! [`Kind::Control`] with the cursor left untouched, so one link can carry
//! both VITA-49 and the private control protocol.
//!
//! Output is single-page only; anything that would need pagination fails
//! with [`Vita49Error::MultiPage`].

pub mod command;
pub mod context;
pub mod fixed;
pub mod header;

use thiserror::Error;

use crate::ctltool;
use crate::error::MbufError;
use crate::mbuf::Mbuf;
use crate::mqueue::MQueue;

pub use command::{Command, Request, ResultCode, Role, Timestamp};
pub use context::Context;
pub use header::{Header, PacketType, Tsf, Tsi};

/// Codec errors. Each maps to a stable negative code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Vita49Error {
    #[error("packet too short ({len} bytes, need {min})")]
    Short { len: usize, min: usize },

    #[error("unsupported packet type {0}")]
    BadType(u32),

    #[error("unexpected class id {0:#018x}")]
    BadClassId(u64),

    #[error("declared size {declared} exceeds {available} available bytes")]
    Oversize { declared: usize, available: usize },

    #[error("unsupported fractional timestamp mode {0}")]
    UnsupportedTsf(u8),

    #[error("paginated message (page {page} of {pages}) not supported")]
    Pagination { page: u16, pages: u16 },

    #[error("{field} runs past end of packet")]
    Overrun { field: &'static str },

    #[error("message does not fit in a single page")]
    MultiPage,

    #[error("buffer error: {0}")]
    Buffer(#[from] MbufError),

    #[error("invalid {0} field")]
    BadField(&'static str),

    #[error("destination queue refused packet")]
    QueueFull,
}

impl Vita49Error {
    pub(crate) fn overrun(field: &'static str) -> Self {
        Self::Overrun { field }
    }

    /// Negative status code for logs and the control tool.
    pub fn code(&self) -> i32 {
        match self {
            Self::Short { .. } => -1,
            Self::BadType(_) => -2,
            Self::BadClassId(_) => -3,
            Self::Oversize { .. } => -4,
            Self::UnsupportedTsf(_) => -5,
            Self::Pagination { .. } => -6,
            Self::Overrun { .. } => -7,
            Self::MultiPage => -8,
            Self::Buffer(_) => -9,
            Self::BadField(_) => -10,
            Self::QueueFull => -11,
        }
    }
}

/// What [`parse`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Command,
    Context,
    /// Control-tool frame; cursor unchanged.
    Control,
}

/// Parse result / format input.
///
/// Only the payload matching `header.packet_type` is meaningful.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub command: Command,
    pub context: Context,
}

impl Packet {
    pub fn command(stream_id: u32, command: Command) -> Self {
        Self {
            header: Header {
                packet_type: PacketType::Command,
                stream_id,
                ..Header::default()
            },
            command,
            context: Context::default(),
        }
    }

    pub fn context(stream_id: u32, context: Context) -> Self {
        Self {
            header: Header {
                packet_type: PacketType::Context,
                stream_id,
                ..Header::default()
            },
            command: Command::default(),
            context,
        }
    }
}

/// Parse one packet at `cur`, merging payload fields into `pkt`.
pub fn parse<U>(pkt: &mut Packet, mbuf: &mut Mbuf<U>) -> Result<Kind, Vita49Error> {
    let start = mbuf.cur();
    if mbuf.available() >= 4 {
        let word = mbuf.get_be32()?;
        mbuf.set_cur(start)?;
        if word == ctltool::MAGIC {
            return Ok(Kind::Control);
        }
    }

    pkt.header.decode(mbuf)?;
    match pkt.header.packet_type {
        PacketType::Command => {
            pkt.command.decode(mbuf)?;
            Ok(Kind::Command)
        }
        PacketType::Context => {
            pkt.context.decode(mbuf)?;
            Ok(Kind::Context)
        }
    }
}

/// Write `pkt` at `cur`; returns the packet length in bytes.
///
/// The sequence count is incremented (modulo 16) before writing and the
/// size field is patched once the payload is known.
pub fn format<U>(pkt: &mut Packet, mbuf: &mut Mbuf<U>) -> Result<usize, Vita49Error> {
    let start = mbuf.cur();
    pkt.header.count = pkt.header.count.wrapping_add(1) & 0xF;
    let word = pkt.header.encode(mbuf)?;

    let body = match pkt.header.packet_type {
        PacketType::Command => pkt.command.encode(mbuf),
        PacketType::Context => pkt.context.encode(mbuf),
    };
    match body {
        Ok(()) => {}
        Err(Vita49Error::Buffer(MbufError::Overrun { .. })) => return Err(Vita49Error::MultiPage),
        Err(e) => return Err(e),
    }

    let len = mbuf.cur() - start;
    let words = len / 4;
    if words > header::MAX_WORDS {
        return Err(Vita49Error::MultiPage);
    }
    pkt.header.size = words as u16;

    let end = mbuf.cur();
    mbuf.set_cur(start)?;
    mbuf.set_be32(word | words as u32)?;
    mbuf.set_cur(end)?;
    Ok(len)
}

/// Format into a fresh buffer of `capacity` bytes and append it to `dest`.
pub fn format_to_queue<U>(
    pkt: &mut Packet,
    capacity: usize,
    user: U,
    dest: &mut MQueue<U>,
) -> Result<usize, Vita49Error> {
    if dest.is_full() {
        return Err(Vita49Error::QueueFull);
    }
    let mut page = Mbuf::try_alloc_with(capacity, user)?;
    let len = format(pkt, &mut page)?;
    page.rewind();
    dest.enqueue(page).map_err(|_| Vita49Error::QueueFull)?;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use command::indicator as cmd;
    use context::indicator as ctx;
    use uuid::Uuid;

    #[test]
    fn test_command_round_trip() {
        let mut pkt = Packet::command(
            77,
            Command::request(Request::Access)
                .with_client_id(Uuid::from_u128(0xabc))
                .with_rids(vec![Uuid::from_u128(0x1234)]),
        );
        let mut m: Mbuf = Mbuf::alloc(256);
        let len = format(&mut pkt, &mut m).expect("format");
        assert_eq!(len, m.len());
        assert_eq!(pkt.header.count, 1);
        assert_eq!(pkt.header.size as usize * 4, len);

        m.rewind();
        let mut parsed = Packet::default();
        assert_eq!(parse(&mut parsed, &mut m).expect("parse"), Kind::Command);
        assert_eq!(parsed, pkt);
        assert!(parsed.command.has(cmd::RID_LIST));
    }

    #[test]
    fn test_repeated_cycles_are_stable() {
        let mut pkt = Packet::context(
            3,
            Context {
                indicator: ctx::SAMPLE_RATE | ctx::GAIN,
                sample_rate: 61.44e6,
                gain_stage1: 6.5,
                ..Context::default()
            },
        );
        for round in 1..=20u16 {
            let mut m: Mbuf = Mbuf::alloc(128);
            format(&mut pkt, &mut m).expect("format");
            m.rewind();
            let mut parsed = Packet::default();
            assert_eq!(parse(&mut parsed, &mut m).expect("parse"), Kind::Context);
            assert_eq!(parsed.header.count, round & 0xF);
            assert_eq!(parsed, pkt);
        }
    }

    #[test]
    fn test_count_wraps_from_any_value() {
        let mut pkt = Packet::command(77, Command::request(Request::Access));
        pkt.header.count = u16::MAX;
        let mut m: Mbuf = Mbuf::alloc(256);
        format(&mut pkt, &mut m).expect("format");
        assert_eq!(pkt.header.count, 0);

        m.rewind();
        let mut parsed = Packet::default();
        parse(&mut parsed, &mut m).expect("parse");
        assert_eq!(parsed.header.count, 0);
    }

    #[test]
    fn test_control_magic_rewinds() {
        let mut m: Mbuf = Mbuf::alloc(16);
        m.set_be32(ctltool::MAGIC).expect("magic");
        m.set_be32(8).expect("len");
        m.rewind();
        let mut pkt = Packet::default();
        assert_eq!(parse(&mut pkt, &mut m).expect("parse"), Kind::Control);
        assert_eq!(m.cur(), 0);
    }

    #[test]
    fn test_too_small_buffer_is_multipage() {
        let rids = (0..8).map(Uuid::from_u128).collect();
        let mut pkt = Packet::command(1, Command::request(Request::Discover).with_rids(rids));
        let mut m: Mbuf = Mbuf::alloc(64);
        assert_eq!(format(&mut pkt, &mut m), Err(Vita49Error::MultiPage));
    }

    #[test]
    fn test_format_to_queue() {
        let mut q: MQueue<u8> = MQueue::new(1);
        let mut pkt = Packet::command(5, Command::result(Request::Start, ResultCode::Success));
        format_to_queue(&mut pkt, 64, 9, &mut q).expect("queued");
        assert_eq!(
            format_to_queue(&mut pkt, 64, 9, &mut q),
            Err(Vita49Error::QueueFull)
        );
        let mut page = q.dequeue().expect("page");
        assert_eq!(*page.user(), 9);
        let mut parsed = Packet::default();
        parse(&mut parsed, &mut page).expect("parse");
        assert_eq!(parsed.header.stream_id, 5);
    }

    #[test]
    fn test_error_codes_negative() {
        let errors = [
            Vita49Error::Short { len: 0, min: 16 },
            Vita49Error::BadType(0),
            Vita49Error::BadClassId(0),
            Vita49Error::MultiPage,
            Vita49Error::QueueFull,
        ];
        assert!(errors.iter().all(|e| e.code() < 0));
    }
}
