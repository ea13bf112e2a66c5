// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Private control-tool protocol.
//!
//! Shares the unix socket with VITA-49 traffic. A frame is:
//!
//! ```text
//! +-------------+-------------------+------------------------+
//! | magic "SDRC"| frame length (B)  | UTF-8 text             |
//! +-------------+-------------------+------------------------+
//! ```
//!
//! Both header words are big-endian; the length covers the whole frame.
//! Requests carry one command line, replies carry free-form text.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::error::MbufError;
use crate::mbuf::Mbuf;

/// First word of every control-tool frame.
pub const MAGIC: u32 = 0x5344_5243;

/// Magic and length words.
pub const HEADER_LEN: usize = 8;

/// Largest frame either side accepts.
pub const MAX_FRAME: usize = 16 * 1024;

/// Last line of a reply cut to fit one frame.
pub const TRUNCATED: &str = "...truncated\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CtlError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    Unknown(String),

    #[error("'{0}' needs a stream id")]
    MissingArg(&'static str),

    #[error("bad stream id '{0}'")]
    BadArg(String),

    #[error("malformed frame: {0}")]
    Frame(&'static str),

    #[error(transparent)]
    Buffer(#[from] MbufError),
}

/// Commands understood by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlCommand {
    Status,
    Workers,
    Resources,
    Start(u32),
    Stop(u32),
    Reap,
    Help,
}

impl FromStr for CtlCommand {
    type Err = CtlError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(CtlError::Empty)?;
        let sid = |name: &'static str, arg: Option<&str>| -> Result<u32, CtlError> {
            let arg = arg.ok_or(CtlError::MissingArg(name))?;
            arg.parse().map_err(|_| CtlError::BadArg(arg.to_string()))
        };
        match verb {
            "status" => Ok(CtlCommand::Status),
            "workers" => Ok(CtlCommand::Workers),
            "resources" => Ok(CtlCommand::Resources),
            "start" => Ok(CtlCommand::Start(sid("start", words.next())?)),
            "stop" => Ok(CtlCommand::Stop(sid("stop", words.next())?)),
            "reap" => Ok(CtlCommand::Reap),
            "help" => Ok(CtlCommand::Help),
            other => Err(CtlError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for CtlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtlCommand::Status => f.write_str("status"),
            CtlCommand::Workers => f.write_str("workers"),
            CtlCommand::Resources => f.write_str("resources"),
            CtlCommand::Start(sid) => write!(f, "start {sid}"),
            CtlCommand::Stop(sid) => write!(f, "stop {sid}"),
            CtlCommand::Reap => f.write_str("reap"),
            CtlCommand::Help => f.write_str("help"),
        }
    }
}

pub const HELP: &str = "\
status           daemon phase and instance counts
workers          worker table
resources        known RF resources
start <sid>      request start of a stream worker
stop <sid>       request stop of a stream worker
reap             free zombie workers
help             this text
";

// ============================================================================
// Slice helpers (client side)
// ============================================================================

/// Build a frame around `text`.
pub fn encode_frame(text: &str) -> Vec<u8> {
    let len = HEADER_LEN + text.len();
    let mut frame = Vec::with_capacity(len);
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

/// Total frame length announced by a header.
pub fn frame_len(header: &[u8; HEADER_LEN]) -> Result<usize, CtlError> {
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(CtlError::Frame("bad magic"));
    }
    let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if !(HEADER_LEN..=MAX_FRAME).contains(&len) {
        return Err(CtlError::Frame("bad length"));
    }
    Ok(len)
}

/// Text of a complete frame.
pub fn decode_frame(frame: &[u8]) -> Result<&str, CtlError> {
    let header: &[u8; HEADER_LEN] = frame
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(CtlError::Frame("short header"))?;
    let len = frame_len(header)?;
    let body = frame
        .get(HEADER_LEN..len)
        .ok_or(CtlError::Frame("truncated"))?;
    std::str::from_utf8(body).map_err(|_| CtlError::Frame("not utf-8"))
}

// ============================================================================
// Buffer helpers (daemon side)
// ============================================================================

/// Consume a frame at `cur` and return its text.
pub fn read_text<U>(mbuf: &mut Mbuf<U>) -> Result<String, CtlError> {
    if mbuf.get_be32()? != MAGIC {
        return Err(CtlError::Frame("bad magic"));
    }
    let len = mbuf.get_be32()? as usize;
    let body = len
        .checked_sub(HEADER_LEN)
        .ok_or(CtlError::Frame("bad length"))?;
    if body > mbuf.available() {
        return Err(CtlError::Frame("truncated"));
    }
    let mut text = vec![0u8; body];
    mbuf.get_bytes(&mut text);
    String::from_utf8(text).map_err(|_| CtlError::Frame("not utf-8"))
}

/// Reply text that fits one frame. Longer text is cut at the last whole
/// line that fits and ends with [`TRUNCATED`].
pub fn fit_reply(text: &str) -> Cow<'_, str> {
    let room = MAX_FRAME - HEADER_LEN;
    if text.len() <= room {
        return Cow::Borrowed(text);
    }
    let mut cut = room - TRUNCATED.len();
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let head = &text[..cut];
    let head = head.rfind('\n').map_or(head, |nl| &head[..=nl]);
    Cow::Owned(format!("{head}{TRUNCATED}"))
}

/// Write a frame header with a zero length; returns the frame start.
pub fn begin_reply<U>(mbuf: &mut Mbuf<U>) -> Result<usize, MbufError> {
    let start = mbuf.cur();
    mbuf.set_be32(MAGIC)?;
    mbuf.set_be32(0)?;
    Ok(start)
}

/// Patch the length of the frame started at `start`.
pub fn finish_reply<U>(mbuf: &mut Mbuf<U>, start: usize) -> Result<(), MbufError> {
    let end = mbuf.cur();
    mbuf.set_cur(start + 4)?;
    mbuf.set_be32((end - start) as u32)?;
    mbuf.set_cur(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_reply_is_marked_truncated() {
        assert!(matches!(fit_reply("phase RUNNING\n"), Cow::Borrowed(_)));

        let line = "w 1 stream1 12 NORMAL 4242 c0:1 rx 0/0B tx 0/0B dropped 0\n";
        let table = line.repeat(MAX_FRAME / line.len() + 10);
        let fitted = fit_reply(&table);
        assert!(fitted.len() <= MAX_FRAME - HEADER_LEN);
        assert!(fitted.ends_with(TRUNCATED));
        let body = &fitted[..fitted.len() - TRUNCATED.len()];
        assert!(body.lines().all(|l| format!("{l}\n") == line));

        let mut m: Mbuf = Mbuf::alloc(MAX_FRAME);
        let start = begin_reply(&mut m).expect("header");
        assert_eq!(m.append_fmt(format_args!("{fitted}")), fitted.len());
        finish_reply(&mut m, start).expect("patch");
        assert_eq!(decode_frame(m.payload()), Ok(&*fitted));
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("status".parse::<CtlCommand>(), Ok(CtlCommand::Status));
        assert_eq!("  stop   12 ".parse::<CtlCommand>(), Ok(CtlCommand::Stop(12)));
        assert_eq!(
            "start".parse::<CtlCommand>(),
            Err(CtlError::MissingArg("start"))
        );
        assert_eq!(
            "start x".parse::<CtlCommand>(),
            Err(CtlError::BadArg("x".into()))
        );
        assert_eq!("".parse::<CtlCommand>(), Err(CtlError::Empty));
        assert!(matches!(
            "reboot".parse::<CtlCommand>(),
            Err(CtlError::Unknown(_))
        ));
        assert_eq!(CtlCommand::Start(3).to_string(), "start 3");
    }

    #[test]
    fn test_frame_slices() {
        let frame = encode_frame("workers");
        assert_eq!(frame.len(), 15);
        assert_eq!(decode_frame(&frame), Ok("workers"));
        assert_eq!(decode_frame(&frame[..10]), Err(CtlError::Frame("truncated")));
        assert_eq!(decode_frame(b"RTPS\0\0\0\x08"), Err(CtlError::Frame("bad magic")));
    }

    #[test]
    fn test_reply_in_buffer() {
        let mut m: Mbuf = Mbuf::alloc(64);
        let start = begin_reply(&mut m).expect("header");
        m.append_fmt(format_args!("phase {}\n", "RUNNING"));
        finish_reply(&mut m, start).expect("patch");

        assert_eq!(decode_frame(m.payload()), Ok("phase RUNNING\n"));
        m.rewind();
        assert_eq!(read_text(&mut m).expect("text"), "phase RUNNING\n");
    }
}
