// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet reassembly on byte streams.
//!
//! Unix sockets and worker pipes carry packets back to back with no extra
//! framing. The length comes from the packet itself:
//!
//! ```text
//! VITA-49:       [hdr: size in words (low 16 bits)] ...
//! control tool:  ["SDRC"] [length in bytes] text...
//! ```
//!
//! [`FrameReader`] reads the first two words, allocates a buffer of exactly
//! the announced size and fills it across as many readable events as it
//! takes. When the packet is too large or the allocation fails, the bytes
//! are drained through a small stack buffer and the packet is dropped, so
//! the stream stays aligned.

use std::io::{self, Read, Write};

use tracing::{trace, warn};

use crate::ctltool;
use crate::mbuf::Mbuf;

/// Bytes needed to learn a packet's length.
pub const PROBE_LEN: usize = 8;

/// Stack buffer used to discard packets that cannot be kept.
pub const DRAIN_CHUNK: usize = 512;

/// Outcome of [`FrameReader::read_frame`].
#[derive(Debug)]
pub enum ReadEvent<U> {
    /// A complete packet, cursor at its first byte.
    Frame(Mbuf<U>),
    /// No more bytes for now.
    WouldBlock,
    /// Peer closed the stream.
    Closed,
}

#[derive(Debug)]
enum State<U> {
    Probe { have: usize },
    Body(Mbuf<U>),
    Drain { left: usize },
}

/// Incremental packet reader for one stream.
#[derive(Debug)]
pub struct FrameReader<U> {
    state: State<U>,
    probe: [u8; PROBE_LEN],
    max_len: usize,
    dropped: u64,
}

impl<U> FrameReader<U> {
    pub fn new(max_len: usize) -> Self {
        Self {
            state: State::Probe { have: 0 },
            probe: [0; PROBE_LEN],
            max_len,
            dropped: 0,
        }
    }

    /// Packets discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// True while part of a packet has been consumed.
    pub fn is_partial(&self) -> bool {
        !matches!(self.state, State::Probe { have: 0 })
    }

    /// Packet length announced by the probe bytes.
    fn frame_len(&self) -> io::Result<usize> {
        let word0 = u32::from_be_bytes([self.probe[0], self.probe[1], self.probe[2], self.probe[3]]);
        let len = if word0 == ctltool::MAGIC {
            u32::from_be_bytes([self.probe[4], self.probe[5], self.probe[6], self.probe[7]]) as usize
        } else {
            (word0 & 0xFFFF) as usize * 4
        };
        if len < PROBE_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("packet length {len} below {PROBE_LEN} bytes, stream out of sync"),
            ));
        }
        Ok(len)
    }

    /// Read until a packet completes, the stream would block, or it closes.
    ///
    /// `user` is attached to the packet buffer when it is allocated.
    pub fn read_frame<R>(&mut self, src: &mut R, user: impl Fn() -> U) -> io::Result<ReadEvent<U>>
    where
        R: Read + ?Sized,
    {
        loop {
            let state = std::mem::replace(&mut self.state, State::Probe { have: 0 });
            match state {
                State::Probe { have } => match src.read(&mut self.probe[have..]) {
                    Ok(0) if have == 0 => return Ok(ReadEvent::Closed),
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "stream closed inside packet header",
                        ))
                    }
                    Ok(n) if have + n < PROBE_LEN => {
                        self.state = State::Probe { have: have + n };
                    }
                    Ok(_) => {
                        let len = self.frame_len()?;
                        self.state = self.start_body(len, user());
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        self.state = State::Probe { have };
                        return Ok(ReadEvent::WouldBlock);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        self.state = State::Probe { have };
                    }
                    Err(e) => return Err(e),
                },

                State::Body(mut mbuf) => {
                    if mbuf.room() == 0 {
                        mbuf.rewind();
                        return Ok(ReadEvent::Frame(mbuf));
                    }
                    match mbuf.read_from(src) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "stream closed inside packet body",
                            ))
                        }
                        Ok(_) => self.state = State::Body(mbuf),
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = State::Body(mbuf);
                            return Ok(ReadEvent::WouldBlock);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                            self.state = State::Body(mbuf);
                        }
                        Err(e) => return Err(e),
                    }
                }

                State::Drain { left: 0 } => {
                    self.dropped += 1;
                }
                State::Drain { left } => {
                    let mut scratch = [0u8; DRAIN_CHUNK];
                    let want = left.min(DRAIN_CHUNK);
                    match src.read(&mut scratch[..want]) {
                        Ok(0) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "stream closed inside dropped packet",
                            ))
                        }
                        Ok(n) => self.state = State::Drain { left: left - n },
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.state = State::Drain { left };
                            return Ok(ReadEvent::WouldBlock);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                            self.state = State::Drain { left };
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    fn start_body(&mut self, len: usize, user: U) -> State<U> {
        if len > self.max_len {
            warn!(len, max = self.max_len, "packet too large, dropping");
            return State::Drain {
                left: len - PROBE_LEN,
            };
        }
        match Mbuf::try_alloc_with(len, user) {
            Ok(mut mbuf) => {
                // Capacity is exactly len >= PROBE_LEN.
                let _ = mbuf.set_bytes(&self.probe);
                trace!(len, "packet started");
                State::Body(mbuf)
            }
            Err(e) => {
                warn!(len, error = %e, "no buffer for packet, dropping");
                State::Drain {
                    left: len - PROBE_LEN,
                }
            }
        }
    }
}

/// Write as much of `bytes` as the sink takes.
///
/// Returns the byte count and whether the sink reported `WouldBlock`.
pub fn write_some<W>(dst: &mut W, bytes: &[u8]) -> io::Result<(usize, bool)>
where
    W: Write + ?Sized,
{
    let mut done = 0;
    while done < bytes.len() {
        match dst.write(&bytes[done..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "peer stopped accepting data",
                ))
            }
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok((done, true)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok((done, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vita49::header::{CLASS_CODE, OUI};
    use std::collections::VecDeque;

    /// Byte source handing out scripted chunks, then `WouldBlock`.
    struct Chunks {
        chunks: VecDeque<Vec<u8>>,
        eof: bool,
    }

    impl Chunks {
        fn new(chunks: &[&[u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                eof: false,
            }
        }
    }

    impl Read for Chunks {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(mut chunk) = self.chunks.pop_front() else {
                return if self.eof {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::WouldBlock.into())
                };
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                chunk.drain(..n);
                self.chunks.push_front(chunk);
            }
            Ok(n)
        }
    }

    fn packet(words: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(0x6800_0000u32 | words as u32).to_be_bytes());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&OUI.to_be_bytes());
        out.extend_from_slice(&CLASS_CODE.to_be_bytes());
        out.resize(words * 4, 0xee);
        out
    }

    fn expect_frame(event: ReadEvent<()>) -> Mbuf {
        match event {
            ReadEvent::Frame(m) => m,
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[test]
    fn test_reassembles_split_packet() {
        let pkt = packet(6);
        let mut src = Chunks::new(&[&pkt[..3], &pkt[3..10], &pkt[10..]]);
        let mut reader = FrameReader::new(1024);

        // All chunks are available, so one call completes the packet.
        let m = expect_frame(reader.read_frame(&mut src, || ()).expect("read"));
        assert_eq!(m.payload(), &pkt[..]);
        assert_eq!(m.cur(), 0);
        assert!(matches!(
            reader.read_frame(&mut src, || ()).expect("read"),
            ReadEvent::WouldBlock
        ));
    }

    #[test]
    fn test_resumes_after_would_block() {
        let pkt = packet(5);
        let mut reader = FrameReader::new(1024);

        let mut first = Chunks::new(&[&pkt[..12]]);
        assert!(matches!(
            reader.read_frame(&mut first, || ()).expect("read"),
            ReadEvent::WouldBlock
        ));
        assert!(reader.is_partial());

        let mut rest = Chunks::new(&[&pkt[12..]]);
        let m = expect_frame(reader.read_frame(&mut rest, || ()).expect("read"));
        assert_eq!(m.len(), 20);
    }

    #[test]
    fn test_back_to_back_and_control_frames() {
        let mut bytes = packet(4);
        bytes.extend(ctltool::encode_frame("status"));
        let mut src = Chunks::new(&[&bytes]);
        let mut reader = FrameReader::new(1024);

        let a = expect_frame(reader.read_frame(&mut src, || ()).expect("read"));
        let b = expect_frame(reader.read_frame(&mut src, || ()).expect("read"));
        assert_eq!(a.len(), 16);
        assert_eq!(ctltool::decode_frame(b.payload()), Ok("status"));
    }

    #[test]
    fn test_oversized_packet_drained() {
        let mut bytes = packet(300);
        bytes.extend(packet(4));
        let mut src = Chunks::new(&[&bytes]);
        let mut reader = FrameReader::new(256);

        let m = expect_frame(reader.read_frame(&mut src, || ()).expect("read"));
        assert_eq!(m.len(), 16);
        assert_eq!(reader.dropped(), 1);
    }

    #[test]
    fn test_close_and_desync() {
        let mut src = Chunks::new(&[]);
        src.eof = true;
        let mut reader: FrameReader<()> = FrameReader::new(64);
        assert!(matches!(
            reader.read_frame(&mut src, || ()).expect("read"),
            ReadEvent::Closed
        ));

        let mut src = Chunks::new(&[&[0x68, 0, 0, 1, 0, 0, 0, 0]]);
        let err = reader.read_frame(&mut src, || ()).expect_err("size 1 word");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_write_some_reports_block() {
        struct Tight(usize);
        impl Write for Tight {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::ErrorKind::WouldBlock.into());
                }
                let n = buf.len().min(self.0);
                self.0 -= n;
                Ok(n)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        assert_eq!(write_some(&mut Tight(5), b"abcdefgh").expect("write"), (5, true));
        assert_eq!(write_some(&mut Tight(50), b"abcdefgh").expect("write"), (8, false));
    }
}
