// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message buffer.
//!
//! An [`Mbuf`] owns a fixed-capacity byte region addressed by three cursors:
//!
//! ```text
//!  0        beg           cur               end          max
//!  |--------|=============|=================|------------|
//!           \____ read ___/\___ remaining __/\__ room __/
//!                    \_______ payload ______/
//! ```
//!
//! The invariant `beg <= cur <= end <= max` holds at every observable point.
//! Every accessor either succeeds completely or fails and leaves the buffer
//! untouched.
//!
//! Typed accessors exist for three byte orders: host (`get_u32`), big-endian
//! (`get_be32`) and little-endian (`get_le32`). Getters read at `cur` and
//! advance it, bounded by `end`. Setters write at `cur`, advance it and
//! extend `end` when they write past it, bounded by `max`.
//!
//! Ownership replaces manual reference counting: a plain `Mbuf` has a single
//! owner and moves between queues. [`Mbuf::share`] turns it into a
//! [`SharedMbuf`] when several consumers need the same bytes (broadcast).

use std::fmt::{self, Write as _};
use std::io::{self, Read, Write};
use std::rc::Rc;

use crate::error::MbufError;
use crate::mqueue::QueueId;

/// Reference-counted, read-only view of a buffer.
pub type SharedMbuf<U = ()> = Rc<Mbuf<U>>;

/// Cursor-addressed byte buffer with an inline user record.
pub struct Mbuf<U = ()> {
    data: Box<[u8]>,
    beg: usize,
    cur: usize,
    end: usize,
    user: U,
    pub(crate) member: Option<QueueId>,
}

// ============================================================================
// Allocation
// ============================================================================

impl<U: Default> Mbuf<U> {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn alloc(capacity: usize) -> Self {
        Self::with_user(capacity, U::default())
    }

    /// Allocate without aborting when memory is exhausted.
    pub fn try_alloc(capacity: usize) -> Result<Self, MbufError> {
        Self::try_alloc_with(capacity, U::default())
    }

    /// Allocate a buffer holding a copy of `bytes`, cursor at the start.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut mbuf = Self::alloc(bytes.len());
        mbuf.data.copy_from_slice(bytes);
        mbuf.end = bytes.len();
        mbuf
    }
}

impl<U> Mbuf<U> {
    /// Allocate a zeroed buffer carrying `user` as its user record.
    pub fn with_user(capacity: usize, user: U) -> Self {
        Self::from_storage(vec![0u8; capacity].into_boxed_slice(), user)
    }

    /// Fallible variant of [`with_user`](Self::with_user).
    pub fn try_alloc_with(capacity: usize, user: U) -> Result<Self, MbufError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| MbufError::Alloc { capacity })?;
        data.resize(capacity, 0);
        Ok(Self::from_storage(data.into_boxed_slice(), user))
    }

    fn from_storage(data: Box<[u8]>, user: U) -> Self {
        Self {
            data,
            beg: 0,
            cur: 0,
            end: 0,
            user,
            member: None,
        }
    }

    /// Convert into a shared handle.
    pub fn share(self) -> SharedMbuf<U> {
        Rc::new(self)
    }

    /// Recover sole ownership when `shared` is the last handle.
    pub fn unshare(shared: SharedMbuf<U>) -> Result<Self, SharedMbuf<U>> {
        Rc::try_unwrap(shared)
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    pub fn beg(&self) -> usize {
        self.beg
    }

    pub fn cur(&self) -> usize {
        self.cur
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Capacity (`max`).
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Payload length (`end - beg`).
    pub fn len(&self) -> usize {
        self.end - self.beg
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.beg
    }

    /// Bytes left to read (`end - cur`).
    pub fn available(&self) -> usize {
        self.end - self.cur
    }

    /// Bytes left to write (`max - cur`).
    pub fn room(&self) -> usize {
        self.data.len() - self.cur
    }

    /// True while the buffer is linked into a queue.
    pub fn is_queued(&self) -> bool {
        self.member.is_some()
    }

    fn cursor_error(&self, beg: usize, cur: usize, end: usize) -> MbufError {
        MbufError::Cursor {
            beg,
            cur,
            end,
            max: self.data.len(),
        }
    }

    fn set_cursors(&mut self, beg: usize, cur: usize, end: usize) -> Result<(), MbufError> {
        if beg <= cur && cur <= end && end <= self.data.len() {
            self.beg = beg;
            self.cur = cur;
            self.end = end;
            Ok(())
        } else {
            Err(self.cursor_error(beg, cur, end))
        }
    }

    pub fn set_beg(&mut self, beg: usize) -> Result<(), MbufError> {
        self.set_cursors(beg, self.cur, self.end)
    }

    pub fn set_cur(&mut self, cur: usize) -> Result<(), MbufError> {
        self.set_cursors(self.beg, cur, self.end)
    }

    pub fn set_end(&mut self, end: usize) -> Result<(), MbufError> {
        self.set_cursors(self.beg, self.cur, end)
    }

    /// Advance `cur` by `n` bytes without reading them.
    pub fn skip(&mut self, n: usize) -> Result<(), MbufError> {
        if n > self.available() {
            return Err(MbufError::Underrun {
                want: n,
                have: self.available(),
            });
        }
        self.cur += n;
        Ok(())
    }

    /// Move `cur` back to `beg`.
    pub fn rewind(&mut self) {
        self.cur = self.beg;
    }

    /// Empty the buffer (`beg = cur = end = 0`).
    pub fn reset(&mut self) {
        self.beg = 0;
        self.cur = 0;
        self.end = 0;
    }

    // ========================================================================
    // User record
    // ========================================================================

    pub fn user(&self) -> &U {
        &self.user
    }

    pub fn user_mut(&mut self) -> &mut U {
        &mut self.user
    }

    pub fn set_user(&mut self, user: U) {
        self.user = user;
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Payload bytes `[beg, end)`.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.beg..self.end]
    }

    /// Unread bytes `[cur, end)`.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.cur..self.end]
    }

    // ========================================================================
    // Typed access
    // ========================================================================

    fn take<const N: usize>(&mut self) -> Result<[u8; N], MbufError> {
        let have = self.available();
        if N > have {
            return Err(MbufError::Underrun { want: N, have });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.cur..self.cur + N]);
        self.cur += N;
        Ok(out)
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), MbufError> {
        let room = self.room();
        if bytes.len() > room {
            return Err(MbufError::Overrun {
                want: bytes.len(),
                room,
            });
        }
        self.data[self.cur..self.cur + bytes.len()].copy_from_slice(bytes);
        self.cur += bytes.len();
        self.end = self.end.max(self.cur);
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, MbufError> {
        Ok(self.take::<1>()?[0])
    }

    pub fn set_u8(&mut self, value: u8) -> Result<(), MbufError> {
        self.put(&[value])
    }
}

macro_rules! typed_accessors {
    ($($get:ident / $set:ident: $ty:ty, $from:ident, $to:ident;)*) => {
        impl<U> Mbuf<U> {
            $(
                #[doc = concat!("Read a `", stringify!($ty), "` at `cur` (", stringify!($from), ").")]
                pub fn $get(&mut self) -> Result<$ty, MbufError> {
                    let bytes = self.take::<{ std::mem::size_of::<$ty>() }>()?;
                    Ok(<$ty>::$from(bytes))
                }

                #[doc = concat!("Write a `", stringify!($ty), "` at `cur` (", stringify!($to), ").")]
                pub fn $set(&mut self, value: $ty) -> Result<(), MbufError> {
                    self.put(&value.$to())
                }
            )*
        }
    };
}

typed_accessors! {
    get_u16 / set_u16: u16, from_ne_bytes, to_ne_bytes;
    get_u32 / set_u32: u32, from_ne_bytes, to_ne_bytes;
    get_u64 / set_u64: u64, from_ne_bytes, to_ne_bytes;
    get_be16 / set_be16: u16, from_be_bytes, to_be_bytes;
    get_be32 / set_be32: u32, from_be_bytes, to_be_bytes;
    get_be64 / set_be64: u64, from_be_bytes, to_be_bytes;
    get_le16 / set_le16: u16, from_le_bytes, to_le_bytes;
    get_le32 / set_le32: u32, from_le_bytes, to_le_bytes;
    get_le64 / set_le64: u64, from_le_bytes, to_le_bytes;
}

// ============================================================================
// Block access and I/O
// ============================================================================

impl<U> Mbuf<U> {
    /// Copy up to `out.len()` unread bytes into `out`; returns the count.
    pub fn get_bytes(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.available());
        out[..n].copy_from_slice(&self.data[self.cur..self.cur + n]);
        self.cur += n;
        n
    }

    /// Copy as much of `bytes` as fits; returns the count.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.room());
        self.data[self.cur..self.cur + n].copy_from_slice(&bytes[..n]);
        self.cur += n;
        self.end = self.end.max(self.cur);
        n
    }

    /// Copy all of `bytes` or nothing.
    pub fn set_bytes_exact(&mut self, bytes: &[u8]) -> Result<(), MbufError> {
        self.put(bytes)
    }

    /// Write `n` copies of `byte`, truncated to room; returns the count.
    pub fn fill(&mut self, byte: u8, n: usize) -> usize {
        let n = n.min(self.room());
        self.data[self.cur..self.cur + n].fill(byte);
        self.cur += n;
        self.end = self.end.max(self.cur);
        n
    }

    /// Append formatted text at `cur`, truncating at capacity.
    ///
    /// Returns the number of bytes written. Truncation may split a
    /// multi-byte character.
    pub fn append_fmt(&mut self, args: fmt::Arguments<'_>) -> usize {
        struct Sink<'a> {
            buf: &'a mut [u8],
            len: usize,
        }

        impl fmt::Write for Sink<'_> {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                let n = s.len().min(self.buf.len() - self.len);
                self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
                self.len += n;
                if n < s.len() {
                    Err(fmt::Error)
                } else {
                    Ok(())
                }
            }
        }

        let mut sink = Sink {
            buf: &mut self.data[self.cur..],
            len: 0,
        };
        // Err only signals truncation; the written prefix is kept.
        let _ = sink.write_fmt(args);
        let n = sink.len;
        self.cur += n;
        self.end = self.end.max(self.cur);
        n
    }

    /// Read from `src` into the room after `cur`.
    ///
    /// Returns the byte count (0 on end-of-stream or when the buffer is full).
    pub fn read_from<R: Read + ?Sized>(&mut self, src: &mut R) -> io::Result<usize> {
        if self.room() == 0 {
            return Ok(0);
        }
        let n = src.read(&mut self.data[self.cur..])?;
        self.cur += n;
        self.end = self.end.max(self.cur);
        Ok(n)
    }

    /// Write unread bytes `[cur, end)` to `dst`; returns the byte count.
    pub fn write_to<W: Write + ?Sized>(&mut self, dst: &mut W) -> io::Result<usize> {
        if self.available() == 0 {
            return Ok(0);
        }
        let n = dst.write(&self.data[self.cur..self.end])?;
        self.cur += n;
        Ok(n)
    }

    /// Hex dump of the payload, 16 bytes per line.
    pub fn hex_dump(&self) -> String {
        let mut out = String::with_capacity(self.len() * 3 + 8);
        for (line, chunk) in self.payload().chunks(16).enumerate() {
            let _ = write!(out, "{:04x}:", line * 16);
            for byte in chunk {
                let _ = write!(out, " {byte:02x}");
            }
            out.push('\n');
        }
        out
    }
}

impl<U: Clone> Clone for Mbuf<U> {
    /// Deep copy of storage and user record. The copy is not queued.
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            beg: self.beg,
            cur: self.cur,
            end: self.end,
            user: self.user.clone(),
            member: None,
        }
    }
}

impl<U: fmt::Debug> fmt::Debug for Mbuf<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mbuf")
            .field("beg", &self.beg)
            .field("cur", &self.cur)
            .field("end", &self.end)
            .field("max", &self.data.len())
            .field("user", &self.user)
            .field("queued", &self.member.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant<U>(m: &Mbuf<U>) {
        assert!(m.beg() <= m.cur());
        assert!(m.cur() <= m.end());
        assert!(m.end() <= m.capacity());
    }

    #[test]
    fn test_alloc_empty() {
        let m: Mbuf = Mbuf::alloc(64);
        assert_eq!((m.beg(), m.cur(), m.end()), (0, 0, 0));
        assert_eq!(m.capacity(), 64);
        assert!(m.is_empty());
        assert!(!m.is_queued());
    }

    #[test]
    fn test_be16_sequence_fills_buffer() {
        let mut m: Mbuf = Mbuf::alloc(16);
        for value in 0..8u16 {
            m.set_be16(value).expect("room for value");
        }
        assert_eq!(m.end(), m.capacity());

        m.rewind();
        let values: Vec<u16> = (0..8)
            .map(|_| m.get_be16().expect("value present"))
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(m.get_be16().is_err());
    }

    #[test]
    fn test_byte_orders() {
        let mut m: Mbuf = Mbuf::alloc(32);
        m.set_be32(0x0102_0304).expect("be32");
        m.set_le32(0x0102_0304).expect("le32");
        m.set_be64(0x0102_0304_0506_0708).expect("be64");
        assert_eq!(
            &m.payload()[..8],
            &[0x01, 0x02, 0x03, 0x04, 0x04, 0x03, 0x02, 0x01]
        );
        m.rewind();
        assert_eq!(m.get_le32().expect("le32"), 0x0403_0201);
        assert_eq!(m.get_be32().expect("be32"), 0x0403_0201);
        assert_eq!(m.get_be64().expect("be64"), 0x0102_0304_0506_0708);

        let mut h: Mbuf = Mbuf::alloc(8);
        h.set_u32(0xdead_beef).expect("u32");
        h.rewind();
        assert_eq!(h.get_u32().expect("u32"), 0xdead_beef);
    }

    #[test]
    fn test_failed_set_leaves_state() {
        let mut m: Mbuf = Mbuf::alloc(6);
        m.set_be32(7).expect("fits");
        let before = (m.beg(), m.cur(), m.end());

        assert!(matches!(
            m.set_be32(8),
            Err(MbufError::Overrun { want: 4, room: 2 })
        ));
        assert!(m.set_beg(5).is_err());
        assert!(m.set_cur(5).is_err());
        assert!(m.set_end(7).is_err());
        assert!(m.set_end(3).is_err());
        assert_eq!((m.beg(), m.cur(), m.end()), before);
    }

    #[test]
    fn test_random_cursor_ops_keep_invariant() {
        let mut rng = fastrand::Rng::with_seed(0x5d12);
        let mut m: Mbuf = Mbuf::alloc(48);
        for _ in 0..2000 {
            let value = rng.usize(0..=56);
            let _ = match rng.u8(0..6) {
                0 => m.set_beg(value),
                1 => m.set_cur(value),
                2 => m.set_end(value),
                3 => m.set_be32(rng.u32(..)),
                4 => m.get_le16().map(|_| ()),
                _ => m.skip(value % 8),
            };
            assert_invariant(&m);
        }
    }

    #[test]
    fn test_block_access_truncates() {
        let mut m: Mbuf = Mbuf::alloc(4);
        assert_eq!(m.set_bytes(b"abcdef"), 4);
        assert_eq!(m.payload(), b"abcd");

        m.rewind();
        let mut out = [0u8; 8];
        assert_eq!(m.get_bytes(&mut out), 4);
        assert_eq!(&out[..4], b"abcd");

        m.reset();
        assert_eq!(m.fill(0xaa, 10), 4);
        assert_eq!(m.payload(), &[0xaa; 4]);
    }

    #[test]
    fn test_append_fmt_truncates() {
        let mut m: Mbuf = Mbuf::alloc(10);
        assert_eq!(m.append_fmt(format_args!("sid={}", 42)), 6);
        assert_eq!(m.append_fmt(format_args!(" state={}", "NORMAL")), 4);
        assert_eq!(m.payload(), b"sid=42 sta");
        assert_eq!(m.room(), 0);
    }

    #[test]
    fn test_io_bounded() {
        let mut m: Mbuf = Mbuf::alloc(4);
        let mut src: &[u8] = b"123456";
        assert_eq!(m.read_from(&mut src).expect("read"), 4);
        assert_eq!(m.read_from(&mut src).expect("read"), 0);

        m.rewind();
        let mut sink = Vec::new();
        assert_eq!(m.write_to(&mut sink).expect("write"), 4);
        assert_eq!(sink, b"1234");
        assert_eq!(m.available(), 0);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut m: Mbuf<u32> = Mbuf::with_user(8, 7);
        m.set_be16(0x1234).expect("be16");
        m.member = Some(QueueId::next());

        let mut copy = m.clone();
        assert!(!copy.is_queued());
        assert_eq!(*copy.user(), 7);
        copy.set_cur(0).expect("rewind");
        copy.set_be16(0xffff).expect("overwrite");
        assert_eq!(m.payload(), &[0x12, 0x34]);
        assert_eq!(copy.payload(), &[0xff, 0xff]);
    }

    #[test]
    fn test_share_and_unshare() {
        let shared = Mbuf::<()>::from_bytes(b"hi").share();
        let other = Rc::clone(&shared);
        let shared = Mbuf::unshare(shared).expect_err("two handles");
        drop(other);
        let owned = Mbuf::unshare(shared).expect("last handle");
        assert_eq!(owned.payload(), b"hi");
    }

    #[test]
    fn test_hex_dump() {
        let m: Mbuf = Mbuf::from_bytes(&(0u8..18).collect::<Vec<_>>());
        let dump = m.hex_dump();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000: 00 01 02"));
        assert_eq!(lines[1], "0010: 10 11");
    }

    #[test]
    fn test_try_alloc() {
        let m: Mbuf = Mbuf::try_alloc(128).expect("small allocation");
        assert_eq!(m.capacity(), 128);
        assert!(matches!(
            Mbuf::<()>::try_alloc(usize::MAX),
            Err(MbufError::Alloc { .. })
        ));
    }
}
