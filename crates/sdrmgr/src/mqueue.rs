// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! FIFO message queue.
//!
//! A queue owns the buffers linked into it. Enqueue moves a buffer in and
//! stamps it with the queue's [`QueueId`]; dequeue clears the stamp and
//! moves it back out. A stamped buffer is refused by every queue, so a
//! buffer is never linked into two queues at once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::list::List;
use crate::mbuf::Mbuf;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique queue identity used as the membership marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(u64);

impl QueueId {
    pub(crate) fn next() -> Self {
        Self(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// Why an enqueue was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueFailure {
    #[error("buffer already linked into {0}")]
    AlreadyQueued(QueueId),

    #[error("queue full ({0} buffers)")]
    Full(usize),
}

/// Refused enqueue; hands the buffer back to the caller untouched.
#[derive(Error)]
#[error("{reason}")]
pub struct EnqueueError<U> {
    pub reason: EnqueueFailure,
    pub mbuf: Mbuf<U>,
}

impl<U> EnqueueError<U> {
    /// Recover the refused buffer.
    pub fn into_inner(self) -> Mbuf<U> {
        self.mbuf
    }
}

impl<U> fmt::Debug for EnqueueError<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnqueueError")
            .field("reason", &self.reason)
            .field("len", &self.mbuf.len())
            .finish()
    }
}

/// Bounded or unbounded FIFO of buffers.
pub struct MQueue<U = ()> {
    id: QueueId,
    list: List<Mbuf<U>>,
    limit: usize,
}

impl<U> Default for MQueue<U> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<U> MQueue<U> {
    /// Create a queue holding at most `limit` buffers (`0` = unbounded).
    pub fn new(limit: usize) -> Self {
        Self {
            id: QueueId::next(),
            list: List::new(),
            limit,
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Change the bound; buffers already queued are kept.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Number of queued buffers.
    pub fn used(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.limit != 0 && self.list.len() >= self.limit
    }

    fn admit(&self, mbuf: &Mbuf<U>) -> Result<(), EnqueueFailure> {
        if let Some(owner) = mbuf.member {
            return Err(EnqueueFailure::AlreadyQueued(owner));
        }
        if self.is_full() {
            return Err(EnqueueFailure::Full(self.limit));
        }
        Ok(())
    }

    /// Append at the tail.
    pub fn enqueue(&mut self, mut mbuf: Mbuf<U>) -> Result<(), EnqueueError<U>> {
        if let Err(reason) = self.admit(&mbuf) {
            return Err(EnqueueError { reason, mbuf });
        }
        mbuf.member = Some(self.id);
        self.list.push_tail(mbuf);
        Ok(())
    }

    /// Put a buffer back at the head, e.g. after a short write.
    pub fn requeue(&mut self, mut mbuf: Mbuf<U>) -> Result<(), EnqueueError<U>> {
        if let Some(owner) = mbuf.member {
            return Err(EnqueueError {
                reason: EnqueueFailure::AlreadyQueued(owner),
                mbuf,
            });
        }
        mbuf.member = Some(self.id);
        self.list.push_head(mbuf);
        Ok(())
    }

    /// Remove the head buffer.
    pub fn dequeue(&mut self) -> Option<Mbuf<U>> {
        let mut mbuf = self.list.pop_head()?;
        mbuf.member = None;
        Some(mbuf)
    }

    pub fn peek(&self) -> Option<&Mbuf<U>> {
        self.list.head()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mbuf<U>> {
        self.list.iter()
    }

    /// Drop every queued buffer; returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.list.len();
        self.list.drain().for_each(drop);
        n
    }
}

impl<U> fmt::Debug for MQueue<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MQueue")
            .field("id", &self.id)
            .field("used", &self.list.len())
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(bytes: &[u8], user: u16) -> Mbuf<u16> {
        let mut m = Mbuf::with_user(bytes.len() + 4, user);
        m.set_bytes(bytes);
        m
    }

    #[test]
    fn test_round_trip_preserves_payload_and_user() {
        let mut q = MQueue::new(0);
        q.enqueue(msg(b"first", 1)).expect("enqueue");
        q.enqueue(msg(b"second", 2)).expect("enqueue");
        assert_eq!(q.used(), 2);
        assert!(q.peek().expect("head").is_queued());

        let a = q.dequeue().expect("first");
        let b = q.dequeue().expect("second");
        assert!(q.dequeue().is_none());
        assert_eq!((a.payload(), *a.user()), (&b"first"[..], 1));
        assert_eq!((b.payload(), *b.user()), (&b"second"[..], 2));
        assert!(!a.is_queued());
    }

    #[test]
    fn test_marked_buffer_is_refused() {
        let mut q1: MQueue<u16> = MQueue::new(0);
        let mut q2: MQueue<u16> = MQueue::new(0);
        let mut m = msg(b"x", 9);
        m.member = Some(q1.id());

        let err = q2.enqueue(m).expect_err("already marked");
        assert_eq!(err.reason, EnqueueFailure::AlreadyQueued(q1.id()));
        assert_eq!(q1.used(), 0);
        assert_eq!(q2.used(), 0);

        let m = err.into_inner();
        assert_eq!(m.payload(), b"x");
        assert!(q1.requeue(m).is_err());
    }

    #[test]
    fn test_bounded_queue() {
        let mut q = MQueue::new(2);
        q.enqueue(msg(b"a", 0)).expect("1");
        q.enqueue(msg(b"b", 0)).expect("2");
        assert!(q.is_full());

        let err = q.enqueue(msg(b"c", 0)).expect_err("full");
        assert_eq!(err.reason, EnqueueFailure::Full(2));
        assert!(!err.mbuf.is_queued());
        assert_eq!(q.used(), 2);
    }

    #[test]
    fn test_requeue_goes_to_head() {
        let mut q = MQueue::new(1);
        q.enqueue(msg(b"tail", 0)).expect("enqueue");
        q.requeue(msg(b"head", 0)).expect("requeue ignores limit");
        assert_eq!(q.dequeue().expect("head").payload(), b"head");
        assert_eq!(q.clear(), 1);
        assert!(q.is_empty());
    }
}
