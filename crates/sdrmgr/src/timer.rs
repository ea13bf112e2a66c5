// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timers serviced by the event loop.
//!
//! The active list is kept sorted by due time. Each loop iteration calls
//! [`TimerList::expire`] to collect due events (bounded per iteration) and
//! [`TimerList::timeout`] to size the next wait. Periodic timers are
//! re-armed from their previous due time, so they do not drift.

use std::time::{Duration, Instant};

use crate::list::List;

/// Handle returned by [`TimerList::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Entry<E> {
    due: Instant,
    id: TimerId,
    period: Option<Duration>,
    event: E,
}

/// Due-time ordered list of pending events.
#[derive(Debug)]
pub struct TimerList<E> {
    active: List<Entry<E>>,
    next_id: u64,
}

impl<E> Default for TimerList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerList<E> {
    pub fn new() -> Self {
        Self {
            active: List::new(),
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn insert(&mut self, due: Instant, period: Option<Duration>, event: E) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.arm(Entry {
            due,
            id,
            period,
            event,
        });
        id
    }

    fn arm(&mut self, entry: Entry<E>) {
        self.active.insert_ordered(entry, |a, b| a.due.cmp(&b.due));
    }

    /// Fire `event` once at `due`.
    pub fn add(&mut self, due: Instant, event: E) -> TimerId {
        self.insert(due, None, event)
    }

    /// Fire `event` every `period`, first at `now + period`.
    ///
    /// A zero period is rounded up to one millisecond.
    pub fn add_periodic(&mut self, now: Instant, period: Duration, event: E) -> TimerId {
        let period = period.max(Duration::from_millis(1));
        self.insert(now + period, Some(period), event)
    }

    /// Remove a pending timer; returns its event.
    pub fn cancel(&mut self, id: TimerId) -> Option<E> {
        let index = self.active.position(|entry| entry.id == id)?;
        self.active.remove(index).map(|entry| entry.event)
    }

    /// Earliest due time.
    pub fn next_due(&self) -> Option<Instant> {
        self.active.head().map(|entry| entry.due)
    }

    /// Wait bound for the next poll, clamped to `[min, max]`.
    pub fn timeout(&self, now: Instant, min: Duration, max: Duration) -> Duration {
        match self.next_due() {
            Some(due) => due.saturating_duration_since(now).clamp(min, max),
            None => max,
        }
    }
}

impl<E: Clone> TimerList<E> {
    /// Pop up to `limit` due events (`0` = no limit), re-arming periodic ones.
    pub fn expire(&mut self, now: Instant, limit: usize) -> Vec<E> {
        let mut fired = Vec::new();
        while limit == 0 || fired.len() < limit {
            match self.active.head() {
                Some(entry) if entry.due <= now => {}
                _ => break,
            }
            let Some(mut entry) = self.active.pop_head() else {
                break;
            };
            fired.push(entry.event.clone());
            if let Some(period) = entry.period {
                entry.due += period;
                if entry.due <= now {
                    // Fell behind by more than one period; skip the backlog.
                    entry.due = now + period;
                }
                self.arm(entry);
            }
        }
        fired
    }
}
