// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Routing record carried by every message buffer.
//!
//! The record never goes on the wire. Controls fill in where a message came
//! from (control + slot) on receive; the daemon fills in the destination
//! worker on southbound dispatch and copies the owner route back on
//! northbound dispatch.

use std::fmt;

use crate::mbuf::Mbuf;

/// Identity of a control instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(pub u32);

/// Identity of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Where a message came from or is going to.
///
/// `slot` is the control-specific peer: a client connection for the unix
/// control, a node address for SRIO. `None` on an outbound message means
/// every peer of the control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Route {
    pub control: Option<ControlId>,
    pub slot: Option<u32>,
    pub worker: Option<WorkerId>,
}

impl Route {
    pub fn from_control(control: ControlId, slot: u32) -> Self {
        Self {
            control: Some(control),
            slot: Some(slot),
            worker: None,
        }
    }

    /// Same client endpoint (control and slot).
    pub fn same_peer(&self, other: &Route) -> bool {
        self.control == other.control && self.slot == other.slot
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.control {
            Some(c) => write!(f, "{c}")?,
            None => f.write_str("-")?,
        }
        match self.slot {
            Some(s) => write!(f, ":{s}")?,
            None => f.write_str(":*")?,
        }
        if let Some(w) = self.worker {
            write!(f, "->{w}")?;
        }
        Ok(())
    }
}

/// A routed message.
pub type Msg = Mbuf<Route>;

/// Per-instance traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub rx_msgs: u64,
    pub rx_bytes: u64,
    pub tx_msgs: u64,
    pub tx_bytes: u64,
    pub dropped: u64,
}

impl Stats {
    pub fn record_rx(&mut self, bytes: usize) {
        self.rx_msgs += 1;
        self.rx_bytes += bytes as u64;
    }

    pub fn record_tx(&mut self, bytes: usize) {
        self.tx_msgs += 1;
        self.tx_bytes += bytes as u64;
    }

    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx {}/{}B tx {}/{}B dropped {}",
            self.rx_msgs, self.rx_bytes, self.tx_msgs, self.tx_bytes, self.dropped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_display() {
        let mut route = Route::from_control(ControlId(2), 5);
        assert_eq!(route.to_string(), "c2:5");
        route.worker = Some(WorkerId(7));
        assert_eq!(route.to_string(), "c2:5->w7");
        assert_eq!(Route::default().to_string(), "-:*");
    }

    #[test]
    fn test_same_peer_ignores_worker() {
        let a = Route::from_control(ControlId(1), 3);
        let mut b = a;
        b.worker = Some(WorkerId(1));
        assert!(a.same_peer(&b));
        assert!(!a.same_peer(&Route::from_control(ControlId(1), 4)));
    }

    #[test]
    fn test_stats() {
        let mut stats = Stats::default();
        stats.record_rx(100);
        stats.record_tx(40);
        stats.record_drop();
        assert_eq!(stats.to_string(), "rx 1/100B tx 1/40B dropped 1");
    }
}
