//! Tree routing table
//!
//! The base assigns every device a contiguous interval `[address, maxRoute]`
//! covering its whole subtree. Routing toward a device is therefore a scan
//! for the first row whose interval contains the destination; intervals of
//! distinct rows are disjoint by construction, so scan order is not
//! observable.

use crate::neighbor::Neighbor;
use serde::{Deserialize, Serialize};

/// One downstream route: all addresses in `[address, max_route]` are
/// reachable through `link`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Address of the child device itself (lower bound of its range).
    pub address: u8,
    /// Upper bound of the child's subtree range, inclusive.
    pub max_route: u8,
    /// Next hop toward the child.
    pub link: Neighbor,
}

impl RouteEntry {
    /// Whether `address` falls inside this entry's range.
    pub fn covers(&self, address: u8) -> bool {
        self.address <= address && address <= self.max_route
    }
}

/// Bounded routing table, permanent for the lifetime of one active network
/// configuration.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
    capacity: usize,
}

impl RoutingTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry. Returns `false` (and stores nothing) when full.
    pub fn insert(&mut self, entry: RouteEntry) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// First entry whose range covers `address`.
    pub fn lookup(&self, address: u8) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.covers(address))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Drop all routes. Called when the node cuts over to a new active
    /// configuration, whose address plan owes nothing to the old one.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
