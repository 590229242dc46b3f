//! Neighbors and the transient child table
//!
//! A neighbor is the `(interface, mac)` pair an L2 driver uses to reach a
//! directly connected peer. During a beacon wave every prospective child
//! that answers with a valid `BeaconChildResponse` is parked in the
//! [`ChildTable`] until the base assigns it an address, at which point the
//! row is consumed into the routing table.

use serde::{Deserialize, Serialize};

/// Index of an attached L2 driver.
pub type InterfaceId = u8;

/// L2 address as seen by this stack; opaque 8-bit value.
pub type MacAddr = u8;

/// Reserved MAC meaning "broadcast on this interface". Valid only on
/// transmit; frames received from this address are dropped.
pub const BROADCAST_MAC: MacAddr = 0;

/// A directly reachable peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub iface: InterfaceId,
    pub mac: MacAddr,
}

impl Neighbor {
    pub fn new(iface: InterfaceId, mac: MacAddr) -> Self {
        Self { iface, mac }
    }
}

/// A prospective child awaiting address assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    /// The nonce the child chose for the current beacon wave.
    pub child_nonce: u32,
    /// How to reach the child.
    pub link: Neighbor,
}

/// Bounded table of prospective children, populated during a beacon wave.
///
/// Insertion into a full table is refused; the caller drops the frame.
#[derive(Debug, Clone)]
pub struct ChildTable {
    entries: Vec<ChildEntry>,
    capacity: usize,
}

impl ChildTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry. Returns `false` (and stores nothing) when full.
    pub fn insert(&mut self, entry: ChildEntry) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Whether a row with this nonce is present.
    pub fn contains(&self, child_nonce: u32) -> bool {
        self.entries.iter().any(|e| e.child_nonce == child_nonce)
    }

    /// Remove and return the row with this nonce, if any.
    pub fn take(&mut self, child_nonce: u32) -> Option<ChildEntry> {
        let at = self
            .entries
            .iter()
            .position(|e| e.child_nonce == child_nonce)?;
        Some(self.entries.remove(at))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildEntry> {
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

    /// Drop all rows. Called when a fresh beacon wave supersedes the one the
    /// rows belong to.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(nonce: u32, mac: MacAddr) -> ChildEntry {
        ChildEntry {
            child_nonce: nonce,
            link: Neighbor::new(0, mac),
        }
    }

    #[test]
    fn test_insert_and_take() {
        let mut table = ChildTable::new(3);
        assert!(table.insert(entry(10, 1)));
        assert!(table.insert(entry(20, 2)));
        assert_eq!(table.len(), 2);
        assert!(table.contains(20));

        let taken = table.take(10).unwrap();
        assert_eq!(taken.link.mac, 1);
        assert_eq!(table.len(), 1);
        assert!(!table.contains(10));
        assert!(table.take(10).is_none());
    }

    #[test]
    fn test_refuses_when_full() {
        let mut table = ChildTable::new(2);
        assert!(table.insert(entry(1, 1)));
        assert!(table.insert(entry(2, 2)));
        assert!(table.is_full());
        assert!(!table.insert(entry(3, 3)));
        assert_eq!(table.len(), 2);
        assert!(!table.contains(3));
    }

    #[test]
    fn test_clear() {
        let mut table = ChildTable::new(2);
        table.insert(entry(1, 1));
        table.clear();
        assert!(table.is_empty());
        assert!(!table.is_full());
    }
}
