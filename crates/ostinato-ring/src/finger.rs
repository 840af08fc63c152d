//! The finger table: `m` shortcut references around the ring.
//!
//! Entry `i` names the node owning at least identifier
//! `(self.id + 2^i) mod 2^m`. Entries start out pointing at the local node
//! and are rewritten by static ownership updates as the ring is learned.

use ostinato_types::{is_in_arc, ring_add, NodeRef, RingId};

/// Fixed-length table of `m` node references.
#[derive(Clone, Debug)]
pub struct FingerTable {
    node_id: RingId,
    id_bitlen: u8,
    entries: Vec<NodeRef>,
}

impl FingerTable {
    /// Create a table whose entries all point at the owning node itself.
    pub fn new(auto_ref: &NodeRef) -> Self {
        Self {
            node_id: auto_ref.node_id,
            id_bitlen: auto_ref.id_bitlen,
            entries: vec![auto_ref.clone(); usize::from(auto_ref.id_bitlen)],
        }
    }

    /// Number of entries (`m`).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries (only for `m = 0`, which no ring
    /// uses; kept for container-trait symmetry).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ring position entry `i` is responsible for:
    /// `(self.id + 2^i) mod 2^m`.
    pub fn entry_target(&self, i: usize) -> RingId {
        ring_add(self.node_id, 1u64 << i, self.id_bitlen)
    }

    /// Entry `i`, if in range.
    pub fn get(&self, i: usize) -> Option<&NodeRef> {
        self.entries.get(i)
    }

    /// Iterate entries in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeRef> {
        self.entries.iter()
    }

    /// Static ownership update: every entry whose target lies on the arc
    /// `[from, to]` is rewritten to `owner`. Returns how many entries
    /// changed hands. Applying the same update twice is a no-op.
    pub fn update_range(&mut self, from: RingId, to: RingId, owner: &NodeRef) -> usize {
        let mut updated = 0;
        for i in 0..self.entries.len() {
            if is_in_arc(self.entry_target(i), from, to) && !self.entries[i].same_id(owner) {
                self.entries[i] = owner.clone();
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn node(id: u64) -> NodeRef {
        let ip: IpAddr = "127.0.0.1".parse().expect("ip");
        NodeRef::new(ip, 4321, id, 8)
    }

    #[test]
    fn test_new_points_at_self() {
        let table = FingerTable::new(&node(10));
        assert_eq!(table.len(), 8);
        assert!(table.iter().all(|e| e.node_id == 10));
    }

    #[test]
    fn test_entry_targets() {
        let table = FingerTable::new(&node(10));
        assert_eq!(table.entry_target(0), 11);
        assert_eq!(table.entry_target(5), 42);
        assert_eq!(table.entry_target(7), 138);

        // Targets wrap around the top of the ring.
        let high = FingerTable::new(&node(200));
        assert_eq!(high.entry_target(7), 72);
    }

    #[test]
    fn test_update_range_rewrites_covered_entries() {
        let mut table = FingerTable::new(&node(10));
        let owner = node(100);

        // Targets 11, 12, 14, 18, 26, 42, 74 fall in [11, 100]; 138 does not.
        let updated = table.update_range(11, 100, &owner);
        assert_eq!(updated, 7);
        for i in 0..7 {
            assert_eq!(table.get(i).expect("entry").node_id, 100);
        }
        assert_eq!(table.get(7).expect("entry").node_id, 10);
    }

    #[test]
    fn test_update_range_wraparound_arc() {
        let mut table = FingerTable::new(&node(200));
        let owner = node(10);

        // Targets of node 200: 201, 202, 204, 208, 216, 232, 8, 72.
        // The arc [233, 10] wraps and covers only target 8.
        let updated = table.update_range(233, 10, &owner);
        assert_eq!(updated, 1);
        assert_eq!(table.get(6).expect("entry").node_id, 10);
    }

    #[test]
    fn test_update_range_is_idempotent() {
        let mut table = FingerTable::new(&node(10));
        let owner = node(100);

        let first = table.update_range(11, 100, &owner);
        assert!(first > 0);
        let second = table.update_range(11, 100, &owner);
        assert_eq!(second, 0);
    }
}
