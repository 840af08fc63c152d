//! Per-node mutable state.
//!
//! The state is owned by the node's event loop and mutated by handlers
//! between suspension points; it never crosses a lock boundary while a
//! network call is in flight.

use ostinato_transport::envelope::{Envelope, Payload};
use ostinato_types::NodeRef;

use crate::finger::FingerTable;

/// Everything a node knows about itself and its neighborhood.
#[derive(Clone, Debug)]
pub struct NodeState {
    /// This node's own reference.
    pub auto_ref: NodeRef,
    /// Counter-clockwise neighbor. Starts as `auto_ref`.
    pub predecessor: NodeRef,
    /// Clockwise neighbor. Starts as `auto_ref`.
    pub successor: NodeRef,
    /// The `m`-entry finger table.
    pub fingers: FingerTable,
    /// Epoch token shared by every node in the ring, rotated on each global
    /// finger refresh.
    pub ring_signature: String,
    /// Set when a peer asked for a deferred global refresh; the stabilizer
    /// performs the walk on its next tick, coalescing bursts.
    pub refresh_pending: bool,
    /// Last known successor of the successor, promoted when the successor
    /// dies.
    pub fallback: NodeRef,
    /// One level beyond `fallback`, used when the fallback is gone too.
    pub fallback_next: NodeRef,
}

impl NodeState {
    /// Fresh state for a node that has not joined anything yet: every
    /// reference points at the node itself.
    pub fn new(auto_ref: NodeRef) -> Self {
        let fingers = FingerTable::new(&auto_ref);
        Self {
            predecessor: auto_ref.clone(),
            successor: auto_ref.clone(),
            fallback: auto_ref.clone(),
            fallback_next: auto_ref.clone(),
            fingers,
            ring_signature: new_signature(),
            refresh_pending: false,
            auto_ref,
        }
    }

    /// A ring of one: predecessor, self and successor all coincide.
    pub fn is_solitary(&self) -> bool {
        self.predecessor.same_id(&self.auto_ref) && self.successor.same_id(&self.auto_ref)
    }

    /// Identifier bit length of this ring.
    pub fn id_bitlen(&self) -> u8 {
        self.auto_ref.id_bitlen
    }

    /// Build an envelope signed with the current ring signature.
    pub fn envelope(&self, payload: Payload) -> Envelope {
        Envelope::new(self.auto_ref.node_id, self.ring_signature.clone(), payload)
    }

    /// Build an envelope with an empty signature, for multicast probes and
    /// signature-rejection replies.
    pub fn unsigned_envelope(&self, payload: Payload) -> Envelope {
        Envelope::new(self.auto_ref.node_id, "", payload)
    }
}

/// Generate a fresh ring signature token.
pub fn new_signature() -> String {
    let mut token = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut token);
    hex::encode(token)
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
    fn test_fresh_state_is_solitary() {
        let state = NodeState::new(node(10));
        assert!(state.is_solitary());
        assert_eq!(state.fingers.len(), 8);
        assert!(!state.refresh_pending);
        assert!(!state.ring_signature.is_empty());
    }

    #[test]
    fn test_joined_state_is_not_solitary() {
        let mut state = NodeState::new(node(10));
        state.successor = node(100);
        state.predecessor = node(100);
        assert!(!state.is_solitary());
    }

    #[test]
    fn test_signatures_are_unique() {
        assert_ne!(new_signature(), new_signature());
    }

    #[test]
    fn test_envelope_carries_signature() {
        let state = NodeState::new(node(10));
        let env = state.envelope(Payload::Ping);
        assert_eq!(env.source_id, 10);
        assert_eq!(env.ring_signature, state.ring_signature);

        let probe = state.unsigned_envelope(Payload::Multicast);
        assert!(probe.ring_signature.is_empty());
    }
}
