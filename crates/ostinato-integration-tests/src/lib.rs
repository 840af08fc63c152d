//! In-memory multi-node harness for overlay protocol tests.
//!
//! [`LoopbackMesh`] implements the engine's [`Messenger`] seam by routing
//! envelopes straight into the target node's dispatcher, so whole rings
//! form, stabilize and replicate inside one test process without a single
//! socket. Nodes can be marked dead to exercise failure recovery.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use ostinato_ring::messenger::Messenger;
use ostinato_ring::node::RingNode;
use ostinato_transport::envelope::{Envelope, Payload};
use ostinato_types::{ring_mask, NodeRef, RingId};

/// Every mesh node listens on the same fixed ring port, like a real
/// deployment; hosts are told apart by synthetic addresses.
pub const RING_PORT: u16 = 4321;

#[derive(Default)]
struct MeshInner {
    nodes: Mutex<HashMap<SocketAddr, Arc<RingNode<LoopbackMesh>>>>,
    down: Mutex<HashSet<SocketAddr>>,
}

/// A messenger that delivers envelopes to in-process nodes.
#[derive(Clone, Default)]
pub struct LoopbackMesh {
    inner: Arc<MeshInner>,
}

impl LoopbackMesh {
    /// An empty mesh.
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, addr: SocketAddr) -> Option<Arc<RingNode<LoopbackMesh>>> {
        if self.inner.down.lock().expect("mesh lock").contains(&addr) {
            return None;
        }
        self.inner.nodes.lock().expect("mesh lock").get(&addr).cloned()
    }

    fn register(&self, addr: SocketAddr, node: Arc<RingNode<LoopbackMesh>>) {
        self.inner.nodes.lock().expect("mesh lock").insert(addr, node);
    }

    /// Make a node unreachable, as if its host died.
    pub fn kill(&self, node: &NodeRef) {
        self.inner.down.lock().expect("mesh lock").insert(node.addr());
    }
}

impl Messenger for LoopbackMesh {
    fn request(
        &self,
        target: &NodeRef,
        env: Envelope,
    ) -> impl Future<Output = Option<Envelope>> + Send {
        let node = self.lookup(target.addr());
        async move {
            let node = node?;
            // Boxing erases the dispatcher's future type; without it the
            // request/handle recursion could not be expressed.
            let fut: Pin<Box<dyn Future<Output = Option<Envelope>> + Send>> =
                Box::pin(async move { node.handle_rpc(env).await });
            fut.await
        }
    }

    fn push_blob(
        &self,
        target: &NodeRef,
        env: Envelope,
        path: &Path,
    ) -> impl Future<Output = bool> + Send {
        let node = self.lookup(target.addr());
        let bytes = std::fs::read(path);
        async move {
            let Some(node) = node else { return false };
            let Ok(bytes) = bytes else { return false };
            let signature = env.ring_signature.clone();
            let Payload::SendFileReq { blob_id, size } = env.payload else {
                return false;
            };
            // Mirror the real listener: a stale signature refuses the
            // transfer before any byte moves.
            if node.ring_signature().await != signature {
                return false;
            }
            if bytes.len() as u64 != size {
                return false;
            }
            node.store_blob(&blob_id, &bytes).await.is_ok()
        }
    }
}

/// A test ring: mesh plus per-node blob directories under one tempdir.
pub struct TestRing {
    mesh: LoopbackMesh,
    root: tempfile::TempDir,
    next_host: AtomicU8,
}

impl TestRing {
    /// Create an empty test ring.
    pub fn new() -> Self {
        Self {
            mesh: LoopbackMesh::new(),
            root: tempfile::tempdir().expect("tempdir"),
            next_host: AtomicU8::new(1),
        }
    }

    /// The underlying mesh, for failure injection.
    pub fn mesh(&self) -> &LoopbackMesh {
        &self.mesh
    }

    /// Spawn a solitary node with an explicit ring identifier.
    pub fn spawn_node(&self, id: RingId, bitlen: u8, k: usize) -> Arc<RingNode<LoopbackMesh>> {
        let host = self.next_host.fetch_add(1, Ordering::SeqCst);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, host));
        let auto_ref = NodeRef::new(ip, RING_PORT, id, bitlen);

        let node = Arc::new(
            RingNode::new(
                auto_ref.clone(),
                self.root.path().join(format!("node-{id}")),
                self.mesh.clone(),
            )
            .expect("node")
            .with_replication_factor(k),
        );
        self.mesh.register(auto_ref.addr(), Arc::clone(&node));
        node
    }
}

impl Default for TestRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Ground truth for finger checks: the live identifier closest clockwise
/// from `target` (inclusive).
pub fn naive_successor(ids: &[RingId], target: RingId, bitlen: u8) -> RingId {
    let mask = ring_mask(bitlen);
    ids.iter()
        .copied()
        .min_by_key(|id| id.wrapping_sub(target) & mask)
        .expect("at least one node")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naive_successor() {
        let ids = [10, 100, 200];
        assert_eq!(naive_successor(&ids, 50, 8), 100);
        assert_eq!(naive_successor(&ids, 100, 8), 100);
        assert_eq!(naive_successor(&ids, 201, 8), 10);
        assert_eq!(naive_successor(&ids, 5, 8), 10);
    }

    #[tokio::test]
    async fn test_mesh_routes_to_registered_nodes() {
        let ring = TestRing::new();
        let node = ring.spawn_node(10, 8, 3);
        let auto = node.self_ref().await;
        let sig = node.ring_signature().await;

        let reply = ring
            .mesh()
            .request(&auto, Envelope::new(99, sig, Payload::Ping))
            .await
            .expect("reply");
        assert!(matches!(reply.payload, Payload::PingResp { .. }));

        ring.mesh().kill(&auto);
        let sig = node.ring_signature().await;
        assert!(ring
            .mesh()
            .request(&auto, Envelope::new(99, sig, Payload::Ping))
            .await
            .is_none());
    }
}
