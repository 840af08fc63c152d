//! The overlay engine: routing, membership, maintenance and replication.
//!
//! [`RingNode`] owns the node state behind an async mutex. Handlers and the
//! stabilizer mutate it between suspension points; the lock is never held
//! across a network call, so a node can serve an incoming request while one
//! of its own requests is in flight (including requests to itself).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ostinato_transport::envelope::{Envelope, Payload};
use ostinato_transport::tls::SecureChannel;
use ostinato_types::{id_from_hex, is_in_arc, ring_add, ring_mask, NodeRef, RingId};

use crate::messenger::Messenger;
use crate::state::{self, NodeState};
use crate::store::BlobStore;
use crate::{Result, RingError, PING_TIMEOUT_SECS, REPLICATION_FACTOR};

/// A single ring endpoint. One instance exists per process.
pub struct RingNode<M: Messenger> {
    state: Mutex<NodeState>,
    store: BlobStore,
    messenger: M,
    replication_factor: usize,
}

impl<M: Messenger> RingNode<M> {
    /// Create a node with freshly generated solitary state.
    pub fn new(auto_ref: NodeRef, blob_dir: impl Into<PathBuf>, messenger: M) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(NodeState::new(auto_ref)),
            store: BlobStore::open(blob_dir)?,
            messenger,
            replication_factor: REPLICATION_FACTOR,
        })
    }

    /// Override the replication factor `K` (defaults to
    /// [`REPLICATION_FACTOR`]).
    pub fn with_replication_factor(mut self, k: usize) -> Self {
        self.replication_factor = k;
        self
    }

    /// This node's own reference.
    pub async fn self_ref(&self) -> NodeRef {
        self.state.lock().await.auto_ref.clone()
    }

    /// Current successor.
    pub async fn successor(&self) -> NodeRef {
        self.state.lock().await.successor.clone()
    }

    /// Current predecessor.
    pub async fn predecessor(&self) -> NodeRef {
        self.state.lock().await.predecessor.clone()
    }

    /// Current ring signature. The HTTP forwarder compares this against the
    /// signature it stamped on a request to detect forwarding loops.
    pub async fn ring_signature(&self) -> String {
        self.state.lock().await.ring_signature.clone()
    }

    /// Snapshot of the finger table, for diagnostics and tests.
    pub async fn fingers(&self) -> Vec<NodeRef> {
        self.state.lock().await.fingers.iter().cloned().collect()
    }

    /// The node's blob store.
    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    // -----------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------

    /// Resolve the node responsible for `target`.
    ///
    /// Answers locally when the target falls in this node's or the
    /// successor's arc; otherwise forwards to the closest preceding finger.
    pub async fn find_successor(&self, target: RingId) -> Result<NodeRef> {
        let (hop, env) = {
            let st = self.state.lock().await;
            let bitlen = st.id_bitlen();
            if is_in_arc(
                target,
                ring_add(st.predecessor.node_id, 1, bitlen),
                st.auto_ref.node_id,
            ) {
                return Ok(st.auto_ref.clone());
            }
            if is_in_arc(
                target,
                ring_add(st.auto_ref.node_id, 1, bitlen),
                st.successor.node_id,
            ) {
                return Ok(st.successor.clone());
            }

            // Greatest finger strictly preceding the target; the successor
            // is the floor when no finger is closer.
            let mut best = st.successor.clone();
            for entry in st.fingers.iter() {
                if is_in_arc(target, st.auto_ref.node_id, entry.node_id) {
                    break;
                }
                best = entry.clone();
            }
            let env = st.envelope(Payload::SuccReq { target });
            (best, env)
        };

        match self.messenger.request(&hop, env).await {
            Some(Envelope {
                payload: Payload::SuccResp {
                    success: true,
                    node,
                },
                ..
            }) => Ok(node),
            Some(_) | None => Err(RingError::Unreachable { addr: hop.addr() }),
        }
    }

    /// Resolve the successor of `key_bytes` hashed onto the ring.
    pub async fn find_successor_for_key(&self, key: &[u8]) -> Result<NodeRef> {
        let bitlen = { self.state.lock().await.id_bitlen() };
        self.find_successor(ostinato_types::hash_id(key, bitlen)).await
    }

    /// Resolve the predecessor of the node owning `target`: first route to
    /// the owner, then ask it for its current predecessor.
    pub async fn find_predecessor(&self, target: RingId) -> Result<NodeRef> {
        let owner = self.find_successor(target).await?;
        let env = {
            let st = self.state.lock().await;
            if owner.same_id(&st.auto_ref) {
                return Ok(st.predecessor.clone());
            }
            st.envelope(Payload::PredReq { target })
        };
        match self.messenger.request(&owner, env).await {
            Some(Envelope {
                payload: Payload::PredResp { node },
                ..
            }) => Ok(node),
            Some(_) | None => Err(RingError::Unreachable { addr: owner.addr() }),
        }
    }

    // -----------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------

    /// Join an existing ring through any known member.
    pub async fn request_join(&self, seed: SocketAddr) -> Result<()> {
        let (env, bitlen) = {
            let st = self.state.lock().await;
            (
                st.envelope(Payload::JoinReq {
                    joiner: st.auto_ref.clone(),
                }),
                st.id_bitlen(),
            )
        };
        let target = NodeRef::from_endpoint(seed.ip(), seed.port(), bitlen);

        let resp = self
            .messenger
            .request(&target, env)
            .await
            .ok_or(RingError::Unreachable { addr: seed })?;

        match resp.payload {
            Payload::JoinResp {
                success: true,
                successor: Some(successor),
                predecessor: Some(predecessor),
                ..
            } => {
                {
                    let mut st = self.state.lock().await;
                    st.successor = successor;
                    st.predecessor = predecessor;
                    st.ring_signature = resp.ring_signature;
                }
                self.update_all_finger_tables(None).await?;
                info!("joined the ring");
                Ok(())
            }
            Payload::JoinResp { message, .. } => Err(RingError::JoinRefused(message)),
            _ => Err(RingError::UnexpectedPayload("join response")),
        }
    }

    /// Place a discovered solitary node into this ring.
    ///
    /// Driven by the existing member: compute where the newcomer belongs,
    /// claim it with an adoption request, then wire up the neighbor links
    /// on both sides. Aborts quietly if the newcomer is no longer solitary.
    pub async fn join_node(&self, discovered: NodeRef) {
        let succ = match self.find_successor(discovered.node_id).await {
            Ok(s) => s,
            Err(e) => {
                debug!(node = %discovered, error = %e, "placement lookup failed");
                return;
            }
        };
        if succ.node_id == discovered.node_id {
            // Already part of the ring (or our own probe echoed back).
            return;
        }
        let pred = match self.find_predecessor(succ.node_id).await {
            Ok(p) => p,
            Err(e) => {
                debug!(node = %discovered, error = %e, "predecessor lookup failed");
                return;
            }
        };

        let env = { self.state.lock().await.envelope(Payload::AdoptReq) };
        let adopted = matches!(
            self.messenger.request(&discovered, env).await,
            Some(Envelope {
                payload: Payload::GenericResp { success: true, .. },
                ..
            })
        );
        if !adopted {
            debug!(node = %discovered, "node refused adoption");
            return;
        }

        self.request_update_successor(&discovered, succ.clone()).await;
        self.request_update_predecessor(&discovered, pred.clone()).await;
        self.request_update_successor(&pred, discovered.clone()).await;
        self.request_update_predecessor(&succ, discovered.clone()).await;

        info!(node = %discovered, "adopted node into the ring");
    }

    /// Announce this node on the LAN and wait for a ring to absorb it.
    ///
    /// Sends one multicast probe with an empty signature, lets adoptions
    /// settle, then runs a global finger refresh over whatever ring the
    /// node ended up in (possibly still just itself).
    pub async fn discover(&self, group: std::net::Ipv4Addr, port: u16) -> Result<()> {
        let env = {
            let st = self.state.lock().await;
            if !st.is_solitary() {
                warn!("discovery skipped: node already belongs to a ring");
                return Ok(());
            }
            st.unsigned_envelope(Payload::Multicast)
        };
        ostinato_transport::multicast::send(group, port, &env).await?;

        tokio::time::sleep(Duration::from_secs(crate::DISCOVERY_SETTLE_SECS)).await;

        if let Err(e) = self.update_all_finger_tables(None).await {
            warn!(error = %e, "finger refresh after discovery failed");
        }

        let (auto, succ) = {
            let st = self.state.lock().await;
            (st.auto_ref.clone(), st.successor.clone())
        };
        if succ.same_id(&auto) {
            info!("no ring found, starting a new one");
        } else {
            info!(successor = %succ, "joined a ring via discovery");
        }
        Ok(())
    }

    /// Tell `target` to replace its successor, short-circuiting when the
    /// target is this node. Fire-and-forget.
    pub async fn request_update_successor(&self, target: &NodeRef, new_successor: NodeRef) {
        let env = {
            let mut st = self.state.lock().await;
            if target.same_id(&st.auto_ref) {
                st.successor = new_successor;
                return;
            }
            st.envelope(Payload::UpdateSuccReq {
                node: new_successor,
            })
        };
        self.messenger.request(target, env).await;
    }

    /// Tell `target` to replace its predecessor, short-circuiting when the
    /// target is this node. Fire-and-forget.
    pub async fn request_update_predecessor(&self, target: &NodeRef, new_predecessor: NodeRef) {
        let env = {
            let mut st = self.state.lock().await;
            if target.same_id(&st.auto_ref) {
                st.predecessor = new_predecessor;
                return;
            }
            st.envelope(Payload::UpdatePredReq {
                node: new_predecessor,
            })
        };
        self.messenger.request(target, env).await;
    }

    // -----------------------------------------------------------------
    // Finger-table maintenance
    // -----------------------------------------------------------------

    /// Install the ownership arc `[from, to] -> owner` into the local
    /// finger table.
    pub async fn update_finger_static(&self, from: RingId, to: RingId, owner: &NodeRef) {
        let mut st = self.state.lock().await;
        let updated = st.fingers.update_range(from, to, owner);
        if updated > 0 {
            debug!(from, to, owner = %owner, entries = updated, "finger entries rewritten");
        }
    }

    /// Propagate an ownership arc to every node on the ring and rotate the
    /// ring signature.
    ///
    /// Walks clockwise from the successor until the walk returns home,
    /// installing the interior arcs it learns along the way into the local
    /// table. `None` announces this node's own default arc
    /// `(predecessor, self]`.
    pub async fn update_all_finger_tables(
        &self,
        range: Option<(RingId, RingId, NodeRef)>,
    ) -> Result<()> {
        let (from, to, owner, auto, mut current, new_signature) = {
            let st = self.state.lock().await;
            let bitlen = st.id_bitlen();
            let (from, to, owner) = range.unwrap_or_else(|| {
                (
                    ring_add(st.predecessor.node_id, 1, bitlen),
                    st.auto_ref.node_id,
                    st.auto_ref.clone(),
                )
            });
            (
                from,
                to,
                owner,
                st.auto_ref.clone(),
                st.successor.clone(),
                state::new_signature(),
            )
        };

        // O(N) messages around the ring; each recipient does O(m) work.
        let mut last = auto.clone();
        while current.node_id != auto.node_id {
            debug!(peer = %current, "propagating finger ownership");

            let interior_from = ring_add(last.node_id, 1, auto.id_bitlen);
            self.update_finger_static(interior_from, current.node_id, &current)
                .await;

            let env = {
                self.state.lock().await.envelope(Payload::UpdateFtableReq {
                    from,
                    to,
                    owner: owner.clone(),
                    new_signature: new_signature.clone(),
                })
            };
            let next = match self.messenger.request(&current, env).await {
                Some(Envelope {
                    payload: Payload::SuccResp {
                        success: true,
                        node,
                    },
                    ..
                }) => node,
                Some(_) | None => {
                    warn!(peer = %current, "finger propagation aborted: peer unreachable");
                    return Err(RingError::Unreachable {
                        addr: current.addr(),
                    });
                }
            };
            last = current;
            current = next;
        }

        {
            let mut st = self.state.lock().await;
            let bitlen = st.id_bitlen();
            let own_from = ring_add(st.predecessor.node_id, 1, bitlen);
            let own_to = st.auto_ref.node_id;
            let auto_ref = st.auto_ref.clone();
            st.fingers.update_range(own_from, own_to, &auto_ref);
            st.ring_signature = new_signature;
        }
        Ok(())
    }

    /// Ask `target` to schedule a deferred global finger refresh.
    pub async fn request_global_refresh(&self, target: &NodeRef) -> bool {
        let env = { self.state.lock().await.envelope(Payload::RefreshReq) };
        matches!(
            self.messenger.request(target, env).await,
            Some(Envelope {
                payload: Payload::GenericResp { success: true, .. },
                ..
            })
        )
    }

    // -----------------------------------------------------------------
    // Stabilization and failure detection
    // -----------------------------------------------------------------

    /// Probe a node's liveness. Returns its `(predecessor, successor)` pair
    /// within the ping deadline, or `None`.
    pub async fn ping_node(&self, target: &NodeRef) -> Option<(NodeRef, NodeRef)> {
        let env = { self.state.lock().await.envelope(Payload::Ping) };
        let resp = tokio::time::timeout(
            Duration::from_secs(PING_TIMEOUT_SECS),
            self.messenger.request(target, env),
        )
        .await
        .ok()??;
        match resp.payload {
            Payload::PingResp {
                predecessor,
                successor,
            } => Some((predecessor, successor)),
            _ => None,
        }
    }

    /// One stabilization tick: deferred refresh, successor liveness,
    /// fallback bookkeeping, repair on failure, replication sweep on
    /// success.
    pub async fn stabilize_tick(&self) {
        let pending = {
            let mut st = self.state.lock().await;
            std::mem::take(&mut st.refresh_pending)
        };
        if pending {
            if let Err(e) = self.update_all_finger_tables(None).await {
                warn!(error = %e, "deferred finger refresh failed");
            }
        }

        let (auto, pred, succ) = {
            let st = self.state.lock().await;
            (
                st.auto_ref.clone(),
                st.predecessor.clone(),
                st.successor.clone(),
            )
        };
        if succ.same_id(&auto) {
            return;
        }

        debug!(
            "pinging successor [{}] -> [{}] -> [{}]",
            pred.node_id, auto.node_id, succ.node_id
        );

        match self.ping_node(&succ).await {
            Some((_, succ_succ)) => {
                {
                    let mut st = self.state.lock().await;
                    st.fallback = succ_succ.clone();
                }
                // Keep a second level of backup alive as well.
                if let Some((_, next)) = self.ping_node(&succ_succ).await {
                    let mut st = self.state.lock().await;
                    st.fallback_next = next;
                }
                self.repair_sweep().await;
            }
            None => {
                warn!(successor = %succ, "successor is unreachable, repairing the ring");

                let (fallback, fallback_next) = {
                    let st = self.state.lock().await;
                    (st.fallback.clone(), st.fallback_next.clone())
                };
                let candidate = if self.ping_node(&fallback).await.is_some() {
                    fallback
                } else {
                    fallback_next
                };

                {
                    let mut st = self.state.lock().await;
                    st.successor = candidate.clone();
                }
                self.request_update_predecessor(&candidate, auto.clone()).await;

                let range = {
                    let st = self.state.lock().await;
                    (
                        ring_add(auto.node_id, 1, st.id_bitlen()),
                        candidate.node_id,
                        candidate.clone(),
                    )
                };
                if let Err(e) = self.update_all_finger_tables(Some(range)).await {
                    warn!(error = %e, "repair announcement failed");
                } else {
                    info!(successor = %candidate, "ring repaired");
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Replication
    // -----------------------------------------------------------------

    /// Up to `k` distinct nodes beginning with `start` (this node when
    /// `None`) and following successors; stops early when the walk wraps
    /// back to `start`.
    pub async fn get_replicants(&self, k: usize, start: Option<NodeRef>) -> Vec<NodeRef> {
        if k == 0 {
            return Vec::new();
        }
        let start = match start {
            Some(s) => s,
            None => self.self_ref().await,
        };
        let bitlen = start.id_bitlen;

        let mut replicants = vec![start.clone()];
        let mut current = start.clone();
        for _ in 1..k {
            let succ = match self
                .find_successor(ring_add(current.node_id, 1, bitlen))
                .await
            {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "replicant walk cut short");
                    break;
                }
            };
            if succ.same_id(&start) {
                break;
            }
            replicants.push(succ.clone());
            current = succ;
        }
        replicants
    }

    /// Persist a blob locally; the next sweep propagates it to the replica
    /// set.
    pub async fn store_blob(&self, blob_id: &str, bytes: &[u8]) -> Result<()> {
        self.store.store(blob_id, bytes).await
    }

    /// Push every locally-owned blob to replicas that are missing it.
    ///
    /// Only blobs whose home falls in this node's ownership arc
    /// `(predecessor, self]` are considered; a blob that landed on a
    /// non-owner through churn-time misrouting stays where it is until its
    /// owner sees it. Best effort by design.
    async fn repair_sweep(&self) {
        let replicants = self.get_replicants(self.replication_factor, None).await;

        let (auto, owned_from) = {
            let st = self.state.lock().await;
            (
                st.auto_ref.clone(),
                ring_add(st.predecessor.node_id, 1, st.id_bitlen()),
            )
        };
        let blob_ids = match self.store.ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "cannot enumerate blob store");
                return;
            }
        };
        if blob_ids.is_empty() {
            return;
        }

        debug!(replicas = replicants.len(), blobs = blob_ids.len(), "replication sweep");

        for replicant in replicants.iter().filter(|r| !r.same_id(&auto)) {
            for blob_id in &blob_ids {
                let Some(home) = id_from_hex(blob_id, auto.id_bitlen) else {
                    continue;
                };
                if !is_in_arc(home, owned_from, auto.node_id) {
                    continue;
                }
                if self.check_blob(blob_id, replicant).await {
                    continue;
                }
                debug!(blob = blob_id, peer = %replicant, "backing up blob");
                self.send_blob(blob_id, replicant).await;
            }
        }
    }

    /// Ask `target` whether it holds `blob_id`.
    async fn check_blob(&self, blob_id: &str, target: &NodeRef) -> bool {
        let env = {
            self.state.lock().await.envelope(Payload::CheckFileReq {
                blob_id: blob_id.to_string(),
            })
        };
        matches!(
            self.messenger.request(target, env).await,
            Some(Envelope {
                payload: Payload::GenericResp { success: true, .. },
                ..
            })
        )
    }

    /// Stream a stored blob to `target`.
    async fn send_blob(&self, blob_id: &str, target: &NodeRef) {
        let (Some(path), Some(size)) = (self.store.path(blob_id), self.store.size(blob_id))
        else {
            return;
        };
        let env = {
            self.state.lock().await.envelope(Payload::SendFileReq {
                blob_id: blob_id.to_string(),
                size,
            })
        };
        if self.messenger.push_blob(target, env, &path).await {
            info!(blob = blob_id, peer = %target, "blob replicated");
        }
    }

    // -----------------------------------------------------------------
    // Server side
    // -----------------------------------------------------------------

    /// Dispatch one decoded control message and produce at most one reply.
    ///
    /// Join and adoption requests are exempt from the signature gate (a
    /// joiner cannot know the epoch yet); everything else bearing a stale
    /// or foreign signature is rejected with an unsigned failure reply.
    pub async fn handle_rpc(&self, env: Envelope) -> Option<Envelope> {
        match env.payload.clone() {
            Payload::JoinReq { joiner } => Some(self.handle_join(joiner).await),
            Payload::AdoptReq => Some(self.handle_adoption(&env).await),
            payload => {
                let signature_ok = {
                    let st = self.state.lock().await;
                    st.ring_signature == env.ring_signature
                };
                if !signature_ok {
                    debug!(source = env.source_id, "rejecting message from a stale epoch");
                    let st = self.state.lock().await;
                    return Some(st.unsigned_envelope(Payload::GenericResp {
                        success: false,
                        message: Some("the provided signature is not valid".to_string()),
                    }));
                }
                self.handle_signed(payload).await
            }
        }
    }

    async fn handle_signed(&self, payload: Payload) -> Option<Envelope> {
        match payload {
            Payload::SuccReq { target } => {
                let reply = match self.find_successor(target).await {
                    Ok(node) => Payload::SuccResp {
                        success: true,
                        node,
                    },
                    Err(e) => {
                        debug!(target, error = %e, "successor lookup failed");
                        Payload::GenericResp {
                            success: false,
                            message: Some("lookup failed".to_string()),
                        }
                    }
                };
                Some(self.state.lock().await.envelope(reply))
            }
            Payload::PredReq { .. } => {
                let st = self.state.lock().await;
                let node = st.predecessor.clone();
                Some(st.envelope(Payload::PredResp { node }))
            }
            Payload::UpdateFtableReq {
                from,
                to,
                owner,
                new_signature,
            } => {
                let mut st = self.state.lock().await;
                st.fingers.update_range(from, to, &owner);
                st.ring_signature = new_signature;
                let node = st.successor.clone();
                Some(st.envelope(Payload::SuccResp {
                    success: true,
                    node,
                }))
            }
            Payload::UpdateSuccReq { node } => {
                let mut st = self.state.lock().await;
                debug!(successor = %node, "successor replaced by peer request");
                st.successor = node;
                None
            }
            Payload::UpdatePredReq { node } => {
                let mut st = self.state.lock().await;
                debug!(predecessor = %node, "predecessor replaced by peer request");
                st.predecessor = node;
                None
            }
            Payload::Ping => {
                let st = self.state.lock().await;
                let predecessor = st.predecessor.clone();
                let successor = st.successor.clone();
                Some(st.envelope(Payload::PingResp {
                    predecessor,
                    successor,
                }))
            }
            Payload::RefreshReq => {
                let mut st = self.state.lock().await;
                st.refresh_pending = true;
                Some(st.envelope(Payload::GenericResp {
                    success: true,
                    message: None,
                }))
            }
            Payload::CheckFileReq { blob_id } => {
                let present = self.store.contains(&blob_id);
                let st = self.state.lock().await;
                Some(st.envelope(Payload::GenericResp {
                    success: present,
                    message: Some(
                        if present { "blob found" } else { "blob not found" }.to_string(),
                    ),
                }))
            }
            Payload::SendFileReq { .. } => {
                // Bulk transfers are handled on the connection that carries
                // the byte stream, never through the plain dispatcher.
                let st = self.state.lock().await;
                Some(st.envelope(Payload::GenericResp {
                    success: false,
                    message: Some("bulk transfer requires a streaming channel".to_string()),
                }))
            }
            Payload::Multicast => {
                let st = self.state.lock().await;
                Some(st.envelope(Payload::GenericResp {
                    success: false,
                    message: Some("unexpected rendezvous message".to_string()),
                }))
            }
            // Responses never arrive as requests; Join/Adopt are handled
            // before the signature gate.
            Payload::JoinReq { .. }
            | Payload::AdoptReq
            | Payload::JoinResp { .. }
            | Payload::SuccResp { .. }
            | Payload::PredResp { .. }
            | Payload::PingResp { .. }
            | Payload::GenericResp { .. } => {
                let st = self.state.lock().await;
                Some(st.envelope(Payload::GenericResp {
                    success: false,
                    message: Some("unexpected message".to_string()),
                }))
            }
        }
    }

    async fn handle_join(&self, joiner: NodeRef) -> Envelope {
        let refusal = |st: &NodeState, message: &str| {
            st.envelope(Payload::JoinResp {
                success: false,
                message: message.to_string(),
                successor: None,
                predecessor: None,
            })
        };

        {
            let st = self.state.lock().await;
            if joiner.node_id > ring_mask(st.id_bitlen()) {
                return refusal(&st, "identifier out of range");
            }
        }

        let successor = match self.find_successor(joiner.node_id).await {
            Ok(s) => s,
            Err(e) => {
                debug!(joiner = %joiner, error = %e, "join placement failed");
                let st = self.state.lock().await;
                return refusal(&st, "placement failed, try again");
            }
        };
        if successor.node_id == joiner.node_id {
            let st = self.state.lock().await;
            return refusal(&st, "identifier already in use");
        }
        let predecessor = match self.find_predecessor(joiner.node_id).await {
            Ok(p) => p,
            Err(e) => {
                debug!(joiner = %joiner, error = %e, "join placement failed");
                let st = self.state.lock().await;
                return refusal(&st, "placement failed, try again");
            }
        };

        self.request_update_successor(&predecessor, joiner.clone()).await;
        self.request_update_predecessor(&successor, joiner.clone()).await;

        info!(joiner = %joiner, "node joined between {} and {}", predecessor.node_id, successor.node_id);

        let st = self.state.lock().await;
        st.envelope(Payload::JoinResp {
            success: true,
            message: "welcome to the ring".to_string(),
            successor: Some(successor),
            predecessor: Some(predecessor),
        })
    }

    async fn handle_adoption(&self, env: &Envelope) -> Envelope {
        let mut st = self.state.lock().await;
        if st.is_solitary() {
            st.ring_signature = env.ring_signature.clone();
            info!(source = env.source_id, "adopted by an existing ring");
            st.envelope(Payload::GenericResp {
                success: true,
                message: None,
            })
        } else {
            st.envelope(Payload::GenericResp {
                success: false,
                message: Some("this node is already part of a ring".to_string()),
            })
        }
    }

    /// Reply sent when a connection delivers bytes that do not decode into
    /// an envelope.
    pub async fn protocol_error_reply(&self) -> Envelope {
        let st = self.state.lock().await;
        st.envelope(Payload::GenericResp {
            success: false,
            message: Some("malformed message".to_string()),
        })
    }

    /// Handle an announced bulk blob transfer on its carrying channel:
    /// check the signature, ack, then drain the byte stream into the store.
    pub async fn handle_blob_push(&self, env: &Envelope, chan: &mut SecureChannel) {
        let Payload::SendFileReq { blob_id, size } = &env.payload else {
            return;
        };

        let (signature_ok, ack, reject) = {
            let st = self.state.lock().await;
            (
                st.ring_signature == env.ring_signature,
                st.envelope(Payload::GenericResp {
                    success: true,
                    message: None,
                }),
                st.unsigned_envelope(Payload::GenericResp {
                    success: false,
                    message: Some("the provided signature is not valid".to_string()),
                }),
            )
        };
        if !signature_ok {
            if let Err(e) = chan.send(&reject).await {
                debug!(error = %e, "failed to send rejection");
            }
            return;
        }
        if let Err(e) = chan.send(&ack).await {
            debug!(error = %e, "failed to ack blob transfer");
            return;
        }

        match self.store.receive(blob_id, *size, chan).await {
            Ok(true) => info!(blob = blob_id, size, "blob received"),
            Ok(false) => debug!(blob = blob_id, "short blob transfer discarded"),
            Err(e) => warn!(blob = blob_id, error = %e, "blob receive failed"),
        }
    }
}
