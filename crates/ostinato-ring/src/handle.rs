//! Process-wide handle for external adapters.
//!
//! Exactly one node exists per process. The HTTP layer and other wrappers
//! obtain it through [`RingHandle::global`] instead of threading the node
//! through every call site.

use std::sync::{Arc, OnceLock};

use ostinato_types::NodeRef;

use crate::messenger::TlsMessenger;
use crate::node::RingNode;
use crate::{Result, RingError};

static GLOBAL: OnceLock<RingHandle> = OnceLock::new();

/// Cloneable handle over the process's single ring node.
#[derive(Clone)]
pub struct RingHandle {
    node: Arc<RingNode<TlsMessenger>>,
}

impl RingHandle {
    /// Wrap a node without installing it globally (useful in tests).
    pub fn new(node: Arc<RingNode<TlsMessenger>>) -> Self {
        Self { node }
    }

    /// Install the process-wide handle. One-shot; a second call fails.
    pub fn install(node: Arc<RingNode<TlsMessenger>>) -> Result<Self> {
        let handle = Self::new(node);
        GLOBAL
            .set(handle.clone())
            .map_err(|_| RingError::HandleInstalled)?;
        Ok(handle)
    }

    /// The installed handle, if any.
    pub fn global() -> Option<RingHandle> {
        GLOBAL.get().cloned()
    }

    /// Direct access to the node for callers needing the full engine.
    pub fn node(&self) -> &Arc<RingNode<TlsMessenger>> {
        &self.node
    }

    /// Resolve the node responsible for an application key.
    pub async fn find_successor(&self, key_bytes: &[u8]) -> Result<NodeRef> {
        self.node.find_successor_for_key(key_bytes).await
    }

    /// The replica set for `start` (this node when `None`).
    pub async fn get_replicants(&self, k: usize, start: Option<NodeRef>) -> Vec<NodeRef> {
        self.node.get_replicants(k, start).await
    }

    /// Current epoch token, used by the HTTP forwarder to detect request
    /// loops.
    pub async fn ring_signature(&self) -> String {
        self.node.ring_signature().await
    }

    /// Persist a blob locally; the next stabilization sweep replicates it.
    pub async fn store_blob(&self, blob_id: &str, bytes: &[u8]) -> Result<()> {
        self.node.store_blob(blob_id, bytes).await
    }

    /// Ask a peer to schedule a deferred global finger refresh.
    pub async fn request_global_refresh(&self, target: &NodeRef) -> bool {
        self.node.request_global_refresh(target).await
    }
}
