//! # ostinato-ring
//!
//! The Chord-style overlay and replication engine.
//!
//! A node participates in a logical ring keyed by an m-bit identifier
//! space. This crate implements:
//! - per-node state (neighbors, finger table, ring signature) via [`state`]
//! - the finger table and its static ownership updates via [`finger`]
//! - successor/predecessor routing with remote delegation via [`node`]
//! - explicit join, multicast-driven adoption, finger propagation,
//!   stabilization with failure recovery, and the successor-replication
//!   sweep, all on [`node::RingNode`]
//! - opaque blob storage via [`store`]
//! - the RPC seam ([`messenger::Messenger`]) and its TLS implementation
//! - the long-lived service tasks via [`service`]
//! - the process-wide handle external adapters consume via [`handle`]
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Stabilization interval | 3 seconds |
//! | Ping timeout | 1 second |
//! | Replication factor K | 3 |
//! | Discovery group | 224.0.0.1:2222, TTL 1 |
//! | Identifier bit length | 32 (launch-time parameter) |

use std::net::{Ipv4Addr, SocketAddr};

pub mod finger;
pub mod handle;
pub mod messenger;
pub mod node;
pub mod service;
pub mod state;
pub mod store;

/// Seconds between stabilization ticks.
pub const PING_INTERVAL_SECS: u64 = 3;

/// Deadline for a liveness probe.
pub const PING_TIMEOUT_SECS: u64 = 1;

/// Number of replicas kept for each blob: the owner plus `K - 1` clockwise
/// successors.
pub const REPLICATION_FACTOR: usize = 3;

/// Well-known IPv4 multicast group for LAN rendezvous.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// Well-known rendezvous port.
pub const MULTICAST_PORT: u16 = 2222;

/// Delay between receiving a discovery probe and attempting the adoption,
/// so the sender's listener is up before we call back.
pub const DISCOVERY_DEBOUNCE_MS: u64 = 200;

/// How long a discovering node waits for an adoption before concluding it
/// is alone.
pub const DISCOVERY_SETTLE_SECS: u64 = 1;

/// Error types for overlay operations.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] ostinato_transport::TransportError),

    /// A peer did not produce a usable response.
    #[error("peer {addr} did not produce a usable response")]
    Unreachable {
        /// Address of the unresponsive peer.
        addr: SocketAddr,
    },

    /// A peer answered with a payload the protocol does not allow here.
    #[error("unexpected payload in {0}")]
    UnexpectedPayload(&'static str),

    /// The seed refused the join.
    #[error("join refused: {0}")]
    JoinRefused(String),

    /// A blob identifier is not plain hex and cannot name a file.
    #[error("invalid blob identifier: {0}")]
    InvalidBlobId(String),

    /// The process-wide handle was installed twice.
    #[error("ring handle already installed")]
    HandleInstalled,

    /// Filesystem error in the blob store.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RingError {
    fn from(e: std::io::Error) -> Self {
        RingError::Io(e.to_string())
    }
}

/// Convenience result type for overlay operations.
pub type Result<T> = std::result::Result<T, RingError>;
