//! Value-typed node references.
//!
//! Ring neighbors are held as immutable `(ip, port, node_id, id_bitlen)`
//! records, never as owning pointers to peer state. Predecessor, successor
//! and finger entries all store clones of this record; the address is only
//! resolved into a connection at RPC time.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::id::hash_id;
use crate::RingId;

/// Reference to a node on the identifier ring. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    /// The node's reachable IP address.
    #[serde(with = "ip_addr_serde")]
    pub ip: IpAddr,
    /// The node's ring port.
    pub port: u16,
    /// Position on the identifier ring, in `[0, 2^id_bitlen)`.
    pub node_id: RingId,
    /// Identifier bit length shared by every node in the ring.
    pub id_bitlen: u8,
}

impl NodeRef {
    /// Build a reference from explicit parts.
    pub fn new(ip: IpAddr, port: u16, node_id: RingId, id_bitlen: u8) -> Self {
        Self {
            ip,
            port,
            node_id,
            id_bitlen,
        }
    }

    /// Build a reference for an endpoint, deriving the canonical identifier
    /// `SHA256("ip:port") mod 2^id_bitlen`.
    pub fn from_endpoint(ip: IpAddr, port: u16, id_bitlen: u8) -> Self {
        let node_id = hash_id(format!("{ip}:{port}").as_bytes(), id_bitlen);
        Self::new(ip, port, node_id, id_bitlen)
    }

    /// The socket address this reference resolves to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Whether two references name the same ring position.
    pub fn same_id(&self, other: &NodeRef) -> bool {
        self.node_id == other.node_id
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.node_id, self.ip, self.port)
    }
}

/// Serde support for `IpAddr` as a string.
mod ip_addr_serde {
    use std::net::IpAddr;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ip: &IpAddr, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ip.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<IpAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{hash_id, ring_mask};

    #[test]
    fn test_from_endpoint_derives_canonical_id() {
        let ip: IpAddr = "10.0.1.2".parse().expect("valid ip");
        let node = NodeRef::from_endpoint(ip, 4321, 32);
        assert_eq!(node.node_id, hash_id(b"10.0.1.2:4321", 32));
        assert!(node.node_id <= ring_mask(32));
        assert_eq!(node.addr().port(), 4321);
    }

    #[test]
    fn test_same_id_ignores_address() {
        let a = NodeRef::new("127.0.0.1".parse().expect("ip"), 1000, 42, 8);
        let b = NodeRef::new("127.0.0.2".parse().expect("ip"), 2000, 42, 8);
        assert!(a.same_id(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_is_compact() {
        let a = NodeRef::new("127.0.0.1".parse().expect("ip"), 1000, 42, 8);
        assert_eq!(a.to_string(), "42@127.0.0.1:1000");
    }
}
