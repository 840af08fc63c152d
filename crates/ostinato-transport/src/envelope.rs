//! Wire envelope for ring control messages.
//!
//! Every control message is an [`Envelope`] carrying the sender's ring
//! position, the ring signature of the epoch the sender believes it is in,
//! and a tagged [`Payload`]. The payload enum is exhaustive: a message that
//! decodes at all is well-formed at the type level, there is no
//! downcasting step that can fail later.
//!
//! Encoded envelopes must fit a single control frame
//! ([`MAX_CONTROL_FRAME`](crate::MAX_CONTROL_FRAME) bytes); bulk file bytes
//! stream separately after the control exchange.

use serde::{Deserialize, Serialize};

use ostinato_types::{NodeRef, RingId};

use crate::{cbor, TransportError, MAX_CONTROL_FRAME};

/// Discriminant for the envelope, mirroring the payload tag.
///
/// Replies of every shape share the `Response` kind; the payload tag tells
/// them apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A node asks a ring member to place it (`JoinReq`).
    JoinRequest,
    /// Resolve the successor of an identifier (`SuccReq`).
    SuccRequest,
    /// Ask a node for its current predecessor (`PredReq`).
    PredRequest,
    /// Instruct a node to replace its successor (`UpdateSuccReq`).
    UpdateSuccRequest,
    /// Instruct a node to replace its predecessor (`UpdatePredReq`).
    UpdatePredRequest,
    /// Install an ownership range into the receiver's finger table
    /// (`UpdateFtableReq`).
    UpdateFtableRequest,
    /// Liveness probe (`Ping`).
    Ping,
    /// Ask a solitary node to be absorbed into an existing ring
    /// (`AdoptReq`).
    AdoptionRequest,
    /// Ask a node to schedule a deferred global finger refresh
    /// (`RefreshReq`).
    RefreshRequest,
    /// Ask whether the receiver holds a blob (`CheckFileReq`).
    CheckFile,
    /// Announce an incoming bulk blob transfer (`SendFileReq`).
    FileSendRequest,
    /// LAN rendezvous datagram; only valid with an empty ring signature.
    Multicast,
    /// Any reply payload.
    Response,
}

/// Tagged message payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Request to join the ring; carries the joiner's full reference.
    JoinReq {
        /// The node asking to be placed.
        joiner: NodeRef,
    },
    /// Reply to [`Payload::JoinReq`]. On success carries the joiner's new
    /// neighbors; the envelope's ring signature is the one the joiner must
    /// adopt.
    JoinResp {
        /// Whether the join was accepted.
        success: bool,
        /// Greeting or rejection reason.
        message: String,
        /// The joiner's successor (present on success).
        successor: Option<NodeRef>,
        /// The joiner's predecessor (present on success).
        predecessor: Option<NodeRef>,
    },
    /// Resolve the successor of `target`.
    SuccReq {
        /// Identifier to resolve.
        target: RingId,
    },
    /// Reply to [`Payload::SuccReq`] and to
    /// [`Payload::UpdateFtableReq`] (where it carries the receiver's
    /// successor as the next hop of the ring walk).
    SuccResp {
        /// Whether resolution succeeded.
        success: bool,
        /// The resolved node.
        node: NodeRef,
    },
    /// Ask the receiver for its current predecessor.
    PredReq {
        /// Identifier the caller resolved before asking; carried for
        /// symmetry with `SuccReq`.
        target: RingId,
    },
    /// Reply to [`Payload::PredReq`].
    PredResp {
        /// The receiver's predecessor at the time of the request.
        node: NodeRef,
    },
    /// Replace the receiver's successor. Fire-and-forget.
    UpdateSuccReq {
        /// The new successor.
        node: NodeRef,
    },
    /// Replace the receiver's predecessor. Fire-and-forget.
    UpdatePredReq {
        /// The new predecessor.
        node: NodeRef,
    },
    /// Install `[from, to] -> owner` into the receiver's finger table and
    /// rotate its ring signature.
    UpdateFtableReq {
        /// Inclusive lower bound of the ownership arc.
        from: RingId,
        /// Inclusive upper bound of the ownership arc.
        to: RingId,
        /// The node now owning the arc.
        owner: NodeRef,
        /// Signature of the epoch this update creates.
        new_signature: String,
    },
    /// Liveness probe.
    Ping,
    /// Reply to [`Payload::Ping`]; carries both neighbors so the caller can
    /// maintain fallback successors.
    PingResp {
        /// The receiver's predecessor.
        predecessor: NodeRef,
        /// The receiver's successor.
        successor: NodeRef,
    },
    /// Ask a solitary node to join the caller's ring. The envelope's ring
    /// signature is the one the receiver adopts on acceptance.
    AdoptReq,
    /// Schedule a deferred global finger refresh on the receiver.
    RefreshReq,
    /// Generic success/failure reply.
    GenericResp {
        /// Whether the request succeeded.
        success: bool,
        /// Optional detail.
        message: Option<String>,
    },
    /// Ask whether the receiver's blob store holds `blob_id`.
    CheckFileReq {
        /// Hex blob identifier.
        blob_id: String,
    },
    /// Announce a bulk transfer of `size` raw bytes following the control
    /// exchange on the same channel.
    SendFileReq {
        /// Hex blob identifier.
        blob_id: String,
        /// Exact byte count that will be streamed.
        size: u64,
    },
    /// LAN rendezvous probe. Carries nothing; the sender's address comes
    /// from the datagram, the ring port is fixed.
    Multicast,
}

impl Payload {
    /// The envelope kind this payload travels under.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::JoinReq { .. } => MessageKind::JoinRequest,
            Payload::SuccReq { .. } => MessageKind::SuccRequest,
            Payload::PredReq { .. } => MessageKind::PredRequest,
            Payload::UpdateSuccReq { .. } => MessageKind::UpdateSuccRequest,
            Payload::UpdatePredReq { .. } => MessageKind::UpdatePredRequest,
            Payload::UpdateFtableReq { .. } => MessageKind::UpdateFtableRequest,
            Payload::Ping => MessageKind::Ping,
            Payload::AdoptReq => MessageKind::AdoptionRequest,
            Payload::RefreshReq => MessageKind::RefreshRequest,
            Payload::CheckFileReq { .. } => MessageKind::CheckFile,
            Payload::SendFileReq { .. } => MessageKind::FileSendRequest,
            Payload::Multicast => MessageKind::Multicast,
            Payload::JoinResp { .. }
            | Payload::SuccResp { .. }
            | Payload::PredResp { .. }
            | Payload::PingResp { .. }
            | Payload::GenericResp { .. } => MessageKind::Response,
        }
    }
}

/// A control message envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Discriminant; must agree with the payload tag.
    pub kind: MessageKind,
    /// Ring position of the sender.
    pub source_id: RingId,
    /// Epoch token. Empty only on multicast datagrams and on replies that
    /// reject a signature mismatch.
    pub ring_signature: String,
    /// The message body.
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope; the kind is derived from the payload tag.
    pub fn new(source_id: RingId, ring_signature: impl Into<String>, payload: Payload) -> Self {
        Self {
            kind: payload.kind(),
            source_id,
            ring_signature: ring_signature.into(),
            payload,
        }
    }

    /// Serialize to CBOR bytes for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ProtocolViolation`] if the encoded envelope
    /// exceeds a single control frame.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let bytes = cbor::to_vec(self)?;
        if bytes.len() > MAX_CONTROL_FRAME {
            return Err(TransportError::ProtocolViolation(format!(
                "control envelope of {} bytes exceeds frame limit {MAX_CONTROL_FRAME}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Deserialize an envelope received from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Deserialization`] for malformed bytes and
    /// [`TransportError::ProtocolViolation`] when the declared kind does not
    /// match the payload tag.
    pub fn decode(data: &[u8]) -> Result<Self, TransportError> {
        let env: Self = cbor::from_slice(data)?;
        env.validate()?;
        Ok(env)
    }

    /// Check the kind/payload agreement.
    pub fn validate(&self) -> Result<(), TransportError> {
        let expected = self.payload.kind();
        if self.kind != expected {
            return Err(TransportError::ProtocolViolation(format!(
                "envelope kind {:?} does not match payload kind {expected:?}",
                self.kind
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn node(id: u64) -> NodeRef {
        let ip: IpAddr = "10.0.0.7".parse().expect("ip");
        NodeRef::new(ip, 4321, id, 8)
    }

    #[test]
    fn test_roundtrip_join_request() {
        let env = Envelope::new(
            10,
            "epoch-1",
            Payload::JoinReq { joiner: node(10) },
        );
        assert_eq!(env.kind, MessageKind::JoinRequest);

        let bytes = env.encode().expect("encode");
        assert!(bytes.len() <= MAX_CONTROL_FRAME);
        let restored = Envelope::decode(&bytes).expect("decode");
        assert_eq!(restored, env);
    }

    #[test]
    fn test_roundtrip_ftable_update() {
        let env = Envelope::new(
            100,
            "epoch-2",
            Payload::UpdateFtableReq {
                from: 11,
                to: 100,
                owner: node(100),
                new_signature: "epoch-3".to_string(),
            },
        );
        let restored = Envelope::decode(&env.encode().expect("encode")).expect("decode");
        assert_eq!(restored, env);
    }

    #[test]
    fn test_responses_share_the_response_kind() {
        let generic = Envelope::new(
            1,
            "sig",
            Payload::GenericResp {
                success: false,
                message: Some("no".to_string()),
            },
        );
        let pong = Envelope::new(
            1,
            "sig",
            Payload::PingResp {
                predecessor: node(1),
                successor: node(2),
            },
        );
        assert_eq!(generic.kind, MessageKind::Response);
        assert_eq!(pong.kind, MessageKind::Response);
    }

    #[test]
    fn test_multicast_carries_empty_signature() {
        let env = Envelope::new(42, "", Payload::Multicast);
        let restored = Envelope::decode(&env.encode().expect("encode")).expect("decode");
        assert!(restored.ring_signature.is_empty());
        assert_eq!(restored.kind, MessageKind::Multicast);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let mut env = Envelope::new(1, "sig", Payload::Ping);
        env.kind = MessageKind::Response;
        let bytes = cbor::to_vec(&env).expect("serialize");
        assert!(Envelope::decode(&bytes).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(Envelope::decode(&[0xDE, 0xAD, 0xBE, 0xEF]).is_err());
    }
}
