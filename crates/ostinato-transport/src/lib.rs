//! # ostinato-transport
//!
//! Secure point-to-point and rendezvous transport for the ostinato overlay:
//!
//! - **Envelope codec** — CBOR-serialized request/response envelopes with a
//!   tagged payload enum via [`envelope`]
//! - **CBOR helpers** via [`cbor`]
//! - **TLS 1.3 over TCP** framed channels using a certificate shared by the
//!   whole ring via [`tls`]
//! - **Ring credential keystore** (password-sealed private key) via
//!   [`keystore`]
//! - **UDP multicast rendezvous** for LAN discovery via [`multicast`]
//!
//! ## Architecture
//!
//! ```text
//! Overlay engine
//!     |
//!     v
//! Envelope (envelope.rs)      -- CBOR envelope: kind, source, signature, payload
//!     |
//!     v
//! SecureChannel (tls.rs)      -- length-prefixed frames + raw bulk bytes
//!     |
//!     v
//! TLS 1.3 / TCP socket        -- shared ring certificate, hostname checks off
//! ```

pub mod cbor;
pub mod envelope;
pub mod keystore;
pub mod multicast;
pub mod tls;

/// Maximum size of a single control frame in bytes. One read of this many
/// bytes is always sufficient for any control message.
pub const MAX_CONTROL_FRAME: usize = 1024;

/// Chunk size for bulk file streaming after the control exchange.
pub const FILE_CHUNK_SIZE: usize = 1024;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// CBOR serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// CBOR deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (oversized frame, kind/payload mismatch, etc.).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// TLS/certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Keystore error (sealed key, password mismatch, missing material).
    #[error("keystore error: {0}")]
    Keystore(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// I/O error (socket, stream read/write).
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Serialization("test".to_string());
        assert_eq!(err.to_string(), "serialization error: test");
    }

    #[test]
    fn test_frame_limits() {
        assert_eq!(MAX_CONTROL_FRAME, 1024);
        assert_eq!(FILE_CHUNK_SIZE, 1024);
    }
}
