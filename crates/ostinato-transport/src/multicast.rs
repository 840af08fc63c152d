//! UDP multicast rendezvous for LAN discovery.
//!
//! A starting node announces itself with a single datagram to a well-known
//! IPv4 multicast group. The datagram is a full [`Envelope`] whose ring
//! signature is **empty**; receivers accept that combination as a bootstrap
//! request and nothing else. The sender's IP comes from the packet source,
//! the port is the fixed ring port.

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use crate::envelope::{Envelope, MessageKind};
use crate::{Result, TransportError, MAX_CONTROL_FRAME};

/// TTL for discovery datagrams: stay on the local segment.
pub const MULTICAST_TTL: u32 = 1;

/// Bind a reusable multicast listener socket joined to `group` on `port`.
///
/// # Errors
///
/// Returns [`TransportError::Io`] if the socket cannot be created, bound or
/// joined to the group; a fatal startup error when discovery is enabled.
pub fn bind_listener(group: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::Io(format!("create discovery socket: {e}")))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::Io(format!("set SO_REUSEADDR: {e}")))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::Io(format!("set nonblocking: {e}")))?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&bind_addr.into())
        .map_err(|e| TransportError::Io(format!("bind discovery port {port}: {e}")))?;
    socket
        .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        .map_err(|e| TransportError::Io(format!("join multicast group {group}: {e}")))?;

    UdpSocket::from_std(socket.into()).map_err(|e| TransportError::Io(e.to_string()))
}

/// Send a single discovery datagram to the group.
pub async fn send(group: Ipv4Addr, port: u16, env: &Envelope) -> Result<()> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| TransportError::Io(format!("bind sender socket: {e}")))?;
    socket
        .set_multicast_ttl_v4(MULTICAST_TTL)
        .map_err(|e| TransportError::Io(format!("set multicast TTL: {e}")))?;
    socket
        .send_to(&env.encode()?, (group, port))
        .await
        .map_err(|e| TransportError::Io(format!("send discovery datagram: {e}")))?;
    Ok(())
}

/// Decode and screen a received datagram.
///
/// Returns the envelope only when it parses, is a `Multicast` probe, and
/// carries an empty ring signature. Anything else is dropped with a debug
/// log; discovery tolerates arbitrary garbage on the group.
pub fn screen_datagram(data: &[u8]) -> Option<Envelope> {
    if data.len() > MAX_CONTROL_FRAME {
        debug!(len = data.len(), "oversized discovery datagram dropped");
        return None;
    }
    let env = match Envelope::decode(data) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "invalid discovery datagram dropped");
            return None;
        }
    };
    if env.kind != MessageKind::Multicast {
        debug!(kind = ?env.kind, "non-rendezvous datagram dropped");
        return None;
    }
    if !env.ring_signature.trim().is_empty() {
        debug!("discovery datagram with non-empty signature dropped");
        return None;
    }
    Some(env)
}
