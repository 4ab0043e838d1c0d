//! The downstream connection a stream belongs to.
//!
//! The filter pipeline never touches sockets or TLS records. It only exposes
//! what the connection owner reports about the connection, so filters can make
//! decisions based on addresses or the verified peer certificate.

use std::net::SocketAddr;

use bytes::Bytes;

/// Read-only view of the downstream connection carrying a stream.
pub trait Connection: Send + Sync {
    /// Identifier of the connection, unique within the process.
    fn id(&self) -> u64;

    fn remote_addr(&self) -> Option<SocketAddr>;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Whether the secure transport finished its handshake. Plain connections
    /// report `true`.
    fn handshake_complete(&self) -> bool {
        true
    }

    /// DER encoded certificate presented by the peer, if any was verified.
    fn peer_certificate(&self) -> Option<Bytes> {
        None
    }
}
