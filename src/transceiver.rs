use std::io;
use std::net::SocketAddr;

/// A connected, non-blocking byte stream.
///
/// The server is generic over `T: Transceiver` so it can run on real TCP
/// sockets or on the in-memory streams used by the tests.
pub trait Transceiver {
    /// Reads whatever is available into `buf`.
    ///
    /// Returns `Ok(None)` when nothing is available right now and `Ok(Some(0))`
    /// when the peer closed the stream. Must **NOT** block.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
    /// Writes as much of `buf` as the stream accepts, which may be nothing.
    ///
    /// Must **NOT** block; a full stream reports `Ok(0)`.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Source of new connections.
pub trait Listener {
    type Stream: Transceiver;
    /// Accepts one pending connection, if any. Must **NOT** block.
    fn accept(&mut self) -> io::Result<Option<(Self::Stream, SocketAddr)>>;
}
