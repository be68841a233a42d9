//! The datagram contract the resolver drives

use core::net::SocketAddr;

use embedded_io_async::ErrorType;

/// One bidirectional UDP endpoint.
///
/// The resolver holds a single endpoint per session and pushes queries and
/// pulls answers through it in turn; split send/receive halves are
/// deliberately not modeled. The endpoint may be bound (local address and
/// port) or connected (remote fixed at creation) in the POSIX datagram
/// sense; no handshake of any kind is implied.
pub trait UdpSocket: ErrorType {
    /// Send `data` to a peer:
    /// - For a connected endpoint the provided remote address is ignored.
    /// - For an unconnected endpoint the remote address is used.
    async fn send(&mut self, remote: SocketAddr, data: &[u8]) -> Result<(), Self::Error>;

    /// Receive a datagram into `buffer`.
    ///
    /// A datagram exceeding the buffer is still consumed and the excess is
    /// discarded; the full datagram size is reported so the truncation can
    /// be detected. The remote address is returned along with the byte
    /// count.
    async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, SocketAddr), Self::Error>;
}

impl<T> UdpSocket for &mut T
where
    T: UdpSocket,
{
    async fn send(&mut self, remote: SocketAddr, data: &[u8]) -> Result<(), Self::Error> {
        (**self).send(remote, data).await
    }

    async fn receive(&mut self, buffer: &mut [u8]) -> Result<(usize, SocketAddr), Self::Error> {
        (**self).receive(buffer).await
    }
}
