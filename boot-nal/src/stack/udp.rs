//! Factory trait for binding the resolver's UDP endpoint

use core::net::SocketAddr;

use crate::udp::UdpSocket;

/// Factory for bound UDP sockets.
///
/// Configuring a resolver session binds one endpoint to the session's
/// station address and local port through this trait; the endpoint is
/// released again when the session is reset.
pub trait UdpBind {
    /// Error type returned on socket creation failure
    type Error: embedded_io_async::Error;

    /// The socket type returned by the stack
    type Socket<'a>: UdpSocket<Error = Self::Error>
    where
        Self: 'a;

    /// Bind to a local socket address
    async fn bind(&self, local: SocketAddr) -> Result<Self::Socket<'_>, Self::Error>;
}

impl<T> UdpBind for &T
where
    T: UdpBind,
{
    type Error = T::Error;
    type Socket<'a>
        = T::Socket<'a>
    where
        Self: 'a;

    async fn bind(&self, local: SocketAddr) -> Result<Self::Socket<'_>, Self::Error> {
        (*self).bind(local).await
    }
}
