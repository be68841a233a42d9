//! Factory trait for creating client-side TCP sockets

use core::net::SocketAddr;

use embedded_io_async::{Error, Read, Write};

use crate::TcpShutdown;

/// Factory trait for connecting to remote TCP peers.
///
/// The HTTP client holds one of these and asks it for a fresh socket every
/// time a connection (or re-connection) to an origin is needed.
pub trait TcpConnect {
    /// Error type returned on socket creation failure
    type Error: Error;

    /// The socket type returned by the factory
    type Socket<'a>: Read<Error = Self::Error>
        + Write<Error = Self::Error>
        + TcpShutdown<Error = Self::Error>
    where
        Self: 'a;

    /// Connect to a remote socket
    async fn connect(&self, remote: SocketAddr) -> Result<Self::Socket<'_>, Self::Error>;
}

impl<T> TcpConnect for &T
where
    T: TcpConnect,
{
    type Error = T::Error;

    type Socket<'a>
        = T::Socket<'a>
    where
        Self: 'a;

    async fn connect(&self, remote: SocketAddr) -> Result<Self::Socket<'_>, Self::Error> {
        (*self).connect(remote).await
    }
}

impl<T> TcpConnect for &mut T
where
    T: TcpConnect,
{
    type Error = T::Error;

    type Socket<'a>
        = T::Socket<'a>
    where
        Self: 'a;

    async fn connect(&self, remote: SocketAddr) -> Result<Self::Socket<'_>, Self::Error> {
        (**self).connect(remote).await
    }
}
