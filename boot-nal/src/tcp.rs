//! Connection teardown for TCP sockets

use embedded_io_async::ErrorType;

/// Teardown of an established TCP connection.
///
/// The boot-path clients never half-close: a connection is either shut
/// down in full or torn down immediately, so no read/write-half selector
/// is modeled.
pub trait TcpShutdown: ErrorType {
    /// Gracefully shut the connection down: send a FIN, wait for it to be
    /// ACKed, and drain the receive side until the peer signals the end of
    /// its stream.
    ///
    /// Whether the peer ever sends its own FIN is application-protocol
    /// specific, so on platforms without built-in timeouts this call must
    /// be guarded with one.
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Abort the connection by sending an RST to the peer.
    ///
    /// Does not wait: the RST is not acknowledged.
    async fn abort(&mut self) -> Result<(), Self::Error>;
}

impl<T> TcpShutdown for &mut T
where
    T: TcpShutdown,
{
    async fn close(&mut self) -> Result<(), Self::Error> {
        (**self).close().await
    }

    async fn abort(&mut self) -> Result<(), Self::Error> {
        (**self).abort().await
    }
}
