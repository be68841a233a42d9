//! The message pump: drives the engine through the handshake, frames
//! records over the TCP transport in both directions, and hands plaintext
//! application data to the layer above.

use core::cell::RefCell;
use core::fmt::{self, Display};
use core::net::SocketAddr;

use embassy_time::{with_timeout, Duration, Instant};

use embedded_io_async::{ErrorType, Read, ReadExactError, Write};

use heapless::String;

use log::debug;

use boot_nal::{TcpConnect, TcpShutdown};

use crate::{
    ContentType, CryptMode, EngineError, RecordHeader, SessionState, TlsEngine, TlsEngineProvider,
    MAX_PLAINTEXT_LEN, RECORD_HEADER_LEN, TLS12_VERSION_MINOR, VERSION_MAJOR,
};

/// Longest server name the connector will pin for peer verification.
pub const MAX_SERVER_NAME_LEN: usize = 256;

/// An error at the pump's boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error<E> {
    /// A malformed record arrived
    Protocol,
    /// The session failed: engine error, failed decryption or a fatal alert
    Aborted,
    /// The handshake watchdog fired
    Timeout,
    /// The operation does not fit the session state
    InvalidState,
    /// A buffer is too small for the record in flight
    OutOfResources,
    /// The peer closed the transport mid-record
    ConnectionClosed,
    /// Transport error
    Io(E),
}

pub type ErrorKind = Error<boot_nal::io::ErrorKind>;

impl<E> Error<E>
where
    E: boot_nal::io::Error,
{
    pub fn erase(&self) -> ErrorKind {
        match self {
            Self::Protocol => Error::Protocol,
            Self::Aborted => Error::Aborted,
            Self::Timeout => Error::Timeout,
            Self::InvalidState => Error::InvalidState,
            Self::OutOfResources => Error::OutOfResources,
            Self::ConnectionClosed => Error::ConnectionClosed,
            Self::Io(e) => Error::Io(e.kind()),
        }
    }
}

impl<E> From<EngineError> for Error<E> {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::BufferTooSmall(_) => Self::OutOfResources,
            EngineError::Aborted | EngineError::Failed => Self::Aborted,
        }
    }
}

impl<E> embedded_io_async::Error for Error<E>
where
    E: embedded_io_async::Error,
{
    fn kind(&self) -> embedded_io_async::ErrorKind {
        match self {
            Self::Io(e) => e.kind(),
            Self::Timeout => embedded_io_async::ErrorKind::TimedOut,
            _ => embedded_io_async::ErrorKind::Other,
        }
    }
}

impl<E> Display for Error<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol => write!(f, "Malformed TLS record"),
            Self::Aborted => write!(f, "TLS session aborted"),
            Self::Timeout => write!(f, "TLS handshake timed out"),
            Self::InvalidState => write!(f, "Operation does not fit the session state"),
            Self::OutOfResources => write!(f, "Record buffer too small"),
            Self::ConnectionClosed => write!(f, "Connection closed mid-record"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: std::error::Error {}

/// One TLS session over a TCP socket.
///
/// `buf` stages records in both directions and must hold two maximum-sized
/// records (one half stages inbound records and outbound plaintext, the
/// other receives engine output).
pub struct TlsConnection<'b, S, E> {
    socket: S,
    engine: E,
    state: SessionState,
    buf: &'b mut [u8],
    plain_start: usize,
    plain_end: usize,
}

impl<'b, S, E> TlsConnection<'b, S, E> {
    pub fn new(socket: S, engine: E, buf: &'b mut [u8]) -> Self {
        Self {
            socket,
            engine,
            state: SessionState::NotStarted,
            buf,
            plain_start: 0,
            plain_end: 0,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    /// Dismantle the connection into its parts.
    pub fn release(self) -> (S, E, &'b mut [u8]) {
        (self.socket, self.engine, self.buf)
    }
}

impl<'b, S, E> TlsConnection<'b, S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    /// Establish the session: emit the engine's first flight, then pump
    /// records through the engine until it reports `DataTransferring`,
    /// bounded by the optional watchdog `timeout`.
    pub async fn connect(&mut self, timeout: Option<Duration>) -> Result<(), Error<S::Error>> {
        self.engine.set_session_state(SessionState::NotStarted);
        self.state = SessionState::NotStarted;
        self.plain_start = 0;
        self.plain_end = 0;

        let half = self.buf.len() / 2;

        {
            let (_, out) = self.buf.split_at_mut(half);
            let len = self.engine.build_response(None, out)?;

            if len > 0 {
                self.socket.write_all(&out[..len]).await.map_err(Error::Io)?;
                self.socket.flush().await.map_err(Error::Io)?;
            }
        }

        self.state = self.engine.session_state();

        let deadline = timeout.map(|timeout| Instant::now() + timeout);

        while self.state != SessionState::DataTransferring {
            let (_, record_len) = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::Timeout);
                    }

                    with_timeout(deadline - now, self.receive_record())
                        .await
                        .map_err(|_| Error::Timeout)??
                }
                None => self.receive_record().await?,
            };

            let (rx, out) = self.buf.split_at_mut(half);
            let len = self.engine.build_response(Some(&rx[..record_len]), out)?;

            if len > 0 {
                self.socket.write_all(&out[..len]).await.map_err(Error::Io)?;
                self.socket.flush().await.map_err(Error::Io)?;
            }

            self.state = self.engine.session_state();

            if self.state == SessionState::Error {
                return Err(Error::Aborted);
            }
        }

        debug!("TLS session established");

        Ok(())
    }

    /// Close the session: ask the engine for its close notification and
    /// transmit it. Peer acknowledgment is not awaited.
    pub async fn close_session(&mut self) -> Result<(), Error<S::Error>> {
        self.engine.set_session_state(SessionState::Closing);
        self.state = SessionState::Closing;

        let half = self.buf.len() / 2;
        let (_, out) = self.buf.split_at_mut(half);

        let len = self.engine.build_response(None, out)?;

        if len > 0 {
            self.socket.write_all(&out[..len]).await.map_err(Error::Io)?;
            self.socket.flush().await.map_err(Error::Io)?;
        }

        Ok(())
    }

    /// Receive exactly one record into the staging half of the buffer:
    /// first the 5 header bytes, validated, then exactly the advertised
    /// payload length (which may be zero).
    async fn receive_record(&mut self) -> Result<(RecordHeader, usize), Error<S::Error>> {
        let half = self.buf.len() / 2;
        let (rx, _) = self.buf.split_at_mut(half);

        if rx.len() < RECORD_HEADER_LEN {
            return Err(Error::OutOfResources);
        }

        self.socket
            .read_exact(&mut rx[..RECORD_HEADER_LEN])
            .await
            .map_err(read_exact_err)?;

        let header_bytes: &[u8; RECORD_HEADER_LEN] =
            rx[..RECORD_HEADER_LEN].try_into().unwrap();
        let header = RecordHeader::decode(header_bytes).map_err(|_| Error::Protocol)?;

        let len = header.len as usize;

        if RECORD_HEADER_LEN + len > rx.len() {
            return Err(Error::OutOfResources);
        }

        if len > 0 {
            self.socket
                .read_exact(&mut rx[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len])
                .await
                .map_err(read_exact_err)?;
        }

        Ok((header, RECORD_HEADER_LEN + len))
    }
}

impl<S, E> ErrorType for TlsConnection<'_, S, E>
where
    S: ErrorType,
{
    type Error = Error<S::Error>;
}

impl<S, E> Read for TlsConnection<'_, S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        loop {
            if self.plain_end > self.plain_start {
                let half = self.buf.len() / 2;
                let out = &self.buf[half..];

                let len = buf.len().min(self.plain_end - self.plain_start);
                buf[..len].copy_from_slice(&out[self.plain_start..self.plain_start + len]);

                self.plain_start += len;
                if self.plain_start == self.plain_end {
                    self.plain_start = 0;
                    self.plain_end = 0;
                }

                return Ok(len);
            }

            match self.state {
                SessionState::DataTransferring => (),
                SessionState::Closing => return Ok(0),
                _ => return Err(Error::InvalidState),
            }

            let (header, record_len) = self.receive_record().await?;
            let half = self.buf.len() / 2;

            match header.content_type {
                ContentType::ApplicationData => {
                    let (rx, out) = self.buf.split_at_mut(half);

                    let len = match self.engine.process(
                        CryptMode::Decrypt,
                        &rx[..record_len],
                        out,
                    ) {
                        Ok(len) => len,
                        Err(EngineError::Aborted) => {
                            // Failed decryption: send whatever alert the
                            // engine produces, then give up on the session.
                            if let Ok(len) = self.engine.build_response(None, out) {
                                if len > 0 {
                                    let _ = self.socket.write_all(&out[..len]).await;
                                    let _ = self.socket.flush().await;
                                }
                            }

                            return Err(Error::Aborted);
                        }
                        Err(e) => return Err(e.into()),
                    };

                    // The engine's output keeps the record header in place;
                    // the caller only ever sees the plaintext behind it.
                    if len > RECORD_HEADER_LEN {
                        self.plain_start = RECORD_HEADER_LEN;
                        self.plain_end = len;
                    }
                }
                ContentType::Alert => {
                    let (rx, out) = self.buf.split_at_mut(half);

                    let len = self.engine.build_response(Some(&rx[..record_len]), out)?;

                    if len > 0 {
                        self.socket.write_all(&out[..len]).await.map_err(Error::Io)?;
                        self.socket.flush().await.map_err(Error::Io)?;
                    }

                    self.state = self.engine.session_state();

                    match self.state {
                        SessionState::Error => return Err(Error::Aborted),
                        SessionState::Closing => return Ok(0),
                        _ => (),
                    }
                }
                ContentType::Handshake | ContentType::ChangeCipherSpec => {
                    return Err(Error::Protocol);
                }
            }
        }
    }
}

impl<S, E> Write for TlsConnection<'_, S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.state != SessionState::DataTransferring {
            return Err(Error::InvalidState);
        }

        if self.plain_end > self.plain_start {
            // Decrypted data is still waiting for the caller; writing now
            // would clobber it.
            return Err(Error::InvalidState);
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let half = self.buf.len() / 2;

        let chunk = buf
            .len()
            .min(MAX_PLAINTEXT_LEN)
            .min(half.saturating_sub(RECORD_HEADER_LEN));

        if chunk == 0 {
            return Err(Error::OutOfResources);
        }

        let (stage, out) = self.buf.split_at_mut(half);

        let header = RecordHeader {
            content_type: ContentType::ApplicationData,
            major: VERSION_MAJOR,
            minor: TLS12_VERSION_MINOR,
            len: chunk as u16,
        };

        stage[..RECORD_HEADER_LEN].copy_from_slice(&header.encode());
        stage[RECORD_HEADER_LEN..RECORD_HEADER_LEN + chunk].copy_from_slice(&buf[..chunk]);

        let len = self.engine.process(
            CryptMode::Encrypt,
            &stage[..RECORD_HEADER_LEN + chunk],
            out,
        )?;

        // All ciphertext the engine produced goes out as one transmission.
        self.socket.write_all(&out[..len]).await.map_err(Error::Io)?;

        Ok(chunk)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await.map_err(Error::Io)
    }
}

impl<S, E> TcpShutdown for TlsConnection<'_, S, E>
where
    S: Read + Write + TcpShutdown,
    E: TlsEngine,
{
    async fn close(&mut self) -> Result<(), Self::Error> {
        if self.state == SessionState::DataTransferring {
            let _ = self.close_session().await;
        }

        self.socket.close().await.map_err(Error::Io)
    }

    async fn abort(&mut self) -> Result<(), Self::Error> {
        self.socket.abort().await.map_err(Error::Io)
    }
}

/// A [`TcpConnect`] connector that puts a TLS session on every connection
/// it hands out, so the HTTP client runs over TLS unchanged.
///
/// The connector owns one record buffer and therefore one live session at
/// a time; peer verification is pinned to the server name given at
/// construction.
pub struct TlsConnect<'b, T, P> {
    tcp: &'b T,
    provider: P,
    server_name: String<MAX_SERVER_NAME_LEN>,
    timeout: Option<Duration>,
    buf: RefCell<Option<&'b mut [u8]>>,
}

impl<'b, T, P> TlsConnect<'b, T, P>
where
    T: TcpConnect,
    P: TlsEngineProvider,
{
    /// Returns `None` when `server_name` exceeds [`MAX_SERVER_NAME_LEN`].
    pub fn new(
        tcp: &'b T,
        provider: P,
        server_name: &str,
        timeout: Option<Duration>,
        buf: &'b mut [u8],
    ) -> Option<Self> {
        Some(Self {
            tcp,
            provider,
            server_name: String::try_from(server_name).ok()?,
            timeout,
            buf: RefCell::new(Some(buf)),
        })
    }
}

impl<'b, T, P> TcpConnect for TlsConnect<'b, T, P>
where
    T: TcpConnect,
    P: TlsEngineProvider,
{
    type Error = Error<T::Error>;

    type Socket<'a>
        = TlsSocket<'a, 'b, T::Socket<'a>, P::Engine>
    where
        Self: 'a;

    async fn connect(&self, remote: SocketAddr) -> Result<Self::Socket<'_>, Self::Error> {
        let buf = self
            .buf
            .borrow_mut()
            .take()
            .ok_or(Error::OutOfResources)?;

        let socket = match self.tcp.connect(remote).await {
            Ok(socket) => socket,
            Err(e) => {
                *self.buf.borrow_mut() = Some(buf);

                return Err(Error::Io(e));
            }
        };

        let engine = self.provider.create(&self.server_name);

        let mut connection = TlsConnection::new(socket, engine, buf);

        match connection.connect(self.timeout).await {
            Ok(()) => Ok(TlsSocket {
                connection: Some(connection),
                slot: &self.buf,
            }),
            Err(e) => {
                let (_, _, buf) = connection.release();
                *self.buf.borrow_mut() = Some(buf);

                Err(e)
            }
        }
    }
}

/// An established TLS session handed out by [`TlsConnect`]. Returns the
/// connector's record buffer when dropped.
pub struct TlsSocket<'a, 'b, S, E> {
    connection: Option<TlsConnection<'b, S, E>>,
    slot: &'a RefCell<Option<&'b mut [u8]>>,
}

impl<'a, 'b, S, E> TlsSocket<'a, 'b, S, E> {
    fn connection(&mut self) -> &mut TlsConnection<'b, S, E> {
        // Present from construction until drop
        self.connection.as_mut().unwrap()
    }
}

impl<S, E> ErrorType for TlsSocket<'_, '_, S, E>
where
    S: ErrorType,
{
    type Error = Error<S::Error>;
}

impl<S, E> Read for TlsSocket<'_, '_, S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.connection().read(buf).await
    }
}

impl<S, E> Write for TlsSocket<'_, '_, S, E>
where
    S: Read + Write,
    E: TlsEngine,
{
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.connection().write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.connection().flush().await
    }
}

impl<S, E> TcpShutdown for TlsSocket<'_, '_, S, E>
where
    S: Read + Write + TcpShutdown,
    E: TlsEngine,
{
    async fn close(&mut self) -> Result<(), Self::Error> {
        TcpShutdown::close(self.connection()).await
    }

    async fn abort(&mut self) -> Result<(), Self::Error> {
        self.connection().abort().await
    }
}

impl<S, E> Drop for TlsSocket<'_, '_, S, E> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            let (_, _, buf) = connection.release();
            *self.slot.borrow_mut() = Some(buf);
        }
    }
}

fn read_exact_err<E>(e: ReadExactError<E>) -> Error<E> {
    match e {
        ReadExactError::UnexpectedEof => Error::ConnectionClosed,
        ReadExactError::Other(e) => Error::Io(e),
    }
}

#[cfg(test)]
mod test {
    use core::convert::Infallible;
    use core::net::{IpAddr, Ipv4Addr};

    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec as StdVec;

    use embassy_futures::block_on;

    use super::*;

    fn record(content_type: ContentType, payload: &[u8]) -> StdVec<u8> {
        let header = RecordHeader {
            content_type,
            major: VERSION_MAJOR,
            minor: TLS12_VERSION_MINOR,
            len: payload.len() as u16,
        };

        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Split a raw byte stream back into records.
    fn records(mut stream: &[u8]) -> StdVec<(ContentType, StdVec<u8>)> {
        let mut out = StdVec::new();

        while !stream.is_empty() {
            let header: &[u8; RECORD_HEADER_LEN] =
                stream[..RECORD_HEADER_LEN].try_into().unwrap();
            let header = RecordHeader::decode(header).unwrap();

            let end = RECORD_HEADER_LEN + header.len as usize;
            out.push((header.content_type, stream[RECORD_HEADER_LEN..end].to_vec()));

            stream = &stream[end..];
        }

        out
    }

    #[derive(Clone, Default)]
    struct FakeStream {
        rx: Rc<RefCell<VecDeque<u8>>>,
        tx: Rc<RefCell<StdVec<u8>>>,
        pend_when_empty: bool,
    }

    impl FakeStream {
        fn push_rx(&self, bytes: &[u8]) {
            self.rx.borrow_mut().extend(bytes);
        }

        fn sent(&self) -> StdVec<u8> {
            self.tx.borrow().clone()
        }
    }

    impl ErrorType for FakeStream {
        type Error = Infallible;
    }

    impl Read for FakeStream {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            loop {
                {
                    let mut rx = self.rx.borrow_mut();

                    if !rx.is_empty() {
                        let len = rx.len().min(buf.len());
                        for slot in buf[..len].iter_mut() {
                            *slot = rx.pop_front().unwrap();
                        }

                        return Ok(len);
                    }
                }

                if !self.pend_when_empty {
                    return Ok(0);
                }

                core::future::pending::<()>().await;
            }
        }
    }

    impl Write for FakeStream {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.tx.borrow_mut().extend_from_slice(buf);

            Ok(buf.len())
        }
    }

    impl TcpShutdown for FakeStream {
        async fn close(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn abort(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    /// A deterministic engine: its "handshake" is a fixed three-flight
    /// exchange and its "cryptography" XORs every payload byte.
    struct ScriptEngine {
        state: SessionState,
    }

    impl ScriptEngine {
        fn new() -> Self {
            Self {
                state: SessionState::NotStarted,
            }
        }
    }

    impl TlsEngine for ScriptEngine {
        fn session_state(&self) -> SessionState {
            self.state
        }

        fn set_session_state(&mut self, state: SessionState) {
            self.state = state;
        }

        fn build_response(
            &mut self,
            input: Option<&[u8]>,
            out: &mut [u8],
        ) -> Result<usize, EngineError> {
            let emit = |out: &mut [u8], flights: &[StdVec<u8>]| {
                let mut len = 0;

                for flight in flights {
                    out[len..len + flight.len()].copy_from_slice(flight);
                    len += flight.len();
                }

                Ok(len)
            };

            match (self.state, input) {
                (SessionState::NotStarted, None) => {
                    self.state = SessionState::Handshaking;

                    emit(out, &[record(ContentType::Handshake, b"CHELLO")])
                }
                (SessionState::Handshaking, Some(input)) => {
                    match &input[RECORD_HEADER_LEN..] {
                        b"SHELLO" => emit(
                            out,
                            &[
                                record(ContentType::Handshake, b"CKEX"),
                                record(ContentType::ChangeCipherSpec, b"C"),
                                record(ContentType::Handshake, b"CFIN"),
                            ],
                        ),
                        b"SFIN" => {
                            self.state = SessionState::DataTransferring;

                            Ok(0)
                        }
                        _ => Err(EngineError::Failed),
                    }
                }
                (SessionState::DataTransferring, Some(input)) => {
                    match &input[RECORD_HEADER_LEN..] {
                        b"FATAL" => {
                            self.state = SessionState::Error;

                            Ok(0)
                        }
                        b"WARN" => Ok(0),
                        b"BYE" => {
                            self.state = SessionState::Closing;

                            emit(out, &[record(ContentType::Alert, b"BYEACK")])
                        }
                        _ => Err(EngineError::Failed),
                    }
                }
                (SessionState::Closing, None) => emit(out, &[record(ContentType::Alert, b"BYE")]),
                _ => Err(EngineError::Failed),
            }
        }

        fn process(
            &mut self,
            _mode: CryptMode,
            input: &[u8],
            out: &mut [u8],
        ) -> Result<usize, EngineError> {
            if self.state != SessionState::DataTransferring {
                return Err(EngineError::Failed);
            }

            if input[RECORD_HEADER_LEN..].starts_with(b"!") {
                return Err(EngineError::Aborted);
            }

            out[..RECORD_HEADER_LEN].copy_from_slice(&input[..RECORD_HEADER_LEN]);

            for (slot, byte) in out[RECORD_HEADER_LEN..input.len()]
                .iter_mut()
                .zip(&input[RECORD_HEADER_LEN..])
            {
                *slot = byte ^ 0x55;
            }

            Ok(input.len())
        }
    }

    fn xored(payload: &[u8]) -> StdVec<u8> {
        payload.iter().map(|byte| byte ^ 0x55).collect()
    }

    fn connected(stream: &FakeStream) -> TlsConnection<'static, FakeStream, ScriptEngine> {
        stream.push_rx(&record(ContentType::Handshake, b"SHELLO"));
        stream.push_rx(&record(ContentType::Handshake, b"SFIN"));

        let buf = std::boxed::Box::leak(std::boxed::Box::new([0; 4096]));

        let mut connection = TlsConnection::new(stream.clone(), ScriptEngine::new(), &mut buf[..]);
        block_on(connection.connect(None)).unwrap();

        connection
    }

    #[test]
    fn handshake_transmits_four_records() {
        let stream = FakeStream::default();
        let connection = connected(&stream);

        assert_eq!(connection.session_state(), SessionState::DataTransferring);

        let sent = records(&stream.sent());

        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], (ContentType::Handshake, b"CHELLO".to_vec()));
        assert_eq!(sent[1], (ContentType::Handshake, b"CKEX".to_vec()));
        assert_eq!(sent[2], (ContentType::ChangeCipherSpec, b"C".to_vec()));
        assert_eq!(sent[3], (ContentType::Handshake, b"CFIN".to_vec()));
    }

    #[test]
    fn handshake_failure_aborts() {
        let stream = FakeStream::default();

        stream.push_rx(&record(ContentType::Handshake, b"GARBAGE"));

        let buf = std::boxed::Box::leak(std::boxed::Box::new([0; 4096]));
        let mut connection =
            TlsConnection::new(stream.clone(), ScriptEngine::new(), &mut buf[..]);

        assert!(matches!(
            block_on(connection.connect(None)),
            Err(Error::Aborted)
        ));
    }

    #[test]
    fn handshake_watchdog() {
        let stream = FakeStream {
            pend_when_empty: true,
            ..Default::default()
        };

        let buf = std::boxed::Box::leak(std::boxed::Box::new([0; 4096]));
        let mut connection =
            TlsConnection::new(stream.clone(), ScriptEngine::new(), &mut buf[..]);

        assert!(matches!(
            block_on(connection.connect(Some(Duration::from_millis(20)))),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn application_data_roundtrip() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        let tx_before = stream.sent().len();

        block_on(connection.write(b"GET / HTTP/1.1\r\n\r\n")).unwrap();

        let sent = records(&stream.sent()[tx_before..]);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ContentType::ApplicationData);
        assert_eq!(sent[0].1, xored(b"GET / HTTP/1.1\r\n\r\n"));

        stream.push_rx(&record(ContentType::ApplicationData, &xored(b"hello")));

        let mut buf = [0; 64];
        let len = block_on(connection.read(&mut buf)).unwrap();

        assert_eq!(&buf[..len], b"hello");
    }

    #[test]
    fn empty_record_is_skipped() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        stream.push_rx(&record(ContentType::ApplicationData, b""));
        stream.push_rx(&record(ContentType::ApplicationData, &xored(b"data")));

        let mut buf = [0; 64];
        let len = block_on(connection.read(&mut buf)).unwrap();

        assert_eq!(&buf[..len], b"data");
    }

    #[test]
    fn warning_alert_is_consumed() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        stream.push_rx(&record(ContentType::Alert, b"WARN"));
        stream.push_rx(&record(ContentType::ApplicationData, &xored(b"after")));

        let mut buf = [0; 64];
        let len = block_on(connection.read(&mut buf)).unwrap();

        assert_eq!(&buf[..len], b"after");
    }

    #[test]
    fn fatal_alert_aborts() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        stream.push_rx(&record(ContentType::Alert, b"FATAL"));

        let mut buf = [0; 64];

        assert!(matches!(
            block_on(connection.read(&mut buf)),
            Err(Error::Aborted)
        ));
    }

    #[test]
    fn close_notify_ends_the_stream() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        let tx_before = stream.sent().len();

        stream.push_rx(&record(ContentType::Alert, b"BYE"));

        let mut buf = [0; 64];
        let len = block_on(connection.read(&mut buf)).unwrap();

        assert_eq!(len, 0);

        // The engine's acknowledgment went out.
        let sent = records(&stream.sent()[tx_before..]);
        assert_eq!(sent, [(ContentType::Alert, b"BYEACK".to_vec())]);
    }

    #[test]
    fn failed_decryption_aborts() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        stream.push_rx(&record(ContentType::ApplicationData, b"!bad"));

        let mut buf = [0; 64];

        assert!(matches!(
            block_on(connection.read(&mut buf)),
            Err(Error::Aborted)
        ));
    }

    #[test]
    fn stray_handshake_record_is_a_protocol_error() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        stream.push_rx(&record(ContentType::Handshake, b"HUH"));

        let mut buf = [0; 64];

        assert!(matches!(
            block_on(connection.read(&mut buf)),
            Err(Error::Protocol)
        ));
    }

    #[test]
    fn malformed_record_header_is_a_protocol_error() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        stream.push_rx(&[99, 3, 3, 0, 0]);

        let mut buf = [0; 64];

        assert!(matches!(
            block_on(connection.read(&mut buf)),
            Err(Error::Protocol)
        ));
    }

    #[test]
    fn close_session_emits_close_notify() {
        let stream = FakeStream::default();
        let mut connection = connected(&stream);

        let tx_before = stream.sent().len();

        block_on(connection.close_session()).unwrap();

        let sent = records(&stream.sent()[tx_before..]);
        assert_eq!(sent, [(ContentType::Alert, b"BYE".to_vec())]);
        assert_eq!(connection.session_state(), SessionState::Closing);
    }

    struct FakeTcp {
        stream: FakeStream,
    }

    impl TcpConnect for FakeTcp {
        type Error = Infallible;

        type Socket<'a>
            = FakeStream
        where
            Self: 'a;

        async fn connect(&self, _remote: SocketAddr) -> Result<Self::Socket<'_>, Self::Error> {
            Ok(self.stream.clone())
        }
    }

    struct ScriptProvider;

    impl TlsEngineProvider for ScriptProvider {
        type Engine = ScriptEngine;

        fn create(&self, server_name: &str) -> Self::Engine {
            assert_eq!(server_name, "boot.example");

            ScriptEngine::new()
        }
    }

    #[test]
    fn connector_hands_out_established_sessions() {
        let stream = FakeStream::default();

        stream.push_rx(&record(ContentType::Handshake, b"SHELLO"));
        stream.push_rx(&record(ContentType::Handshake, b"SFIN"));

        let tcp = FakeTcp {
            stream: stream.clone(),
        };

        let mut buf = [0; 4096];
        let tls =
            TlsConnect::new(&tcp, ScriptProvider, "boot.example", None, &mut buf).unwrap();

        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)), 443);

        let mut socket = block_on(tls.connect(remote)).unwrap();

        // The record buffer is lent to the live session; a second session
        // cannot start until this one is dropped.
        assert!(matches!(
            block_on(tls.connect(remote)),
            Err(Error::OutOfResources)
        ));

        stream.push_rx(&record(ContentType::ApplicationData, &xored(b"payload")));

        let mut data = [0; 64];
        let len = block_on(socket.read(&mut data)).unwrap();
        assert_eq!(&data[..len], b"payload");

        drop(socket);

        // Buffer returned: connecting works again.
        stream.push_rx(&record(ContentType::Handshake, b"SHELLO"));
        stream.push_rx(&record(ContentType::Handshake, b"SFIN"));

        let socket = block_on(tls.connect(remote)).unwrap();
        drop(socket);
    }
}
