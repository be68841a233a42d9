//! The HTTP client session: connection state machine, request transmission,
//! response parsing and body delivery with spillover preserved between
//! messages on a persistent connection.

use core::net::{IpAddr, SocketAddr};
use core::ptr;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

use embedded_io_async::{Read, Write};

use heapless::{String, Vec};

use log::debug;

use boot_nal::{AddrType, Dns, TcpConnect, TcpShutdown};

use crate::url::{self, UrlError};
use crate::{BodyType, ConnectionType, Method, ResponseHeaders};

use super::{
    find_header_end, parse_status_line, send_headers, send_headers_end, send_request_line,
    BodyReader, Error, ErrorKind, RX_SCRATCH,
};

/// Spillover kept between messages on a persistent connection.
pub const CACHE_LEN: usize = 4096;

/// Longest host name accepted in a request URL.
pub const MAX_HOST_LEN: usize = 256;

/// Requests that may be pipelined on one connection before a response is
/// consumed.
pub const MAX_TOKENS: usize = 8;

/// Default TCP connection timeout, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u32 = 60;

/// Transport knobs for the sockets carrying the client's connections.
///
/// The connection timeout bounds the connect phase here; everything else is
/// advisory for the integrator's connector, which owns the actual socket
/// options.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    pub type_of_service: u8,
    pub time_to_live: u8,
    pub send_buffer_size: u32,
    pub receive_buffer_size: u32,
    pub connection_timeout_secs: u32,
    pub data_retries: u32,
    pub fin_timeout_secs: u32,
    pub keep_alive_probes: u32,
    pub keep_alive_time_secs: u32,
    pub keep_alive_interval_secs: u32,
}

impl TcpOptions {
    pub const fn new() -> Self {
        Self {
            type_of_service: 8,
            time_to_live: 255,
            send_buffer_size: 65535,
            receive_buffer_size: 65535,
            connection_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            data_retries: 12,
            fin_timeout_secs: 2,
            keep_alive_probes: 6,
            keep_alive_time_secs: 7200,
            keep_alive_interval_secs: 30,
        }
    }
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self::new()
    }
}

pub type Completion = Result<(), ErrorKind>;

/// The caller-owned handle for one request/response exchange.
///
/// The client borrows the token while the request sits in the transmit
/// queue and signals it exactly once per operation driven with it.
pub struct HttpToken {
    done: Signal<NoopRawMutex, Completion>,
}

impl HttpToken {
    pub const fn new() -> Self {
        Self {
            done: Signal::new(),
        }
    }

    pub async fn wait(&self) -> Completion {
        self.done.wait().await
    }

    pub fn try_result(&self) -> Option<Completion> {
        self.done.try_take()
    }

    fn complete(&self, completion: Completion) {
        self.done.signal(completion);
    }
}

impl Default for HttpToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Client instance configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub tcp: TcpOptions,
    /// The instance runs over an IPv6 local address. Not implemented; kept
    /// so the refusal is explicit.
    pub local_address_is_ipv6: bool,
}

impl Config {
    pub const fn new() -> Self {
        Self {
            tcp: TcpOptions::new(),
            local_address_is_ipv6: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection lifecycle of one instance.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HttpState {
    Unconfigured,
    HttpConfigured,
    TcpConfigured,
    TcpConnected,
    TcpClosed,
}

struct TxRecord<'t> {
    token: &'t HttpToken,
    method: Method,
}

/// One HTTP client session over a TCP connector and a DNS collaborator.
///
/// The instance keeps at most one connection, reuses it across requests to
/// the same origin, and preserves bytes received past the end of the
/// current message so a pipelined next response parses from memory before
/// anything is read off the wire.
pub struct HttpInstance<'b, 't, T, D>
where
    T: TcpConnect,
{
    state: HttpState,
    config: Option<Config>,
    tcp: &'b T,
    dns: &'b D,
    io: Option<T::Socket<'b>>,
    remote_host: String<MAX_HOST_LEN>,
    remote_port: u16,
    remote_addr: Option<IpAddr>,
    cache: Vec<u8, CACHE_LEN>,
    cache_offset: usize,
    next_msg: Option<usize>,
    parser: Option<BodyReader>,
    msg_connection: ConnectionType,
    tx_tokens: Vec<TxRecord<'t>, MAX_TOKENS>,
}

impl<'b, 't, T, D> HttpInstance<'b, 't, T, D>
where
    T: TcpConnect,
    D: Dns,
{
    pub fn new(tcp: &'b T, dns: &'b D) -> Self {
        Self {
            state: HttpState::Unconfigured,
            config: None,
            tcp,
            dns,
            io: None,
            remote_host: String::new(),
            remote_port: 0,
            remote_addr: None,
            cache: Vec::new(),
            cache_offset: 0,
            next_msg: None,
            parser: None,
            msg_connection: ConnectionType::KeepAlive,
            tx_tokens: Vec::new(),
        }
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    /// Configure the instance. Fails with `AlreadyStarted` unless the
    /// instance is fresh or was reset.
    pub fn configure(&mut self, config: &Config) -> Result<(), Error<T::Error>> {
        if self.state != HttpState::Unconfigured {
            return Err(Error::AlreadyStarted);
        }

        self.config = Some(config.clone());
        self.state = HttpState::HttpConfigured;

        Ok(())
    }

    /// Tear everything down: close the connection, abort every queued
    /// token, drop the caches and the body parser, and return to
    /// `Unconfigured`.
    pub async fn reset(&mut self) {
        if let Some(mut io) = self.io.take() {
            let _ = io.close().await;
        }

        while let Some(record) = self.tx_tokens.pop() {
            record.token.complete(Err(Error::Aborted));
        }

        self.cache.clear();
        self.cache_offset = 0;
        self.next_msg = None;
        self.parser = None;
        self.msg_connection = ConnectionType::KeepAlive;
        self.remote_host.clear();
        self.remote_port = 0;
        self.remote_addr = None;
        self.config = None;
        self.state = HttpState::Unconfigured;
    }

    /// Close the current connection but keep the configuration; the next
    /// request reconnects.
    pub async fn close(&mut self) {
        if let Some(mut io) = self.io.take() {
            let _ = io.close().await;
        }

        if self.state == HttpState::TcpConnected {
            self.state = HttpState::TcpClosed;
        }
    }

    /// Send one request.
    ///
    /// The URL is split into host, port and absolute path; the host is
    /// resolved (literal addresses first, then the DNS collaborator) and
    /// the connection is reused when the origin matches the previous
    /// request, otherwise re-established. The request line, the caller's
    /// headers and the body bytes go out verbatim. On success the token is
    /// recorded as awaiting a response and signaled transmit-done.
    pub async fn request(
        &mut self,
        token: &'t HttpToken,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<(), Error<T::Error>> {
        if !method.is_supported() {
            return Err(Error::Unsupported);
        }

        if self.state == HttpState::Unconfigured {
            return Err(Error::NotStarted);
        }

        let config = self.config.as_ref().unwrap();

        if config.local_address_is_ipv6 {
            return Err(Error::Unsupported);
        }

        if self.tx_tokens.iter().any(|record| ptr::eq(record.token, token)) {
            return Err(Error::AccessDenied);
        }

        let timeout = Duration::from_secs(config.tcp.connection_timeout_secs as u64);

        let url = url::parse(url).map_err(url_error)?;

        let reuse = self.io.is_some()
            && self.remote_host.as_str() == url.host
            && self.remote_port == url.port;

        if !reuse {
            if self.io.is_some() {
                // Switching origins: drop the old connection and abort
                // whatever was still queued on it.
                self.close().await;
                let _ = self.cancel(None);
            }

            self.cache.clear();
            self.cache_offset = 0;
            self.next_msg = None;
            self.parser = None;

            let addr = match url.host.parse::<IpAddr>() {
                Ok(addr) => addr,
                Err(_) => self
                    .dns
                    .get_host_by_name(url.host, AddrType::V4)
                    .await
                    .map_err(|_| Error::NotFound)?,
            };

            self.remote_host =
                String::try_from(url.host).map_err(|_| Error::InvalidParameter)?;
            self.remote_port = url.port;
            self.remote_addr = Some(addr);
            self.state = HttpState::TcpConfigured;

            let tcp = self.tcp;
            let socket = with_timeout(timeout, tcp.connect(SocketAddr::new(addr, url.port)))
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(Error::Io)?;

            self.io = Some(socket);
            self.state = HttpState::TcpConnected;
        }

        let io = self.io.as_mut().unwrap();

        send_request_line(method, url.path, io).await?;
        send_headers(headers.iter(), io).await?;
        send_headers_end(io).await?;

        if !body.is_empty() {
            io.write_all(body).await.map_err(Error::Io)?;
        }

        io.flush().await.map_err(Error::Io)?;

        self.tx_tokens
            .push(TxRecord { token, method })
            .map_err(|_| Error::OutOfResources)?;

        token.complete(Ok(()));

        Ok(())
    }

    /// Receive the next response's status line, headers and as much of its
    /// body as fits into `body`. Returns the number of body bytes written.
    ///
    /// The oldest request still awaiting a response supplies the method the
    /// body framing rules need. Header bytes are assembled into
    /// `header_buf` (starting from spillover when a previous message left
    /// some); the parsed name/value pairs in `headers` borrow that buffer.
    /// Call [`Self::response_body`] until [`Self::is_response_complete`]
    /// to drain a body larger than `body`.
    pub async fn response<'m, const N: usize>(
        &mut self,
        token: &'t HttpToken,
        headers: &mut ResponseHeaders<'m, N>,
        header_buf: &'m mut [u8],
        body: &mut [u8],
    ) -> Result<usize, Error<T::Error>> {
        let result = self.response_inner(headers, header_buf, body).await;

        match &result {
            Ok(_) => token.complete(Ok(())),
            Err(e) => token.complete(Err(e.erase())),
        }

        result
    }

    /// Deliver more of the current response body into `body`. Returns zero
    /// once the message is complete.
    pub async fn response_body(
        &mut self,
        token: &'t HttpToken,
        body: &mut [u8],
    ) -> Result<usize, Error<T::Error>> {
        let result = self.deliver(body).await;

        match &result {
            Ok(_) => token.complete(Ok(())),
            Err(e) => token.complete(Err(e.erase())),
        }

        result
    }

    /// Whether the current response has been fully delivered.
    pub fn is_response_complete(&self) -> bool {
        self.parser.is_none()
    }

    /// Cancel one queued request token, or all of them when `token` is
    /// `None`. Cancelled tokens are signaled `Aborted`; a token that is not
    /// queued reports `NotFound`.
    pub fn cancel(&mut self, token: Option<&HttpToken>) -> Result<(), Error<T::Error>> {
        match token {
            None => {
                while let Some(record) = self.tx_tokens.pop() {
                    record.token.complete(Err(Error::Aborted));
                }

                Ok(())
            }
            Some(token) => {
                let index = self
                    .tx_tokens
                    .iter()
                    .position(|record| ptr::eq(record.token, token))
                    .ok_or(Error::NotFound)?;

                let record = self.tx_tokens.remove(index);
                record.token.complete(Err(Error::Aborted));

                Ok(())
            }
        }
    }

    async fn response_inner<'m, const N: usize>(
        &mut self,
        headers: &mut ResponseHeaders<'m, N>,
        header_buf: &'m mut [u8],
        body: &mut [u8],
    ) -> Result<usize, Error<T::Error>> {
        if self.state != HttpState::TcpConnected {
            return Err(Error::NotStarted);
        }

        if self.tx_tokens.is_empty() || self.parser.is_some() {
            return Err(Error::NotReady);
        }

        // Seed the header buffer with spillover from the previous message.
        let mut filled = 0;

        if let Some(next) = self.next_msg.take() {
            let seed = &self.cache[next..];

            if seed.len() > header_buf.len() {
                return Err(Error::TooLongHeaders);
            }

            header_buf[..seed.len()].copy_from_slice(seed);
            filled = seed.len();
        }

        self.cache.clear();
        self.cache_offset = 0;

        let header_end = loop {
            if let Some(end) = find_header_end(&header_buf[..filled]) {
                break end;
            }

            if filled == header_buf.len() {
                return Err(Error::TooLongHeaders);
            }

            let io = self.io.as_mut().unwrap();

            let mut scratch = [0; RX_SCRATCH];
            let len = io.read(&mut scratch).await.map_err(Error::Io)?;

            if len == 0 {
                return Err(if filled == 0 {
                    Error::ConnectionClosed
                } else {
                    Error::IncompleteHeaders
                });
            }

            if len > header_buf.len() - filled {
                return Err(Error::TooLongHeaders);
            }

            header_buf[filled..filled + len].copy_from_slice(&scratch[..len]);
            filled += len;
        };

        // Stash the first body fragment before the buffer is frozen for
        // header parsing.
        self.cache
            .extend_from_slice(&header_buf[header_end..filled])
            .map_err(|_| Error::OutOfResources)?;
        self.cache_offset = 0;

        let header_block: &'m [u8] = header_buf;

        let (status, code, line_end) = parse_status_line(&header_block[..header_end])?;

        headers.code = code;
        headers.status = status;
        headers.headers.load(&header_block[line_end..header_end])?;

        let record = self.tx_tokens.remove(0);

        let Some(body_type) = BodyType::resolve(record.method, status, headers.headers.iter())
        else {
            // The request keeps owning the head of the queue when the
            // framing cannot be determined.
            let _ = self.tx_tokens.insert(0, record);

            return Err(Error::InvalidHeaders);
        };

        self.msg_connection = headers.connection_type();
        self.parser = Some(BodyReader::new(body_type));

        debug!(
            "Response {code}, body {body_type:?}, connection {:?}",
            self.msg_connection
        );

        self.deliver(body).await
    }

    /// Move body bytes to the caller: cached spillover first, then straight
    /// off the socket. Bytes received past the end of the message are kept
    /// as the prefix of the next one.
    async fn deliver(&mut self, body: &mut [u8]) -> Result<usize, Error<T::Error>> {
        let mut written = 0;

        loop {
            let Some(parser) = self.parser.as_mut() else {
                break;
            };

            let cached = &self.cache[self.cache_offset..];

            if !cached.is_empty() {
                let (consumed, emitted) = parser
                    .advance(cached, &mut body[written..])
                    .map_err(|_| Error::InvalidBody)?;

                self.cache_offset += consumed;
                written += emitted;

                if self.parser.as_ref().unwrap().is_complete() {
                    self.finish_message();
                    break;
                }

                if written == body.len() || (consumed == 0 && emitted == 0) {
                    break;
                }

                continue;
            }

            // The cache is drained; anything further comes off the wire.
            self.cache.clear();
            self.cache_offset = 0;

            if written == body.len() && !parser.is_complete() {
                break;
            }

            match parser {
                BodyReader::NoBody => {
                    self.finish_message();
                    break;
                }
                BodyReader::ContentLen { remaining } => {
                    let want = (*remaining).min((body.len() - written) as u64) as usize;

                    if want == 0 {
                        self.finish_message();
                        break;
                    }

                    let io = self.io.as_mut().ok_or(Error::ConnectionClosed)?;
                    let len = io
                        .read(&mut body[written..written + want])
                        .await
                        .map_err(Error::Io)?;

                    if len == 0 {
                        return Err(Error::IncompleteBody);
                    }

                    *remaining -= len as u64;
                    written += len;

                    if *remaining == 0 {
                        self.finish_message();
                        break;
                    }
                }
                BodyReader::Close { .. } => {
                    let io = self.io.as_mut().ok_or(Error::ConnectionClosed)?;
                    let len = io.read(&mut body[written..]).await.map_err(Error::Io)?;

                    if len == 0 {
                        let parser = self.parser.as_mut().unwrap();
                        parser
                            .connection_closed()
                            .map_err(|_| Error::IncompleteBody)?;

                        self.finish_message();
                        break;
                    }

                    written += len;
                }
                BodyReader::Chunked(_) => {
                    let io = self.io.as_mut().ok_or(Error::ConnectionClosed)?;

                    let mut scratch = [0; RX_SCRATCH];
                    let len = io.read(&mut scratch).await.map_err(Error::Io)?;

                    if len == 0 {
                        return Err(Error::IncompleteBody);
                    }

                    self.cache
                        .extend_from_slice(&scratch[..len])
                        .map_err(|_| Error::OutOfResources)?;
                    self.cache_offset = 0;
                }
            }
        }

        Ok(written)
    }

    /// The current message is over: remember where the next one starts in
    /// the cache and retire the connection when the message said so.
    fn finish_message(&mut self) {
        let keeps_connection = self
            .parser
            .take()
            .map(|parser| parser.keeps_connection())
            .unwrap_or(true);

        if self.cache_offset < self.cache.len() {
            self.next_msg = Some(self.cache_offset);
        } else {
            self.cache.clear();
            self.cache_offset = 0;
            self.next_msg = None;
        }

        if !keeps_connection || self.msg_connection == ConnectionType::Close {
            self.io = None;
            self.state = HttpState::TcpClosed;
        }
    }
}

fn url_error<E>(e: UrlError) -> Error<E> {
    match e {
        UrlError::UnsupportedScheme => Error::Unsupported,
        UrlError::InvalidAuthority | UrlError::MissingPath => Error::InvalidParameter,
    }
}

#[cfg(test)]
mod test {
    use core::cell::RefCell;
    use core::convert::Infallible;
    use core::net::Ipv4Addr;

    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec as StdVec;

    use embassy_futures::block_on;

    use embedded_io_async::ErrorType;

    use super::*;

    #[derive(Default)]
    struct FakeNet {
        connects: RefCell<usize>,
        last_remote: RefCell<Option<SocketAddr>>,
        rx: Rc<RefCell<VecDeque<StdVec<u8>>>>,
        tx: Rc<RefCell<StdVec<u8>>>,
    }

    impl FakeNet {
        fn push_rx(&self, segment: &[u8]) {
            self.rx.borrow_mut().push_back(segment.to_vec());
        }

        fn connects(&self) -> usize {
            *self.connects.borrow()
        }

        fn sent(&self) -> StdVec<u8> {
            self.tx.borrow().clone()
        }
    }

    struct FakeSocket {
        rx: Rc<RefCell<VecDeque<StdVec<u8>>>>,
        tx: Rc<RefCell<StdVec<u8>>>,
    }

    impl ErrorType for FakeSocket {
        type Error = Infallible;
    }

    impl Read for FakeSocket {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            let Some(mut segment) = self.rx.borrow_mut().pop_front() else {
                return Ok(0);
            };

            let len = segment.len().min(buf.len());
            buf[..len].copy_from_slice(&segment[..len]);

            if len < segment.len() {
                segment.drain(..len);
                self.rx.borrow_mut().push_front(segment);
            }

            Ok(len)
        }
    }

    impl Write for FakeSocket {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.tx.borrow_mut().extend_from_slice(buf);

            Ok(buf.len())
        }
    }

    impl TcpShutdown for FakeSocket {
        async fn close(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        async fn abort(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    impl TcpConnect for FakeNet {
        type Error = Infallible;

        type Socket<'a>
            = FakeSocket
        where
            Self: 'a;

        async fn connect(&self, remote: SocketAddr) -> Result<Self::Socket<'_>, Self::Error> {
            *self.connects.borrow_mut() += 1;
            *self.last_remote.borrow_mut() = Some(remote);

            Ok(FakeSocket {
                rx: self.rx.clone(),
                tx: self.tx.clone(),
            })
        }
    }

    struct FixedDns {
        addr: IpAddr,
        lookups: RefCell<usize>,
    }

    impl FixedDns {
        fn new(addr: IpAddr) -> Self {
            Self {
                addr,
                lookups: RefCell::new(0),
            }
        }
    }

    impl Dns for FixedDns {
        type Error = Infallible;

        async fn get_host_by_name(
            &self,
            _host: &str,
            _addr_type: AddrType,
        ) -> Result<IpAddr, Self::Error> {
            *self.lookups.borrow_mut() += 1;

            Ok(self.addr)
        }
    }

    fn connected_instance<'b, 't>(
        net: &'b FakeNet,
        dns: &'b FixedDns,
    ) -> HttpInstance<'b, 't, FakeNet, FixedDns> {
        let mut instance = HttpInstance::new(net, dns);
        instance.configure(&Config::new()).unwrap();
        instance
    }

    fn get(
        instance: &mut HttpInstance<'_, 'static, FakeNet, FixedDns>,
        url: &str,
    ) -> (u16, StdVec<u8>) {
        let token: &'static HttpToken = std::boxed::Box::leak(std::boxed::Box::new(
            HttpToken::new(),
        ));

        block_on(instance.request(token, Method::Get, url, &[("Host", "h")], &[])).unwrap();
        assert!(matches!(token.try_result(), Some(Ok(()))));

        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 1024];
        let mut body = [0; 1024];

        let len =
            block_on(instance.response(token, &mut resp, &mut header_buf, &mut body)).unwrap();
        assert!(matches!(token.try_result(), Some(Ok(()))));

        (resp.code, body[..len].to_vec())
    }

    #[test]
    fn simple_get() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

        block_on(instance.request(
            &token,
            Method::Get,
            "http://10.0.0.1/file",
            &[("Host", "10.0.0.1")],
            &[],
        ))
        .unwrap();

        let request = net.sent();
        assert!(request.starts_with(b"GET /file HTTP/1.1\r\n"));
        assert!(request.ends_with(b"\r\n\r\n"));

        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 1024];
        let mut body = [0; 64];

        let len =
            block_on(instance.response(&token, &mut resp, &mut header_buf, &mut body)).unwrap();

        assert_eq!(resp.code, 200);
        assert_eq!(resp.status, crate::Status::Ok);
        assert_eq!(resp.headers.content_len(), Some(5));
        assert_eq!(&body[..len], b"hello");
        assert!(instance.is_response_complete());

        // Resolved as a literal address: the DNS collaborator is idle.
        assert_eq!(*dns.lookups.borrow(), 0);
        assert_eq!(net.connects(), 1);
        assert_eq!(
            *net.last_remote.borrow(),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 80))
        );
    }

    #[test]
    fn host_names_resolve_through_dns() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 204 No Content\r\n\r\n");

        let (code, body) = get(&mut instance, "http://example.com:8080/x");

        assert_eq!(code, 204);
        assert!(body.is_empty());
        assert_eq!(*dns.lookups.borrow(), 1);
        assert_eq!(
            *net.last_remote.borrow(),
            Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)),
                8080
            ))
        );
    }

    #[test]
    fn persistent_connection_reused() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nab");
        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\ncd");

        let (_, first) = get(&mut instance, "http://10.0.0.1/a");
        let (_, second) = get(&mut instance, "http://10.0.0.1/b");

        assert_eq!(first, b"ab");
        assert_eq!(second, b"cd");
        assert_eq!(net.connects(), 1);
    }

    #[test]
    fn origin_change_reconnects() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

        let _ = get(&mut instance, "http://10.0.0.1/a");
        let _ = get(&mut instance, "http://10.0.0.2/a");

        assert_eq!(net.connects(), 2);
    }

    #[test]
    fn headers_split_across_segments() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nCont");
        net.push_rx(b"ent-Length: 5\r\nX-A");
        net.push_rx(b": b\r\n\r\nhel");
        net.push_rx(b"lo");

        let (code, body) = get(&mut instance, "http://10.0.0.1/f");

        assert_eq!(code, 200);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn pipelined_response_spillover() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let first_token = HttpToken::new();
        let second_token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);

        // Both responses arrive in one TCP segment; the second must be
        // served from spillover without touching the socket again.
        net.push_rx(
            b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nabcHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
        );

        block_on(instance.request(
            &first_token,
            Method::Get,
            "http://10.0.0.1/a",
            &[("Host", "h")],
            &[],
        ))
        .unwrap();
        block_on(instance.request(
            &second_token,
            Method::Get,
            "http://10.0.0.1/b",
            &[("Host", "h")],
            &[],
        ))
        .unwrap();

        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 1024];
        let mut body = [0; 64];

        let len = block_on(instance.response(&first_token, &mut resp, &mut header_buf, &mut body))
            .unwrap();
        assert_eq!(resp.code, 200);
        assert_eq!(&body[..len], b"abc");

        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 1024];

        let len = block_on(instance.response(&second_token, &mut resp, &mut header_buf, &mut body))
            .unwrap();
        assert_eq!(resp.code, 404);
        assert_eq!(len, 0);
        assert!(instance.is_response_complete());
    }

    #[test]
    fn zero_content_length_keeps_connection() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

        let (code, body) = get(&mut instance, "http://10.0.0.1/empty");

        assert_eq!(code, 200);
        assert!(body.is_empty());
        assert_eq!(instance.state(), HttpState::TcpConnected);
    }

    #[test]
    fn chunked_body() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
        net.push_rx(b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");

        let (code, body) = get(&mut instance, "http://10.0.0.1/chunked");

        assert_eq!(code, 200);
        assert_eq!(body, b"hello world");
    }

    #[test]
    fn head_has_no_body() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
        block_on(instance.request(
            &token,
            Method::Head,
            "http://10.0.0.1/big",
            &[("Host", "h")],
            &[],
        ))
        .unwrap();

        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 1024];
        let mut body = [0; 64];

        let len =
            block_on(instance.response(&token, &mut resp, &mut header_buf, &mut body)).unwrap();

        assert_eq!(len, 0);
        assert!(instance.is_response_complete());
        assert_eq!(instance.state(), HttpState::TcpConnected);
    }

    #[test]
    fn connection_close_retires_the_socket() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok");

        let (code, body) = get(&mut instance, "http://10.0.0.1/last");

        assert_eq!(code, 200);
        assert_eq!(body, b"ok");
        assert_eq!(instance.state(), HttpState::TcpClosed);

        // The next request to the same origin reconnects.
        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let _ = get(&mut instance, "http://10.0.0.1/again");

        assert_eq!(net.connects(), 2);
    }

    #[test]
    fn read_to_close_body() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\n\r\nall the way");
        // The queue runs dry afterwards, which reads as EOF.

        let (code, body) = get(&mut instance, "http://10.0.0.1/stream");

        assert_eq!(code, 200);
        assert_eq!(body, b"all the way");
        assert_eq!(instance.state(), HttpState::TcpClosed);
    }

    #[test]
    fn body_across_multiple_calls() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);

        net.push_rx(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n0123456789");
        block_on(instance.request(
            &token,
            Method::Get,
            "http://10.0.0.1/f",
            &[("Host", "h")],
            &[],
        ))
        .unwrap();

        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 1024];
        let mut body = [0; 4];

        let mut total = StdVec::new();

        let len =
            block_on(instance.response(&token, &mut resp, &mut header_buf, &mut body)).unwrap();
        total.extend_from_slice(&body[..len]);

        while !instance.is_response_complete() {
            let len = block_on(instance.response_body(&token, &mut body)).unwrap();
            total.extend_from_slice(&body[..len]);
        }

        assert_eq!(total, b"0123456789");
    }

    #[test]
    fn unsupported_method_refused() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);
        let result = block_on(instance.request(
            &token,
            Method::Post,
            "http://10.0.0.1/x",
            &[],
            b"data",
        ));

        assert!(matches!(result, Err(Error::Unsupported)));
        assert!(token.try_result().is_none());
    }

    #[test]
    fn duplicate_token_refused() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);

        block_on(instance.request(&token, Method::Get, "http://10.0.0.1/a", &[], &[])).unwrap();

        let result =
            block_on(instance.request(&token, Method::Get, "http://10.0.0.1/b", &[], &[]));

        assert!(matches!(result, Err(Error::AccessDenied)));
    }

    #[test]
    fn cancel_queued_tokens() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();
        let other = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);
        block_on(instance.request(&token, Method::Get, "http://10.0.0.1/a", &[], &[])).unwrap();
        let _ = token.try_result();

        instance.cancel(Some(&token)).unwrap();
        assert!(matches!(token.try_result(), Some(Err(Error::Aborted))));

        assert!(matches!(
            instance.cancel(Some(&other)),
            Err(Error::NotFound)
        ));

        // With nothing queued any more, a response cannot start.
        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 256];
        let mut body = [0; 16];

        let result =
            block_on(instance.response(&other, &mut resp, &mut header_buf, &mut body));
        assert!(matches!(result, Err(Error::NotReady)));
    }

    #[test]
    fn response_without_connection() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = connected_instance(&net, &dns);
        let mut resp = ResponseHeaders::<16>::new();
        let mut header_buf = [0; 256];
        let mut body = [0; 16];

        let result = block_on(instance.response(&token, &mut resp, &mut header_buf, &mut body));

        assert!(matches!(result, Err(Error::NotStarted)));
    }

    #[test]
    fn request_when_unconfigured() {
        let net = FakeNet::default();
        let dns = FixedDns::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 1)));

        let token = HttpToken::new();

        let mut instance = HttpInstance::new(&net, &dns);
        let result = block_on(instance.request(&token, Method::Get, "http://h/x", &[], &[]));

        assert!(matches!(result, Err(Error::NotStarted)));
    }
}
