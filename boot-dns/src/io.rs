//! The resolver proper: a configured session over a UDP socket, with a
//! pending-query queue, per-second retransmission, and completion tokens.

use core::cell::RefCell;
use core::fmt::{self, Display};
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use core::ptr;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::{NoopRawMutex, RawMutex};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use heapless::{String, Vec};

use log::{debug, warn};

use rand_core::RngCore;

use boot_nal::{AddrType, Dns, UdpBind, UdpSocket};

use crate::cache::{CacheEntry, CacheError, DnsCache, ServerList, CACHE_CAPACITY, SERVER_CAPACITY};
use crate::{
    combine_ttl, encode_query, Response, Rtype, WireError, CLASS_IN, MAX_ANSWERS, MAX_MESSAGE_SIZE,
    MAX_NAME_LEN, PORT, RCODE_NAME_ERROR,
};

/// Queries one instance can have in flight at a time.
pub const MAX_PENDING: usize = 16;

/// Raw records returned by one general lookup.
pub const MAX_RECORDS: usize = 16;

/// RDATA bytes kept per raw record.
pub const MAX_RDATA: usize = 128;

/// Retry count used when the configuration asks for zero retries.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Lower bound on the retransmission interval, in seconds.
pub const RETRY_INTERVAL_FLOOR_SECS: u32 = 2;

/// An error at the resolver's boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error<E> {
    /// A precondition was violated by the caller
    InvalidParameter,
    /// The instance is not configured
    NotStarted,
    /// The instance is already configured and was not reset in between
    AlreadyStarted,
    /// A matching cache entry exists and no override was requested
    AccessDenied,
    /// The requested operation or record type is not implemented
    Unsupported,
    /// The name does not exist, or a cancel target was not queued
    NotFound,
    /// The retry budget is exhausted
    Timeout,
    /// Cancelled, or the response was malformed beyond recovery
    Aborted,
    /// A fixed-capacity buffer or queue is full
    OutOfResources,
    /// The server misbehaved
    DeviceError,
    /// No DNS server address is available
    NoMapping,
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
            Self::InvalidParameter => Error::InvalidParameter,
            Self::NotStarted => Error::NotStarted,
            Self::AlreadyStarted => Error::AlreadyStarted,
            Self::AccessDenied => Error::AccessDenied,
            Self::Unsupported => Error::Unsupported,
            Self::NotFound => Error::NotFound,
            Self::Timeout => Error::Timeout,
            Self::Aborted => Error::Aborted,
            Self::OutOfResources => Error::OutOfResources,
            Self::DeviceError => Error::DeviceError,
            Self::NoMapping => Error::NoMapping,
            Self::Io(e) => Error::Io(e.kind()),
        }
    }
}

impl<E> From<CacheError> for Error<E> {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::AccessDenied => Self::AccessDenied,
            CacheError::ZeroTimeout => Self::InvalidParameter,
            CacheError::Full => Self::OutOfResources,
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
            Self::InvalidParameter => write!(f, "Invalid parameter"),
            Self::NotStarted => write!(f, "Instance not configured"),
            Self::AlreadyStarted => write!(f, "Instance already configured"),
            Self::AccessDenied => write!(f, "Access denied"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::NotFound => write!(f, "Not found"),
            Self::Timeout => write!(f, "Retry budget exhausted"),
            Self::Aborted => write!(f, "Aborted"),
            Self::OutOfResources => write!(f, "Out of resources"),
            Self::DeviceError => write!(f, "Device error"),
            Self::NoMapping => write!(f, "No DNS server available"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: std::error::Error {}

/// The completion payload of one lookup.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DnsResponse {
    /// Addresses answering a host-to-address query
    HostToAddr(Vec<IpAddr, MAX_ANSWERS>),
    /// Raw records answering a general lookup
    Lookup(Vec<RawRecord, MAX_RECORDS>),
}

/// A resource record handed back verbatim by a general lookup.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RawRecord {
    pub name: String<MAX_NAME_LEN>,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Vec<u8, MAX_RDATA>,
}

pub type Completion = Result<DnsResponse, ErrorKind>;

/// The caller-owned handle for one asynchronous lookup.
///
/// The resolver borrows the token while the query is pending and signals it
/// exactly once: on answer, on retry exhaustion, or on cancellation. Tokens
/// must outlive the instance they are handed to; in a firmware image they
/// are typically statically allocated.
pub struct DnsToken {
    done: Signal<NoopRawMutex, Completion>,
}

impl DnsToken {
    pub const fn new() -> Self {
        Self {
            done: Signal::new(),
        }
    }

    /// Wait for the lookup to complete.
    pub async fn wait(&self) -> Completion {
        self.done.wait().await
    }

    /// Take the result if the lookup has completed.
    pub fn try_result(&self) -> Option<Completion> {
        self.done.try_take()
    }

    fn complete(&self, completion: Completion) {
        self.done.signal(completion);
    }
}

impl Default for DnsToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The transport carrying the queries. Only UDP is implemented.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

/// One resolver session's configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Servers to use, most preferred first. When empty, the session falls
    /// back to a server already known to the service.
    pub servers: Vec<IpAddr, SERVER_CAPACITY>,
    /// Take the station address from the platform default policy instead of
    /// `station_ip`/`subnet_mask`
    pub use_default_setting: bool,
    pub station_ip: IpAddr,
    /// Only meaningful for v4 stations
    pub subnet_mask: Ipv4Addr,
    pub local_port: u16,
    pub enable_cache: bool,
    pub protocol: Protocol,
    /// Zero selects [`DEFAULT_RETRY_COUNT`]
    pub retry_count: u32,
    /// Floored at [`RETRY_INTERVAL_FLOOR_SECS`]
    pub retry_interval_secs: u32,
}

impl Config {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            use_default_setting: true,
            station_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            subnet_mask: Ipv4Addr::UNSPECIFIED,
            local_port: 0,
            enable_cache: false,
            protocol: Protocol::Udp,
            retry_count: 0,
            retry_interval_secs: RETRY_INTERVAL_FLOOR_SECS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Unconfigured,
    Configured,
    Destroying,
}

/// A caller-owned snapshot of an instance's mode: the active configuration
/// plus copies of the service-wide server and cache lists.
#[derive(Debug, Clone)]
pub struct ModeData {
    pub config: Config,
    pub session_server: Option<IpAddr>,
    pub servers: Vec<IpAddr, SERVER_CAPACITY>,
    pub cache: Vec<CacheEntry, CACHE_CAPACITY>,
}

/// The shared facet of one address family: the TTL cache and the set of all
/// server addresses its instances have used.
///
/// Mutations happen inside a blocking critical section so the answer
/// handler, explicit cache updates and the aging tick cannot interleave;
/// readers copy out under the same protection.
pub struct DnsService<M>
where
    M: RawMutex,
{
    shared: Mutex<M, RefCell<Shared>>,
}

struct Shared {
    cache: DnsCache,
    servers: ServerList,
}

impl<M> DnsService<M>
where
    M: RawMutex,
{
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                cache: DnsCache::new(),
                servers: ServerList::new(),
            })),
        }
    }

    /// Add, replace or remove one cache entry; see [`DnsCache::update`].
    pub fn update_cache(
        &self,
        delete: bool,
        override_ttl: bool,
        entry: CacheEntry,
    ) -> Result<(), CacheError> {
        self.shared
            .lock(|shared| shared.borrow_mut().cache.update(delete, override_ttl, entry))
    }

    /// Copy the addresses cached for `host` into `out`.
    pub fn lookup_cache(&self, host: &str, out: &mut Vec<IpAddr, MAX_ANSWERS>) {
        self.shared.lock(|shared| shared.borrow().cache.lookup(host, out));
    }

    /// Age the cache by one second. Call once per second from the platform
    /// timer.
    pub fn tick(&self) {
        self.shared.lock(|shared| shared.borrow_mut().cache.tick());
    }

    pub fn add_server(&self, server: IpAddr) {
        self.shared
            .lock(|shared| shared.borrow_mut().servers.add(server));
    }

    pub fn first_server(&self) -> Option<IpAddr> {
        self.shared.lock(|shared| shared.borrow().servers.first())
    }

    pub fn servers_snapshot(&self) -> Vec<IpAddr, SERVER_CAPACITY> {
        self.shared.lock(|shared| {
            let shared = shared.borrow();

            Vec::from_slice(shared.servers.as_slice()).unwrap_or_default()
        })
    }

    pub fn cache_snapshot(&self) -> Vec<CacheEntry, CACHE_CAPACITY> {
        self.shared.lock(|shared| {
            let shared = shared.borrow();

            let mut out = Vec::new();
            for entry in shared.cache.entries() {
                let _ = out.push(entry.clone());
            }

            out
        })
    }
}

impl<M> Default for DnsService<M>
where
    M: RawMutex,
{
    fn default() -> Self {
        Self::new()
    }
}

struct Pending<'t> {
    token: &'t DnsToken,
    xid: u16,
    qtype: u16,
    qclass: u16,
    host: String<MAX_NAME_LEN>,
    packet: Vec<u8, MAX_MESSAGE_SIZE>,
    packet_to_live: u32,
    retry_counting: u32,
    retry_interval: u32,
    general: bool,
}

/// One resolver session.
///
/// Configuration binds the session's UDP endpoint through the platform
/// stack; the instance owns it until reset. The queue of pending queries
/// lives here, while the cache and server list are shared with the other
/// instances of the family through the [`DnsService`].
pub struct DnsInstance<'t, 's, M, S, R>
where
    M: RawMutex,
    S: UdpBind + 's,
{
    family: AddrType,
    state: State,
    config: Option<Config>,
    service: &'s DnsService<M>,
    socket: Option<S::Socket<'s>>,
    session_server: Option<IpAddr>,
    max_retry: u32,
    rng: R,
    pending: Vec<Pending<'t>, MAX_PENDING>,
}

impl<'t, 's, M, S, R> DnsInstance<'t, 's, M, S, R>
where
    M: RawMutex,
    S: UdpBind + 's,
    R: RngCore,
{
    pub fn new(family: AddrType, service: &'s DnsService<M>, rng: R) -> Self {
        Self {
            family,
            state: State::Unconfigured,
            config: None,
            service,
            socket: None,
            session_server: None,
            max_retry: 0,
            rng,
            pending: Vec::new(),
        }
    }

    pub fn family(&self) -> AddrType {
        self.family
    }

    pub fn is_configured(&self) -> bool {
        self.state == State::Configured
    }

    /// Start a session: validate and copy `config`, choose the session DNS
    /// server and bind the session's UDP endpoint to the station address
    /// and local port through `stack`.
    ///
    /// A second configure without an intervening [`Self::reset`] fails with
    /// `AlreadyStarted`.
    pub async fn configure(&mut self, config: &Config, stack: &'s S) -> Result<(), Error<S::Error>> {
        if self.state == State::Configured {
            return Err(Error::AlreadyStarted);
        }

        if config.protocol != Protocol::Udp {
            return Err(Error::Unsupported);
        }

        if !config.use_default_setting {
            self.validate_station(config)?;
        }

        let session_server = config
            .servers
            .first()
            .copied()
            .or_else(|| self.service.first_server())
            .ok_or(Error::NoMapping)?;

        let station = if config.use_default_setting {
            match self.family {
                AddrType::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                AddrType::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }
        } else {
            config.station_ip
        };

        let socket = stack
            .bind(SocketAddr::new(station, config.local_port))
            .await
            .map_err(Error::Io)?;

        self.service.add_server(session_server);

        self.max_retry = if config.retry_count == 0 {
            DEFAULT_RETRY_COUNT
        } else {
            config.retry_count
        };

        self.session_server = Some(session_server);
        self.config = Some(config.clone());
        self.socket = Some(socket);
        self.state = State::Configured;

        Ok(())
    }

    /// Tear the session down: cancel every pending query with `Aborted`,
    /// release the socket and clear the configuration.
    pub fn reset(&mut self) {
        self.state = State::Destroying;

        while let Some(entry) = self.pending.pop() {
            entry.token.complete(Err(Error::Aborted));
        }

        self.socket = None;
        self.session_server = None;
        self.config = None;
        self.max_retry = 0;
        self.state = State::Unconfigured;
    }

    /// Translate `hostname` into addresses of this instance's family.
    ///
    /// With the cache enabled and populated, the token completes on the spot
    /// from cached entries and nothing reaches the wire. Otherwise a query
    /// is built, remembered for retransmission and handed to the socket;
    /// the token completes from [`Self::poll`] or [`Self::tick`].
    pub async fn host_name_to_ip(
        &mut self,
        hostname: &str,
        token: &'t DnsToken,
    ) -> Result<(), Error<S::Error>> {
        if self.state != State::Configured {
            return Err(Error::NotStarted);
        }

        let config = self.config.as_ref().unwrap();

        if config.enable_cache {
            let mut cached = Vec::new();
            self.service.lookup_cache(hostname, &mut cached);
            cached.retain(|addr| family_of(addr) == self.family);

            if !cached.is_empty() {
                token.complete(Ok(DnsResponse::HostToAddr(cached)));

                return Ok(());
            }
        }

        let qtype = match self.family {
            AddrType::V4 => Rtype::A as u16,
            AddrType::V6 => Rtype::Aaaa as u16,
        };

        self.start_query(hostname, qtype, CLASS_IN, token, false)
            .await
    }

    /// Issue a query for an arbitrary record type and class. The cache is
    /// not consulted and the raw records are returned unparsed.
    pub async fn general_lookup(
        &mut self,
        qname: &str,
        qtype: u16,
        qclass: u16,
        token: &'t DnsToken,
    ) -> Result<(), Error<S::Error>> {
        if self.state != State::Configured {
            return Err(Error::NotStarted);
        }

        self.start_query(qname, qtype, qclass, token, true).await
    }

    /// Cancel one pending query, or all of them when `token` is `None`.
    /// Cancelled tokens complete with `Aborted`. Cancelling a token that is
    /// not queued reports `NotFound`.
    pub fn cancel(&mut self, token: Option<&DnsToken>) -> Result<(), Error<S::Error>> {
        match token {
            None => {
                while let Some(entry) = self.pending.pop() {
                    entry.token.complete(Err(Error::Aborted));
                }

                Ok(())
            }
            Some(token) => {
                let index = self
                    .pending
                    .iter()
                    .position(|entry| ptr::eq(entry.token, token))
                    .ok_or(Error::NotFound)?;

                let entry = self.pending.remove(index);
                entry.token.complete(Err(Error::Aborted));

                Ok(())
            }
        }
    }

    /// Advance the retransmission clock by one second.
    ///
    /// Every pending query's time-to-live is decremented; expired queries
    /// are retransmitted while their retry counter allows and complete with
    /// `Timeout` once it does not. Call once per second from the platform
    /// timer.
    pub async fn tick(&mut self) {
        let mut index = 0;

        while index < self.pending.len() {
            let entry = &mut self.pending[index];

            entry.packet_to_live -= 1;
            if entry.packet_to_live > 0 {
                index += 1;
                continue;
            }

            entry.retry_counting += 1;
            if entry.retry_counting <= self.max_retry {
                entry.packet_to_live = entry.retry_interval;

                let remote = SocketAddr::new(self.session_server.unwrap(), PORT);

                if let Some(socket) = self.socket.as_mut() {
                    // Send failures here are recoverable: the query stays
                    // queued and times out once the retries run out.
                    if socket.send(remote, &self.pending[index].packet).await.is_err() {
                        warn!("DNS retransmission failed");
                    }
                }

                index += 1;
            } else {
                let entry = self.pending.remove(index);
                entry.token.complete(Err(Error::Timeout));
            }
        }
    }

    /// Drive the socket once: receive a single datagram and feed it to the
    /// matcher.
    pub async fn poll(&mut self) -> Result<(), Error<S::Error>> {
        let socket = self.socket.as_mut().ok_or(Error::NotStarted)?;

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let (len, _remote) = socket.receive(&mut buf).await.map_err(Error::Io)?;

        if len > buf.len() {
            debug!("Oversized DNS datagram dropped");
            return Ok(());
        }

        self.handle_response(&buf[..len]);

        Ok(())
    }

    /// Resolve `hostname` in one call, driving retransmission inline.
    ///
    /// This is the synchronous-looking facade over the same wire logic: one
    /// query with `select(receive, retry timer)`, retransmitted up to the
    /// configured count. The pending-token queue is not involved.
    pub async fn resolve(
        &mut self,
        hostname: &str,
    ) -> Result<Vec<IpAddr, MAX_ANSWERS>, Error<S::Error>> {
        if self.state != State::Configured {
            return Err(Error::NotStarted);
        }

        let config = self.config.as_ref().unwrap();
        let enable_cache = config.enable_cache;
        let retry_interval = config.retry_interval_secs.max(RETRY_INTERVAL_FLOOR_SECS);
        let max_retry = self.max_retry;
        let family = self.family;
        let service = self.service;

        if enable_cache {
            let mut cached = Vec::new();
            service.lookup_cache(hostname, &mut cached);
            cached.retain(|addr| family_of(addr) == family);

            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let qtype = match family {
            AddrType::V4 => Rtype::A as u16,
            AddrType::V6 => Rtype::Aaaa as u16,
        };

        let xid = fresh_xid(&mut self.rng, &self.pending);
        let remote = SocketAddr::new(self.session_server.unwrap(), PORT);

        let mut query_buf = [0; MAX_MESSAGE_SIZE];
        let query = encode_query(xid, hostname, qtype, CLASS_IN, &mut query_buf)
            .map_err(query_build_error)?;

        let socket = self.socket.as_mut().unwrap();

        socket.send(remote, query).await.map_err(Error::Io)?;

        let mut retries = 0;
        let mut rx = [0; MAX_MESSAGE_SIZE];

        loop {
            let timer = Timer::after(Duration::from_secs(retry_interval as u64));

            match select(socket.receive(&mut rx), timer).await {
                Either::First(result) => {
                    let (len, _remote) = result.map_err(Error::Io)?;
                    if len > rx.len() {
                        continue;
                    }

                    let Ok(response) = Response::parse(&rx[..len]) else {
                        continue;
                    };

                    if response.header.id != xid
                        || response.qtype != qtype
                        || response.qclass != CLASS_IN
                    {
                        continue;
                    }

                    match check_and_collect(family, false, hostname, service, &response) {
                        Ok(DnsResponse::HostToAddr(addrs)) => return Ok(addrs),
                        Ok(DnsResponse::Lookup(_)) => unreachable!(),
                        Err(status) => return Err(promote(status)),
                    }
                }
                Either::Second(_) => {
                    retries += 1;
                    if retries > max_retry {
                        return Err(Error::Timeout);
                    }

                    if socket.send(remote, query).await.is_err() {
                        warn!("DNS retransmission failed");
                    }
                }
            }
        }
    }

    /// Snapshot the configuration plus copies of the shared server and cache
    /// lists. The snapshot is owned by the caller.
    pub fn mode_data(&self) -> Result<ModeData, Error<S::Error>> {
        let config = self.config.as_ref().ok_or(Error::NotStarted)?;

        Ok(ModeData {
            config: config.clone(),
            session_server: self.session_server,
            servers: self.service.servers_snapshot(),
            cache: self.service.cache_snapshot(),
        })
    }

    /// Add, replace or remove one shared cache entry.
    pub fn update_dns_cache(
        &self,
        delete: bool,
        override_ttl: bool,
        entry: CacheEntry,
    ) -> Result<(), Error<S::Error>> {
        self.service
            .update_cache(delete, override_ttl, entry)
            .map_err(Into::into)
    }

    async fn start_query(
        &mut self,
        name: &str,
        qtype: u16,
        qclass: u16,
        token: &'t DnsToken,
        general: bool,
    ) -> Result<(), Error<S::Error>> {
        let config = self.config.as_ref().unwrap();
        let retry_interval = config.retry_interval_secs.max(RETRY_INTERVAL_FLOOR_SECS);

        let host = String::try_from(name).map_err(|_| Error::InvalidParameter)?;

        let xid = fresh_xid(&mut self.rng, &self.pending);

        let mut buf = [0; MAX_MESSAGE_SIZE];
        let query = encode_query(xid, name, qtype, qclass, &mut buf).map_err(query_build_error)?;

        let packet = Vec::from_slice(query).map_err(|_| Error::OutOfResources)?;

        self.pending
            .push(Pending {
                token,
                xid,
                qtype,
                qclass,
                host,
                packet,
                packet_to_live: retry_interval,
                retry_counting: 0,
                retry_interval,
                general,
            })
            .map_err(|_| Error::OutOfResources)?;

        let remote = SocketAddr::new(self.session_server.unwrap(), PORT);
        let socket = self.socket.as_mut().unwrap();

        let result = socket
            .send(remote, &self.pending.last().unwrap().packet)
            .await;

        if let Err(e) = result {
            self.pending.pop();

            return Err(Error::Io(e));
        }

        Ok(())
    }

    /// Match one incoming packet against the pending queue and complete the
    /// owning token.
    ///
    /// A packet that fails validation before a queue entry is matched is
    /// dropped silently; once matched, every failure completes the token.
    fn handle_response(&mut self, packet: &[u8]) {
        let response = match Response::parse(packet) {
            Ok(response) => response,
            Err(e) => {
                debug!("Dropping malformed DNS response: {e}");
                return;
            }
        };

        let header = response.header;

        let Some(index) = self.pending.iter().position(|entry| {
            entry.xid == header.id
                && entry.qtype == response.qtype
                && entry.qclass == response.qclass
        }) else {
            debug!("DNS response matches no pending query");
            return;
        };

        if header.flags.rcode() != 0 || header.answers == 0 || !header.flags.is_response() {
            let status = if header.flags.rcode() == RCODE_NAME_ERROR {
                Error::NotFound
            } else {
                Error::DeviceError
            };

            let entry = self.pending.remove(index);
            entry.token.complete(Err(status));

            return;
        }

        let entry = &self.pending[index];
        let outcome = check_and_collect(
            self.family,
            entry.general,
            &entry.host,
            self.service,
            &response,
        );

        let entry = self.pending.remove(index);
        entry.token.complete(outcome);
    }

    fn validate_station(&self, config: &Config) -> Result<(), Error<S::Error>> {
        match (self.family, config.station_ip) {
            (AddrType::V4, IpAddr::V4(ip)) => {
                if !is_valid_netmask(config.subnet_mask) || !is_unicast_v4(ip, config.subnet_mask) {
                    Err(Error::InvalidParameter)
                } else {
                    Ok(())
                }
            }
            (AddrType::V6, IpAddr::V6(ip)) => {
                if !is_unicast_v6(ip) {
                    Err(Error::InvalidParameter)
                } else {
                    Ok(())
                }
            }
            _ => Err(Error::InvalidParameter),
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// A [`Dns`] facade over a resolver instance, for collaborators that only
/// ever need "first address of this host".
pub struct Resolver<'t, 's, M, S, R>(RefCell<DnsInstance<'t, 's, M, S, R>>)
where
    M: RawMutex,
    S: UdpBind + 's;

impl<'t, 's, M, S, R> Resolver<'t, 's, M, S, R>
where
    M: RawMutex,
    S: UdpBind + 's,
    R: RngCore,
{
    pub fn new(instance: DnsInstance<'t, 's, M, S, R>) -> Self {
        Self(RefCell::new(instance))
    }

    pub fn release(self) -> DnsInstance<'t, 's, M, S, R> {
        self.0.into_inner()
    }
}

impl<'t, 's, M, S, R> Dns for Resolver<'t, 's, M, S, R>
where
    M: RawMutex,
    S: UdpBind + 's,
    R: RngCore,
{
    type Error = Error<S::Error>;

    async fn get_host_by_name(
        &self,
        host: &str,
        addr_type: AddrType,
    ) -> Result<IpAddr, Self::Error> {
        let mut instance = self.0.try_borrow_mut().map_err(|_| Error::AccessDenied)?;

        if instance.family() != addr_type {
            return Err(Error::Unsupported);
        }

        let addrs = instance.resolve(host).await?;

        addrs.first().copied().ok_or(Error::NotFound)
    }
}

/// Walk the answer section, collect addresses or raw records, and feed the
/// shared cache.
///
/// Address records must carry exactly 4 (A) or 16 (AAAA) bytes of RDATA and
/// match the instance family; CNAME records only contribute their TTL to
/// the cache lifetime; any other record type makes the response
/// unsupported. An all-CNAME response with no terminal address completes
/// with `NotFound`.
fn check_and_collect<M>(
    family: AddrType,
    general: bool,
    host: &str,
    service: &DnsService<M>,
    response: &Response<'_>,
) -> Result<DnsResponse, ErrorKind>
where
    M: RawMutex,
{
    let mut addrs: Vec<IpAddr, MAX_ANSWERS> = Vec::new();
    let mut records: Vec<RawRecord, MAX_RECORDS> = Vec::new();
    let mut cname_ttl = 0;

    for answer in response.answers() {
        let answer = match answer {
            Ok(answer) => answer,
            Err(WireError::UnsupportedNameForm) => return Err(Error::Unsupported),
            Err(_) => return Err(Error::Aborted),
        };

        if general {
            let record = RawRecord {
                name: String::try_from(host).map_err(|_| Error::OutOfResources)?,
                rtype: answer.rtype,
                rclass: answer.rclass,
                ttl: answer.ttl,
                rdata: Vec::from_slice(answer.rdata).map_err(|_| Error::OutOfResources)?,
            };

            records.push(record).map_err(|_| Error::OutOfResources)?;

            continue;
        }

        match Rtype::try_from(answer.rtype) {
            Ok(Rtype::A) if family == AddrType::V4 => {
                if answer.rdata.len() != 4 {
                    return Err(Error::Aborted);
                }

                let octets: [u8; 4] = answer.rdata.try_into().unwrap();
                let addr = IpAddr::V4(Ipv4Addr::from(octets));

                addrs.push(addr).map_err(|_| Error::OutOfResources)?;

                cache_address(service, host, addr, cname_ttl, answer.ttl);
            }
            Ok(Rtype::Aaaa) if family == AddrType::V6 => {
                if answer.rdata.len() != 16 {
                    return Err(Error::Aborted);
                }

                let octets: [u8; 16] = answer.rdata.try_into().unwrap();
                let addr = IpAddr::V6(Ipv6Addr::from(octets));

                addrs.push(addr).map_err(|_| Error::OutOfResources)?;

                cache_address(service, host, addr, cname_ttl, answer.ttl);
            }
            Ok(Rtype::Cname) => {
                cname_ttl = answer.ttl;
            }
            _ => return Err(Error::Unsupported),
        }
    }

    if general {
        Ok(DnsResponse::Lookup(records))
    } else if addrs.is_empty() {
        Err(Error::NotFound)
    } else {
        Ok(DnsResponse::HostToAddr(addrs))
    }
}

fn cache_address<M>(service: &DnsService<M>, host: &str, addr: IpAddr, cname_ttl: u32, ttl: u32)
where
    M: RawMutex,
{
    let timeout = combine_ttl(cname_ttl, ttl);
    if timeout == 0 {
        return;
    }

    if let Some(entry) = CacheEntry::new(host, addr, timeout) {
        let _ = service.update_cache(false, true, entry);
    }
}

fn fresh_xid<R>(rng: &mut R, pending: &[Pending<'_>]) -> u16
where
    R: RngCore,
{
    loop {
        let xid = (rng.next_u32() & 0xFFFF) as u16;

        if !pending.iter().any(|entry| entry.xid == xid) {
            return xid;
        }
    }
}

fn query_build_error<E>(e: WireError) -> Error<E> {
    match e {
        WireError::InvalidName => Error::InvalidParameter,
        _ => Error::OutOfResources,
    }
}

fn promote<E>(e: ErrorKind) -> Error<E> {
    match e {
        Error::InvalidParameter => Error::InvalidParameter,
        Error::NotStarted => Error::NotStarted,
        Error::AlreadyStarted => Error::AlreadyStarted,
        Error::AccessDenied => Error::AccessDenied,
        Error::Unsupported => Error::Unsupported,
        Error::NotFound => Error::NotFound,
        Error::Timeout => Error::Timeout,
        Error::Aborted => Error::Aborted,
        Error::OutOfResources => Error::OutOfResources,
        Error::NoMapping => Error::NoMapping,
        Error::DeviceError | Error::Io(_) => Error::DeviceError,
    }
}

fn family_of(addr: &IpAddr) -> AddrType {
    match addr {
        IpAddr::V4(_) => AddrType::V4,
        IpAddr::V6(_) => AddrType::V6,
    }
}

fn is_valid_netmask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);

    bits != 0 && (!bits).wrapping_add(1) & !bits == 0
}

fn is_unicast_v4(ip: Ipv4Addr, mask: Ipv4Addr) -> bool {
    if ip.is_unspecified() || ip.is_multicast() || ip.is_broadcast() {
        return false;
    }

    let ip = u32::from(ip);
    let mask = u32::from(mask);
    let host = ip & !mask;

    host != 0 && host != !mask
}

fn is_unicast_v6(ip: Ipv6Addr) -> bool {
    !ip.is_unspecified() && !ip.is_multicast()
}
