//! The shared host-to-address cache and the process-wide server list.
//!
//! Both structures are plain values; the IO layer wraps them in a blocking
//! mutex so every resolver instance of one address family sees the same
//! cache, the way the answer handler, the explicit cache updates and the
//! aging tick all mutate one shared list in the original driver stack.

use core::fmt::{self, Display};
use core::net::IpAddr;

use heapless::{String, Vec};

use crate::{MAX_ANSWERS, MAX_NAME_LEN};

/// Entries the shared cache can hold.
pub const CACHE_CAPACITY: usize = 64;

/// Distinct DNS server addresses remembered per address family.
pub const SERVER_CAPACITY: usize = 8;

/// An error from a cache update.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CacheError {
    /// An equal entry exists and neither delete nor override was requested
    AccessDenied,
    /// An entry with a zero timeout was offered
    ZeroTimeout,
    /// The cache is full
    Full,
}

impl Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessDenied => write!(f, "Entry exists and override was not requested"),
            Self::ZeroTimeout => write!(f, "Zero timeout"),
            Self::Full => write!(f, "Cache full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CacheError {}

/// One cached host-to-address mapping.
///
/// `timeout_secs` counts down once per second; the entry is removed when it
/// reaches zero.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CacheEntry {
    pub host: String<MAX_NAME_LEN>,
    pub addr: IpAddr,
    pub timeout_secs: u32,
}

impl CacheEntry {
    pub fn new(host: &str, addr: IpAddr, timeout_secs: u32) -> Option<Self> {
        Some(Self {
            host: String::try_from(host).ok()?,
            addr,
            timeout_secs,
        })
    }

    fn matches(&self, other: &Self) -> bool {
        self.addr == other.addr && self.host.eq_ignore_ascii_case(&other.host)
    }
}

/// The TTL-driven cache for one address family.
#[derive(Debug, Default)]
pub struct DnsCache {
    entries: Vec<CacheEntry, CACHE_CAPACITY>,
}

impl DnsCache {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add, replace or remove one entry.
    ///
    /// When an entry matching both host name and address exists: it is
    /// removed if `delete` is set, its timeout is replaced if `override_ttl`
    /// is set, and the update is refused otherwise. When none exists and
    /// `delete` is clear, the entry is inserted. Inserting with a zero
    /// timeout is refused; deleting a missing entry is a no-op.
    pub fn update(
        &mut self,
        delete: bool,
        override_ttl: bool,
        entry: CacheEntry,
    ) -> Result<(), CacheError> {
        if !delete && entry.timeout_secs == 0 {
            return Err(CacheError::ZeroTimeout);
        }

        if let Some(index) = self.entries.iter().position(|item| item.matches(&entry)) {
            if delete {
                self.entries.remove(index);
            } else if override_ttl {
                self.entries[index].timeout_secs = entry.timeout_secs;
            } else {
                return Err(CacheError::AccessDenied);
            }

            return Ok(());
        }

        if !delete {
            self.entries.push(entry).map_err(|_| CacheError::Full)?;
        }

        Ok(())
    }

    /// Collect the addresses of every entry whose host name matches `host`.
    pub fn lookup(&self, host: &str, out: &mut Vec<IpAddr, MAX_ANSWERS>) {
        for entry in &self.entries {
            if entry.host.eq_ignore_ascii_case(host) {
                let _ = out.push(entry.addr);
            }
        }
    }

    /// Age the cache by one second: decrement every timeout and drop the
    /// entries that reach zero. After a tick no entry with a zero timeout
    /// remains.
    pub fn tick(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.timeout_secs = entry.timeout_secs.saturating_sub(1);
        }

        self.entries.retain(|entry| entry.timeout_secs != 0);
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The set of every DNS server address the instances of one family have
/// used, in first-use order.
#[derive(Debug, Default)]
pub struct ServerList {
    servers: Vec<IpAddr, SERVER_CAPACITY>,
}

impl ServerList {
    pub const fn new() -> Self {
        Self {
            servers: Vec::new(),
        }
    }

    /// Remember `server`; already-known addresses are left in place.
    pub fn add(&mut self, server: IpAddr) {
        if !self.servers.contains(&server) {
            let _ = self.servers.push(server);
        }
    }

    pub fn first(&self) -> Option<IpAddr> {
        self.servers.first().copied()
    }

    pub fn as_slice(&self) -> &[IpAddr] {
        &self.servers
    }
}
