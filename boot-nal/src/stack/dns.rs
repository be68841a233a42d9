use core::net::IpAddr;

/// The host address family to resolve.
///
/// `V4` looks for `A` records, `V6` for `AAAA` records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddrType {
    /// Resolve to an `A` record
    V4,
    /// Resolve to an `AAAA` record
    V6,
}

/// Host resolution facade.
///
/// The HTTP client calls through this trait whenever a request URL names a
/// host rather than a literal address. Only forward (name to address)
/// resolution is modeled; reverse lookups are out of scope for the boot
/// path.
pub trait Dns {
    /// The type returned when resolution fails
    type Error: embedded_io_async::Error;

    /// Resolve the first address of a host, given its name and the desired
    /// address family
    async fn get_host_by_name(
        &self,
        host: &str,
        addr_type: AddrType,
    ) -> Result<IpAddr, Self::Error>;
}

impl<T> Dns for &T
where
    T: Dns,
{
    type Error = T::Error;

    async fn get_host_by_name(
        &self,
        host: &str,
        addr_type: AddrType,
    ) -> Result<IpAddr, Self::Error> {
        T::get_host_by_name(self, host, addr_type).await
    }
}

impl<T> Dns for &mut T
where
    T: Dns,
{
    type Error = T::Error;

    async fn get_host_by_name(
        &self,
        host: &str,
        addr_type: AddrType,
    ) -> Result<IpAddr, Self::Error> {
        T::get_host_by_name(self, host, addr_type).await
    }
}
