//! Minimal URL splitting for request targets.
//!
//! The client only ever needs four things out of a URL: the scheme (which
//! fixes the default port), the host, the port and the absolute path that
//! goes on the request line.

use core::fmt::{self, Display};

/// Default port for `http` URLs.
pub const HTTP_DEFAULT_PORT: u16 = 80;

/// Default port for `https` URLs.
pub const HTTPS_DEFAULT_PORT: u16 = 443;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Http => HTTP_DEFAULT_PORT,
            Self::Https => HTTPS_DEFAULT_PORT,
        }
    }
}

/// The split parts of a request URL, borrowing the original string.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Url<'a> {
    pub scheme: Scheme,
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UrlError {
    /// The scheme is missing or not `http`/`https`
    UnsupportedScheme,
    /// The authority is empty or the port does not parse
    InvalidAuthority,
    /// No `/` follows the authority
    MissingPath,
}

impl Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedScheme => write!(f, "Unsupported URL scheme"),
            Self::InvalidAuthority => write!(f, "Invalid URL authority"),
            Self::MissingPath => write!(f, "URL has no path after the authority"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for UrlError {}

/// Split `url` into scheme, host, port and absolute path.
///
/// A URL whose authority is not followed by a `/` is refused rather than
/// patched up with an implied root path.
pub fn parse(url: &str) -> Result<Url<'_>, UrlError> {
    let (scheme, rest) = if let Some(rest) = strip_prefix_ignore_case(url, "http://") {
        (Scheme::Http, rest)
    } else if let Some(rest) = strip_prefix_ignore_case(url, "https://") {
        (Scheme::Https, rest)
    } else {
        return Err(UrlError::UnsupportedScheme);
    };

    let slash = rest.find('/').ok_or(UrlError::MissingPath)?;
    let (authority, path) = rest.split_at(slash);

    if authority.is_empty() {
        return Err(UrlError::InvalidAuthority);
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| UrlError::InvalidAuthority)?;

            (host, port)
        }
        None => (authority, scheme.default_port()),
    };

    if host.is_empty() {
        return Err(UrlError::InvalidAuthority);
    }

    Ok(Url {
        scheme,
        host,
        port,
        path,
    })
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}
