#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)]

#[cfg(test)]
extern crate std;

use core::fmt::{self, Display};
use core::str;

pub mod url;

#[cfg(feature = "io")]
pub mod io;

/// Default capacity of a [`Headers`] map.
pub const DEFAULT_MAX_HEADERS_COUNT: usize = 64;

/// The request methods the client knows how to spell. Only `GET` and `HEAD`
/// are accepted by the request path; the rest exist so the refusal is
/// explicit rather than a parse failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Trace,
    Connect,
    Patch,
}

impl Method {
    pub fn new(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("Get") {
            Some(Self::Get)
        } else if method.eq_ignore_ascii_case("Head") {
            Some(Self::Head)
        } else if method.eq_ignore_ascii_case("Post") {
            Some(Self::Post)
        } else if method.eq_ignore_ascii_case("Put") {
            Some(Self::Put)
        } else if method.eq_ignore_ascii_case("Delete") {
            Some(Self::Delete)
        } else if method.eq_ignore_ascii_case("Options") {
            Some(Self::Options)
        } else if method.eq_ignore_ascii_case("Trace") {
            Some(Self::Trace)
        } else if method.eq_ignore_ascii_case("Connect") {
            Some(Self::Connect)
        } else if method.eq_ignore_ascii_case("Patch") {
            Some(Self::Patch)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Trace => "TRACE",
            Self::Connect => "CONNECT",
            Self::Patch => "PATCH",
        }
    }

    /// The methods the request path accepts.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named response statuses, one per numeric code the client maps. Codes
/// outside the table land on `UnsupportedStatus`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Continue,
    SwitchingProtocols,
    Ok,
    Created,
    Accepted,
    NonAuthoritativeInformation,
    NoContent,
    ResetContent,
    PartialContent,
    MultipleChoices,
    MovedPermanently,
    Found,
    SeeOther,
    NotModified,
    UseProxy,
    TemporaryRedirect,
    BadRequest,
    Unauthorized,
    PaymentRequired,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    ProxyAuthenticationRequired,
    RequestTimeout,
    Conflict,
    Gone,
    LengthRequired,
    PreconditionFailed,
    RequestEntityTooLarge,
    RequestUriTooLarge,
    UnsupportedMediaType,
    RequestedRangeNotSatisfied,
    ExpectationFailed,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    HttpVersionNotSupported,
    UnsupportedStatus,
}

impl Status {
    pub fn from_code(code: u16) -> Self {
        match code {
            100 => Self::Continue,
            101 => Self::SwitchingProtocols,
            200 => Self::Ok,
            201 => Self::Created,
            202 => Self::Accepted,
            203 => Self::NonAuthoritativeInformation,
            204 => Self::NoContent,
            205 => Self::ResetContent,
            206 => Self::PartialContent,
            300 => Self::MultipleChoices,
            301 => Self::MovedPermanently,
            302 => Self::Found,
            303 => Self::SeeOther,
            304 => Self::NotModified,
            305 => Self::UseProxy,
            307 => Self::TemporaryRedirect,
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            402 => Self::PaymentRequired,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            405 => Self::MethodNotAllowed,
            406 => Self::NotAcceptable,
            407 => Self::ProxyAuthenticationRequired,
            408 => Self::RequestTimeout,
            409 => Self::Conflict,
            410 => Self::Gone,
            411 => Self::LengthRequired,
            412 => Self::PreconditionFailed,
            413 => Self::RequestEntityTooLarge,
            414 => Self::RequestUriTooLarge,
            415 => Self::UnsupportedMediaType,
            416 => Self::RequestedRangeNotSatisfied,
            417 => Self::ExpectationFailed,
            500 => Self::InternalServerError,
            501 => Self::NotImplemented,
            502 => Self::BadGateway,
            503 => Self::ServiceUnavailable,
            504 => Self::GatewayTimeout,
            505 => Self::HttpVersionNotSupported,
            _ => Self::UnsupportedStatus,
        }
    }

    /// Statuses that forbid a message body outright.
    pub fn is_bodiless(&self) -> bool {
        matches!(
            self,
            Self::Continue | Self::SwitchingProtocols | Self::NoContent | Self::NotModified
        )
    }
}

/// How the response body is delimited on the wire.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BodyType {
    /// No body follows the headers (HEAD, 1xx, 204, 304)
    NoBody,
    /// Exactly this many bytes follow
    ContentLen(u64),
    /// `Transfer-Encoding: chunked` framing
    Chunked,
    /// The body runs until the peer closes the connection
    Close,
}

impl BodyType {
    /// Decide the framing of a response from the request method, the status
    /// and the response headers. The method and status rule first; the
    /// headers are consulted only when a body is possible at all.
    pub fn resolve<'a, H>(method: Method, status: Status, headers: H) -> Option<Self>
    where
        H: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if method == Method::Head || status.is_bodiless() {
            return Some(Self::NoBody);
        }

        let mut body = None;

        for (name, value) in headers {
            if name.eq_ignore_ascii_case("Transfer-Encoding") {
                if value.eq_ignore_ascii_case("Chunked") {
                    body = Some(Self::Chunked);
                }
            } else if name.eq_ignore_ascii_case("Content-Length") {
                match value.parse::<u64>() {
                    Ok(len) => body = Some(Self::ContentLen(len)),
                    Err(_) => return None,
                }
            }
        }

        Some(body.unwrap_or(Self::Close))
    }
}

/// Whether the connection survives the current message.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub enum ConnectionType {
    #[default]
    KeepAlive,
    Close,
}

impl ConnectionType {
    pub fn from_headers<'a, H>(headers: H) -> Self
    where
        H: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("Connection") && value.eq_ignore_ascii_case("Close") {
                return Self::Close;
            }
        }

        Self::KeepAlive
    }
}

/// A fixed-capacity view over parsed header name/value pairs.
///
/// The names and values borrow the buffer the header block was parsed from.
#[derive(Debug)]
pub struct Headers<'b, const N: usize = DEFAULT_MAX_HEADERS_COUNT>([httparse::Header<'b>; N]);

impl<'b, const N: usize> Headers<'b, N> {
    pub const fn new() -> Self {
        Self([httparse::EMPTY_HEADER; N])
    }

    /// Parse a raw header block (terminated by an empty line) into this map.
    /// Returns the number of bytes consumed.
    pub fn load(&mut self, block: &'b [u8]) -> Result<usize, LoadHeadersError> {
        match httparse::parse_headers(block, &mut self.0) {
            Ok(httparse::Status::Complete((len, _))) => Ok(len),
            Ok(httparse::Status::Partial) => Err(LoadHeadersError::IncompleteHeaders),
            Err(httparse::Error::TooManyHeaders) => Err(LoadHeadersError::TooManyHeaders),
            Err(_) => Err(LoadHeadersError::InvalidHeaders),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter_raw()
            .map(|(name, value)| (name, unsafe { str::from_utf8_unchecked(value) }))
    }

    pub fn iter_raw(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0
            .iter()
            .filter(|header| !header.name.is_empty())
            .map(|header| (header.name, header.value))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(hname, _)| name.eq_ignore_ascii_case(hname))
            .map(|(_, value)| value)
    }

    pub fn content_len(&self) -> Option<u64> {
        self.get("Content-Length")
            .and_then(|value| value.parse::<u64>().ok())
    }

    pub fn transfer_encoding(&self) -> Option<&str> {
        self.get("Transfer-Encoding")
    }

    pub fn connection(&self) -> Option<&str> {
        self.get("Connection")
    }

    pub fn host(&self) -> Option<&str> {
        self.get("Host")
    }

    pub fn len(&self) -> usize {
        self.iter_raw().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'b, const N: usize> Default for Headers<'b, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// An error from loading a raw header block.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LoadHeadersError {
    InvalidHeaders,
    TooManyHeaders,
    IncompleteHeaders,
}

impl Display for LoadHeadersError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHeaders => write!(f, "Invalid headers"),
            Self::TooManyHeaders => write!(f, "Too many headers"),
            Self::IncompleteHeaders => write!(f, "Incomplete headers"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LoadHeadersError {}

/// The parsed status line and header block of one response, borrowing the
/// caller's header buffer.
#[derive(Debug)]
pub struct ResponseHeaders<'b, const N: usize = DEFAULT_MAX_HEADERS_COUNT> {
    pub code: u16,
    pub status: Status,
    pub headers: Headers<'b, N>,
}

impl<'b, const N: usize> ResponseHeaders<'b, N> {
    pub const fn new() -> Self {
        Self {
            code: 0,
            status: Status::UnsupportedStatus,
            headers: Headers::new(),
        }
    }

    pub fn connection_type(&self) -> ConnectionType {
        ConnectionType::from_headers(self.headers.iter())
    }
}

impl<'b, const N: usize> Default for ResponseHeaders<'b, N> {
    fn default() -> Self {
        Self::new()
    }
}
