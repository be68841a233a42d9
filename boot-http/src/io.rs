use core::fmt::{self, Display};

use embedded_io_async::Write;

use crate::{BodyType, LoadHeadersError, Method, Status};

pub mod client;

/// Bytes received from the transport in one turn while assembling headers
/// or decoding a chunked body.
pub const RX_SCRATCH: usize = 2048;

/// An error at the HTTP client's boundary.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error<E> {
    /// A precondition was violated by the caller
    InvalidParameter,
    /// The instance is not configured, or no connection is established
    NotStarted,
    /// No request is awaiting a response
    NotReady,
    /// The instance is already configured and was not reset in between
    AlreadyStarted,
    /// The token is already queued
    AccessDenied,
    /// The method or address family is not implemented
    Unsupported,
    /// Host resolution failed, or a cancel target was not queued
    NotFound,
    /// The connection attempt ran out of time
    Timeout,
    /// Cancelled
    Aborted,
    /// A fixed-capacity buffer or queue is full
    OutOfResources,
    /// The status line or a header could not be parsed
    InvalidHeaders,
    /// The body framing is malformed
    InvalidBody,
    /// More headers than the map can hold
    TooManyHeaders,
    /// The header block exceeds the caller's buffer
    TooLongHeaders,
    /// The peer closed mid-header-block
    IncompleteHeaders,
    /// The peer closed mid-body
    IncompleteBody,
    /// The peer closed before the message started
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
            Self::InvalidParameter => Error::InvalidParameter,
            Self::NotStarted => Error::NotStarted,
            Self::NotReady => Error::NotReady,
            Self::AlreadyStarted => Error::AlreadyStarted,
            Self::AccessDenied => Error::AccessDenied,
            Self::Unsupported => Error::Unsupported,
            Self::NotFound => Error::NotFound,
            Self::Timeout => Error::Timeout,
            Self::Aborted => Error::Aborted,
            Self::OutOfResources => Error::OutOfResources,
            Self::InvalidHeaders => Error::InvalidHeaders,
            Self::InvalidBody => Error::InvalidBody,
            Self::TooManyHeaders => Error::TooManyHeaders,
            Self::TooLongHeaders => Error::TooLongHeaders,
            Self::IncompleteHeaders => Error::IncompleteHeaders,
            Self::IncompleteBody => Error::IncompleteBody,
            Self::ConnectionClosed => Error::ConnectionClosed,
            Self::Io(e) => Error::Io(e.kind()),
        }
    }
}

impl<E> From<LoadHeadersError> for Error<E> {
    fn from(e: LoadHeadersError) -> Self {
        match e {
            LoadHeadersError::InvalidHeaders => Self::InvalidHeaders,
            LoadHeadersError::TooManyHeaders => Self::TooManyHeaders,
            LoadHeadersError::IncompleteHeaders => Self::IncompleteHeaders,
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
            Self::NotStarted => write!(f, "Instance not configured or not connected"),
            Self::NotReady => write!(f, "No request awaiting a response"),
            Self::AlreadyStarted => write!(f, "Instance already configured"),
            Self::AccessDenied => write!(f, "Token already queued"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::NotFound => write!(f, "Not found"),
            Self::Timeout => write!(f, "Timed out"),
            Self::Aborted => write!(f, "Aborted"),
            Self::OutOfResources => write!(f, "Out of resources"),
            Self::InvalidHeaders => write!(f, "Invalid HTTP headers or status line"),
            Self::InvalidBody => write!(f, "Invalid HTTP body"),
            Self::TooManyHeaders => write!(f, "Too many HTTP headers"),
            Self::TooLongHeaders => write!(f, "HTTP headers section is too long"),
            Self::IncompleteHeaders => write!(f, "HTTP headers section is incomplete"),
            Self::IncompleteBody => write!(f, "HTTP body is incomplete"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Io(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(feature = "std")]
impl<E> std::error::Error for Error<E> where E: std::error::Error {}

/// Send `METHOD SP absolute-path SP HTTP/1.1 CRLF`.
pub(crate) async fn send_request_line<W>(
    method: Method,
    path: &str,
    output: &mut W,
) -> Result<(), Error<W::Error>>
where
    W: Write,
{
    output
        .write_all(method.as_str().as_bytes())
        .await
        .map_err(Error::Io)?;
    output.write_all(b" ").await.map_err(Error::Io)?;
    output.write_all(path.as_bytes()).await.map_err(Error::Io)?;
    output.write_all(b" HTTP/1.1\r\n").await.map_err(Error::Io)?;

    Ok(())
}

pub(crate) async fn send_headers<'a, H, W>(headers: H, output: &mut W) -> Result<(), Error<W::Error>>
where
    W: Write,
    H: IntoIterator<Item = &'a (&'a str, &'a str)>,
{
    for (name, value) in headers {
        output.write_all(name.as_bytes()).await.map_err(Error::Io)?;
        output.write_all(b": ").await.map_err(Error::Io)?;
        output.write_all(value.as_bytes()).await.map_err(Error::Io)?;
        output.write_all(b"\r\n").await.map_err(Error::Io)?;
    }

    Ok(())
}

pub(crate) async fn send_headers_end<W>(output: &mut W) -> Result<(), Error<W::Error>>
where
    W: Write,
{
    output.write_all(b"\r\n").await.map_err(Error::Io)
}

/// Offset just past the first `\r\n\r\n` in `buf`, if present.
///
/// The first occurrence is authoritative; well-formed peers cannot produce
/// the terminator inside a header value.
pub(crate) fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|index| index + 4)
}

/// Parse `HTTP/<version> SP <code> ...CRLF` and return the mapped status,
/// the numeric code and the offset just past the line's CRLF.
pub(crate) fn parse_status_line<E>(line: &[u8]) -> Result<(Status, u16, usize), Error<E>> {
    const VERSION_PREFIX: &[u8] = b"HTTP/";

    if line.len() < VERSION_PREFIX.len() || &line[..VERSION_PREFIX.len()] != VERSION_PREFIX {
        return Err(Error::InvalidHeaders);
    }

    let end = find_crlf(line).ok_or(Error::InvalidHeaders)?;

    let space = line[..end]
        .iter()
        .position(|&b| b == b' ')
        .ok_or(Error::InvalidHeaders)?;

    let mut code: u16 = 0;
    let mut digits = 0;

    for &b in &line[space + 1..end] {
        match b {
            b'0'..=b'9' => {
                code = code
                    .checked_mul(10)
                    .and_then(|code| code.checked_add((b - b'0') as u16))
                    .ok_or(Error::InvalidHeaders)?;
                digits += 1;
            }
            _ => break,
        }
    }

    if digits == 0 {
        return Err(Error::InvalidHeaders);
    }

    Ok((Status::from_code(code), code, end + 2))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|window| window == b"\r\n")
}

/// Incremental framing of one response body. Bytes go in as they arrive off
/// the wire; decoded body bytes come out. The reader knows when the message
/// is over and leaves any surplus input untouched for the next message.
#[derive(Debug)]
pub(crate) enum BodyReader {
    NoBody,
    ContentLen { remaining: u64 },
    Chunked(ChunkDecoder),
    Close { eof: bool },
}

impl BodyReader {
    pub fn new(body_type: BodyType) -> Self {
        match body_type {
            BodyType::NoBody => Self::NoBody,
            BodyType::ContentLen(len) => Self::ContentLen { remaining: len },
            BodyType::Chunked => Self::Chunked(ChunkDecoder::new()),
            BodyType::Close => Self::Close { eof: false },
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            Self::NoBody => true,
            Self::ContentLen { remaining } => *remaining == 0,
            Self::Chunked(decoder) => decoder.is_complete(),
            Self::Close { eof } => *eof,
        }
    }

    /// Whether the underlying connection can carry another message after
    /// this body.
    pub fn keeps_connection(&self) -> bool {
        !matches!(self, Self::Close { .. })
    }

    /// Consume input bytes and produce body bytes. Returns
    /// `(consumed, written)`; both may be zero when the reader is complete
    /// or `out` is full.
    pub fn advance(&mut self, input: &[u8], out: &mut [u8]) -> Result<(usize, usize), BodyError> {
        match self {
            Self::NoBody => Ok((0, 0)),
            Self::ContentLen { remaining } => {
                let len = (*remaining).min(input.len() as u64).min(out.len() as u64) as usize;

                out[..len].copy_from_slice(&input[..len]);
                *remaining -= len as u64;

                Ok((len, len))
            }
            Self::Chunked(decoder) => decoder.advance(input, out),
            Self::Close { .. } => {
                let len = input.len().min(out.len());

                out[..len].copy_from_slice(&input[..len]);

                Ok((len, len))
            }
        }
    }

    /// Note that the peer closed the connection.
    pub fn connection_closed(&mut self) -> Result<(), BodyError> {
        match self {
            Self::Close { eof } => {
                *eof = true;

                Ok(())
            }
            other if other.is_complete() => Ok(()),
            _ => Err(BodyError),
        }
    }
}

/// The body ended early or its framing is malformed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct BodyError;

/// Pull parser for `Transfer-Encoding: chunked`, one byte of state at a
/// time so input can arrive in arbitrary slices.
#[derive(Debug)]
pub(crate) struct ChunkDecoder {
    state: ChunkState,
    size: u64,
    size_digits: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ChunkState {
    Size,
    SizeExt,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    TrailerStart,
    TrailerLine,
    TrailerLineLf,
    TrailerEndLf,
    Done,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: ChunkState::Size,
            size: 0,
            size_digits: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == ChunkState::Done
    }

    pub fn advance(&mut self, input: &[u8], out: &mut [u8]) -> Result<(usize, usize), BodyError> {
        let mut consumed = 0;
        let mut written = 0;

        while consumed < input.len() && self.state != ChunkState::Done {
            let byte = input[consumed];

            match self.state {
                ChunkState::Size => match byte {
                    b'0'..=b'9' | b'a'..=b'f' | b'A'..=b'F' => {
                        let digit = (byte as char).to_digit(16).unwrap() as u64;

                        self.size = self
                            .size
                            .checked_mul(16)
                            .and_then(|size| size.checked_add(digit))
                            .ok_or(BodyError)?;
                        self.size_digits += 1;
                        consumed += 1;
                    }
                    b';' if self.size_digits > 0 => {
                        self.state = ChunkState::SizeExt;
                        consumed += 1;
                    }
                    b'\r' if self.size_digits > 0 => {
                        self.state = ChunkState::SizeLf;
                        consumed += 1;
                    }
                    _ => return Err(BodyError),
                },
                ChunkState::SizeExt => {
                    if byte == b'\r' {
                        self.state = ChunkState::SizeLf;
                    }

                    consumed += 1;
                }
                ChunkState::SizeLf => {
                    if byte != b'\n' {
                        return Err(BodyError);
                    }

                    consumed += 1;
                    self.state = if self.size == 0 {
                        ChunkState::TrailerStart
                    } else {
                        ChunkState::Data
                    };
                }
                ChunkState::Data => {
                    let len = self
                        .size
                        .min((input.len() - consumed) as u64)
                        .min((out.len() - written) as u64) as usize;

                    if len == 0 {
                        // Out of output space; hand back what we have.
                        break;
                    }

                    out[written..written + len].copy_from_slice(&input[consumed..consumed + len]);

                    consumed += len;
                    written += len;
                    self.size -= len as u64;

                    if self.size == 0 {
                        self.state = ChunkState::DataCr;
                    }
                }
                ChunkState::DataCr => {
                    if byte != b'\r' {
                        return Err(BodyError);
                    }

                    consumed += 1;
                    self.state = ChunkState::DataLf;
                }
                ChunkState::DataLf => {
                    if byte != b'\n' {
                        return Err(BodyError);
                    }

                    consumed += 1;
                    self.state = ChunkState::Size;
                    self.size_digits = 0;
                }
                ChunkState::TrailerStart => {
                    consumed += 1;
                    self.state = if byte == b'\r' {
                        ChunkState::TrailerEndLf
                    } else {
                        ChunkState::TrailerLine
                    };
                }
                ChunkState::TrailerLine => {
                    if byte == b'\r' {
                        self.state = ChunkState::TrailerLineLf;
                    }

                    consumed += 1;
                }
                ChunkState::TrailerLineLf => {
                    if byte != b'\n' {
                        return Err(BodyError);
                    }

                    consumed += 1;
                    self.state = ChunkState::TrailerStart;
                }
                ChunkState::TrailerEndLf => {
                    if byte != b'\n' {
                        return Err(BodyError);
                    }

                    consumed += 1;
                    self.state = ChunkState::Done;
                }
                ChunkState::Done => unreachable!(),
            }
        }

        Ok((consumed, written))
    }
}
