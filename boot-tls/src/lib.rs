#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)]

#[cfg(test)]
extern crate std;

use core::fmt::{self, Display};

use num_enum::TryFromPrimitive;

#[cfg(feature = "io")]
pub mod io;

/// Length of the record header on the wire.
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest plaintext fragment carried in one record.
pub const MAX_PLAINTEXT_LEN: usize = 16384;

/// Largest record payload a compliant peer may send (plaintext limit plus
/// expansion allowance).
pub const MAX_PAYLOAD_LEN: usize = MAX_PLAINTEXT_LEN + 2048;

/// The record major version shared by every protocol version we accept.
pub const VERSION_MAJOR: u8 = 3;

/// Record minor versions accepted on reception: TLS 1.0, 1.1 and 1.2.
pub const TLS10_VERSION_MINOR: u8 = 1;
pub const TLS11_VERSION_MINOR: u8 = 2;
pub const TLS12_VERSION_MINOR: u8 = 3;

/// The record content types the pump understands. Anything else on the
/// wire is a protocol violation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

/// A malformed record header.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum RecordError {
    UnknownContentType,
    UnsupportedVersion,
}

impl Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownContentType => write!(f, "Unknown record content type"),
            Self::UnsupportedVersion => write!(f, "Unsupported record version"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RecordError {}

/// The 5-byte record header: content type, protocol version and big-endian
/// payload length.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub major: u8,
    pub minor: u8,
    pub len: u16,
}

impl RecordHeader {
    /// Decode and validate one header. The content type must be known and
    /// the version must be 3.1 through 3.3.
    pub fn decode(bytes: &[u8; RECORD_HEADER_LEN]) -> Result<Self, RecordError> {
        let content_type =
            ContentType::try_from(bytes[0]).map_err(|_| RecordError::UnknownContentType)?;

        let major = bytes[1];
        let minor = bytes[2];

        if major != VERSION_MAJOR
            || !matches!(
                minor,
                TLS10_VERSION_MINOR | TLS11_VERSION_MINOR | TLS12_VERSION_MINOR
            )
        {
            return Err(RecordError::UnsupportedVersion);
        }

        Ok(Self {
            content_type,
            major,
            minor,
            len: u16::from_be_bytes([bytes[3], bytes[4]]),
        })
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let len = self.len.to_be_bytes();

        [self.content_type as u8, self.major, self.minor, len[0], len[1]]
    }
}

/// The session state the pump mirrors from the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum SessionState {
    #[default]
    NotStarted,
    Handshaking,
    DataTransferring,
    Closing,
    Error,
}

/// Direction of one `process` call on the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CryptMode {
    Encrypt,
    Decrypt,
}

/// An error reported by the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EngineError {
    /// The output buffer cannot hold the engine's product; the required
    /// size is reported
    BufferTooSmall(usize),
    /// The record failed cryptographic processing
    Aborted,
    /// Any other engine failure
    Failed,
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall(needed) => write!(f, "Engine buffer too small: {needed} needed"),
            Self::Aborted => write!(f, "Record processing aborted"),
            Self::Failed => write!(f, "Engine failure"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EngineError {}

/// The external TLS engine the pump drives.
///
/// The engine owns all cryptography and the handshake logic; the pump owns
/// the wire. `build_response` is the resumable handshake driver: fed
/// nothing it produces the next outbound flight (the `ClientHello` from
/// `NotStarted`, the close notification from `Closing`); fed one received
/// record it produces whatever must go out in reply, possibly nothing.
/// `process` translates whole records between plaintext and ciphertext
/// once the handshake is over; its output keeps the record header in
/// place in both directions.
pub trait TlsEngine {
    fn session_state(&self) -> SessionState;

    fn set_session_state(&mut self, state: SessionState);

    /// Drive the handshake one step. Returns the number of bytes written
    /// into `out`.
    fn build_response(&mut self, input: Option<&[u8]>, out: &mut [u8])
        -> Result<usize, EngineError>;

    /// Encrypt or decrypt one record (header plus payload). Returns the
    /// number of bytes written into `out`.
    fn process(
        &mut self,
        mode: CryptMode,
        record: &[u8],
        out: &mut [u8],
    ) -> Result<usize, EngineError>;
}

/// Creates one engine per connection, configured for the client role with
/// peer verification pinned to `server_name`.
pub trait TlsEngineProvider {
    type Engine: TlsEngine;

    fn create(&self, server_name: &str) -> Self::Engine;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = RecordHeader {
            content_type: ContentType::Handshake,
            major: 3,
            minor: TLS12_VERSION_MINOR,
            len: 0x1234,
        };

        let bytes = header.encode();
        assert_eq!(bytes, [22, 3, 3, 0x12, 0x34]);
        assert_eq!(RecordHeader::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn zero_length_record_accepted() {
        let header = RecordHeader::decode(&[23, 3, 1, 0, 0]).unwrap();

        assert_eq!(header.content_type, ContentType::ApplicationData);
        assert_eq!(header.len, 0);
    }

    #[test]
    fn unknown_content_type_rejected() {
        assert_eq!(
            RecordHeader::decode(&[99, 3, 3, 0, 0]),
            Err(RecordError::UnknownContentType)
        );
    }

    #[test]
    fn version_window() {
        for minor in [1, 2, 3] {
            assert!(RecordHeader::decode(&[22, 3, minor, 0, 0]).is_ok());
        }

        assert_eq!(
            RecordHeader::decode(&[22, 2, 3, 0, 0]),
            Err(RecordError::UnsupportedVersion)
        );
        assert_eq!(
            RecordHeader::decode(&[22, 3, 4, 0, 0]),
            Err(RecordError::UnsupportedVersion)
        );
        assert_eq!(
            RecordHeader::decode(&[22, 3, 0, 0, 0]),
            Err(RecordError::UnsupportedVersion)
        );
    }
}
