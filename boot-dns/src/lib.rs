#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)]

#[cfg(test)]
extern crate std;

use core::fmt::{self, Display};

use num_enum::TryFromPrimitive;

pub mod cache;
#[cfg(feature = "io")]
pub mod io;

/// Messages carried by UDP are restricted to 512 bytes, not counting the IP
/// or UDP headers.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// The well-known DNS server port.
pub const PORT: u16 = 53;

/// Longest host name accepted on the query side; RFC 1035 caps the encoded
/// name at 255 octets.
pub const MAX_NAME_LEN: usize = 255;

/// Longest single label within a host name.
pub const MAX_LABEL_LEN: usize = 63;

/// Ceiling on the number of address records collected from one response.
pub const MAX_ANSWERS: usize = 64;

const HEADER_LEN: usize = 12;
const QUESTION_FIXED_LEN: usize = 4;
const ANSWER_FIXED_LEN: usize = 10;

/// An error at the wire-format level.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum WireError {
    /// The output buffer cannot hold the message
    BufferOverflow,
    /// The packet ended before the advertised content
    Truncated,
    /// A host name violates the label or total-length limits
    InvalidName,
    /// More than one question in the message
    TooManyQuestions,
    /// An answer NAME is not in compression-pointer form
    UnsupportedNameForm,
}

impl Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferOverflow => write!(f, "Buffer overflow"),
            Self::Truncated => write!(f, "Message truncated"),
            Self::InvalidName => write!(f, "Invalid host name"),
            Self::TooManyQuestions => write!(f, "More than one question"),
            Self::UnsupportedNameForm => write!(f, "Unsupported answer name form"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WireError {}

/// Record types the resolver understands natively. Anything else flows
/// through raw lookups untouched.
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u16)]
pub enum Rtype {
    A = 1,
    Ns = 2,
    Cname = 5,
    Aaaa = 28,
}

/// The Internet record class.
pub const CLASS_IN: u16 = 1;

/// RCODE for a name that does not exist.
pub const RCODE_NAME_ERROR: u8 = 3;

/// The 16-bit flags word of a message header.
///
/// Queries built here always carry QR=0, OPCODE=standard-query and RD=1.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Flags(pub u16);

impl Flags {
    const QR: u16 = 0x8000;
    const OPCODE_MASK: u16 = 0x7800;
    const RD: u16 = 0x0100;
    const RCODE_MASK: u16 = 0x000F;

    /// Flags for an outgoing standard query with recursion desired.
    pub const fn query() -> Self {
        Self(Self::RD)
    }

    pub const fn is_response(self) -> bool {
        self.0 & Self::QR != 0
    }

    pub const fn opcode(self) -> u8 {
        ((self.0 & Self::OPCODE_MASK) >> 11) as u8
    }

    pub const fn recursion_desired(self) -> bool {
        self.0 & Self::RD != 0
    }

    pub const fn rcode(self) -> u8 {
        (self.0 & Self::RCODE_MASK) as u8
    }
}

/// The fixed 12-byte message header, RFC 1035 layout, big-endian on the wire.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub id: u16,
    pub flags: Flags,
    pub questions: u16,
    pub answers: u16,
    pub authority: u16,
    pub additional: u16,
}

impl Header {
    fn decode(bytes: &mut BytesIn<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: bytes.u16_be()?,
            flags: Flags(bytes.u16_be()?),
            questions: bytes.u16_be()?,
            answers: bytes.u16_be()?,
            authority: bytes.u16_be()?,
            additional: bytes.u16_be()?,
        })
    }

    fn encode(&self, out: &mut BytesOut<'_>) -> Result<(), WireError> {
        out.push(&self.id.to_be_bytes())?;
        out.push(&self.flags.0.to_be_bytes())?;
        out.push(&self.questions.to_be_bytes())?;
        out.push(&self.answers.to_be_bytes())?;
        out.push(&self.authority.to_be_bytes())?;
        out.push(&self.additional.to_be_bytes())?;

        Ok(())
    }
}

/// Encode `name` as a sequence of length-prefixed labels with a zero
/// terminator. The name is validated against the label and total limits.
pub fn encode_name(name: &str, out: &mut BytesOut<'_>) -> Result<(), WireError> {
    if name.is_empty() || name.len() + 1 > MAX_NAME_LEN {
        return Err(WireError::InvalidName);
    }

    for label in name.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(WireError::InvalidName);
        }

        out.byte(label.len() as u8)?;
        out.push(label.as_bytes())?;
    }

    out.byte(0)?;

    Ok(())
}

/// Build a single-question query message into `buf` and return the encoded
/// slice. The identifier is caller-supplied; uniqueness among in-flight
/// queries is the caller's concern.
pub fn encode_query<'o>(
    id: u16,
    name: &str,
    qtype: u16,
    qclass: u16,
    buf: &'o mut [u8],
) -> Result<&'o [u8], WireError> {
    let mut out = BytesOut::new(buf);

    let header = Header {
        id,
        flags: Flags::query(),
        questions: 1,
        answers: 0,
        authority: 0,
        additional: 0,
    };

    header.encode(&mut out)?;

    encode_name(name, &mut out)?;

    out.push(&qtype.to_be_bytes())?;
    out.push(&qclass.to_be_bytes())?;

    let len = out.len();

    Ok(&buf[..len])
}

/// One answer record as it sits in a response packet. `rdata` borrows from
/// the packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AnswerRecord<'a> {
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: &'a [u8],
}

/// A parsed response message: validated header and question section, plus an
/// iterator over the answer section.
///
/// Parsing enforces the single-question subset: a message declaring more
/// than one question is rejected outright rather than partially understood.
#[derive(Debug, PartialEq)]
pub struct Response<'a> {
    pub header: Header,
    pub qtype: u16,
    pub qclass: u16,
    qname: &'a [u8],
    answers: &'a [u8],
}

impl<'a> Response<'a> {
    /// Validate the fixed header and the question section of `packet`.
    ///
    /// The checks run in a fixed order: total length must exceed the header;
    /// at most one question; the question's name and fixed fields must fit
    /// in the remaining bytes.
    pub fn parse(packet: &'a [u8]) -> Result<Self, WireError> {
        if packet.len() <= HEADER_LEN {
            return Err(WireError::Truncated);
        }

        let mut bytes = BytesIn::new(packet);
        let header = Header::decode(&mut bytes)?;

        if header.questions > 1 {
            return Err(WireError::TooManyQuestions);
        }

        let qname_start = bytes.offset();
        let qname_len = uncompressed_name_len(&packet[qname_start..])?;

        if packet.len() - qname_start < qname_len + QUESTION_FIXED_LEN {
            return Err(WireError::Truncated);
        }

        let qname = &packet[qname_start..qname_start + qname_len];

        bytes.skip(qname_len)?;
        let qtype = bytes.u16_be()?;
        let qclass = bytes.u16_be()?;

        Ok(Self {
            header,
            qtype,
            qclass,
            qname,
            answers: bytes.remaining(),
        })
    }

    /// The query name in wire form (length-prefixed labels).
    pub fn qname_wire(&self) -> &'a [u8] {
        self.qname
    }

    /// Iterate over the answer section.
    pub fn answers(&self) -> AnswersIter<'a> {
        AnswersIter {
            bytes: BytesIn::new(self.answers),
            remaining: self.header.answers,
        }
    }
}

/// Iterator over the answer records of a response.
///
/// Every answer NAME must be a compression pointer (two high bits set);
/// any other name form stops iteration with `UnsupportedNameForm`. The
/// fixed fields and RDATA of each record must fit in the packet.
#[derive(Debug)]
pub struct AnswersIter<'a> {
    bytes: BytesIn<'a>,
    remaining: u16,
}

impl<'a> Iterator for AnswersIter<'a> {
    type Item = Result<AnswerRecord<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        self.remaining -= 1;

        Some(self.parse_one())
    }
}

impl<'a> AnswersIter<'a> {
    fn parse_one(&mut self) -> Result<AnswerRecord<'a>, WireError> {
        let name = self.bytes.u16_be()?;
        if name & 0xC000 != 0xC000 {
            return Err(WireError::UnsupportedNameForm);
        }

        if self.bytes.left() < ANSWER_FIXED_LEN {
            return Err(WireError::Truncated);
        }

        let rtype = self.bytes.u16_be()?;
        let rclass = self.bytes.u16_be()?;
        let ttl = self.bytes.u32_be()?;
        let rdlength = self.bytes.u16_be()? as usize;

        let rdata = self.bytes.slice(rdlength)?;

        Ok(AnswerRecord {
            rtype,
            rclass,
            ttl,
            rdata,
        })
    }
}

/// Length of an uncompressed wire-form name at the start of `data`,
/// terminator byte included.
fn uncompressed_name_len(data: &[u8]) -> Result<usize, WireError> {
    let mut offset = 0;

    loop {
        let len = *data.get(offset).ok_or(WireError::Truncated)? as usize;

        if len == 0 {
            return Ok(offset + 1);
        }

        if len > MAX_LABEL_LEN {
            return Err(WireError::InvalidName);
        }

        offset += 1 + len;

        if offset >= MAX_NAME_LEN {
            return Err(WireError::InvalidName);
        }
    }
}

/// Compare a wire-form name against a dotted host name, ASCII
/// case-insensitively.
pub fn name_matches(wire: &[u8], host: &str) -> bool {
    let mut offset = 0;
    let mut labels = host.split('.');

    loop {
        let len = match wire.get(offset) {
            Some(&len) => len as usize,
            None => return false,
        };

        if len == 0 {
            return labels.next().is_none();
        }

        let Some(label) = labels.next() else {
            return false;
        };

        let Some(wire_label) = wire.get(offset + 1..offset + 1 + len) else {
            return false;
        };

        if !wire_label.eq_ignore_ascii_case(label.as_bytes()) {
            return false;
        }

        offset += 1 + len;
    }
}

/// The cache lifetime for an aliased host: the CNAME chain TTL and the
/// terminal address record TTL combine as the minimum when both are set,
/// otherwise whichever is non-zero.
pub fn combine_ttl(cname_ttl: u32, answer_ttl: u32) -> u32 {
    if cname_ttl != 0 && answer_ttl != 0 {
        cname_ttl.min(answer_ttl)
    } else {
        cname_ttl.max(answer_ttl)
    }
}

#[derive(Debug)]
pub(crate) struct BytesIn<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BytesIn<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn left(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn skip(&mut self, len: usize) -> Result<(), WireError> {
        self.slice(len).map(|_| ())
    }

    pub fn slice(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        if len > self.left() {
            Err(WireError::Truncated)
        } else {
            let data = &self.data[self.offset..self.offset + len];
            self.offset += len;

            Ok(data)
        }
    }

    pub fn arr<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let slice = self.slice(N)?;

        let mut data = [0; N];
        data.copy_from_slice(slice);

        Ok(data)
    }

    pub fn u16_be(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.arr()?))
    }

    pub fn u32_be(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.arr()?))
    }

    pub fn remaining(&mut self) -> &'a [u8] {
        let data = &self.data[self.offset..];
        self.offset = self.data.len();

        data
    }
}

pub struct BytesOut<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> BytesOut<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn byte(&mut self, data: u8) -> Result<&mut Self, WireError> {
        self.push(&[data])
    }

    pub fn push(&mut self, data: &[u8]) -> Result<&mut Self, WireError> {
        if data.len() > self.buf.len() - self.offset {
            Err(WireError::BufferOverflow)
        } else {
            self.buf[self.offset..self.offset + data.len()].copy_from_slice(data);
            self.offset += data.len();

            Ok(self)
        }
    }
}
