//! Low level DNS wire format: header, names, questions and record headers.
//!
//! Names are never compressed. Decoding treats every length octet as a plain
//! label length and writing never emits pointers, so the size of any message
//! can be computed up front from its parts.

use std::fmt;

/// Size of the fixed DNS message header.
pub const HEADER_LEN: usize = 12;

/// Maximum message size when the client did not advertise one with EDNS0.
pub const DEFAULT_MAX_LEN: usize = 512;

/// Size of the server read buffer. Advertised EDNS0 payload sizes are clamped to it.
pub const MAX_UDP_LEN: usize = 4096;

/// The only supported record class (Internet).
pub const CLASS_IN: u16 = 1;

const MAX_LABEL_LEN: usize = 63;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("message too short to carry a transaction id")]
    NoId,
    #[error("message shorter than the {HEADER_LEN} byte header")]
    ShortHeader,
    #[error("message is a response, not a query")]
    NotAQuery,
    #[error("unexpected end of message at offset {0}")]
    UnexpectedEof(usize),
    #[error("label at offset {0} contains a '.'")]
    DotInLabel(usize),
    #[error("unsupported opcode {0}")]
    Opcode(u8),
    #[error("expected exactly one question, found {0}")]
    QuestionCount(u16),
    #[error("unsupported class {0}")]
    Class(u16),
    #[error("more than one OPT record")]
    DuplicateOpt,
    #[error("OPT record with a non-root owner name")]
    NamedOpt,
    #[error("advertised UDP payload size {0} is below {DEFAULT_MAX_LEN}")]
    SmallPayload(u16),
}

impl WireError {
    /// The response code to reply with, or `None` when the datagram must be dropped.
    #[must_use]
    pub fn rcode(&self) -> Option<Rcode> {
        match self {
            WireError::NoId | WireError::NotAQuery => None,
            WireError::Opcode(_) | WireError::QuestionCount(_) | WireError::Class(_) => {
                Some(Rcode::NotImp)
            }
            _ => Some(Rcode::FormErr),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Rcode {
    #[default]
    NoError = 0,
    FormErr = 1,
    ServFail = 2,
    NxDomain = 3,
    NotImp = 4,
    Refused = 5,
}

impl Rcode {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Rcode::NoError),
            1 => Some(Rcode::FormErr),
            2 => Some(Rcode::ServFail),
            3 => Some(Rcode::NxDomain),
            4 => Some(Rcode::NotImp),
            5 => Some(Rcode::Refused),
            _ => None,
        }
    }
}

/// A record TYPE. Unknown values are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordType(pub u16);

impl RecordType {
    pub const A: RecordType = RecordType(1);
    pub const NS: RecordType = RecordType(2);
    pub const CNAME: RecordType = RecordType(5);
    pub const SOA: RecordType = RecordType(6);
    pub const MX: RecordType = RecordType(15);
    pub const TXT: RecordType = RecordType(16);
    pub const OPT: RecordType = RecordType(41);
    pub const CAA: RecordType = RecordType(257);
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            RecordType::A => "A",
            RecordType::NS => "NS",
            RecordType::CNAME => "CNAME",
            RecordType::SOA => "SOA",
            RecordType::MX => "MX",
            RecordType::TXT => "TXT",
            RecordType::OPT => "OPT",
            RecordType::CAA => "CAA",
            RecordType(other) => return write!(f, "TYPE{other}"),
        };
        f.write_str(name)
    }
}

/// The fixed 12 byte message header with its flag bits unpacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    /// Recover just the transaction id, if the buffer is long enough to hold one.
    #[must_use]
    pub fn id_of(buf: &[u8]) -> Option<u16> {
        match buf {
            [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Decode the header at the start of `buf`.
    ///
    /// # Errors
    ///
    /// [`WireError::NoId`] below 2 bytes, [`WireError::ShortHeader`] below 12.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let id = Self::id_of(buf).ok_or(WireError::NoId)?;
        if buf.len() < HEADER_LEN {
            return Err(WireError::ShortHeader);
        }
        let word = |at: usize| u16::from_be_bytes([buf[at], buf[at + 1]]);
        let (b3, b4) = (buf[2], buf[3]);
        Ok(Header {
            id,
            qr: b3 & 0x80 != 0,
            opcode: (b3 >> 3) & 0x0f,
            aa: b3 & 0x04 != 0,
            tc: b3 & 0x02 != 0,
            rd: b3 & 0x01 != 0,
            ra: b4 & 0x80 != 0,
            rcode: b4 & 0x0f,
            qdcount: word(4),
            ancount: word(6),
            nscount: word(8),
            arcount: word(10),
        })
    }

    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut b3 = (self.opcode & 0x0f) << 3;
        if self.qr {
            b3 |= 0x80;
        }
        if self.aa {
            b3 |= 0x04;
        }
        if self.tc {
            b3 |= 0x02;
        }
        if self.rd {
            b3 |= 0x01;
        }
        let mut b4 = self.rcode & 0x0f;
        if self.ra {
            b4 |= 0x80;
        }

        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.id.to_be_bytes());
        out[2] = b3;
        out[3] = b4;
        out[4..6].copy_from_slice(&self.qdcount.to_be_bytes());
        out[6..8].copy_from_slice(&self.ancount.to_be_bytes());
        out[8..10].copy_from_slice(&self.nscount.to_be_bytes());
        out[10..12].copy_from_slice(&self.arcount.to_be_bytes());
        out
    }

    /// A response header for `request`: same id, opcode and RD, all counts zero.
    #[must_use]
    pub fn response_to(request: &Header) -> Self {
        Header {
            id: request.id,
            qr: true,
            opcode: request.opcode,
            rd: request.rd,
            ..Header::default()
        }
    }

    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.rcode = rcode as u8;
    }
}

/// Bounds-checked cursor over a received message.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(WireError::UnexpectedEof(self.pos))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), WireError> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read an uncompressed name, returning it in dotted form.
    ///
    /// The root name decodes to the empty string. There is no bound on the
    /// total length other than the buffer itself. Labels containing a `.`
    /// byte are rejected.
    pub fn read_name(&mut self) -> Result<String, WireError> {
        let mut name = String::new();
        loop {
            let len = self.read_u8()? as usize;
            if len == 0 {
                return Ok(name);
            }
            let start = self.pos;
            let label = self.read_bytes(len)?;
            // Dotted form can't tell "a.b" as one label from two labels.
            if label.contains(&b'.') {
                return Err(WireError::DotInLabel(start));
            }
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(&String::from_utf8_lossy(label));
        }
    }

    /// Like [`Reader::read_name`], but returns the raw wire bytes of the name.
    pub fn read_wire_name(&mut self) -> Result<&'a [u8], WireError> {
        let start = self.pos;
        loop {
            let len = self.read_u8()? as usize;
            if len == 0 {
                return Ok(&self.buf[start..self.pos]);
            }
            self.skip(len)?;
        }
    }
}

/// Number of bytes `name` occupies on the wire.
#[must_use]
pub fn name_len(name: &str) -> usize {
    labels(name).map(|label| label.len() + 1).sum::<usize>() + 1
}

/// Append `name` in uncompressed wire form. Labels are capped at 63 bytes;
/// configured names are validated before they ever reach here.
pub fn put_name(name: &str, out: &mut Vec<u8>) {
    for label in labels(name) {
        // Label length is at most MAX_LABEL_LEN, so the cast is lossless.
        #[allow(clippy::cast_possible_truncation)]
        out.push(label.len() as u8);
        out.extend_from_slice(label);
    }
    out.push(0);
}

/// Encode `name` into a fresh buffer.
#[must_use]
pub fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name_len(name));
    put_name(name, &mut out);
    out
}

fn labels(name: &str) -> impl Iterator<Item = &[u8]> {
    name.split('.')
        .filter(|label| !label.is_empty())
        .map(|label| &label.as_bytes()[..label.len().min(MAX_LABEL_LEN)])
}

/// A question entry. `name` is lowercased for lookups while `wire_name`
/// keeps the exact bytes the client sent so it can be echoed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub wire_name: Vec<u8>,
    pub qtype: RecordType,
    pub qclass: u16,
}

impl Question {
    #[must_use]
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Question {
            name: name.trim_end_matches('.').to_ascii_lowercase(),
            wire_name: encode_name(name),
            qtype,
            qclass: CLASS_IN,
        }
    }

    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        let wire_name = reader.read_wire_name()?;
        let name = Reader::new(wire_name, 0).read_name()?.to_ascii_lowercase();
        let qtype = RecordType(reader.read_u16()?);
        let qclass = reader.read_u16()?;
        Ok(Question {
            name,
            wire_name: wire_name.to_vec(),
            qtype,
            qclass,
        })
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.wire_name.len() + 4
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.wire_name);
        out.extend_from_slice(&self.qtype.0.to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());
    }
}

/// Fixed part of a resource record. RDATA is left for the caller to skip or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub name: String,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub rdlength: u16,
}

impl RecordHeader {
    pub fn decode(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(RecordHeader {
            name: reader.read_name()?.to_ascii_lowercase(),
            rtype: RecordType(reader.read_u16()?),
            class: reader.read_u16()?,
            ttl: reader.read_u32()?,
            rdlength: reader.read_u16()?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        put_name(&self.name, out);
        out.extend_from_slice(&self.rtype.0.to_be_bytes());
        out.extend_from_slice(&self.class.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&self.rdlength.to_be_bytes());
    }
}
