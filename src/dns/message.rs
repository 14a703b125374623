//! Whole-message handling: request parsing (including EDNS0) and the
//! size-limited response writer.

use crate::dns::wire::{
    name_len, put_name, Header, Question, Rcode, Reader, RecordHeader, RecordType, WireError,
    CLASS_IN, DEFAULT_MAX_LEN, HEADER_LEN, MAX_UDP_LEN,
};
use std::net::Ipv4Addr;

/// Wire size of an OPT record with no options.
pub const OPT_LEN: usize = 11;

const MAX_CHARACTER_STRING: usize = 255;

/// A parsed query: header, its single question and the EDNS0 payload size if advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub header: Header,
    pub question: Question,
    pub edns_payload: Option<u16>,
}

impl Request {
    /// Parse a query datagram.
    ///
    /// # Errors
    ///
    /// Any [`WireError`]; use [`WireError::rcode`] to decide between dropping
    /// the datagram and replying with [`error_response`].
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        let header = Header::decode(buf)?;
        if header.qr {
            return Err(WireError::NotAQuery);
        }
        if header.opcode != 0 {
            return Err(WireError::Opcode(header.opcode));
        }
        if header.qdcount != 1 {
            return Err(WireError::QuestionCount(header.qdcount));
        }

        let mut reader = Reader::new(buf, HEADER_LEN);
        let question = Question::decode(&mut reader)?;
        if question.qclass != CLASS_IN {
            return Err(WireError::Class(question.qclass));
        }

        for _ in 0..u32::from(header.ancount) + u32::from(header.nscount) {
            let record = RecordHeader::decode(&mut reader)?;
            reader.skip(record.rdlength as usize)?;
        }

        let mut edns_payload = None;
        for _ in 0..header.arcount {
            let record = RecordHeader::decode(&mut reader)?;
            reader.skip(record.rdlength as usize)?;
            if record.rtype != RecordType::OPT {
                continue;
            }
            if edns_payload.is_some() {
                return Err(WireError::DuplicateOpt);
            }
            if !record.name.is_empty() {
                return Err(WireError::NamedOpt);
            }
            if (record.class as usize) < DEFAULT_MAX_LEN {
                return Err(WireError::SmallPayload(record.class));
            }
            edns_payload = Some(record.class);
        }

        Ok(Request {
            header,
            question,
            edns_payload,
        })
    }

    /// The negotiated maximum response size.
    #[must_use]
    pub fn max_len(&self) -> usize {
        self.edns_payload
            .map_or(DEFAULT_MAX_LEN, usize::from)
            .clamp(DEFAULT_MAX_LEN, MAX_UDP_LEN)
    }
}

/// Build a header-only reply for a query that could not be processed.
///
/// Only the fields recoverable from `buf` are echoed: the id always, opcode
/// and RD when the full header was present. Returns `None` when not even
/// the id can be recovered.
#[must_use]
pub fn error_response(buf: &[u8], rcode: Rcode) -> Option<Vec<u8>> {
    let id = Header::id_of(buf)?;
    let mut header = match Header::decode(buf) {
        Ok(request) => Header::response_to(&request),
        Err(_) => Header {
            id,
            qr: true,
            ..Header::default()
        },
    };
    header.set_rcode(rcode);
    Some(header.encode().to_vec())
}

/// CAA record data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caa {
    pub flags: u8,
    pub tag: String,
    pub value: String,
}

impl Caa {
    #[must_use]
    pub fn issue(issuer: &str) -> Self {
        Caa {
            flags: 0,
            tag: "issue".to_string(),
            value: issuer.to_string(),
        }
    }

    /// `0 issue ";"`: no CA may issue.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::issue(";")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Ns(String),
    Cname(String),
    Soa(Soa),
    Mx { preference: u16, exchange: String },
    Txt(String),
    Caa(Caa),
}

impl RData {
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Ns(_) => RecordType::NS,
            RData::Cname(_) => RecordType::CNAME,
            RData::Soa(_) => RecordType::SOA,
            RData::Mx { .. } => RecordType::MX,
            RData::Txt(_) => RecordType::TXT,
            RData::Caa(_) => RecordType::CAA,
        }
    }

    /// RDLENGTH of this data. TXT strings pay one length byte per 255 byte chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RData::A(_) => 4,
            RData::Ns(name) | RData::Cname(name) => name_len(name),
            RData::Soa(soa) => name_len(&soa.mname) + name_len(&soa.rname) + 20,
            RData::Mx { exchange, .. } => 2 + name_len(exchange),
            RData::Txt(text) => text.len() + txt_chunks(text.as_bytes()).count(),
            RData::Caa(caa) => 2 + caa.tag.len() + caa.value.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RData::A(addr) => out.extend_from_slice(&addr.octets()),
            RData::Ns(name) | RData::Cname(name) => put_name(name, out),
            RData::Soa(soa) => {
                put_name(&soa.mname, out);
                put_name(&soa.rname, out);
                for field in [soa.serial, soa.refresh, soa.retry, soa.expire, soa.minimum] {
                    out.extend_from_slice(&field.to_be_bytes());
                }
            }
            RData::Mx {
                preference,
                exchange,
            } => {
                out.extend_from_slice(&preference.to_be_bytes());
                put_name(exchange, out);
            }
            RData::Txt(text) => {
                for chunk in txt_chunks(text.as_bytes()) {
                    // Chunks are at most 255 bytes.
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(chunk.len() as u8);
                    out.extend_from_slice(chunk);
                }
            }
            RData::Caa(caa) => {
                out.push(caa.flags);
                // Tags are short fixed words ("issue", "iodef").
                #[allow(clippy::cast_possible_truncation)]
                out.push(caa.tag.len() as u8);
                out.extend_from_slice(caa.tag.as_bytes());
                out.extend_from_slice(caa.value.as_bytes());
            }
        }
    }
}

/// Split TXT data into character-strings. Empty text is a single empty string.
fn txt_chunks(text: &[u8]) -> impl Iterator<Item = &[u8]> {
    let empty: &[u8] = &[];
    let first = text.is_empty().then_some(empty);
    first
        .into_iter()
        .chain(text.chunks(MAX_CHARACTER_STRING))
}

/// A resource record ready to be written. `owner` is already in wire form so
/// the query name can be echoed back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub owner: Vec<u8>,
    pub ttl: u32,
    pub data: RData,
}

impl Record {
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.owner.len() + 10 + self.data.len()
    }

    fn encode(&self, out: &mut Vec<u8>) {
        let rdlength = self.data.len();
        out.extend_from_slice(&self.owner);
        out.extend_from_slice(&self.data.record_type().0.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        // Bounded by the message limit checked in `ResponseWriter::fits`.
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(rdlength as u16).to_be_bytes());
        self.data.encode(out);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Answer,
    Authority,
    Additional,
}

/// Builds a response without ever exceeding its size limit.
///
/// Every put computes the size it would add first. A write that does not fit
/// sets TC and is dropped, as is every write after it. Header counts only
/// ever reflect what was actually appended.
#[derive(Debug)]
pub struct ResponseWriter {
    header: Header,
    buf: Vec<u8>,
    limit: usize,
    reserved: usize,
    section: Section,
}

impl ResponseWriter {
    #[must_use]
    pub fn new(mut header: Header, limit: usize) -> Self {
        header.qdcount = 0;
        header.ancount = 0;
        header.nscount = 0;
        header.arcount = 0;
        header.tc = false;
        let mut buf = Vec::with_capacity(limit.min(MAX_UDP_LEN));
        buf.resize(HEADER_LEN, 0);
        ResponseWriter {
            header,
            buf,
            limit,
            reserved: 0,
            section: Section::Answer,
        }
    }

    /// Hold back `len` bytes at the end of the message, e.g. for the OPT echo.
    pub fn reserve(&mut self, len: usize) {
        self.reserved += len;
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[must_use]
    pub fn truncated(&self) -> bool {
        self.header.tc
    }

    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.header.set_rcode(rcode);
    }

    fn fits(&mut self, len: usize) -> bool {
        if self.header.tc {
            return false;
        }
        let limit = self.limit.saturating_sub(self.reserved);
        if self.buf.len() + len > limit {
            self.header.tc = true;
            return false;
        }
        true
    }

    pub fn put_question(&mut self, question: &Question) -> bool {
        if !self.fits(question.encoded_len()) {
            return false;
        }
        question.encode(&mut self.buf);
        self.header.qdcount += 1;
        true
    }

    pub fn put_answer(&mut self, record: &Record) -> bool {
        self.put_record(Section::Answer, record)
    }

    pub fn put_record(&mut self, section: Section, record: &Record) -> bool {
        debug_assert!(section >= self.section, "sections must be written in order");
        if !self.fits(record.encoded_len()) {
            return false;
        }
        record.encode(&mut self.buf);
        self.section = section;
        match section {
            Section::Answer => self.header.ancount += 1,
            Section::Authority => self.header.nscount += 1,
            Section::Additional => self.header.arcount += 1,
        }
        true
    }

    /// Append the server's OPT record advertising `payload`, releasing the
    /// space held back for it.
    pub fn put_opt(&mut self, payload: u16) -> bool {
        self.reserved = self.reserved.saturating_sub(OPT_LEN);
        if self.buf.len() + OPT_LEN > self.limit {
            self.header.tc = true;
            return false;
        }
        let opt = RecordHeader {
            name: String::new(),
            rtype: RecordType::OPT,
            class: payload,
            ttl: 0,
            rdlength: 0,
        };
        opt.encode(&mut self.buf);
        self.section = Section::Additional;
        self.header.arcount += 1;
        true
    }

    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        self.buf[..HEADER_LEN].copy_from_slice(&self.header.encode());
        self.buf
    }
}
