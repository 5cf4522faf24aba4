//! Parsing of DNS messages from wire bytes.

use bytes::Bytes;

use crate::name::decode_name;
use crate::types::{Header, Message, Question, ResourceRecord};

impl Message {
    /// Parse a complete DNS message from its wire representation.
    ///
    /// Trailing bytes after the last record in the additional section are
    /// tolerated and ignored.
    ///
    /// # Errors
    ///
    /// If the header, a question, or a resource record cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, Error> {
        let wire = Bytes::copy_from_slice(octets);
        let mut buffer = ConsumableBuffer::new(&wire);

        let header = parse_header(&mut buffer)?;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(parse_question(&wire, &mut buffer)?);
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answers.push(parse_rr(&wire, &mut buffer)?);
        }

        let mut authority = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authority.push(parse_rr(&wire, &mut buffer)?);
        }

        let mut additional = Vec::with_capacity(header.arcount as usize);
        for _ in 0..header.arcount {
            additional.push(parse_rr(&wire, &mut buffer)?);
        }

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
            wire,
        })
    }
}

fn parse_header(buffer: &mut ConsumableBuffer) -> Result<Header, Error> {
    let id = buffer.next_u16().ok_or(Error::CompletelyBusted)?;
    let flags = buffer.next_u16().ok_or(Error::HeaderTooShort(Some(id)))?;
    let qdcount = buffer.next_u16().ok_or(Error::HeaderTooShort(Some(id)))?;
    let ancount = buffer.next_u16().ok_or(Error::HeaderTooShort(Some(id)))?;
    let nscount = buffer.next_u16().ok_or(Error::HeaderTooShort(Some(id)))?;
    let arcount = buffer.next_u16().ok_or(Error::HeaderTooShort(Some(id)))?;
    Ok(Header {
        id,
        flags,
        qdcount,
        ancount,
        nscount,
        arcount,
    })
}

fn parse_question(wire: &[u8], buffer: &mut ConsumableBuffer) -> Result<Question, Error> {
    let (name, after) = decode_name(wire, buffer.position)?;
    buffer.position = after;
    let qtype = buffer.next_u16().ok_or(Error::QuestionTooShort(None))?;
    let qclass = buffer.next_u16().ok_or(Error::QuestionTooShort(None))?;
    Ok(Question {
        name,
        qtype,
        qclass,
    })
}

fn parse_rr(wire: &[u8], buffer: &mut ConsumableBuffer) -> Result<ResourceRecord, Error> {
    let (name, after) = decode_name(wire, buffer.position)?;
    buffer.position = after;
    let rtype = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(None))?;
    let rclass = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(None))?;
    let ttl = buffer.next_u32().ok_or(Error::ResourceRecordTooShort(None))?;
    let rdlength = buffer.next_u16().ok_or(Error::ResourceRecordTooShort(None))?;
    let rdata_offset = buffer.position;
    let rdata = buffer
        .take(rdlength as usize)
        .ok_or(Error::ResourceRecordTooShort(None))?;

    Ok(ResourceRecord {
        name,
        rtype,
        rclass,
        ttl,
        rdata: Bytes::copy_from_slice(rdata),
        rdata_offset,
    })
}

/// Errors encountered while parsing a message, a question, a resource
/// record, or a name. Where available, the `id` from the enclosing
/// message's header is carried along so a caller could in principle respond
/// with a matching error — this crate does not build responses, but the
/// shape mirrors the one transport errors use.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// Fewer than 2 octets: not even an ID is present.
    CompletelyBusted,
    /// The fixed 12-byte header is incomplete.
    HeaderTooShort(Option<u16>),
    /// A question ends with an incomplete field.
    QuestionTooShort(Option<u16>),
    /// A resource record ends with an incomplete field.
    ResourceRecordTooShort(Option<u16>),
    /// A domain name runs past the end of the buffer.
    DomainTooShort(Option<u16>),
    /// A domain name decodes to more than 255 octets.
    DomainTooLong(Option<u16>),
    /// A compression pointer could not be followed (too many jumps).
    DomainPointerInvalid(Option<u16>),
    /// A label was neither a valid length-prefixed literal nor a pointer.
    DomainLabelInvalid(Option<u16>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::CompletelyBusted => write!(f, "message too short to contain a header"),
            Error::HeaderTooShort(_) => write!(f, "header is missing one or more fields"),
            Error::QuestionTooShort(_) => write!(f, "question ends with an incomplete field"),
            Error::ResourceRecordTooShort(_) => {
                write!(f, "resource record ends with an incomplete field")
            }
            Error::DomainTooShort(_) => write!(f, "domain name runs past the end of the buffer"),
            Error::DomainTooLong(_) => write!(f, "domain name is longer than 255 octets"),
            Error::DomainPointerInvalid(_) => {
                write!(f, "domain name compression pointer could not be followed")
            }
            Error::DomainLabelInvalid(_) => write!(f, "domain name label is malformed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// A buffer consumed left-to-right while parsing.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let b = *self.octets.get(self.position)?;
        self.position += 1;
        Some(b)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        let bytes = self.octets.get(self.position..self.position + 2)?;
        self.position += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        let bytes = self.octets.get(self.position..self.position + 4)?;
        self.position += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        let slice = self.octets.get(self.position..self.position + size)?;
        self.position += size;
        Some(slice)
    }
}
