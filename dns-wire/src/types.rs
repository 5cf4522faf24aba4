use bytes::Bytes;
use std::fmt;

/// The only class this crate ever sends or expects: Internet (IN).
pub const CLASS_IN: u16 = 1;

/// A host address.
pub const TYPE_A: u16 = 1;
/// An authoritative name server.
pub const TYPE_NS: u16 = 2;
/// The canonical name for an alias.
pub const TYPE_CNAME: u16 = 5;
/// Marks the start of a zone of authority.
pub const TYPE_SOA: u16 = 6;
/// Mail exchange. Recognised for CLI type-name mapping; RDATA is not decoded.
pub const TYPE_MX: u16 = 15;
/// Text strings. Recognised for CLI type-name mapping; RDATA is not decoded.
pub const TYPE_TXT: u16 = 16;
/// A host address (IPv6).
pub const TYPE_AAAA: u16 = 28;

/// Advertised UDP payload size carried in the EDNS(0) OPT pseudo-RR's class
/// field.
pub const EDNS_UDP_PAYLOAD_SIZE: u16 = 1232;
/// The EDNS(0) OPT pseudo-RR's pseudo-type.
pub const TYPE_OPT: u16 = 41;

const HEADER_MASK_QR: u16 = 0b1000_0000_0000_0000;
const HEADER_MASK_OPCODE: u16 = 0b0111_1000_0000_0000;
const HEADER_OFFSET_OPCODE: u16 = 11;
const HEADER_MASK_AA: u16 = 0b0000_0100_0000_0000;
const HEADER_MASK_TC: u16 = 0b0000_0010_0000_0000;
const HEADER_MASK_RD: u16 = 0b0000_0001_0000_0000;
const HEADER_MASK_RA: u16 = 0b0000_0000_1000_0000;
const HEADER_MASK_RCODE: u16 = 0b0000_0000_0000_1111;

/// Fixed 12-byte DNS message header: ID plus the 16-bit flags word plus the
/// four section counts.
///
/// `flags` is kept as a raw bitfield, rather than decomposed into named
/// booleans, because the classification rules in the resolution engine are
/// phrased directly in terms of header bits (`rcode`, the TC bit).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(any(feature = "test-util", test), derive(arbitrary::Arbitrary))]
pub struct Header {
    pub id: u16,
    pub flags: u16,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl Header {
    pub fn is_response(self) -> bool {
        self.flags & HEADER_MASK_QR != 0
    }

    pub fn opcode(self) -> u8 {
        ((self.flags & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE) as u8
    }

    pub fn is_authoritative(self) -> bool {
        self.flags & HEADER_MASK_AA != 0
    }

    pub fn is_truncated(self) -> bool {
        self.flags & HEADER_MASK_TC != 0
    }

    pub fn recursion_desired(self) -> bool {
        self.flags & HEADER_MASK_RD != 0
    }

    pub fn recursion_available(self) -> bool {
        self.flags & HEADER_MASK_RA != 0
    }

    pub fn rcode(self) -> u8 {
        (self.flags & HEADER_MASK_RCODE) as u8
    }

    pub fn query(id: u16) -> Self {
        Self {
            id,
            flags: 0,
            qdcount: 1,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }
}

/// A domain name, normalized to lowercase ASCII with no trailing dot.
///
/// Equality, hashing, and ordering all operate on the normalized form, so two
/// names that differ only in case or a trailing dot compare equal.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DomainName(String);

impl DomainName {
    /// Normalize and wrap a name. The root domain is represented as the
    /// empty string.
    pub fn new(name: &str) -> Self {
        Self(normalize(name))
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name split into labels, root-to-leaf reversed (i.e. leftmost
    /// label first, matching wire order).
    pub fn labels(&self) -> Vec<&str> {
        if self.0.is_empty() {
            Vec::new()
        } else {
            self.0.split('.').collect()
        }
    }

    pub fn label_count(&self) -> usize {
        self.labels().len()
    }

    /// Whether `self` is `other` or a descendant of `other`.
    pub fn is_subdomain_of(&self, other: &DomainName) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0 || self.0.ends_with(&format!(".{}", other.0))
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, ".")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<String> for DomainName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// Lowercase a name and strip a single trailing dot, if present.
pub fn normalize(name: &str) -> String {
    let name = name.strip_suffix('.').unwrap_or(name);
    name.to_ascii_lowercase()
}

/// A parsed question: the (name, type, class) tuple a query or answer
/// section entry is about.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Question {
    pub name: DomainName,
    pub qtype: u16,
    pub qclass: u16,
}

/// A resource record as it appears in an answer, authority, or additional
/// section: the owner, type, class, TTL, and the raw RDATA bytes together
/// with the offset at which they began in the enclosing message.
///
/// RDATA is kept raw rather than decoded at parse time, since NS/CNAME/SOA
/// RDATA may contain compression pointers that can only be resolved against
/// the whole message (see `rdata`), and most RRs in a reply are never
/// inspected.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ResourceRecord {
    pub name: DomainName,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Bytes,
    pub rdata_offset: usize,
}

/// A fully parsed DNS message, including a copy of the original wire bytes
/// (needed to resolve compression pointers inside RDATA after the fact).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authority: Vec<ResourceRecord>,
    pub additional: Vec<ResourceRecord>,
    pub wire: Bytes,
}

/// Map a CLI-facing type name to its numeric type. Case-insensitive.
pub fn type_from_name(name: &str) -> Option<u16> {
    match name.to_ascii_uppercase().as_str() {
        "A" => Some(TYPE_A),
        "NS" => Some(TYPE_NS),
        "CNAME" => Some(TYPE_CNAME),
        "SOA" => Some(TYPE_SOA),
        "MX" => Some(TYPE_MX),
        "TXT" => Some(TYPE_TXT),
        "AAAA" => Some(TYPE_AAAA),
        _ => None,
    }
}

/// The reverse of `type_from_name`, for display purposes. Unknown types show
/// as their numeric value.
pub fn name_from_type(qtype: u16) -> String {
    match qtype {
        TYPE_A => "A".to_string(),
        TYPE_NS => "NS".to_string(),
        TYPE_CNAME => "CNAME".to_string(),
        TYPE_SOA => "SOA".to_string(),
        TYPE_MX => "MX".to_string(),
        TYPE_TXT => "TXT".to_string(),
        TYPE_AAAA => "AAAA".to_string(),
        other => other.to_string(),
    }
}
