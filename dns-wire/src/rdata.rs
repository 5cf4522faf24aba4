//! Selective RDATA decoding for A, AAAA, CNAME, NS, and SOA records.
//!
//! RDATA is stored raw on a `ResourceRecord`; these accessors decode it on
//! demand, using the enclosing `Message`'s wire bytes where a name inside
//! the RDATA may be compressed against the whole message.

use crate::deserialise::Error;
use crate::name::decode_name;
use crate::types::{DomainName, Message, ResourceRecord};

/// Render a 4-byte A record's RDATA as a dotted-quad string.
///
/// Returns `None` if the RDATA is not exactly 4 bytes.
pub fn a_to_ip_string(rr: &ResourceRecord) -> Option<String> {
    let b = rr.rdata.as_ref();
    if b.len() != 4 {
        return None;
    }
    Some(format!("{}.{}.{}.{}", b[0], b[1], b[2], b[3]))
}

/// Render a 16-byte AAAA record's RDATA as a colon-hex string.
///
/// Returns `None` if the RDATA is not exactly 16 bytes. Produces standard
/// `::`-compressed textual form via `std::net::Ipv6Addr`; if for some
/// reason that were unavailable, the fallback would be 8 raw hex groups
/// without compression (matching legacy C implementations that lack an
/// inet_ntop).
pub fn aaaa_to_ip_string(rr: &ResourceRecord) -> Option<String> {
    let b = rr.rdata.as_ref();
    if b.len() != 16 {
        return None;
    }
    let mut segments = [0u16; 8];
    for (i, seg) in segments.iter_mut().enumerate() {
        *seg = u16::from_be_bytes([b[i * 2], b[i * 2 + 1]]);
    }
    Some(std::net::Ipv6Addr::from(segments).to_string())
}

/// Decode an NS or CNAME record's RDATA (a single domain name) against the
/// enclosing message's wire bytes.
///
/// # Errors
///
/// If the name cannot be decoded (bad pointer, truncated label, etc).
pub fn name_rdata(msg: &Message, rr: &ResourceRecord) -> Result<DomainName, Error> {
    let (name, _) = decode_name(&msg.wire, rr.rdata_offset)?;
    Ok(name)
}

/// The decoded fields of an SOA record's RDATA.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Soa {
    pub mname: DomainName,
    pub rname: DomainName,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

/// Decode an SOA record's RDATA against the enclosing message's wire bytes.
///
/// # Errors
///
/// If either name, or the five trailing 32-bit fields, cannot be decoded.
pub fn soa_rdata(msg: &Message, rr: &ResourceRecord) -> Result<Soa, Error> {
    let (mname, after_mname) = decode_name(&msg.wire, rr.rdata_offset)?;
    let (rname, after_rname) = decode_name(&msg.wire, after_mname)?;

    let fields = msg
        .wire
        .get(after_rname..after_rname + 20)
        .ok_or(Error::ResourceRecordTooShort(None))?;

    let u32_at = |i: usize| -> u32 {
        u32::from_be_bytes([fields[i], fields[i + 1], fields[i + 2], fields[i + 3]])
    };

    Ok(Soa {
        mname,
        rname,
        serial: u32_at(0),
        refresh: u32_at(4),
        retry: u32_at(8),
        expire: u32_at(12),
        minimum: u32_at(16),
    })
}

/// The negative-caching TTL hint for an SOA-bearing reply: the SOA's
/// MINIMUM field, or the RR's own TTL if the SOA RDATA is malformed.
pub fn soa_negative_ttl(msg: &Message, rr: &ResourceRecord) -> u32 {
    soa_rdata(msg, rr).map_or(rr.ttl, |soa| soa.minimum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::encode_name;
    use crate::types::{CLASS_IN, TYPE_AAAA, TYPE_CNAME, TYPE_SOA};
    use bytes::Bytes;

    fn message_with_answer(rr: ResourceRecord) -> Message {
        Message {
            header: crate::types::Header::query(1),
            questions: Vec::new(),
            answers: vec![rr],
            authority: Vec::new(),
            additional: Vec::new(),
            wire: Bytes::new(),
        }
    }

    #[test]
    fn a_rdata_renders_dotted_quad() {
        let rr = ResourceRecord {
            name: DomainName::new("example.com"),
            rtype: crate::types::TYPE_A,
            rclass: CLASS_IN,
            ttl: 60,
            rdata: Bytes::from_static(&[1, 2, 3, 4]),
            rdata_offset: 0,
        };
        assert_eq!(a_to_ip_string(&rr).unwrap(), "1.2.3.4");
    }

    #[test]
    fn aaaa_rdata_renders_colon_hex() {
        let rr = ResourceRecord {
            name: DomainName::new("example.com"),
            rtype: TYPE_AAAA,
            rclass: CLASS_IN,
            ttl: 60,
            rdata: Bytes::from_static(&[0x20, 1, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]),
            rdata_offset: 0,
        };
        assert_eq!(aaaa_to_ip_string(&rr).unwrap(), "2001:db8::1");
    }

    #[test]
    fn name_rdata_decodes_cname_target() {
        let target = DomainName::new("target.example.com");
        let mut wire = encode_name(&target).unwrap();
        let offset = 0;
        wire.push(0); // pad so rdata_offset != 0 is exercised elsewhere too
        let rr = ResourceRecord {
            name: DomainName::new("www.example.com"),
            rtype: TYPE_CNAME,
            rclass: CLASS_IN,
            ttl: 60,
            rdata: Bytes::new(),
            rdata_offset: offset,
        };
        let msg = Message {
            wire: Bytes::from(wire),
            ..message_with_answer(rr.clone())
        };
        assert_eq!(name_rdata(&msg, &rr).unwrap(), target);
    }

    #[test]
    fn soa_rdata_round_trips_minimum() {
        let mname = DomainName::new("ns1.example.com");
        let rname = DomainName::new("hostmaster.example.com");
        let mut wire = encode_name(&mname).unwrap();
        wire.extend_from_slice(&encode_name(&rname).unwrap());
        wire.extend_from_slice(&1u32.to_be_bytes()); // serial
        wire.extend_from_slice(&2u32.to_be_bytes()); // refresh
        wire.extend_from_slice(&3u32.to_be_bytes()); // retry
        wire.extend_from_slice(&4u32.to_be_bytes()); // expire
        wire.extend_from_slice(&30u32.to_be_bytes()); // minimum

        let rr = ResourceRecord {
            name: DomainName::new("example.com"),
            rtype: TYPE_SOA,
            rclass: CLASS_IN,
            ttl: 3600,
            rdata: Bytes::new(),
            rdata_offset: 0,
        };
        let msg = Message {
            wire: Bytes::from(wire),
            ..message_with_answer(rr.clone())
        };
        assert_eq!(soa_rdata(&msg, &rr).unwrap().minimum, 30);
        assert_eq!(soa_negative_ttl(&msg, &rr), 30);
    }

    #[test]
    fn soa_negative_ttl_falls_back_to_rr_ttl_on_malformed_soa() {
        let rr = ResourceRecord {
            name: DomainName::new("example.com"),
            rtype: TYPE_SOA,
            rclass: CLASS_IN,
            ttl: 3600,
            rdata: Bytes::new(),
            rdata_offset: 0,
        };
        let msg = Message {
            wire: Bytes::new(), // too short to contain any SOA fields
            ..message_with_answer(rr.clone())
        };
        assert_eq!(soa_negative_ttl(&msg, &rr), 3600);
    }
}
