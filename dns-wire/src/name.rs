//! Label encoding and compression-aware decoding for domain names.

use crate::deserialise::Error;
use crate::types::DomainName;

/// Maximum length of a single label, per RFC 1035.
pub const LABEL_MAX_LEN: usize = 63;

/// Maximum number of compression-pointer jumps to follow before giving up.
/// Bounds decode time and rejects pointer loops.
pub const MAX_POINTER_JUMPS: u32 = 16;

/// Encode a normalized name as wire-format labels terminated by a zero byte.
///
/// The empty name (root) encodes as a single zero byte. Each label must be
/// 1 to 63 bytes.
///
/// # Errors
///
/// If any label exceeds 63 bytes.
pub fn encode_name(name: &DomainName) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    if !name.is_root() {
        for label in name.labels() {
            if label.is_empty() || label.len() > LABEL_MAX_LEN {
                return Err(Error::DomainLabelInvalid(None));
            }
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
    }
    out.push(0);
    Ok(out)
}

/// Decode a (possibly compressed) name starting at `offset` in `wire`.
///
/// Returns the decoded, normalized name and the position in `wire`
/// immediately after the name as written at `offset` — which, per RFC 1035
/// message compression, is the position right after the *first* pointer
/// encountered, not the position reached by following it.
///
/// # Errors
///
/// If the buffer is too short, a label or pointer is malformed, or more than
/// `MAX_POINTER_JUMPS` pointers are followed.
pub fn decode_name(wire: &[u8], offset: usize) -> Result<(DomainName, usize), Error> {
    let mut cur = offset;
    let mut jumped = false;
    let mut jump_end = 0usize;
    let mut jumps: u32 = 0;
    let mut labels: Vec<String> = Vec::new();

    loop {
        let len = *wire.get(cur).ok_or(Error::DomainTooShort(None))?;

        if len & 0b1100_0000 == 0b1100_0000 {
            let hi = len & 0b0011_1111;
            let lo = *wire.get(cur + 1).ok_or(Error::DomainTooShort(None))?;
            let ptr = u16::from_be_bytes([hi, lo]) as usize;

            if !jumped {
                jump_end = cur + 2;
                jumped = true;
            }
            cur = ptr;

            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(Error::DomainPointerInvalid(None));
            }
            continue;
        }

        if len & 0b1100_0000 != 0 {
            return Err(Error::DomainLabelInvalid(None));
        }

        if len == 0 {
            cur += 1;
            break;
        }

        let len = len as usize;
        let start = cur + 1;
        let end = start + len;
        let label = wire.get(start..end).ok_or(Error::DomainTooShort(None))?;
        labels.push(
            std::str::from_utf8(label)
                .map_err(|_| Error::DomainLabelInvalid(None))?
                .to_ascii_lowercase(),
        );
        cur = end;
    }

    let name = if labels.is_empty() {
        DomainName::root()
    } else {
        DomainName::new(&labels.join("."))
    };

    Ok((name, if jumped { jump_end } else { cur }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_root() {
        assert_eq!(encode_name(&DomainName::root()).unwrap(), vec![0]);
    }

    #[test]
    fn encode_rejects_long_label() {
        let long = "a".repeat(64);
        let name = DomainName::new(&long);
        assert!(encode_name(&name).is_err());
    }

    #[test]
    fn round_trip_simple_name() {
        let name = DomainName::new("www.example.com");
        let wire = encode_name(&name).unwrap();
        let (decoded, pos) = decode_name(&wire, 0).unwrap();
        assert_eq!(decoded, name);
        assert_eq!(pos, wire.len());
    }

    #[test]
    fn decode_follows_single_pointer() {
        // "example.com" at offset 0, then a name at offset 13 that is just
        // a pointer back to offset 0.
        let mut wire = encode_name(&DomainName::new("example.com")).unwrap();
        let ptr_offset = wire.len();
        wire.push(0b1100_0000);
        wire.push(0x00);

        let (decoded, pos) = decode_name(&wire, ptr_offset).unwrap();
        assert_eq!(decoded, DomainName::new("example.com"));
        assert_eq!(pos, ptr_offset + 2);
    }

    #[test]
    fn decode_rejects_pointer_loop() {
        // Pointer at offset 0 pointing to itself.
        let wire = vec![0b1100_0000, 0x00];
        assert!(decode_name(&wire, 0).is_err());
    }

    #[test]
    fn decode_bounds_jumps_even_without_a_tight_loop() {
        // A chain of pointers, each one byte further back, long enough to
        // exceed MAX_POINTER_JUMPS.
        let mut wire = vec![0u8; 0];
        wire.push(0); // name at offset 0: root
        for i in 1..=(MAX_POINTER_JUMPS as usize + 2) {
            let target = (i - 1) as u16;
            wire.push(0b1100_0000 | ((target >> 8) as u8));
            wire.push((target & 0xFF) as u8);
        }
        let last = wire.len() - 2;
        assert!(decode_name(&wire, last).is_err());
    }
}
