//! Motorola S-record decoding
//!
//! A record is `S`, a type digit, a byte count, then `count` bytes of
//! address, payload and checksum, all as hex pairs. The checksum makes the
//! sum of every byte after the type digit equal `0xFF` modulo 256.

use crate::error::{EhalError, Result};

/// Record type, from the digit after `S`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `S0` header, 16-bit address (always zero)
    Header,
    /// `S1` data, 16-bit address
    Data16,
    /// `S2` data, 24-bit address
    Data24,
    /// `S3` data, 32-bit address
    Data32,
    /// `S5` 16-bit count of preceding data records
    Count16,
    /// `S6` 24-bit count of preceding data records
    Count24,
    /// `S7` terminator, 32-bit start address
    Start32,
    /// `S8` terminator, 24-bit start address
    Start24,
    /// `S9` terminator, 16-bit start address
    Start16,
}

impl RecordKind {
    /// Decode a type digit. `S4` is reserved and rejected.
    #[must_use]
    pub const fn from_digit(digit: u8) -> Option<Self> {
        Some(match digit {
            b'0' => Self::Header,
            b'1' => Self::Data16,
            b'2' => Self::Data24,
            b'3' => Self::Data32,
            b'5' => Self::Count16,
            b'6' => Self::Count24,
            b'7' => Self::Start32,
            b'8' => Self::Start24,
            b'9' => Self::Start16,
            _ => return None,
        })
    }

    /// Width of the address (or count) field in bytes
    #[must_use]
    pub const fn addr_len(self) -> usize {
        match self {
            Self::Header | Self::Data16 | Self::Count16 | Self::Start16 => 2,
            Self::Data24 | Self::Count24 | Self::Start24 => 3,
            Self::Data32 | Self::Start32 => 4,
        }
    }

    /// True for `S1`..`S3`
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Data16 | Self::Data24 | Self::Data32)
    }

    /// True for `S7`..`S9`
    #[must_use]
    pub const fn is_terminator(self) -> bool {
        matches!(self, Self::Start32 | Self::Start24 | Self::Start16)
    }

    /// Count and terminator records carry no payload
    const fn has_payload(self) -> bool {
        matches!(
            self,
            Self::Header | Self::Data16 | Self::Data24 | Self::Data32
        )
    }
}

/// One verified record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record type
    pub kind: RecordKind,
    /// Address, record count or start address, depending on `kind`
    pub address: u32,
    /// Payload bytes
    pub data: Vec<u8>,
}

/// Decode and verify the record at the start of `input`.
///
/// Returns the record and the number of bytes consumed, including one
/// optional `\r` and one optional `\n` after it. Nothing is returned unless
/// the whole record, checksum included, is valid.
///
/// # Errors
///
/// Returns [`EhalError::Protocol`] tagged with `line` on any format or
/// checksum violation.
pub fn parse_record(input: &[u8], line: usize) -> Result<(Record, usize)> {
    let err = |reason: String| EhalError::protocol(line, reason);

    match input.first() {
        Some(b'S') => {}
        Some(&c) => return Err(err(format!("expected 'S', found {:?}", char::from(c)))),
        None => return Err(err("unexpected end of image".into())),
    }
    let digit = *input
        .get(1)
        .ok_or_else(|| err("missing record type".into()))?;
    let kind = RecordKind::from_digit(digit)
        .ok_or_else(|| err(format!("unsupported record type S{}", char::from(digit))))?;

    let count = hex_byte(input, 2).ok_or_else(|| err("malformed byte count".into()))?;
    let count_len = usize::from(count);
    let min = kind.addr_len() + 1;
    let count_ok = if kind.has_payload() {
        count_len >= min
    } else {
        count_len == min
    };
    if !count_ok {
        return Err(err(format!("byte count {count} invalid for {kind:?}")));
    }

    let mut bytes = Vec::with_capacity(count_len);
    for i in 0..count_len {
        let b = hex_byte(input, 4 + 2 * i).ok_or_else(|| {
            if input.len() < 4 + 2 * (i + 1) {
                err("record truncated".into())
            } else {
                err(format!("invalid hex digit in byte {}", i + 1))
            }
        })?;
        bytes.push(b);
    }

    let sum = bytes.iter().fold(count, |acc, &b| acc.wrapping_add(b));
    if sum != 0xFF {
        return Err(err(format!("checksum mismatch (sum {sum:#04x})")));
    }

    let (addr_bytes, rest) = bytes.split_at(kind.addr_len());
    let address = addr_bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    let data = rest[..rest.len() - 1].to_vec();

    let mut consumed = 4 + 2 * count_len;
    if input.get(consumed) == Some(&b'\r') {
        consumed += 1;
    }
    if input.get(consumed) == Some(&b'\n') {
        consumed += 1;
    }

    Ok((
        Record {
            kind,
            address,
            data,
        },
        consumed,
    ))
}

fn hex_byte(input: &[u8], at: usize) -> Option<u8> {
    let hi = hex_digit(*input.get(at)?)?;
    let lo = hex_digit(*input.get(at + 1)?)?;
    Some((hi << 4) | lo)
}

const fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data32_record() {
        let (rec, used) = parse_record(b"S311000000580B6EE2000B600210520D00005F\r\n", 1).unwrap();
        assert_eq!(rec.kind, RecordKind::Data32);
        assert_eq!(rec.address, 0x0000_0058);
        assert_eq!(
            rec.data,
            vec![0x0B, 0x6E, 0xE2, 0x00, 0x0B, 0x60, 0x02, 0x10, 0x52, 0x0D, 0x00, 0x00]
        );
        assert_eq!(used, 40);
    }

    #[test]
    fn header_and_terminator() {
        let (rec, used) = parse_record(b"S00600004844521B", 1).unwrap();
        assert_eq!(rec.kind, RecordKind::Header);
        assert_eq!(rec.data, b"HDR");
        assert_eq!(used, 16);

        let (rec, _) = parse_record(b"S9030000FC\n", 2).unwrap();
        assert_eq!(rec.kind, RecordKind::Start16);
        assert!(rec.data.is_empty());
    }

    #[test]
    fn lowercase_hex_accepted() {
        let (rec, _) = parse_record(b"S1050010abcd72", 1).unwrap();
        assert_eq!(rec.address, 0x0010);
        assert_eq!(rec.data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn bad_checksum_rejected() {
        let err = parse_record(b"S311000000580B6EE2000B600210520D00005E", 7).unwrap_err();
        match err {
            EhalError::Protocol { line, reason } => {
                assert_eq!(line, 7);
                assert!(reason.contains("checksum"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn format_violations() {
        assert!(parse_record(b"X1050010ABCD72", 1).is_err());
        assert!(parse_record(b"S4050010ABCD72", 1).is_err());
        assert!(parse_record(b"S1050010ABCD", 1).is_err());
        assert!(parse_record(b"S1050010ABXD72", 1).is_err());
        // Count record must be exactly address + checksum.
        assert!(parse_record(b"S5040003AAAA", 1).is_err());
        // Data record shorter than its address.
        assert!(parse_record(b"S102FFFE", 1).is_err());
    }

    #[test]
    fn count_record() {
        let (rec, _) = parse_record(b"S5030003F9", 1).unwrap();
        assert_eq!(rec.kind, RecordKind::Count16);
        assert_eq!(rec.address, 3);
    }
}
