//! Static dispatch table mapping TLV field ids to their wire codec.
//!
//! Every group and entry record is a flat run of `(field_id: u16, size: u32, payload)`
//! triples terminated by a `0xFFFF` field of size zero. Which codec applies to a given
//! field id is fixed per record kind (see [`crate::block::GROUP_FIELDS`] and
//! [`crate::block::ENTRY_FIELDS`]); an id absent from both tables is passed through
//! unmodified so that records containing fields this crate does not know about still
//! round-trip byte for byte.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{NaiveDate, NaiveDateTime};

use crate::error::FieldDecodeError;

pub const TERMINATOR_FIELD_ID: u16 = 0xFFFF;

/// A field's value after decoding, tagged by which codec produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FieldValue {
    Bytes(Vec<u8>),
    Str(String),
    U16(u16),
    U32(u32),
    Date(NaiveDateTime),
}

/// The wire codec used for a particular field id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Codec {
    /// Raw bytes, kept and re-emitted verbatim.
    Passthrough,
    /// 16 raw bytes, surfaced as a 32-character lowercase hex string (used for UUIDs).
    AsciiHex,
    /// NUL-terminated UTF-8 string.
    Utf8String,
    U16,
    U32,
    /// The 5-byte packed date/time format described in [`decode_packed_date`].
    PackedDate,
}

impl Codec {
    pub(crate) fn decode(self, field_id: u16, buf: &[u8]) -> Result<FieldValue, FieldDecodeError> {
        match self {
            Codec::Passthrough => Ok(FieldValue::Bytes(buf.to_vec())),
            Codec::AsciiHex => {
                // The source hex-encodes the raw bytes and then strips any stray NUL
                // bytes from the result; hex output never contains one, so this is a
                // no-op kept here only for parity with that behavior.
                let hex_str: String = hex::encode(buf).chars().filter(|&c| c != '\0').collect();
                Ok(FieldValue::Str(hex_str))
            }
            Codec::Utf8String => {
                let trimmed = buf.strip_suffix(&[0]).unwrap_or(buf);
                let s = std::str::from_utf8(trimmed)
                    .map_err(|source| FieldDecodeError::Utf8 { field_id, source })?;
                Ok(FieldValue::Str(s.to_string()))
            }
            Codec::U16 => {
                if buf.len() < 2 {
                    return Err(FieldDecodeError::TooShort {
                        field_id,
                        size: buf.len() as u32,
                        detail: "expected a 2-byte integer",
                    });
                }
                Ok(FieldValue::U16(LittleEndian::read_u16(buf)))
            }
            Codec::U32 => {
                if buf.len() < 4 {
                    return Err(FieldDecodeError::TooShort {
                        field_id,
                        size: buf.len() as u32,
                        detail: "expected a 4-byte integer",
                    });
                }
                Ok(FieldValue::U32(LittleEndian::read_u32(buf)))
            }
            Codec::PackedDate => decode_packed_date(field_id, buf),
        }
    }

    pub(crate) fn encode(self, value: &FieldValue) -> Vec<u8> {
        match (self, value) {
            (Codec::Passthrough, FieldValue::Bytes(b)) => b.clone(),
            (Codec::AsciiHex, FieldValue::Str(hex_str)) => hex::decode(hex_str).unwrap_or_default(),
            (Codec::Utf8String, FieldValue::Str(s)) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            (Codec::U16, FieldValue::U16(n)) => {
                let mut buf = [0u8; 2];
                LittleEndian::write_u16(&mut buf, *n);
                buf.to_vec()
            }
            (Codec::U32, FieldValue::U32(n)) => {
                let mut buf = [0u8; 4];
                LittleEndian::write_u32(&mut buf, *n);
                buf.to_vec()
            }
            (Codec::PackedDate, FieldValue::Date(d)) => encode_packed_date(d).to_vec(),
            // a mismatched (codec, value) pair cannot arise from values this module
            // produces itself; treat it as "no payload" rather than panicking.
            _ => Vec::new(),
        }
    }
}

/// Decodes the 5-byte packed date/time format used for all timestamp fields.
///
/// Bits are packed as `(year:14, month:4, day:5, hour:5, minute:6, second:6)`:
/// `b0 = year>>6`, `b1 = (year&0x3F)<<2 | month>>2`,
/// `b2 = (month&0x3)<<6 | (day&0x1F)<<1 | hour>>4`,
/// `b3 = (hour&0xF)<<4 | minute>>2`, `b4 = (minute&0x3)<<6 | second&0x3F`.
pub(crate) fn decode_packed_date(field_id: u16, buf: &[u8]) -> Result<FieldValue, FieldDecodeError> {
    if buf.len() < 5 {
        return Err(FieldDecodeError::TooShort {
            field_id,
            size: buf.len() as u32,
            detail: "expected a 5-byte packed date",
        });
    }
    let b0 = buf[0] as u32;
    let b1 = buf[1] as u32;
    let b2 = buf[2] as u32;
    let b3 = buf[3] as u32;
    let b4 = buf[4] as u32;

    let year = (b0 << 6) | (b1 >> 2);
    let mon = ((b1 & 0x03) << 2) | (b2 >> 6);
    let day = (b2 >> 1) & 0x1F;
    let hour = ((b2 & 0x01) << 4) | (b3 >> 4);
    let min = ((b3 & 0x0F) << 2) | (b4 >> 6);
    let sec = b4 & 0x3F;

    let date = NaiveDate::from_ymd_opt(year as i32, mon, day)
        .ok_or(FieldDecodeError::IllegalDate { field_id })?;
    let time = date
        .and_hms_opt(hour, min, sec)
        .ok_or(FieldDecodeError::IllegalDate { field_id })?;
    Ok(FieldValue::Date(time))
}

/// Encodes a [`NaiveDateTime`] into the 5-byte packed date/time format.
pub(crate) fn encode_packed_date(d: &NaiveDateTime) -> [u8; 5] {
    use chrono::{Datelike, Timelike};

    let year = d.year() as u32;
    let mon = d.month();
    let day = d.day();
    let hour = d.hour();
    let min = d.minute();
    let sec = d.second();

    let b0 = (year >> 6) as u8;
    let b1 = (((year & 0x3F) << 2) | (mon >> 2)) as u8;
    let b2 = (((mon & 0x03) << 6) | ((day & 0x1F) << 1) | (hour >> 4)) as u8;
    let b3 = (((hour & 0x0F) << 4) | (min >> 2)) as u8;
    let b4 = (((min & 0x03) << 6) | (sec & 0x3F)) as u8;

    [b0, b1, b2, b3, b4]
}

/// The sentinel timestamp used for "never expires" fields (2999-12-28 23:59:59).
pub(crate) fn never_expires() -> NaiveDateTime {
    #[allow(clippy::expect_used)]
    NaiveDate::from_ymd_opt(2999, 12, 28)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .expect("2999-12-28 23:59:59 is a valid date")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_date_round_trips() {
        let d = NaiveDate::from_ymd_opt(2023, 6, 15)
            .unwrap()
            .and_hms_opt(13, 47, 22)
            .unwrap();
        let packed = encode_packed_date(&d);
        let decoded = decode_packed_date(0, &packed).unwrap();
        assert_eq!(decoded, FieldValue::Date(d));
    }

    #[test]
    fn packed_date_sentinel_round_trips() {
        let sentinel = never_expires();
        let packed = encode_packed_date(&sentinel);
        let decoded = decode_packed_date(0, &packed).unwrap();
        assert_eq!(decoded, FieldValue::Date(sentinel));
    }

    #[test]
    fn packed_date_rejects_impossible_date() {
        // day 0 is not a valid day of the month.
        let buf = [0x07, 0xE7, 0x00, 0x20, 0x00];
        assert!(matches!(
            decode_packed_date(3, &buf),
            Err(FieldDecodeError::IllegalDate { field_id: 3 })
        ));
    }

    #[test]
    fn ascii_hex_round_trips() {
        let raw = [0xDE, 0xAD, 0xBE, 0xEF];
        let decoded = Codec::AsciiHex.decode(0, &raw).unwrap();
        assert_eq!(decoded, FieldValue::Str("deadbeef".to_string()));
        let encoded = Codec::AsciiHex.encode(&decoded);
        assert_eq!(encoded, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn utf8_string_strips_trailing_nul() {
        let raw = b"hello\0";
        let decoded = Codec::Utf8String.decode(0, raw).unwrap();
        assert_eq!(decoded, FieldValue::Str("hello".to_string()));
        let encoded = Codec::Utf8String.encode(&decoded);
        assert_eq!(encoded, b"hello\0".to_vec());
    }
}
