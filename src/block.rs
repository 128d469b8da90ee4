//! Order-preserving TLV records for groups and entries.
//!
//! Each record is decoded into a typed struct, but the wire order and size of its fields
//! are kept alongside the typed values so that re-encoding a record that was never
//! mutated reproduces the original bytes exactly.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDateTime;

use crate::error::DecodeError;
use crate::fields::{self, Codec, FieldValue, TERMINATOR_FIELD_ID};

const FIELD_HEADER_LEN: usize = 6;

const GROUP_FIELD_GROUPID: u16 = 0x0001;
const GROUP_FIELD_GROUP_NAME: u16 = 0x0002;
const GROUP_FIELD_CREATION_TIME: u16 = 0x0003;
const GROUP_FIELD_LAST_MOD_TIME: u16 = 0x0004;
const GROUP_FIELD_LAST_ACC_TIME: u16 = 0x0005;
const GROUP_FIELD_EXPIRATION_TIME: u16 = 0x0006;
const GROUP_FIELD_IMAGEID: u16 = 0x0007;
const GROUP_FIELD_LEVEL: u16 = 0x0008;
const GROUP_FIELD_FLAGS: u16 = 0x0009;

const GROUP_FIELDS: &[(u16, Codec)] = &[
    (GROUP_FIELD_GROUPID, Codec::U32),
    (GROUP_FIELD_GROUP_NAME, Codec::Utf8String),
    (GROUP_FIELD_CREATION_TIME, Codec::PackedDate),
    (GROUP_FIELD_LAST_MOD_TIME, Codec::PackedDate),
    (GROUP_FIELD_LAST_ACC_TIME, Codec::PackedDate),
    (GROUP_FIELD_EXPIRATION_TIME, Codec::PackedDate),
    (GROUP_FIELD_IMAGEID, Codec::U32),
    (GROUP_FIELD_LEVEL, Codec::U16),
    (GROUP_FIELD_FLAGS, Codec::U32),
];

const ENTRY_FIELD_UUID: u16 = 0x0001;
const ENTRY_FIELD_GROUPID: u16 = 0x0002;
const ENTRY_FIELD_IMAGEID: u16 = 0x0003;
const ENTRY_FIELD_TITLE: u16 = 0x0004;
const ENTRY_FIELD_URL: u16 = 0x0005;
const ENTRY_FIELD_USERNAME: u16 = 0x0006;
const ENTRY_FIELD_PASSWORD: u16 = 0x0007;
const ENTRY_FIELD_NOTES: u16 = 0x0008;
const ENTRY_FIELD_CREATION_TIME: u16 = 0x0009;
const ENTRY_FIELD_LAST_MOD_TIME: u16 = 0x000A;
const ENTRY_FIELD_LAST_ACC_TIME: u16 = 0x000B;
const ENTRY_FIELD_EXPIRATION_TIME: u16 = 0x000C;
const ENTRY_FIELD_BINARY_DESC: u16 = 0x000D;
const ENTRY_FIELD_BINARY_DATA: u16 = 0x000E;

const ENTRY_FIELDS: &[(u16, Codec)] = &[
    (ENTRY_FIELD_UUID, Codec::AsciiHex),
    (ENTRY_FIELD_GROUPID, Codec::U32),
    (ENTRY_FIELD_IMAGEID, Codec::U32),
    (ENTRY_FIELD_TITLE, Codec::Utf8String),
    (ENTRY_FIELD_URL, Codec::Utf8String),
    (ENTRY_FIELD_USERNAME, Codec::Utf8String),
    (ENTRY_FIELD_PASSWORD, Codec::Utf8String),
    (ENTRY_FIELD_NOTES, Codec::Utf8String),
    (ENTRY_FIELD_CREATION_TIME, Codec::PackedDate),
    (ENTRY_FIELD_LAST_MOD_TIME, Codec::PackedDate),
    (ENTRY_FIELD_LAST_ACC_TIME, Codec::PackedDate),
    (ENTRY_FIELD_EXPIRATION_TIME, Codec::PackedDate),
    (ENTRY_FIELD_BINARY_DESC, Codec::Utf8String),
    (ENTRY_FIELD_BINARY_DATA, Codec::Passthrough),
];

fn codec_for(table: &[(u16, Codec)], field_id: u16) -> Option<Codec> {
    table
        .iter()
        .find(|(id, _)| *id == field_id)
        .map(|(_, codec)| *codec)
}

/// A decoded TLV record: the field values, plus the exact wire order/size of every field
/// so an unmodified record re-encodes byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    order: Vec<(u16, u32)>,
    values: HashMap<u16, FieldValue>,
}

impl Record {
    fn decode(buf: &[u8], table: &[(u16, Codec)]) -> Result<(Self, usize), DecodeError> {
        let mut order = Vec::new();
        let mut values = HashMap::new();
        let mut pos = 0usize;

        loop {
            if pos + FIELD_HEADER_LEN > buf.len() {
                return Err(DecodeError::Truncated { at: pos });
            }
            let field_id = LittleEndian::read_u16(&buf[pos..pos + 2]);
            let size = LittleEndian::read_u32(&buf[pos + 2..pos + 6]);
            pos += FIELD_HEADER_LEN;

            let end = pos
                .checked_add(size as usize)
                .filter(|&end| end <= buf.len())
                .ok_or(DecodeError::Truncated { at: pos })?;
            let payload = &buf[pos..end];
            pos = end;

            order.push((field_id, size));
            if field_id == TERMINATOR_FIELD_ID {
                break;
            }

            match codec_for(table, field_id) {
                Some(codec) => {
                    let value = codec
                        .decode(field_id, payload)
                        .map_err(|source| DecodeError::Field {
                            offset: pos - size as usize - FIELD_HEADER_LEN,
                            source,
                        })?;
                    values.insert(field_id, value);
                }
                None => {
                    // Unknown field id: keep the raw bytes so re-encoding stays faithful.
                    values.insert(field_id, FieldValue::Bytes(payload.to_vec()));
                }
            }
        }

        Ok((Record { order, values }, pos))
    }

    /// Re-encodes the record, recomputing each field's size from its current payload.
    fn encode(&mut self, table: &[(u16, Codec)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (field_id, size) in self.order.iter_mut() {
            if *field_id == TERMINATOR_FIELD_ID {
                out.extend_from_slice(&field_id.to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
                continue;
            }
            let codec = codec_for(table, *field_id).unwrap_or(Codec::Passthrough);
            let payload = match self.values.get(field_id) {
                Some(value) => codec.encode(value),
                None => Vec::new(),
            };
            *size = payload.len() as u32;
            out.extend_from_slice(&field_id.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&payload);
        }
        out
    }

    fn wire_len(&self) -> usize {
        self.order
            .iter()
            .map(|(_, size)| FIELD_HEADER_LEN + *size as usize)
            .sum()
    }

    fn get_str(&self, field_id: u16) -> &str {
        match self.values.get(&field_id) {
            Some(FieldValue::Str(s)) => s.as_str(),
            _ => "",
        }
    }

    fn set_str(&mut self, field_id: u16, value: impl Into<String>) {
        self.values.insert(field_id, FieldValue::Str(value.into()));
    }

    fn get_u32(&self, field_id: u16) -> u32 {
        match self.values.get(&field_id) {
            Some(FieldValue::U32(n)) => *n,
            _ => 0,
        }
    }

    fn set_u32(&mut self, field_id: u16, value: u32) {
        self.values.insert(field_id, FieldValue::U32(value));
    }

    fn get_u16(&self, field_id: u16) -> u16 {
        match self.values.get(&field_id) {
            Some(FieldValue::U16(n)) => *n,
            _ => 0,
        }
    }

    fn set_u16(&mut self, field_id: u16, value: u16) {
        self.values.insert(field_id, FieldValue::U16(value));
    }

    fn get_date(&self, field_id: u16) -> NaiveDateTime {
        match self.values.get(&field_id) {
            Some(FieldValue::Date(d)) => *d,
            _ => fields::never_expires(),
        }
    }

    fn set_date(&mut self, field_id: u16, value: NaiveDateTime) {
        self.values.insert(field_id, FieldValue::Date(value));
    }

    fn get_bytes(&self, field_id: u16) -> &[u8] {
        match self.values.get(&field_id) {
            Some(FieldValue::Bytes(b)) => b.as_slice(),
            _ => &[],
        }
    }

    fn set_bytes(&mut self, field_id: u16, value: Vec<u8>) {
        self.values.insert(field_id, FieldValue::Bytes(value));
    }
}

fn new_order(fields_in_order: &[u16]) -> Vec<(u16, u32)> {
    fields_in_order.iter().map(|id| (*id, 0)).collect()
}

/// A decoded `Group` TLV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    record: Record,
}

impl GroupInfo {
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (record, n) = Record::decode(buf, GROUP_FIELDS)?;
        Ok((GroupInfo { record }, n))
    }

    pub fn encode(&mut self) -> Vec<u8> {
        self.record.encode(GROUP_FIELDS)
    }

    pub fn wire_len(&self) -> usize {
        self.record.wire_len()
    }

    /// Builds a freshly minted group with the given name, id and tree depth; all
    /// timestamps are set to "now" except expiration, which is set to the "never
    /// expires" sentinel date.
    pub fn new(name: impl Into<String>, groupid: u32, level: u16) -> Self {
        let order = new_order(&[
            GROUP_FIELD_GROUPID,
            GROUP_FIELD_GROUP_NAME,
            GROUP_FIELD_CREATION_TIME,
            GROUP_FIELD_LAST_MOD_TIME,
            GROUP_FIELD_LAST_ACC_TIME,
            GROUP_FIELD_EXPIRATION_TIME,
            GROUP_FIELD_IMAGEID,
            GROUP_FIELD_LEVEL,
            GROUP_FIELD_FLAGS,
            TERMINATOR_FIELD_ID,
        ]);
        let mut record = Record {
            order,
            values: HashMap::new(),
        };
        let now = chrono::Local::now().naive_local();
        record.set_u32(GROUP_FIELD_GROUPID, groupid);
        record.set_str(GROUP_FIELD_GROUP_NAME, name);
        record.set_date(GROUP_FIELD_CREATION_TIME, now);
        record.set_date(GROUP_FIELD_LAST_MOD_TIME, now);
        record.set_date(GROUP_FIELD_LAST_ACC_TIME, now);
        record.set_date(GROUP_FIELD_EXPIRATION_TIME, fields::never_expires());
        record.set_u32(GROUP_FIELD_IMAGEID, 1);
        record.set_u16(GROUP_FIELD_LEVEL, level);
        record.set_u32(GROUP_FIELD_FLAGS, 0);
        GroupInfo { record }
    }

    pub fn groupid(&self) -> u32 {
        self.record.get_u32(GROUP_FIELD_GROUPID)
    }

    pub fn set_groupid(&mut self, value: u32) {
        self.record.set_u32(GROUP_FIELD_GROUPID, value)
    }

    pub fn group_name(&self) -> &str {
        self.record.get_str(GROUP_FIELD_GROUP_NAME)
    }

    pub fn set_group_name(&mut self, value: impl Into<String>) {
        self.record.set_str(GROUP_FIELD_GROUP_NAME, value)
    }

    pub fn level(&self) -> u16 {
        self.record.get_u16(GROUP_FIELD_LEVEL)
    }

    pub fn set_level(&mut self, value: u16) {
        self.record.set_u16(GROUP_FIELD_LEVEL, value)
    }

    pub fn imageid(&self) -> u32 {
        self.record.get_u32(GROUP_FIELD_IMAGEID)
    }

    pub fn creation_time(&self) -> NaiveDateTime {
        self.record.get_date(GROUP_FIELD_CREATION_TIME)
    }

    pub fn last_mod_time(&self) -> NaiveDateTime {
        self.record.get_date(GROUP_FIELD_LAST_MOD_TIME)
    }

    pub fn set_last_mod_time(&mut self, value: NaiveDateTime) {
        self.record.set_date(GROUP_FIELD_LAST_MOD_TIME, value)
    }

    pub fn last_access_time(&self) -> NaiveDateTime {
        self.record.get_date(GROUP_FIELD_LAST_ACC_TIME)
    }

    pub fn expiration_time(&self) -> NaiveDateTime {
        self.record.get_date(GROUP_FIELD_EXPIRATION_TIME)
    }
}

/// A decoded `Entry` TLV record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    record: Record,
}

impl EntryInfo {
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (record, n) = Record::decode(buf, ENTRY_FIELDS)?;
        Ok((EntryInfo { record }, n))
    }

    pub fn encode(&mut self) -> Vec<u8> {
        self.record.encode(ENTRY_FIELDS)
    }

    pub fn wire_len(&self) -> usize {
        self.record.wire_len()
    }

    /// Builds a freshly minted entry belonging to `groupid`, with a random UUID and all
    /// timestamps set to "now" except expiration, which never expires.
    pub fn new(groupid: u32) -> Self {
        let order = new_order(&[
            ENTRY_FIELD_UUID,
            ENTRY_FIELD_GROUPID,
            ENTRY_FIELD_IMAGEID,
            ENTRY_FIELD_TITLE,
            ENTRY_FIELD_URL,
            ENTRY_FIELD_USERNAME,
            ENTRY_FIELD_PASSWORD,
            ENTRY_FIELD_NOTES,
            ENTRY_FIELD_CREATION_TIME,
            ENTRY_FIELD_LAST_MOD_TIME,
            ENTRY_FIELD_LAST_ACC_TIME,
            ENTRY_FIELD_EXPIRATION_TIME,
            ENTRY_FIELD_BINARY_DESC,
            ENTRY_FIELD_BINARY_DATA,
            TERMINATOR_FIELD_ID,
        ]);
        let mut record = Record {
            order,
            values: HashMap::new(),
        };
        let now = chrono::Local::now().naive_local();
        let uuid = uuid::Uuid::new_v4();
        record.set_str(ENTRY_FIELD_UUID, uuid.simple().to_string());
        record.set_u32(ENTRY_FIELD_GROUPID, groupid);
        record.set_u32(ENTRY_FIELD_IMAGEID, 1);
        record.set_str(ENTRY_FIELD_TITLE, "");
        record.set_str(ENTRY_FIELD_URL, "");
        record.set_str(ENTRY_FIELD_USERNAME, "");
        record.set_str(ENTRY_FIELD_PASSWORD, "");
        record.set_str(ENTRY_FIELD_NOTES, "");
        record.set_date(ENTRY_FIELD_CREATION_TIME, now);
        record.set_date(ENTRY_FIELD_LAST_MOD_TIME, now);
        record.set_date(ENTRY_FIELD_LAST_ACC_TIME, now);
        record.set_date(ENTRY_FIELD_EXPIRATION_TIME, fields::never_expires());
        record.set_str(ENTRY_FIELD_BINARY_DESC, "");
        record.set_bytes(ENTRY_FIELD_BINARY_DATA, Vec::new());
        EntryInfo { record }
    }

    pub fn uuid(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_UUID)
    }

    pub fn groupid(&self) -> u32 {
        self.record.get_u32(ENTRY_FIELD_GROUPID)
    }

    pub fn set_groupid(&mut self, value: u32) {
        self.record.set_u32(ENTRY_FIELD_GROUPID, value)
    }

    pub fn imageid(&self) -> u32 {
        self.record.get_u32(ENTRY_FIELD_IMAGEID)
    }

    pub fn set_imageid(&mut self, value: u32) {
        self.record.set_u32(ENTRY_FIELD_IMAGEID, value)
    }

    pub fn title(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_TITLE)
    }

    pub fn set_title(&mut self, value: impl Into<String>) {
        self.record.set_str(ENTRY_FIELD_TITLE, value)
    }

    pub fn url(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_URL)
    }

    pub fn set_url(&mut self, value: impl Into<String>) {
        self.record.set_str(ENTRY_FIELD_URL, value)
    }

    pub fn username(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_USERNAME)
    }

    pub fn set_username(&mut self, value: impl Into<String>) {
        self.record.set_str(ENTRY_FIELD_USERNAME, value)
    }

    pub fn password(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_PASSWORD)
    }

    pub fn set_password(&mut self, value: impl Into<String>) {
        self.record.set_str(ENTRY_FIELD_PASSWORD, value)
    }

    pub fn notes(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_NOTES)
    }

    pub fn set_notes(&mut self, value: impl Into<String>) {
        self.record.set_str(ENTRY_FIELD_NOTES, value)
    }

    pub fn binary_desc(&self) -> &str {
        self.record.get_str(ENTRY_FIELD_BINARY_DESC)
    }

    pub fn binary_data(&self) -> &[u8] {
        self.record.get_bytes(ENTRY_FIELD_BINARY_DATA)
    }

    pub fn set_binary(&mut self, desc: impl Into<String>, data: Vec<u8>) {
        self.record.set_str(ENTRY_FIELD_BINARY_DESC, desc);
        self.record.set_bytes(ENTRY_FIELD_BINARY_DATA, data);
    }

    pub fn creation_time(&self) -> NaiveDateTime {
        self.record.get_date(ENTRY_FIELD_CREATION_TIME)
    }

    pub fn last_mod_time(&self) -> NaiveDateTime {
        self.record.get_date(ENTRY_FIELD_LAST_MOD_TIME)
    }

    pub fn set_last_mod_time(&mut self, value: NaiveDateTime) {
        self.record.set_date(ENTRY_FIELD_LAST_MOD_TIME, value)
    }

    pub fn last_access_time(&self) -> NaiveDateTime {
        self.record.get_date(ENTRY_FIELD_LAST_ACC_TIME)
    }

    pub fn set_last_access_time(&mut self, value: NaiveDateTime) {
        self.record.set_date(ENTRY_FIELD_LAST_ACC_TIME, value)
    }

    pub fn expiration_time(&self) -> NaiveDateTime {
        self.record.get_date(ENTRY_FIELD_EXPIRATION_TIME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_round_trips() {
        let mut group = GroupInfo::new("Internet", 7, 0);
        let encoded = group.encode();
        let (decoded, n) = GroupInfo::decode(&encoded).unwrap();
        assert_eq!(n, encoded.len());
        assert_eq!(decoded.groupid(), 7);
        assert_eq!(decoded.group_name(), "Internet");
        assert_eq!(decoded.level(), 0);
    }

    #[test]
    fn entry_round_trips() {
        let mut entry = EntryInfo::new(7);
        entry.set_title("example.com");
        entry.set_username("alice");
        entry.set_password("hunter2");
        let encoded = entry.encode();
        let (decoded, n) = EntryInfo::decode(&encoded).unwrap();
        assert_eq!(n, encoded.len());
        assert_eq!(decoded.groupid(), 7);
        assert_eq!(decoded.title(), "example.com");
        assert_eq!(decoded.username(), "alice");
        assert_eq!(decoded.password(), "hunter2");
        assert_eq!(decoded.uuid().len(), 32);
    }

    #[test]
    fn unknown_field_id_round_trips_as_passthrough() {
        let mut group = GroupInfo::new("Vault", 1, 0);
        group
            .record
            .order
            .insert(group.record.order.len() - 1, (0x1234, 0));
        group
            .record
            .values
            .insert(0x1234, FieldValue::Bytes(vec![9, 9, 9]));
        let encoded = group.encode();
        let (decoded, _) = GroupInfo::decode(&encoded).unwrap();
        assert_eq!(
            decoded.record.get_bytes(0x1234),
            &[9, 9, 9][..]
        );
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut group = GroupInfo::new("Vault", 1, 0);
        let mut encoded = group.encode();
        encoded.truncate(encoded.len() - 3);
        assert!(matches!(
            GroupInfo::decode(&encoded),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
