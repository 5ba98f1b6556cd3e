//! Binary framing for one namespace record.
//!
//! ```text
//! 0..4   magic "ELN1" (LE u32)
//! 4      version
//! 5      namespace tag
//! 6      entry count
//! 7      reserved (0)
//! 8..10  payload length (LE u16)
//! 10..   entries: key_len u8, key, tag u8, value
//!          tag 0: len LE u16, utf-8 bytes
//!          tag 1: LE u32
//! ..+4   FNV-1a checksum of everything before it
//! ```

use heapless::{String, Vec};

use super::Namespace;

pub const RECORD_MAGIC: u32 = 0x314E_4C45; // "ELN1"
pub const RECORD_VERSION: u8 = 1;
pub const RECORD_CAPACITY: usize = 2048;
pub const MAX_ENTRIES: usize = 4;
pub const MAX_KEY_BYTES: usize = 15;
pub const MAX_STR_BYTES: usize = 512;

const HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 4;
const TAG_STR: u8 = 0;
const TAG_U32: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodecError {
    BadMagic,
    UnsupportedVersion(u8),
    NamespaceMismatch,
    Truncated,
    Checksum,
    InvalidUtf8,
    UnknownTag(u8),
    TooManyEntries,
    KeyTooLong,
    ValueTooLong,
    BufferTooSmall,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Str(String<MAX_STR_BYTES>),
    U32(u32),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    pub key: String<MAX_KEY_BYTES>,
    pub value: Value,
}

/// Decoded contents of one namespace.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NamespaceRecord {
    entries: Vec<Entry, MAX_ENTRIES>,
}

impl NamespaceRecord {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| entry.key.as_str() == key)
            .map(|entry| &entry.value)
    }

    /// Inserts or replaces `key`. Returns `Ok(true)` when the stored value
    /// changed.
    pub fn insert(&mut self, key: &str, value: Value) -> Result<bool, CodecError> {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.key.as_str() == key) {
            if entry.value == value {
                return Ok(false);
            }
            entry.value = value;
            return Ok(true);
        }

        let key = String::try_from(key).map_err(|_| CodecError::KeyTooLong)?;
        self.entries
            .push(Entry { key, value })
            .map_err(|_| CodecError::TooManyEntries)?;
        Ok(true)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.iter().position(|entry| entry.key.as_str() == key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub fn encode(
    namespace: Namespace,
    record: &NamespaceRecord,
    out: &mut [u8],
) -> Result<usize, CodecError> {
    let mut cursor = HEADER_LEN;

    for entry in &record.entries {
        let key = entry.key.as_bytes();
        put(out, &mut cursor, &[key.len() as u8])?;
        put(out, &mut cursor, key)?;
        match &entry.value {
            Value::Str(text) => {
                put(out, &mut cursor, &[TAG_STR])?;
                put(out, &mut cursor, &(text.len() as u16).to_le_bytes())?;
                put(out, &mut cursor, text.as_bytes())?;
            }
            Value::U32(value) => {
                put(out, &mut cursor, &[TAG_U32])?;
                put(out, &mut cursor, &value.to_le_bytes())?;
            }
        }
    }

    let payload_len = cursor - HEADER_LEN;
    if out.len() < HEADER_LEN {
        return Err(CodecError::BufferTooSmall);
    }
    out[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
    out[4] = RECORD_VERSION;
    out[5] = namespace.tag();
    out[6] = record.entries.len() as u8;
    out[7] = 0;
    out[8..10].copy_from_slice(&(payload_len as u16).to_le_bytes());

    let checksum = checksum32(&out[..cursor]);
    put(out, &mut cursor, &checksum.to_le_bytes())?;
    Ok(cursor)
}

pub fn decode(namespace: Namespace, bytes: &[u8]) -> Result<NamespaceRecord, CodecError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(CodecError::Truncated);
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != RECORD_MAGIC {
        return Err(CodecError::BadMagic);
    }
    if bytes[4] != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion(bytes[4]));
    }
    if bytes[5] != namespace.tag() {
        return Err(CodecError::NamespaceMismatch);
    }

    let count = bytes[6] as usize;
    let payload_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let body_end = HEADER_LEN + payload_len;
    if bytes.len() < body_end + CHECKSUM_LEN {
        return Err(CodecError::Truncated);
    }
    let expected = u32::from_le_bytes([
        bytes[body_end],
        bytes[body_end + 1],
        bytes[body_end + 2],
        bytes[body_end + 3],
    ]);
    if checksum32(&bytes[..body_end]) != expected {
        return Err(CodecError::Checksum);
    }
    if count > MAX_ENTRIES {
        return Err(CodecError::TooManyEntries);
    }

    let body = &bytes[..body_end];
    let mut cursor = HEADER_LEN;
    let mut record = NamespaceRecord::new();
    for _ in 0..count {
        let key_len = take(body, &mut cursor, 1)?[0] as usize;
        if key_len > MAX_KEY_BYTES {
            return Err(CodecError::KeyTooLong);
        }
        let key = utf8(take(body, &mut cursor, key_len)?)?;
        let value = match take(body, &mut cursor, 1)?[0] {
            TAG_STR => {
                let len_bytes = take(body, &mut cursor, 2)?;
                let len = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
                if len > MAX_STR_BYTES {
                    return Err(CodecError::ValueTooLong);
                }
                let text = utf8(take(body, &mut cursor, len)?)?;
                Value::Str(String::try_from(text).map_err(|_| CodecError::ValueTooLong)?)
            }
            TAG_U32 => {
                let raw = take(body, &mut cursor, 4)?;
                Value::U32(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            }
            other => return Err(CodecError::UnknownTag(other)),
        };
        record.insert(key, value)?;
    }

    Ok(record)
}

/// FNV-1a, shared with the flash sector framing.
pub fn checksum32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811C9DC5u32;
    for b in bytes {
        hash ^= *b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

fn put(out: &mut [u8], cursor: &mut usize, bytes: &[u8]) -> Result<(), CodecError> {
    let end = *cursor + bytes.len();
    let slot = out.get_mut(*cursor..end).ok_or(CodecError::BufferTooSmall)?;
    slot.copy_from_slice(bytes);
    *cursor = end;
    Ok(())
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], CodecError> {
    let end = *cursor + len;
    let slice = bytes.get(*cursor..end).ok_or(CodecError::Truncated)?;
    *cursor = end;
    Ok(slice)
}

fn utf8(bytes: &[u8]) -> Result<&str, CodecError> {
    core::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_record() -> NamespaceRecord {
        let mut record = NamespaceRecord::new();
        record
            .insert("ws_ip", Value::Str(String::try_from("192.168.1.50").unwrap()))
            .unwrap();
        record.insert("ws_port", Value::U32(8000)).unwrap();
        record
    }

    #[test]
    fn decodes_what_it_encodes() {
        let record = server_record();
        let mut buf = [0u8; RECORD_CAPACITY];
        let len = encode(Namespace::Server, &record, &mut buf).unwrap();

        let decoded = decode(Namespace::Server, &buf[..len]).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.get("ws_port"), Some(&Value::U32(8000)));
    }

    #[test]
    fn trailing_erased_flash_is_ignored() {
        let mut buf = [0xFFu8; 128];
        let len = encode(Namespace::Server, &server_record(), &mut buf).unwrap();
        assert!(len < buf.len());
        assert_eq!(decode(Namespace::Server, &buf).unwrap(), server_record());
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut buf = [0u8; RECORD_CAPACITY];
        let len = encode(Namespace::Server, &server_record(), &mut buf).unwrap();
        buf[HEADER_LEN + 2] ^= 0x01;
        assert_eq!(
            decode(Namespace::Server, &buf[..len]),
            Err(CodecError::Checksum)
        );
    }

    #[test]
    fn record_is_bound_to_its_namespace() {
        let mut buf = [0u8; RECORD_CAPACITY];
        let len = encode(Namespace::Server, &server_record(), &mut buf).unwrap();
        assert_eq!(
            decode(Namespace::Auth, &buf[..len]),
            Err(CodecError::NamespaceMismatch)
        );
    }

    #[test]
    fn erased_sector_is_not_a_record() {
        let buf = [0xFFu8; 64];
        assert_eq!(decode(Namespace::Auth, &buf), Err(CodecError::BadMagic));
    }

    #[test]
    fn insert_reports_unchanged_values() {
        let mut record = server_record();
        assert_eq!(record.insert("ws_port", Value::U32(8000)), Ok(false));
        assert_eq!(record.insert("ws_port", Value::U32(8001)), Ok(true));
        assert!(record.remove("ws_ip"));
        assert!(!record.remove("ws_ip"));
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn small_buffer_is_rejected() {
        let mut buf = [0u8; 16];
        assert_eq!(
            encode(Namespace::Server, &server_record(), &mut buf),
            Err(CodecError::BufferTooSmall)
        );
    }
}
