//! Typed key/value binary dictionary used for KDF parameters and
//! public custom data in KDBX 4 headers.
//!
//! Wire layout: a little-endian `u16` version, then repeated
//! `{u8 type, u32 name_len, name, u32 value_len, value}` records,
//! terminated by a zero type byte. Only the high byte of the version is
//! critical; a file with a newer low byte still loads.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

const VD_VERSION: u16 = 0x0100;
const VD_CRITICAL_MASK: u16 = 0xFF00;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTE_ARRAY: u8 = 0x42;

/// A single typed value in a [`VariantDictionary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantValue {
    UInt32(u32),
    UInt64(u64),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    ByteArray(Vec<u8>),
}

impl VariantValue {
    fn type_tag(&self) -> u8 {
        match self {
            VariantValue::UInt32(_) => TYPE_UINT32,
            VariantValue::UInt64(_) => TYPE_UINT64,
            VariantValue::Bool(_) => TYPE_BOOL,
            VariantValue::Int32(_) => TYPE_INT32,
            VariantValue::Int64(_) => TYPE_INT64,
            VariantValue::String(_) => TYPE_STRING,
            VariantValue::ByteArray(_) => TYPE_BYTE_ARRAY,
        }
    }

    fn to_wire(&self) -> Vec<u8> {
        match self {
            VariantValue::UInt32(v) => v.to_le_bytes().to_vec(),
            VariantValue::UInt64(v) => v.to_le_bytes().to_vec(),
            VariantValue::Bool(v) => vec![u8::from(*v)],
            VariantValue::Int32(v) => v.to_le_bytes().to_vec(),
            VariantValue::Int64(v) => v.to_le_bytes().to_vec(),
            VariantValue::String(v) => v.as_bytes().to_vec(),
            VariantValue::ByteArray(v) => v.clone(),
        }
    }
}

/// A self-describing typed key/value container.
///
/// Names are unique per dictionary. Lookup order is irrelevant; the
/// serialized order is stable (sorted by name) but carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantDictionary {
    entries: BTreeMap<String, VariantValue>,
}

impl VariantDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, name: &str) -> Option<&VariantValue> {
        self.entries.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: VariantValue) {
        self.entries.insert(name.into(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<VariantValue> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        match self.get(name) {
            Some(VariantValue::UInt32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name) {
            Some(VariantValue::UInt64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(VariantValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(VariantValue::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(VariantValue::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(VariantValue::String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_byte_array(&self, name: &str) -> Option<&[u8]> {
        match self.get(name) {
            Some(VariantValue::ByteArray(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    pub fn set_u32(&mut self, name: impl Into<String>, value: u32) {
        self.set(name, VariantValue::UInt32(value));
    }

    pub fn set_u64(&mut self, name: impl Into<String>, value: u64) {
        self.set(name, VariantValue::UInt64(value));
    }

    pub fn set_bool(&mut self, name: impl Into<String>, value: bool) {
        self.set(name, VariantValue::Bool(value));
    }

    pub fn set_i32(&mut self, name: impl Into<String>, value: i32) {
        self.set(name, VariantValue::Int32(value));
    }

    pub fn set_i64(&mut self, name: impl Into<String>, value: i64) {
        self.set(name, VariantValue::Int64(value));
    }

    pub fn set_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set(name, VariantValue::String(value.into()));
    }

    pub fn set_byte_array(&mut self, name: impl Into<String>, value: Vec<u8>) {
        self.set(name, VariantValue::ByteArray(value));
    }

    /// Serialize the dictionary to its binary wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&VD_VERSION.to_le_bytes());
        for (name, value) in &self.entries {
            let wire = value.to_wire();
            out.push(value.type_tag());
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&(wire.len() as u32).to_le_bytes());
            out.extend_from_slice(&wire);
        }
        out.push(TYPE_END);
        out
    }

    /// Parse a dictionary from its binary wire form.
    ///
    /// Unknown value type tags are skipped for forward compatibility;
    /// a critical version bump, a truncated record, or a fixed-width
    /// value of the wrong size is fatal.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::Format("variant dictionary too short".into()));
        }
        let version = LittleEndian::read_u16(&data[0..2]);
        if version & VD_CRITICAL_MASK > VD_VERSION & VD_CRITICAL_MASK {
            return Err(Error::Format(format!(
                "variant dictionary version {version:#06x} is newer than supported"
            )));
        }

        let mut dict = VariantDictionary::new();
        let mut pos = 2;
        loop {
            let type_tag = *data
                .get(pos)
                .ok_or_else(|| Error::Format("variant dictionary missing terminator".into()))?;
            pos += 1;
            if type_tag == TYPE_END {
                break;
            }

            let name = read_len_prefixed(data, &mut pos, "name")?;
            let name = String::from_utf8(name.to_vec())
                .map_err(|_| Error::Format("variant dictionary name is not UTF-8".into()))?;
            let value = read_len_prefixed(data, &mut pos, "value")?;

            let parsed = match type_tag {
                TYPE_UINT32 => Some(VariantValue::UInt32(read_fixed_u32(value, &name)?)),
                TYPE_UINT64 => Some(VariantValue::UInt64(read_fixed_u64(value, &name)? as u64)),
                TYPE_BOOL => {
                    if value.len() != 1 {
                        return Err(Error::Format(format!("bool value '{name}' has bad length")));
                    }
                    Some(VariantValue::Bool(value[0] != 0))
                }
                TYPE_INT32 => Some(VariantValue::Int32(read_fixed_u32(value, &name)? as i32)),
                TYPE_INT64 => Some(VariantValue::Int64(read_fixed_u64(value, &name)?)),
                TYPE_STRING => Some(VariantValue::String(
                    String::from_utf8(value.to_vec()).map_err(|_| {
                        Error::Format(format!("string value '{name}' is not UTF-8"))
                    })?,
                )),
                TYPE_BYTE_ARRAY => Some(VariantValue::ByteArray(value.to_vec())),
                _ => None, // unknown tag from a newer minor version
            };
            if let Some(parsed) = parsed {
                dict.entries.insert(name, parsed);
            }
        }
        Ok(dict)
    }
}

fn read_len_prefixed<'a>(data: &'a [u8], pos: &mut usize, what: &str) -> Result<&'a [u8]> {
    if *pos + 4 > data.len() {
        return Err(Error::Format(format!(
            "variant dictionary truncated in {what} length"
        )));
    }
    let len = LittleEndian::read_u32(&data[*pos..*pos + 4]) as usize;
    *pos += 4;
    if *pos + len > data.len() {
        return Err(Error::Format(format!(
            "variant dictionary {what} declares {len} bytes past end of data"
        )));
    }
    let out = &data[*pos..*pos + len];
    *pos += len;
    Ok(out)
}

fn read_fixed_u32(value: &[u8], name: &str) -> Result<u32> {
    if value.len() != 4 {
        return Err(Error::Format(format!("value '{name}' is not 4 bytes")));
    }
    Ok(LittleEndian::read_u32(value))
}

fn read_fixed_u64(value: &[u8], name: &str) -> Result<i64> {
    if value.len() != 8 {
        return Err(Error::Format(format!("value '{name}' is not 8 bytes")));
    }
    Ok(LittleEndian::read_i64(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VariantDictionary {
        let mut dict = VariantDictionary::new();
        dict.set_u32("u32", 42);
        dict.set_u64("u64", u64::MAX - 1);
        dict.set_bool("flag", true);
        dict.set_i32("i32", -7);
        dict.set_i64("i64", i64::MIN);
        dict.set_string("name", "mühlhausen");
        dict.set_byte_array("blob", vec![0, 1, 2, 255]);
        dict.set_byte_array("empty", Vec::new());
        dict
    }

    #[test]
    fn roundtrip_all_types() {
        let dict = sample();
        let parsed = VariantDictionary::deserialize(&dict.serialize()).unwrap();
        assert_eq!(dict, parsed);
    }

    #[test]
    fn roundtrip_empty_dictionary() {
        let dict = VariantDictionary::new();
        let bytes = dict.serialize();
        assert_eq!(bytes, vec![0x00, 0x01, 0x00]);
        assert_eq!(VariantDictionary::deserialize(&bytes).unwrap(), dict);
    }

    #[test]
    fn rejects_critical_version() {
        let mut bytes = sample().serialize();
        bytes[1] = 0x02; // bump the critical high byte
        assert!(matches!(
            VariantDictionary::deserialize(&bytes),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn accepts_newer_minor_version() {
        let mut bytes = sample().serialize();
        bytes[0] = 0x42; // non-critical low byte
        assert!(VariantDictionary::deserialize(&bytes).is_ok());
    }

    #[test]
    fn rejects_truncated_value() {
        let bytes = sample().serialize();
        assert!(matches!(
            VariantDictionary::deserialize(&bytes[..bytes.len() - 6]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn skips_unknown_type_tag() {
        // version, one record with type 0x77, then terminator
        let mut bytes = vec![0x00, 0x01];
        bytes.push(0x77);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'x');
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        bytes.push(0x00);
        let dict = VariantDictionary::deserialize(&bytes).unwrap();
        assert!(dict.is_empty());
    }

    #[test]
    fn missing_terminator_is_fatal() {
        let bytes = vec![0x00, 0x01];
        assert!(VariantDictionary::deserialize(&bytes).is_err());
    }
}
