//! Doc-values file format: value types, encodings and metadata entries
//!
//! Two files per segment (and optional suffix):
//!
//! ```text
//! .dvm  header  entry*  fieldId(-1)  footer
//! .dvd  header  blobs*                footer
//! ```
//!
//! Every entry starts with `fieldId(i32) type(u8)`. SORTED and SORTED_SET
//! entries nest further `fieldId type entry` records for their dictionary
//! and ordinal streams. All offsets in entries are absolute positions in
//! the data file; `-1` marks an absent missing-values bitset.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::directories::IndexInput;
use crate::error::{Error, Result};
use crate::packed::block_packed::MAX_TABLE_SIZE;
use crate::packed::{check_block_size, check_packed_version};

/// Codec name in the data file header.
pub const DATA_CODEC: &str = "DocValuesData";
/// Codec name in the metadata file header.
pub const META_CODEC: &str = "DocValuesMetadata";
pub const DATA_EXTENSION: &str = "dvd";
pub const META_EXTENSION: &str = "dvm";

/// Initial format, no checksum footers.
pub const VERSION_START: i32 = 0;
/// Adds checksum footers to both files.
pub const VERSION_CHECKSUM: i32 = 1;
pub const VERSION_CURRENT: i32 = VERSION_CHECKSUM;

/// Field id terminating the metadata entries.
pub const END_OF_FIELDS: i32 = -1;

/// Missing-bitset offset when every document has a value.
pub const NO_MISSING: i64 = -1;

/// Kind of per-document value a field stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DocValuesType {
    Numeric = 0,
    Binary = 1,
    Sorted = 2,
    SortedSet = 3,
}

impl DocValuesType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Numeric),
            1 => Some(Self::Binary),
            2 => Some(Self::Sorted),
            3 => Some(Self::SortedSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Numeric => "NUMERIC",
            Self::Binary => "BINARY",
            Self::Sorted => "SORTED",
            Self::SortedSet => "SORTED_SET",
        }
    }
}

impl fmt::Display for DocValuesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NumericEncoding {
    /// Block-packed raw values
    Delta = 0,
    /// Block-packed `(value - min) / gcd`
    Gcd = 1,
    /// One bit-packed array of indices into a table of distinct values
    Table = 2,
}

impl NumericEncoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Delta),
            1 => Some(Self::Gcd),
            2 => Some(Self::Table),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delta => "DELTA_COMPRESSED",
            Self::Gcd => "GCD_COMPRESSED",
            Self::Table => "TABLE_COMPRESSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryEncoding {
    Fixed = 0,
    Variable = 1,
    /// Sorted distinct terms, prefix-coded in batches
    Prefix = 2,
}

impl BinaryEncoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Fixed),
            1 => Some(Self::Variable),
            2 => Some(Self::Prefix),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "FIXED_LENGTH",
            Self::Variable => "VARIABLE_LENGTH",
            Self::Prefix => "PREFIX_COMPRESSED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SortedSetEncoding {
    WithAddresses = 0,
    SingleValued = 1,
}

impl SortedSetEncoding {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::WithAddresses),
            1 => Some(Self::SingleValued),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WithAddresses => "WITH_ADDRESS_LIST",
            Self::SingleValued => "SINGLE_VALUED_AS_SORTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericEntry {
    pub encoding: NumericEncoding,
    pub missing_offset: i64,
    pub packed_version: i32,
    pub offset: i64,
    pub count: i64,
    pub block_size: i32,
    /// GCD only
    pub min_value: i64,
    /// GCD only
    pub gcd: u64,
    /// TABLE only
    pub table: Option<Arc<[i64]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryEntry {
    pub encoding: BinaryEncoding,
    pub missing_offset: i64,
    pub min_length: i32,
    pub max_length: i32,
    pub count: i64,
    pub offset: i64,
    /// VARIABLE and PREFIX only
    pub addresses_offset: i64,
    pub packed_version: i32,
    /// PREFIX only
    pub address_interval: i32,
    pub block_size: i32,
}

impl BinaryEntry {
    /// Entries in the monotonic address table.
    pub fn num_addresses(&self) -> u64 {
        match self.encoding {
            BinaryEncoding::Fixed => 0,
            BinaryEncoding::Variable => self.count as u64 + 1,
            BinaryEncoding::Prefix => (self.count as u64).div_ceil(self.address_interval as u64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortedEntry {
    pub terms: BinaryEntry,
    pub ords: NumericEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrdIndexEntry {
    pub offset: i64,
    pub packed_version: i32,
    pub block_size: i32,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortedSetEntry {
    SingleValued(SortedEntry),
    WithAddresses {
        terms: BinaryEntry,
        ords: NumericEntry,
        ord_index: OrdIndexEntry,
    },
}

impl SortedSetEntry {
    pub fn encoding(&self) -> SortedSetEncoding {
        match self {
            SortedSetEntry::SingleValued(_) => SortedSetEncoding::SingleValued,
            SortedSetEntry::WithAddresses { .. } => SortedSetEncoding::WithAddresses,
        }
    }
}

// ── Writing ───────────────────────────────────────────────────────────────

pub fn write_entry_header<W: Write + ?Sized>(
    meta: &mut W,
    field_number: i32,
    ty: DocValuesType,
) -> io::Result<()> {
    meta.write_i32::<LittleEndian>(field_number)?;
    meta.write_u8(ty as u8)
}

pub fn write_numeric_entry<W: Write + ?Sized>(meta: &mut W, entry: &NumericEntry) -> io::Result<()> {
    meta.write_u8(entry.encoding as u8)?;
    meta.write_i64::<LittleEndian>(entry.missing_offset)?;
    meta.write_i32::<LittleEndian>(entry.packed_version)?;
    meta.write_i64::<LittleEndian>(entry.offset)?;
    meta.write_i64::<LittleEndian>(entry.count)?;
    meta.write_i32::<LittleEndian>(entry.block_size)?;
    match entry.encoding {
        NumericEncoding::Delta => {}
        NumericEncoding::Gcd => {
            meta.write_i64::<LittleEndian>(entry.min_value)?;
            meta.write_i64::<LittleEndian>(entry.gcd as i64)?;
        }
        NumericEncoding::Table => {
            let table = entry.table.as_deref().unwrap_or_default();
            meta.write_i32::<LittleEndian>(table.len() as i32)?;
            for &v in table {
                meta.write_i64::<LittleEndian>(v)?;
            }
        }
    }
    Ok(())
}

pub fn write_binary_entry<W: Write + ?Sized>(meta: &mut W, entry: &BinaryEntry) -> io::Result<()> {
    meta.write_u8(entry.encoding as u8)?;
    meta.write_i64::<LittleEndian>(entry.missing_offset)?;
    meta.write_i32::<LittleEndian>(entry.min_length)?;
    meta.write_i32::<LittleEndian>(entry.max_length)?;
    meta.write_i64::<LittleEndian>(entry.count)?;
    meta.write_i64::<LittleEndian>(entry.offset)?;
    match entry.encoding {
        BinaryEncoding::Fixed => {}
        BinaryEncoding::Variable => {
            meta.write_i64::<LittleEndian>(entry.addresses_offset)?;
            meta.write_i32::<LittleEndian>(entry.packed_version)?;
            meta.write_i32::<LittleEndian>(entry.block_size)?;
        }
        BinaryEncoding::Prefix => {
            meta.write_i64::<LittleEndian>(entry.addresses_offset)?;
            meta.write_i32::<LittleEndian>(entry.packed_version)?;
            meta.write_i32::<LittleEndian>(entry.address_interval)?;
            meta.write_i32::<LittleEndian>(entry.block_size)?;
        }
    }
    Ok(())
}

pub fn write_ord_index_entry<W: Write + ?Sized>(meta: &mut W, entry: &OrdIndexEntry) -> io::Result<()> {
    meta.write_i64::<LittleEndian>(entry.offset)?;
    meta.write_i32::<LittleEndian>(entry.packed_version)?;
    meta.write_i32::<LittleEndian>(entry.block_size)?;
    meta.write_i64::<LittleEndian>(entry.count)
}

// ── Reading ───────────────────────────────────────────────────────────────

fn corrupt_in(input: &IndexInput, msg: impl fmt::Display) -> Error {
    Error::corrupt(format!("{} (resource={})", msg, input.name()))
}

/// Read a nested `fieldId type` pair and check it matches the outer entry.
pub fn read_nested_header(meta: &mut IndexInput, field_number: i32, expected: DocValuesType) -> Result<()> {
    let nested_field = meta.read_i32()?;
    if nested_field != field_number {
        return Err(corrupt_in(
            meta,
            format!(
                "nested entry for field {} found inside field {}",
                nested_field, field_number
            ),
        ));
    }
    let ty = meta.read_u8()?;
    if ty != expected as u8 {
        return Err(corrupt_in(
            meta,
            format!(
                "field {} nested entry has type {}, expected {}",
                field_number, ty, expected
            ),
        ));
    }
    Ok(())
}

fn read_block_size(meta: &IndexInput, block_size: i32) -> Result<i32> {
    let valid = u32::try_from(block_size)
        .ok()
        .and_then(|b| check_block_size(b).ok())
        .is_some();
    if !valid {
        return Err(corrupt_in(meta, format!("invalid block size {}", block_size)));
    }
    Ok(block_size)
}

fn read_packed_version(meta: &IndexInput, version: i32) -> Result<i32> {
    check_packed_version(version).map_err(|e| corrupt_in(meta, e))?;
    Ok(version)
}

fn read_count(meta: &IndexInput, count: i64) -> Result<i64> {
    if count < 0 {
        return Err(corrupt_in(meta, format!("negative value count {}", count)));
    }
    Ok(count)
}

pub fn read_numeric_entry(meta: &mut IndexInput) -> Result<NumericEntry> {
    let raw = meta.read_u8()?;
    let encoding = NumericEncoding::from_u8(raw)
        .ok_or_else(|| corrupt_in(meta, format!("unknown numeric encoding {}", raw)))?;
    let missing_offset = meta.read_i64()?;
    let packed_version = meta.read_i32()?;
    let packed_version = read_packed_version(meta, packed_version)?;
    let offset = meta.read_i64()?;
    let count = meta.read_i64()?;
    let count = read_count(meta, count)?;
    let block_size = meta.read_i32()?;
    let block_size = read_block_size(meta, block_size)?;

    let mut entry = NumericEntry {
        encoding,
        missing_offset,
        packed_version,
        offset,
        count,
        block_size,
        min_value: 0,
        gcd: 1,
        table: None,
    };
    match encoding {
        NumericEncoding::Delta => {}
        NumericEncoding::Gcd => {
            entry.min_value = meta.read_i64()?;
            entry.gcd = meta.read_i64()? as u64;
            if entry.gcd < 2 {
                return Err(corrupt_in(meta, format!("invalid gcd {}", entry.gcd)));
            }
        }
        NumericEncoding::Table => {
            let size = meta.read_i32()?;
            if size < 1 || size as usize > MAX_TABLE_SIZE {
                return Err(corrupt_in(meta, format!("invalid table size {}", size)));
            }
            let table = (0..size).map(|_| meta.read_i64()).collect::<Result<Vec<_>>>()?;
            entry.table = Some(table.into());
        }
    }
    Ok(entry)
}

pub fn read_binary_entry(meta: &mut IndexInput) -> Result<BinaryEntry> {
    let raw = meta.read_u8()?;
    let encoding = BinaryEncoding::from_u8(raw)
        .ok_or_else(|| corrupt_in(meta, format!("unknown binary encoding {}", raw)))?;
    let missing_offset = meta.read_i64()?;
    let min_length = meta.read_i32()?;
    let max_length = meta.read_i32()?;
    if min_length < 0 || min_length > max_length {
        return Err(corrupt_in(
            meta,
            format!("invalid value lengths [{}, {}]", min_length, max_length),
        ));
    }
    let count = meta.read_i64()?;
    let count = read_count(meta, count)?;
    let offset = meta.read_i64()?;

    let mut entry = BinaryEntry {
        encoding,
        missing_offset,
        min_length,
        max_length,
        count,
        offset,
        addresses_offset: -1,
        packed_version: 0,
        address_interval: 0,
        block_size: 0,
    };
    match encoding {
        BinaryEncoding::Fixed => {}
        BinaryEncoding::Variable => {
            entry.addresses_offset = meta.read_i64()?;
            let packed_version = meta.read_i32()?;
            entry.packed_version = read_packed_version(meta, packed_version)?;
            let block_size = meta.read_i32()?;
            entry.block_size = read_block_size(meta, block_size)?;
        }
        BinaryEncoding::Prefix => {
            entry.addresses_offset = meta.read_i64()?;
            let packed_version = meta.read_i32()?;
            entry.packed_version = read_packed_version(meta, packed_version)?;
            entry.address_interval = meta.read_i32()?;
            if entry.address_interval < 1 {
                return Err(corrupt_in(
                    meta,
                    format!("invalid address interval {}", entry.address_interval),
                ));
            }
            let block_size = meta.read_i32()?;
            entry.block_size = read_block_size(meta, block_size)?;
        }
    }
    Ok(entry)
}

pub fn read_sorted_entry(meta: &mut IndexInput, field_number: i32) -> Result<SortedEntry> {
    read_nested_header(meta, field_number, DocValuesType::Binary)?;
    let terms = read_binary_entry(meta)?;
    if terms.encoding != BinaryEncoding::Prefix {
        return Err(corrupt_in(
            meta,
            format!("sorted field {} dictionary is {}", field_number, terms.encoding.as_str()),
        ));
    }
    read_nested_header(meta, field_number, DocValuesType::Numeric)?;
    let ords = read_numeric_entry(meta)?;
    Ok(SortedEntry { terms, ords })
}

pub fn read_sorted_set_entry(meta: &mut IndexInput, field_number: i32) -> Result<SortedSetEntry> {
    let raw = meta.read_u8()?;
    let encoding = SortedSetEncoding::from_u8(raw)
        .ok_or_else(|| corrupt_in(meta, format!("unknown sorted-set encoding {}", raw)))?;
    match encoding {
        SortedSetEncoding::SingleValued => {
            read_nested_header(meta, field_number, DocValuesType::Sorted)?;
            Ok(SortedSetEntry::SingleValued(read_sorted_entry(meta, field_number)?))
        }
        SortedSetEncoding::WithAddresses => {
            let SortedEntry { terms, ords } = read_sorted_entry(meta, field_number)?;
            let offset = meta.read_i64()?;
            let packed_version = meta.read_i32()?;
            let packed_version = read_packed_version(meta, packed_version)?;
            let block_size = meta.read_i32()?;
            let block_size = read_block_size(meta, block_size)?;
            let count = meta.read_i64()?;
            let count = read_count(meta, count)?;
            Ok(SortedSetEntry::WithAddresses {
                terms,
                ords,
                ord_index: OrdIndexEntry {
                    offset,
                    packed_version,
                    block_size,
                    count,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::OwnedBytes;

    fn numeric(encoding: NumericEncoding) -> NumericEntry {
        NumericEntry {
            encoding,
            missing_offset: NO_MISSING,
            packed_version: crate::packed::PACKED_VERSION_CURRENT,
            offset: 17,
            count: 100,
            block_size: 1024,
            min_value: -5,
            gcd: 3,
            table: Some(vec![1, 2, 3].into()),
        }
    }

    #[test]
    fn test_numeric_entry_roundtrip() {
        for encoding in [NumericEncoding::Gcd, NumericEncoding::Table] {
            let entry = numeric(encoding);
            let mut buf = Vec::new();
            write_numeric_entry(&mut buf, &entry).unwrap();
            let mut input = IndexInput::new("meta", OwnedBytes::new(buf));
            let read = read_numeric_entry(&mut input).unwrap();
            assert_eq!(read.encoding, encoding);
            assert_eq!(read.offset, 17);
            match encoding {
                NumericEncoding::Gcd => assert_eq!((read.min_value, read.gcd), (-5, 3)),
                _ => assert_eq!(read.table.as_deref(), Some(&[1i64, 2, 3][..])),
            }
            assert_eq!(input.file_pointer(), input.len());
        }
    }

    #[test]
    fn test_rejects_bad_bytes() {
        let mut buf = Vec::new();
        write_numeric_entry(&mut buf, &numeric(NumericEncoding::Delta)).unwrap();

        let mut unknown = buf.clone();
        unknown[0] = 9;
        let mut input = IndexInput::new("meta", OwnedBytes::new(unknown));
        assert!(matches!(read_numeric_entry(&mut input), Err(Error::Corruption(_))));

        // packed version lives right after encoding(1) + missing(8)
        let mut bad_version = buf.clone();
        bad_version[9] = 7;
        let mut input = IndexInput::new("meta", OwnedBytes::new(bad_version));
        assert!(matches!(read_numeric_entry(&mut input), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_nested_header_mismatch() {
        let mut buf = Vec::new();
        write_entry_header(&mut buf, 4, DocValuesType::Binary).unwrap();
        let mut input = IndexInput::new("meta", OwnedBytes::new(buf.clone()));
        assert!(read_nested_header(&mut input, 5, DocValuesType::Binary).is_err());
        let mut input = IndexInput::new("meta", OwnedBytes::new(buf));
        assert!(read_nested_header(&mut input, 4, DocValuesType::Numeric).is_err());
    }
}
