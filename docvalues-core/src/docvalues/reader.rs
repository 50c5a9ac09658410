//! Doc-values reader
//!
//! Opening parses the whole metadata file into per-type entry maps. Data is
//! never copied up front: accessors decode from the data input directly, and
//! the few structures that must live in memory (address tables, ord indexes
//! and block page indexes) are built on first use and shared from then on.

use std::io;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::codec_util::{FOOTER_LENGTH, check_footer, check_header, retrieve_checksum};
use crate::directories::IndexInput;
use crate::error::{Error, Result};
use crate::packed::bitpacking::packed_bytes_len;
use crate::packed::{BlockPackedReader, MonotonicBlockPackedReader, bits_required};
use crate::segment::{FieldInfo, FieldInfos, SegmentReadState};

use super::accessors::{
    BinaryReader, Bits, MatchAllBits, MissingBits, NumericReader, SingletonSortedSet, SortedBits,
    SortedReader, SortedSetBits, SortedSetDocValues, SortedSetReader,
};
use super::cache::LazyCache;
use super::format::{
    BinaryEncoding, BinaryEntry, DATA_CODEC, DATA_EXTENSION, DocValuesType, END_OF_FIELDS, META_CODEC,
    META_EXTENSION, NO_MISSING, NumericEncoding, NumericEntry, OrdIndexEntry, SortedEntry,
    SortedSetEntry, VERSION_CHECKSUM, VERSION_CURRENT, VERSION_START, read_binary_entry,
    read_numeric_entry, read_sorted_entry, read_sorted_set_entry,
};
use super::terms::CompressedTerms;

/// One parsed metadata entry, as listed by [`DocValuesReader::field_summaries`].
#[derive(Debug, Clone, Serialize)]
pub struct FieldSummary {
    pub name: String,
    pub number: i32,
    pub doc_values_type: DocValuesType,
    pub encoding: &'static str,
    /// Stored values: documents, or flattened ordinals for multi-valued sets.
    pub value_count: u64,
    /// Distinct terms for sorted fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term_count: Option<u64>,
    pub has_missing: bool,
}

/// Read-side view of one segment's doc values. `Send + Sync`; accessors
/// created from it are cheap and meant for a single thread.
pub struct DocValuesReader {
    data: IndexInput,
    version: i32,
    max_doc: u32,
    field_infos: Arc<FieldInfos>,
    numerics: FxHashMap<i32, NumericEntry>,
    binaries: FxHashMap<i32, BinaryEntry>,
    sorted: FxHashMap<i32, SortedEntry>,
    sorted_sets: FxHashMap<i32, SortedSetEntry>,
    addresses: LazyCache<MonotonicBlockPackedReader>,
    ord_indexes: LazyCache<MonotonicBlockPackedReader>,
    block_readers: LazyCache<BlockPackedReader>,
}

/// Reads past the end of metadata or data mean the file was cut short.
fn eof_as_corruption(err: Error) -> Error {
    match err {
        Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Error::corrupt(format!("file truncated? {}", e))
        }
        other => other,
    }
}

#[derive(Default)]
struct Entries {
    numerics: FxHashMap<i32, NumericEntry>,
    binaries: FxHashMap<i32, BinaryEntry>,
    sorted: FxHashMap<i32, SortedEntry>,
    sorted_sets: FxHashMap<i32, SortedSetEntry>,
}

impl Entries {
    fn contains(&self, number: i32) -> bool {
        self.numerics.contains_key(&number)
            || self.binaries.contains_key(&number)
            || self.sorted.contains_key(&number)
            || self.sorted_sets.contains_key(&number)
    }
}

fn read_entries(meta: &mut IndexInput, field_infos: &FieldInfos, max_doc: u32) -> Result<Entries> {
    let mut entries = Entries::default();
    let max_doc = max_doc as i64;
    let name = meta.name().to_string();
    let check_count = |what: &str, number: i32, count: i64, expected: i64| {
        if count != expected {
            return Err(Error::corrupt(format!(
                "field {} {} count {} does not match {} (resource={})",
                number, what, count, expected, name
            )));
        }
        Ok(())
    };

    loop {
        let number = meta.read_i32()?;
        if number == END_OF_FIELDS {
            break;
        }
        let info = field_infos.by_number(number).ok_or_else(|| {
            Error::corrupt(format!("invalid field number {} (resource={})", number, name))
        })?;
        if entries.contains(number) {
            return Err(Error::corrupt(format!(
                "duplicate entry for field {} (resource={})",
                info.name, name
            )));
        }
        let raw = meta.read_u8()?;
        let ty = DocValuesType::from_u8(raw).ok_or_else(|| {
            Error::corrupt(format!("invalid doc values type {} (resource={})", raw, name))
        })?;
        if info.doc_values_type != Some(ty) {
            return Err(Error::corrupt(format!(
                "field {} is stored as {} but declared as {:?} (resource={})",
                info.name, ty, info.doc_values_type, name
            )));
        }
        match ty {
            DocValuesType::Numeric => {
                let entry = read_numeric_entry(meta)?;
                check_count("value", number, entry.count, max_doc)?;
                entries.numerics.insert(number, entry);
            }
            DocValuesType::Binary => {
                let entry = read_binary_entry(meta)?;
                check_count("value", number, entry.count, max_doc)?;
                entries.binaries.insert(number, entry);
            }
            DocValuesType::Sorted => {
                let entry = read_sorted_entry(meta, number)?;
                check_count("ord", number, entry.ords.count, max_doc)?;
                entries.sorted.insert(number, entry);
            }
            DocValuesType::SortedSet => {
                let entry = read_sorted_set_entry(meta, number)?;
                match &entry {
                    SortedSetEntry::SingleValued(sorted) => {
                        check_count("ord", number, sorted.ords.count, max_doc)?
                    }
                    SortedSetEntry::WithAddresses { ord_index, .. } => {
                        check_count("ord index", number, ord_index.count, max_doc + 1)?
                    }
                }
                entries.sorted_sets.insert(number, entry);
            }
        }
    }
    Ok(entries)
}

impl DocValuesReader {
    /// Open and validate both files of a segment.
    pub fn open(state: &SegmentReadState) -> Result<Self> {
        let meta_name = state.file_name(META_EXTENSION);
        let mut meta = state.directory.open_read(&meta_name)?;
        let version = check_header(&mut meta, META_CODEC, VERSION_START, VERSION_CURRENT)
            .map_err(eof_as_corruption)?;
        if version >= VERSION_CHECKSUM {
            check_footer(&meta)?;
        }
        let entries = read_entries(&mut meta, &state.field_infos, state.max_doc).map_err(eof_as_corruption)?;
        let expected_end = if version >= VERSION_CHECKSUM {
            meta.len() - FOOTER_LENGTH
        } else {
            meta.len()
        };
        if meta.file_pointer() != expected_end {
            return Err(Error::corrupt(format!(
                "unexpected bytes after the end-of-fields marker: pos={} expected={} (resource={})",
                meta.file_pointer(),
                expected_end,
                meta.name()
            )));
        }

        let mut data = state.directory.open_read(&state.file_name(DATA_EXTENSION))?;
        let data_version = check_header(&mut data, DATA_CODEC, VERSION_START, VERSION_CURRENT)
            .map_err(eof_as_corruption)?;
        if data_version != version {
            return Err(Error::corrupt(format!(
                "format versions mismatch: meta={} data={} (resource={})",
                version,
                data_version,
                data.name()
            )));
        }
        if version >= VERSION_CHECKSUM {
            retrieve_checksum(&data)?;
        }

        log::debug!(
            "opened doc values for segment {}: version {}, {} numeric, {} binary, {} sorted, {} sorted set",
            state.segment_name,
            version,
            entries.numerics.len(),
            entries.binaries.len(),
            entries.sorted.len(),
            entries.sorted_sets.len()
        );

        Ok(Self {
            data,
            version,
            max_doc: state.max_doc,
            field_infos: Arc::clone(&state.field_infos),
            numerics: entries.numerics,
            binaries: entries.binaries,
            sorted: entries.sorted,
            sorted_sets: entries.sorted_sets,
            addresses: LazyCache::new(),
            ord_indexes: LazyCache::new(),
            block_readers: LazyCache::new(),
        })
    }

    /// Format version both files were written with.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn numeric(&self, field: &str) -> Result<NumericReader> {
        let info = self.field(field, &[DocValuesType::Numeric])?;
        let entry = self.numerics.get(&info.number).ok_or_else(|| not_written(info))?;
        self.load_numeric(entry)
    }

    pub fn binary(&self, field: &str) -> Result<BinaryReader> {
        let info = self.field(field, &[DocValuesType::Binary])?;
        let entry = self.binaries.get(&info.number).ok_or_else(|| not_written(info))?;
        self.load_binary(entry)
    }

    pub fn sorted(&self, field: &str) -> Result<SortedReader> {
        let info = self.field(field, &[DocValuesType::Sorted])?;
        let entry = self.sorted.get(&info.number).ok_or_else(|| not_written(info))?;
        self.load_sorted(entry)
    }

    /// Multi-valued view; single-valued sorted fields are wrapped so they
    /// read the same way.
    pub fn sorted_set(&self, field: &str) -> Result<Box<dyn SortedSetDocValues>> {
        let info = self.field(field, &[DocValuesType::SortedSet, DocValuesType::Sorted])?;
        if info.doc_values_type == Some(DocValuesType::Sorted) {
            return Ok(Box::new(SingletonSortedSet::new(self.sorted(field)?)));
        }
        let entry = self.sorted_sets.get(&info.number).ok_or_else(|| not_written(info))?;
        match entry {
            SortedSetEntry::SingleValued(sorted) => {
                Ok(Box::new(SingletonSortedSet::new(self.load_sorted(sorted)?)))
            }
            SortedSetEntry::WithAddresses {
                terms,
                ords,
                ord_index,
            } => Ok(Box::new(SortedSetReader::new(
                self.load_numeric(ords)?,
                self.load_ord_index(ord_index)?,
                self.load_terms(terms)?,
                self.data.clone(),
                self.max_doc as u64,
            ))),
        }
    }

    /// Which documents have a value for `field`.
    pub fn docs_with_field(&self, field: &str) -> Result<Box<dyn Bits>> {
        let info = self.field(
            field,
            &[
                DocValuesType::Numeric,
                DocValuesType::Binary,
                DocValuesType::Sorted,
                DocValuesType::SortedSet,
            ],
        )?;
        self.data.ensure_open()?;
        let number = info.number;
        let bits: Box<dyn Bits> = match info.doc_values_type {
            Some(DocValuesType::Numeric) => {
                let entry = self.numerics.get(&number).ok_or_else(|| not_written(info))?;
                self.missing_bits(entry.missing_offset)
            }
            Some(DocValuesType::Binary) => {
                let entry = self.binaries.get(&number).ok_or_else(|| not_written(info))?;
                self.missing_bits(entry.missing_offset)
            }
            Some(DocValuesType::Sorted) => {
                let entry = self.sorted.get(&number).ok_or_else(|| not_written(info))?;
                Box::new(SortedBits::new(self.load_numeric(&entry.ords)?))
            }
            _ => match self.sorted_sets.get(&number).ok_or_else(|| not_written(info))? {
                SortedSetEntry::SingleValued(sorted) => {
                    Box::new(SortedBits::new(self.load_numeric(&sorted.ords)?))
                }
                SortedSetEntry::WithAddresses { ord_index, .. } => Box::new(SortedSetBits::new(
                    self.load_ord_index(ord_index)?,
                    self.data.clone(),
                    self.max_doc,
                )),
            },
        };
        Ok(bits)
    }

    /// Verify the data file checksum. Version 0 files carry none.
    pub fn check_integrity(&self) -> Result<()> {
        self.data.ensure_open()?;
        if self.version < VERSION_CHECKSUM {
            return Ok(());
        }
        check_footer(&self.data).map(|_| ()).inspect_err(|e| {
            log::warn!("doc values integrity check failed for {}: {}", self.data.name(), e);
        })
    }

    /// Release cached structures and invalidate every accessor.
    pub fn close(&self) {
        self.data.close();
        self.addresses.close();
        self.ord_indexes.close();
        self.block_readers.close();
        log::debug!("closed doc values {}", self.data.name());
    }

    pub fn is_closed(&self) -> bool {
        self.data.is_closed()
    }

    /// Heap held by parsed entries and memoized structures.
    pub fn ram_bytes_used(&self) -> usize {
        let tables: usize = self
            .numerics
            .values()
            .chain(self.sorted.values().map(|e| &e.ords))
            .filter_map(|e| e.table.as_ref())
            .map(|t| t.len() * std::mem::size_of::<i64>())
            .sum();
        std::mem::size_of::<Self>()
            + tables
            + self.addresses.ram_bytes_used(|a| a.ram_bytes_used())
            + self.ord_indexes.ram_bytes_used(|a| a.ram_bytes_used())
            + self.block_readers.ram_bytes_used(|b| b.ram_bytes_used())
    }

    /// Number of memoized structures currently held.
    pub fn cached_structures(&self) -> usize {
        self.addresses.len() + self.ord_indexes.len() + self.block_readers.len()
    }

    /// Number of times a cached structure was decoded, including builds
    /// discarded after losing a race.
    pub fn cache_builds(&self) -> u64 {
        self.addresses.builds() + self.ord_indexes.builds() + self.block_readers.builds()
    }

    /// Every field with doc values in this segment, by field number.
    pub fn field_summaries(&self) -> Vec<FieldSummary> {
        let mut summaries = Vec::new();
        for info in self.field_infos.iter() {
            let number = info.number;
            let summary = if let Some(e) = self.numerics.get(&number) {
                summarize(info, DocValuesType::Numeric, e.encoding.as_str(), e.count, None, e.missing_offset)
            } else if let Some(e) = self.binaries.get(&number) {
                summarize(info, DocValuesType::Binary, e.encoding.as_str(), e.count, None, e.missing_offset)
            } else if let Some(e) = self.sorted.get(&number) {
                summarize(
                    info,
                    DocValuesType::Sorted,
                    e.ords.encoding.as_str(),
                    e.ords.count,
                    Some(e.terms.count),
                    NO_MISSING,
                )
            } else if let Some(e) = self.sorted_sets.get(&number) {
                let (terms, ords) = match e {
                    SortedSetEntry::SingleValued(s) => (&s.terms, &s.ords),
                    SortedSetEntry::WithAddresses { terms, ords, .. } => (terms, ords),
                };
                summarize(
                    info,
                    DocValuesType::SortedSet,
                    e.encoding().as_str(),
                    ords.count,
                    Some(terms.count),
                    NO_MISSING,
                )
            } else {
                continue;
            };
            summaries.push(summary);
        }
        summaries.sort_by_key(|s| s.number);
        summaries
    }

    fn field(&self, name: &str, allowed: &[DocValuesType]) -> Result<&FieldInfo> {
        self.data.ensure_open()?;
        let info = self
            .field_infos
            .by_name(name)
            .ok_or_else(|| Error::FieldNotFound(name.to_string()))?;
        match info.doc_values_type {
            Some(ty) if allowed.contains(&ty) => Ok(info),
            other => Err(Error::InvalidFieldType {
                expected: allowed
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" or "),
                got: other.map(|t| t.to_string()).unwrap_or_else(|| "NONE".to_string()),
            }),
        }
    }

    fn missing_bits(&self, missing_offset: i64) -> Box<dyn Bits> {
        if missing_offset == NO_MISSING {
            Box::new(MatchAllBits::new(self.max_doc))
        } else {
            Box::new(MissingBits::new(self.data.clone(), missing_offset as u64, self.max_doc))
        }
    }

    fn load_numeric(&self, entry: &NumericEntry) -> Result<NumericReader> {
        self.data.ensure_open()?;
        match entry.encoding {
            NumericEncoding::Delta => Ok(NumericReader::delta(self.load_block_reader(entry)?)),
            NumericEncoding::Gcd => Ok(NumericReader::gcd(
                entry.min_value,
                entry.gcd,
                self.load_block_reader(entry)?,
            )),
            NumericEncoding::Table => {
                let table = entry
                    .table
                    .clone()
                    .ok_or_else(|| Error::corrupt("TABLE entry without a table"))?;
                let count = entry.count as u64;
                let bits = bits_required(table.len() as u64 - 1);
                self.data
                    .bytes_at(entry.offset as u64, packed_bytes_len(count, bits))
                    .map_err(eof_as_corruption)?;
                Ok(NumericReader::table(table, self.data.clone(), entry.offset as u64, count))
            }
        }
    }

    fn load_binary(&self, entry: &BinaryEntry) -> Result<BinaryReader> {
        self.data.ensure_open()?;
        let count = entry.count as u64;
        match entry.encoding {
            BinaryEncoding::Fixed => {
                let length = entry.min_length as usize;
                self.data
                    .bytes_at(entry.offset as u64, length * count as usize)
                    .map_err(eof_as_corruption)?;
                Ok(BinaryReader::fixed(self.data.clone(), entry.offset as u64, length, count))
            }
            BinaryEncoding::Variable => Ok(BinaryReader::variable(
                self.data.clone(),
                entry.offset as u64,
                self.load_addresses(entry)?,
                count,
            )),
            BinaryEncoding::Prefix => Ok(BinaryReader::prefix(self.load_terms(entry)?)),
        }
    }

    fn load_sorted(&self, entry: &SortedEntry) -> Result<SortedReader> {
        Ok(SortedReader::new(
            self.load_numeric(&entry.ords)?,
            self.load_terms(&entry.terms)?,
        ))
    }

    fn load_terms(&self, entry: &BinaryEntry) -> Result<CompressedTerms> {
        Ok(CompressedTerms::new(self.data.clone(), entry, self.load_addresses(entry)?))
    }

    fn load_block_reader(&self, entry: &NumericEntry) -> Result<Arc<BlockPackedReader>> {
        self.block_readers
            .get_or_try_insert_with(entry.offset as u64, || {
                log::debug!(
                    "indexing {} block-packed values at {} in {}",
                    entry.count,
                    entry.offset,
                    self.data.name()
                );
                BlockPackedReader::open(
                    &self.data,
                    entry.offset as u64,
                    entry.count as u64,
                    entry.block_size as u32,
                    entry.packed_version,
                )
                .map_err(eof_as_corruption)
            })
    }

    fn load_addresses(&self, entry: &BinaryEntry) -> Result<Arc<MonotonicBlockPackedReader>> {
        self.addresses
            .get_or_try_insert_with(entry.addresses_offset as u64, || {
                log::debug!(
                    "loading {} addresses at {} in {}",
                    entry.num_addresses(),
                    entry.addresses_offset,
                    self.data.name()
                );
                self.load_monotonic(
                    entry.addresses_offset,
                    entry.num_addresses(),
                    entry.block_size,
                    entry.packed_version,
                )
            })
    }

    fn load_ord_index(&self, entry: &OrdIndexEntry) -> Result<Arc<MonotonicBlockPackedReader>> {
        self.ord_indexes.get_or_try_insert_with(entry.offset as u64, || {
            log::debug!(
                "loading ord index of {} docs at {} in {}",
                entry.count,
                entry.offset,
                self.data.name()
            );
            self.load_monotonic(entry.offset, entry.count as u64, entry.block_size, entry.packed_version)
        })
    }

    fn load_monotonic(
        &self,
        offset: i64,
        count: u64,
        block_size: i32,
        packed_version: i32,
    ) -> Result<MonotonicBlockPackedReader> {
        let offset = u64::try_from(offset)
            .map_err(|_| Error::corrupt(format!("negative offset {} in {}", offset, self.data.name())))?;
        let mut input = self.data.clone();
        input.seek(offset).map_err(eof_as_corruption)?;
        MonotonicBlockPackedReader::load(&mut input, count, block_size as u32, packed_version)
            .map_err(eof_as_corruption)
    }
}

fn not_written(info: &FieldInfo) -> Error {
    Error::FieldNotFound(format!("{} (no doc values written)", info.name))
}

fn summarize(
    info: &FieldInfo,
    ty: DocValuesType,
    encoding: &'static str,
    value_count: i64,
    term_count: Option<i64>,
    missing_offset: i64,
) -> FieldSummary {
    FieldSummary {
        name: info.name.clone(),
        number: info.number,
        doc_values_type: ty,
        encoding,
        value_count: value_count as u64,
        term_count: term_count.map(|c| c as u64),
        has_missing: missing_offset != NO_MISSING,
    }
}
