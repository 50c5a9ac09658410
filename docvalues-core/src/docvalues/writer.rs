//! Doc-values writer
//!
//! Each `add_*_field` call consumes one field's values in document order and
//! appends its blobs to the data stream and its entry to the metadata stream.
//! Nothing is rewritten once a field is done. An error leaves the writer in
//! an unspecified state; drop it and start over.

use std::io::Write;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::codec_util::{write_footer, write_header};
use crate::config::DocValuesConfig;
use crate::directories::IndexOutput;
use crate::error::{Error, Result};
use crate::packed::bitpacking::pack_into;
use crate::packed::{
    AppendingLongBuffer, BlockPackedWriter, MonotonicBlockPackedWriter, PACKED_VERSION_CURRENT,
    PagedGrowableWriter, PagedMutable, bits_required, gcd,
};
use crate::segment::{FieldInfo, FieldInfos, SegmentWriteState};

use super::format::{
    BinaryEncoding, BinaryEntry, DATA_CODEC, DATA_EXTENSION, DocValuesType, END_OF_FIELDS, META_CODEC,
    META_EXTENSION, NO_MISSING, NumericEncoding, NumericEntry, OrdIndexEntry, SortedSetEncoding,
    VERSION_CHECKSUM, write_binary_entry, write_entry_header, write_numeric_entry, write_ord_index_entry,
};
use super::terms::TermsWriter;

/// Page size of the in-memory per-document id arrays.
const ID_PAGE_SIZE: u32 = 1024;

/// What was written for one field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldWriteStats {
    pub field: String,
    pub doc_values_type: DocValuesType,
    /// Encoding name; for sorted fields, the encoding of the ordinal stream.
    pub encoding: &'static str,
    /// Documents for single-valued fields, flattened ordinals for sorted sets.
    pub value_count: u64,
    pub data_bytes: u64,
    pub meta_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DocValuesWriterStats {
    pub fields: Vec<FieldWriteStats>,
    pub data_bytes: u64,
    pub meta_bytes: u64,
}

/// Missing-values bitset built one document at a time.
#[derive(Default)]
struct DocsWithValue {
    bits: Vec<u8>,
    count: u64,
    missing: u64,
}

impl DocsWithValue {
    fn push(&mut self, present: bool) {
        if self.count % 8 == 0 {
            self.bits.push(0);
        }
        if present {
            if let Some(last) = self.bits.last_mut() {
                *last |= 1 << (self.count & 7);
            }
        } else {
            self.missing += 1;
        }
        self.count += 1;
    }

    fn has_missing(&self) -> bool {
        self.missing > 0
    }
}

/// Assigns ids to distinct terms in first-seen order.
#[derive(Default)]
struct TermIds {
    ids: FxHashMap<Vec<u8>, u32>,
}

impl TermIds {
    fn id(&mut self, term: &[u8]) -> u32 {
        if let Some(&id) = self.ids.get(term) {
            return id;
        }
        let id = self.ids.len() as u32;
        self.ids.insert(term.to_vec(), id);
        id
    }

    /// Sorted terms and the id → ordinal mapping.
    fn sort(self) -> Result<(Vec<Vec<u8>>, PagedMutable)> {
        let mut entries: Vec<(Vec<u8>, u32)> = self.ids.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let num_terms = entries.len() as u64;
        let mut ord_of = PagedMutable::new(
            num_terms,
            ID_PAGE_SIZE,
            bits_required(num_terms.saturating_sub(1)),
        )?;
        let mut terms = Vec::with_capacity(entries.len());
        for (ord, (term, id)) in entries.into_iter().enumerate() {
            ord_of.set(id as u64, ord as u64);
            terms.push(term);
        }
        Ok((terms, ord_of))
    }
}

pub struct DocValuesWriter {
    data: IndexOutput,
    meta: IndexOutput,
    config: DocValuesConfig,
    max_doc: u32,
    field_infos: Arc<FieldInfos>,
    written: FxHashSet<i32>,
    stats: Vec<FieldWriteStats>,
}

impl DocValuesWriter {
    /// Create both segment files and write their headers.
    pub fn new(state: &SegmentWriteState, config: &DocValuesConfig) -> Result<Self> {
        config.validate()?;
        let mut data = state.directory.create_output(&state.file_name(DATA_EXTENSION))?;
        write_header(&mut data, DATA_CODEC, config.format_version)?;
        let mut meta = state.directory.create_output(&state.file_name(META_EXTENSION))?;
        write_header(&mut meta, META_CODEC, config.format_version)?;
        Ok(Self {
            data,
            meta,
            config: config.clone(),
            max_doc: state.max_doc,
            field_infos: Arc::clone(&state.field_infos),
            written: FxHashSet::default(),
            stats: Vec::new(),
        })
    }

    pub fn config(&self) -> &DocValuesConfig {
        &self.config
    }

    /// Write a numeric field; `None` marks a document without a value.
    pub fn add_numeric_field<I>(&mut self, field: &FieldInfo, values: I) -> Result<()>
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        self.check_field(field, DocValuesType::Numeric)?;
        let (data_start, meta_start) = self.positions();
        let (encoding, count) = self.add_numeric(field.number, values)?;
        self.check_count(field, count)?;
        self.record(field, DocValuesType::Numeric, encoding.as_str(), count, data_start, meta_start);
        Ok(())
    }

    /// Write a binary field; `None` marks a document without a value.
    pub fn add_binary_field<I, B>(&mut self, field: &FieldInfo, values: I) -> Result<()>
    where
        I: IntoIterator<Item = Option<B>>,
        B: AsRef<[u8]>,
    {
        self.check_field(field, DocValuesType::Binary)?;
        let (data_start, meta_start) = self.positions();
        let (encoding, count) = self.add_binary(field.number, values)?;
        self.check_count(field, count)?;
        self.record(field, DocValuesType::Binary, encoding.as_str(), count, data_start, meta_start);
        Ok(())
    }

    /// Write a single-valued sorted field as a dictionary plus ordinals.
    pub fn add_sorted_field<I, B>(&mut self, field: &FieldInfo, values: I) -> Result<()>
    where
        I: IntoIterator<Item = Option<B>>,
        B: AsRef<[u8]>,
    {
        self.check_field(field, DocValuesType::Sorted)?;
        let (data_start, meta_start) = self.positions();

        let mut term_ids = TermIds::default();
        let mut doc_ids = PagedGrowableWriter::new(self.max_doc as u64, ID_PAGE_SIZE, 1)?;
        let mut count = 0u64;
        for value in values {
            if count >= self.max_doc as u64 {
                return Err(self.too_many_docs(field));
            }
            if let Some(term) = value {
                doc_ids.set(count, term_ids.id(term.as_ref()) as u64 + 1);
            }
            count += 1;
        }
        self.check_count(field, count)?;

        let (terms, ord_of) = term_ids.sort()?;
        let encoding = self.add_sorted(field.number, &terms, |doc| match doc_ids.get(doc) {
            0 => -1,
            id => ord_of.get(id - 1) as i64,
        })?;
        self.record(field, DocValuesType::Sorted, encoding.as_str(), count, data_start, meta_start);
        Ok(())
    }

    /// Write a multi-valued sorted field. Each document yields its values in
    /// any order; duplicates within a document are dropped.
    pub fn add_sorted_set_field<I, D, B>(&mut self, field: &FieldInfo, docs: I) -> Result<()>
    where
        I: IntoIterator<Item = D>,
        D: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        self.check_field(field, DocValuesType::SortedSet)?;
        let (data_start, meta_start) = self.positions();

        let mut term_ids = TermIds::default();
        let mut flat_ids = AppendingLongBuffer::packed();
        let mut doc_starts = AppendingLongBuffer::monotonic();
        doc_starts.add(0)?;
        let mut single_valued = true;
        let mut scratch: Vec<u32> = Vec::new();
        let mut count = 0u64;
        for doc in docs {
            if count >= self.max_doc as u64 {
                return Err(self.too_many_docs(field));
            }
            scratch.clear();
            scratch.extend(doc.into_iter().map(|term| term_ids.id(term.as_ref())));
            scratch.sort_unstable();
            scratch.dedup();
            single_valued &= scratch.len() <= 1;
            for &id in &scratch {
                flat_ids.add(id as i64)?;
            }
            doc_starts.add(flat_ids.size() as i64)?;
            count += 1;
        }
        self.check_count(field, count)?;
        flat_ids.freeze();
        doc_starts.freeze();

        let (terms, ord_of) = term_ids.sort()?;
        let number = field.number;
        write_entry_header(&mut self.meta, number, DocValuesType::SortedSet)?;

        let (encoding, value_count) = if single_valued {
            self.meta.write_u8(SortedSetEncoding::SingleValued as u8)?;
            self.add_sorted(number, &terms, |doc| {
                let start = doc_starts.get(doc) as u64;
                if doc_starts.get(doc + 1) as u64 == start {
                    -1
                } else {
                    ord_of.get(flat_ids.get(start) as u64) as i64
                }
            })?;
            (SortedSetEncoding::SingleValued, count)
        } else {
            self.meta.write_u8(SortedSetEncoding::WithAddresses as u8)?;
            self.add_terms(number, &terms)?;

            let mut ords = Vec::new();
            let mut flat_ords = AppendingLongBuffer::delta();
            for doc in 0..count {
                let start = doc_starts.get(doc) as u64;
                let end = doc_starts.get(doc + 1) as u64;
                ords.clear();
                ords.extend((start..end).map(|i| ord_of.get(flat_ids.get(i) as u64) as i64));
                ords.sort_unstable();
                for &ord in &ords {
                    flat_ords.add(ord)?;
                }
            }
            flat_ords.freeze();
            let (_, value_count) = self.add_numeric(number, flat_ords.iter().map(Some))?;

            let offset = self.data.file_pointer();
            let mut index = MonotonicBlockPackedWriter::new(&mut self.data, self.config.block_size)?;
            for start in doc_starts.iter() {
                index.add(start)?;
            }
            let index_count = index.finish()?;
            write_ord_index_entry(
                &mut self.meta,
                &OrdIndexEntry {
                    offset: offset as i64,
                    packed_version: PACKED_VERSION_CURRENT,
                    block_size: self.config.block_size as i32,
                    count: index_count as i64,
                },
            )?;
            (SortedSetEncoding::WithAddresses, value_count)
        };
        log::debug!(
            "field {} SORTED_SET: {} docs, {} distinct terms, {}",
            field.name,
            count,
            terms.len(),
            encoding.as_str()
        );
        self.record(
            field,
            DocValuesType::SortedSet,
            encoding.as_str(),
            value_count,
            data_start,
            meta_start,
        );
        Ok(())
    }

    /// Write the end marker and footers and publish both files.
    pub fn finish(mut self) -> Result<DocValuesWriterStats> {
        self.meta.write_i32::<LittleEndian>(END_OF_FIELDS)?;
        if self.config.format_version >= VERSION_CHECKSUM {
            write_footer(&mut self.meta)?;
            write_footer(&mut self.data)?;
        }
        let stats = DocValuesWriterStats {
            fields: std::mem::take(&mut self.stats),
            data_bytes: self.data.file_pointer(),
            meta_bytes: self.meta.file_pointer(),
        };
        self.data.finish()?;
        self.meta.finish()?;
        log::debug!(
            "wrote doc values for {} fields: {} data bytes, {} meta bytes",
            stats.fields.len(),
            stats.data_bytes,
            stats.meta_bytes
        );
        Ok(stats)
    }

    fn check_field(&mut self, field: &FieldInfo, ty: DocValuesType) -> Result<()> {
        if field.number < 0 {
            return Err(Error::invalid(format!(
                "field {} has negative number {}",
                field.name, field.number
            )));
        }
        match self.field_infos.by_number(field.number) {
            Some(known) if known.name == field.name => {}
            _ => {
                return Err(Error::invalid(format!(
                    "field {} (number {}) is not part of this segment",
                    field.name, field.number
                )));
            }
        }
        if field.doc_values_type != Some(ty) {
            return Err(Error::InvalidFieldType {
                expected: ty.to_string(),
                got: field
                    .doc_values_type
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "NONE".to_string()),
            });
        }
        if !self.written.insert(field.number) {
            return Err(Error::invalid(format!("field {} written twice", field.name)));
        }
        Ok(())
    }

    fn check_count(&self, field: &FieldInfo, count: u64) -> Result<()> {
        if count != self.max_doc as u64 {
            return Err(Error::invalid(format!(
                "field {} has {} values but the segment has {} documents",
                field.name, count, self.max_doc
            )));
        }
        Ok(())
    }

    fn too_many_docs(&self, field: &FieldInfo) -> Error {
        Error::invalid(format!(
            "field {} has more values than the segment's {} documents",
            field.name, self.max_doc
        ))
    }

    fn positions(&self) -> (u64, u64) {
        (self.data.file_pointer(), self.meta.file_pointer())
    }

    fn record(
        &mut self,
        field: &FieldInfo,
        ty: DocValuesType,
        encoding: &'static str,
        value_count: u64,
        data_start: u64,
        meta_start: u64,
    ) {
        self.stats.push(FieldWriteStats {
            field: field.name.clone(),
            doc_values_type: ty,
            encoding,
            value_count,
            data_bytes: self.data.file_pointer() - data_start,
            meta_bytes: self.meta.file_pointer() - meta_start,
        });
    }

    /// `fieldId NUMERIC entry`, used both for numeric fields and ordinal streams.
    fn add_numeric<I>(&mut self, number: i32, values: I) -> Result<(NumericEncoding, u64)>
    where
        I: IntoIterator<Item = Option<i64>>,
    {
        let max_table_size = self.config.max_table_size;
        let mut buffer = AppendingLongBuffer::delta();
        let mut docs = DocsWithValue::default();
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut first: Option<i64> = None;
        let mut common_divisor = 0u64;
        let mut uniques = Some(FxHashSet::default());

        for value in values {
            docs.push(value.is_some());
            let v = value.unwrap_or(0);
            buffer.add(v)?;
            min = min.min(v);
            max = max.max(v);
            if common_divisor != 1 {
                match first {
                    None => first = Some(v),
                    Some(f) => {
                        let diff = (v as i128 - f as i128).unsigned_abs() as u64;
                        common_divisor = gcd(common_divisor, diff);
                    }
                }
            }
            if let Some(set) = uniques.as_mut() {
                set.insert(v);
                if set.len() > max_table_size {
                    uniques = None;
                }
            }
        }
        buffer.freeze();
        let count = buffer.size();

        let delta_bits = if count == 0 {
            0
        } else {
            bits_required(max.wrapping_sub(min) as u64)
        };
        let table = uniques
            .filter(|set| self.config.optimize_storage && !set.is_empty())
            .filter(|set| bits_required(set.len() as u64 - 1) < delta_bits);
        let encoding = if table.is_some() {
            NumericEncoding::Table
        } else if common_divisor > 1 {
            NumericEncoding::Gcd
        } else {
            NumericEncoding::Delta
        };

        let missing_offset = if docs.has_missing() {
            let offset = self.data.file_pointer();
            self.data.write_all(&docs.bits)?;
            offset as i64
        } else {
            NO_MISSING
        };

        let offset = self.data.file_pointer();
        let mut entry = NumericEntry {
            encoding,
            missing_offset,
            packed_version: PACKED_VERSION_CURRENT,
            offset: offset as i64,
            count: count as i64,
            block_size: self.config.block_size as i32,
            min_value: 0,
            gcd: 1,
            table: None,
        };
        match encoding {
            NumericEncoding::Table => {
                let mut sorted: Vec<i64> = table.into_iter().flatten().collect();
                sorted.sort_unstable();
                let index_of: FxHashMap<i64, u64> =
                    sorted.iter().enumerate().map(|(i, &v)| (v, i as u64)).collect();
                let indices: Vec<u64> = buffer.iter().map(|v| index_of[&v]).collect();
                let mut packed = Vec::new();
                pack_into(&indices, bits_required(sorted.len() as u64 - 1), &mut packed);
                self.data.write_all(&packed)?;
                entry.table = Some(Arc::from(sorted));
            }
            NumericEncoding::Gcd => {
                let mut writer = BlockPackedWriter::new(
                    &mut self.data,
                    self.config.block_size,
                    self.config.optimize_storage,
                )?
                .with_max_table_size(max_table_size);
                for v in buffer.iter() {
                    let quotient = (v as i128 - min as i128) as u128 / common_divisor as u128;
                    writer.add(quotient as i64)?;
                }
                writer.finish()?;
                entry.min_value = min;
                entry.gcd = common_divisor;
            }
            NumericEncoding::Delta => {
                let mut writer = BlockPackedWriter::new(
                    &mut self.data,
                    self.config.block_size,
                    self.config.optimize_storage,
                )?
                .with_max_table_size(max_table_size);
                for v in buffer.iter() {
                    writer.add(v)?;
                }
                writer.finish()?;
            }
        }

        write_entry_header(&mut self.meta, number, DocValuesType::Numeric)?;
        write_numeric_entry(&mut self.meta, &entry)?;
        log::debug!(
            "field {} NUMERIC: {} values, {} missing, {}",
            number,
            count,
            docs.missing,
            encoding.as_str()
        );
        Ok((encoding, count))
    }

    /// `fieldId BINARY entry` for a plain binary field.
    fn add_binary<I, B>(&mut self, number: i32, values: I) -> Result<(BinaryEncoding, u64)>
    where
        I: IntoIterator<Item = Option<B>>,
        B: AsRef<[u8]>,
    {
        let offset = self.data.file_pointer();
        let mut docs = DocsWithValue::default();
        let mut addresses = AppendingLongBuffer::monotonic();
        addresses.add(0)?;
        let mut min_length = usize::MAX;
        let mut max_length = 0usize;
        let mut total = 0u64;

        for value in values {
            docs.push(value.is_some());
            let len = match &value {
                Some(bytes) => {
                    let bytes = bytes.as_ref();
                    self.data.write_all(bytes)?;
                    bytes.len()
                }
                None => 0,
            };
            if len > i32::MAX as usize {
                return Err(Error::invalid(format!(
                    "binary value of {} bytes exceeds the maximum length",
                    len
                )));
            }
            min_length = min_length.min(len);
            max_length = max_length.max(len);
            total += len as u64;
            addresses.add(total as i64)?;
        }
        addresses.freeze();
        let count = docs.count;
        if count == 0 {
            min_length = 0;
        }

        let missing_offset = if docs.has_missing() {
            let missing = self.data.file_pointer();
            self.data.write_all(&docs.bits)?;
            missing as i64
        } else {
            NO_MISSING
        };

        let mut entry = BinaryEntry {
            encoding: BinaryEncoding::Fixed,
            missing_offset,
            min_length: min_length as i32,
            max_length: max_length as i32,
            count: count as i64,
            offset: offset as i64,
            addresses_offset: -1,
            packed_version: PACKED_VERSION_CURRENT,
            address_interval: 0,
            block_size: self.config.block_size as i32,
        };
        if min_length != max_length {
            entry.encoding = BinaryEncoding::Variable;
            entry.addresses_offset = self.data.file_pointer() as i64;
            let mut writer = MonotonicBlockPackedWriter::new(&mut self.data, self.config.block_size)?;
            for address in addresses.iter() {
                writer.add(address)?;
            }
            writer.finish()?;
        }

        write_entry_header(&mut self.meta, number, DocValuesType::Binary)?;
        write_binary_entry(&mut self.meta, &entry)?;
        log::debug!(
            "field {} BINARY: {} values, lengths {}..={}, {}",
            number,
            count,
            entry.min_length,
            entry.max_length,
            entry.encoding.as_str()
        );
        Ok((entry.encoding, count))
    }

    /// `fieldId BINARY entry` for a prefix-compressed dictionary of sorted
    /// distinct terms.
    fn add_terms(&mut self, number: i32, terms: &[Vec<u8>]) -> Result<()> {
        let offset = self.data.file_pointer();
        let mut writer = TermsWriter::new(self.config.address_interval);
        for term in terms {
            writer.add(&mut self.data, term)?;
        }
        let addresses_offset = self.data.file_pointer();
        let mut addresses = MonotonicBlockPackedWriter::new(&mut self.data, self.config.block_size)?;
        for &start in writer.batch_starts() {
            addresses.add(start)?;
        }
        addresses.finish()?;

        let (min_length, max_length) = writer.length_range();
        let entry = BinaryEntry {
            encoding: BinaryEncoding::Prefix,
            missing_offset: NO_MISSING,
            min_length: min_length as i32,
            max_length: max_length as i32,
            count: writer.count() as i64,
            offset: offset as i64,
            addresses_offset: addresses_offset as i64,
            packed_version: PACKED_VERSION_CURRENT,
            address_interval: self.config.address_interval as i32,
            block_size: self.config.block_size as i32,
        };
        write_entry_header(&mut self.meta, number, DocValuesType::Binary)?;
        write_binary_entry(&mut self.meta, &entry)?;
        Ok(())
    }

    /// `fieldId SORTED` then the dictionary and the per-document ordinals.
    fn add_sorted(
        &mut self,
        number: i32,
        terms: &[Vec<u8>],
        ord_of_doc: impl Fn(u64) -> i64,
    ) -> Result<NumericEncoding> {
        write_entry_header(&mut self.meta, number, DocValuesType::Sorted)?;
        self.add_terms(number, terms)?;
        let max_doc = self.max_doc as u64;
        let (encoding, _) = self.add_numeric(number, (0..max_doc).map(|doc| Some(ord_of_doc(doc))))?;
        log::debug!(
            "field {} SORTED: {} docs, {} distinct terms, ords {}",
            number,
            max_doc,
            terms.len(),
            encoding.as_str()
        );
        Ok(encoding)
    }
}
