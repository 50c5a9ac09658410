//! Per-field value accessors handed out by [`DocValuesReader`](super::DocValuesReader)
//!
//! Accessors own a clone of the data input and shared references to cached
//! structures, so they are cheap to create. Each accessor is meant for one
//! thread at a time; create one per thread for concurrent reads.

use std::sync::Arc;

use crate::directories::IndexInput;
use crate::error::{Error, Result};
use crate::packed::bitpacking::{packed_bytes_len, read_packed};
use crate::packed::{BlockPackedReader, MonotonicBlockPackedReader};

use super::terms::{CompressedTerms, TermsEnum};

/// Ordinal reported for documents without a value.
pub const NO_ORD: i64 = -1;

pub trait NumericDocValues: Send {
    /// Value for `doc`; documents without a value read as 0.
    fn get(&self, doc: u32) -> Result<i64>;
}

pub trait BinaryDocValues: Send {
    /// Bytes for `doc`; documents without a value read as empty.
    fn get(&mut self, doc: u32) -> Result<&[u8]>;
}

pub trait SortedDocValues: Send {
    /// Ordinal for `doc`, or [`NO_ORD`] if it has no value.
    fn get_ord(&self, doc: u32) -> Result<i64>;

    fn lookup_ord(&mut self, ord: i64) -> Result<&[u8]>;

    /// Number of distinct values.
    fn value_count(&self) -> u64;

    /// Ordinal of `key`, or `-(insertion point) - 1` if absent.
    fn lookup_term(&mut self, key: &[u8]) -> Result<i64>;

    fn terms_enum(&self) -> TermsEnum;

    /// Value for `doc`, `None` when missing.
    fn get(&mut self, doc: u32) -> Result<Option<&[u8]>> {
        let ord = self.get_ord(doc)?;
        if ord == NO_ORD {
            return Ok(None);
        }
        self.lookup_ord(ord).map(Some)
    }
}

pub trait SortedSetDocValues: Send {
    /// Position on `doc`; ordinals are then read with [`next_ord`](Self::next_ord).
    fn set_document(&mut self, doc: u32) -> Result<()>;

    /// Next ordinal of the current document in increasing order, or
    /// [`NO_ORD`] once exhausted.
    fn next_ord(&mut self) -> Result<i64>;

    /// Number of ordinals of the current document.
    fn cardinality(&self) -> usize;

    /// `i`-th ordinal of the current document.
    fn ord_at(&self, i: usize) -> Result<i64>;

    fn lookup_ord(&mut self, ord: i64) -> Result<&[u8]>;

    fn value_count(&self) -> u64;

    fn lookup_term(&mut self, key: &[u8]) -> Result<i64>;

    fn terms_enum(&self) -> TermsEnum;
}

/// Random-access bit set over documents.
pub trait Bits: Send {
    fn get(&self, index: u32) -> Result<bool>;

    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_doc(doc: u64, count: u64) -> Result<()> {
    if doc >= count {
        return Err(Error::invalid(format!(
            "doc {} out of bounds (max_doc={})",
            doc, count
        )));
    }
    Ok(())
}

// ── Numeric ───────────────────────────────────────────────────────────────

#[derive(Clone)]
enum NumericKind {
    Delta(Arc<BlockPackedReader>),
    Gcd {
        min: i64,
        gcd: u64,
        quotients: Arc<BlockPackedReader>,
    },
    Table {
        table: Arc<[i64]>,
        input: IndexInput,
        offset: usize,
        bits_per_value: u8,
    },
}

/// Numeric values of one field (or ordinals of a sorted field).
#[derive(Clone)]
pub struct NumericReader {
    kind: NumericKind,
    count: u64,
}

impl NumericReader {
    pub(crate) fn delta(values: Arc<BlockPackedReader>) -> Self {
        let count = values.count();
        Self {
            kind: NumericKind::Delta(values),
            count,
        }
    }

    pub(crate) fn gcd(min: i64, gcd: u64, quotients: Arc<BlockPackedReader>) -> Self {
        let count = quotients.count();
        Self {
            kind: NumericKind::Gcd { min, gcd, quotients },
            count,
        }
    }

    /// `input` bounds must already cover `count` indices at `offset`.
    pub(crate) fn table(table: Arc<[i64]>, input: IndexInput, offset: u64, count: u64) -> Self {
        let bits_per_value = crate::packed::bits_required(table.len().saturating_sub(1) as u64);
        Self {
            kind: NumericKind::Table {
                table,
                input,
                offset: offset as usize,
                bits_per_value,
            },
            count,
        }
    }

    /// Number of stored values.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Value at `index` of the underlying stream.
    pub fn get_value(&self, index: u64) -> Result<i64> {
        check_doc(index, self.count)?;
        match &self.kind {
            NumericKind::Delta(values) => values.get(index),
            NumericKind::Gcd { min, gcd, quotients } => {
                let q = quotients.get(index)? as u64;
                Ok(min.wrapping_add(q.wrapping_mul(*gcd) as i64))
            }
            NumericKind::Table {
                table,
                input,
                offset,
                bits_per_value,
            } => {
                let len = packed_bytes_len(self.count, *bits_per_value);
                let data = input.bytes_at(*offset as u64, len)?;
                let raw = read_packed(data, *bits_per_value, index);
                table.get(raw as usize).copied().ok_or_else(|| {
                    Error::corrupt(format!(
                        "table index {} out of range ({} entries) in {}",
                        raw,
                        table.len(),
                        input.name()
                    ))
                })
            }
        }
    }
}

impl NumericDocValues for NumericReader {
    fn get(&self, doc: u32) -> Result<i64> {
        self.get_value(doc as u64)
    }
}

// ── Binary ────────────────────────────────────────────────────────────────

enum BinaryKind {
    Fixed {
        input: IndexInput,
        offset: u64,
        length: usize,
    },
    Variable {
        input: IndexInput,
        offset: u64,
        addresses: Arc<MonotonicBlockPackedReader>,
    },
    Prefix(CompressedTerms),
}

/// Binary values of one field, or the dictionary of a sorted field
/// addressed by ordinal.
pub struct BinaryReader {
    kind: BinaryKind,
    count: u64,
}

impl BinaryReader {
    pub(crate) fn fixed(input: IndexInput, offset: u64, length: usize, count: u64) -> Self {
        Self {
            kind: BinaryKind::Fixed {
                input,
                offset,
                length,
            },
            count,
        }
    }

    pub(crate) fn variable(
        input: IndexInput,
        offset: u64,
        addresses: Arc<MonotonicBlockPackedReader>,
        count: u64,
    ) -> Self {
        Self {
            kind: BinaryKind::Variable {
                input,
                offset,
                addresses,
            },
            count,
        }
    }

    pub(crate) fn prefix(terms: CompressedTerms) -> Self {
        let count = terms.count();
        Self {
            kind: BinaryKind::Prefix(terms),
            count,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Value at `index`: a document for plain binary fields, an ordinal for
    /// dictionaries.
    pub fn get_value(&mut self, index: u64) -> Result<&[u8]> {
        check_doc(index, self.count)?;
        match &mut self.kind {
            BinaryKind::Fixed {
                input,
                offset,
                length,
            } => input.bytes_at(*offset + index * *length as u64, *length),
            BinaryKind::Variable {
                input,
                offset,
                addresses,
            } => {
                let start = addresses.get(index);
                let end = addresses.get(index + 1);
                if start < 0 || end < start {
                    return Err(Error::corrupt(format!(
                        "invalid value address range [{}, {}) in {}",
                        start,
                        end,
                        input.name()
                    )));
                }
                input.bytes_at(*offset + start as u64, (end - start) as usize)
            }
            BinaryKind::Prefix(terms) => terms.term(index),
        }
    }

    /// Ordinal lookup; only dictionaries are searchable.
    pub fn lookup_term(&mut self, key: &[u8]) -> Result<i64> {
        match &mut self.kind {
            BinaryKind::Prefix(terms) => terms.lookup_term(key),
            _ => Err(Error::invalid(
                "lookup_term requires a prefix-compressed dictionary",
            )),
        }
    }

    pub fn terms_enum(&self) -> Result<TermsEnum> {
        match &self.kind {
            BinaryKind::Prefix(terms) => Ok(terms.terms_enum()),
            _ => Err(Error::invalid(
                "terms_enum requires a prefix-compressed dictionary",
            )),
        }
    }
}

impl BinaryDocValues for BinaryReader {
    fn get(&mut self, doc: u32) -> Result<&[u8]> {
        self.get_value(doc as u64)
    }
}

// ── Sorted ────────────────────────────────────────────────────────────────

/// Per-document ordinal into a sorted dictionary.
pub struct SortedReader {
    ords: NumericReader,
    terms: CompressedTerms,
}

impl SortedReader {
    pub(crate) fn new(ords: NumericReader, terms: CompressedTerms) -> Self {
        Self { ords, terms }
    }
}

fn check_ord(ord: i64, value_count: u64) -> Result<u64> {
    if ord < 0 || ord as u64 >= value_count {
        return Err(Error::invalid(format!(
            "ord {} out of range (value count {})",
            ord, value_count
        )));
    }
    Ok(ord as u64)
}

impl SortedDocValues for SortedReader {
    fn get_ord(&self, doc: u32) -> Result<i64> {
        self.ords.get_value(doc as u64)
    }

    fn lookup_ord(&mut self, ord: i64) -> Result<&[u8]> {
        let ord = check_ord(ord, self.terms.count())?;
        self.terms.term(ord)
    }

    fn value_count(&self) -> u64 {
        self.terms.count()
    }

    fn lookup_term(&mut self, key: &[u8]) -> Result<i64> {
        self.terms.lookup_term(key)
    }

    fn terms_enum(&self) -> TermsEnum {
        self.terms.terms_enum()
    }
}

// ── Sorted set ────────────────────────────────────────────────────────────

/// Multi-valued ordinals: a flattened ordinal stream plus a per-document
/// prefix-sum index into it.
pub struct SortedSetReader {
    ords: NumericReader,
    ord_index: Arc<MonotonicBlockPackedReader>,
    terms: CompressedTerms,
    /// Carries the close flag for the in-memory ord index.
    input: IndexInput,
    max_doc: u64,
    start: u64,
    end: u64,
    next: u64,
}

impl SortedSetReader {
    pub(crate) fn new(
        ords: NumericReader,
        ord_index: Arc<MonotonicBlockPackedReader>,
        terms: CompressedTerms,
        input: IndexInput,
        max_doc: u64,
    ) -> Self {
        Self {
            ords,
            ord_index,
            terms,
            input,
            max_doc,
            start: 0,
            end: 0,
            next: 0,
        }
    }
}

impl SortedSetDocValues for SortedSetReader {
    fn set_document(&mut self, doc: u32) -> Result<()> {
        self.input.ensure_open()?;
        check_doc(doc as u64, self.max_doc)?;
        let start = self.ord_index.get(doc as u64);
        let end = self.ord_index.get(doc as u64 + 1);
        if start < 0 || end < start || end as u64 > self.ords.count() {
            return Err(Error::corrupt(format!(
                "invalid ord index range [{}, {}) for doc {}",
                start, end, doc
            )));
        }
        self.start = start as u64;
        self.end = end as u64;
        self.next = self.start;
        Ok(())
    }

    fn next_ord(&mut self) -> Result<i64> {
        if self.next == self.end {
            return Ok(NO_ORD);
        }
        let ord = self.ords.get_value(self.next)?;
        self.next += 1;
        Ok(ord)
    }

    fn cardinality(&self) -> usize {
        (self.end - self.start) as usize
    }

    fn ord_at(&self, i: usize) -> Result<i64> {
        self.input.ensure_open()?;
        if i >= self.cardinality() {
            return Err(Error::invalid(format!(
                "ord index {} out of range (cardinality {})",
                i,
                self.cardinality()
            )));
        }
        self.ords.get_value(self.start + i as u64)
    }

    fn lookup_ord(&mut self, ord: i64) -> Result<&[u8]> {
        let ord = check_ord(ord, self.terms.count())?;
        self.terms.term(ord)
    }

    fn value_count(&self) -> u64 {
        self.terms.count()
    }

    fn lookup_term(&mut self, key: &[u8]) -> Result<i64> {
        self.terms.lookup_term(key)
    }

    fn terms_enum(&self) -> TermsEnum {
        self.terms.terms_enum()
    }
}

/// Exposes a single-valued sorted field through the sorted-set API.
pub struct SingletonSortedSet<S> {
    sorted: S,
    current: i64,
    consumed: bool,
}

impl<S: SortedDocValues> SingletonSortedSet<S> {
    pub fn new(sorted: S) -> Self {
        Self {
            sorted,
            current: NO_ORD,
            consumed: true,
        }
    }

    pub fn into_inner(self) -> S {
        self.sorted
    }
}

impl<S: SortedDocValues> SortedSetDocValues for SingletonSortedSet<S> {
    fn set_document(&mut self, doc: u32) -> Result<()> {
        self.current = self.sorted.get_ord(doc)?;
        self.consumed = self.current == NO_ORD;
        Ok(())
    }

    fn next_ord(&mut self) -> Result<i64> {
        if self.consumed {
            return Ok(NO_ORD);
        }
        self.consumed = true;
        Ok(self.current)
    }

    fn cardinality(&self) -> usize {
        usize::from(self.current != NO_ORD)
    }

    fn ord_at(&self, i: usize) -> Result<i64> {
        self.input.ensure_open()?;
        if i >= self.cardinality() {
            return Err(Error::invalid(format!(
                "ord index {} out of range (cardinality {})",
                i,
                self.cardinality()
            )));
        }
        Ok(self.current)
    }

    fn lookup_ord(&mut self, ord: i64) -> Result<&[u8]> {
        self.sorted.lookup_ord(ord)
    }

    fn value_count(&self) -> u64 {
        self.sorted.value_count()
    }

    fn lookup_term(&mut self, key: &[u8]) -> Result<i64> {
        self.sorted.lookup_term(key)
    }

    fn terms_enum(&self) -> TermsEnum {
        self.sorted.terms_enum()
    }
}

// ── Docs with field ───────────────────────────────────────────────────────

/// Every document has a value.
pub struct MatchAllBits {
    len: u32,
}

impl MatchAllBits {
    pub fn new(len: u32) -> Self {
        Self { len }
    }
}

impl Bits for MatchAllBits {
    fn get(&self, index: u32) -> Result<bool> {
        check_doc(index as u64, self.len as u64)?;
        Ok(true)
    }

    fn len(&self) -> u32 {
        self.len
    }
}

/// LSB-first bitset stored in the data file.
pub struct MissingBits {
    input: IndexInput,
    offset: u64,
    len: u32,
}

impl MissingBits {
    pub(crate) fn new(input: IndexInput, offset: u64, len: u32) -> Self {
        Self { input, offset, len }
    }
}

impl Bits for MissingBits {
    fn get(&self, index: u32) -> Result<bool> {
        check_doc(index as u64, self.len as u64)?;
        let byte = self.input.bytes_at(self.offset + (index >> 3) as u64, 1)?[0];
        Ok(byte & (1 << (index & 7)) != 0)
    }

    fn len(&self) -> u32 {
        self.len
    }
}

/// Documents whose ordinal is not [`NO_ORD`].
pub struct SortedBits {
    ords: NumericReader,
}

impl SortedBits {
    pub(crate) fn new(ords: NumericReader) -> Self {
        Self { ords }
    }
}

impl Bits for SortedBits {
    fn get(&self, index: u32) -> Result<bool> {
        Ok(self.ords.get_value(index as u64)? != NO_ORD)
    }

    fn len(&self) -> u32 {
        self.ords.count() as u32
    }
}

/// Documents with at least one ordinal.
pub struct SortedSetBits {
    ord_index: Arc<MonotonicBlockPackedReader>,
    input: IndexInput,
    len: u32,
}

impl SortedSetBits {
    pub(crate) fn new(ord_index: Arc<MonotonicBlockPackedReader>, input: IndexInput, len: u32) -> Self {
        Self {
            ord_index,
            input,
            len,
        }
    }
}

impl Bits for SortedSetBits {
    fn get(&self, index: u32) -> Result<bool> {
        // The ord index is fully in memory; the input only carries the close flag.
        self.input.ensure_open()?;
        check_doc(index as u64, self.len as u64)?;
        Ok(self.ord_index.get(index as u64 + 1) > self.ord_index.get(index as u64))
    }

    fn len(&self) -> u32 {
        self.len
    }
}

/// Size in bytes of a missing-values bitset for `max_doc` documents.
pub fn missing_bitset_len(max_doc: u32) -> usize {
    packed_bytes_len(max_doc as u64, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::OwnedBytes;

    #[test]
    fn test_missing_bits_are_lsb_first() {
        // docs 0 and 3 present, 1 and 2 missing; doc 9 present.
        let input = IndexInput::new("bits", OwnedBytes::new(vec![0b0000_1001, 0b0000_0010]));
        let bits = MissingBits::new(input, 0, 10);
        let expected = [true, false, false, true, false, false, false, false, false, true];
        for (doc, &has) in expected.iter().enumerate() {
            assert_eq!(bits.get(doc as u32).unwrap(), has, "doc {}", doc);
        }
        assert!(bits.get(10).is_err());
        assert_eq!(missing_bitset_len(10), 2);
        assert_eq!(missing_bitset_len(8), 1);
    }

    #[test]
    fn test_fixed_binary_reads_slices() {
        let input = IndexInput::new("fixed", OwnedBytes::new(b"xxaabbcc".to_vec()));
        let mut reader = BinaryReader::fixed(input, 2, 2, 3);
        assert_eq!(reader.get(1).unwrap(), b"bb");
        assert_eq!(reader.get(2).unwrap(), b"cc");
        assert!(reader.get(3).is_err());
        assert!(reader.lookup_term(b"aa").is_err());
    }

    #[test]
    fn test_table_numeric() {
        // indices 1,0,2,1 at 2 bits: 0b01_10_00_01
        let input = IndexInput::new("table", OwnedBytes::new(vec![0b0110_0001]));
        let reader = NumericReader::table(vec![-5i64, 10, 1 << 40].into(), input, 0, 4);
        let values: Vec<i64> = (0..4).map(|d| reader.get(d).unwrap()).collect();
        assert_eq!(values, vec![10, -5, 1 << 40, 10]);
    }
}
