//! Prefix-compressed term dictionary
//!
//! Sorted distinct terms are stored in batches of `address_interval`:
//!
//! ```text
//! batch:  len(vint) first_term  { prefix_len(vint) suffix_len(vint) suffix }*
//! ```
//!
//! A monotonic table holds the start of each batch relative to the
//! dictionary offset. Random access decodes forward from the batch start;
//! lookups binary-search the first terms of the batches and then scan one
//! batch.

use std::cmp::Ordering;
use std::io::Write;
use std::sync::Arc;

use crate::codec_util::write_vint;
use crate::directories::IndexInput;
use crate::error::{Error, Result};
use crate::packed::MonotonicBlockPackedReader;

use super::format::BinaryEntry;

/// Length of the shared prefix of two terms.
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Streams sorted distinct terms into prefix-coded batches.
pub(crate) struct TermsWriter {
    interval: u64,
    count: u64,
    prev: Vec<u8>,
    min_length: usize,
    max_length: usize,
    /// Batch start offsets relative to the dictionary start.
    batch_starts: Vec<i64>,
    written: u64,
}

impl TermsWriter {
    pub(crate) fn new(address_interval: u32) -> Self {
        Self {
            interval: address_interval as u64,
            count: 0,
            prev: Vec::new(),
            min_length: usize::MAX,
            max_length: 0,
            batch_starts: Vec::new(),
            written: 0,
        }
    }

    pub(crate) fn add<W: Write + ?Sized>(&mut self, out: &mut W, term: &[u8]) -> std::io::Result<()> {
        debug_assert!(
            self.count == 0 || self.prev.as_slice() < term,
            "terms must be added in strictly increasing order"
        );
        let mut buf = Vec::with_capacity(term.len() + 10);
        if self.count % self.interval == 0 {
            self.batch_starts.push(self.written as i64);
            write_vint(&mut buf, term.len() as u32)?;
            buf.extend_from_slice(term);
        } else {
            let prefix = common_prefix_len(&self.prev, term);
            let suffix = &term[prefix..];
            write_vint(&mut buf, prefix as u32)?;
            write_vint(&mut buf, suffix.len() as u32)?;
            buf.extend_from_slice(suffix);
        }
        out.write_all(&buf)?;
        self.written += buf.len() as u64;
        self.prev.clear();
        self.prev.extend_from_slice(term);
        self.min_length = self.min_length.min(term.len());
        self.max_length = self.max_length.max(term.len());
        self.count += 1;
        Ok(())
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// `(min, max)` term length; `(0, 0)` when empty.
    pub(crate) fn length_range(&self) -> (usize, usize) {
        if self.count == 0 {
            (0, 0)
        } else {
            (self.min_length, self.max_length)
        }
    }

    pub(crate) fn batch_starts(&self) -> &[i64] {
        &self.batch_starts
    }
}

/// Positioning shared by random access and enumeration.
#[derive(Clone)]
struct TermsCursor {
    input: IndexInput,
    offset: u64,
    count: u64,
    interval: u64,
    addresses: Arc<MonotonicBlockPackedReader>,
}

impl TermsCursor {
    fn num_batches(&self) -> u64 {
        self.count.div_ceil(self.interval)
    }

    /// Position at the start of `batch` and decode its first term.
    fn seek_batch(&mut self, batch: u64, term: &mut Vec<u8>) -> Result<()> {
        let start = self.addresses.get(batch);
        if start < 0 {
            return Err(Error::corrupt(format!(
                "negative term batch address {} in {}",
                start,
                self.input.name()
            )));
        }
        self.input.seek(self.offset + start as u64)?;
        let len = self.input.read_vint()? as usize;
        let bytes = self.input.read_slice(len)?;
        term.clear();
        term.extend_from_slice(bytes);
        Ok(())
    }

    /// Decode the term following `term` within the current batch.
    fn read_next(&mut self, term: &mut Vec<u8>) -> Result<()> {
        let prefix = self.input.read_vint()? as usize;
        let suffix_len = self.input.read_vint()? as usize;
        if prefix > term.len() {
            return Err(Error::corrupt(format!(
                "term prefix {} longer than previous term ({}) in {}",
                prefix,
                term.len(),
                self.input.name()
            )));
        }
        term.truncate(prefix);
        let suffix = self.input.read_slice(suffix_len)?;
        term.extend_from_slice(suffix);
        Ok(())
    }

    /// Decode term `ord` into `term`.
    fn seek_ord(&mut self, ord: u64, term: &mut Vec<u8>) -> Result<()> {
        if ord >= self.count {
            return Err(Error::invalid(format!(
                "ord {} out of range (value count {})",
                ord, self.count
            )));
        }
        self.seek_batch(ord / self.interval, term)?;
        for _ in 0..ord % self.interval {
            self.read_next(term)?;
        }
        Ok(())
    }

    /// Ordinal of `key`, or `-(insertion point) - 1` if absent.
    fn lookup(&mut self, key: &[u8], scratch: &mut Vec<u8>) -> Result<i64> {
        if self.count == 0 {
            return Ok(-1);
        }
        let mut lo = 0i64;
        let mut hi = self.num_batches() as i64 - 1;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            self.seek_batch(mid as u64, scratch)?;
            match scratch.as_slice().cmp(key) {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid - 1,
                Ordering::Equal => return Ok(mid * self.interval as i64),
            }
        }
        if hi < 0 {
            return Ok(-1);
        }
        // `hi` is the last batch whose first term sorts before `key`.
        let batch = hi as u64;
        self.seek_batch(batch, scratch)?;
        let start = batch * self.interval;
        let end = (start + self.interval).min(self.count);
        for ord in start + 1..end {
            self.read_next(scratch)?;
            match scratch.as_slice().cmp(key) {
                Ordering::Less => {}
                Ordering::Equal => return Ok(ord as i64),
                Ordering::Greater => return Ok(-(ord as i64) - 1),
            }
        }
        Ok(-(end as i64) - 1)
    }
}

/// Random-access view of a prefix-compressed dictionary.
pub struct CompressedTerms {
    cursor: TermsCursor,
    term: Vec<u8>,
    scratch: Vec<u8>,
}

impl CompressedTerms {
    pub(crate) fn new(input: IndexInput, entry: &BinaryEntry, addresses: Arc<MonotonicBlockPackedReader>) -> Self {
        Self {
            cursor: TermsCursor {
                input,
                offset: entry.offset as u64,
                count: entry.count as u64,
                interval: entry.address_interval as u64,
                addresses,
            },
            term: Vec::with_capacity(entry.max_length as usize),
            scratch: Vec::new(),
        }
    }

    /// Number of terms.
    pub fn count(&self) -> u64 {
        self.cursor.count
    }

    pub fn term(&mut self, ord: u64) -> Result<&[u8]> {
        self.cursor.seek_ord(ord, &mut self.term)?;
        Ok(&self.term)
    }

    /// Ordinal of `key`, or `-(insertion point) - 1` if absent.
    pub fn lookup_term(&mut self, key: &[u8]) -> Result<i64> {
        self.cursor.lookup(key, &mut self.scratch)
    }

    pub fn terms_enum(&self) -> TermsEnum {
        TermsEnum {
            cursor: self.cursor.clone(),
            ord: -1,
            term: Vec::new(),
            scratch: Vec::new(),
        }
    }
}

/// Outcome of [`TermsEnum::seek_ceil`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStatus {
    /// The exact term exists; the enum is positioned on it.
    Found,
    /// Positioned on the smallest term greater than the target.
    NotFound,
    /// Every term is smaller than the target.
    End,
}

/// Sequential iteration and seeking over a dictionary.
pub struct TermsEnum {
    cursor: TermsCursor,
    ord: i64,
    term: Vec<u8>,
    scratch: Vec<u8>,
}

impl TermsEnum {
    /// Advance to the next term.
    pub fn next(&mut self) -> Result<Option<&[u8]>> {
        let next = self.ord + 1;
        if next as u64 >= self.cursor.count {
            self.ord = self.cursor.count as i64;
            return Ok(None);
        }
        if next as u64 % self.cursor.interval == 0 {
            self.cursor.seek_batch(next as u64 / self.cursor.interval, &mut self.term)?;
        } else {
            self.cursor.read_next(&mut self.term)?;
        }
        self.ord = next;
        Ok(Some(&self.term))
    }

    /// Position on the smallest term `>= key`.
    pub fn seek_ceil(&mut self, key: &[u8]) -> Result<SeekStatus> {
        let found = self.cursor.lookup(key, &mut self.scratch)?;
        if found >= 0 {
            self.seek_exact_ord(found as u64)?;
            return Ok(SeekStatus::Found);
        }
        let insertion = (-found - 1) as u64;
        if insertion >= self.cursor.count {
            self.ord = self.cursor.count as i64;
            self.term.clear();
            return Ok(SeekStatus::End);
        }
        self.seek_exact_ord(insertion)?;
        Ok(SeekStatus::NotFound)
    }

    pub fn seek_exact_ord(&mut self, ord: u64) -> Result<()> {
        self.cursor.seek_ord(ord, &mut self.term)?;
        self.ord = ord as i64;
        Ok(())
    }

    /// Current ordinal; `-1` before the first call to `next`.
    pub fn ord(&self) -> i64 {
        self.ord
    }

    pub fn term(&self) -> &[u8] {
        &self.term
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::OwnedBytes;
    use crate::docvalues::format::{BinaryEncoding, NO_MISSING};
    use crate::packed::{MonotonicBlockPackedWriter, PACKED_VERSION_CURRENT};

    fn build(terms: &[&[u8]], interval: u32) -> CompressedTerms {
        let mut data = Vec::new();
        let mut writer = TermsWriter::new(interval);
        for term in terms {
            writer.add(&mut data, term).unwrap();
        }
        let addresses_offset = data.len();
        let mut mono = MonotonicBlockPackedWriter::new(&mut data, 64).unwrap();
        for &start in writer.batch_starts() {
            mono.add(start).unwrap();
        }
        mono.finish().unwrap();

        let (min, max) = writer.length_range();
        let entry = BinaryEntry {
            encoding: BinaryEncoding::Prefix,
            missing_offset: NO_MISSING,
            min_length: min as i32,
            max_length: max as i32,
            count: writer.count() as i64,
            offset: 0,
            addresses_offset: addresses_offset as i64,
            packed_version: PACKED_VERSION_CURRENT,
            address_interval: interval as i32,
            block_size: 64,
        };
        let input = IndexInput::new("terms", OwnedBytes::new(data));
        let mut cursor = input.clone();
        cursor.seek(addresses_offset as u64).unwrap();
        let addresses = MonotonicBlockPackedReader::load(
            &mut cursor,
            entry.num_addresses(),
            64,
            PACKED_VERSION_CURRENT,
        )
        .unwrap();
        CompressedTerms::new(input, &entry, Arc::new(addresses))
    }

    fn words() -> Vec<Vec<u8>> {
        let mut words: Vec<Vec<u8>> = (0..100u32)
            .map(|i| format!("term{:03}", i * 2).into_bytes())
            .collect();
        words.insert(0, b"".to_vec());
        words
    }

    #[test]
    fn test_common_prefix_len() {
        assert_eq!(common_prefix_len(b"hello", b"help"), 3);
        assert_eq!(common_prefix_len(b"", b"hello"), 0);
    }

    #[test]
    fn test_random_access() {
        let words = words();
        let refs: Vec<&[u8]> = words.iter().map(|w| w.as_slice()).collect();
        for interval in [1u32, 3, 16] {
            let mut terms = build(&refs, interval);
            assert_eq!(terms.count(), 101);
            for (ord, word) in words.iter().enumerate().rev() {
                assert_eq!(terms.term(ord as u64).unwrap(), word.as_slice());
            }
            assert!(terms.term(101).is_err());
        }
    }

    #[test]
    fn test_lookup_term() {
        let mut terms = build(&[b"apple", b"banana", b"cherry"], 2);
        assert_eq!(terms.lookup_term(b"apple").unwrap(), 0);
        assert_eq!(terms.lookup_term(b"banana").unwrap(), 1);
        assert_eq!(terms.lookup_term(b"cherry").unwrap(), 2);
        assert_eq!(terms.lookup_term(b"avocado").unwrap(), -2);
        assert_eq!(terms.lookup_term(b"aardvark").unwrap(), -1);
        assert_eq!(terms.lookup_term(b"zebra").unwrap(), -4);
        assert_eq!(terms.lookup_term(b"blueberry").unwrap(), -3);
    }

    #[test]
    fn test_lookup_every_gap() {
        let words = words();
        let refs: Vec<&[u8]> = words.iter().map(|w| w.as_slice()).collect();
        let mut terms = build(&refs, 16);
        for i in 0..100u32 {
            // term{2i+1} sorts between term{2i} (ord i+1) and term{2i+2}.
            let key = format!("term{:03}", i * 2 + 1);
            assert_eq!(terms.lookup_term(key.as_bytes()).unwrap(), -(i as i64 + 2) - 1);
        }
    }

    #[test]
    fn test_terms_enum() {
        let words = words();
        let refs: Vec<&[u8]> = words.iter().map(|w| w.as_slice()).collect();
        let terms = build(&refs, 16);
        let mut te = terms.terms_enum();
        assert_eq!(te.ord(), -1);
        let mut seen = Vec::new();
        while let Some(term) = te.next().unwrap() {
            seen.push(term.to_vec());
        }
        assert_eq!(seen, words);

        let mut te = terms.terms_enum();
        assert_eq!(te.seek_ceil(b"term050").unwrap(), SeekStatus::Found);
        assert_eq!(te.ord(), 26);
        assert_eq!(te.seek_ceil(b"term051").unwrap(), SeekStatus::NotFound);
        assert_eq!(te.term(), b"term052");
        assert_eq!(te.next().unwrap(), Some(&b"term054"[..]));
        assert_eq!(te.seek_ceil(b"zzz").unwrap(), SeekStatus::End);
        te.seek_exact_ord(0).unwrap();
        assert_eq!(te.term(), b"");
    }

    #[test]
    fn test_empty_dictionary() {
        let mut terms = build(&[], 16);
        assert_eq!(terms.count(), 0);
        assert_eq!(terms.lookup_term(b"x").unwrap(), -1);
        assert_eq!(terms.terms_enum().next().unwrap(), None);
    }
}
