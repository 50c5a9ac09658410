//! Elias-Fano encoding for bounded non-decreasing sequences
//!
//! Each value `x` is split into `L` low bits, stored contiguously in a packed
//! array, and a high part `x >> L` stored in unary: value `i` sets bit
//! `i + (x >> L)` of the upper bit vector. The upper vector therefore has one
//! set bit per value and one clear bit per unit of high-part increase.
//!
//! Space: about `2 + log2(upper_bound / num_values)` bits per value.
//!
//! A skip index records, for every `index_interval`-th high bucket, the
//! upper-vector position where that bucket starts. Seeks jump through it
//! and then scan set bits word by word.

use super::bitpacking::PackedArray;
use super::bits_required;
use crate::error::{Error, Result};

/// Returned by the decoder when there is no value in the requested direction.
pub const NO_MORE_VALUES: i64 = -1;

/// Default number of high buckets between skip index entries.
pub const DEFAULT_INDEX_INTERVAL: u64 = 256;

/// Minimum upper bound at which Elias-Fano beats a bitset.
pub const BITSET_MIN_UPPER_BOUND: i64 = 4 * 64;

/// Minimum `upper_bound / num_values` at which Elias-Fano beats a bitset.
pub const BITSET_MIN_RATIO: i64 = 7;

/// Heuristic: whether an Elias-Fano encoding of `num_values` values bounded
/// by `upper_bound` should be preferred over a plain bitset.
pub fn sufficiently_smaller_than_bitset(num_values: u64, upper_bound: i64) -> bool {
    if upper_bound <= BITSET_MIN_UPPER_BOUND {
        return false;
    }
    num_values == 0 || upper_bound / num_values as i64 > BITSET_MIN_RATIO
}

#[derive(Debug, Clone)]
pub struct EliasFanoEncoder {
    num_values: u64,
    upper_bound: i64,
    num_low_bits: u8,
    lower_mask: u64,
    lower_bits: PackedArray,
    upper_bits: Vec<u64>,
    upper_len: u64,
    /// Entry `j` is the upper-vector position where bucket `j * interval` starts.
    upper_index: PackedArray,
    index_interval: u64,
    /// Index entries written so far.
    num_index_entries: usize,
    num_encoded: u64,
    last_encoded: i64,
}

impl EliasFanoEncoder {
    pub fn new(num_values: u64, upper_bound: i64) -> Result<Self> {
        Self::with_index_interval(num_values, upper_bound, DEFAULT_INDEX_INTERVAL)
    }

    pub fn with_index_interval(num_values: u64, upper_bound: i64, index_interval: u64) -> Result<Self> {
        if upper_bound < 0 {
            return Err(Error::invalid(format!(
                "upper_bound must be non-negative, got {}",
                upper_bound
            )));
        }
        if index_interval < 2 {
            return Err(Error::invalid(format!(
                "index_interval must be at least 2, got {}",
                index_interval
            )));
        }
        let bound = upper_bound as u64;
        let num_low_bits = if num_values > 0 && bound / num_values > 0 {
            (63 - (bound / num_values).leading_zeros()) as u8
        } else {
            0
        };
        // An empty sequence needs no buckets whatever the bound.
        let max_high = if num_values == 0 { 0 } else { bound >> num_low_bits };
        let upper_len = num_values
            .checked_add(max_high)
            .ok_or_else(|| Error::invalid("elias-fano upper bit vector too large"))?;
        let index_entries = (max_high / index_interval + 1) as usize;

        Ok(Self {
            num_values,
            upper_bound,
            num_low_bits,
            lower_mask: super::max_value(num_low_bits),
            lower_bits: PackedArray::new(num_values as usize, num_low_bits),
            upper_bits: vec![0; upper_len.div_ceil(64) as usize],
            upper_len,
            upper_index: PackedArray::new(index_entries, bits_required(upper_len)),
            index_interval,
            num_index_entries: 0,
            num_encoded: 0,
            last_encoded: 0,
        })
    }

    /// Append the next value of the sequence.
    pub fn encode_next(&mut self, value: i64) -> Result<()> {
        if self.num_encoded == self.num_values {
            return Err(Error::invalid(format!(
                "capacity exceeded: {} values already encoded",
                self.num_values
            )));
        }
        if value < self.last_encoded {
            return Err(Error::invalid(format!(
                "{} smaller than previous {}",
                value, self.last_encoded
            )));
        }
        if value > self.upper_bound {
            return Err(Error::invalid(format!(
                "{} larger than upper_bound {}",
                value, self.upper_bound
            )));
        }
        let index = self.num_encoded;
        let high = (value as u64) >> self.num_low_bits;

        // Every bucket j * interval reached for the first time starts here.
        let last_entry = (high / self.index_interval) as usize;
        while self.num_index_entries <= last_entry {
            let bucket = self.num_index_entries as u64 * self.index_interval;
            self.upper_index.set(self.num_index_entries, bucket + index);
            self.num_index_entries += 1;
        }

        let pos = index + high;
        self.upper_bits[(pos >> 6) as usize] |= 1u64 << (pos & 63);
        if self.num_low_bits > 0 {
            self.lower_bits
                .set(index as usize, value as u64 & self.lower_mask);
        }
        self.num_encoded += 1;
        self.last_encoded = value;
        Ok(())
    }

    pub fn num_values(&self) -> u64 {
        self.num_values
    }

    pub fn num_encoded(&self) -> u64 {
        self.num_encoded
    }

    pub fn upper_bound(&self) -> i64 {
        self.upper_bound
    }

    pub fn num_low_bits(&self) -> u8 {
        self.num_low_bits
    }

    pub fn decoder(&self) -> EliasFanoDecoder<'_> {
        EliasFanoDecoder::new(self)
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.lower_bits.ram_bytes_used()
            + self.upper_index.ram_bytes_used()
            + self.upper_bits.len() * std::mem::size_of::<u64>()
    }

    #[inline]
    fn value_at(&self, pos: u64, index: u64) -> i64 {
        let high = pos - index;
        let low = if self.num_low_bits > 0 {
            self.lower_bits.get(index as usize)
        } else {
            0
        };
        ((high << self.num_low_bits) | low) as i64
    }

    /// First set bit at or after `from`.
    fn next_set_bit(&self, from: u64) -> Option<u64> {
        if from >= self.upper_len {
            return None;
        }
        let mut w = (from >> 6) as usize;
        let mut word = self.upper_bits[w] & (u64::MAX << (from & 63));
        loop {
            if word != 0 {
                return Some(((w as u64) << 6) + word.trailing_zeros() as u64);
            }
            w += 1;
            if w >= self.upper_bits.len() {
                return None;
            }
            word = self.upper_bits[w];
        }
    }

    /// Last set bit strictly before `before`.
    fn prev_set_bit(&self, before: u64) -> Option<u64> {
        if before == 0 {
            return None;
        }
        let from = before - 1;
        let mut w = (from >> 6) as usize;
        let mut word = self.upper_bits[w] & (u64::MAX >> (63 - (from & 63)));
        loop {
            if word != 0 {
                return Some(((w as u64) << 6) + 63 - word.leading_zeros() as u64);
            }
            if w == 0 {
                return None;
            }
            w -= 1;
            word = self.upper_bits[w];
        }
    }
}

/// Bidirectional cursor over an [`EliasFanoEncoder`].
///
/// The cursor starts before the first value. `index` is the position of the
/// current value; it is `-1` before the sequence and `num_encoded` after it.
#[derive(Debug, Clone)]
pub struct EliasFanoDecoder<'a> {
    ef: &'a EliasFanoEncoder,
    index: i64,
    /// Upper-vector position of the current value.
    pos: u64,
}

impl<'a> EliasFanoDecoder<'a> {
    fn new(ef: &'a EliasFanoEncoder) -> Self {
        Self { ef, index: -1, pos: 0 }
    }

    /// Index of the current value.
    pub fn current_index(&self) -> i64 {
        self.index
    }

    pub fn current_value(&self) -> i64 {
        if self.index < 0 || self.index as u64 >= self.ef.num_encoded {
            NO_MORE_VALUES
        } else {
            self.ef.value_at(self.pos, self.index as u64)
        }
    }

    pub fn to_before_sequence(&mut self) {
        self.index = -1;
        self.pos = 0;
    }

    pub fn to_after_sequence(&mut self) {
        self.index = self.ef.num_encoded as i64;
        self.pos = self.ef.upper_len;
    }

    pub fn next_value(&mut self) -> i64 {
        let start = if self.index < 0 { 0 } else { self.pos + 1 };
        self.index += 1;
        if self.index as u64 >= self.ef.num_encoded {
            self.to_after_sequence();
            return NO_MORE_VALUES;
        }
        match self.ef.next_set_bit(start) {
            Some(pos) => {
                self.pos = pos;
                self.ef.value_at(pos, self.index as u64)
            }
            None => {
                self.to_after_sequence();
                NO_MORE_VALUES
            }
        }
    }

    pub fn previous_value(&mut self) -> i64 {
        if self.index <= 0 {
            self.to_before_sequence();
            return NO_MORE_VALUES;
        }
        let before = self.pos;
        self.index -= 1;
        match self.ef.prev_set_bit(before) {
            Some(pos) => {
                self.pos = pos;
                self.ef.value_at(pos, self.index as u64)
            }
            None => {
                self.to_before_sequence();
                NO_MORE_VALUES
            }
        }
    }

    /// Move to the first value `>= target` after the current one.
    pub fn advance_to_value(&mut self, target: i64) -> i64 {
        let ef = self.ef;
        if self.index + 1 >= ef.num_encoded as i64 {
            self.to_after_sequence();
            return NO_MORE_VALUES;
        }
        let (mut pos, mut ones) = if self.index < 0 {
            (0u64, 0u64)
        } else {
            (self.pos + 1, self.index as u64 + 1)
        };

        if target > 0 {
            let high_target = (target as u64) >> ef.num_low_bits;
            let entry = (high_target / ef.index_interval) as usize;
            if entry >= ef.num_index_entries {
                // No encoded value reaches this bucket.
                self.to_after_sequence();
                return NO_MORE_VALUES;
            }
            let indexed = ef.upper_index.get(entry);
            if indexed > pos {
                pos = indexed;
                ones = indexed - entry as u64 * ef.index_interval;
            }
        }

        while ones < ef.num_encoded {
            let Some(p) = ef.next_set_bit(pos) else {
                break;
            };
            let value = ef.value_at(p, ones);
            if value >= target {
                self.index = ones as i64;
                self.pos = p;
                return value;
            }
            ones += 1;
            pos = p + 1;
        }
        self.to_after_sequence();
        NO_MORE_VALUES
    }

    /// Move to the last value `<= target` before the current one.
    ///
    /// With duplicates this lands on the last occurrence of that value among
    /// the positions scanned.
    pub fn back_to_value(&mut self, target: i64) -> i64 {
        let ef = self.ef;
        if self.index <= 0 || target < 0 {
            self.to_before_sequence();
            return NO_MORE_VALUES;
        }
        // Scan set bits strictly before `before`; `ones` of them precede it.
        let (mut before, mut ones) = if self.index as u64 >= ef.num_encoded {
            (ef.upper_len, ef.num_encoded)
        } else {
            (self.pos, self.index as u64)
        };

        let high_target = (target as u64) >> ef.num_low_bits;
        let entry = (high_target + 1).div_ceil(ef.index_interval) as usize;
        if entry < ef.num_index_entries {
            let indexed = ef.upper_index.get(entry);
            if indexed < before {
                before = indexed;
                ones = indexed - entry as u64 * ef.index_interval;
            }
        }

        while ones > 0 {
            let Some(p) = ef.prev_set_bit(before) else {
                break;
            };
            ones -= 1;
            let value = ef.value_at(p, ones);
            if value <= target {
                self.index = ones as i64;
                self.pos = p;
                return value;
            }
            before = p;
        }
        self.to_before_sequence();
        NO_MORE_VALUES
    }
}

/// Doc-id value returned once an [`EliasFanoDocIdSetIterator`] is exhausted.
pub const NO_MORE_DOCS: u32 = u32::MAX;

/// Sorted set of doc ids backed by an Elias-Fano encoding.
#[derive(Debug, Clone)]
pub struct EliasFanoDocIdSet {
    encoder: EliasFanoEncoder,
}

impl EliasFanoDocIdSet {
    /// A set of `num_values` docs, each `<= upper_bound`.
    pub fn new(num_values: u64, upper_bound: u32) -> Result<Self> {
        Ok(Self {
            encoder: EliasFanoEncoder::new(num_values, upper_bound as i64)?,
        })
    }

    /// Build from ascending doc ids.
    pub fn from_sorted(docs: &[u32], upper_bound: u32) -> Result<Self> {
        let mut set = Self::new(docs.len() as u64, upper_bound)?;
        for &doc in docs {
            set.add(doc)?;
        }
        Ok(set)
    }

    pub fn add(&mut self, doc: u32) -> Result<()> {
        self.encoder.encode_next(doc as i64)
    }

    pub fn len(&self) -> u64 {
        self.encoder.num_encoded()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> EliasFanoDocIdSetIterator<'_> {
        EliasFanoDocIdSetIterator {
            decoder: self.encoder.decoder(),
            doc: None,
        }
    }

    pub fn ram_bytes_used(&self) -> usize {
        self.encoder.ram_bytes_used()
    }
}

pub struct EliasFanoDocIdSetIterator<'a> {
    decoder: EliasFanoDecoder<'a>,
    doc: Option<u32>,
}

impl EliasFanoDocIdSetIterator<'_> {
    /// Current doc, `None` before the first call to `next_doc`/`advance`.
    pub fn doc(&self) -> Option<u32> {
        self.doc
    }

    pub fn next_doc(&mut self) -> u32 {
        let value = self.decoder.next_value();
        self.set(value)
    }

    /// First doc `>= target` after the current one.
    pub fn advance(&mut self, target: u32) -> u32 {
        let value = self.decoder.advance_to_value(target as i64);
        self.set(value)
    }

    fn set(&mut self, value: i64) -> u32 {
        let doc = if value == NO_MORE_VALUES {
            NO_MORE_DOCS
        } else {
            value as u32
        };
        self.doc = Some(doc);
        doc
    }
}

impl Iterator for EliasFanoDocIdSetIterator<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        match self.next_doc() {
            NO_MORE_DOCS => None,
            doc => Some(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn encode(values: &[i64], upper_bound: i64, interval: u64) -> EliasFanoEncoder {
        let mut ef =
            EliasFanoEncoder::with_index_interval(values.len() as u64, upper_bound, interval).unwrap();
        for &v in values {
            ef.encode_next(v).unwrap();
        }
        ef
    }

    const SEQ: [i64; 5] = [3, 10, 10, 42, 100];

    #[test]
    fn test_sequential_decode() {
        let ef = encode(&SEQ, 200, DEFAULT_INDEX_INTERVAL);
        assert_eq!(ef.num_low_bits(), 5);
        let mut d = ef.decoder();
        for &v in &SEQ {
            assert_eq!(d.next_value(), v);
        }
        assert_eq!(d.next_value(), NO_MORE_VALUES);
        // Walk back from the end.
        for &v in SEQ.iter().rev() {
            assert_eq!(d.previous_value(), v);
        }
        assert_eq!(d.previous_value(), NO_MORE_VALUES);
    }

    #[test]
    fn test_seek() {
        let ef = encode(&SEQ, 200, 2);
        let mut d = ef.decoder();
        assert_eq!(d.advance_to_value(11), 42);
        assert_eq!(d.current_index(), 3);
        assert_eq!(d.advance_to_value(101), NO_MORE_VALUES);
        assert_eq!(d.back_to_value(10), 10);
        // Last occurrence of the duplicate.
        assert_eq!(d.current_index(), 2);
        assert_eq!(d.back_to_value(10), 10);
        assert_eq!(d.current_index(), 1);
        assert_eq!(d.back_to_value(2), NO_MORE_VALUES);
        assert_eq!(d.current_index(), -1);
    }

    #[test]
    fn test_advance_lands_on_first_duplicate() {
        let ef = encode(&SEQ, 200, DEFAULT_INDEX_INTERVAL);
        let mut d = ef.decoder();
        assert_eq!(d.advance_to_value(4), 10);
        assert_eq!(d.current_index(), 1);
        assert_eq!(d.advance_to_value(10), 10);
        assert_eq!(d.current_index(), 2);
    }

    #[test]
    fn test_encoder_errors() {
        let mut ef = EliasFanoEncoder::new(2, 10).unwrap();
        ef.encode_next(5).unwrap();
        assert!(matches!(ef.encode_next(4), Err(Error::InvalidArgument(_))));
        assert!(matches!(ef.encode_next(11), Err(Error::InvalidArgument(_))));
        ef.encode_next(10).unwrap();
        assert!(matches!(ef.encode_next(10), Err(Error::InvalidArgument(_))));
        assert!(EliasFanoEncoder::new(1, -1).is_err());
    }

    #[test]
    fn test_empty_and_zero_bound() {
        let ef = EliasFanoEncoder::new(0, 0).unwrap();
        let mut d = ef.decoder();
        assert_eq!(d.next_value(), NO_MORE_VALUES);
        assert_eq!(d.advance_to_value(0), NO_MORE_VALUES);
        assert_eq!(d.back_to_value(0), NO_MORE_VALUES);

        let ef = encode(&[0, 0, 0], 0, DEFAULT_INDEX_INTERVAL);
        let mut d = ef.decoder();
        assert_eq!(d.advance_to_value(0), 0);
        d.to_after_sequence();
        assert_eq!(d.back_to_value(0), 0);
        assert_eq!(d.current_index(), 2);
    }

    #[test]
    fn test_empty_sequence_with_large_bound() {
        let ef = EliasFanoEncoder::new(0, 1i64 << 40).unwrap();
        assert!(ef.ram_bytes_used() < 1024);
        let mut d = ef.decoder();
        assert_eq!(d.next_value(), NO_MORE_VALUES);
        d.to_before_sequence();
        assert_eq!(d.advance_to_value(12345), NO_MORE_VALUES);
        assert_eq!(d.back_to_value(1i64 << 39), NO_MORE_VALUES);
        d.to_after_sequence();
        assert_eq!(d.back_to_value(1i64 << 40), NO_MORE_VALUES);
        assert_eq!(d.previous_value(), NO_MORE_VALUES);

        let mut ef = EliasFanoEncoder::new(0, 1i64 << 40).unwrap();
        assert!(matches!(ef.encode_next(1), Err(Error::InvalidArgument(_))));

        let set = EliasFanoDocIdSet::new(0, u32::MAX - 1).unwrap();
        assert!(set.is_empty());
        assert!(set.ram_bytes_used() < 1024);
        let mut it = set.iter();
        assert_eq!(it.advance(10), NO_MORE_DOCS);
        assert_eq!(set.iter().next_doc(), NO_MORE_DOCS);
        assert_eq!(set.iter().count(), 0);
    }

    #[test]
    fn test_random_seeks_match_linear_scan() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut values: Vec<i64> = (0..2000).map(|_| rng.gen_range(0..100_000)).collect();
        values.sort_unstable();
        let ef = encode(&values, 100_000, 16);

        for _ in 0..200 {
            let target = rng.gen_range(0..100_010);
            let mut d = ef.decoder();
            let expected = values.iter().copied().find(|&v| v >= target).unwrap_or(NO_MORE_VALUES);
            assert_eq!(d.advance_to_value(target), expected, "advance {}", target);

            d.to_after_sequence();
            let expected_back = values.iter().copied().rev().find(|&v| v <= target).unwrap_or(NO_MORE_VALUES);
            assert_eq!(d.back_to_value(target), expected_back, "back {}", target);
            if expected_back != NO_MORE_VALUES {
                let last = values.iter().rposition(|&v| v == expected_back).unwrap();
                assert_eq!(d.current_index(), last as i64);
            }
        }
    }

    #[test]
    fn test_interleaved_seeks_move_forward_only() {
        let values: Vec<i64> = (0..1000).map(|i| i * 3).collect();
        let ef = encode(&values, 3000, 8);
        let mut d = ef.decoder();
        assert_eq!(d.advance_to_value(300), 300);
        assert_eq!(d.advance_to_value(0), 303);
        assert_eq!(d.next_value(), 306);
        assert_eq!(d.back_to_value(2999), 303);
        assert_eq!(d.previous_value(), 300);
    }

    #[test]
    fn test_bitset_heuristic() {
        assert!(!sufficiently_smaller_than_bitset(1, 256));
        assert!(sufficiently_smaller_than_bitset(1, 257));
        assert!(sufficiently_smaller_than_bitset(100, 1000));
        assert!(!sufficiently_smaller_than_bitset(200, 1000));
    }

    #[test]
    fn test_doc_id_set() {
        let docs = [1u32, 5, 64, 65, 1000];
        let set = EliasFanoDocIdSet::from_sorted(&docs, 1000).unwrap();
        assert_eq!(set.len(), 5);
        assert_eq!(set.iter().collect::<Vec<_>>(), docs);

        let mut it = set.iter();
        assert_eq!(it.doc(), None);
        assert_eq!(it.advance(6), 64);
        assert_eq!(it.next_doc(), 65);
        assert_eq!(it.advance(1001), NO_MORE_DOCS);
        assert_eq!(it.doc(), Some(NO_MORE_DOCS));
    }
}
