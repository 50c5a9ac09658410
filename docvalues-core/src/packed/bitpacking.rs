//! Fixed-width bit packing.
//!
//! Values are packed LSB-first into 64-bit words. Value `i` occupies bits
//! `[i * bpv, (i + 1) * bpv)` of the little-endian bit stream, so the on-disk
//! form is simply the words' little-endian bytes truncated to
//! `ceil(n * bpv / 8)` bytes.

use byteorder::{ByteOrder, LittleEndian};

use super::max_value;

/// Read-only view of a packed sequence of unsigned values.
pub trait PackedReader {
    fn get(&self, index: usize) -> u64;

    fn size(&self) -> usize;

    fn bits_per_value(&self) -> u8;

    fn ram_bytes_used(&self) -> usize;
}

/// A packed sequence whose values can be overwritten.
pub trait Mutable: PackedReader {
    fn set(&mut self, index: usize, value: u64);

    /// Allocate a zeroed instance of the same kind.
    fn with_capacity(size: usize, bits_per_value: u8) -> Self
    where
        Self: Sized;
}

/// Packed array of `len` values, `bits_per_value` bits each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedArray {
    words: Vec<u64>,
    len: usize,
    bits_per_value: u8,
    mask: u64,
}

impl PackedArray {
    pub fn new(len: usize, bits_per_value: u8) -> Self {
        assert!(bits_per_value <= 64, "bits_per_value must be <= 64");
        let total_bits = len as u128 * bits_per_value as u128;
        let num_words = total_bits.div_ceil(64) as usize;
        Self {
            words: vec![0; num_words],
            len,
            bits_per_value,
            mask: max_value(bits_per_value),
        }
    }

    /// Pack `values` at the given width. Values must fit.
    pub fn from_values(values: &[u64], bits_per_value: u8) -> Self {
        let mut array = Self::new(values.len(), bits_per_value);
        array.set_bulk(0, values);
        array
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bits_per_value(&self) -> u8 {
        self.bits_per_value
    }

    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        debug_assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        if self.bits_per_value == 0 {
            return 0;
        }
        let bpv = self.bits_per_value as u64;
        let bit = index as u64 * bpv;
        let word = (bit >> 6) as usize;
        let shift = (bit & 63) as u32;
        let lo = self.words[word] >> shift;
        if shift as u64 + bpv <= 64 {
            lo & self.mask
        } else {
            (lo | (self.words[word + 1] << (64 - shift))) & self.mask
        }
    }

    #[inline]
    pub fn set(&mut self, index: usize, value: u64) {
        debug_assert!(index < self.len, "index {} out of bounds ({})", index, self.len);
        debug_assert!(
            value <= self.mask,
            "value {} does not fit in {} bits",
            value,
            self.bits_per_value
        );
        if self.bits_per_value == 0 {
            return;
        }
        let value = value & self.mask;
        let bpv = self.bits_per_value as u64;
        let bit = index as u64 * bpv;
        let word = (bit >> 6) as usize;
        let shift = (bit & 63) as u32;
        self.words[word] = (self.words[word] & !(self.mask << shift)) | (value << shift);
        if shift as u64 + bpv > 64 {
            let spill = 64 - shift;
            let hi_mask = self.mask >> spill;
            self.words[word + 1] = (self.words[word + 1] & !hi_mask) | (value >> spill);
        }
    }

    /// Copy values starting at `index` into `dest`; returns how many were read.
    pub fn get_bulk(&self, index: usize, dest: &mut [u64]) -> usize {
        let count = dest.len().min(self.len.saturating_sub(index));
        for (offset, slot) in dest[..count].iter_mut().enumerate() {
            *slot = self.get(index + offset);
        }
        count
    }

    /// Write values from `src` starting at `index`; returns how many were written.
    pub fn set_bulk(&mut self, index: usize, src: &[u64]) -> usize {
        let count = src.len().min(self.len.saturating_sub(index));
        for (offset, &value) in src[..count].iter().enumerate() {
            self.set(index + offset, value);
        }
        count
    }

    /// Set every value in `[from, to)` to `value`.
    pub fn fill(&mut self, from: usize, to: usize, value: u64) {
        debug_assert!(from <= to && to <= self.len);
        for index in from..to {
            self.set(index, value);
        }
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>() + self.words.len() * std::mem::size_of::<u64>()
    }

    /// Append the on-disk form to `out`.
    pub fn write_packed(&self, out: &mut Vec<u8>) {
        let num_bytes = packed_bytes_len(self.len as u64, self.bits_per_value);
        let start = out.len();
        out.resize(start + self.words.len() * 8, 0);
        for (i, &w) in self.words.iter().enumerate() {
            LittleEndian::write_u64(&mut out[start + i * 8..start + i * 8 + 8], w);
        }
        out.truncate(start + num_bytes);
    }
}

impl PackedReader for PackedArray {
    fn get(&self, index: usize) -> u64 {
        PackedArray::get(self, index)
    }

    fn size(&self) -> usize {
        self.len
    }

    fn bits_per_value(&self) -> u8 {
        self.bits_per_value
    }

    fn ram_bytes_used(&self) -> usize {
        PackedArray::ram_bytes_used(self)
    }
}

impl Mutable for PackedArray {
    fn set(&mut self, index: usize, value: u64) {
        PackedArray::set(self, index, value)
    }

    fn with_capacity(size: usize, bits_per_value: u8) -> Self {
        Self::new(size, bits_per_value)
    }
}

/// Bytes taken by `count` values packed at `bits_per_value`.
#[inline]
pub fn packed_bytes_len(count: u64, bits_per_value: u8) -> usize {
    (count as u128 * bits_per_value as u128).div_ceil(8) as usize
}

/// Pack `values` at `bits_per_value` bits each and append to `out`.
pub fn pack_into(values: &[u64], bits_per_value: u8, out: &mut Vec<u8>) {
    if bits_per_value == 0 {
        return;
    }
    PackedArray::from_values(values, bits_per_value).write_packed(out);
}

/// Read value at `index` from bit-packed bytes.
///
/// Fast path: a single unaligned little-endian u64 load covering the target
/// bits. Callers guarantee `data` holds at least
/// `packed_bytes_len(index + 1, bits_per_value)` bytes.
#[inline]
pub fn read_packed(data: &[u8], bits_per_value: u8, index: u64) -> u64 {
    if bits_per_value == 0 {
        return 0;
    }
    let bpv = bits_per_value as u64;
    let bit_offset = index * bpv;
    let byte_offset = (bit_offset / 8) as usize;
    let bit_shift = (bit_offset % 8) as u32;
    let mask = max_value(bits_per_value);

    if bit_shift as u64 + bpv <= 64 && byte_offset + 8 <= data.len() {
        let raw = LittleEndian::read_u64(&data[byte_offset..byte_offset + 8]);
        return (raw >> bit_shift) & mask;
    }

    // Tail of the buffer, or a value straddling nine bytes.
    let mut result = 0u64;
    let mut remaining = bpv as u32;
    let mut bo = byte_offset;
    let mut bs = bit_shift;
    let mut out_shift = 0u32;
    while remaining > 0 {
        let can_read = (8 - bs).min(remaining);
        let byte_mask = ((1u32 << can_read) - 1) as u8;
        let byte_val = data.get(bo).copied().unwrap_or(0);
        result |= (((byte_val >> bs) & byte_mask) as u64) << out_shift;
        remaining -= can_read;
        out_shift += can_read;
        bo += 1;
        bs = 0;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const WIDTHS: [u8; 7] = [0, 1, 7, 8, 9, 63, 64];

    fn random_values(rng: &mut StdRng, n: usize, bpv: u8) -> Vec<u64> {
        let mask = max_value(bpv);
        (0..n).map(|_| rng.r#gen::<u64>() & mask).collect()
    }

    #[test]
    fn test_boundary_widths_roundtrip() {
        let mut rng = StdRng::seed_from_u64(42);
        for bpv in WIDTHS {
            for n in [0usize, 1, 63, 64, 65, 1000] {
                let values = random_values(&mut rng, n, bpv);
                let array = PackedArray::from_values(&values, bpv);
                for (i, &v) in values.iter().enumerate() {
                    assert_eq!(array.get(i), v, "bpv={} n={} i={}", bpv, n, i);
                }

                let mut bytes = Vec::new();
                pack_into(&values, bpv, &mut bytes);
                assert_eq!(bytes.len(), packed_bytes_len(n as u64, bpv));
                for (i, &v) in values.iter().enumerate() {
                    assert_eq!(read_packed(&bytes, bpv, i as u64), v, "on-disk bpv={} i={}", bpv, i);
                }
            }
        }
    }

    #[test]
    fn test_zero_width_is_constant() {
        let array = PackedArray::new(500, 0);
        assert_eq!(array.ram_bytes_used(), std::mem::size_of::<PackedArray>());
        assert!((0..500).all(|i| array.get(i) == 0));
    }

    #[test]
    fn test_full_width_extremes() {
        let values = [i64::MIN as u64, i64::MAX as u64, 0, u64::MAX];
        let array = PackedArray::from_values(&values, 64);
        assert_eq!(array.get(0) as i64, i64::MIN);
        assert_eq!(array.get(1) as i64, i64::MAX);
        assert_eq!(array.get(3), u64::MAX);
    }

    #[test]
    fn test_overwrite_keeps_neighbours() {
        for bpv in [7u8, 9, 63] {
            let mut array = PackedArray::new(20, bpv);
            array.fill(0, 20, max_value(bpv));
            array.set(10, 0);
            assert_eq!(array.get(9), max_value(bpv));
            assert_eq!(array.get(10), 0);
            assert_eq!(array.get(11), max_value(bpv));
        }
    }

    #[test]
    fn test_bulk_ops() {
        let mut array = PackedArray::new(10, 5);
        assert_eq!(array.set_bulk(7, &[1, 2, 3, 4, 5]), 3);
        let mut dest = [0u64; 8];
        assert_eq!(array.get_bulk(5, &mut dest), 5);
        assert_eq!(&dest[..5], &[0, 0, 1, 2, 3]);
        assert_eq!(array.get_bulk(10, &mut dest), 0);
    }
}
