//! Append-only in-memory long buffers.
//!
//! Values accumulate in a small pending page; once it fills it is frozen into
//! a packed page using the same per-page schemes as the on-disk encoders.

use super::bitpacking::PackedArray;
use super::monotonic::{expected, page_slope};
use super::{bits_required, bits_required_signed, check_block_size, zigzag_decode, zigzag_encode};
use crate::error::{Error, Result};

/// Default number of values per page.
pub const DEFAULT_PAGE_SIZE: u32 = 1024;

/// How full pages are compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendingMode {
    /// Raw values at the width of the page maximum.
    Packed,
    /// Page minimum plus packed deltas.
    Delta,
    /// Linear prediction plus zig-zag residuals; for non-decreasing input.
    Monotonic,
}

#[derive(Debug)]
struct FrozenPage {
    base: i64,
    slope: f32,
    values: PackedArray,
}

#[derive(Debug)]
pub struct AppendingLongBuffer {
    mode: AppendingMode,
    page_shift: u32,
    page_mask: u64,
    pages: Vec<FrozenPage>,
    pending: Vec<i64>,
    size: u64,
    frozen: bool,
}

impl AppendingLongBuffer {
    pub fn new(mode: AppendingMode) -> Self {
        Self {
            mode,
            page_shift: DEFAULT_PAGE_SIZE.trailing_zeros(),
            page_mask: DEFAULT_PAGE_SIZE as u64 - 1,
            pages: Vec::new(),
            pending: Vec::with_capacity(DEFAULT_PAGE_SIZE as usize),
            size: 0,
            frozen: false,
        }
    }

    pub fn with_page_size(mode: AppendingMode, page_size: u32) -> Result<Self> {
        let page_shift = check_block_size(page_size)?;
        Ok(Self {
            mode,
            page_shift,
            page_mask: page_size as u64 - 1,
            pages: Vec::new(),
            pending: Vec::with_capacity(page_size as usize),
            size: 0,
            frozen: false,
        })
    }

    pub fn delta() -> Self {
        Self::new(AppendingMode::Delta)
    }

    pub fn packed() -> Self {
        Self::new(AppendingMode::Packed)
    }

    pub fn monotonic() -> Self {
        Self::new(AppendingMode::Monotonic)
    }

    pub fn add(&mut self, value: i64) -> Result<()> {
        if self.frozen {
            return Err(Error::invalid("cannot add to a frozen buffer"));
        }
        self.pending.push(value);
        self.size += 1;
        if self.pending.len() as u64 == self.page_mask + 1 {
            self.pack_pending();
        }
        Ok(())
    }

    #[inline]
    pub fn get(&self, index: u64) -> i64 {
        debug_assert!(index < self.size, "index {} out of bounds ({})", index, self.size);
        let page = (index >> self.page_shift) as usize;
        let offset = (index & self.page_mask) as usize;
        match self.pages.get(page) {
            Some(frozen) => self.decode(frozen, offset),
            None => self.pending[offset],
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Pack the pending values; no further adds are accepted.
    pub fn freeze(&mut self) {
        if !self.pending.is_empty() {
            self.pack_pending();
        }
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.size).map(move |i| self.get(i))
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.pending.capacity() * std::mem::size_of::<i64>()
            + self
                .pages
                .iter()
                .map(|p| std::mem::size_of::<FrozenPage>() + p.values.ram_bytes_used())
                .sum::<usize>()
    }

    #[inline]
    fn decode(&self, page: &FrozenPage, offset: usize) -> i64 {
        let raw = page.values.get(offset);
        match self.mode {
            AppendingMode::Packed => raw as i64,
            AppendingMode::Delta => page.base.wrapping_add(raw as i64),
            AppendingMode::Monotonic => {
                expected(page.base, page.slope, offset).wrapping_add(zigzag_decode(raw))
            }
        }
    }

    fn pack_pending(&mut self) {
        let values = &self.pending;
        let (base, slope, encoded): (i64, f32, Vec<u64>) = match self.mode {
            AppendingMode::Packed => (0, 0.0, values.iter().map(|&v| v as u64).collect()),
            AppendingMode::Delta => {
                let min = values.iter().copied().min().unwrap_or(0);
                (
                    min,
                    0.0,
                    values.iter().map(|&v| v.wrapping_sub(min) as u64).collect(),
                )
            }
            AppendingMode::Monotonic => {
                let base = values[0];
                let slope = page_slope(values);
                let residuals = values
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| zigzag_encode(v.wrapping_sub(expected(base, slope, i))))
                    .collect();
                (base, slope, residuals)
            }
        };
        let bits = match self.mode {
            AppendingMode::Packed => values
                .iter()
                .map(|&v| bits_required_signed(v))
                .max()
                .unwrap_or(0),
            _ => bits_required(encoded.iter().copied().max().unwrap_or(0)),
        };
        self.pages.push(FrozenPage {
            base,
            slope,
            values: PackedArray::from_values(&encoded, bits),
        });
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn fill(mode: AppendingMode, values: &[i64]) -> AppendingLongBuffer {
        let mut buffer = AppendingLongBuffer::with_page_size(mode, 64).unwrap();
        for &v in values {
            buffer.add(v).unwrap();
        }
        buffer
    }

    #[test]
    fn test_all_modes_before_and_after_freeze() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut acc = 0i64;
        let monotone: Vec<i64> = (0..300)
            .map(|_| {
                acc += rng.gen_range(0..50);
                acc
            })
            .collect();
        let signed: Vec<i64> = (0..300).map(|_| rng.gen_range(-1000..1000)).collect();

        for (mode, values) in [
            (AppendingMode::Packed, &signed),
            (AppendingMode::Delta, &signed),
            (AppendingMode::Monotonic, &monotone),
        ] {
            let mut buffer = fill(mode, values);
            assert_eq!(buffer.size(), 300);
            assert_eq!(buffer.iter().collect::<Vec<_>>(), *values, "{:?} pending", mode);
            buffer.freeze();
            assert_eq!(buffer.iter().collect::<Vec<_>>(), *values, "{:?} frozen", mode);
        }
    }

    #[test]
    fn test_extremes_survive_delta_pages() {
        let values = vec![i64::MIN, i64::MAX, 0, -1];
        let mut buffer = fill(AppendingMode::Delta, &values);
        buffer.freeze();
        assert_eq!(buffer.iter().collect::<Vec<_>>(), values);
    }

    #[test]
    fn test_frozen_rejects_add() {
        let mut buffer = AppendingLongBuffer::delta();
        buffer.add(1).unwrap();
        buffer.freeze();
        assert!(buffer.is_frozen());
        assert!(matches!(buffer.add(2), Err(Error::InvalidArgument(_))));
        assert_eq!(buffer.get(0), 1);
    }

    #[test]
    fn test_delta_compresses_narrow_range() {
        let values: Vec<i64> = (0..1024).map(|i| 1_000_000_000 + (i % 4)).collect();
        let mut delta = fill(AppendingMode::Delta, &values);
        let mut packed = fill(AppendingMode::Packed, &values);
        delta.freeze();
        packed.freeze();
        assert!(delta.ram_bytes_used() < packed.ram_bytes_used());
    }
}
