//! Paged arrays: a logical array split into independently allocated pages,
//! for sizes beyond a single packed block.

use super::bitpacking::{Mutable, PackedArray, PackedReader};
use super::{bits_required, check_block_size, max_value, num_blocks};
use crate::error::Result;

/// Packed array that widens itself when a value does not fit.
#[derive(Debug, Clone)]
pub struct GrowableWriter {
    current: PackedArray,
}

impl GrowableWriter {
    pub fn new(size: usize, starting_bits_per_value: u8) -> Self {
        Self {
            current: PackedArray::new(size, starting_bits_per_value),
        }
    }

    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        self.current.get(index)
    }

    pub fn set(&mut self, index: usize, value: u64) {
        self.ensure_capacity(value);
        self.current.set(index, value);
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn bits_per_value(&self) -> u8 {
        self.current.bits_per_value()
    }

    fn ensure_capacity(&mut self, value: u64) {
        if value <= max_value(self.current.bits_per_value()) {
            return;
        }
        let bits = bits_required(value);
        let mut wider = PackedArray::new(self.current.len(), bits);
        for i in 0..self.current.len() {
            wider.set(i, self.current.get(i));
        }
        self.current = wider;
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>() - std::mem::size_of::<PackedArray>()
            + self.current.ram_bytes_used()
    }
}

impl PackedReader for GrowableWriter {
    fn get(&self, index: usize) -> u64 {
        GrowableWriter::get(self, index)
    }

    fn size(&self) -> usize {
        self.len()
    }

    fn bits_per_value(&self) -> u8 {
        GrowableWriter::bits_per_value(self)
    }

    fn ram_bytes_used(&self) -> usize {
        GrowableWriter::ram_bytes_used(self)
    }
}

impl Mutable for GrowableWriter {
    fn set(&mut self, index: usize, value: u64) {
        GrowableWriter::set(self, index, value)
    }

    fn with_capacity(size: usize, bits_per_value: u8) -> Self {
        Self::new(size, bits_per_value)
    }
}

/// Array of `size` values stored in pages of `page_size` values each.
#[derive(Debug, Clone)]
pub struct Paged<P> {
    pages: Vec<P>,
    size: u64,
    page_shift: u32,
    page_mask: u64,
    bits_per_value: u8,
}

/// Paged array with one fixed width.
pub type PagedMutable = Paged<PackedArray>;

/// Paged array whose pages widen independently.
pub type PagedGrowableWriter = Paged<GrowableWriter>;

impl<P: Mutable> Paged<P> {
    /// `page_size` must be a power of two in [64, 2^27].
    pub fn new(size: u64, page_size: u32, bits_per_value: u8) -> Result<Self> {
        let page_shift = check_block_size(page_size)?;
        let num_pages = num_blocks(size, page_size);
        let pages = (0..num_pages)
            .map(|i| {
                let len = (size - ((i as u64) << page_shift)).min(page_size as u64);
                P::with_capacity(len as usize, bits_per_value)
            })
            .collect();
        Ok(Self {
            pages,
            size,
            page_shift,
            page_mask: page_size as u64 - 1,
            bits_per_value,
        })
    }

    #[inline]
    pub fn get(&self, index: u64) -> u64 {
        debug_assert!(index < self.size, "index {} out of bounds ({})", index, self.size);
        self.pages[(index >> self.page_shift) as usize].get((index & self.page_mask) as usize)
    }

    #[inline]
    pub fn set(&mut self, index: u64, value: u64) {
        debug_assert!(index < self.size, "index {} out of bounds ({})", index, self.size);
        self.pages[(index >> self.page_shift) as usize].set((index & self.page_mask) as usize, value)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn page_size(&self) -> u32 {
        1 << self.page_shift
    }

    /// Widest page in bits.
    pub fn bits_per_value(&self) -> u8 {
        self.pages
            .iter()
            .map(|p| p.bits_per_value())
            .max()
            .unwrap_or(self.bits_per_value)
    }

    /// Copy into a new array of `new_size`, truncating or zero-extending.
    pub fn resize(&self, new_size: u64) -> Result<Self> {
        let mut resized = Self::new(new_size, self.page_size(), self.bits_per_value())?;
        for i in 0..new_size.min(self.size) {
            resized.set(i, self.get(i));
        }
        Ok(resized)
    }

    /// Grow to at least `min_size`, over-allocating by 1/8.
    pub fn grow(&self, min_size: u64) -> Result<Self> {
        if min_size <= self.size {
            return self.resize(self.size);
        }
        let extra = (min_size >> 3).max(1);
        self.resize(min_size + extra)
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .pages
                .iter()
                .map(|p| p.ram_bytes_used())
                .sum::<usize>()
    }
}
