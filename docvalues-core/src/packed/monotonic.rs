//! Monotonic block-packed sequences for address tables.
//!
//! Each page stores a linear prediction `base + round(slope * i)` and the
//! zig-zag encoded residuals against it:
//!
//! ```text
//! base(zlong) slope(f32 bits, u32) bpv(u8) packed_residuals
//! ```
//!
//! Address tables grow almost linearly, so the residuals usually need far
//! fewer bits than the raw offsets.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use super::bitpacking::{PackedArray, pack_into, packed_bytes_len, read_packed};
use super::{
    bits_required, check_block_size, check_packed_version, num_blocks, zigzag_decode, zigzag_encode,
};
use crate::codec_util::write_zlong;
use crate::directories::IndexInput;
use crate::error::{Error, Result};

/// Predicted value at position `i` of a page. Writer and reader must agree
/// bit for bit, so both go through here.
#[inline]
pub(crate) fn expected(base: i64, slope: f32, i: usize) -> i64 {
    base.wrapping_add((slope as f64 * i as f64).round() as i64)
}

/// Slope between the first and last value of a page.
#[inline]
pub(crate) fn page_slope(values: &[i64]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let first = values[0];
    let last = values[values.len() - 1];
    (last.wrapping_sub(first) as f64 / (values.len() - 1) as f64) as f32
}

pub struct MonotonicBlockPackedWriter<'a, W: Write + ?Sized> {
    out: &'a mut W,
    values: Vec<i64>,
    block_size: usize,
    count: u64,
    scratch: Vec<u8>,
}

impl<'a, W: Write + ?Sized> MonotonicBlockPackedWriter<'a, W> {
    pub fn new(out: &'a mut W, block_size: u32) -> Result<Self> {
        check_block_size(block_size)?;
        Ok(Self {
            out,
            values: Vec::with_capacity(block_size as usize),
            block_size: block_size as usize,
            count: 0,
            scratch: Vec::new(),
        })
    }

    pub fn add(&mut self, value: i64) -> io::Result<()> {
        debug_assert!(
            self.values.last().is_none_or(|&last| last <= value),
            "monotonic writer got decreasing value {}",
            value
        );
        self.values.push(value);
        self.count += 1;
        if self.values.len() == self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the partial last page. Returns the total number of values.
    pub fn finish(mut self) -> io::Result<u64> {
        if !self.values.is_empty() {
            self.flush()?;
        }
        Ok(self.count)
    }

    fn flush(&mut self) -> io::Result<()> {
        let base = self.values[0];
        let slope = page_slope(&self.values);
        let residuals: Vec<u64> = self
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| zigzag_encode(v.wrapping_sub(expected(base, slope, i))))
            .collect();
        let max = residuals.iter().copied().max().unwrap_or(0);
        let bpv = bits_required(max);

        write_zlong(self.out, base)?;
        self.out.write_u32::<LittleEndian>(slope.to_bits())?;
        self.out.write_u8(bpv)?;
        self.scratch.clear();
        pack_into(&residuals, bpv, &mut self.scratch);
        self.out.write_all(&self.scratch)?;
        self.values.clear();
        Ok(())
    }
}

#[derive(Debug)]
struct MonotonicPage {
    base: i64,
    slope: f32,
    residuals: PackedArray,
}

/// In-memory decoded monotonic table.
///
/// Loading copies the residuals into packed words, so the reader holds no
/// reference to the input afterwards.
#[derive(Debug)]
pub struct MonotonicBlockPackedReader {
    pages: Vec<MonotonicPage>,
    block_shift: u32,
    block_mask: usize,
    count: u64,
}

impl MonotonicBlockPackedReader {
    /// Load `count` values starting at the input's current position.
    pub fn load(input: &mut IndexInput, count: u64, block_size: u32, packed_version: i32) -> Result<Self> {
        check_packed_version(packed_version)?;
        let block_shift = check_block_size(block_size).map_err(|e| Error::corrupt(e.to_string()))?;
        let num_pages = num_blocks(count, block_size);
        let mut pages = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            let len = (count - ((i as u64) << block_shift)).min(block_size as u64);
            let base = input.read_zlong()?;
            let slope = f32::from_bits(input.read_u32()?);
            let bpv = input.read_u8()?;
            if bpv > 64 {
                return Err(Error::corrupt(format!(
                    "monotonic page with {} bits per value in {}",
                    bpv,
                    input.name()
                )));
            }
            if !slope.is_finite() {
                return Err(Error::corrupt(format!(
                    "monotonic page with non-finite slope in {}",
                    input.name()
                )));
            }
            let bytes = input.read_slice(packed_bytes_len(len, bpv))?;
            let mut residuals = PackedArray::new(len as usize, bpv);
            for j in 0..len as usize {
                residuals.set(j, read_packed(bytes, bpv, j as u64));
            }
            pages.push(MonotonicPage {
                base,
                slope,
                residuals,
            });
        }
        Ok(Self {
            pages,
            block_shift,
            block_mask: block_size as usize - 1,
            count,
        })
    }

    #[inline]
    pub fn get(&self, index: u64) -> i64 {
        debug_assert!(index < self.count, "index {} out of bounds ({})", index, self.count);
        let page = &self.pages[(index >> self.block_shift) as usize];
        let i = index as usize & self.block_mask;
        expected(page.base, page.slope, i).wrapping_add(zigzag_decode(page.residuals.get(i)))
    }

    pub fn size(&self) -> u64 {
        self.count
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .pages
                .iter()
                .map(|p| std::mem::size_of::<MonotonicPage>() + p.residuals.ram_bytes_used())
                .sum::<usize>()
    }
}
