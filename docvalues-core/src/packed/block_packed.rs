//! Block-packed sequences: a long sequence split into fixed-size pages, each
//! page compressed on its own.
//!
//! ## Page format
//!
//! ```text
//! kind(u8) bpv(u8) params packed_values
//!
//! kind 0 DELTA  params: min(zlong)                  value = min + packed
//! kind 1 GCD    params: min(zlong) gcd(vlong)       value = min + packed * gcd
//! kind 2 TABLE  params: size(vint) entries(zlong*)  value = table[packed]
//! ```
//!
//! A constant page is a DELTA page with `bpv == 0`. The last page holds
//! `count % block_size` values (or a full page); the reader derives page
//! lengths from `count`, which is stored by the caller.

use std::io::{self, Write};

use rustc_hash::FxHashSet;

use super::bitpacking::{pack_into, packed_bytes_len, read_packed};
use super::{bits_required, check_block_size, check_packed_version, gcd, num_blocks};
use crate::codec_util::{write_vint, write_vlong, write_zlong};
use crate::directories::IndexInput;
use crate::error::{Error, Result};

/// Largest dictionary a TABLE page may carry.
pub const MAX_TABLE_SIZE: usize = 256;

const KIND_DELTA: u8 = 0;
const KIND_GCD: u8 = 1;
const KIND_TABLE: u8 = 2;

/// How one page maps packed integers back to values.
#[derive(Debug, Clone, PartialEq)]
enum PageEncoding {
    Delta { min: i64 },
    Gcd { min: i64, gcd: u64 },
    Table(Box<[i64]>),
}

impl PageEncoding {
    #[inline]
    fn decode(&self, raw: u64) -> Option<i64> {
        match self {
            PageEncoding::Delta { min } => Some(min.wrapping_add(raw as i64)),
            PageEncoding::Gcd { min, gcd } => Some(min.wrapping_add(raw.wrapping_mul(*gcd) as i64)),
            PageEncoding::Table(table) => table.get(raw as usize).copied(),
        }
    }

    fn ram_bytes_used(&self) -> usize {
        match self {
            PageEncoding::Table(table) => table.len() * std::mem::size_of::<i64>(),
            _ => 0,
        }
    }
}

/// Number of pages of each kind a writer emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockPackedStats {
    pub constant: u64,
    pub delta: u64,
    pub gcd: u64,
    pub table: u64,
}

/// Streams values into block-packed pages.
pub struct BlockPackedWriter<'a, W: Write + ?Sized> {
    out: &'a mut W,
    values: Vec<i64>,
    block_size: usize,
    optimize_storage: bool,
    max_table_size: usize,
    count: u64,
    finished: bool,
    scratch: Vec<u8>,
    stats: BlockPackedStats,
}

impl<'a, W: Write + ?Sized> BlockPackedWriter<'a, W> {
    pub fn new(out: &'a mut W, block_size: u32, optimize_storage: bool) -> Result<Self> {
        check_block_size(block_size)?;
        Ok(Self {
            out,
            values: Vec::with_capacity(block_size as usize),
            block_size: block_size as usize,
            optimize_storage,
            max_table_size: MAX_TABLE_SIZE,
            count: 0,
            finished: false,
            scratch: Vec::new(),
            stats: BlockPackedStats::default(),
        })
    }

    /// Cap on distinct values for TABLE pages (1..=256).
    pub fn with_max_table_size(mut self, max_table_size: usize) -> Self {
        self.max_table_size = max_table_size.clamp(1, MAX_TABLE_SIZE);
        self
    }

    pub fn add(&mut self, value: i64) -> io::Result<()> {
        debug_assert!(!self.finished, "add after finish");
        self.values.push(value);
        self.count += 1;
        if self.values.len() == self.block_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Values added so far.
    pub fn ord(&self) -> u64 {
        self.count
    }

    /// Flush the partial last page. Returns the total number of values.
    pub fn finish(mut self) -> io::Result<(u64, BlockPackedStats)> {
        if !self.values.is_empty() {
            self.flush()?;
        }
        self.finished = true;
        Ok((self.count, self.stats))
    }

    fn flush(&mut self) -> io::Result<()> {
        let (min, max) = self
            .values
            .iter()
            .fold((i64::MAX, i64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));

        self.scratch.clear();
        if min == max {
            self.out.write_all(&[KIND_DELTA, 0])?;
            write_zlong(self.out, min)?;
            self.stats.constant += 1;
            self.values.clear();
            return Ok(());
        }

        let range = max.wrapping_sub(min) as u64;
        let delta_bpv = bits_required(range);

        if self.optimize_storage
            && let Some(table) = distinct_sorted(&self.values, self.max_table_size)
        {
            let table_bpv = bits_required(table.len() as u64 - 1);
            if table_bpv < delta_bpv {
                let packed: Vec<u64> = self
                    .values
                    .iter()
                    .map(|v| table.binary_search(v).unwrap_or_default() as u64)
                    .collect();
                pack_into(&packed, table_bpv, &mut self.scratch);
                self.out.write_all(&[KIND_TABLE, table_bpv])?;
                write_vint(self.out, table.len() as u32)?;
                for &entry in &table {
                    write_zlong(self.out, entry)?;
                }
                self.out.write_all(&self.scratch)?;
                self.stats.table += 1;
                self.values.clear();
                return Ok(());
            }
        }

        let divisor = self
            .values
            .iter()
            .fold(0u64, |acc, &v| gcd(acc, v.wrapping_sub(min) as u64));
        if divisor > 1 {
            let bpv = bits_required(range / divisor);
            let packed: Vec<u64> = self
                .values
                .iter()
                .map(|&v| v.wrapping_sub(min) as u64 / divisor)
                .collect();
            pack_into(&packed, bpv, &mut self.scratch);
            self.out.write_all(&[KIND_GCD, bpv])?;
            write_zlong(self.out, min)?;
            write_vlong(self.out, divisor)?;
            self.stats.gcd += 1;
        } else {
            let packed: Vec<u64> = self
                .values
                .iter()
                .map(|&v| v.wrapping_sub(min) as u64)
                .collect();
            pack_into(&packed, delta_bpv, &mut self.scratch);
            self.out.write_all(&[KIND_DELTA, delta_bpv])?;
            write_zlong(self.out, min)?;
            self.stats.delta += 1;
        }
        self.out.write_all(&self.scratch)?;
        self.values.clear();
        Ok(())
    }
}

/// Sorted distinct values, or `None` when there are more than `limit`.
fn distinct_sorted(values: &[i64], limit: usize) -> Option<Vec<i64>> {
    let mut seen = FxHashSet::default();
    for &v in values {
        if seen.insert(v) && seen.len() > limit {
            return None;
        }
    }
    let mut table: Vec<i64> = seen.into_iter().collect();
    table.sort_unstable();
    Some(table)
}

struct PageHeader {
    encoding: PageEncoding,
    bits_per_value: u8,
}

fn read_page_header(input: &mut IndexInput) -> Result<PageHeader> {
    let kind = input.read_u8()?;
    let bits_per_value = input.read_u8()?;
    if bits_per_value > 64 {
        return Err(Error::corrupt(format!(
            "block-packed page with {} bits per value in {}",
            bits_per_value,
            input.name()
        )));
    }
    let encoding = match kind {
        KIND_DELTA => PageEncoding::Delta {
            min: input.read_zlong()?,
        },
        KIND_GCD => PageEncoding::Gcd {
            min: input.read_zlong()?,
            gcd: input.read_vlong()?,
        },
        KIND_TABLE => {
            let size = input.read_vint()? as usize;
            if size == 0 || size > MAX_TABLE_SIZE {
                return Err(Error::corrupt(format!(
                    "block-packed table of size {} in {}",
                    size,
                    input.name()
                )));
            }
            let table = (0..size)
                .map(|_| input.read_zlong())
                .collect::<Result<Vec<_>>>()?;
            PageEncoding::Table(table.into_boxed_slice())
        }
        other => {
            return Err(Error::corrupt(format!(
                "unknown block-packed page kind {} in {}",
                other,
                input.name()
            )));
        }
    };
    Ok(PageHeader {
        encoding,
        bits_per_value,
    })
}

#[derive(Debug)]
struct Page {
    encoding: PageEncoding,
    bits_per_value: u8,
    /// Absolute offset of the packed values.
    offset: u64,
    len: u64,
}

/// Random-access reader over a block-packed sequence.
///
/// Opening parses every page header into an in-memory index; `get` then
/// decodes straight from the mapped bytes.
#[derive(Debug)]
pub struct BlockPackedReader {
    input: IndexInput,
    pages: Vec<Page>,
    block_shift: u32,
    block_mask: u64,
    count: u64,
    end: u64,
}

impl BlockPackedReader {
    /// Index `count` values starting at `offset` in `input`.
    pub fn open(
        input: &IndexInput,
        offset: u64,
        count: u64,
        block_size: u32,
        packed_version: i32,
    ) -> Result<Self> {
        check_packed_version(packed_version)?;
        let block_shift = check_block_size(block_size).map_err(|e| Error::corrupt(e.to_string()))?;
        let mut cursor = input.clone();
        cursor.seek(offset)?;
        let num_pages = num_blocks(count, block_size);
        let mut pages = Vec::with_capacity(num_pages);
        for i in 0..num_pages {
            let header = read_page_header(&mut cursor)?;
            let len = (count - ((i as u64) << block_shift)).min(block_size as u64);
            let page_offset = cursor.file_pointer();
            cursor.skip_bytes(packed_bytes_len(len, header.bits_per_value) as u64)?;
            pages.push(Page {
                encoding: header.encoding,
                bits_per_value: header.bits_per_value,
                offset: page_offset,
                len,
            });
        }
        Ok(Self {
            input: input.clone(),
            pages,
            block_shift,
            block_mask: (block_size as u64) - 1,
            count,
            end: cursor.file_pointer(),
        })
    }

    pub fn get(&self, index: u64) -> Result<i64> {
        if index >= self.count {
            return Err(Error::invalid(format!(
                "index {} out of bounds (count={})",
                index, self.count
            )));
        }
        let page = &self.pages[(index >> self.block_shift) as usize];
        let start = page.offset as usize;
        let end = start + packed_bytes_len(page.len, page.bits_per_value);
        let data = &self.input.bytes()?[start..end];
        let raw = read_packed(data, page.bits_per_value, index & self.block_mask);
        page.encoding.decode(raw).ok_or_else(|| {
            Error::corrupt(format!(
                "table index {} out of range in {}",
                raw,
                self.input.name()
            ))
        })
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Offset just past the last page.
    pub fn end_pointer(&self) -> u64 {
        self.end
    }

    pub fn ram_bytes_used(&self) -> usize {
        std::mem::size_of::<Self>()
            + self
                .pages
                .iter()
                .map(|p| std::mem::size_of::<Page>() + p.encoding.ram_bytes_used())
                .sum::<usize>()
    }
}

/// Sequential page-at-a-time decoder.
pub struct BlockPackedReaderIterator {
    input: IndexInput,
    block_size: u32,
    count: u64,
    ord: u64,
    page: Vec<i64>,
    page_pos: usize,
}

impl BlockPackedReaderIterator {
    /// Iterate `count` values starting at the input's current position.
    pub fn new(input: IndexInput, count: u64, block_size: u32, packed_version: i32) -> Result<Self> {
        check_packed_version(packed_version)?;
        check_block_size(block_size).map_err(|e| Error::corrupt(e.to_string()))?;
        Ok(Self {
            input,
            block_size,
            count,
            ord: 0,
            page: Vec::new(),
            page_pos: 0,
        })
    }

    /// Number of values consumed so far.
    pub fn ord(&self) -> u64 {
        self.ord
    }

    pub fn next_value(&mut self) -> Result<Option<i64>> {
        if self.ord == self.count {
            return Ok(None);
        }
        if self.page_pos == self.page.len() {
            self.refill()?;
        }
        let value = self.page[self.page_pos];
        self.page_pos += 1;
        self.ord += 1;
        Ok(Some(value))
    }

    /// Skip `n` values, jumping over whole pages without decoding them.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        if n > self.count - self.ord {
            return Err(Error::invalid(format!(
                "cannot skip {} values, only {} left",
                n,
                self.count - self.ord
            )));
        }
        let mut remaining = n;
        let buffered = (self.page.len() - self.page_pos) as u64;
        if remaining <= buffered {
            self.page_pos += remaining as usize;
            self.ord += remaining;
            return Ok(());
        }
        remaining -= buffered;
        self.ord += buffered;
        self.page_pos = self.page.len();

        while remaining >= self.block_size as u64 {
            let header = read_page_header(&mut self.input)?;
            let len = packed_bytes_len(self.block_size as u64, header.bits_per_value);
            self.input.skip_bytes(len as u64)?;
            self.ord += self.block_size as u64;
            remaining -= self.block_size as u64;
        }
        if remaining > 0 {
            self.refill()?;
            self.page_pos = remaining as usize;
            self.ord += remaining;
        }
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        let header = read_page_header(&mut self.input)?;
        let len = (self.count - self.ord).min(self.block_size as u64);
        let bytes = self
            .input
            .read_slice(packed_bytes_len(len, header.bits_per_value))?;
        self.page.clear();
        for i in 0..len {
            let raw = read_packed(bytes, header.bits_per_value, i);
            let value = header
                .encoding
                .decode(raw)
                .ok_or_else(|| Error::corrupt(format!("table index {} out of range", raw)))?;
            self.page.push(value);
        }
        self.page_pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directories::OwnedBytes;
    use crate::packed::PACKED_VERSION_CURRENT;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn encode(values: &[i64], block_size: u32, optimize: bool) -> (IndexInput, BlockPackedStats) {
        let mut buf = Vec::new();
        let mut writer = BlockPackedWriter::new(&mut buf, block_size, optimize).unwrap();
        for &v in values {
            writer.add(v).unwrap();
        }
        let (count, stats) = writer.finish().unwrap();
        assert_eq!(count, values.len() as u64);
        (IndexInput::new("bp", OwnedBytes::new(buf)), stats)
    }

    fn check(values: &[i64], block_size: u32, optimize: bool) -> BlockPackedStats {
        let (input, stats) = encode(values, block_size, optimize);
        let reader =
            BlockPackedReader::open(&input, 0, values.len() as u64, block_size, PACKED_VERSION_CURRENT)
                .unwrap();
        assert_eq!(reader.end_pointer(), input.len());
        for (i, &v) in values.iter().enumerate() {
            assert_eq!(reader.get(i as u64).unwrap(), v, "index {}", i);
        }
        let mut it =
            BlockPackedReaderIterator::new(input, values.len() as u64, block_size, PACKED_VERSION_CURRENT)
                .unwrap();
        for &v in values {
            assert_eq!(it.next_value().unwrap(), Some(v));
        }
        assert_eq!(it.next_value().unwrap(), None);
        stats
    }

    #[test]
    fn test_constant_pages() {
        let values = vec![7i64; 300];
        let stats = check(&values, 128, true);
        assert_eq!(stats.constant, 3);
        let (input, _) = encode(&values, 128, true);
        // 3 pages x (kind, bpv, zlong(7))
        assert_eq!(input.len(), 9);
    }

    #[test]
    fn test_each_page_kind() {
        // Page 0: table (few distinct, wide range). Page 1: gcd. Page 2: delta.
        // GCD needs more than 256 distinct values, otherwise a table is narrower.
        let mut values = Vec::new();
        values.extend((0..512).map(|i| if i % 2 == 0 { -1_000_000 } else { 1_000_000 }));
        values.extend((0..512).map(|i| 1000 + i * 7));
        values.extend((0..512).map(|i| (i * i) as i64 + 3));
        let stats = check(&values, 512, true);
        assert_eq!(
            stats,
            BlockPackedStats {
                constant: 0,
                delta: 1,
                gcd: 1,
                table: 1
            }
        );
    }

    #[test]
    fn test_table_disabled_without_optimize_storage() {
        let values: Vec<i64> = (0..64).map(|i| if i % 3 == 0 { 5 } else { 1 << 40 }).collect();
        let stats = check(&values, 64, false);
        assert_eq!(stats.table, 0);
        assert_eq!(stats.gcd, 1);
    }

    #[test]
    fn test_extreme_values() {
        let values = vec![i64::MIN, i64::MAX, 0, -1, i64::MIN, 1];
        check(&values, 64, true);
        check(&values, 64, false);
    }

    #[test]
    fn test_random_with_partial_last_page() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<i64> = (0..1000).map(|_| rng.gen_range(-5000..5000)).collect();
        check(&values, 128, true);
    }

    #[test]
    fn test_iterator_skip() {
        let values: Vec<i64> = (0..1000).map(|i| i * 3 - 17).collect();
        let (input, _) = encode(&values, 64, true);
        let mut it = BlockPackedReaderIterator::new(input, 1000, 64, PACKED_VERSION_CURRENT).unwrap();
        it.skip(10).unwrap();
        assert_eq!(it.next_value().unwrap(), Some(values[10]));
        it.skip(300).unwrap();
        assert_eq!(it.ord(), 311);
        assert_eq!(it.next_value().unwrap(), Some(values[311]));
        it.skip(688).unwrap();
        assert_eq!(it.next_value().unwrap(), None);
        assert!(it.skip(1).is_err());
    }

    #[test]
    fn test_out_of_range_and_closed() {
        let (input, _) = encode(&[1, 2, 3], 64, true);
        let reader = BlockPackedReader::open(&input, 0, 3, 64, PACKED_VERSION_CURRENT).unwrap();
        assert!(matches!(reader.get(3), Err(Error::InvalidArgument(_))));
        input.close();
        assert!(matches!(reader.get(0), Err(Error::AlreadyClosed)));
    }

    #[test]
    fn test_truncated_stream_is_detected_at_open() {
        let values: Vec<i64> = (0..200).map(|i| i * 1_000_003).collect();
        let (input, _) = encode(&values, 64, true);
        let truncated = input.slice("short", 0, input.len() - 5).unwrap();
        assert!(BlockPackedReader::open(&truncated, 0, 200, 64, PACKED_VERSION_CURRENT).is_err());
    }
}
