//! Integer-sequence compression primitives.
//!
//! Everything here is built on one bit-packing primitive
//! ([`bitpacking`]); higher-level structures never do their own bit math.
//!
//! | Module | Structure |
//! |--------|-----------|
//! | [`bitpacking`] | fixed-width packed words, in memory and on disk |
//! | [`block_packed`] | paged delta / GCD / table sequences (on disk) |
//! | [`monotonic`] | paged base + slope + residual address tables |
//! | [`paged`] | paged mutable and growable arrays |
//! | [`appending`] | append-only buffers that freeze full pages |
//! | [`elias_fano`] | Elias–Fano coding of bounded monotone sequences |

pub mod appending;
pub mod bitpacking;
pub mod block_packed;
pub mod elias_fano;
pub mod monotonic;
pub mod paged;

pub use appending::{AppendingLongBuffer, AppendingMode};
pub use bitpacking::{Mutable, PackedArray, PackedReader, pack_into, packed_bytes_len, read_packed};
pub use block_packed::{BlockPackedReader, BlockPackedReaderIterator, BlockPackedWriter};
pub use elias_fano::{EliasFanoDecoder, EliasFanoDocIdSet, EliasFanoEncoder, NO_MORE_VALUES};
pub use monotonic::{MonotonicBlockPackedReader, MonotonicBlockPackedWriter};
pub use paged::{GrowableWriter, PagedGrowableWriter, PagedMutable};

use crate::error::{Error, Result};

/// First packed layout version.
pub const PACKED_VERSION_START: i32 = 0;
/// Packed layout written by this crate.
pub const PACKED_VERSION_CURRENT: i32 = 1;

/// Smallest page accepted by the paged encoders.
pub const MIN_BLOCK_SIZE: u32 = 64;
/// Largest page accepted by the paged encoders.
pub const MAX_BLOCK_SIZE: u32 = 1 << 27;

/// Zigzag-encode an i64 to u64 (small absolute values → small u64).
#[inline]
pub fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Zigzag-decode a u64 back to i64.
#[inline]
pub fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Minimum number of bits `b` such that `2^b > max_value`.
#[inline]
pub fn bits_required(max_value: u64) -> u8 {
    (64 - max_value.leading_zeros()) as u8
}

/// Bits needed to store a signed value as-is: negative values need all 64.
#[inline]
pub fn bits_required_signed(max_value: i64) -> u8 {
    if max_value < 0 {
        64
    } else {
        bits_required(max_value as u64)
    }
}

/// Largest value representable in `bits_per_value` bits.
#[inline]
pub fn max_value(bits_per_value: u8) -> u64 {
    if bits_per_value >= 64 {
        u64::MAX
    } else {
        (1u64 << bits_per_value) - 1
    }
}

/// Greatest common divisor; `gcd(0, x) == x`.
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

pub fn check_packed_version(version: i32) -> Result<()> {
    if !(PACKED_VERSION_START..=PACKED_VERSION_CURRENT).contains(&version) {
        return Err(Error::corrupt(format!(
            "unsupported packed version {} (supported {}..={})",
            version, PACKED_VERSION_START, PACKED_VERSION_CURRENT
        )));
    }
    Ok(())
}

/// Validate a page size and return its log2.
pub fn check_block_size(block_size: u32) -> Result<u32> {
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) || !block_size.is_power_of_two()
    {
        return Err(Error::invalid(format!(
            "block size must be a power of two in [{}, {}], got {}",
            MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, block_size
        )));
    }
    Ok(block_size.trailing_zeros())
}

/// Number of pages needed for `count` values.
#[inline]
pub(crate) fn num_blocks(count: u64, block_size: u32) -> usize {
    count.div_ceil(block_size as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zigzag() {
        for v in [0i64, 1, -1, 63, -64, i64::MAX, i64::MIN] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(i64::MIN), u64::MAX);
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 1);
        assert_eq!(bits_required(127), 7);
        assert_eq!(bits_required(128), 8);
        assert_eq!(bits_required(255), 8);
        assert_eq!(bits_required(256), 9);
        assert_eq!(bits_required(u64::MAX), 64);
        assert_eq!(bits_required_signed(-1), 64);
        assert_eq!(bits_required_signed(i64::MAX), 63);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(0, 12), 12);
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 13), 1);
        assert_eq!(gcd(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_block_size_validation() {
        assert_eq!(check_block_size(64).unwrap(), 6);
        assert_eq!(check_block_size(16384).unwrap(), 14);
        assert!(check_block_size(32).is_err());
        assert!(check_block_size(100).is_err());
        assert!(check_block_size(1 << 28).is_err());
        assert!(check_packed_version(2).is_err());
        assert!(check_packed_version(-1).is_err());
    }
}
