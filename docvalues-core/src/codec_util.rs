//! Stream headers, footers and varint helpers shared by every codec file.
//!
//! ```text
//! header: magic(u32) + codec name (vint len + utf-8) + version(i32)
//! footer: footer magic(u32) + algorithm(i32) + crc32(u64)
//! ```
//!
//! The footer checksum covers every byte of the file that precedes the
//! checksum field itself, footer magic and algorithm id included.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::directories::{IndexInput, IndexOutput};
use crate::error::{Error, Result};
use crate::packed::zigzag_encode;

/// Magic number at the start of every codec stream.
pub const CODEC_MAGIC: u32 = 0x3fd7_6c17;

/// Magic number at the start of the footer.
pub const FOOTER_MAGIC: u32 = !CODEC_MAGIC;

/// Footer size: magic(4) + algorithm(4) + checksum(8)
pub const FOOTER_LENGTH: u64 = 16;

/// Only CRC32 is defined.
const CHECKSUM_ALGORITHM_CRC32: i32 = 0;

/// Write a LEB128 varint.
pub fn write_vlong<W: Write + ?Sized>(writer: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_u8(byte)?;
            return Ok(());
        }
        writer.write_u8(byte | 0x80)?;
    }
}

pub fn write_vint<W: Write + ?Sized>(writer: &mut W, value: u32) -> io::Result<()> {
    write_vlong(writer, value as u64)
}

/// Zig-zag varint for signed values.
pub fn write_zlong<W: Write + ?Sized>(writer: &mut W, value: i64) -> io::Result<()> {
    write_vlong(writer, zigzag_encode(value))
}

pub fn write_string<W: Write + ?Sized>(writer: &mut W, s: &str) -> io::Result<()> {
    write_vint(writer, s.len() as u32)?;
    writer.write_all(s.as_bytes())
}

/// Bytes occupied by a header for `codec`.
pub fn header_length(codec: &str) -> u64 {
    let bits = 32 - (codec.len() as u32).leading_zeros();
    let len_prefix = bits.div_ceil(7).max(1) as u64;
    4 + len_prefix + codec.len() as u64 + 4
}

pub fn write_header(out: &mut IndexOutput, codec: &str, version: i32) -> io::Result<()> {
    out.write_u32::<LittleEndian>(CODEC_MAGIC)?;
    write_string(out, codec)?;
    out.write_i32::<LittleEndian>(version)?;
    Ok(())
}

/// Validate a header and return its version.
pub fn check_header(input: &mut IndexInput, codec: &str, min: i32, max: i32) -> Result<i32> {
    let magic = input.read_u32()?;
    if magic != CODEC_MAGIC {
        return Err(Error::corrupt(format!(
            "codec header mismatch: actual header={:#x} vs expected header={:#x} (resource={})",
            magic,
            CODEC_MAGIC,
            input.name()
        )));
    }
    let actual = input.read_string()?;
    if actual != codec {
        return Err(Error::corrupt(format!(
            "codec mismatch: actual codec={} vs expected codec={} (resource={})",
            actual,
            codec,
            input.name()
        )));
    }
    let version = input.read_i32()?;
    if version < min || version > max {
        return Err(Error::UnsupportedVersion {
            codec: codec.to_string(),
            version,
            min,
            max,
        });
    }
    Ok(version)
}

/// Write the footer; the checksum includes the footer magic and algorithm.
pub fn write_footer(out: &mut IndexOutput) -> io::Result<()> {
    out.write_u32::<LittleEndian>(FOOTER_MAGIC)?;
    out.write_i32::<LittleEndian>(CHECKSUM_ALGORITHM_CRC32)?;
    let checksum = out.checksum() as u64;
    out.write_u64::<LittleEndian>(checksum)?;
    Ok(())
}

/// Structural footer check without hashing the file. Returns the stored
/// checksum.
pub fn retrieve_checksum(input: &IndexInput) -> Result<u64> {
    let len = input.len();
    if len < FOOTER_LENGTH {
        return Err(Error::corrupt(format!(
            "misplaced codec footer (file truncated?): length={} but footer length={} (resource={})",
            len,
            FOOTER_LENGTH,
            input.name()
        )));
    }
    let mut footer = input.clone();
    footer.seek(len - FOOTER_LENGTH)?;
    let magic = footer.read_u32()?;
    if magic != FOOTER_MAGIC {
        return Err(Error::corrupt(format!(
            "codec footer mismatch: actual footer={:#x} vs expected footer={:#x} (resource={})",
            magic,
            FOOTER_MAGIC,
            input.name()
        )));
    }
    let algorithm = footer.read_i32()?;
    if algorithm != CHECKSUM_ALGORITHM_CRC32 {
        return Err(Error::corrupt(format!(
            "codec footer mismatch: unknown checksum algorithm={} (resource={})",
            algorithm,
            input.name()
        )));
    }
    let checksum = footer.read_u64()?;
    if checksum >> 32 != 0 {
        return Err(Error::corrupt(format!(
            "illegal crc32 checksum: {:#x} (resource={})",
            checksum,
            input.name()
        )));
    }
    Ok(checksum)
}

/// Validate the footer and verify the checksum over the whole file.
pub fn check_footer(input: &IndexInput) -> Result<u64> {
    let expected = retrieve_checksum(input)?;
    let actual = input.checksum(input.len() - 8)? as u64;
    if actual != expected {
        return Err(Error::corrupt(format!(
            "checksum failed (hardware problem?): expected={:#x} actual={:#x} (resource={})",
            expected,
            actual,
            input.name()
        )));
    }
    Ok(actual)
}
