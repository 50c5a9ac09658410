//! Directory abstraction for codec IO
//!
//! A directory hands out named, independently seekable input handles and
//! append-only outputs. Reads are synchronous: every access is a bounded
//! slice lookup over bytes that are either in memory or memory-mapped.

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// Owned bytes with cheap cloning (Arc-backed)
#[derive(Clone)]
pub struct OwnedBytes {
    data: Arc<dyn AsRef<[u8]> + Send + Sync>,
    range: Range<usize>,
}

impl fmt::Debug for OwnedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBytes")
            .field("range", &self.range)
            .finish()
    }
}

impl OwnedBytes {
    pub fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data: Arc::new(data),
            range: 0..len,
        }
    }

    /// Wrap any shared byte container (e.g. a memory map) without copying.
    pub fn from_shared(data: Arc<dyn AsRef<[u8]> + Send + Sync>) -> Self {
        let len = (*data).as_ref().len();
        Self {
            data,
            range: 0..len,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        let start = self.range.start + range.start;
        let end = self.range.start + range.end;
        debug_assert!(end <= self.range.end);
        Self {
            data: Arc::clone(&self.data),
            range: start..end,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &(*self.data).as_ref()[self.range.clone()]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl AsRef<[u8]> for OwnedBytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::ops::Deref for OwnedBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

/// Seekable read handle over one file (or a slice of it).
///
/// Cloning is cheap and yields an independent position over the same bytes.
/// All clones share one close flag: once [`IndexInput::close`] is called on
/// any of them, every clone fails with [`Error::AlreadyClosed`].
#[derive(Clone)]
pub struct IndexInput {
    name: Arc<str>,
    bytes: OwnedBytes,
    pos: usize,
    closed: Arc<AtomicBool>,
}

impl fmt::Debug for IndexInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexInput")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .field("pos", &self.pos)
            .finish()
    }
}

impl IndexInput {
    pub fn new(name: &str, bytes: OwnedBytes) -> Self {
        Self {
            name: Arc::from(name),
            bytes,
            pos: 0,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn file_pointer(&self) -> u64 {
        self.pos as u64
    }

    /// Invalidate this handle and every clone or slice derived from it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn eof(&self, wanted: usize) -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "read past EOF: {} (pos={}, wanted={}, len={})",
                self.name,
                self.pos,
                wanted,
                self.bytes.len()
            ),
        ))
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        self.ensure_open()?;
        if pos > self.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek past EOF: {} (pos={}, len={})", self.name, pos, self.len()),
            )));
        }
        self.pos = pos as usize;
        Ok(())
    }

    /// Whole underlying byte range. Random-access readers use this to decode
    /// packed values without moving the position.
    #[inline]
    pub fn bytes(&self) -> Result<&[u8]> {
        self.ensure_open()?;
        Ok(self.bytes.as_slice())
    }

    /// Bytes in `[offset, offset + len)` without moving the position.
    pub fn bytes_at(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.ensure_open()?;
        let start = offset as usize;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.eof(len))?;
        Ok(&self.bytes.as_slice()[start..end])
    }

    /// A sub-view starting at position 0 of the slice; shares the close flag.
    pub fn slice(&self, description: &str, offset: u64, len: u64) -> Result<IndexInput> {
        self.ensure_open()?;
        let end = offset.checked_add(len).unwrap_or(u64::MAX);
        if end > self.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "slice {} [{}..{}) out of bounds for {} (len={})",
                    description,
                    offset,
                    end,
                    self.name,
                    self.len()
                ),
            )));
        }
        Ok(IndexInput {
            name: Arc::from(format!("{} [slice={}]", self.name, description)),
            bytes: self.bytes.slice(offset as usize..end as usize),
            pos: 0,
            closed: Arc::clone(&self.closed),
        })
    }

    /// Read `n` bytes and advance.
    pub fn read_slice(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure_open()?;
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.eof(n))?;
        let start = self.pos;
        self.pos = end;
        Ok(&self.bytes.as_slice()[start..end])
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let src = self.read_slice(buf.len())?;
        buf.copy_from_slice(src);
        Ok(())
    }

    pub fn skip_bytes(&mut self, n: u64) -> Result<()> {
        let target = self.file_pointer().saturating_add(n);
        self.seek(target)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_slice(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.read_slice(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_slice(8)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.read_slice(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_slice(4)?))
    }

    /// LEB128 variable-length unsigned integer.
    pub fn read_vlong(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(Error::corrupt(format!("vlong too long in {}", self.name)));
            }
        }
    }

    pub fn read_vint(&mut self) -> Result<u32> {
        let v = self.read_vlong()?;
        u32::try_from(v).map_err(|_| Error::corrupt(format!("vint overflow in {}", self.name)))
    }

    /// Zig-zag encoded signed varint.
    pub fn read_zlong(&mut self) -> Result<i64> {
        Ok(crate::packed::zigzag_decode(self.read_vlong()?))
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_vint()? as usize;
        let bytes = self.read_slice(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::corrupt(format!("invalid utf-8 string in {}", self.name)))
    }

    /// CRC32 of the bytes in `[0, end)`.
    pub fn checksum(&self, end: u64) -> Result<u32> {
        let data = self.bytes_at(0, end as usize)?;
        Ok(crc32fast::hash(data))
    }
}

/// Append-only output stream with a running CRC32.
pub struct IndexOutput {
    name: String,
    sink: Box<dyn StreamingWriter>,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl fmt::Debug for IndexOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexOutput")
            .field("name", &self.name)
            .field("written", &self.written)
            .finish()
    }
}

impl IndexOutput {
    pub fn new(name: impl Into<String>, sink: Box<dyn StreamingWriter>) -> Self {
        Self {
            name: name.into(),
            sink,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bytes written so far; the offset of the next byte.
    pub fn file_pointer(&self) -> u64 {
        self.written
    }

    /// CRC32 over everything written so far.
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Flush and make the file visible to readers.
    pub fn finish(self) -> io::Result<()> {
        self.sink.finish()
    }
}

impl Write for IndexOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_all(buf)?;
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Directory trait for reading index files
pub trait Directory: Send + Sync + 'static {
    /// Check if a file exists
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Get file size
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Open a file for random-access reading
    fn open_read(&self, path: &Path) -> io::Result<IndexInput>;

    /// List files in directory
    fn list_files(&self, prefix: &Path) -> io::Result<Vec<PathBuf>>;
}

/// A writer for incrementally writing data to a directory file.
///
/// File-backed directories write directly to disk; memory directories collect
/// to a `Vec` and publish it on `finish`.
pub trait StreamingWriter: io::Write + Send {
    /// Finalize the write, making data available for reading.
    fn finish(self: Box<Self>) -> io::Result<()>;

    /// Bytes written so far.
    fn bytes_written(&self) -> u64;
}

/// StreamingWriter backed by Vec<u8>, published into a RamDirectory on finish.
struct BufferedStreamingWriter {
    path: PathBuf,
    buffer: Vec<u8>,
    files: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>,
}

impl io::Write for BufferedStreamingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl StreamingWriter for BufferedStreamingWriter {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.files.write().insert(self.path, Arc::new(self.buffer));
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buffer.len() as u64
    }
}

/// StreamingWriter backed by std::fs::File for filesystem directories.
#[cfg(feature = "native")]
pub(crate) struct FileStreamingWriter {
    pub(crate) file: io::BufWriter<std::fs::File>,
    pub(crate) written: u64,
}

#[cfg(feature = "native")]
impl io::Write for FileStreamingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(feature = "native")]
impl StreamingWriter for FileStreamingWriter {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.written
    }
}

/// Directory trait for writing index files
pub trait DirectoryWriter: Directory {
    /// Delete a file
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Create a streaming writer for incremental file writes.
    /// Call finish() on the returned writer to finalize.
    fn streaming_writer(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>>;

    /// Create an append-only output with checksum tracking.
    fn create_output(&self, path: &Path) -> io::Result<IndexOutput> {
        let sink = self.streaming_writer(path)?;
        Ok(IndexOutput::new(path.display().to_string(), sink))
    }

    /// Create/overwrite a file with data
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut sink = self.streaming_writer(path)?;
        sink.write_all(data)?;
        sink.finish()
    }
}

/// In-memory directory for testing and small indexes
#[derive(Debug, Default)]
pub struct RamDirectory {
    files: Arc<RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>>,
}

impl Clone for RamDirectory {
    fn clone(&self) -> Self {
        Self {
            files: Arc::clone(&self.files),
        }
    }
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("File not found: {}", path.display()),
    )
}

impl Directory for RamDirectory {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.read().contains_key(path))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.files
            .read()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| not_found(path))
    }

    fn open_read(&self, path: &Path) -> io::Result<IndexInput> {
        let files = self.files.read();
        let data = files.get(path).ok_or_else(|| not_found(path))?;
        let shared: Arc<dyn AsRef<[u8]> + Send + Sync> = Arc::clone(data) as _;
        Ok(IndexInput::new(
            &path.display().to_string(),
            OwnedBytes::from_shared(shared),
        ))
    }

    fn list_files(&self, prefix: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read();
        let mut names: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}

impl DirectoryWriter for RamDirectory {
    fn delete(&self, path: &Path) -> io::Result<()> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn streaming_writer(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>> {
        Ok(Box::new(BufferedStreamingWriter {
            path: path.to_path_buf(),
            buffer: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }
}
