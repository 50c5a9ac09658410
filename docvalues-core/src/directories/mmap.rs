//! Memory-mapped directory for efficient access to large indices
//!
//! This module is only compiled with the "native" feature.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;

use super::{
    Directory, DirectoryWriter, FileStreamingWriter, IndexInput, OwnedBytes, StreamingWriter,
};

/// Memory-mapped directory for efficient access to large index files
///
/// Files are not loaded into memory; the OS page cache serves reads, so
/// random access into large data streams costs no up-front IO.
/// Write operations use regular buffered file IO.
#[derive(Debug, Clone)]
pub struct MmapDirectory {
    root: PathBuf,
}

impl MmapDirectory {
    /// Create a new MmapDirectory rooted at the given path
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Get the root directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl Directory for MmapDirectory {
    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.resolve(path).is_file())
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(self.resolve(path))?.len())
    }

    fn open_read(&self, path: &Path) -> io::Result<IndexInput> {
        let full_path = self.resolve(path);
        let file = std::fs::File::open(&full_path)?;
        let name = path.display().to_string();
        if file.metadata()?.len() == 0 {
            return Ok(IndexInput::new(&name, OwnedBytes::empty()));
        }
        // SAFETY: index files are written once and never modified in place.
        let mmap = unsafe { Mmap::map(&file)? };
        let shared: Arc<dyn AsRef<[u8]> + Send + Sync> = Arc::new(mmap);
        Ok(IndexInput::new(&name, OwnedBytes::from_shared(shared)))
    }

    fn list_files(&self, prefix: &Path) -> io::Result<Vec<PathBuf>> {
        let full_path = self.resolve(prefix);
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&full_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl DirectoryWriter for MmapDirectory {
    fn delete(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(self.resolve(path))
    }

    fn streaming_writer(&self, path: &Path) -> io::Result<Box<dyn StreamingWriter>> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&full_path)?;
        Ok(Box::new(FileStreamingWriter {
            file: io::BufWriter::new(file),
            written: 0,
        }))
    }
}
