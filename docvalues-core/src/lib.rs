//! Docvalues - columnar per-document value storage
//!
//! This library provides:
//! - Bit-packed, block-packed and monotonic integer sequences
//! - Paged mutable arrays and append-only long buffers
//! - Elias-Fano encoding of bounded monotone sequences
//! - A two-file (metadata + data) column format for numeric, binary,
//!   sorted and sorted-set values, with checksummed footers
//! - Lazily cached, randomly accessible readers over memory-mapped files

pub mod codec_util;
pub mod config;
pub mod directories;
pub mod docvalues;
pub mod error;
pub mod packed;
pub mod segment;

pub use config::DocValuesConfig;
pub use error::{Error, Result};

// Re-exports from directories
#[cfg(feature = "native")]
pub use directories::MmapDirectory;
pub use directories::{Directory, DirectoryWriter, IndexInput, IndexOutput, OwnedBytes, RamDirectory};

/// Default directory type for native builds - uses memory-mapped files
#[cfg(feature = "native")]
pub type DefaultDirectory = MmapDirectory;

// Re-exports from docvalues
pub use docvalues::{
    BinaryDocValues, Bits, DocValuesReader, DocValuesType, DocValuesWriter, DocValuesWriterStats,
    FieldSummary, FieldWriteStats, NumericDocValues, SeekStatus, SortedDocValues, SortedSetDocValues,
    TermsEnum,
};

// Re-exports from segment
pub use segment::{FieldInfo, FieldInfos, SegmentInfo, SegmentReadState, SegmentWriteState};
