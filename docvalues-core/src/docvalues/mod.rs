//! Per-document value columns: the writer, the reader and their accessors.
//!
//! | Type | Stored as |
//! |------|-----------|
//! | NUMERIC | block-packed delta / GCD pages, or one table-indexed packed array |
//! | BINARY | raw bytes, with a monotonic address table when lengths vary |
//! | SORTED | prefix-compressed dictionary plus a NUMERIC ordinal stream |
//! | SORTED_SET | as SORTED with an ord index, or as SORTED when every doc has ≤ 1 value |

pub mod accessors;
mod cache;
pub mod format;
mod reader;
pub mod terms;
mod writer;

pub use accessors::{
    BinaryDocValues, BinaryReader, Bits, NO_ORD, NumericDocValues, NumericReader, SingletonSortedSet,
    SortedDocValues, SortedReader, SortedSetDocValues, SortedSetReader,
};
pub use format::{
    BinaryEncoding, DATA_CODEC, DATA_EXTENSION, DocValuesType, META_CODEC, META_EXTENSION,
    NumericEncoding, SortedSetEncoding, VERSION_CHECKSUM, VERSION_CURRENT, VERSION_START,
};
pub use reader::{DocValuesReader, FieldSummary};
pub use terms::{CompressedTerms, SeekStatus, TermsEnum};
pub use writer::{DocValuesWriter, DocValuesWriterStats, FieldWriteStats};
