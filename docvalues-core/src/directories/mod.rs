mod directory;
#[cfg(feature = "native")]
mod mmap;

pub use directory::*;
#[cfg(feature = "native")]
pub use mmap::*;
