//! Archive Builder
//!
//! Streams a validated manifest into a single ZIP container, one chunk at a
//! time, so memory use is bounded by the copy buffer rather than file size.

pub mod builder;

pub use builder::{build_archive, ArchiveBuilder, ArchiveEntry, BuiltArchive, ChunkSource};
