//! ZIP archive construction

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{Result, TransferError};
use crate::upload::RelativePath;

/// One validated entry of the archive, in manifest order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveEntry {
    File { path: RelativePath, total_chunks: u32 },
    Directory { path: RelativePath },
}

impl ArchiveEntry {
    pub fn path(&self) -> &RelativePath {
        match self {
            Self::File { path, .. } | Self::Directory { path } => path,
        }
    }
}

/// Where file contents come from: an ordered, lazy sequence of chunk readers
/// per path.
pub trait ChunkSource {
    type Reader: Read;
    type Chunks: Iterator<Item = Result<Self::Reader>>;

    fn chunks(&self, path: &RelativePath, total_chunks: u32) -> Self::Chunks;
}

/// Summary of a closed archive
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    pub path: PathBuf,
    pub entries: usize,
    pub bytes: u64,
}

/// Writes one ZIP container.
///
/// The container is removed again if the builder is dropped before
/// [`ArchiveBuilder::finish`] succeeds.
pub struct ArchiveBuilder {
    writer: Option<ZipWriter<BufWriter<File>>>,
    target: PathBuf,
    options: SimpleFileOptions,
    entries: usize,
    bytes: u64,
    finished: bool,
}

impl ArchiveBuilder {
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(TransferError::ArchiveCreateFailed)?;
        }
        let file = File::create(&target).map_err(TransferError::ArchiveCreateFailed)?;

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true)
            .unix_permissions(0o644);

        Ok(Self {
            writer: Some(ZipWriter::new(BufWriter::new(file))),
            target,
            options,
            entries: 0,
            bytes: 0,
            finished: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn writer(&mut self, path: &RelativePath) -> Result<&mut ZipWriter<BufWriter<File>>> {
        self.writer.as_mut().ok_or_else(|| TransferError::ArchiveEntryFailed {
            path: path.to_string(),
            source: io::Error::other("archive already closed"),
        })
    }

    /// Add an empty directory entry
    pub fn add_directory(&mut self, path: &RelativePath) -> Result<()> {
        let options = self.options.clone().unix_permissions(0o755);
        self.writer(path)?
            .add_directory(path.as_str(), options)
            .map_err(|e| entry_failed(path, io::Error::other(e)))?;

        self.entries += 1;
        tracing::debug!(path = %path, "Added directory entry");
        Ok(())
    }

    /// Add a file entry whose content is the concatenation of `chunks`.
    ///
    /// Each chunk is copied straight into the entry; a missing chunk aborts
    /// with the chunk's own error.
    pub fn add_file<I, R>(&mut self, path: &RelativePath, chunks: I) -> Result<u64>
    where
        I: IntoIterator<Item = Result<R>>,
        R: Read,
    {
        let options = self.options.clone();
        let writer = self.writer(path)?;
        writer
            .start_file(path.as_str(), options)
            .map_err(|e| entry_failed(path, io::Error::other(e)))?;

        let mut written = 0u64;
        for chunk in chunks {
            let mut reader = chunk?;
            written += io::copy(&mut reader, writer).map_err(|e| entry_failed(path, e))?;
        }

        self.entries += 1;
        self.bytes += written;
        tracing::debug!(path = %path, bytes = written, "Added file entry");
        Ok(written)
    }

    /// Write the central directory and flush everything to disk.
    ///
    /// Entries are not durable until this returns successfully.
    pub fn finish(mut self) -> Result<BuiltArchive> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| TransferError::ArchiveCloseFailed(io::Error::other("archive already closed")))?;

        let buffered = writer
            .finish()
            .map_err(|e| TransferError::ArchiveCloseFailed(io::Error::other(e)))?;
        let mut file = buffered
            .into_inner()
            .map_err(|e| TransferError::ArchiveCloseFailed(e.into_error()))?;
        file.flush().map_err(TransferError::ArchiveCloseFailed)?;
        file.sync_all().map_err(TransferError::ArchiveCloseFailed)?;

        self.finished = true;

        Ok(BuiltArchive {
            path: self.target.clone(),
            entries: self.entries,
            bytes: self.bytes,
        })
    }
}

impl Drop for ArchiveBuilder {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.writer.take());
        if let Err(e) = std::fs::remove_file(&self.target) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    target_path = %self.target.display(),
                    error = %e,
                    "Failed to remove abandoned archive"
                );
            }
        }
    }
}

fn entry_failed(path: &RelativePath, source: io::Error) -> TransferError {
    TransferError::ArchiveEntryFailed {
        path: path.to_string(),
        source,
    }
}

/// Build a complete archive at `target` from `entries`, in order.
///
/// On error nothing is left at `target`.
pub fn build_archive<S: ChunkSource>(
    target: &Path,
    entries: &[ArchiveEntry],
    source: &S,
) -> Result<BuiltArchive> {
    let mut builder = ArchiveBuilder::create(target)?;

    for entry in entries {
        match entry {
            ArchiveEntry::Directory { path } => builder.add_directory(path)?,
            ArchiveEntry::File { path, total_chunks } => {
                builder.add_file(path, source.chunks(path, *total_chunks))?;
            }
        }
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use tempfile::TempDir;
    use zip::ZipArchive;

    /// In-memory chunks keyed by (path, index)
    #[derive(Default)]
    struct MemorySource {
        chunks: HashMap<(String, u32), Vec<u8>>,
    }

    impl MemorySource {
        fn with(mut self, path: &str, parts: &[&[u8]]) -> Self {
            for (index, part) in parts.iter().enumerate() {
                self.chunks.insert((path.to_string(), index as u32), part.to_vec());
            }
            self
        }
    }

    impl ChunkSource for MemorySource {
        type Reader = Cursor<Vec<u8>>;
        type Chunks = std::vec::IntoIter<Result<Cursor<Vec<u8>>>>;

        fn chunks(&self, path: &RelativePath, total_chunks: u32) -> Self::Chunks {
            (0..total_chunks)
                .map(|index| {
                    self.chunks
                        .get(&(path.to_string(), index))
                        .cloned()
                        .map(Cursor::new)
                        .ok_or_else(|| TransferError::MissingChunk {
                            path: path.to_string(),
                            index,
                        })
                })
                .collect::<Vec<_>>()
                .into_iter()
        }
    }

    fn file(path: &str, total_chunks: u32) -> ArchiveEntry {
        ArchiveEntry::File {
            path: RelativePath::parse(path).unwrap(),
            total_chunks,
        }
    }

    fn dir(path: &str) -> ArchiveEntry {
        ArchiveEntry::Directory {
            path: RelativePath::parse(path).unwrap(),
        }
    }

    #[test]
    fn test_builds_files_and_empty_directories() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.zip");
        let source = MemorySource::default()
            .with("a/b.txt", &[b"hel", b"lo"])
            .with("empty.txt", &[]);

        let built = build_archive(
            &target,
            &[file("a/b.txt", 2), dir("a/empty"), file("empty.txt", 0)],
            &source,
        )
        .unwrap();

        assert_eq!(built.entries, 3);
        assert_eq!(built.bytes, 5);

        let mut archive = ZipArchive::new(File::open(&target).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);

        let mut content = String::new();
        archive.by_name("a/b.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");

        assert!(archive.by_name("a/empty/").unwrap().is_dir());
        assert_eq!(archive.by_name("empty.txt").unwrap().size(), 0);
    }

    #[test]
    fn test_missing_chunk_aborts_and_removes_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.zip");
        let source = MemorySource::default().with("ok.txt", &[b"fine"]);

        let result = build_archive(&target, &[file("ok.txt", 1), file("broken.txt", 2)], &source);

        match result {
            Err(TransferError::MissingChunk { path, index }) => {
                assert_eq!(path, "broken.txt");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!target.exists());
    }

    #[test]
    fn test_create_failure_is_distinguishable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let result = ArchiveBuilder::create(blocker.join("out.zip"));
        assert!(matches!(result, Err(TransferError::ArchiveCreateFailed(_))));
    }

    #[test]
    fn test_dropping_unfinished_builder_removes_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.zip");
        let source = MemorySource::default().with("a.txt", &[b"1"]);
        let path = RelativePath::parse("a.txt").unwrap();

        let mut builder = ArchiveBuilder::create(&target).unwrap();
        builder.add_file(&path, source.chunks(&path, 1)).unwrap();
        assert!(builder.target().exists());

        drop(builder);
        assert!(!target.exists());
    }

    #[test]
    fn test_large_chunks_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.zip");

        let original: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|i| (i % 251) as u8).collect();
        let parts: Vec<&[u8]> = original.chunks(1024 * 1024).collect();
        let source = MemorySource::default().with("blob.bin", &parts);

        build_archive(&target, &[file("blob.bin", parts.len() as u32)], &source).unwrap();

        let mut archive = ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let mut restored = Vec::new();
        archive.by_name("blob.bin").unwrap().read_to_end(&mut restored).unwrap();
        assert_eq!(restored, original);
    }
}
