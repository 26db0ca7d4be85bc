//! Chunk Store
//!
//! Staging area for uploaded chunks before assembly. Layout on disk:
//!
//! ```text
//! <root>/<token>/<relative path>/.chunks/chunk_<index>
//! ```
//!
//! Chunk files sit in a reserved directory below the path, so `a` and
//! `a/chunk_0` are staged apart. Every chunk lives in its own file, so
//! chunks may arrive out of order, in
//! parallel, and be retried. A write lands in a uniquely named temporary
//! file first and is renamed over its slot, so a retried slot is replaced
//! as a whole and never interleaved.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{RelativePath, Token, CHUNK_DIR};
use crate::archive::ChunkSource;
use crate::error::{Result, TransferError};

// ============================================================================
// Chunk Store
// ============================================================================

/// Filesystem chunk staging area
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: Arc::new(ChunkStoreInner { root }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    fn namespace_path(&self, token: &Token) -> PathBuf {
        self.inner.root.join(token.as_str())
    }

    fn slot_path(&self, token: &Token, path: &RelativePath) -> PathBuf {
        self.namespace_path(token).join(path.to_path_buf()).join(CHUNK_DIR)
    }

    /// Create an empty namespace for a token, discarding anything left under
    /// the same name.
    pub async fn create_namespace(&self, token: &Token) -> Result<()> {
        let namespace = self.namespace_path(token);
        remove_dir_if_exists(&namespace).await?;
        tokio::fs::create_dir_all(&namespace).await?;
        Ok(())
    }

    /// Whether `begin` was called for this token and it was not purged since
    pub async fn has_namespace(&self, token: &Token) -> bool {
        tokio::fs::metadata(self.namespace_path(token))
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false)
    }

    /// Store one chunk, replacing any previous data in the same slot.
    ///
    /// Returns the number of bytes written.
    pub async fn put(
        &self,
        token: &Token,
        path: &RelativePath,
        chunk_index: u32,
        data: &[u8],
    ) -> Result<u64> {
        let slot = self.slot_path(token, path);
        tokio::fs::create_dir_all(&slot).await?;

        let staging = slot.join(format!(".{}.{}.tmp", chunk_file_name(chunk_index), Uuid::new_v4()));
        let target = slot.join(chunk_file_name(chunk_index));

        if let Err(e) = tokio::fs::write(&staging, data).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        tracing::debug!(
            token = %token,
            path = %path,
            chunk_index = chunk_index,
            size = data.len(),
            "Stored chunk"
        );

        Ok(data.len() as u64)
    }

    /// Lazily open the chunks `0..total_chunks` of one file, in order.
    ///
    /// Nothing is opened until the sequence is advanced. The first absent
    /// index yields `MissingChunk`.
    pub fn chunks_for(&self, token: &Token, path: &RelativePath, total_chunks: u32) -> ChunkSequence {
        ChunkSequence {
            slot: self.slot_path(token, path),
            path: path.clone(),
            next: 0,
            total: total_chunks,
        }
    }

    /// The staged files of one upload, as a source for the archive builder
    pub fn staged(&self, token: &Token) -> StagedFiles {
        StagedFiles {
            store: self.clone(),
            token: token.clone(),
        }
    }

    /// Delete every chunk belonging to a token.
    ///
    /// Returns whether a namespace existed.
    pub async fn purge(&self, token: &Token) -> Result<bool> {
        let removed = remove_dir_if_exists(&self.namespace_path(token)).await?;
        if removed {
            tracing::debug!(token = %token, "Purged staged chunks");
        }
        Ok(removed)
    }

    /// Delete every staged namespace. Returns how many were removed.
    pub async fn purge_all(&self) -> Result<usize> {
        let namespaces = self.list_namespaces().await?;
        let mut count = 0;

        for namespace in namespaces {
            if remove_dir_if_exists(&namespace).await? {
                count += 1;
            }
        }

        Ok(count)
    }

    /// Delete namespaces whose newest file is older than `cutoff`.
    ///
    /// Unlike finalized packages, staged chunks have no record of their own,
    /// so age is taken from filesystem modification times.
    pub async fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff: SystemTime = cutoff.into();
        let namespaces = self.list_namespaces().await?;
        let mut count = 0;

        for namespace in namespaces {
            let walk_root = namespace.clone();
            let newest = tokio::task::spawn_blocking(move || newest_modification(&walk_root))
                .await
                .map_err(|e| TransferError::Internal(e.to_string()))??;

            if newest < cutoff && remove_dir_if_exists(&namespace).await? {
                tracing::info!(namespace = %namespace.display(), "Purged stale upload");
                count += 1;
            }
        }

        Ok(count)
    }

    async fn list_namespaces(&self) -> Result<Vec<PathBuf>> {
        let mut namespaces = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.inner.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(namespaces),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                namespaces.push(entry.path());
            }
        }

        Ok(namespaces)
    }
}

// ============================================================================
// Chunk Sequence
// ============================================================================

/// Ordered, lazy sequence of chunk readers for one file
pub struct ChunkSequence {
    slot: PathBuf,
    path: RelativePath,
    next: u32,
    total: u32,
}

impl Iterator for ChunkSequence {
    type Item = Result<File>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }

        let index = self.next;
        self.next += 1;

        let opened = File::open(self.slot.join(chunk_file_name(index))).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                TransferError::MissingChunk {
                    path: self.path.to_string(),
                    index,
                }
            } else {
                TransferError::StorageIo(e)
            }
        });

        Some(opened)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total.saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

/// Chunks of every file staged under one token
pub struct StagedFiles {
    store: ChunkStore,
    token: Token,
}

impl ChunkSource for StagedFiles {
    type Reader = File;
    type Chunks = ChunkSequence;

    fn chunks(&self, path: &RelativePath, total_chunks: u32) -> ChunkSequence {
        self.store.chunks_for(&self.token, path, total_chunks)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn chunk_file_name(index: u32) -> String {
    format!("chunk_{}", index)
}

async fn remove_dir_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Newest modification time of a directory tree, the directory itself included
fn newest_modification(root: &Path) -> io::Result<SystemTime> {
    let mut newest = std::fs::metadata(root)?.modified()?;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            newest = newest.max(metadata.modified()?);
            if metadata.is_dir() {
                pending.push(entry.path());
            }
        }
    }

    Ok(newest)
}

// ============================================================================
// Tests
// ============================================================================
