//! Archive files on disk
//!
//! Finalized archives live directly under the archive root as `<token>.zip`.
//! Archives under construction use a hidden `.<token>.<attempt>.zip.partial`
//! name, unique per finalize attempt, and are never addressed by a package
//! record.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Result, TransferError};
use crate::upload::Token;

const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Clone)]
pub struct ArchiveStore {
    root: Arc<PathBuf>,
}

impl ArchiveStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root: Arc::new(root) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fresh build location for one finalize attempt of `token`
    pub fn partial_path(&self, token: &Token) -> PathBuf {
        self.root
            .join(format!(".{}.{}.zip{}", token, Uuid::new_v4().simple(), PARTIAL_SUFFIX))
    }

    /// Build locations currently on disk for `token`
    pub async fn partials_of(&self, token: &Token) -> Result<Vec<PathBuf>> {
        let prefix = format!(".{}.", token);
        let mut found = Vec::new();

        let mut entries = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(PARTIAL_SUFFIX) {
                found.push(entry.path());
            }
        }

        Ok(found)
    }

    /// Resolve a stored filename. Names that could leave the root are refused.
    pub fn path_of(&self, filename: &str) -> Result<PathBuf> {
        let plain = !filename.is_empty()
            && !filename.starts_with('.')
            && !filename.contains(['/', '\\', '\0']);

        if plain {
            Ok(self.root.join(filename))
        } else {
            Err(TransferError::Internal(format!("Refusing archive name {filename:?}")))
        }
    }

    /// Move a closed archive to its public name
    pub async fn publish(&self, built: &Path, filename: &str) -> Result<PathBuf> {
        let target = self.path_of(filename)?;

        if let Err(e) = tokio::fs::rename(built, &target).await {
            let _ = tokio::fs::remove_file(built).await;
            return Err(e.into());
        }

        Ok(target)
    }

    /// Delete an archive. An already missing file counts as deleted.
    pub async fn remove(&self, filename: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_of(filename)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Open an archive for streaming. A missing file is `NotFound`.
    pub async fn open(&self, filename: &str) -> Result<(tokio::fs::File, u64)> {
        let path = self.path_of(filename)?;

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(filename = %filename, "Archive missing for registered package");
                return Err(TransferError::NotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        Ok((file, size))
    }

    /// Delete every archive and partial archive. Returns how many files went.
    pub async fn clear(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let is_archive = name.ends_with(".zip") || name.ends_with(PARTIAL_SUFFIX);

            if is_archive && entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                count += 1;
            }
        }

        Ok(count)
    }
}
