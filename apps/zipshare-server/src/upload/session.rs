//! Upload Sessions
//!
//! An [`UploadSession`] is the explicit handle of one upload: it is issued by
//! [`UploadService::begin`], accepts chunks in any order, and is consumed by
//! `finalize`, the only operation that writes durable state.
//!
//! At most one finalize runs per token. The guard is an in-memory set of
//! tokens being finalized; different tokens never contend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use parking_lot::Mutex;

use super::chunk_store::ChunkStore;
use super::types::{validate_manifest, ChunkAck, ManifestEntry, RelativePath, Token};
use crate::archive::{build_archive, ArchiveEntry};
use crate::clock::SharedClock;
use crate::error::{Result, TransferError};
use crate::packages::{ArchiveStore, Package, PackageRegistry};

// ============================================================================
// Upload Service
// ============================================================================

/// Issues and resumes upload sessions
#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    chunk_store: ChunkStore,
    archives: ArchiveStore,
    registry: Arc<dyn PackageRegistry>,
    clock: SharedClock,
    ttl: Duration,

    /// Tokens with a finalize in flight
    finalizing: Mutex<HashSet<Token>>,
}

impl UploadService {
    pub fn new(
        chunk_store: ChunkStore,
        archives: ArchiveStore,
        registry: Arc<dyn PackageRegistry>,
        clock: SharedClock,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(UploadServiceInner {
                chunk_store,
                archives,
                registry,
                clock,
                ttl,
                finalizing: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Start a new upload with a fresh token and an empty staging namespace
    pub async fn begin(&self) -> Result<UploadSession> {
        let token = Token::generate();
        self.inner.chunk_store.create_namespace(&token).await?;

        tracing::info!(token = %token, "Created upload session");

        Ok(UploadSession {
            token,
            service: self.clone(),
        })
    }

    /// Handle to an upload started earlier
    pub fn session(&self, token: &str) -> Result<UploadSession> {
        Ok(UploadSession {
            token: Token::parse(token)?,
            service: self.clone(),
        })
    }

    fn claim(&self, token: &Token) -> Result<FinalizeGuard> {
        let mut finalizing = self.inner.finalizing.lock();
        if !finalizing.insert(token.clone()) {
            return Err(TransferError::FinalizeInProgress);
        }

        Ok(FinalizeGuard {
            token: token.clone(),
            service: self.clone(),
        })
    }
}

/// Releases a finalize claim when dropped
struct FinalizeGuard {
    token: Token,
    service: UploadService,
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        self.service.inner.finalizing.lock().remove(&self.token);
    }
}

// ============================================================================
// Upload Session
// ============================================================================

/// One upload, addressed by its token
pub struct UploadSession {
    token: Token,
    service: UploadService,
}

impl UploadSession {
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Store one chunk of one file.
    ///
    /// The chunk count is only checked for consistency with the index here;
    /// completeness is checked at finalize time.
    pub async fn receive_chunk(
        &self,
        path: &str,
        chunk_index: u32,
        total_chunks: u32,
        data: &[u8],
    ) -> Result<ChunkAck> {
        let path = RelativePath::parse(path)?;

        if chunk_index >= total_chunks {
            return Err(TransferError::InvalidChunk(format!(
                "index {chunk_index} out of range for {total_chunks} chunks"
            )));
        }

        let store = &self.service.inner.chunk_store;
        if !store.has_namespace(&self.token).await {
            return Err(TransferError::UnknownUpload(self.token.to_string()));
        }

        let size = store.put(&self.token, &path, chunk_index, data).await?;

        Ok(ChunkAck {
            path: path.to_string(),
            chunk_index,
            total_chunks,
            size,
        })
    }

    /// Assemble the declared entries into one archive and publish it.
    ///
    /// On failure nothing servable is left behind and staged chunks are kept,
    /// so finalize can be retried without re-uploading.
    ///
    /// The work runs on its own task that owns the finalize claim, so a caller
    /// that stops waiting does not release the claim before the build ends.
    pub async fn finalize(self, manifest: &[ManifestEntry]) -> Result<Package> {
        let entries = validate_manifest(manifest)?;
        let guard = self.service.claim(&self.token)?;

        let UploadSession { token, service } = self;
        tokio::spawn(async move {
            let _guard = guard;
            service.assemble(&token, entries).await
        })
        .await
        .map_err(|e| TransferError::Internal(format!("Finalize task failed: {e}")))?
    }
}

impl UploadService {
    /// Build, publish and register the archive of one claimed upload
    async fn assemble(&self, token: &Token, entries: Vec<ArchiveEntry>) -> Result<Package> {
        let inner = &self.inner;

        match inner.registry.get(token.as_str()).await {
            Ok(_) => return Err(TransferError::AlreadyFinalized),
            Err(TransferError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let started = Instant::now();
        tracing::info!(token = %token, entries = entries.len(), "Assembling archive");

        let target = inner.archives.partial_path(token);
        let source = inner.chunk_store.staged(token);
        let built = tokio::task::spawn_blocking(move || build_archive(&target, &entries, &source))
            .await
            .map_err(|e| TransferError::Internal(format!("Archive task failed: {e}")))?
            .inspect_err(|e| {
                tracing::warn!(token = %token, error = %e, "Finalize aborted");
            })?;

        let filename = token.archive_filename();
        inner.archives.publish(&built.path, &filename).await?;

        let package = match inner
            .registry
            .create(token, &filename, inner.clock.now(), inner.ttl)
            .await
        {
            Ok(package) => package,
            Err(e) => {
                if let Err(cleanup) = inner.archives.remove(&filename).await {
                    tracing::error!(
                        token = %token,
                        error = %cleanup,
                        "Failed to remove archive of unregistered package"
                    );
                }
                return Err(e);
            }
        };

        if let Err(e) = inner.chunk_store.purge(token).await {
            tracing::warn!(token = %token, error = %e, "Failed to purge staged chunks");
        }

        tracing::info!(
            token = %token,
            entries = built.entries,
            bytes = built.bytes,
            duration_ms = started.elapsed().as_millis() as u64,
            expires_at = %package.expires_at,
            "Package published"
        );

        Ok(package)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::create_pool;
    use crate::packages::{package_ttl, SqlitePackageRegistry};
    use chrono::{TimeZone, Utc};
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    struct Fixture {
        temp_dir: TempDir,
        service: UploadService,
        registry: Arc<dyn PackageRegistry>,
        archives: ArchiveStore,
        chunk_store: ChunkStore,
    }

    async fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let chunk_store = ChunkStore::new(temp_dir.path().join("chunks"));
        let archives = ArchiveStore::new(temp_dir.path().join("zips"));
        let registry: Arc<dyn PackageRegistry> =
            Arc::new(SqlitePackageRegistry::new(create_pool("sqlite::memory:").await.unwrap()));
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 4, 1, 9, 0, 0).unwrap());

        let service = UploadService::new(
            chunk_store.clone(),
            archives.clone(),
            registry.clone(),
            Arc::new(clock),
            package_ttl(),
        );

        Fixture {
            temp_dir,
            service,
            registry,
            archives,
            chunk_store,
        }
    }

    fn read_entry(archives: &ArchiveStore, package: &Package, name: &str) -> Vec<u8> {
        let file = std::fs::File::open(archives.path_of(&package.filename).unwrap()).unwrap();
        let mut archive = ZipArchive::new(file).unwrap();
        let mut data = Vec::new();
        archive.by_name(name).unwrap().read_to_end(&mut data).unwrap();
        data
    }

    fn archive_names(archives: &ArchiveStore, package: &Package) -> Vec<String> {
        let file = std::fs::File::open(archives.path_of(&package.filename).unwrap()).unwrap();
        let archive = ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_finalize_publishes_archive_and_purges_chunks() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();
        let token = session.token().clone();

        session.receive_chunk("a/b.txt", 1, 2, b"lo").await.unwrap();
        session.receive_chunk("a/b.txt", 0, 2, b"hel").await.unwrap();

        let package = session
            .finalize(&[ManifestEntry::file("a/b.txt", 2), ManifestEntry::directory("a/empty")])
            .await
            .unwrap();

        assert_eq!(package.token, token.as_str());
        assert_eq!(package.filename, format!("{token}.zip"));
        assert_eq!(package.expires_at, package.created_at + package_ttl());

        assert_eq!(archive_names(&f.archives, &package), vec!["a/b.txt", "a/empty/"]);
        assert_eq!(read_entry(&f.archives, &package, "a/b.txt"), b"hello");
        assert!(f.registry.get(token.as_str()).await.is_ok());
        assert!(!f.chunk_store.has_namespace(&token).await);
        assert!(f.archives.partials_of(&token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunk_fails_and_keeps_chunks_for_retry() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();
        let token = session.token().clone();

        session.receive_chunk("docs/readme.md", 0, 3, b"one ").await.unwrap();
        session.receive_chunk("docs/readme.md", 2, 3, b"three").await.unwrap();

        let manifest = [ManifestEntry::file("docs/readme.md", 3)];
        match session.finalize(&manifest).await {
            Err(TransferError::MissingChunk { path, index }) => {
                assert_eq!(path, "docs/readme.md");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(matches!(f.registry.get(token.as_str()).await, Err(TransferError::NotFound)));
        assert!(!f.archives.path_of(&token.archive_filename()).unwrap().exists());
        assert!(f.archives.partials_of(&token).await.unwrap().is_empty());

        // Retry after uploading only the missing chunk
        let session = f.service.session(token.as_str()).unwrap();
        session.receive_chunk("docs/readme.md", 1, 3, b"two ").await.unwrap();
        let package = session.finalize(&manifest).await.unwrap();
        assert_eq!(read_entry(&f.archives, &package, "docs/readme.md"), b"one two three");
    }

    #[tokio::test]
    async fn test_traversal_is_rejected_before_any_write() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();
        let token = session.token().clone();
        session.receive_chunk("ok.txt", 0, 1, b"fine").await.unwrap();

        let result = session
            .finalize(&[ManifestEntry::file("ok.txt", 1), ManifestEntry::file("../../etc/passwd", 1)])
            .await;

        assert!(matches!(result, Err(TransferError::InvalidPath(_))));
        assert!(f.registry.list_all().await.unwrap().is_empty());
        assert!(!f.archives.root().exists() || std::fs::read_dir(f.archives.root()).unwrap().next().is_none());
        assert!(f.chunk_store.has_namespace(&token).await);
    }

    #[tokio::test]
    async fn test_chunk_upload_validation() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();

        assert!(matches!(
            session.receive_chunk("../x", 0, 1, b"x").await,
            Err(TransferError::InvalidPath(_))
        ));
        assert!(matches!(
            session.receive_chunk("x", 1, 1, b"x").await,
            Err(TransferError::InvalidChunk(_))
        ));

        let stranger = f.service.session(Token::generate().as_str()).unwrap();
        assert!(matches!(
            stranger.receive_chunk("x", 0, 1, b"x").await,
            Err(TransferError::UnknownUpload(_))
        ));

        assert!(matches!(f.service.session("not-a-token"), Err(TransferError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_second_finalize_never_succeeds() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();
        let token = session.token().clone();
        session.receive_chunk("f.txt", 0, 1, b"data").await.unwrap();

        let manifest = [ManifestEntry::file("f.txt", 1)];
        session.finalize(&manifest).await.unwrap();

        let again = f.service.session(token.as_str()).unwrap().finalize(&manifest).await;
        assert!(matches!(again, Err(TransferError::AlreadyFinalized)));

        let dirs_only = f
            .service
            .session(token.as_str())
            .unwrap()
            .finalize(&[ManifestEntry::directory("d")])
            .await;
        assert!(matches!(dirs_only, Err(TransferError::AlreadyFinalized)));

        // Chunk uploads after publishing have no namespace to land in
        let late = f.service.session(token.as_str()).unwrap();
        assert!(matches!(
            late.receive_chunk("f.txt", 0, 1, b"x").await,
            Err(TransferError::UnknownUpload(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_finalize_is_refused() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();
        let token = session.token().clone();

        let _held = f.service.claim(&token).unwrap();
        let result = session.finalize(&[ManifestEntry::directory("d")]).await;
        assert!(matches!(result, Err(TransferError::FinalizeInProgress)));

        drop(_held);
        let other = f.service.session(token.as_str()).unwrap();
        assert!(other.finalize(&[ManifestEntry::directory("d")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_finalize_keeps_its_claim_until_done() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();
        let token = session.token().clone();

        let part: Vec<u8> = (0..1024 * 1024u32).map(|i| (i * 7 % 253) as u8).collect();
        for index in 0..16 {
            session.receive_chunk("big.bin", index, 16, &part).await.unwrap();
        }

        // Stop waiting almost immediately; the build carries on in the background
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            session.finalize(&[ManifestEntry::file("big.bin", 16)]),
        )
        .await;
        assert!(!matches!(abandoned, Ok(Err(_))));

        let second = f
            .service
            .session(token.as_str())
            .unwrap()
            .finalize(&[ManifestEntry::directory("d")])
            .await;
        assert!(matches!(
            second,
            Err(TransferError::FinalizeInProgress) | Err(TransferError::AlreadyFinalized)
        ));

        let mut package = None;
        for _ in 0..400 {
            if let Ok(found) = f.registry.get(token.as_str()).await {
                package = Some(found);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let package = package.expect("abandoned finalize never published");

        // Claim is released once the background build has finished
        for _ in 0..400 {
            if !f.service.inner.finalizing.lock().contains(&token) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(archive_names(&f.archives, &package), vec!["big.bin"]);
        assert_eq!(read_entry(&f.archives, &package, "big.bin").len(), 16 * part.len());
        assert!(f.archives.partials_of(&token).await.unwrap().is_empty());

        let third = f
            .service
            .session(token.as_str())
            .unwrap()
            .finalize(&[ManifestEntry::directory("d")])
            .await;
        assert!(matches!(third, Err(TransferError::AlreadyFinalized)));
    }

    #[tokio::test]
    async fn test_file_named_like_a_chunk_finalizes() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();

        session.receive_chunk("a", 0, 1, b"outer").await.unwrap();
        session.receive_chunk("a/chunk_0", 0, 1, b"inner").await.unwrap();

        let package = session
            .finalize(&[ManifestEntry::file("a", 1), ManifestEntry::file("a/chunk_0", 1)])
            .await
            .unwrap();
        assert_eq!(read_entry(&f.archives, &package, "a"), b"outer");
        assert_eq!(read_entry(&f.archives, &package, "a/chunk_0"), b"inner");
    }

    #[tokio::test]
    async fn test_overwritten_chunk_wins() {
        let f = fixture().await;
        let session = f.service.begin().await.unwrap();

        session.receive_chunk("v.txt", 0, 1, b"first").await.unwrap();
        session.receive_chunk("v.txt", 0, 1, b"second").await.unwrap();

        let package = session.finalize(&[ManifestEntry::file("v.txt", 1)]).await.unwrap();
        assert_eq!(read_entry(&f.archives, &package, "v.txt"), b"second");
    }

    #[tokio::test]
    async fn test_round_trip_for_various_chunk_counts() {
        let f = fixture().await;
        let original: Vec<u8> = (0..200_000u32).map(|i| (i * 31 % 256) as u8).collect();

        for chunk_count in [1usize, 2, 50] {
            let session = f.service.begin().await.unwrap();
            let chunk_size = original.len().div_ceil(chunk_count);
            let parts: Vec<&[u8]> = original.chunks(chunk_size).collect();
            assert_eq!(parts.len(), chunk_count);

            // Upload back to front to exercise out-of-order arrival
            for (index, part) in parts.iter().enumerate().rev() {
                session
                    .receive_chunk("data/blob.bin", index as u32, chunk_count as u32, part)
                    .await
                    .unwrap();
            }

            let package = session
                .finalize(&[ManifestEntry::file("data/blob.bin", chunk_count as u32)])
                .await
                .unwrap();
            assert_eq!(read_entry(&f.archives, &package, "data/blob.bin"), original);
        }

        let tiny = f.service.begin().await.unwrap();
        for (index, byte) in b"bytes".iter().enumerate() {
            tiny.receive_chunk("t.txt", index as u32, 5, &[*byte]).await.unwrap();
        }
        let package = tiny.finalize(&[ManifestEntry::file("t.txt", 5)]).await.unwrap();
        assert_eq!(read_entry(&f.archives, &package, "t.txt"), b"bytes");

        drop(f.temp_dir);
    }
}
