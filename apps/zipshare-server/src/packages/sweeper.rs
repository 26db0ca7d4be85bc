//! Reclamation Sweeper
//!
//! Deletes expired packages: archive file first, then the registry record.
//! A record is only removed once its archive is gone, and expiry is checked
//! again right before each deletion.

use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use serde::Serialize;

use super::registry::PackageRegistry;
use super::store::ArchiveStore;
use super::types::Package;
use crate::clock::SharedClock;
use crate::error::{Result, TransferError};
use crate::upload::ChunkStore;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Expired records found by the scan
    pub expired: usize,
    /// Packages whose archive and record were both deleted
    pub deleted: usize,
    /// Packages left for the next sweep after an error
    pub failed: usize,
    /// Packages that vanished or were no longer expired on re-check
    pub skipped: usize,
    /// Unfinalized upload namespaces purged for age
    pub stale_uploads: usize,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct Sweeper {
    inner: Arc<SweeperInner>,
}

struct SweeperInner {
    registry: Arc<dyn PackageRegistry>,
    archives: ArchiveStore,
    chunk_store: ChunkStore,
    clock: SharedClock,
    staging_ttl: Option<Duration>,
}

impl Sweeper {
    pub fn new(
        registry: Arc<dyn PackageRegistry>,
        archives: ArchiveStore,
        chunk_store: ChunkStore,
        clock: SharedClock,
        staging_ttl: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                registry,
                archives,
                chunk_store,
                clock,
                staging_ttl,
            }),
        }
    }

    /// Run one sweep. Errors are logged and counted, never returned.
    pub async fn run_once(&self) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        match self.inner.registry.list_expired(self.inner.clock.now()).await {
            Ok(expired) => {
                report.expired = expired.len();
                for package in &expired {
                    match self.reclaim(package).await {
                        Ok(true) => report.deleted += 1,
                        Ok(false) => report.skipped += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::error!(
                                token = %package.token,
                                error = %e,
                                "Failed to reclaim package"
                            );
                        }
                    }
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to list expired packages"),
        }

        // A TTL reaching past the representable range means nothing is stale yet
        let cutoff = self
            .inner
            .staging_ttl
            .and_then(|ttl| self.inner.clock.now().checked_sub_signed(ttl));
        if let Some(cutoff) = cutoff {
            match self.inner.chunk_store.purge_stale(cutoff).await {
                Ok(count) => report.stale_uploads = count,
                Err(e) => tracing::error!(error = %e, "Failed to purge stale uploads"),
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            expired = report.expired,
            deleted = report.deleted,
            failed = report.failed,
            skipped = report.skipped,
            stale_uploads = report.stale_uploads,
            duration_ms = report.duration_ms,
            "Sweep complete"
        );

        report
    }

    /// Delete one package. `Ok(false)` means it no longer needed deleting.
    async fn reclaim(&self, package: &Package) -> Result<bool> {
        let current = match self.inner.registry.get(&package.token).await {
            Ok(current) => current,
            Err(TransferError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };

        if !current.is_expired_at(self.inner.clock.now()) {
            tracing::warn!(token = %current.token, "Package no longer expired, skipping");
            return Ok(false);
        }

        self.inner.archives.remove(&current.filename).await?;

        let deleted = self
            .inner
            .registry
            .delete_if_expired(&current.token, self.inner.clock.now())
            .await?;

        if deleted {
            tracing::debug!(token = %current.token, "Reclaimed package");
        }
        Ok(deleted)
    }

    /// Start background sweep task
    pub fn start(self, period: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}
