//! Administrative operations
//!
//! Destructive, intended for test and reset use. Only reachable through the
//! admin router, which is mounted when explicitly enabled.

use std::sync::Arc;

use serde::Serialize;

use super::registry::PackageRegistry;
use super::store::ArchiveStore;
use super::types::Package;
use crate::error::Result;
use crate::upload::ChunkStore;

/// What ClearAll removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub packages: usize,
    pub archives: usize,
    pub uploads: usize,
}

#[derive(Clone)]
pub struct AdminService {
    registry: Arc<dyn PackageRegistry>,
    archives: ArchiveStore,
    chunk_store: ChunkStore,
}

impl AdminService {
    pub fn new(registry: Arc<dyn PackageRegistry>, archives: ArchiveStore, chunk_store: ChunkStore) -> Self {
        Self {
            registry,
            archives,
            chunk_store,
        }
    }

    /// Every package record, expired or not
    pub async fn list_packages(&self) -> Result<Vec<Package>> {
        self.registry.list_all().await
    }

    /// Delete all packages, their archives and all staged chunks
    pub async fn clear_all(&self) -> Result<ClearReport> {
        let mut report = ClearReport::default();

        for package in self.registry.list_all().await? {
            if self.registry.delete(&package.token).await? {
                report.packages += 1;
            }
        }
        report.archives = self.archives.clear().await?;
        report.uploads = self.chunk_store.purge_all().await?;

        tracing::warn!(
            packages = report.packages,
            archives = report.archives,
            uploads = report.uploads,
            "Cleared all packages and staged uploads"
        );

        Ok(report)
    }
}
