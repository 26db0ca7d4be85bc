//! Read side of published packages: show and download

use std::sync::Arc;

use super::registry::PackageRegistry;
use super::store::ArchiveStore;
use super::types::Package;
use crate::clock::SharedClock;
use crate::error::{Result, TransferError};
use crate::upload::Token;

/// An open archive ready to be streamed
pub struct Download {
    pub package: Package,
    pub file: tokio::fs::File,
    pub size: u64,
}

#[derive(Clone)]
pub struct PackageService {
    registry: Arc<dyn PackageRegistry>,
    archives: ArchiveStore,
    clock: SharedClock,
}

impl PackageService {
    pub fn new(registry: Arc<dyn PackageRegistry>, archives: ArchiveStore, clock: SharedClock) -> Self {
        Self {
            registry,
            archives,
            clock,
        }
    }

    /// Look up a servable package.
    ///
    /// Fails with `NotFound` for malformed or unknown tokens and `Expired`
    /// once `expires_at` has been reached, whether or not the sweeper has
    /// run yet.
    pub async fn get(&self, token: &str) -> Result<Package> {
        let token = Token::parse(token).map_err(|_| TransferError::NotFound)?;
        let package = self.registry.get(token.as_str()).await?;

        if package.is_expired_at(self.clock.now()) {
            return Err(TransferError::Expired);
        }

        Ok(package)
    }

    /// Open the archive of a servable package
    pub async fn open(&self, token: &str) -> Result<Download> {
        let package = self.get(token).await?;
        let (file, size) = self.archives.open(&package.filename).await?;

        // The record may have expired while the file was being opened
        if package.is_expired_at(self.clock.now()) {
            return Err(TransferError::Expired);
        }

        Ok(Download { package, file, size })
    }
}
