//! Application state management

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::config::Config;
use crate::packages::{
    package_ttl, AdminService, ArchiveStore, PackageRegistry, PackageService, Sweeper,
};
use crate::upload::{ChunkStore, UploadService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    uploads: UploadService,
    packages: PackageService,
    admin: AdminService,
    sweeper: Sweeper,
}

impl AppState {
    /// Wire the services over one registry and one clock
    pub fn new(config: Config, registry: Arc<dyn PackageRegistry>, clock: SharedClock) -> Self {
        let chunk_store = ChunkStore::new(config.storage.staging_root.clone());
        let archives = ArchiveStore::new(config.storage.archive_root.clone());

        let uploads = UploadService::new(
            chunk_store.clone(),
            archives.clone(),
            registry.clone(),
            clock.clone(),
            package_ttl(),
        );
        let packages = PackageService::new(registry.clone(), archives.clone(), clock.clone());
        let admin = AdminService::new(registry.clone(), archives.clone(), chunk_store.clone());
        let sweeper = Sweeper::new(
            registry,
            archives,
            chunk_store,
            clock,
            config.packages.staging_ttl,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                uploads,
                packages,
                admin,
                sweeper,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn uploads(&self) -> &UploadService {
        &self.inner.uploads
    }

    pub fn packages(&self) -> &PackageService {
        &self.inner.packages
    }

    pub fn admin(&self) -> &AdminService {
        &self.inner.admin
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.inner.sweeper
    }

    /// Public link of a package page
    pub fn package_link(&self, token: &str) -> String {
        format!("{}/api/v1/packages/{}", self.config().server.public_base_url, token)
    }

    /// Public link of a package download
    pub fn download_link(&self, token: &str) -> String {
        format!("{}/download", self.package_link(token))
    }
}
