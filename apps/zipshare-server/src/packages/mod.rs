//! Published packages
//!
//! - `registry`: durable token -> package record mapping
//! - `store`: archive files on disk
//! - `service`: show/download with expiry checks
//! - `sweeper`: reclamation of expired packages
//! - `admin`: destructive maintenance operations

pub mod admin;
pub mod registry;
pub mod service;
pub mod store;
pub mod sweeper;
pub mod types;

pub use admin::{AdminService, ClearReport};
pub use registry::{PackageRegistry, SqlitePackageRegistry};
pub use service::{Download, PackageService};
pub use store::ArchiveStore;
pub use sweeper::{SweepReport, Sweeper};
pub use types::*;
