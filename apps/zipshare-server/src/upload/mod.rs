//! Chunked Uploads
//!
//! Clients stream files to the server as numbered chunks under a per-upload
//! token, then finalize the upload with a manifest of the files and
//! directories it contains.
//!
//! Protocol Flow:
//! 1. Client begins an upload and receives a token
//! 2. Client uploads every chunk of every file, in any order
//! 3. Client finalizes with the manifest
//! 4. Server assembles one archive and publishes it as an expiring package

pub mod chunk_store;
pub mod session;
pub mod types;

pub use chunk_store::{ChunkSequence, ChunkStore, StagedFiles};
pub use session::{UploadService, UploadSession};
pub use types::*;
