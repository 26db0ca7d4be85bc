//! Zipshare Server Library
//!
//! Chunked uploads assembled into expiring ZIP packages.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: Chunk staging and upload sessions
//! - `archive`: Streaming ZIP assembly from staged chunks
//! - `packages`: Package registry, download side, sweeper and admin operations

pub mod archive;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod packages;
pub mod routes;
pub mod state;
pub mod upload;
