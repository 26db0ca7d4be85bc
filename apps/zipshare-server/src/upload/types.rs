//! Upload types: tokens, relative paths and the finalize manifest

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveEntry;
use crate::error::{Result, TransferError};

// ============================================================================
// Constants
// ============================================================================

/// Length of an upload token in characters
pub const TOKEN_LENGTH: usize = 40;

/// Directory holding the chunk files of one staged file. Reserved, so no
/// client path can land on another file's chunks.
pub const CHUNK_DIR: &str = ".chunks";

// ============================================================================
// Token
// ============================================================================

/// Opaque random identifier of one upload and, after finalize, its package.
///
/// Tokens are 40 ASCII alphanumeric characters. That restriction is what
/// makes it safe to use a token as a directory or file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Generate a fresh token from the thread-local CSPRNG
    pub fn generate() -> Self {
        let value: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        Self(value)
    }

    /// Parse a token received from a client
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.len() == TOKEN_LENGTH && raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(TransferError::InvalidToken)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the archive file published for this token
    pub fn archive_filename(&self) -> String {
        format!("{}.zip", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Relative Path
// ============================================================================

/// A client-supplied path that is guaranteed to stay inside the upload root.
///
/// Backslashes are normalized to `/` and a single trailing `/` is dropped.
/// Absolute paths, drive prefixes, NUL bytes, empty, `.` or `..` segments
/// and the reserved [`CHUNK_DIR`] segment are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| TransferError::InvalidPath(format!("{raw:?}: {reason}"));

        if raw.contains('\0') {
            return Err(invalid("contains NUL"));
        }

        let normalized = raw.replace('\\', "/");
        if normalized.starts_with('/') {
            return Err(invalid("absolute path"));
        }

        let trimmed = normalized.strip_suffix('/').unwrap_or(&normalized);
        if trimmed.is_empty() {
            return Err(invalid("empty path"));
        }

        for (position, segment) in trimmed.split('/').enumerate() {
            match segment {
                "" => return Err(invalid("empty segment")),
                "." | ".." => return Err(invalid("relative segment")),
                CHUNK_DIR => return Err(invalid("reserved segment")),
                _ => {}
            }
            if position == 0 && is_drive_prefix(segment) {
                return Err(invalid("drive prefix"));
            }
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Platform path built from the validated segments
    pub fn to_path_buf(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_drive_prefix(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

// ============================================================================
// Manifest
// ============================================================================

/// Kind of a manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One item declared by the client at finalize time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,

    /// Path inside the archive
    pub path: String,

    /// Number of chunks the file was split into (files only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

impl ManifestEntry {
    pub fn file(path: impl Into<String>, total_chunks: u32) -> Self {
        Self {
            kind: EntryKind::File,
            path: path.into(),
            total_chunks: Some(total_chunks),
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Directory,
            path: path.into(),
            total_chunks: None,
        }
    }
}

/// Validate a manifest into the ordered list of archive entries.
///
/// Every path is checked before anything else so a traversal attempt is
/// always reported as `InvalidPath`, whatever else is wrong with the manifest.
pub fn validate_manifest(entries: &[ManifestEntry]) -> Result<Vec<ArchiveEntry>> {
    let paths = entries
        .iter()
        .map(|entry| RelativePath::parse(&entry.path))
        .collect::<Result<Vec<_>>>()?;

    if entries.is_empty() {
        return Err(TransferError::InvalidManifest("manifest is empty".to_string()));
    }

    let mut seen = HashSet::with_capacity(entries.len());
    let mut validated = Vec::with_capacity(entries.len());

    for (entry, path) in entries.iter().zip(paths) {
        if !seen.insert(path.clone()) {
            return Err(TransferError::InvalidManifest(format!(
                "duplicate entry {path}"
            )));
        }

        let archive_entry = match entry.kind {
            EntryKind::Directory => ArchiveEntry::Directory { path },
            EntryKind::File => {
                let total_chunks = entry.total_chunks.ok_or_else(|| {
                    TransferError::InvalidManifest(format!("file {path} has no totalChunks"))
                })?;
                ArchiveEntry::File { path, total_chunks }
            }
        };
        validated.push(archive_entry);
    }

    Ok(validated)
}

// ============================================================================
// Wire Types
// ============================================================================

/// Response to BeginUpload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginResponse {
    pub token: String,
}

/// Query parameters of a chunk upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkQuery {
    pub path: String,
    pub index: u32,
    pub total: u32,
}

/// Acknowledgement of a stored chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub path: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub size: u64,
}

/// Body of FinalizeUpload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeRequest {
    pub entries: Vec<ManifestEntry>,
}

/// Response to a successful FinalizeUpload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub token: String,
    pub link: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
