//! Package record

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::upload::Token;

/// Lifetime of a published package
pub const PACKAGE_TTL_DAYS: i64 = 7;

pub fn package_ttl() -> Duration {
    Duration::days(PACKAGE_TTL_DAYS)
}

/// A finalized archive plus its expiry metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub token: String,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Package {
    pub fn new(token: &Token, filename: impl Into<String>, created_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            token: token.to_string(),
            filename: filename.into(),
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// A package whose expiry equals `now` is already expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Response body of GetPackage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageResponse {
    pub token: String,
    pub download_link: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
