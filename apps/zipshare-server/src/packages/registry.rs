//! Package Registry
//!
//! Durable mapping from token to package record. The SQLite implementation
//! relies on single-statement atomicity for every operation; no cross-record
//! locking is needed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::types::Package;
use crate::error::{Result, TransferError};
use crate::upload::Token;

/// Storage of package records
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Insert a record. Fails with `AlreadyFinalized` if the token is taken.
    async fn create(
        &self,
        token: &Token,
        filename: &str,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Package>;

    /// Look up a record. Does not filter on expiry.
    async fn get(&self, token: &str) -> Result<Package>;

    /// Remove a record unconditionally. Returns whether it existed.
    async fn delete(&self, token: &str) -> Result<bool>;

    /// Remove a record only if it is expired as of `as_of`.
    async fn delete_if_expired(&self, token: &str, as_of: DateTime<Utc>) -> Result<bool>;

    /// Records whose expiry is at or before `as_of`
    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<Package>>;

    /// Every record, oldest first
    async fn list_all(&self) -> Result<Vec<Package>>;
}

// ============================================================================
// SQLite Registry
// ============================================================================

/// Package registry backed by the `packages` table
#[derive(Clone)]
pub struct SqlitePackageRegistry {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
struct PackageRow {
    token: String,
    filename: String,
    created_at: String,
    expires_at: String,
}

impl TryFrom<PackageRow> for Package {
    type Error = TransferError;

    fn try_from(row: PackageRow) -> Result<Self> {
        Ok(Package {
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: parse_timestamp(&row.expires_at)?,
            token: row.token,
            filename: row.filename,
        })
    }
}

impl SqlitePackageRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn collect(rows: Vec<PackageRow>) -> Result<Vec<Package>> {
        rows.into_iter().map(Package::try_from).collect()
    }
}

#[async_trait]
impl PackageRegistry for SqlitePackageRegistry {
    async fn create(
        &self,
        token: &Token,
        filename: &str,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Package> {
        let package = Package::new(token, filename, created_at, ttl);

        sqlx::query(
            r#"
            INSERT INTO packages (token, filename, created_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&package.token)
        .bind(&package.filename)
        .bind(format_timestamp(package.created_at))
        .bind(format_timestamp(package.expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => TransferError::AlreadyFinalized,
            other => TransferError::Database(other),
        })?;

        // Hand back what a later `get` will see
        self.get(&package.token).await
    }

    async fn get(&self, token: &str) -> Result<Package> {
        let row = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT token, filename, created_at, expires_at
            FROM packages
            WHERE token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(TransferError::NotFound)?.try_into()
    }

    async fn delete(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM packages WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_if_expired(&self, token: &str, as_of: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("DELETE FROM packages WHERE token = ? AND expires_at <= ?")
            .bind(token)
            .bind(format_timestamp(as_of))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<Package>> {
        let rows = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT token, filename, created_at, expires_at
            FROM packages
            WHERE expires_at <= ?
            ORDER BY expires_at ASC
            "#,
        )
        .bind(format_timestamp(as_of))
        .fetch_all(&self.pool)
        .await?;

        Self::collect(rows)
    }

    async fn list_all(&self) -> Result<Vec<Package>> {
        let rows = sqlx::query_as::<_, PackageRow>(
            r#"
            SELECT token, filename, created_at, expires_at
            FROM packages
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Self::collect(rows)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Fixed-width RFC 3339, so text order matches time order
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| TransferError::Internal(format!("Corrupt timestamp {raw:?}: {e}")))
}

// ============================================================================
// Tests
// ============================================================================
