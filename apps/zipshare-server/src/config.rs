//! Configuration management for Zipshare Server

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default upper bound for a single chunk body: 16MB
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Age after which abandoned uploads are purged
pub const DEFAULT_STAGING_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub packages: PackagesConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix used when building public and download links
    pub public_base_url: String,
    /// Request body limit for one chunk upload
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding finalized `<token>.zip` archives
    pub archive_root: PathBuf,
    /// Directory holding staged chunks, one namespace per token
    pub staging_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PackagesConfig {
    /// Period of the background sweeper. `None` disables the task.
    pub sweep_interval: Option<Duration>,
    /// Age after which unfinalized staging namespaces are purged. `None` keeps them.
    pub staging_ttl: Option<chrono::Duration>,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// Mounts the destructive administrative routes
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                public_base_url: "http://localhost:3000".to_string(),
                max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            },
            storage: StorageConfig {
                archive_root: PathBuf::from("./data/zips"),
                staging_root: PathBuf::from("./data/chunks"),
            },
            database: DatabaseConfig {
                url: "sqlite:./data/zipshare.db".to_string(),
            },
            packages: PackagesConfig {
                sweep_interval: Some(Duration::from_secs(3600)),
                staging_ttl: Some(chrono::Duration::hours(DEFAULT_STAGING_TTL_HOURS)),
            },
            admin: AdminConfig { enabled: false },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let sweep_secs: u64 = parse_var("SWEEP_INTERVAL_SECS", 3600);
        let staging_hours: i64 = parse_var("STAGING_TTL_HOURS", DEFAULT_STAGING_TTL_HOURS);

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port),
                public_base_url: env::var("PUBLIC_BASE_URL")
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or(defaults.server.public_base_url),
                max_chunk_bytes: parse_var("MAX_CHUNK_BYTES", defaults.server.max_chunk_bytes),
            },
            storage: StorageConfig {
                archive_root: env::var("ARCHIVE_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.archive_root),
                staging_root: env::var("STAGING_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.staging_root),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or(defaults.database.url),
            },
            packages: PackagesConfig {
                sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
                staging_ttl: staging_ttl(staging_hours),
            },
            admin: AdminConfig {
                enabled: parse_var("ADMIN_ENABLED", defaults.admin.enabled),
            },
        }
    }
}

/// Staging TTL in hours, `None` when disabled. Out-of-range values fall back
/// to the default.
fn staging_ttl(hours: i64) -> Option<chrono::Duration> {
    if hours <= 0 {
        return None;
    }

    chrono::Duration::try_hours(hours).or_else(|| {
        tracing::warn!(
            variable = "STAGING_TTL_HOURS",
            value = hours,
            default = DEFAULT_STAGING_TTL_HOURS,
            "Invalid value, using default"
        );
        Some(chrono::Duration::hours(DEFAULT_STAGING_TTL_HOURS))
    })
}

/// Read and parse an environment variable, falling back to `default` when
/// it is unset or malformed.
fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, ?default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}
