//! Database layer for the control plane.
//!
//! This module provides:
//! - Connection pool management
//! - Postgres implementations of the cluster registry, allocation table and
//!   project registry
//!
//! The database layer uses SQLx with Postgres.

mod allocations;
mod clusters;
mod error;
mod projects;

pub use allocations::PgAllocationStore;
pub use clusters::PgClusterRegistry;
pub use error::DbError;
pub use projects::PgProjectRegistry;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use xpr_names::NameError;

use crate::store::StoreError;

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/xpresso";

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbConfig {
    /// Build from `XPR_DATABASE_URL` (falling back to `DATABASE_URL`),
    /// `XPR_DB_MAX_CONNECTIONS`, `XPR_DB_MIN_CONNECTIONS` and
    /// `XPR_DB_ACQUIRE_TIMEOUT_SECS`.
    ///
    /// An allocation pass holds one connection for its lease while querying
    /// on another, so fewer than two connections is rejected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DbError> {
        let defaults = Self::default();

        let database_url = lookup("XPR_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .unwrap_or(defaults.database_url);
        let max_connections =
            parse_key(&lookup, "XPR_DB_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        let min_connections =
            parse_key(&lookup, "XPR_DB_MIN_CONNECTIONS")?.unwrap_or(defaults.min_connections);
        let acquire_timeout = parse_key(&lookup, "XPR_DB_ACQUIRE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.acquire_timeout);

        if max_connections < 2 {
            return Err(DbError::InvalidConfig {
                key: "XPR_DB_MAX_CONNECTIONS",
                value: max_connections.to_string(),
            });
        }

        Ok(Self {
            database_url,
            max_connections,
            min_connections: min_connections.min(max_connections),
            acquire_timeout,
        })
    }
}

fn parse_key<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, DbError> {
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| DbError::InvalidConfig { key, value })
        })
        .transpose()
}

/// Pooled Postgres connection and the stores built on it.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(DbError::Connect)?;

        Ok(Self { pool })
    }

    /// Apply the allocation schema from the first `migrations` directory
    /// found, relative to the working directory or this crate.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let candidates = migration_dirs();
        let mut last_error = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Applying allocation schema");
                    return migrator.run(&self.pool).await.map_err(DbError::Migration);
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        Err(DbError::MigrationDirNotFound {
            tried: candidates
                .iter()
                .map(|dir| dir.display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            last_error: last_error.unwrap_or_else(|| "no candidates".to_string()),
        })
    }

    pub fn cluster_registry(&self) -> PgClusterRegistry {
        PgClusterRegistry::new(self.pool.clone())
    }

    pub fn allocation_store(&self) -> PgAllocationStore {
        PgAllocationStore::new(self.pool.clone())
    }

    pub fn project_registry(&self) -> PgProjectRegistry {
        PgProjectRegistry::new(self.pool.clone())
    }
}

fn migration_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("migrations"),
        PathBuf::from("services/control-plane/migrations"),
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    ]
}

fn query_error(e: sqlx::Error) -> StoreError {
    StoreError::Db(DbError::Query(e))
}

fn invalid_row(e: NameError) -> StoreError {
    StoreError::InvalidRecord(e.to_string())
}
