//! Postgres-backed environment allocation table.
//!
//! The `(project, environment)` primary key keeps rows unique across
//! control-plane replicas: a losing insert affects zero rows and surfaces as
//! [`StoreError::Conflict`]. Load counting is serialized across replicas by a
//! transaction-scoped advisory lock held for each allocation pass.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use xpr_names::{ClusterName, EnvironmentName, ProjectName};

use super::{invalid_row, query_error};
use crate::store::{
    AllocationFilter, AllocationLease, AllocationStore, EnvironmentAllocation, StoreError,
    StoreResult,
};

/// Advisory lock key for allocation passes ("xpralloc" as ASCII).
const ALLOCATION_LOCK_KEY: i64 = 0x7870_7261_6c6c_6f63;

struct AllocationRow {
    project: String,
    environment: String,
    cluster: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for AllocationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            project: row.try_get("project")?,
            environment: row.try_get("environment")?,
            cluster: row.try_get("cluster")?,
        })
    }
}

impl TryFrom<AllocationRow> for EnvironmentAllocation {
    type Error = StoreError;

    fn try_from(row: AllocationRow) -> Result<Self, Self::Error> {
        Ok(EnvironmentAllocation {
            project: ProjectName::try_from(row.project).map_err(invalid_row)?,
            environment: EnvironmentName::try_from(row.environment).map_err(invalid_row)?,
            cluster: ClusterName::try_from(row.cluster).map_err(invalid_row)?,
        })
    }
}

/// Allocation store over the `environment_allocations` table.
#[derive(Clone)]
pub struct PgAllocationStore {
    pool: PgPool,
}

impl PgAllocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Open transaction holding `pg_advisory_xact_lock`. Commit releases the
/// lock; a dropped transaction rolls back and releases it too.
struct PgAllocationLease {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AllocationLease for PgAllocationLease {
    async fn release(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(query_error)
    }
}

#[async_trait]
impl AllocationStore for PgAllocationStore {
    /// Takes one pooled connection for the length of the pass, so the pool
    /// needs at least two connections.
    #[instrument(skip(self))]
    async fn lease(&self) -> StoreResult<Option<Box<dyn AllocationLease>>> {
        let mut tx = self.pool.begin().await.map_err(query_error)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ALLOCATION_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        Ok(Some(Box::new(PgAllocationLease { tx })))
    }

    #[instrument(
        skip(self, allocation),
        fields(
            project = %allocation.project,
            environment = %allocation.environment,
            cluster = %allocation.cluster
        )
    )]
    async fn insert(&self, allocation: &EnvironmentAllocation) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO environment_allocations (project, environment, cluster, allocated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project, environment) DO NOTHING
            "#,
        )
        .bind(allocation.project.as_str())
        .bind(allocation.environment.as_str())
        .bind(allocation.cluster.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                kind: "allocation",
                key: format!("{}/{}", allocation.project, allocation.environment),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, filter))]
    async fn find(&self, filter: &AllocationFilter) -> StoreResult<Vec<EnvironmentAllocation>> {
        let rows: Vec<AllocationRow> = sqlx::query_as(
            r#"
            SELECT project, environment, cluster
            FROM environment_allocations
            WHERE ($1::TEXT IS NULL OR project = $1)
              AND ($2::TEXT IS NULL OR environment = $2)
              AND ($3::TEXT IS NULL OR cluster = $3)
            ORDER BY project, environment
            "#,
        )
        .bind(filter.project.as_ref().map(ProjectName::as_str))
        .bind(filter.environment.as_ref().map(EnvironmentName::as_str))
        .bind(filter.cluster.as_ref().map(ClusterName::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter()
            .map(EnvironmentAllocation::try_from)
            .collect()
    }

    #[instrument(skip(self, filter))]
    async fn delete(&self, filter: &AllocationFilter) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM environment_allocations
            WHERE ($1::TEXT IS NULL OR project = $1)
              AND ($2::TEXT IS NULL OR environment = $2)
              AND ($3::TEXT IS NULL OR cluster = $3)
            "#,
        )
        .bind(filter.project.as_ref().map(ProjectName::as_str))
        .bind(filter.environment.as_ref().map(EnvironmentName::as_str))
        .bind(filter.cluster.as_ref().map(ClusterName::as_str))
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected())
    }
}
