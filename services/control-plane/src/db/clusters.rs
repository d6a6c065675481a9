//! Postgres-backed cluster registry.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use xpr_names::ClusterName;

use super::{invalid_row, query_error, DbError};
use crate::store::{Cluster, ClusterRegistry, StoreError, StoreResult};

const SELECT_CLUSTER: &str = r#"
    SELECT name, active, master_node_address, worker_node_addresses
    FROM clusters
"#;

struct ClusterRow {
    name: String,
    active: bool,
    master_node_address: Option<String>,
    worker_node_addresses: Vec<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ClusterRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            name: row.try_get("name")?,
            active: row.try_get("active")?,
            master_node_address: row.try_get("master_node_address")?,
            worker_node_addresses: row.try_get("worker_node_addresses")?,
        })
    }
}

impl TryFrom<ClusterRow> for Cluster {
    type Error = StoreError;

    fn try_from(row: ClusterRow) -> Result<Self, Self::Error> {
        Ok(Cluster {
            name: ClusterName::try_from(row.name).map_err(invalid_row)?,
            active: row.active,
            master_node_address: row.master_node_address,
            worker_node_addresses: row.worker_node_addresses.into_iter().collect(),
        })
    }
}

/// Cluster registry over the `clusters` table.
#[derive(Clone)]
pub struct PgClusterRegistry {
    pool: PgPool,
}

impl PgClusterRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, sql: &str) -> StoreResult<Vec<Cluster>> {
        let rows: Vec<ClusterRow> = sqlx::query_as(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        rows.into_iter().map(Cluster::try_from).collect()
    }
}

#[async_trait]
impl ClusterRegistry for PgClusterRegistry {
    #[instrument(skip(self))]
    async fn find_active_clusters(&self) -> StoreResult<Vec<Cluster>> {
        self.fetch(&format!("{SELECT_CLUSTER} WHERE active ORDER BY name"))
            .await
    }

    #[instrument(skip(self), fields(cluster = %name))]
    async fn find_cluster(&self, name: &ClusterName) -> StoreResult<Option<Cluster>> {
        let row: Option<ClusterRow> = sqlx::query_as(&format!("{SELECT_CLUSTER} WHERE name = $1"))
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.map(Cluster::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_clusters(&self) -> StoreResult<Vec<Cluster>> {
        self.fetch(&format!("{SELECT_CLUSTER} ORDER BY name")).await
    }

    #[instrument(skip(self, cluster), fields(cluster = %cluster.name))]
    async fn insert_cluster(&self, cluster: &Cluster) -> StoreResult<()> {
        let workers: Vec<String> = cluster.worker_node_addresses.iter().cloned().collect();

        let result = sqlx::query(
            r#"
            INSERT INTO clusters (name, active, master_node_address, worker_node_addresses)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(cluster.name.as_str())
        .bind(cluster.active)
        .bind(cluster.master_node_address.as_deref())
        .bind(workers)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = DbError::Query(e);
                if err.is_unique_violation() {
                    Err(StoreError::Conflict {
                        kind: "cluster",
                        key: cluster.name.to_string(),
                    })
                } else {
                    Err(StoreError::Db(err))
                }
            }
        }
    }

    #[instrument(skip(self), fields(cluster = %name))]
    async fn set_cluster_active(&self, name: &ClusterName, active: bool) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE clusters
            SET active = $2, updated_at = now()
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .bind(active)
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }
}
