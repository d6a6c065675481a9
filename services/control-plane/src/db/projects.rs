//! Postgres-backed project registry.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use xpr_names::{EnvironmentName, ProjectName};

use super::{invalid_row, query_error, DbError};
use crate::store::{ProjectPatch, ProjectRecord, ProjectRegistry, StoreError, StoreResult};

const SELECT_PROJECT: &str = r#"
    SELECT name, environments, deployed_environments, currently_deployed, active
    FROM projects
"#;

struct ProjectRow {
    name: String,
    environments: Vec<String>,
    deployed_environments: Vec<String>,
    currently_deployed: bool,
    active: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ProjectRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            name: row.try_get("name")?,
            environments: row.try_get("environments")?,
            deployed_environments: row.try_get("deployed_environments")?,
            currently_deployed: row.try_get("currently_deployed")?,
            active: row.try_get("active")?,
        })
    }
}

fn parse_environments(names: Vec<String>) -> StoreResult<BTreeSet<EnvironmentName>> {
    names
        .into_iter()
        .map(|name| EnvironmentName::try_from(name).map_err(invalid_row))
        .collect()
}

fn to_text_array(environments: &BTreeSet<EnvironmentName>) -> Vec<String> {
    environments.iter().map(|e| e.to_string()).collect()
}

impl TryFrom<ProjectRow> for ProjectRecord {
    type Error = StoreError;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(ProjectRecord {
            name: ProjectName::try_from(row.name).map_err(invalid_row)?,
            environments: parse_environments(row.environments)?,
            deployed_environments: parse_environments(row.deployed_environments)?,
            currently_deployed: row.currently_deployed,
            active: row.active,
        })
    }
}

/// Project registry over the `projects` table.
#[derive(Clone)]
pub struct PgProjectRegistry {
    pool: PgPool,
}

impl PgProjectRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRegistry for PgProjectRegistry {
    #[instrument(skip(self), fields(project = %name))]
    async fn find_project(&self, name: &ProjectName) -> StoreResult<Option<ProjectRecord>> {
        let row: Option<ProjectRow> = sqlx::query_as(&format!("{SELECT_PROJECT} WHERE name = $1"))
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error)?;
        row.map(ProjectRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_projects(&self) -> StoreResult<Vec<ProjectRecord>> {
        let rows: Vec<ProjectRow> = sqlx::query_as(&format!("{SELECT_PROJECT} ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;
        rows.into_iter().map(ProjectRecord::try_from).collect()
    }

    #[instrument(skip(self, project), fields(project = %project.name))]
    async fn insert_project(&self, project: &ProjectRecord) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO projects (
                name, environments, deployed_environments, currently_deployed, active,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(project.name.as_str())
        .bind(to_text_array(&project.environments))
        .bind(to_text_array(&project.deployed_environments))
        .bind(project.currently_deployed)
        .bind(project.active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = DbError::Query(e);
                if err.is_unique_violation() {
                    Err(StoreError::Conflict {
                        kind: "project",
                        key: project.name.to_string(),
                    })
                } else {
                    Err(StoreError::Db(err))
                }
            }
        }
    }

    #[instrument(skip(self, patch), fields(project = %name))]
    async fn update_project(&self, name: &ProjectName, patch: &ProjectPatch) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE projects
            SET environments = COALESCE($2, environments),
                deployed_environments = COALESCE($3, deployed_environments),
                currently_deployed = COALESCE($4, currently_deployed),
                active = COALESCE($5, active),
                updated_at = $6
            WHERE name = $1
            "#,
        )
        .bind(name.as_str())
        .bind(patch.environments.as_ref().map(to_text_array))
        .bind(patch.deployed_environments.as_ref().map(to_text_array))
        .bind(patch.currently_deployed)
        .bind(patch.active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "project",
                key: name.to_string(),
            });
        }
        Ok(())
    }
}
