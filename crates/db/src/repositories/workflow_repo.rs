//! Repository for the `workflows` table.

use std::collections::BTreeMap;

use sqlx::{PgConnection, PgExecutor, PgPool};
use ontask_core::types::DbId;
use ontask_core::workflow::Workflow;

use crate::models::workflow::WorkflowRow;

/// Column list for `workflows` queries.
const COLUMNS: &str = "\
    id, owner_id, name, description_text, attributes, time_zone, \
    nrows, ncols, query_builder_ops, created_at, updated_at";

pub struct WorkflowRepo;

impl WorkflowRepo {
    /// Insert the header row of a new workflow.
    pub async fn insert(conn: &mut PgConnection, workflow: &Workflow) -> Result<WorkflowRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflows \
                (owner_id, name, description_text, attributes, time_zone, nrows, ncols, query_builder_ops) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(workflow.owner_id)
            .bind(&workflow.name)
            .bind(&workflow.description_text)
            .bind(attributes_json(&workflow.attributes))
            .bind(workflow.time_zone.to_string())
            .bind(workflow.nrows() as i32)
            .bind(workflow.ncols() as i32)
            .bind(workflow.cached_query_builder_ops().cloned())
            .fetch_one(&mut *conn)
            .await
    }

    pub async fn find_by_id(db: impl PgExecutor<'_>, id: DbId) -> Result<Option<WorkflowRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(id)
            .fetch_optional(db)
            .await
    }

    /// Workflows of one owner, most recently updated first.
    pub async fn list_for_owner(pool: &PgPool, owner_id: DbId) -> Result<Vec<WorkflowRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflows WHERE owner_id = $1 ORDER BY updated_at DESC, id DESC"
        );
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(owner_id)
            .fetch_all(pool)
            .await
    }

    /// Rewrite the header row from the aggregate.
    pub async fn update(conn: &mut PgConnection, id: DbId, workflow: &Workflow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE workflows SET \
                name = $2, description_text = $3, attributes = $4, time_zone = $5, \
                nrows = $6, ncols = $7, query_builder_ops = $8 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(&workflow.name)
        .bind(&workflow.description_text)
        .bind(attributes_json(&workflow.attributes))
        .bind(workflow.time_zone.to_string())
        .bind(workflow.nrows() as i32)
        .bind(workflow.ncols() as i32)
        .bind(workflow.cached_query_builder_ops().cloned())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Delete a workflow row. Descendant rows go with it via `ON DELETE CASCADE`.
    pub async fn delete(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Serialize writers of one workflow until the transaction ends.
    pub async fn lock(conn: &mut PgConnection, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

pub fn attributes_json(attributes: &BTreeMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

/// Read the stored attribute map; non-string values are rendered as JSON.
pub fn attributes_from_json(json: &serde_json::Value) -> BTreeMap<String, String> {
    match json {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}
