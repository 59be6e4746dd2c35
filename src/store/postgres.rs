use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{generate_id, Id};
use crate::store::traits::{Filter, Persistence};

/// Records stored as JSONB documents in a single `apiforge_records` table
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the records table if it does not exist yet
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS apiforge_records (
                resource TEXT NOT NULL,
                id TEXT NOT NULL,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (resource, id)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create apiforge_records table")?;

        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for PostgresPersistence {
    async fn find(&self, resource: &str, filter: &Filter) -> Result<Vec<Value>> {
        let rows = sqlx::query(
            "SELECT data FROM apiforge_records WHERE resource = $1 AND data @> $2 ORDER BY created_at",
        )
        .bind(resource)
        .bind(Value::Object(filter.clone()))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to query {}", resource))?;

        Ok(rows.iter().map(|row| row.get::<Value, _>("data")).collect())
    }

    async fn find_one(&self, resource: &str, id: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT data FROM apiforge_records WHERE resource = $1 AND id = $2")
            .bind(resource)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to fetch {} {}", resource, id))?;

        Ok(row.map(|row| row.get::<Value, _>("data")))
    }

    async fn insert(&self, resource: &str, data: Value) -> Result<Id> {
        let Value::Object(mut record) = data else {
            return Err(anyhow!("{} records must be JSON objects", resource));
        };

        let id = match record.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => generate_id(),
        };
        record.insert("id".to_string(), Value::String(id.clone()));

        sqlx::query("INSERT INTO apiforge_records (resource, id, data) VALUES ($1, $2, $3)")
            .bind(resource)
            .bind(&id)
            .bind(Value::Object(record))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert into {}", resource))?;

        Ok(id)
    }

    async fn update(&self, resource: &str, id: &str, data: Value) -> Result<()> {
        let Value::Object(mut changes) = data else {
            return Err(anyhow!("{} updates must be JSON objects", resource));
        };
        changes.remove("id");

        sqlx::query(
            "UPDATE apiforge_records SET data = data || $3, updated_at = now() WHERE resource = $1 AND id = $2",
        )
        .bind(resource)
        .bind(id)
        .bind(Value::Object(changes))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update {} {}", resource, id))?;

        Ok(())
    }

    async fn delete(&self, resource: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM apiforge_records WHERE resource = $1 AND id = $2")
            .bind(resource)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete {} {}", resource, id))?;

        Ok(())
    }
}
