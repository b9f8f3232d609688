// src/store/postgres.rs
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, Pool, Postgres};
use tracing::info;

use super::{now_millis, resolve_server_values, validate_path, DocumentStore, StoreResult};
use crate::errors::StoreError;

/// Document store backed by a Postgres `documents` table
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    /// Connect and apply migrations
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
        Self::new(pool).await
    }

    pub async fn new(pool: Pool<Postgres>) -> StoreResult<Self> {
        info!("Running document store migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

fn prepare(path: &str, mut value: Value) -> StoreResult<Value> {
    validate_path(path)?;
    resolve_server_values(&mut value, now_millis());
    Ok(value)
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, path: &str) -> StoreResult<Option<Value>> {
        validate_path(path)?;
        let value: Option<Json<Value>> =
            sqlx::query_scalar("SELECT value FROM documents WHERE path = $1")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|Json(v)| v))
    }

    async fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let value = prepare(path, value)?;
        sqlx::query(
            "INSERT INTO documents (path, value) VALUES ($1, $2)
             ON CONFLICT (path) DO UPDATE
             SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(path)
        .bind(Json(value))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> StoreResult<()> {
        let fields = prepare(path, fields)?;
        if !fields.is_object() {
            return Err(StoreError::InvalidUpdate(path.to_string()));
        }
        sqlx::query(
            "INSERT INTO documents (path, value) VALUES ($1, $2)
             ON CONFLICT (path) DO UPDATE
             SET value = CASE
                     WHEN jsonb_typeof(documents.value) = 'object'
                     THEN documents.value || EXCLUDED.value
                     ELSE EXCLUDED.value
                 END,
                 updated_at = now()",
        )
        .bind(path)
        .bind(Json(fields))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_if_absent(&self, path: &str, value: Value) -> StoreResult<bool> {
        let value = prepare(path, value)?;
        let result = sqlx::query(
            "INSERT INTO documents (path, value) VALUES ($1, $2)
             ON CONFLICT (path) DO NOTHING",
        )
        .bind(path)
        .bind(Json(value))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment(&self, path: &str, field: &str, delta: i64) -> StoreResult<i64> {
        validate_path(path)?;
        let next: i64 = sqlx::query_scalar(
            "INSERT INTO documents (path, value)
             VALUES ($1, jsonb_build_object($2::text, $3::bigint))
             ON CONFLICT (path) DO UPDATE
             SET value = documents.value || jsonb_build_object(
                     $2::text,
                     COALESCE((documents.value ->> $2::text)::bigint, 0) + $3::bigint
                 ),
                 updated_at = now()
             RETURNING (value ->> $2::text)::bigint",
        )
        .bind(path)
        .bind(field)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(next)
    }
}
