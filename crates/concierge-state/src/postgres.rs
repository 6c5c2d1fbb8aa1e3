// Relational state backend
//
// Table shapes and upsert style are grounded on the original Python backend's
// concierge_session_stages / concierge_session_state tables (see
// migrations/0001_concierge_state.sql at the workspace root). Database/PgPool
// wiring follows everruns-storage::repositories::Database.

use async_trait::async_trait;
use concierge_core::error::{ConciergeError, Result};
use concierge_core::state::StateBackend;
use serde_json::Value;
use sqlx::PgPool;

#[derive(Clone)]
pub struct PostgresState {
    pool: PgPool,
}

impl PostgresState {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateBackend for PostgresState {
    async fn get_stage(&self, session_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT stage FROM concierge_session_stages WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(row.map(|(stage,)| stage))
    }

    async fn set_stage(&self, session_id: &str, stage: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO concierge_session_stages (session_id, stage, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (session_id) DO UPDATE SET stage = EXCLUDED.stage, updated_at = now()
            "#,
        )
        .bind(session_id)
        .bind(stage)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_stage(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM concierge_session_stages WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, session_id: &str, key: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT value FROM concierge_session_state WHERE session_id = $1 AND key = $2",
        )
        .bind(session_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, session_id: &str, key: &str, value: Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO concierge_session_state (session_id, key, value, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (session_id, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(session_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        // Unlike the original's two unguarded DELETEs, wrap both in one
        // transaction so a concurrent reader never observes a half-cleared
        // session.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;

        sqlx::query("DELETE FROM concierge_session_stages WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;

        sqlx::query("DELETE FROM concierge_session_state WHERE session_id = $1")
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(())
    }

    async fn keys(&self, session_id: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM concierge_session_state WHERE session_id = $1")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| ConciergeError::storage_unavailable(e.to_string()))?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
