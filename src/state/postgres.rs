//! PostgreSQL session store
//!
//! One row per session; the state is stored as JSON text next to a version
//! column used for optimistic concurrency.

use crate::error::OrchestrationError;
use crate::state::store::{SessionGuard, SessionLocks, SessionStore};
use crate::state::ConversationState;
use crate::Result;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

pub struct PostgresSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
    locks: SessionLocks,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
            locks: SessionLocks::new(),
        }
    }

    /// Build a lazily-connecting pool for `database_url`.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| {
                OrchestrationError::Database(format!("Failed to configure session store pool: {}", e))
            })?;

        info!("Session store backend: postgres");
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_sessions (
                      session_id TEXT PRIMARY KEY,
                      state TEXT NOT NULL,
                      version BIGINT NOT NULL,
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::Database(format!(
                    "Failed to initialize session store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT state FROM conversation_sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                OrchestrationError::Database(format!("Failed to load session {}: {}", session_id, e))
            })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("state")?;
        let state: ConversationState = serde_json::from_str(&raw)?;
        Ok(Some(state))
    }

    async fn save(&self, session_id: &str, state: &mut ConversationState) -> Result<()> {
        self.ensure_schema().await?;

        let expected_version = state.version;
        let mut next = state.clone();
        next.version = expected_version + 1;
        let payload = serde_json::to_string(&next)?;

        let result = (if expected_version == 0 {
            sqlx::query(
                r#"
                INSERT INTO conversation_sessions (session_id, state, version, updated_at)
                VALUES ($1, $2, $3, NOW())
                ON CONFLICT (session_id) DO NOTHING
                "#,
            )
            .bind(session_id)
            .bind(&payload)
            .bind(next.version as i64)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE conversation_sessions
                SET state = $2, version = $3, updated_at = NOW()
                WHERE session_id = $1 AND version = $4
                "#,
            )
            .bind(session_id)
            .bind(&payload)
            .bind(next.version as i64)
            .bind(expected_version as i64)
            .execute(&self.pool)
            .await
        })
        .map_err(|e| {
            OrchestrationError::Database(format!("Failed to save session {}: {}", session_id, e))
        })?;

        if result.rows_affected() == 0 {
            return Err(OrchestrationError::State(format!(
                "stale write for session {} at version {}",
                session_id, expected_version
            )));
        }

        state.version = next.version;
        Ok(())
    }

    async fn lock(&self, session_id: &str) -> SessionGuard {
        self.locks.acquire(session_id).await
    }
}
