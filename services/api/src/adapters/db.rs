//! services/api/src/adapters/db.rs
//!
//! This module contains the persistent session store, the concrete implementation
//! of the `SessionBackend` port from `visualize_core`. It keeps one row per session
//! in the PostgreSQL `sessions` table using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool};
use tracing::warn;
use visualize_core::domain::{Component, Difficulty, SessionRecord, SessionUpdate, Turn};
use visualize_core::ports::{PortError, PortResult, SessionBackend};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `SessionBackend` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Every store failure is an outage from the session manager's point of view.
fn store_error(e: sqlx::Error) -> PortError {
    PortError::Unavailable(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SessionRow {
    session_id: String,
    image_data: Option<String>,
    image_type: Option<String>,
    image_description: Option<String>,
    components: Json<Vec<Component>>,
    conversation_history: Json<Vec<Turn>>,
    difficulty: String,
    expires_at: DateTime<Utc>,
}

impl SessionRow {
    fn to_domain(self) -> SessionRecord {
        let difficulty = self.difficulty.parse::<Difficulty>().unwrap_or_else(|e| {
            warn!(session_id = %self.session_id, error = %e, "Stored difficulty unreadable; using default");
            Difficulty::default()
        });
        SessionRecord {
            session_id: self.session_id,
            image_data: self.image_data.unwrap_or_default(),
            image_type: self.image_type.unwrap_or_default(),
            image_description: self.image_description,
            components: self.components.0,
            conversation_history: self.conversation_history.0,
            difficulty,
            expires_at: self.expires_at,
        }
    }
}

//=========================================================================================
// `SessionBackend` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionBackend for DbAdapter {
    async fn upsert(&self, record: &SessionRecord) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO sessions (session_id, image_data, image_type, image_description, components, conversation_history, difficulty, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (session_id) DO UPDATE SET \
                image_data = EXCLUDED.image_data, \
                image_type = EXCLUDED.image_type, \
                image_description = EXCLUDED.image_description, \
                components = EXCLUDED.components, \
                conversation_history = EXCLUDED.conversation_history, \
                difficulty = EXCLUDED.difficulty, \
                expires_at = EXCLUDED.expires_at",
        )
        .bind(&record.session_id)
        .bind(&record.image_data)
        .bind(&record.image_type)
        .bind(&record.image_description)
        .bind(Json(&record.components))
        .bind(Json(&record.conversation_history))
        .bind(record.difficulty.as_str())
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn get_live(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT session_id, image_data, image_type, image_description, components, conversation_history, difficulty, expires_at \
             FROM sessions WHERE session_id = $1 AND expires_at > $2",
        )
        .bind(session_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(row.map(SessionRow::to_domain))
    }

    async fn update(
        &self,
        session_id: &str,
        changes: &SessionUpdate,
        expires_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET \
                conversation_history = COALESCE($2, conversation_history), \
                components = COALESCE($3, components), \
                difficulty = COALESCE($4, difficulty), \
                image_description = COALESCE($5, image_description), \
                expires_at = $6 \
             WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(changes.conversation_history.as_ref().map(Json))
        .bind(changes.components.as_ref().map(Json))
        .bind(changes.difficulty.map(|d| d.as_str()))
        .bind(changes.image_description.as_deref())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, session_id: &str) -> PortResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> PortResult<usize> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_live(&self, now: DateTime<Utc>) -> PortResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE expires_at > $1")
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(count.max(0) as usize)
    }

    async fn delete_all(&self) -> PortResult<usize> {
        let result = sqlx::query("DELETE FROM sessions")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;
    use visualize_core::domain::NewSession;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// Needs a disposable Postgres: `DATABASE_URL=... cargo test -- --ignored`.
    async fn adapter() -> DbAdapter {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pool = PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap();
        let adapter = DbAdapter::new(pool);
        adapter.run_migrations().await.unwrap();
        adapter
    }

    #[tokio::test]
    #[ignore]
    async fn partial_update_keeps_unset_columns() {
        let db = adapter().await;
        let id = Uuid::new_v4().to_string();
        let record = NewSession {
            image_description: Some("a pump".into()),
            components: vec![Component { name: "Impeller".into(), x: 50.0, y: 50.0 }],
            difficulty: Difficulty::Advanced,
            ..NewSession::new("aW1n", "image/png")
        }
        .into_record(&id, at(1_000));
        db.upsert(&record).await.unwrap();

        let history = vec![Turn::user("how fast?"), Turn::assistant("3000 rpm")];
        assert!(db
            .update(&id, &SessionUpdate::history(history.clone()), at(2_000))
            .await
            .unwrap());

        let stored = db.get_live(&id, at(1_500)).await.unwrap().unwrap();
        assert_eq!(stored.conversation_history, history);
        assert_eq!(stored.image_description.as_deref(), Some("a pump"));
        assert_eq!(stored.components, record.components);
        assert_eq!(stored.difficulty, Difficulty::Advanced);
        assert_eq!(stored.expires_at, at(2_000));

        assert!(db.delete(&id).await.unwrap());
        assert!(!db.update(&id, &SessionUpdate::default(), at(3_000)).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn reads_and_sweeps_respect_expiry() {
        let db = adapter().await;
        let id = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + Duration::minutes(5);
        db.upsert(&NewSession::new("aW1n", "image/gif").into_record(&id, expires_at))
            .await
            .unwrap();

        assert!(db.get_live(&id, expires_at - Duration::seconds(1)).await.unwrap().is_some());
        assert!(db.get_live(&id, expires_at).await.unwrap().is_none());

        assert!(db.delete_expired(expires_at).await.unwrap() >= 1);
        assert!(!db.delete(&id).await.unwrap());
    }
}
