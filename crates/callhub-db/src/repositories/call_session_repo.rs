//! Call session repository implementation
//!
//! Every write is an idempotent upsert keyed by the provider call id. The
//! stored row is locked with `SELECT ... FOR UPDATE`, merged in Rust with
//! `CallSession::merge_from` and written back, so concurrent and reordered
//! writers converge on one widened row. Uses runtime queries (not
//! compile-time macros) to avoid requiring a database at build time.

use async_trait::async_trait;
use callhub_core::{
    models::{CallSession, CallStatus, HandledBy},
    traits::CallRecordRepository,
    AppError, AppResult,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, instrument};

/// PostgreSQL implementation of CallRecordRepository
pub struct PgCallSessionRepository {
    pool: PgPool,
}

impl PgCallSessionRepository {
    /// Create a new call session repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_row(
        tx: &mut Transaction<'_, Postgres>,
        call_id: &str,
    ) -> AppResult<Option<CallSession>> {
        let query = format!(
            "SELECT {} FROM call_sessions WHERE call_id = $1 FOR UPDATE",
            SESSION_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, CallSessionRow>(&query)
            .bind(call_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| {
                error!("Database error locking call session {}: {}", call_id, e);
                AppError::Database(format!("Failed to lock call session: {}", e))
            })?;

        row.map(CallSession::try_from).transpose()
    }

    /// `true` when the row was inserted, `false` when another writer got there first
    async fn insert_new(
        tx: &mut Transaction<'_, Postgres>,
        session: &CallSession,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO call_sessions (
                call_id, owner_user_id, from_address, to_address, status,
                created_at, answered_at, ended_at, duration_seconds,
                handled_by, recording_ref, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (call_id) DO NOTHING
            "#,
        )
        .bind(&session.call_id)
        .bind(&session.owner_user_id)
        .bind(&session.from_address)
        .bind(&session.to_address)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.answered_at)
        .bind(session.ended_at)
        .bind(session.duration_seconds)
        .bind(session.handled_by.map(HandledBy::as_str))
        .bind(&session.recording_ref)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Database error inserting call session {}: {}", session.call_id, e);
            AppError::Database(format!("Failed to insert call session: {}", e))
        })?;

        Ok(result.rows_affected() == 1)
    }

    async fn write_merged(
        tx: &mut Transaction<'_, Postgres>,
        session: &CallSession,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE call_sessions
            SET owner_user_id = $2,
                from_address = $3,
                to_address = $4,
                status = $5,
                created_at = $6,
                answered_at = $7,
                ended_at = $8,
                duration_seconds = $9,
                handled_by = $10,
                recording_ref = $11,
                updated_at = $12
            WHERE call_id = $1
            "#,
        )
        .bind(&session.call_id)
        .bind(&session.owner_user_id)
        .bind(&session.from_address)
        .bind(&session.to_address)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .bind(session.answered_at)
        .bind(session.ended_at)
        .bind(session.duration_seconds)
        .bind(session.handled_by.map(HandledBy::as_str))
        .bind(&session.recording_ref)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            error!("Database error updating call session {}: {}", session.call_id, e);
            AppError::Database(format!("Failed to update call session: {}", e))
        })?;

        Ok(())
    }
}

const SESSION_SELECT_COLUMNS: &str = r#"
    call_id, owner_user_id, from_address, to_address, status,
    created_at, answered_at, ended_at, duration_seconds,
    handled_by, recording_ref, updated_at
"#;

#[async_trait]
impl CallRecordRepository for PgCallSessionRepository {
    #[instrument(skip(self, session), fields(call_id = %session.call_id, status = %session.status))]
    async fn upsert(&self, session: &CallSession) -> AppResult<CallSession> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            AppError::Transaction(format!("Failed to start transaction: {}", e))
        })?;

        let stored = match Self::lock_row(&mut tx, &session.call_id).await? {
            Some(existing) => Some(existing),
            None => {
                if Self::insert_new(&mut tx, session).await? {
                    None
                } else {
                    // Lost the insert race; the winner's row is committed now
                    Self::lock_row(&mut tx, &session.call_id).await?
                }
            }
        };

        let result = match stored {
            Some(mut stored) => {
                stored.merge_from(session);
                Self::write_merged(&mut tx, &stored).await?;
                debug!("Merged call session into stored row");
                stored
            }
            None => {
                debug!("Inserted new call session");
                session.clone()
            }
        };

        tx.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            AppError::Transaction(format!("Failed to commit transaction: {}", e))
        })?;

        Ok(result)
    }

    #[instrument(skip(self))]
    async fn find_by_call_id(&self, call_id: &str) -> AppResult<Option<CallSession>> {
        debug!("Finding call session: {}", call_id);

        let query = format!(
            "SELECT {} FROM call_sessions WHERE call_id = $1",
            SESSION_SELECT_COLUMNS
        );

        let row = sqlx::query_as::<Postgres, CallSessionRow>(&query)
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error finding call session {}: {}", call_id, e);
                AppError::Database(format!("Failed to find call session: {}", e))
            })?;

        row.map(CallSession::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_owner(
        &self,
        owner_user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<CallSession>, i64)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM call_sessions WHERE owner_user_id = $1")
                .bind(owner_user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    error!("Database error counting call sessions: {}", e);
                    AppError::Database(format!("Failed to count call sessions: {}", e))
                })?;

        let query = format!(
            r#"
            SELECT {}
            FROM call_sessions
            WHERE owner_user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            SESSION_SELECT_COLUMNS
        );

        let rows = sqlx::query_as::<Postgres, CallSessionRow>(&query)
            .bind(owner_user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Database error listing call sessions: {}", e);
                AppError::Database(format!("Failed to fetch call sessions: {}", e))
            })?;

        let sessions = rows
            .into_iter()
            .map(CallSession::try_from)
            .collect::<AppResult<Vec<_>>>()?;

        Ok((sessions, total.0))
    }
}

/// Helper struct for mapping database rows to domain model
#[derive(Debug, sqlx::FromRow)]
struct CallSessionRow {
    call_id: String,
    owner_user_id: Option<String>,
    from_address: String,
    to_address: String,
    status: String,
    created_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i32>,
    handled_by: Option<String>,
    recording_ref: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CallSessionRow> for CallSession {
    type Error = AppError;

    fn try_from(row: CallSessionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<CallStatus>()
            .map_err(AppError::Database)?;
        let handled_by = row
            .handled_by
            .as_deref()
            .map(str::parse::<HandledBy>)
            .transpose()
            .map_err(AppError::Database)?;

        Ok(Self {
            call_id: row.call_id,
            owner_user_id: row.owner_user_id,
            from_address: row.from_address,
            to_address: row.to_address,
            status,
            created_at: row.created_at,
            answered_at: row.answered_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            handled_by,
            recording_ref: row.recording_ref,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::create_pool;
    use callhub_core::config::DatabaseConfig;
    use callhub_core::models::Transition;
    use chrono::Duration;

    fn row(status: &str, handled_by: Option<&str>) -> CallSessionRow {
        let now = Utc::now();
        CallSessionRow {
            call_id: "CA1".to_string(),
            owner_user_id: Some("user-1".to_string()),
            from_address: "+15550001".to_string(),
            to_address: "+15550100".to_string(),
            status: status.to_string(),
            created_at: now,
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
            handled_by: handled_by.map(str::to_string),
            recording_ref: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion() {
        let session = CallSession::try_from(row("voicemail", Some("voicemail"))).unwrap();
        assert_eq!(session.status, CallStatus::Voicemail);
        assert_eq!(session.handled_by, Some(HandledBy::Voicemail));
        assert_eq!(session.owner_user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_row_conversion_rejects_unknown_values() {
        assert!(matches!(
            CallSession::try_from(row("on-hold", None)),
            Err(AppError::Database(_))
        ));
        assert!(matches!(
            CallSession::try_from(row("ringing", Some("robot"))),
            Err(AppError::Database(_))
        ));
    }

    async fn repo() -> PgCallSessionRepository {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/callhub".to_string()),
            max_connections: 5,
            run_migrations: true,
        };
        PgCallSessionRepository::new(create_pool(&config).await.unwrap())
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_upsert_converges_out_of_order() {
        let repo = repo().await;
        let call_id = format!("CA-test-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));

        let ringing = CallSession::new(&call_id, Some("user-1".into()), "+1", "+2", Utc::now());
        let mut answered = ringing.clone();
        answered.apply(Transition::Answer, ringing.created_at + Duration::seconds(2));
        let mut completed = answered.clone();
        completed.apply(
            Transition::Complete {
                provider_duration: Some(30),
            },
            ringing.created_at + Duration::seconds(32),
        );

        repo.upsert(&completed).await.unwrap();
        repo.upsert(&ringing).await.unwrap();
        let stored = repo.upsert(&answered).await.unwrap();

        assert_eq!(stored.status, CallStatus::Completed);
        assert_eq!(stored.duration_seconds, Some(30));

        let found = repo.find_by_call_id(&call_id).await.unwrap().unwrap();
        assert_eq!(found.status, CallStatus::Completed);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_concurrent_upserts_single_row() {
        let repo = std::sync::Arc::new(repo().await);
        let call_id = format!("CA-race-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
        let session = CallSession::new(&call_id, Some("user-2".into()), "+1", "+2", Utc::now());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                let session = session.clone();
                tokio::spawn(async move { repo.upsert(&session).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let (rows, _) = repo.list_by_owner("user-2", 100, 0).await.unwrap();
        assert_eq!(rows.iter().filter(|s| s.call_id == call_id).count(), 1);
    }
}
