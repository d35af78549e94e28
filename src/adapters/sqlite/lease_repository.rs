//! SQLite implementation of the LeaseStore.
//!
//! Every engine pointed at the same database file shares its leases, so
//! separate processes coordinate probes through it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AttemptId, ClaimOutcome, ConversationId, ProbeLease};
use crate::domain::ports::LeaseStore;

#[derive(Debug, Clone)]
pub struct SqliteLeaseStore {
    pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete leases that expired before `now`. Returns how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM probe_leases WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct LeaseRow {
    conversation_id: String,
    owner_attempt_id: String,
    expires_at_ms: i64,
}

impl TryFrom<LeaseRow> for ProbeLease {
    type Error = DomainError;

    fn try_from(row: LeaseRow) -> Result<Self, Self::Error> {
        let expires_at = Utc
            .timestamp_millis_opt(row.expires_at_ms)
            .single()
            .ok_or_else(|| {
                DomainError::SerializationError(format!(
                    "invalid lease expiry {}",
                    row.expires_at_ms
                ))
            })?;
        Ok(Self {
            conversation_id: ConversationId::new(row.conversation_id),
            owner_attempt_id: AttemptId::new(row.owner_attempt_id),
            expires_at,
        })
    }
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    async fn claim(
        &self,
        conversation_id: &ConversationId,
        owner: &AttemptId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DomainResult<ClaimOutcome> {
        let lease = ProbeLease::new(conversation_id.clone(), owner.clone(), now, ttl);
        let mut tx = self.pool.begin().await?;

        // The conflict clause only overwrites an expired row or our own.
        let result = sqlx::query(
            r#"INSERT INTO probe_leases (conversation_id, owner_attempt_id, expires_at_ms)
               VALUES (?, ?, ?)
               ON CONFLICT(conversation_id) DO UPDATE SET
                   owner_attempt_id = excluded.owner_attempt_id,
                   expires_at_ms = excluded.expires_at_ms,
                   claimed_at = datetime('now')
               WHERE probe_leases.expires_at_ms <= ?
                  OR probe_leases.owner_attempt_id = excluded.owner_attempt_id"#,
        )
        .bind(conversation_id.as_str())
        .bind(owner.as_str())
        .bind(lease.expires_at.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let outcome = if result.rows_affected() > 0 {
            ClaimOutcome::acquired(&lease)
        } else {
            let row: LeaseRow = sqlx::query_as(
                "SELECT conversation_id, owner_attempt_id, expires_at_ms FROM probe_leases \
                 WHERE conversation_id = ?",
            )
            .bind(conversation_id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            ClaimOutcome::contended(&ProbeLease::try_from(row)?)
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn release(
        &self,
        conversation_id: &ConversationId,
        owner: &AttemptId,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            "DELETE FROM probe_leases WHERE conversation_id = ? AND owner_attempt_id = ?",
        )
        .bind(conversation_id.as_str())
        .bind(owner.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn current(
        &self,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<ProbeLease>> {
        let row: Option<LeaseRow> = sqlx::query_as(
            "SELECT conversation_id, owner_attempt_id, expires_at_ms FROM probe_leases \
             WHERE conversation_id = ? AND expires_at_ms > ?",
        )
        .bind(conversation_id.as_str())
        .bind(now.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProbeLease::try_from).transpose()
    }
}
