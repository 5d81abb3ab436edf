use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use daybook_common::{CuratorSession, EventRecord, RecordPatch};

use crate::error::StoreError;
use crate::traits::{merge, RecordStore, SessionStore, LOCK_STALE_MINUTES};

/// Postgres-backed record and session store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables if they do not exist. Safe to run on every startup.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS event_records (
                date DATE PRIMARY KEY,
                record JSONB NOT NULL,
                is_flagged BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            "CREATE INDEX IF NOT EXISTS event_records_flagged_idx
                ON event_records (date) WHERE is_flagged",
            "CREATE TABLE IF NOT EXISTS curator_sessions (
                id UUID PRIMARY KEY,
                snapshot JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            "CREATE TABLE IF NOT EXISTS date_locks (
                date DATE PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Postgres schema ready");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get(&self, date: NaiveDate) -> Result<Option<EventRecord>, StoreError> {
        let row = sqlx::query_scalar::<_, Json<EventRecord>>(
            "SELECT record FROM event_records WHERE date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(record)| record))
    }

    async fn upsert(&self, date: NaiveDate, patch: RecordPatch) -> Result<EventRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_scalar::<_, Json<EventRecord>>(
            "SELECT record FROM event_records WHERE date = $1 FOR UPDATE",
        )
        .bind(date)
        .fetch_optional(&mut *tx)
        .await?
        .map(|Json(record)| record);

        let record = merge(date, existing, &patch)?;

        sqlx::query(
            "INSERT INTO event_records (date, record, is_flagged, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (date) DO UPDATE
             SET record = EXCLUDED.record,
                 is_flagged = EXCLUDED.is_flagged,
                 updated_at = now()",
        )
        .bind(date)
        .bind(Json(&record))
        .bind(record.is_flagged)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn list_flagged(&self) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query_scalar::<_, Json<EventRecord>>(
            "SELECT record FROM event_records WHERE is_flagged ORDER BY date",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn list_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows = sqlx::query_scalar::<_, Json<EventRecord>>(
            "SELECT record FROM event_records WHERE date BETWEEN $1 AND $2 ORDER BY date",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|Json(r)| r).collect())
    }

    async fn list_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let dates = sqlx::query_scalar::<_, NaiveDate>("SELECT date FROM event_records ORDER BY date")
            .fetch_all(&self.pool)
            .await?;
        Ok(dates)
    }

    async fn try_lock_date(&self, date: NaiveDate, holder: &str) -> Result<bool, StoreError> {
        // Stale locks are overwritten; a live lock only by its own holder.
        let result = sqlx::query(
            "INSERT INTO date_locks (date, holder, acquired_at)
             VALUES ($1, $2, now())
             ON CONFLICT (date) DO UPDATE
             SET holder = EXCLUDED.holder, acquired_at = now()
             WHERE date_locks.holder = EXCLUDED.holder
                OR date_locks.acquired_at < now() - make_interval(mins => $3)",
        )
        .bind(date)
        .bind(holder)
        .bind(LOCK_STALE_MINUTES as i32)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock_date(&self, date: NaiveDate, holder: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM date_locks WHERE date = $1 AND holder = $2")
            .bind(date)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn save_session(&self, session: &CuratorSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO curator_sessions (id, snapshot, updated_at)
             VALUES ($1, $2, now())
             ON CONFLICT (id) DO UPDATE
             SET snapshot = EXCLUDED.snapshot, updated_at = now()",
        )
        .bind(session.id)
        .bind(Json(session))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<CuratorSession>, StoreError> {
        let row = sqlx::query_scalar::<_, Json<CuratorSession>>(
            "SELECT snapshot FROM curator_sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(session)| session))
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM curator_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
