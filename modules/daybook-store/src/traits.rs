use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use daybook_common::{CuratorSession, EventRecord, RecordPatch};

use crate::error::StoreError;

/// Minutes after which a date lock is considered abandoned.
pub const LOCK_STALE_MINUTES: i64 = 30;

/// Keyed store of one [`EventRecord`] per calendar day.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, date: NaiveDate) -> Result<Option<EventRecord>, StoreError>;

    /// Create or update the record for `date`.
    ///
    /// Fails with [`StoreError::ManualOverride`] when an automated patch touches
    /// content, verification or ownership fields of a manual record.
    async fn upsert(&self, date: NaiveDate, patch: RecordPatch) -> Result<EventRecord, StoreError>;

    async fn list_flagged(&self) -> Result<Vec<EventRecord>, StoreError>;

    /// Records with `start <= date <= end`, ascending.
    async fn list_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EventRecord>, StoreError>;

    /// Every stored date, ascending.
    async fn list_dates(&self) -> Result<Vec<NaiveDate>, StoreError>;

    /// Take the per-date lock. Returns false if another holder has it and the
    /// lock is not stale. Re-taking a lock you already hold succeeds.
    async fn try_lock_date(&self, date: NaiveDate, holder: &str) -> Result<bool, StoreError>;

    async fn unlock_date(&self, date: NaiveDate, holder: &str) -> Result<(), StoreError>;
}

/// Checkpoints for resumable curator runs.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save_session(&self, session: &CuratorSession) -> Result<(), StoreError>;

    async fn load_session(&self, id: Uuid) -> Result<Option<CuratorSession>, StoreError>;

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Apply `patch` to `existing` (or a fresh record), enforcing manual-override ownership.
pub(crate) fn merge(
    date: NaiveDate,
    existing: Option<EventRecord>,
    patch: &RecordPatch,
) -> Result<EventRecord, StoreError> {
    let mut record = existing.unwrap_or_else(|| EventRecord::new(date));
    if record.is_manual_override
        && patch.origin == daybook_common::PatchOrigin::Automated
        && patch.touches_protected()
    {
        return Err(StoreError::ManualOverride(date));
    }
    record.apply(patch, chrono::Utc::now());
    Ok(record)
}
