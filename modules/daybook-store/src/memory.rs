use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use daybook_common::{CuratorSession, EventRecord, RecordPatch};

use crate::error::StoreError;
use crate::traits::{merge, RecordStore, SessionStore, LOCK_STALE_MINUTES};

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<NaiveDate, EventRecord>>,
    sessions: RwLock<HashMap<Uuid, CuratorSession>>,
    locks: RwLock<HashMap<NaiveDate, (String, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing records.
    pub fn with_records(records: impl IntoIterator<Item = EventRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.date, r)).collect();
        Self {
            records: RwLock::new(map),
            ..Default::default()
        }
    }

    /// Replace a record wholesale, bypassing ownership checks.
    pub async fn put(&self, record: EventRecord) {
        self.records.write().await.insert(record.date, record);
    }

    pub async fn all(&self) -> Vec<EventRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_locked(&self, date: NaiveDate) -> bool {
        self.locks.read().await.contains_key(&date)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, date: NaiveDate) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.records.read().await.get(&date).cloned())
    }

    async fn upsert(&self, date: NaiveDate, patch: RecordPatch) -> Result<EventRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = merge(date, records.get(&date).cloned(), &patch)?;
        records.insert(date, record.clone());
        Ok(record)
    }

    async fn list_flagged(&self) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_flagged)
            .cloned()
            .collect())
    }

    async fn list_by_date_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<EventRecord>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .records
            .read()
            .await
            .range(start..=end)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn list_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        Ok(self.records.read().await.keys().copied().collect())
    }

    async fn try_lock_date(&self, date: NaiveDate, holder: &str) -> Result<bool, StoreError> {
        let mut locks = self.locks.write().await;
        let now = Utc::now();
        if let Some((current, acquired_at)) = locks.get(&date) {
            let stale = now - *acquired_at > Duration::minutes(LOCK_STALE_MINUTES);
            if current != holder && !stale {
                return Ok(false);
            }
        }
        locks.insert(date, (holder.to_string(), now));
        Ok(true)
    }

    async fn unlock_date(&self, date: NaiveDate, holder: &str) -> Result<(), StoreError> {
        let mut locks = self.locks.write().await;
        if locks.get(&date).is_some_and(|(h, _)| h == holder) {
            locks.remove(&date);
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save_session(&self, session: &CuratorSession) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<CuratorSession>, StoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> Result<(), StoreError> {
        self.sessions.write().await.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use daybook_common::{AgentConfig, ProviderCheck};

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn manual(date: NaiveDate) -> EventRecord {
        let mut record = EventRecord::new(date);
        record.summary = "Curated by hand".into();
        record.is_manual_override = true;
        record
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = MemoryStore::new();
        let created = store
            .upsert(day(1), RecordPatch::automated().flag("needs review"))
            .await
            .unwrap();
        assert!(created.is_flagged);

        store
            .upsert(day(1), RecordPatch::automated().fact_check(ProviderCheck::failed("timeout")))
            .await
            .unwrap();
        let record = store.get(day(1)).await.unwrap().unwrap();
        assert!(record.is_flagged);
        assert!(record.fact_check_verdict.is_some());
    }

    #[tokio::test]
    async fn automated_patch_cannot_touch_manual_record() {
        let store = MemoryStore::with_records([manual(day(2))]);
        let err = store
            .upsert(day(2), RecordPatch::automated().fact_check(ProviderCheck::failed("x")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ManualOverride(d) if d == day(2)));

        let record = store.get(day(2)).await.unwrap().unwrap();
        assert!(record.fact_check_verdict.is_none());
    }

    #[tokio::test]
    async fn manual_record_can_still_be_flagged_and_edited_by_humans() {
        let store = MemoryStore::with_records([manual(day(3))]);
        store
            .upsert(day(3), RecordPatch::automated().flag("date looks wrong"))
            .await
            .unwrap();
        store
            .upsert(day(3), RecordPatch::human().manual_override(false))
            .await
            .unwrap();
        let record = store.get(day(3)).await.unwrap().unwrap();
        assert!(record.is_flagged);
        assert!(!record.is_manual_override);
    }

    #[tokio::test]
    async fn range_and_flagged_listing() {
        let store = MemoryStore::new();
        for d in [1, 5, 9] {
            store.put(EventRecord::new(day(d))).await;
        }
        store.upsert(day(5), RecordPatch::automated().flag("x")).await.unwrap();

        let range = store.list_by_date_range(day(2), day(9)).await.unwrap();
        assert_eq!(range.iter().map(|r| r.date).collect::<Vec<_>>(), vec![day(5), day(9)]);
        assert!(store.list_by_date_range(day(9), day(1)).await.unwrap().is_empty());

        let flagged = store.list_flagged().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(store.list_dates().await.unwrap(), vec![day(1), day(5), day(9)]);
    }

    #[tokio::test]
    async fn date_lock_excludes_other_holders() {
        let store = MemoryStore::new();
        assert!(store.try_lock_date(day(1), "bulk").await.unwrap());
        assert!(!store.try_lock_date(day(1), "curator").await.unwrap());
        assert!(store.try_lock_date(day(1), "bulk").await.unwrap());

        store.unlock_date(day(1), "curator").await.unwrap();
        assert!(store.is_locked(day(1)).await);

        store.unlock_date(day(1), "bulk").await.unwrap();
        assert!(store.try_lock_date(day(1), "curator").await.unwrap());
    }

    #[tokio::test]
    async fn stale_lock_is_taken_over() {
        let store = MemoryStore::new();
        store.locks.write().await.insert(
            day(1),
            ("crashed".into(), Utc::now() - Duration::minutes(LOCK_STALE_MINUTES + 1)),
        );
        assert!(store.try_lock_date(day(1), "curator").await.unwrap());
    }

    #[tokio::test]
    async fn session_round_trip() {
        let store = MemoryStore::new();
        let mut session = CuratorSession::new(AgentConfig::default());
        session.queue.push_back(day(4));
        store.save_session(&session).await.unwrap();

        let loaded = store.load_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);

        store.delete_session(session.id).await.unwrap();
        assert!(store.load_session(session.id).await.unwrap().is_none());
    }
}
