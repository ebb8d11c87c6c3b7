// In-memory message store
//
// Reference implementation: entries live in per-partition ordered maps and
// are lost on process exit. Deployments that must survive restarts use the
// Postgres store.

use crate::errors::StorageError;
use crate::models::ScheduledMessage;
use crate::store::{MessageStore, DEFAULT_PARTITION};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// One partition's entries.
///
/// The composite map key keeps entries with equal instants distinct while the
/// BTreeMap ordering maintains the scan-order invariant. `by_id` exists so
/// `remove` does not have to walk the map.
#[derive(Default)]
struct Bucket {
    by_time: BTreeMap<(DateTime<Utc>, Uuid), ScheduledMessage>,
    by_id: HashMap<Uuid, DateTime<Utc>>,
}

/// In-memory store with one independently guarded bucket per partition, so
/// register/cancel on one partition never contend with a release pass on
/// another.
#[derive(Default)]
pub struct InMemoryMessageStore {
    partitions: RwLock<HashMap<u32, Arc<Mutex<Bucket>>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn bucket(&self, partition: Option<u32>) -> Arc<Mutex<Bucket>> {
        let partition = partition.unwrap_or(DEFAULT_PARTITION);
        if let Some(bucket) = self.partitions.read().await.get(&partition) {
            return bucket.clone();
        }
        let mut partitions = self.partitions.write().await;
        partitions.entry(partition).or_default().clone()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(
        &self,
        entry: ScheduledMessage,
        partition: Option<u32>,
    ) -> Result<(), StorageError> {
        let bucket = self.bucket(partition).await;
        let mut bucket = bucket.lock().await;
        // Ids are unique within a partition; a re-saved id replaces the old
        // entry rather than leaving a stale ordered key behind.
        if let Some(previous) = bucket.by_id.insert(entry.id, entry.deliver_at) {
            bucket.by_time.remove(&(previous, entry.id));
        }
        bucket.by_time.insert((entry.deliver_at, entry.id), entry);
        Ok(())
    }

    async fn remove(&self, id: Uuid, partition: Option<u32>) -> Result<(), StorageError> {
        let bucket = self.bucket(partition).await;
        let mut bucket = bucket.lock().await;
        if let Some(deliver_at) = bucket.by_id.remove(&id) {
            bucket.by_time.remove(&(deliver_at, id));
        }
        Ok(())
    }

    async fn count(
        &self,
        before: DateTime<Utc>,
        partition: Option<u32>,
    ) -> Result<u64, StorageError> {
        let bucket = self.bucket(partition).await;
        let bucket = bucket.lock().await;
        // (before, nil) sorts below every key at `before`, so the range is
        // exactly the strictly-earlier entries.
        let due = bucket.by_time.range(..(before, Uuid::nil())).count();
        Ok(due as u64)
    }

    async fn find_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
        partition: Option<u32>,
    ) -> Result<Vec<ScheduledMessage>, StorageError> {
        let bucket = self.bucket(partition).await;
        let bucket = bucket.lock().await;
        let due = bucket
            .by_time
            .range(..(before, Uuid::nil()))
            .take(limit)
            .map(|(_, entry)| entry.clone())
            .collect();
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use chrono::Duration;

    fn entry_at(deliver_at: DateTime<Utc>) -> ScheduledMessage {
        ScheduledMessage::new(
            Message::delayed("test.subject", serde_json::json!({}), deliver_at),
            deliver_at,
        )
    }

    #[tokio::test]
    async fn test_find_due_is_sorted_and_strictly_before() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now();

        for offset in [30, 10, 20, 40] {
            store
                .save(entry_at(base + Duration::seconds(offset)), None)
                .await
                .unwrap();
        }

        let due = store
            .find_due(base + Duration::seconds(35), 10, None)
            .await
            .unwrap();
        let times: Vec<_> = due.iter().map(|e| e.deliver_at).collect();
        assert_eq!(
            times,
            vec![
                base + Duration::seconds(10),
                base + Duration::seconds(20),
                base + Duration::seconds(30),
            ]
        );
    }

    #[tokio::test]
    async fn test_find_due_respects_limit() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now();
        for offset in 0..5 {
            store
                .save(entry_at(base + Duration::seconds(offset)), None)
                .await
                .unwrap();
        }

        let due = store
            .find_due(base + Duration::seconds(60), 2, None)
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].deliver_at, base);
    }

    #[tokio::test]
    async fn test_entry_at_cutoff_is_not_due() {
        let store = InMemoryMessageStore::new();
        let at = Utc::now();
        store.save(entry_at(at), None).await.unwrap();

        assert!(store.find_due(at, 10, None).await.unwrap().is_empty());
        assert_eq!(store.count(at, None).await.unwrap(), 0);
        assert_eq!(
            store
                .count(at + Duration::milliseconds(1), None)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_remove_unknown_id_is_a_noop() {
        let store = InMemoryMessageStore::new();
        store.remove(Uuid::new_v4(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now();
        store
            .save(entry_at(base - Duration::seconds(1)), Some(1))
            .await
            .unwrap();

        assert!(store.find_due(base, 10, Some(2)).await.unwrap().is_empty());
        assert_eq!(store.find_due(base, 10, Some(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_none_selector_is_partition_zero() {
        let store = InMemoryMessageStore::new();
        let base = Utc::now();
        store
            .save(entry_at(base - Duration::seconds(1)), None)
            .await
            .unwrap();

        assert_eq!(store.count(base, Some(0)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_instant_entries_are_both_kept() {
        let store = InMemoryMessageStore::new();
        let at = Utc::now();
        store.save(entry_at(at), None).await.unwrap();
        store.save(entry_at(at), None).await.unwrap();

        let due = store
            .find_due(at + Duration::seconds(1), 10, None)
            .await
            .unwrap();
        assert_eq!(due.len(), 2);
    }
}
