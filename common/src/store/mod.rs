// Message store abstraction for scheduled entries

pub mod memory;
pub mod postgres;

use crate::errors::StorageError;
use crate::models::ScheduledMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::InMemoryMessageStore;
pub use postgres::PostgresMessageStore;

/// Partition used when a caller passes no explicit selector.
///
/// A convention, not a statement about the deployment's partition count.
pub const DEFAULT_PARTITION: u32 = 0;

/// Persistence contract for scheduled entries.
///
/// All operations are partition-scoped; a `None` selector denotes
/// `DEFAULT_PARTITION`. Implementations keep entries retrievable in
/// non-decreasing `deliver_at` order within a partition and must be safe
/// under concurrent save/remove/find/count from multiple tasks.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert an entry. A durable implementation must have persisted the
    /// entry before returning; callers treat any error as "not scheduled".
    async fn save(
        &self,
        entry: ScheduledMessage,
        partition: Option<u32>,
    ) -> Result<(), StorageError>;

    /// Delete the entry with `id` if present. Unknown ids are a no-op.
    async fn remove(&self, id: Uuid, partition: Option<u32>) -> Result<(), StorageError>;

    /// Number of pending entries with `deliver_at` strictly before `before`.
    async fn count(
        &self,
        before: DateTime<Utc>,
        partition: Option<u32>,
    ) -> Result<u64, StorageError>;

    /// Up to `limit` entries with `deliver_at` strictly before `before`,
    /// ascending by `deliver_at`.
    ///
    /// Entries are not removed; removal is the caller's explicit follow-up so
    /// a crash between the two redelivers instead of losing entries.
    async fn find_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
        partition: Option<u32>,
    ) -> Result<Vec<ScheduledMessage>, StorageError>;
}
