// Timer message business logic: register, release, cancel, count

use crate::errors::TimerError;
use crate::models::{Message, ScheduledMessage};
use crate::partition::PartitionRouter;
use crate::sink::MessageSink;
use crate::store::MessageStore;
use crate::telemetry;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Tuning for the timer handler
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Maximum entries released per partition per pass. Bounds how long one
    /// pass can hold the release lock behind a slow sink.
    pub batch_size: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Business logic for deferred delivery.
///
/// Owns the store and never lets callers bypass it; the router decides which
/// partition an entry lands on, and the partition set this handler serves is
/// the router's range.
pub struct TimerMessageHandler {
    config: TimerConfig,
    store: Arc<dyn MessageStore>,
    router: Arc<PartitionRouter>,
}

impl TimerMessageHandler {
    pub fn new(
        config: TimerConfig,
        store: Arc<dyn MessageStore>,
        router: Arc<PartitionRouter>,
    ) -> Self {
        Self {
            config,
            store,
            router,
        }
    }

    /// Partitions this handler serves.
    pub fn partitions(&self) -> u32 {
        self.router.partitions()
    }

    /// Whether a message should be deferred instead of published right away.
    /// Pure check, safe to call from routing code.
    pub fn is_timer_message(message: &Message) -> bool {
        message.deliver_at.is_some()
    }

    /// Queue a message for deferred delivery.
    ///
    /// Returns the entry id used for later cancellation. Any error means the
    /// message is not scheduled; there is no partial registration.
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    pub async fn register(&self, message: Message) -> Result<Uuid, TimerError> {
        let deliver_at = message
            .deliver_at
            .ok_or_else(|| TimerError::InvalidPayload(message.subject.clone()))?;

        let partition = self.router.route(&message);
        let entry = ScheduledMessage::new(message, deliver_at);
        let id = entry.id;

        self.store.save(entry, Some(partition)).await?;
        telemetry::record_registered(partition);
        debug!(%id, partition, %deliver_at, "Delayed message registered");

        Ok(id)
    }

    /// Release every due entry across all served partitions.
    ///
    /// Deployments with a shared store use the per-partition variant under
    /// the release lock instead.
    #[instrument(skip(self, sink))]
    pub async fn release_messages(&self, sink: &dyn MessageSink) -> Result<u64, TimerError> {
        let now = Utc::now();
        let mut released = 0;
        for partition in 0..self.partitions() {
            released += self.release_due(partition, now, sink).await?;
        }
        Ok(released)
    }

    /// Release due entries for one partition; the trigger calls this while
    /// holding that partition's release lock.
    #[instrument(skip(self, sink))]
    pub async fn release_partition(
        &self,
        partition: u32,
        sink: &dyn MessageSink,
    ) -> Result<u64, TimerError> {
        self.release_due(partition, Utc::now(), sink).await
    }

    pub(crate) async fn release_due(
        &self,
        partition: u32,
        before: DateTime<Utc>,
        sink: &dyn MessageSink,
    ) -> Result<u64, TimerError> {
        let due = self
            .store
            .find_due(before, self.config.batch_size, Some(partition))
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(partition, due = due.len(), "Releasing due messages");

        let mut released = 0u64;
        for entry in due {
            // Deliver first, remove second: a crash in between redelivers
            // rather than losing the entry.
            match sink.deliver(&entry.message).await {
                Ok(()) => {
                    self.store.remove(entry.id, Some(partition)).await?;
                    released += 1;
                }
                Err(e) => {
                    // The entry stays pending and is retried next pass; one
                    // bad message must not starve the rest of the batch.
                    warn!(
                        id = %entry.id,
                        partition,
                        error = %e,
                        "Delivery failed, keeping entry pending"
                    );
                    telemetry::record_delivery_failure(partition);
                }
            }
        }

        if released > 0 {
            telemetry::record_released(partition, released);
            info!(partition, released, "Released delayed messages");
        }

        Ok(released)
    }

    /// Pending entries already due across all served partitions. Advisory,
    /// for dashboards and logs.
    pub async fn delayed_message_count(&self) -> Result<u64, TimerError> {
        let now = Utc::now();
        let counts = try_join_all(
            (0..self.partitions()).map(|partition| self.store.count(now, Some(partition))),
        )
        .await?;
        Ok(counts.into_iter().sum())
    }

    /// Cancel a pending entry. Unknown or already-released ids are a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<(), TimerError> {
        // The registration id does not encode its partition; removal is a
        // no-op everywhere the entry is not.
        try_join_all(
            (0..self.partitions()).map(|partition| self.store.remove(id, Some(partition))),
        )
        .await?;
        debug!(%id, "Delayed message canceled");
        Ok(())
    }
}
