// Periodic release driver with per-partition leader locking

use crate::errors::{LockError, ReleaseError};
use crate::lock::LockProvider;
use crate::sink::MessageSink;
use crate::telemetry;
use crate::timer::handler::TimerMessageHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

/// Tuning for the release trigger loop
#[derive(Debug, Clone)]
pub struct ReleaserConfig {
    /// Seconds between release passes.
    pub poll_interval_seconds: u64,
    /// Bounded wait for a partition's release lock. Exceeding it skips the
    /// partition until the next tick.
    pub lock_wait_ms: u64,
    /// Lock TTL; the safety net if a holder dies mid-pass.
    pub lock_ttl_seconds: u64,
}

impl Default for ReleaserConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 1,
            lock_wait_ms: 500,
            lock_ttl_seconds: 30,
        }
    }
}

/// Drives release passes on a fixed interval.
///
/// Each partition is released under its own named lock, so releaser
/// instances sharing a store never double-deliver: the one holding
/// `timer:release:{partition}` does the work, the others skip and retry next
/// tick. A releaser that dies between find and remove leaves its entries
/// pending for the next lock holder.
pub struct ReleaseTrigger {
    config: ReleaserConfig,
    handler: Arc<TimerMessageHandler>,
    lock: Arc<dyn LockProvider>,
    sink: Arc<dyn MessageSink>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl ReleaseTrigger {
    pub fn new(
        config: ReleaserConfig,
        handler: Arc<TimerMessageHandler>,
        lock: Arc<dyn LockProvider>,
        sink: Arc<dyn MessageSink>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);

        Self {
            config,
            handler,
            lock,
            sink,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Run release passes until `stop` is called.
    ///
    /// The pass in flight when the shutdown signal arrives runs to
    /// completion; aborting between delivery and removal would only buy
    /// duplicate deliveries on the next start.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "Starting release trigger"
        );

        let mut tick = interval(Duration::from_secs(self.config.poll_interval_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_once().await {
                        Ok(released) => {
                            if released > 0 {
                                info!(released, "Release pass completed");
                            }
                        }
                        Err(e) => {
                            // Store or lock backend trouble; the next tick
                            // retries with everything still pending
                            error!(error = %e, "Release pass failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping release trigger");
                    break;
                }
            }
        }

        info!("Release trigger stopped");
    }

    /// One release pass over every partition.
    ///
    /// Public so deployments driving releases from an external scheduler can
    /// skip `start` entirely.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<u64, ReleaseError> {
        let wait = Duration::from_millis(self.config.lock_wait_ms);
        let ttl = Duration::from_secs(self.config.lock_ttl_seconds);
        let mut released = 0;

        for partition in 0..self.handler.partitions() {
            let resource = format!("timer:release:{}", partition);

            let guard = match self.lock.try_acquire(&resource, wait, ttl).await {
                Ok(guard) => guard,
                Err(LockError::Timeout { .. }) => {
                    // Another releaser holds this partition; its pass covers
                    // the due entries
                    debug!(partition, "Release lock busy, skipping partition this tick");
                    telemetry::record_lock_timeout(partition);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            released += self
                .handler
                .release_partition(partition, self.sink.as_ref())
                .await?;

            debug!(partition, held_ms = guard.elapsed().as_millis() as u64, "Releasing partition lock");
            drop(guard);
        }

        if let Ok(pending) = self.handler.delayed_message_count().await {
            telemetry::update_pending(pending);
        }

        Ok(released)
    }

    /// Request a graceful stop; `start` returns once the in-flight pass
    /// finishes.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SinkError;
    use crate::lock::InProcessLockProvider;
    use crate::models::Message;
    use crate::partition::PartitionRouter;
    use crate::store::InMemoryMessageStore;
    use crate::timer::handler::TimerConfig;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
            self.delivered.lock().await.push(message.clone());
            Ok(())
        }
    }

    fn trigger_fixture(
        partitions: u32,
        lock: Arc<InProcessLockProvider>,
    ) -> (ReleaseTrigger, Arc<TimerMessageHandler>) {
        let store = Arc::new(InMemoryMessageStore::new());
        let handler = Arc::new(TimerMessageHandler::new(
            TimerConfig::default(),
            store,
            Arc::new(PartitionRouter::new(partitions)),
        ));
        let trigger = ReleaseTrigger::new(
            ReleaserConfig {
                poll_interval_seconds: 1,
                lock_wait_ms: 50,
                lock_ttl_seconds: 5,
            },
            handler.clone(),
            lock,
            Arc::new(RecordingSink::default()),
        );
        (trigger, handler)
    }

    #[tokio::test]
    async fn test_run_once_releases_due_messages() {
        let lock = Arc::new(InProcessLockProvider::new());
        let (trigger, handler) = trigger_fixture(1, lock);

        handler
            .register(Message::delayed(
                "orders.due",
                serde_json::json!({}),
                Utc::now() - ChronoDuration::seconds(1),
            ))
            .await
            .unwrap();

        assert_eq!(trigger.run_once().await.unwrap(), 1);
        // The lock was released after the pass; the next pass finds nothing
        assert_eq!(trigger.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_busy_partition_is_skipped_not_failed() {
        let lock = Arc::new(InProcessLockProvider::new());
        let (trigger, handler) = trigger_fixture(1, lock.clone());

        handler
            .register(Message::delayed(
                "orders.due",
                serde_json::json!({}),
                Utc::now() - ChronoDuration::seconds(1),
            ))
            .await
            .unwrap();

        // Simulate another releaser holding the partition lock
        let _held = lock
            .try_acquire(
                "timer:release:0",
                Duration::from_millis(50),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(trigger.run_once().await.unwrap(), 0);
        // The entry survived the skipped pass
        assert_eq!(handler.delayed_message_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_ends_the_loop() {
        let lock = Arc::new(InProcessLockProvider::new());
        let (trigger, _handler) = trigger_fixture(1, lock);
        let trigger = Arc::new(trigger);

        let loop_handle = {
            let trigger = trigger.clone();
            tokio::spawn(async move { trigger.start().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.stop();

        tokio::time::timeout(Duration::from_secs(2), loop_handle)
            .await
            .expect("trigger loop did not stop")
            .unwrap();
    }
}
