// Named exclusive locks guarding the release path

use crate::db::RedisPool;
use crate::errors::LockError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Mutual-exclusion seam for the release trigger.
///
/// `try_acquire` waits at most `wait` for the named lock; exhausting the wait
/// yields `LockError::Timeout`, which callers treat as "skip this cycle and
/// try again next tick". The guard releases the lock when dropped.
#[async_trait]
pub trait LockProvider: Send + Sync {
    async fn try_acquire(
        &self,
        resource: &str,
        wait: Duration,
        ttl: Duration,
    ) -> Result<LockGuard, LockError>;
}

/// Guard for a held lock; dropping it releases the lock.
pub struct LockGuard {
    resource: String,
    acquired_at: Instant,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    fn new(resource: String, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            resource,
            acquired_at: Instant::now(),
            release: Some(Box::new(release)),
        }
    }

    /// Get the resource name this lock guards
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Get the time elapsed since lock acquisition
    pub fn elapsed(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Redis-backed lock provider.
///
/// Acquisition is SET NX PX with a per-guard fence value; release is a Lua
/// compare-and-delete so an expired lock taken over by another process is
/// never deleted from here. The TTL bounds how long a crashed holder can
/// block other releasers.
pub struct RedisLockProvider {
    pool: RedisPool,
    retry_delay: Duration,
}

impl RedisLockProvider {
    pub fn new(pool: RedisPool) -> Self {
        Self {
            pool,
            retry_delay: Duration::from_millis(50),
        }
    }

    /// Override the polling delay between acquisition attempts
    pub fn with_retry_delay(self, retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            ..self
        }
    }

    async fn try_acquire_once(
        &self,
        resource: &str,
        ttl: Duration,
    ) -> Result<Option<String>, LockError> {
        let mut conn = self.pool.get_connection();
        let key = format!("lock:{}", resource);
        let fence = Uuid::new_v4().to_string();

        // SET NX PX: set only if absent, with expiry as the crash safety net
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&fence)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.map(|_| fence))
    }
}

#[async_trait]
impl LockProvider for RedisLockProvider {
    async fn try_acquire(
        &self,
        resource: &str,
        wait: Duration,
        ttl: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(fence) = self.try_acquire_once(resource, ttl).await? {
                debug!(resource = %resource, ttl_ms = ttl.as_millis() as u64, "Lock acquired");

                let pool = self.pool.clone();
                let owned_resource = resource.to_string();
                return Ok(LockGuard::new(resource.to_string(), move || {
                    tokio::spawn(async move {
                        if let Err(e) = release_lock(&pool, &owned_resource, &fence).await {
                            warn!(resource = %owned_resource, error = %e, "Failed to release lock on drop");
                        }
                    });
                }));
            }

            if Instant::now() + self.retry_delay > deadline {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    waited_ms: wait.as_millis() as u64,
                });
            }

            sleep(self.retry_delay).await;
        }
    }
}

/// Release a lock by deleting the key only if it still holds our fence value
async fn release_lock(pool: &RedisPool, resource: &str, fence: &str) -> Result<(), LockError> {
    let mut conn = pool.get_connection();
    let key = format!("lock:{}", resource);

    let script = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#;

    let result: i32 = redis::Script::new(script)
        .key(&key)
        .arg(fence)
        .invoke_async(&mut conn)
        .await?;

    if result == 1 {
        debug!(resource = %resource, "Lock released");
        Ok(())
    } else {
        Err(LockError::NotOwned(resource.to_string()))
    }
}

/// Single-process lock provider backed by a named-lock table.
///
/// Suitable for tests and single-instance deployments; it provides no
/// cross-process exclusion and ignores the TTL (locks live until their guard
/// drops).
#[derive(Clone)]
pub struct InProcessLockProvider {
    held: Arc<tokio::sync::Mutex<HashSet<String>>>,
    retry_delay: Duration,
}

impl InProcessLockProvider {
    pub fn new() -> Self {
        Self {
            held: Arc::new(tokio::sync::Mutex::new(HashSet::new())),
            retry_delay: Duration::from_millis(10),
        }
    }
}

impl Default for InProcessLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockProvider for InProcessLockProvider {
    async fn try_acquire(
        &self,
        resource: &str,
        wait: Duration,
        _ttl: Duration,
    ) -> Result<LockGuard, LockError> {
        let deadline = Instant::now() + wait;

        loop {
            {
                let mut held = self.held.lock().await;
                if held.insert(resource.to_string()) {
                    let table = self.held.clone();
                    let owned_resource = resource.to_string();
                    return Ok(LockGuard::new(resource.to_string(), move || {
                        tokio::spawn(async move {
                            table.lock().await.remove(&owned_resource);
                        });
                    }));
                }
            }

            if Instant::now() + self.retry_delay > deadline {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    waited_ms: wait.as_millis() as u64,
                });
            }

            sleep(self.retry_delay).await;
        }
    }
}
