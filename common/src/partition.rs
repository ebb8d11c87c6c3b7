// Partition routing shared by the registration path and release fan-out

use crate::models::Message;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};

/// Routes messages to storage partitions.
///
/// Keyed messages always land on the same partition (stable SHA-256 digest of
/// the key); keyless messages are spread round-robin starting from a random
/// offset so parallel producers do not pile onto partition 0.
pub struct PartitionRouter {
    partitions: u32,
    next_fallback: AtomicU32,
}

impl PartitionRouter {
    /// Create a router spreading across `partitions` buckets.
    ///
    /// `partitions` must be at least 1; `Settings::validate` enforces this
    /// for configuration-driven construction.
    pub fn new(partitions: u32) -> Self {
        assert!(partitions > 0, "partition count must be at least 1");
        Self {
            partitions,
            next_fallback: AtomicU32::new(rand::thread_rng().gen()),
        }
    }

    /// Number of partitions this router spreads across.
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Pick the partition for a message.
    pub fn route(&self, message: &Message) -> u32 {
        match message.key.as_deref() {
            Some(key) => self.hash_key(key),
            None => self.next_fallback.fetch_add(1, Ordering::Relaxed) % self.partitions,
        }
    }

    fn hash_key(&self, key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let folded = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        folded % self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(key: &str) -> Message {
        Message::new("test.subject", serde_json::json!({})).with_key(key)
    }

    #[test]
    fn test_same_key_routes_to_same_partition() {
        let router = PartitionRouter::new(16);
        let first = router.route(&keyed("customer-42"));
        let second = router.route(&keyed("customer-42"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_route_stays_in_range() {
        let router = PartitionRouter::new(3);
        for i in 0..100 {
            let partition = router.route(&keyed(&format!("key-{}", i)));
            assert!(partition < 3);
        }
    }

    #[test]
    fn test_keyless_messages_rotate_partitions() {
        let router = PartitionRouter::new(4);
        let message = Message::new("test.subject", serde_json::json!({}));
        let first = router.route(&message);
        let second = router.route(&message);
        assert_eq!((first + 1) % 4, second);
    }

    #[test]
    fn test_single_partition_takes_everything() {
        let router = PartitionRouter::new(1);
        assert_eq!(router.route(&keyed("a")), 0);
        assert_eq!(
            router.route(&Message::new("test.subject", serde_json::json!({}))),
            0
        );
    }
}
