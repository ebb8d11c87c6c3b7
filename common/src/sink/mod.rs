// Downstream delivery seam for released messages

pub mod nats;

use crate::errors::SinkError;
use crate::models::Message;
use async_trait::async_trait;

pub use nats::{NatsClient, NatsConfig, NatsMessageSink};

/// Receives each released message, in ascending delivery-time order within a
/// release batch.
///
/// Implementations must tolerate redelivery: a crash between delivery and
/// store removal re-offers the same message to the next lock holder.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError>;
}
