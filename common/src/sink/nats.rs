// NATS JetStream transport for released messages

use crate::errors::SinkError;
use crate::models::Message;
use crate::sink::MessageSink;
use async_nats::jetstream::{
    context::PublishAckFuture,
    stream::{Config as StreamConfig, Stream},
    Context as JetStreamContext,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument};

/// NATS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL (e.g., "nats://localhost:4222")
    pub url: String,
    /// Stream name for released messages
    pub stream_name: String,
    /// Subject prefix released messages are published under
    pub subject_prefix: String,
    /// Maximum age for messages in the stream (in seconds)
    pub max_age_seconds: u64,
    /// Maximum number of messages to retain
    pub max_messages: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            stream_name: "RELEASED".to_string(),
            subject_prefix: "released".to_string(),
            max_age_seconds: 86400, // 24 hours
            max_messages: 1_000_000,
        }
    }
}

/// NATS JetStream client
pub struct NatsClient {
    jetstream: JetStreamContext,
    config: NatsConfig,
}

impl NatsClient {
    /// Create a NatsClient from an existing async_nats::Client
    pub fn from_client(client: async_nats::Client, config: NatsConfig) -> Self {
        let jetstream = async_nats::jetstream::new(client);
        Self { jetstream, config }
    }

    /// Create a new NATS client and connect to the server
    #[instrument(skip(config), fields(url = %config.url))]
    pub async fn new(config: NatsConfig) -> Result<Self, SinkError> {
        info!("Connecting to NATS server");

        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| SinkError::PublishFailed(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS server");

        let jetstream = async_nats::jetstream::new(client);

        Ok(Self { jetstream, config })
    }

    /// Create or get the stream released messages land on
    #[instrument(skip(self))]
    pub async fn initialize_stream(&self) -> Result<Stream, SinkError> {
        info!(
            stream_name = %self.config.stream_name,
            "Initializing JetStream stream"
        );

        let stream_config = StreamConfig {
            name: self.config.stream_name.clone(),
            subjects: vec![format!("{}.>", self.config.subject_prefix)],
            max_age: Duration::from_secs(self.config.max_age_seconds),
            max_messages: self.config.max_messages,
            ..Default::default()
        };

        let stream = self
            .jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| SinkError::PublishFailed(format!("Failed to create stream: {}", e)))?;

        info!(
            stream_name = %self.config.stream_name,
            "Stream initialized"
        );

        Ok(stream)
    }

    /// Get the JetStream context for publishing
    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsConfig {
        &self.config
    }

    /// Health check - verify the stream is reachable
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), SinkError> {
        self.jetstream
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| SinkError::PublishFailed(format!("Health check failed: {}", e)))?;

        Ok(())
    }
}

/// Publishes released messages to a JetStream subject derived from the
/// message's own subject.
pub struct NatsMessageSink {
    client: NatsClient,
    publish_timeout: Duration,
}

impl NatsMessageSink {
    pub fn new(client: NatsClient) -> Self {
        Self {
            client,
            publish_timeout: Duration::from_secs(5),
        }
    }

    /// Override the acknowledgment timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    fn subject_for(&self, message: &Message) -> String {
        format!("{}.{}", self.client.config().subject_prefix, message.subject)
    }
}

#[async_trait]
impl MessageSink for NatsMessageSink {
    #[instrument(skip(self, message), fields(subject = %message.subject))]
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        let payload = serde_json::to_vec(message)?;
        let subject = self.subject_for(message);

        let publish_future: PublishAckFuture = self
            .client
            .jetstream()
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| SinkError::PublishFailed(format!("Failed to publish message: {}", e)))?;

        // Wait for the stream acknowledgment; an unacked publish counts as
        // failed so the entry stays pending.
        let ack_result = tokio::time::timeout(self.publish_timeout, publish_future).await;

        match ack_result {
            Ok(Ok(_ack)) => {
                info!(subject = %subject, "Released message published");
                Ok(())
            }
            Ok(Err(e)) => Err(SinkError::PublishFailed(format!(
                "Failed to get publish acknowledgment: {}",
                e
            ))),
            Err(_) => Err(SinkError::Timeout(format!(
                "Publish acknowledgment timeout after {:?}",
                self.publish_timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nats_config_default() {
        let config = NatsConfig::default();
        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.stream_name, "RELEASED");
        assert_eq!(config.subject_prefix, "released");
        assert_eq!(config.max_age_seconds, 86400);
        assert_eq!(config.max_messages, 1_000_000);
    }

    #[tokio::test]
    #[ignore] // Requires NATS to be running
    async fn test_deliver_publishes_to_prefixed_subject() {
        let client = NatsClient::new(NatsConfig::default()).await.unwrap();
        client.initialize_stream().await.unwrap();
        let sink = NatsMessageSink::new(client);

        let message = Message::new("orders.created", serde_json::json!({"order": 1}));
        assert!(sink.deliver(&message).await.is_ok());
    }
}
