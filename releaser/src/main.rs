// Releaser binary entry point: the leader-locked periodic release daemon

use common::config::Settings;
use common::db::{DbPool, RedisPool};
use common::lock::RedisLockProvider;
use common::partition::PartitionRouter;
use common::sink::{NatsClient, NatsConfig, NatsMessageSink};
use common::store::PostgresMessageStore;
use common::telemetry;
use common::timer::{ReleaseTrigger, ReleaserConfig, TimerConfig, TimerMessageHandler};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before logging so the log level comes from settings
    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration, using defaults: {}", e);
        Settings::default()
    });
    settings.validate().map_err(|e| anyhow::anyhow!(e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!("Starting eventrelay releaser");

    // Durable store
    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        anyhow::anyhow!(e)
    })?;
    db_pool.health_check().await?;

    let store = Arc::new(PostgresMessageStore::new(db_pool.clone()));
    store.ensure_schema().await?;
    info!("Message store initialized");

    // Release locks
    let redis_pool = RedisPool::new(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to initialize Redis pool");
        anyhow::anyhow!(e)
    })?;
    redis_pool.health_check().await?;

    let lock = Arc::new(RedisLockProvider::new(redis_pool)) as Arc<dyn common::lock::LockProvider>;
    info!("Lock provider initialized");

    // Downstream sink
    let nats_config = NatsConfig {
        url: settings.nats.url.clone(),
        stream_name: settings.nats.stream_name.clone(),
        subject_prefix: settings.nats.subject_prefix.clone(),
        ..NatsConfig::default()
    };
    let nats_client = NatsClient::new(nats_config).await.map_err(|e| {
        error!(error = %e, "Failed to initialize NATS client");
        anyhow::anyhow!(e)
    })?;
    nats_client.initialize_stream().await?;

    let sink = Arc::new(NatsMessageSink::new(nats_client)) as Arc<dyn common::sink::MessageSink>;
    info!("Message sink initialized");

    // Handler and trigger
    let router = Arc::new(PartitionRouter::new(settings.timer.partitions));
    let handler = Arc::new(TimerMessageHandler::new(
        TimerConfig {
            batch_size: settings.timer.batch_size,
        },
        store,
        router,
    ));

    let trigger = Arc::new(ReleaseTrigger::new(
        ReleaserConfig {
            poll_interval_seconds: settings.releaser.poll_interval_seconds,
            lock_wait_ms: settings.releaser.lock_wait_ms,
            lock_ttl_seconds: settings.releaser.lock_ttl_seconds,
        },
        handler,
        lock,
        sink,
    ));

    // Graceful shutdown: let the in-flight release pass finish
    {
        let trigger = trigger.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C signal, initiating graceful shutdown");
            trigger.stop();
        });
    }

    info!("Starting release loop");
    trigger.start().await;

    db_pool.close().await;
    telemetry::shutdown_tracer();
    info!("Releaser stopped");

    Ok(())
}
