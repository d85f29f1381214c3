use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::metrics::PROGRESS_EVENTS_PUBLISHED_TOTAL;
use crate::models::event::ProgressEvent;

pub const DEFAULT_EVENTS_CHANNEL: &str = "progress_events";

/// Outbound hook to the notification service. Publishing is best-effort:
/// callers log failures and carry on.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ProgressEvent) -> Result<()>;

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Publishes events as JSON over Redis Pub/Sub.
pub struct RedisEventPublisher {
    redis: ConnectionManager,
    channel: String,
}

impl RedisEventPublisher {
    pub fn new(redis: ConnectionManager, channel: impl Into<String>) -> Self {
        Self {
            redis,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload =
            serde_json::to_string(event).context("Failed to serialize progress event")?;

        let _: () = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .context("Failed to publish progress event to Redis Pub/Sub")?;

        PROGRESS_EVENTS_PUBLISHED_TOTAL
            .with_label_values(&[event.kind.as_str()])
            .inc();

        tracing::info!(
            "Progress event published: channel={}, kind={}, learner={}, lesson={}",
            self.channel,
            event.kind.as_str(),
            event.learner_id,
            event.lesson_id
        );
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: &ProgressEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}
