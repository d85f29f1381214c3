use std::sync::Arc;

use crate::config::Config;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use crate::utils::retry::{retry_async_with_config, RetryConfig};

use self::event_publisher::{EventPublisher, RedisEventPublisher};
use self::progress_service::ProgressService;
use self::progress_store::{MongoProgressStore, ProgressStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ProgressStore>,
    pub events: Arc<dyn EventPublisher>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let store = MongoProgressStore::new(mongo);

        retry_async_with_config(RetryConfig::default(), || store.ensure_indexes()).await?;

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let events = RedisEventPublisher::new(redis, config.events_channel.clone());

        Ok(Self::with_backends(config, Arc::new(store), Arc::new(events)))
    }

    /// Builds state over already constructed backends (in-memory store in tests).
    pub fn with_backends(
        config: Config,
        store: Arc<dyn ProgressStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            store,
            events,
        }
    }

    pub fn progress_service(&self) -> ProgressService {
        ProgressService::new(self.store.clone(), self.events.clone())
    }
}

pub mod aggregator;
pub mod completion_policy;
pub mod enrollment_sync;
pub mod evaluators;
pub mod event_publisher;
pub mod memory_store;
pub mod progress_service;
pub mod progress_store;
