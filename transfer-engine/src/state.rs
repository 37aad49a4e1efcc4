use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;
use transfer_booking::{BookingApi, BookingError, BookingManager, BookingMetrics, InvariantViolation};
use transfer_core::{AvailabilityCache, BookingNotifier, BookingRules, BookingStore};
use transfer_store::{Config, DbClient, LoggingNotifier, MemoryBookingStore, RedisClient};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Notifier setup failed: {0}")]
    Notifier(String),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Everything a caller needs to drive bookings, wired from configuration.
#[derive(Clone)]
pub struct BookingEngine {
    pub store: Arc<dyn BookingStore>,
    pub manager: Arc<BookingManager>,
    pub api: BookingApi,
    pub metrics: BookingMetrics,
    pub registry: Registry,
}

impl BookingEngine {
    /// Postgres store, plus Redis and Kafka when their sections are present.
    pub async fn connect(config: &Config) -> Result<Self, EngineError> {
        let db = DbClient::new(&config.database).await?;
        db.migrate().await?;
        let store: Arc<dyn BookingStore> = Arc::new(db.booking_store());

        let cache: Option<Arc<dyn AvailabilityCache>> = match &config.redis {
            Some(redis) => {
                info!("Availability cache enabled (ttl {}s)", config.cache.ttl_seconds);
                Some(Arc::new(RedisClient::new(&redis.url, config.cache.ttl_seconds)?))
            }
            None => None,
        };

        let notifier = notifier(config)?;
        Self::assemble(store, &config.booking, cache, notifier)
    }

    /// Process-local store with log-only notifications.
    pub fn in_memory(rules: &BookingRules) -> Result<Self, EngineError> {
        Self::assemble(
            Arc::new(MemoryBookingStore::new()),
            rules,
            None,
            Arc::new(LoggingNotifier),
        )
    }

    pub fn assemble(
        store: Arc<dyn BookingStore>,
        rules: &BookingRules,
        cache: Option<Arc<dyn AvailabilityCache>>,
        notifier: Arc<dyn BookingNotifier>,
    ) -> Result<Self, EngineError> {
        let registry = Registry::new();
        let metrics = BookingMetrics::register(&registry)?;

        let mut manager = BookingManager::new(store.clone(), rules)
            .with_notifier(notifier)
            .with_metrics(metrics.clone());
        if let Some(cache) = cache {
            manager = manager.with_cache(cache);
        }
        let manager = Arc::new(manager);

        info!("Booking engine ready, lock wait {:?}", manager.wait_policy());
        Ok(Self {
            store,
            api: BookingApi::new(manager.clone()),
            manager,
            metrics,
            registry,
        })
    }

    /// Prometheus text exposition of the engine's registry.
    pub fn render_metrics(&self) -> Result<String, EngineError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(feature = "kafka")]
fn notifier(config: &Config) -> Result<Arc<dyn BookingNotifier>, EngineError> {
    match &config.kafka {
        Some(kafka) => {
            let producer = transfer_store::EventProducer::new(&kafka.brokers)
                .map_err(|e| EngineError::Notifier(e.to_string()))?;
            info!("Publishing booking events to {}", kafka.brokers);
            Ok(Arc::new(producer))
        }
        None => Ok(Arc::new(LoggingNotifier)),
    }
}

#[cfg(not(feature = "kafka"))]
fn notifier(config: &Config) -> Result<Arc<dyn BookingNotifier>, EngineError> {
    if config.kafka.is_some() {
        tracing::warn!("Kafka configured but built without the `kafka` feature; logging events instead");
    }
    Ok(Arc::new(LoggingNotifier))
}
