pub mod app_config;
pub mod database;
pub mod events;
pub mod memory;
pub mod pg_store;
pub mod redis_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use events::LoggingNotifier;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
pub use memory::MemoryBookingStore;
pub use pg_store::PgBookingStore;
pub use redis_repo::RedisClient;
