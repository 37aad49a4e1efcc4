use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;
use transfer_core::{AvailabilityCache, BoxError};
use uuid::Uuid;

fn availability_key(schedule_id: Uuid) -> String {
    format!("schedule:{}:availability", schedule_id)
}

/// Redis-backed availability cache. Entries expire after `ttl_seconds` so a
/// value written just before an invalidation cannot live long.
#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
    ttl_seconds: u64,
}

impl RedisClient {
    pub fn new(connection_string: &str, ttl_seconds: u64) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            ttl_seconds: ttl_seconds.max(1),
        })
    }

    pub async fn get_availability(&self, schedule_id: Uuid) -> redis::RedisResult<Option<i32>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.get(availability_key(schedule_id)).await
    }

    pub async fn set_availability(&self, schedule_id: Uuid, seats: i32) -> redis::RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(availability_key(schedule_id), seats, self.ttl_seconds)
            .await?;
        debug!("Cached availability {} for schedule {}", seats, schedule_id);
        Ok(())
    }

    pub async fn delete_availability(&self, schedule_id: Uuid) -> redis::RedisResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(availability_key(schedule_id)).await
    }
}

#[async_trait]
impl AvailabilityCache for RedisClient {
    async fn get(&self, schedule_id: Uuid) -> Result<Option<i32>, BoxError> {
        Ok(self.get_availability(schedule_id).await?)
    }

    async fn put(&self, schedule_id: Uuid, available_seats: i32) -> Result<(), BoxError> {
        Ok(self.set_availability(schedule_id, available_seats).await?)
    }

    async fn invalidate(&self, schedule_id: Uuid) -> Result<(), BoxError> {
        Ok(self.delete_availability(schedule_id).await?)
    }
}
