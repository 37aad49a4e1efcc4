use async_trait::async_trait;
use uuid::Uuid;
use crate::BoxError;

/// Read-side cache of schedule availability.
///
/// Values are advisory. The reservation path never reads them; it re-reads
/// the schedule under its row lock. Entries are invalidated after every
/// commit that changes `available_seats`.
#[async_trait]
pub trait AvailabilityCache: Send + Sync {
    async fn get(&self, schedule_id: Uuid) -> Result<Option<i32>, BoxError>;

    async fn put(&self, schedule_id: Uuid, available_seats: i32) -> Result<(), BoxError>;

    async fn invalidate(&self, schedule_id: Uuid) -> Result<(), BoxError>;
}

/// Bypasses caching entirely.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAvailabilityCache;

#[async_trait]
impl AvailabilityCache for NoopAvailabilityCache {
    async fn get(&self, _schedule_id: Uuid) -> Result<Option<i32>, BoxError> {
        Ok(None)
    }

    async fn put(&self, _schedule_id: Uuid, _available_seats: i32) -> Result<(), BoxError> {
        Ok(())
    }

    async fn invalidate(&self, _schedule_id: Uuid) -> Result<(), BoxError> {
        Ok(())
    }
}
