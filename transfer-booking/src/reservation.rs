use std::sync::Arc;
use tracing::{debug, error, info, warn};
use transfer_core::{BookingStore, LockedSchedule, StoreError, StoreTransaction, WaitPolicy};
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};

/// Seats taken off a schedule inside a still-open transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub schedule_id: Uuid,
    pub seats: i32,
    pub price_per_person: i64,
    pub total_price: i64,
    /// Availability after the decrement, as seen under the lock.
    pub remaining_seats: i32,
}

/// The only path that changes `available_seats`.
///
/// Each operation runs against a transaction owned by the caller, so the seat
/// change and the booking row it pairs with commit or roll back together.
/// Nothing here retries: a lock timeout goes straight back to the caller.
#[derive(Clone)]
pub struct TransactionManager {
    store: Arc<dyn BookingStore>,
    wait: WaitPolicy,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn BookingStore>, wait: WaitPolicy) -> Self {
        Self { store, wait }
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        &self.store
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait
    }

    pub async fn begin(&self) -> BookingResult<Box<dyn StoreTransaction>> {
        Ok(self.store.begin().await?)
    }

    /// Lock the schedule, check it can take `seats` more passengers, and
    /// decrement. The caller inserts the booking row in the same transaction
    /// and then hands it to [`finish`](Self::finish).
    pub async fn reserve(
        &self,
        tx: &mut dyn StoreTransaction,
        schedule_id: Uuid,
        seats: i32,
        wait: WaitPolicy,
    ) -> BookingResult<Reservation> {
        if seats <= 0 {
            return Err(BookingError::Validation(format!(
                "passengers count must be positive, got {}",
                seats
            )));
        }

        let mut handle = self.lock(tx, schedule_id, wait).await?;

        if !handle.is_active {
            info!("Rejecting reservation on inactive schedule {}", schedule_id);
            return Err(BookingError::ScheduleInactive(schedule_id));
        }

        if handle.available_seats < seats {
            info!(
                "Schedule {} sold out for {} seats ({} left)",
                schedule_id, seats, handle.available_seats
            );
            return Err(BookingError::InsufficientSeats {
                schedule_id,
                requested: seats,
                available: handle.available_seats,
            });
        }

        let total_price = handle
            .price_per_person
            .checked_mul(i64::from(seats))
            .ok_or_else(|| BookingError::Validation("total price overflows".to_string()))?;

        tx.decrement_seats(&mut handle, seats).await?;

        if handle.available_seats < 0 {
            error!(
                "CONSISTENCY VIOLATION: schedule {} went to {} seats after reserving {}",
                schedule_id, handle.available_seats, seats
            );
            return Err(BookingError::ConsistencyViolation(format!(
                "schedule {} available seats negative ({})",
                schedule_id, handle.available_seats
            )));
        }

        debug!(
            "Reserved {} seats on schedule {}, {} remaining",
            seats, schedule_id, handle.available_seats
        );

        Ok(Reservation {
            schedule_id,
            seats,
            price_per_person: handle.price_per_person,
            total_price,
            remaining_seats: handle.available_seats,
        })
    }

    /// Give seats back under the schedule's row lock. Returns the new
    /// availability. Overshooting the vehicle capacity is surfaced as a
    /// consistency violation and never clamped.
    pub async fn release(
        &self,
        tx: &mut dyn StoreTransaction,
        schedule_id: Uuid,
        seats: i32,
    ) -> BookingResult<i32> {
        if seats <= 0 {
            return Err(BookingError::Validation(format!(
                "released seats must be positive, got {}",
                seats
            )));
        }

        let mut handle = self.lock(tx, schedule_id, self.wait).await?;

        match tx.increment_seats(&mut handle, seats).await {
            Ok(()) => {
                debug!(
                    "Released {} seats on schedule {}, {} available",
                    seats, schedule_id, handle.available_seats
                );
                Ok(handle.available_seats)
            }
            Err(e @ StoreError::CapacityExceeded { .. }) => {
                error!("CONSISTENCY VIOLATION on release: {}", e);
                Err(BookingError::ConsistencyViolation(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commit on success, roll back on failure. A failed rollback is logged;
    /// the store discards uncommitted work regardless.
    pub async fn finish<T>(
        &self,
        tx: Box<dyn StoreTransaction>,
        result: BookingResult<T>,
    ) -> BookingResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback failed after {}: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    async fn lock(
        &self,
        tx: &mut dyn StoreTransaction,
        schedule_id: Uuid,
        wait: WaitPolicy,
    ) -> BookingResult<LockedSchedule> {
        match tx.lock_schedule(schedule_id, wait).await {
            Ok(handle) => Ok(handle),
            Err(e) if e.is_lock_timeout() => {
                warn!(
                    "Lock on schedule {} not acquired within {:?}",
                    schedule_id,
                    wait.bound()
                );
                Err(BookingError::LockTimeout { entity: "schedule", id: schedule_id })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use transfer_core::Schedule;
    use transfer_store::MemoryBookingStore;

    fn schedule(capacity: i32) -> Schedule {
        Schedule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            1_500,
            capacity,
        )
    }

    async fn setup(capacity: i32) -> (TransactionManager, Arc<MemoryBookingStore>, Uuid) {
        let store = Arc::new(MemoryBookingStore::new());
        let s = schedule(capacity);
        store.insert_schedule(&s).await.unwrap();
        let manager = TransactionManager::new(store.clone(), WaitPolicy::default());
        (manager, store, s.id)
    }

    #[tokio::test]
    async fn test_reserve_then_commit_decrements() {
        let (manager, store, id) = setup(5).await;

        let mut tx = manager.begin().await.unwrap();
        let reservation = manager
            .reserve(tx.as_mut(), id, 2, WaitPolicy::default())
            .await;
        let reservation = manager.finish(tx, reservation).await.unwrap();

        assert_eq!(reservation.remaining_seats, 3);
        assert_eq!(reservation.total_price, 3_000);
        assert_eq!(store.get_schedule(id).await.unwrap().unwrap().available_seats, 3);
    }

    #[tokio::test]
    async fn test_uncommitted_reserve_leaves_no_trace() {
        let (manager, store, id) = setup(5).await;

        let mut tx = manager.begin().await.unwrap();
        manager
            .reserve(tx.as_mut(), id, 2, WaitPolicy::default())
            .await
            .unwrap();
        let failed: BookingResult<()> = Err(BookingError::Validation("insert blew up".into()));
        assert!(manager.finish(tx, failed).await.is_err());

        assert_eq!(store.get_schedule(id).await.unwrap().unwrap().available_seats, 5);
    }

    #[tokio::test]
    async fn test_reserve_rejects_over_capacity() {
        let (manager, _store, id) = setup(1).await;
        let mut tx = manager.begin().await.unwrap();
        let err = manager
            .reserve(tx.as_mut(), id, 2, WaitPolicy::NoWait)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BookingError::InsufficientSeats { requested: 2, available: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_reserve_rejects_non_positive_counts() {
        let (manager, _store, id) = setup(3).await;
        let mut tx = manager.begin().await.unwrap();
        let err = manager
            .reserve(tx.as_mut(), id, 0, WaitPolicy::NoWait)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_release_beyond_capacity_is_consistency_violation() {
        let (manager, store, id) = setup(4).await;

        let mut tx = manager.begin().await.unwrap();
        let err = manager.release(tx.as_mut(), id, 1).await.unwrap_err();
        assert!(matches!(err, BookingError::ConsistencyViolation(_)));
        drop(tx);

        assert_eq!(store.get_schedule(id).await.unwrap().unwrap().available_seats, 4);
    }

    #[tokio::test]
    async fn test_missing_schedule_is_not_found() {
        let (manager, _store, _id) = setup(4).await;
        let mut tx = manager.begin().await.unwrap();
        let err = manager
            .reserve(tx.as_mut(), Uuid::new_v4(), 1, WaitPolicy::NoWait)
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { entity: "schedule", .. }));
    }
}
