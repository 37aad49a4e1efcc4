use async_trait::async_trait;
use uuid::Uuid;
use crate::error::StoreResult;
use crate::models::{Booking, LockedSchedule, Schedule, WaitPolicy};
use crate::payment::PaymentConfirmation;

/// Durable home of schedules and bookings.
///
/// Every write to `available_seats` goes through a [`StoreTransaction`] that
/// holds the schedule's row lock. Reads on this trait are unlocked snapshots
/// of committed state and must never feed a reservation decision.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Open a unit of work. Dropping the returned transaction without
    /// committing discards every staged write and releases its locks.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Provision a schedule row.
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()>;

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>>;

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn list_bookings(&self, schedule_id: Uuid) -> StoreResult<Vec<Booking>>;
}

/// A single transaction against the store.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Take the exclusive row lock on a schedule and re-read it.
    async fn lock_schedule(
        &mut self,
        schedule_id: Uuid,
        wait: WaitPolicy,
    ) -> StoreResult<LockedSchedule>;

    /// Take `seats` off a schedule whose lock this transaction holds.
    /// On success the handle reflects the new count.
    async fn decrement_seats(&mut self, handle: &mut LockedSchedule, seats: i32) -> StoreResult<()>;

    /// Give `seats` back to a schedule whose lock this transaction holds.
    /// Fails with `CapacityExceeded` instead of clamping.
    async fn increment_seats(&mut self, handle: &mut LockedSchedule, seats: i32) -> StoreResult<()>;

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    /// Take the exclusive row lock on a booking and re-read it.
    async fn lock_booking(&mut self, booking_id: Uuid, wait: WaitPolicy) -> StoreResult<Booking>;

    /// Persist status, payment reference and cancellation reason of a booking
    /// whose lock this transaction holds.
    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()>;

    async fn confirmation_code_exists(&mut self, code: &str) -> StoreResult<bool>;

    /// Record a payment transaction id. Returns `false` when the id was
    /// already recorded.
    async fn record_payment(&mut self, payment: &PaymentConfirmation) -> StoreResult<bool>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
