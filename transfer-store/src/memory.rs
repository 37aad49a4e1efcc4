use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;
use transfer_core::{
    Booking, BookingStore, LockedSchedule, PaymentConfirmation, Schedule, StoreError,
    StoreResult, StoreTransaction, WaitPolicy,
};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    schedules: HashMap<Uuid, Schedule>,
    bookings: HashMap<Uuid, Booking>,
    payments: HashMap<String, PaymentConfirmation>,
}

/// Process-local store with the same locking contract as Postgres.
///
/// Every schedule and booking row has its own async mutex; a transaction
/// holds the guard until it commits or is dropped. Writes are staged inside
/// the transaction and only become visible on commit.
#[derive(Clone, Default)]
pub struct MemoryBookingStore {
    tables: Arc<Mutex<Tables>>,
    rows: Arc<Mutex<HashMap<Uuid, Arc<RowLock<()>>>>>,
    fail_next_insert: Arc<AtomicBool>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `insert_booking` fail, after any seat change staged in
    /// the same transaction.
    pub fn fail_next_insert(&self) {
        self.fail_next_insert.store(true, Ordering::SeqCst);
    }

    pub fn payment_count(&self) -> usize {
        self.tables.lock().payments.len()
    }

    fn row_lock(&self, id: Uuid) -> Arc<RowLock<()>> {
        self.rows
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }

    /// Forget row mutexes nobody holds or waits on.
    fn prune_rows(&self, ids: impl IntoIterator<Item = Uuid>) {
        let mut rows = self.rows.lock();
        for id in ids {
            if rows.get(&id).is_some_and(|row| Arc::strong_count(row) == 1) {
                rows.remove(&id);
            }
        }
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            held: HashMap::new(),
            schedules: HashMap::new(),
            bookings: HashMap::new(),
            inserted: HashSet::new(),
            payments: Vec::new(),
        }))
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        if schedule.available_seats < 0 || schedule.available_seats > schedule.seat_capacity {
            return Err(StoreError::Corrupt(format!(
                "schedule {} has {} available of {} seats",
                schedule.id, schedule.available_seats, schedule.seat_capacity
            )));
        }
        if schedule.price_per_person <= 0 {
            return Err(StoreError::Corrupt(format!(
                "schedule {} priced at {}",
                schedule.id, schedule.price_per_person
            )));
        }
        let mut tables = self.tables.lock();
        if tables.schedules.contains_key(&schedule.id) {
            return Err(StoreError::Conflict(format!("schedule {}", schedule.id)));
        }
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.tables.lock().schedules.get(&id).cloned())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.tables.lock().bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, schedule_id: Uuid) -> StoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .tables
            .lock()
            .bookings
            .values()
            .filter(|b| b.schedule_id == schedule_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }
}

pub struct MemoryTransaction {
    store: MemoryBookingStore,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    schedules: HashMap<Uuid, Schedule>,
    bookings: HashMap<Uuid, Booking>,
    inserted: HashSet<Uuid>,
    payments: Vec<PaymentConfirmation>,
}

impl MemoryTransaction {
    async fn acquire(&mut self, entity: &'static str, id: Uuid, wait: WaitPolicy) -> StoreResult<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }
        let row = self.store.row_lock(id);
        let guard = match wait {
            WaitPolicy::NoWait => row
                .try_lock_owned()
                .map_err(|_| StoreError::LockTimeout { entity, id })?,
            WaitPolicy::Bounded(bound) => tokio::time::timeout(bound, row.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout { entity, id })?,
        };
        self.held.insert(id, guard);
        Ok(())
    }

    fn ensure_held(&self, id: Uuid) -> StoreResult<()> {
        if self.held.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::LockNotHeld(id))
        }
    }

    fn schedule_view(&self, id: Uuid) -> Option<Schedule> {
        self.schedules
            .get(&id)
            .cloned()
            .or_else(|| self.store.tables.lock().schedules.get(&id).cloned())
    }

    fn booking_view(&self, id: Uuid) -> Option<Booking> {
        self.bookings
            .get(&id)
            .cloned()
            .or_else(|| self.store.tables.lock().bookings.get(&id).cloned())
    }

    fn release_rows(&mut self) {
        let ids: Vec<Uuid> = self.held.drain().map(|(id, _guard)| id).collect();
        self.store.prune_rows(ids);
    }

    fn locked_schedule(&self, id: Uuid) -> StoreResult<Schedule> {
        self.ensure_held(id)?;
        self.schedule_view(id)
            .ok_or_else(|| StoreError::schedule_not_found(id))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_schedule(
        &mut self,
        schedule_id: Uuid,
        wait: WaitPolicy,
    ) -> StoreResult<LockedSchedule> {
        if self.schedule_view(schedule_id).is_none() {
            return Err(StoreError::schedule_not_found(schedule_id));
        }
        self.acquire("schedule", schedule_id, wait).await?;
        let schedule = self.locked_schedule(schedule_id)?;
        Ok(LockedSchedule::from(&schedule))
    }

    async fn decrement_seats(&mut self, handle: &mut LockedSchedule, seats: i32) -> StoreResult<()> {
        let mut schedule = self.locked_schedule(handle.schedule_id)?;
        if schedule.available_seats < seats {
            return Err(StoreError::InsufficientSeats {
                schedule_id: schedule.id,
                requested: seats,
                available: schedule.available_seats,
            });
        }
        schedule.available_seats -= seats;
        schedule.updated_at = chrono::Utc::now();
        handle.available_seats = schedule.available_seats;
        self.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn increment_seats(&mut self, handle: &mut LockedSchedule, seats: i32) -> StoreResult<()> {
        let mut schedule = self.locked_schedule(handle.schedule_id)?;
        if schedule.available_seats + seats > schedule.seat_capacity {
            return Err(StoreError::CapacityExceeded {
                schedule_id: schedule.id,
                available: schedule.available_seats,
                released: seats,
                capacity: schedule.seat_capacity,
            });
        }
        schedule.available_seats += seats;
        schedule.updated_at = chrono::Utc::now();
        handle.available_seats = schedule.available_seats;
        self.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        if self.store.fail_next_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected insert failure".to_string()));
        }
        if self.schedule_view(booking.schedule_id).is_none() {
            return Err(StoreError::schedule_not_found(booking.schedule_id));
        }
        if self.booking_view(booking.id).is_some() {
            return Err(StoreError::Conflict(format!("booking {}", booking.id)));
        }
        self.bookings.insert(booking.id, booking.clone());
        self.inserted.insert(booking.id);
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: Uuid, wait: WaitPolicy) -> StoreResult<Booking> {
        if self.booking_view(booking_id).is_none() {
            return Err(StoreError::booking_not_found(booking_id));
        }
        self.acquire("booking", booking_id, wait).await?;
        self.booking_view(booking_id)
            .ok_or_else(|| StoreError::booking_not_found(booking_id))
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        if !self.inserted.contains(&booking.id) {
            self.ensure_held(booking.id)?;
        }
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn confirmation_code_exists(&mut self, code: &str) -> StoreResult<bool> {
        if self.bookings.values().any(|b| b.confirmation_code == code) {
            return Ok(true);
        }
        Ok(self
            .store
            .tables
            .lock()
            .bookings
            .values()
            .any(|b| b.confirmation_code == code))
    }

    async fn record_payment(&mut self, payment: &PaymentConfirmation) -> StoreResult<bool> {
        if self.payments.iter().any(|p| p.transaction_id == payment.transaction_id)
            || self
                .store
                .tables
                .lock()
                .payments
                .contains_key(&payment.transaction_id)
        {
            return Ok(false);
        }
        self.payments.push(payment.clone());
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut this = *self;
        {
            let mut tables = this.store.tables.lock();

            for id in &this.inserted {
                if tables.bookings.contains_key(id) {
                    return Err(StoreError::Conflict(format!("booking {}", id)));
                }
                if let Some(staged) = this.bookings.get(id) {
                    if tables
                        .bookings
                        .values()
                        .any(|b| b.confirmation_code == staged.confirmation_code)
                    {
                        return Err(StoreError::Conflict(format!(
                            "confirmation code {}",
                            staged.confirmation_code
                        )));
                    }
                }
            }
            for payment in &this.payments {
                if tables.payments.contains_key(&payment.transaction_id) {
                    return Err(StoreError::Conflict(format!(
                        "payment {}",
                        payment.transaction_id
                    )));
                }
            }

            for (id, schedule) in std::mem::take(&mut this.schedules) {
                tables.schedules.insert(id, schedule);
            }
            for (id, booking) in std::mem::take(&mut this.bookings) {
                tables.bookings.insert(id, booking);
            }
            for payment in std::mem::take(&mut this.payments) {
                tables.payments.insert(payment.transaction_id.clone(), payment);
            }
        }
        debug!("Committed transaction, releasing {} row locks", this.held.len());
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!("Rolled back transaction holding {} row locks", self.held.len());
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release_rows();
    }
}
