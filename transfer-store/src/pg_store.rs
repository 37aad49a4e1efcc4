use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use tracing::debug;
use transfer_core::{
    Booking, BookingStatus, BookingStore, ContactInfo, LockedSchedule, PaymentConfirmation,
    Schedule, StoreError, StoreResult, StoreTransaction, WaitPolicy,
};
use transfer_shared::Masked;
use uuid::Uuid;

const LOCK_NOT_AVAILABLE: &str = "55P03";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

const SCHEDULE_COLUMNS: &str = "id, route_id, vehicle_id, driver_id, departure_time, arrival_time, \
     price_per_person, available_seats, seat_capacity, is_active, created_at, updated_at";

const BOOKING_COLUMNS: &str = "id, schedule_id, user_id, contact_phone, contact_email, contact_name, \
     passengers_count, status, confirmation_code, total_price, special_requests, \
     payment_reference, cancellation_reason, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    route_id: Uuid,
    vehicle_id: Uuid,
    driver_id: Uuid,
    departure_time: NaiveTime,
    arrival_time: NaiveTime,
    price_per_person: i64,
    available_seats: i32,
    seat_capacity: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScheduleRow> for Schedule {
    fn from(row: ScheduleRow) -> Self {
        Schedule {
            id: row.id,
            route_id: row.route_id,
            vehicle_id: row.vehicle_id,
            driver_id: row.driver_id,
            departure_time: row.departure_time,
            arrival_time: row.arrival_time,
            price_per_person: row.price_per_person,
            available_seats: row.available_seats,
            seat_capacity: row.seat_capacity,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    schedule_id: Uuid,
    user_id: String,
    contact_phone: String,
    contact_email: String,
    contact_name: Option<String>,
    passengers_count: i32,
    status: String,
    confirmation_code: String,
    total_price: i64,
    special_requests: Option<String>,
    payment_reference: Option<String>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let status: BookingStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("booking {}: {}", row.id, e)))?;
        Ok(Booking {
            id: row.id,
            schedule_id: row.schedule_id,
            user_id: row.user_id,
            contact: ContactInfo {
                phone: Masked(row.contact_phone),
                email: Masked(row.contact_email),
                name: row.contact_name,
            },
            passengers_count: row.passengers_count,
            status,
            confirmation_code: row.confirmation_code,
            total_price: row.total_price,
            special_requests: row.special_requests,
            payment_reference: row.payment_reference,
            cancellation_reason: row.cancellation_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn sql_state(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Translate a driver error, recognising lock timeouts on `entity`/`id`.
fn map_err(entity: &'static str, id: Uuid) -> impl Fn(sqlx::Error) -> StoreError {
    move |err| match sql_state(&err).as_deref() {
        Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout { entity, id },
        Some(UNIQUE_VIOLATION) => StoreError::Conflict(format!("{} {}: {}", entity, id, err)),
        Some(CHECK_VIOLATION) => StoreError::Corrupt(format!("{} {}: {}", entity, id, err)),
        _ => StoreError::Database(err.to_string()),
    }
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

/// Inventory store on Postgres. Row locks are real `SELECT … FOR UPDATE`
/// locks held by the open sqlx transaction.
#[derive(Clone)]
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(Box::new(PgTransaction {
            tx,
            held: HashSet::new(),
            inserted: HashSet::new(),
        }))
    }

    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_schedules (id, route_id, vehicle_id, driver_id, departure_time, arrival_time,
                price_per_person, available_seats, seat_capacity, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.route_id)
        .bind(schedule.vehicle_id)
        .bind(schedule.driver_id)
        .bind(schedule.departure_time)
        .bind(schedule.arrival_time)
        .bind(schedule.price_per_person)
        .bind(schedule.available_seats)
        .bind(schedule.seat_capacity)
        .bind(schedule.is_active)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_err("schedule", schedule.id))?;
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM transfer_schedules WHERE id = $1",
            SCHEDULE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Schedule::from))
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM transfer_bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings(&self, schedule_id: Uuid) -> StoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM transfer_bookings WHERE schedule_id = $1 ORDER BY created_at",
            BOOKING_COLUMNS
        ))
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(Booking::try_from).collect()
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    held: HashSet<Uuid>,
    inserted: HashSet<Uuid>,
}

impl PgTransaction {
    /// `lock_timeout` applies to the rest of the transaction, so it is reset
    /// before every bounded lock.
    async fn apply_wait(&mut self, wait: WaitPolicy) -> StoreResult<&'static str> {
        match wait {
            WaitPolicy::NoWait => Ok("FOR UPDATE NOWAIT"),
            WaitPolicy::Bounded(bound) => {
                // 0 would mean "wait forever".
                let ms = bound.as_millis().max(1);
                sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", ms))
                    .execute(&mut *self.tx)
                    .await
                    .map_err(db_err)?;
                Ok("FOR UPDATE")
            }
        }
    }

    fn ensure_held(&self, id: Uuid) -> StoreResult<()> {
        if self.held.contains(&id) {
            Ok(())
        } else {
            Err(StoreError::LockNotHeld(id))
        }
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn lock_schedule(
        &mut self,
        schedule_id: Uuid,
        wait: WaitPolicy,
    ) -> StoreResult<LockedSchedule> {
        let clause = self.apply_wait(wait).await?;
        let row = sqlx::query_as::<_, ScheduleRow>(&format!(
            "SELECT {} FROM transfer_schedules WHERE id = $1 {}",
            SCHEDULE_COLUMNS, clause
        ))
        .bind(schedule_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err("schedule", schedule_id))?
        .ok_or_else(|| StoreError::schedule_not_found(schedule_id))?;

        self.held.insert(schedule_id);
        Ok(LockedSchedule::from(&Schedule::from(row)))
    }

    async fn decrement_seats(&mut self, handle: &mut LockedSchedule, seats: i32) -> StoreResult<()> {
        self.ensure_held(handle.schedule_id)?;
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE transfer_schedules
            SET available_seats = available_seats - $2, updated_at = NOW()
            WHERE id = $1 AND available_seats >= $2
            RETURNING available_seats
            "#,
        )
        .bind(handle.schedule_id)
        .bind(seats)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err("schedule", handle.schedule_id))?;

        match remaining {
            Some(available) => {
                handle.available_seats = available;
                Ok(())
            }
            None => Err(StoreError::InsufficientSeats {
                schedule_id: handle.schedule_id,
                requested: seats,
                available: handle.available_seats,
            }),
        }
    }

    async fn increment_seats(&mut self, handle: &mut LockedSchedule, seats: i32) -> StoreResult<()> {
        self.ensure_held(handle.schedule_id)?;
        let available: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE transfer_schedules
            SET available_seats = available_seats + $2, updated_at = NOW()
            WHERE id = $1 AND available_seats + $2 <= seat_capacity
            RETURNING available_seats
            "#,
        )
        .bind(handle.schedule_id)
        .bind(seats)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err("schedule", handle.schedule_id))?;

        match available {
            Some(available) => {
                handle.available_seats = available;
                Ok(())
            }
            None => Err(StoreError::CapacityExceeded {
                schedule_id: handle.schedule_id,
                available: handle.available_seats,
                released: seats,
                capacity: handle.seat_capacity,
            }),
        }
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_bookings (id, schedule_id, user_id, contact_phone, contact_email, contact_name,
                passengers_count, status, confirmation_code, total_price, special_requests,
                payment_reference, cancellation_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(booking.id)
        .bind(booking.schedule_id)
        .bind(&booking.user_id)
        .bind(booking.contact.phone.expose())
        .bind(booking.contact.email.expose())
        .bind(&booking.contact.name)
        .bind(booking.passengers_count)
        .bind(booking.status.as_str())
        .bind(&booking.confirmation_code)
        .bind(booking.total_price)
        .bind(&booking.special_requests)
        .bind(&booking.payment_reference)
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err("booking", booking.id))?;

        self.inserted.insert(booking.id);
        Ok(())
    }

    async fn lock_booking(&mut self, booking_id: Uuid, wait: WaitPolicy) -> StoreResult<Booking> {
        let clause = self.apply_wait(wait).await?;
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM transfer_bookings WHERE id = $1 {}",
            BOOKING_COLUMNS, clause
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_err("booking", booking_id))?
        .ok_or_else(|| StoreError::booking_not_found(booking_id))?;

        self.held.insert(booking_id);
        Booking::try_from(row)
    }

    async fn update_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        if !self.inserted.contains(&booking.id) {
            self.ensure_held(booking.id)?;
        }
        let result = sqlx::query(
            r#"
            UPDATE transfer_bookings
            SET status = $2, payment_reference = $3, cancellation_reason = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.status.as_str())
        .bind(&booking.payment_reference)
        .bind(&booking.cancellation_reason)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_err("booking", booking.id))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::booking_not_found(booking.id));
        }
        Ok(())
    }

    async fn confirmation_code_exists(&mut self, code: &str) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transfer_bookings WHERE confirmation_code = $1)")
            .bind(code)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn record_payment(&mut self, payment: &PaymentConfirmation) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfer_payments (transaction_id, booking_id, amount, currency, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&payment.transaction_id)
        .bind(payment.booking_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.received_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        let locks = this.held.len();
        this.tx.commit().await.map_err(|e| match sql_state(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => StoreError::Conflict(e.to_string()),
            _ => db_err(e),
        })?;
        debug!("Committed transaction, released {} row locks", locks);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.rollback().await.map_err(db_err)
    }
}
