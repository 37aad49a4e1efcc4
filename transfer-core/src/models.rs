use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use transfer_shared::Masked;
use uuid::Uuid;

/// One concrete departure with a finite number of seats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Schedule {
    pub id: Uuid,
    pub route_id: Uuid,
    pub vehicle_id: Uuid,
    pub driver_id: Uuid,
    pub departure_time: NaiveTime,
    pub arrival_time: NaiveTime,
    /// Minor currency units (kopecks, cents).
    pub price_per_person: i64,
    pub available_seats: i32,
    /// Capacity of the assigned vehicle. `available_seats` never exceeds it.
    pub seat_capacity: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// A fresh, fully available schedule.
    pub fn new(
        route_id: Uuid,
        vehicle_id: Uuid,
        driver_id: Uuid,
        departure_time: NaiveTime,
        arrival_time: NaiveTime,
        price_per_person: i64,
        seat_capacity: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            route_id,
            vehicle_id,
            driver_id,
            departure_time,
            arrival_time,
            price_per_person,
            available_seats: seat_capacity,
            seat_capacity,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seats currently held by non-cancelled bookings.
    pub fn seats_taken(&self) -> i32 {
        self.seat_capacity - self.available_seats
    }
}

/// Booking lifecycle state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Whether seats held by a booking in this state count against capacity.
    pub fn holds_seats(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Allowed edges of the state machine. Cancellation is handled separately
    /// because it is the only transition with a seat effect.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, next) {
            (Pending, Confirmed) => true,
            (Confirmed, InProgress) => true,
            (Confirmed, Completed) | (InProgress, Completed) => true,
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown booking status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "in_progress" => Ok(BookingStatus::InProgress),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    pub phone: Masked<String>,
    pub email: Masked<String>,
    pub name: Option<String>,
}

impl ContactInfo {
    pub fn new(phone: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            phone: Masked(phone.into()),
            email: Masked(email.into()),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// A customer's reservation against a schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub user_id: String,
    pub contact: ContactInfo,
    pub passengers_count: i32,
    pub status: BookingStatus,
    pub confirmation_code: String,
    /// Snapshot of `price_per_person * passengers_count` at creation.
    pub total_price: i64,
    pub special_requests: Option<String>,
    pub payment_reference: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Update status and bump `updated_at`.
    pub fn update_status(&mut self, status: BookingStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// What a caller asks for when booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub schedule_id: Uuid,
    pub passengers_count: i32,
    pub user_id: String,
    pub contact: ContactInfo,
    #[serde(default)]
    pub special_requests: Option<String>,
}

/// How long a transaction may wait for a contended row lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Fail immediately when another transaction holds the row.
    NoWait,
    /// Fail with a lock timeout once the duration elapses.
    Bounded(Duration),
}

impl WaitPolicy {
    pub const DEFAULT_BOUND: Duration = Duration::from_millis(250);

    pub fn bounded_ms(ms: u64) -> Self {
        WaitPolicy::Bounded(Duration::from_millis(ms))
    }

    /// Upper bound on the wait; zero for `NoWait`.
    pub fn bound(&self) -> Duration {
        match self {
            WaitPolicy::NoWait => Duration::ZERO,
            WaitPolicy::Bounded(d) => *d,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::Bounded(Self::DEFAULT_BOUND)
    }
}

/// Read-after-lock view of a schedule row. Only a live transaction hands
/// these out, and only that transaction may mutate the row through it.
#[derive(Debug, Clone, PartialEq)]
pub struct LockedSchedule {
    pub schedule_id: Uuid,
    pub available_seats: i32,
    pub seat_capacity: i32,
    pub price_per_person: i64,
    pub is_active: bool,
}

impl From<&Schedule> for LockedSchedule {
    fn from(s: &Schedule) -> Self {
        Self {
            schedule_id: s.id,
            available_seats: s.available_seats,
            seat_capacity: s.seat_capacity,
            price_per_person: s.price_per_person,
            is_active: s.is_active,
        }
    }
}
