//! Concurrent race drill against a live controller.
//!
//! Fires a burst of booking attempts at one schedule, all released from a
//! barrier at the same instant, and checks that seat accounting still adds up
//! afterwards.

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tracing::{error, info};
use transfer_core::{BookingRequest, BookingStore, ContactInfo, Schedule};
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};
use crate::manager::BookingManager;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvariantViolation {
    #[error("Overbooked schedule {schedule_id}: {booked} seats sold against {capacity} open")]
    Overbooked {
        schedule_id: Uuid,
        booked: i32,
        capacity: i32,
    },

    #[error("Schedule {schedule_id} lost seats: expected {expected} available, found {actual}")]
    SeatDrift {
        schedule_id: Uuid,
        expected: i32,
        actual: i32,
    },

    #[error("Schedule {schedule_id} turned away demand with {available} seats still open")]
    Undersold { schedule_id: Uuid, available: i32 },

    #[error("Schedule {schedule_id}: {held} held + {available} available != capacity {capacity}")]
    Unbalanced {
        schedule_id: Uuid,
        held: i32,
        available: i32,
        capacity: i32,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrillReport {
    pub attempts: usize,
    pub seats_per_attempt: i32,
    pub succeeded: usize,
    pub sold_out: usize,
    pub lock_timeouts: usize,
    pub other_errors: usize,
    pub booking_ids: Vec<Uuid>,
    pub elapsed: Duration,
}

impl DrillReport {
    pub fn seats_booked(&self) -> i32 {
        self.succeeded as i32 * self.seats_per_attempt
    }

    /// Check the drill outcome against the schedule as it was before and after.
    ///
    /// Sold seats never exceed what was open, the counter moved by exactly
    /// the seats booked, and if anyone was turned away as sold out the
    /// schedule cannot still fit another attempt.
    pub fn check_against(&self, before: &Schedule, after: &Schedule) -> Result<(), InvariantViolation> {
        let booked = self.seats_booked();
        if booked > before.available_seats {
            return Err(InvariantViolation::Overbooked {
                schedule_id: before.id,
                booked,
                capacity: before.available_seats,
            });
        }

        let expected = before.available_seats - booked;
        if after.available_seats != expected {
            return Err(InvariantViolation::SeatDrift {
                schedule_id: before.id,
                expected,
                actual: after.available_seats,
            });
        }

        if self.sold_out > 0 && after.available_seats >= self.seats_per_attempt {
            return Err(InvariantViolation::Undersold {
                schedule_id: before.id,
                available: after.available_seats,
            });
        }
        Ok(())
    }

    fn tally(&mut self, outcome: &BookingResult<Uuid>) {
        match outcome {
            Ok(id) => {
                self.succeeded += 1;
                self.booking_ids.push(*id);
            }
            Err(BookingError::InsufficientSeats { .. }) => self.sold_out += 1,
            Err(BookingError::LockTimeout { .. }) => self.lock_timeouts += 1,
            Err(e) => {
                error!("Drill attempt failed unexpectedly: {}", e);
                self.other_errors += 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RaceDrill {
    pub attempts: usize,
    pub seats_per_attempt: i32,
}

impl RaceDrill {
    pub fn new(attempts: usize, seats_per_attempt: i32) -> Self {
        Self {
            attempts,
            seats_per_attempt,
        }
    }

    pub async fn run(&self, manager: Arc<BookingManager>, schedule_id: Uuid) -> DrillReport {
        let barrier = Arc::new(Barrier::new(self.attempts));
        let started = Instant::now();

        let handles = (0..self.attempts).map(|i| {
            let manager = manager.clone();
            let barrier = barrier.clone();
            let request = drill_request(schedule_id, self.seats_per_attempt, i);
            tokio::spawn(async move {
                barrier.wait().await;
                manager.create_booking(request).await.map(|b| b.id)
            })
        });

        let mut report = DrillReport {
            attempts: self.attempts,
            seats_per_attempt: self.seats_per_attempt,
            ..Default::default()
        };
        for joined in join_all(handles).await {
            match joined {
                Ok(outcome) => report.tally(&outcome),
                Err(e) => {
                    error!("Drill task panicked: {}", e);
                    report.other_errors += 1;
                }
            }
        }
        report.elapsed = started.elapsed();

        info!(
            "Drill on {}: {} ok, {} sold out, {} lock timeouts, {} errors in {:?}",
            schedule_id,
            report.succeeded,
            report.sold_out,
            report.lock_timeouts,
            report.other_errors,
            report.elapsed
        );
        report
    }
}

fn drill_request(schedule_id: Uuid, seats: i32, attempt: usize) -> BookingRequest {
    BookingRequest {
        schedule_id,
        passengers_count: seats,
        user_id: format!("drill-user-{}", attempt),
        contact: ContactInfo::new(
            format!("+7900000{:04}", attempt),
            format!("drill{}@example.com", attempt),
        ),
        special_requests: None,
    }
}

/// Seats held by live bookings plus seats open must equal the capacity.
/// Only meaningful when every seat change went through bookings.
pub async fn check_seat_accounting(
    store: &dyn BookingStore,
    schedule_id: Uuid,
) -> BookingResult<Result<(), InvariantViolation>> {
    let schedule = store
        .get_schedule(schedule_id)
        .await?
        .ok_or(BookingError::NotFound { entity: "schedule", id: schedule_id })?;
    let held: i32 = store
        .list_bookings(schedule_id)
        .await?
        .iter()
        .filter(|b| b.status.holds_seats())
        .map(|b| b.passengers_count)
        .sum();

    if held + schedule.available_seats != schedule.seat_capacity {
        return Ok(Err(InvariantViolation::Unbalanced {
            schedule_id,
            held,
            available: schedule.available_seats,
            capacity: schedule.seat_capacity,
        }));
    }
    Ok(Ok(()))
}
