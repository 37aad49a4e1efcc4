use chrono::NaiveTime;
use serde::Serialize;
use std::time::Duration;
use tracing::info;
use transfer_booking::{check_seat_accounting, RaceDrill};
use transfer_core::Schedule;
use uuid::Uuid;

use crate::state::{BookingEngine, EngineError};

/// Shape of one drill run against a freshly provisioned schedule.
#[derive(Debug, Clone, Copy)]
pub struct DrillPlan {
    pub attempts: usize,
    pub seats_per_attempt: i32,
    pub capacity: i32,
    pub price_per_person: i64,
}

impl Default for DrillPlan {
    fn default() -> Self {
        Self {
            attempts: 20,
            seats_per_attempt: 1,
            capacity: 10,
            price_per_person: 150_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DrillSummary {
    pub schedule_id: Uuid,
    pub attempts: usize,
    pub succeeded: usize,
    pub sold_out: usize,
    pub lock_timeouts: usize,
    pub other_errors: usize,
    pub seats_before: i32,
    pub seats_after: i32,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Provision a schedule, race `plan.attempts` bookings at it and verify the
/// seat invariants. An invariant failure is returned as an error.
pub async fn run_drill(engine: &BookingEngine, plan: DrillPlan) -> Result<DrillSummary, EngineError> {
    let schedule = Schedule::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap_or_default(),
        NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
        plan.price_per_person,
        plan.capacity,
    );
    engine
        .store
        .insert_schedule(&schedule)
        .await
        .map_err(transfer_booking::BookingError::from)?;
    info!(
        "Provisioned schedule {} with {} seats for the drill",
        schedule.id, plan.capacity
    );

    let report = RaceDrill::new(plan.attempts, plan.seats_per_attempt)
        .run(engine.manager.clone(), schedule.id)
        .await;

    let after = engine
        .store
        .get_schedule(schedule.id)
        .await
        .map_err(transfer_booking::BookingError::from)?
        .ok_or(transfer_booking::BookingError::NotFound {
            entity: "schedule",
            id: schedule.id,
        })?;

    report.check_against(&schedule, &after)?;
    check_seat_accounting(engine.store.as_ref(), schedule.id).await??;

    Ok(DrillSummary {
        schedule_id: schedule.id,
        attempts: report.attempts,
        succeeded: report.succeeded,
        sold_out: report.sold_out,
        lock_timeouts: report.lock_timeouts,
        other_errors: report.other_errors,
        seats_before: schedule.available_seats,
        seats_after: after.available_seats,
        elapsed: report.elapsed,
    })
}
