//! Postgres-backed race scenarios. Skipped unless `DATABASE_URL` points at a
//! database the tests may migrate and write to.

use chrono::NaiveTime;
use std::sync::Arc;
use std::time::{Duration, Instant};
use transfer_booking::{check_seat_accounting, BookingManager, ErrorCode, RaceDrill};
use transfer_core::{
    BookingRequest, BookingRules, BookingStore, ContactInfo, Schedule, StoreError, WaitPolicy,
};
use transfer_engine::{run_drill, BookingEngine, DrillPlan};
use transfer_store::app_config::DatabaseConfig;
use transfer_store::{DbClient, LoggingNotifier, PgBookingStore};
use uuid::Uuid;

async fn pg_store() -> Option<Arc<PgBookingStore>> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            println!("Skipping test: DATABASE_URL not set");
            return None;
        }
    };
    let db = DbClient::new(&DatabaseConfig {
        url,
        max_connections: 16,
        acquire_timeout_seconds: 5,
    })
    .await
    .unwrap();
    db.migrate().await.unwrap();
    Some(Arc::new(db.booking_store()))
}

async fn schedule_with(store: &PgBookingStore, capacity: i32) -> Schedule {
    let schedule = Schedule::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        1_500,
        capacity,
    );
    store.insert_schedule(&schedule).await.unwrap();
    schedule
}

fn request(schedule_id: Uuid, passengers: i32) -> BookingRequest {
    BookingRequest {
        schedule_id,
        passengers_count: passengers,
        user_id: format!("pg-user-{}", Uuid::new_v4()),
        contact: ContactInfo::new("+79141234567", "pg@example.com"),
        special_requests: None,
    }
}

async fn available(store: &PgBookingStore, schedule_id: Uuid) -> i32 {
    store
        .get_schedule(schedule_id)
        .await
        .unwrap()
        .unwrap()
        .available_seats
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_last_seat_race() {
    let Some(store) = pg_store().await else { return };
    let schedule = schedule_with(&store, 1).await;
    let manager = Arc::new(BookingManager::new(store.clone(), &BookingRules::default()));

    let report = RaceDrill::new(2, 1).run(manager, schedule.id).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.sold_out, 1);
    assert_eq!(available(&store, schedule.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_three_pairs_on_five_seats() {
    let Some(store) = pg_store().await else { return };
    let schedule = schedule_with(&store, 5).await;
    let manager = Arc::new(BookingManager::new(store.clone(), &BookingRules::default()));

    let report = RaceDrill::new(3, 2).run(manager, schedule.id).await;

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.sold_out, 1);
    let after = store.get_schedule(schedule.id).await.unwrap().unwrap();
    assert_eq!(after.available_seats, 1);
    report.check_against(&schedule, &after).unwrap();
}

#[tokio::test]
async fn test_pg_cancel_restores_seats_once() {
    let Some(store) = pg_store().await else { return };
    let schedule = schedule_with(&store, 5).await;
    let manager = BookingManager::new(store.clone(), &BookingRules::default());

    let booking = manager.create_booking(request(schedule.id, 2)).await.unwrap();
    assert_eq!(available(&store, schedule.id).await, 3);

    manager.cancel_booking(booking.id, Some("test".into())).await.unwrap();
    assert_eq!(available(&store, schedule.id).await, 5);

    let err = manager.cancel_booking(booking.id, None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyCancelled);
    assert_eq!(available(&store, schedule.id).await, 5);
    check_seat_accounting(store.as_ref(), schedule.id)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_lock_wait_is_bounded() {
    let Some(store) = pg_store().await else { return };
    let schedule = schedule_with(&store, 5).await;
    let rules = BookingRules {
        lock_wait_ms: 50,
        ..BookingRules::default()
    };
    let manager = BookingManager::new(store.clone(), &rules);

    let mut holder = store.begin().await.unwrap();
    holder
        .lock_schedule(schedule.id, WaitPolicy::NoWait)
        .await
        .unwrap();
    let slow = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        holder.rollback().await.unwrap();
        Instant::now()
    });

    let started = Instant::now();
    let err = manager.create_booking(request(schedule.id, 1)).await.unwrap_err();
    let failed_at = Instant::now();

    assert_eq!(err.code(), ErrorCode::LockTimeout);
    assert!(failed_at.duration_since(started) < Duration::from_millis(100));
    assert!(failed_at < slow.await.unwrap());
    assert_eq!(available(&store, schedule.id).await, 5);
}

#[tokio::test]
async fn test_pg_rollback_after_decrement() {
    let Some(store) = pg_store().await else { return };
    let schedule = schedule_with(&store, 5).await;

    let mut tx = store.begin().await.unwrap();
    let mut handle = tx
        .lock_schedule(schedule.id, WaitPolicy::default())
        .await
        .unwrap();
    tx.decrement_seats(&mut handle, 2).await.unwrap();
    assert_eq!(handle.available_seats, 3);
    // Failure before the booking row is written.
    tx.rollback().await.unwrap();

    assert_eq!(available(&store, schedule.id).await, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_engine_drill() {
    let Some(store) = pg_store().await else { return };
    let engine = BookingEngine::assemble(
        store,
        &BookingRules::default(),
        None,
        Arc::new(LoggingNotifier),
    )
    .unwrap();

    let summary = run_drill(
        &engine,
        DrillPlan {
            attempts: 10,
            seats_per_attempt: 1,
            capacity: 4,
            ..DrillPlan::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.other_errors, 0);
    assert_eq!(summary.seats_after, 4 - summary.succeeded as i32);
}

#[tokio::test]
async fn test_pg_rejects_unpriced_schedule() {
    let Some(store) = pg_store().await else { return };
    let mut schedule = Schedule::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        1_000,
        4,
    );
    schedule.price_per_person = 0;

    assert!(matches!(
        store.insert_schedule(&schedule).await,
        Err(StoreError::Corrupt(_))
    ));
}
