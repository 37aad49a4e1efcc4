use async_trait::async_trait;
use chrono::NaiveTime;
use parking_lot::Mutex;
use prometheus::Registry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use transfer_booking::boundary::{CancelBookingRequest, ConfirmBookingRequest};
use transfer_booking::{
    BookingApi, BookingError, BookingManager, BookingMetrics, ConfirmationCodeGenerator,
    ErrorCode, PaymentOutcome,
};
use transfer_core::{
    AvailabilityCache, BookingEvent, BookingNotifier, BookingRequest, BookingRules,
    BookingStatus, BookingStore, BoxError, ContactInfo, PaymentConfirmation, Schedule,
};
use transfer_shared::models::events::topics;
use transfer_store::MemoryBookingStore;
use uuid::Uuid;

#[derive(Default)]
struct RecordingNotifier {
    topics: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl BookingNotifier for RecordingNotifier {
    async fn notify(&self, event: &BookingEvent) -> Result<(), BoxError> {
        self.topics.lock().push(event.topic());
        Ok(())
    }
}

struct BrokenNotifier;

#[async_trait]
impl BookingNotifier for BrokenNotifier {
    async fn notify(&self, _event: &BookingEvent) -> Result<(), BoxError> {
        Err("broker unreachable".into())
    }
}

#[derive(Default)]
struct CountingCache {
    value: Mutex<Option<i32>>,
    invalidations: AtomicUsize,
}

#[async_trait]
impl AvailabilityCache for CountingCache {
    async fn get(&self, _schedule_id: Uuid) -> Result<Option<i32>, BoxError> {
        Ok(*self.value.lock())
    }

    async fn put(&self, _schedule_id: Uuid, available_seats: i32) -> Result<(), BoxError> {
        *self.value.lock() = Some(available_seats);
        Ok(())
    }

    async fn invalidate(&self, _schedule_id: Uuid) -> Result<(), BoxError> {
        *self.value.lock() = None;
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Parks the first `put` until released, to interleave a refill with a write.
#[derive(Default)]
struct GatedCache {
    value: Mutex<Option<i32>>,
    hold_next_put: AtomicBool,
    parked: Notify,
    resume: Notify,
}

#[async_trait]
impl AvailabilityCache for GatedCache {
    async fn get(&self, _schedule_id: Uuid) -> Result<Option<i32>, BoxError> {
        Ok(*self.value.lock())
    }

    async fn put(&self, _schedule_id: Uuid, available_seats: i32) -> Result<(), BoxError> {
        if self.hold_next_put.swap(false, Ordering::SeqCst) {
            self.parked.notify_one();
            self.resume.notified().await;
        }
        *self.value.lock() = Some(available_seats);
        Ok(())
    }

    async fn invalidate(&self, _schedule_id: Uuid) -> Result<(), BoxError> {
        *self.value.lock() = None;
        Ok(())
    }
}

async fn setup(capacity: i32) -> (Arc<MemoryBookingStore>, Uuid) {
    let store = Arc::new(MemoryBookingStore::new());
    let schedule = Schedule::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        2_000,
        capacity,
    );
    store.insert_schedule(&schedule).await.unwrap();
    (store, schedule.id)
}

fn request(schedule_id: Uuid, passengers: i32) -> BookingRequest {
    BookingRequest {
        schedule_id,
        passengers_count: passengers,
        user_id: "user-42".to_string(),
        contact: ContactInfo::new("+79147654321", "guest@example.com").with_name("Guest"),
        special_requests: None,
    }
}

#[tokio::test]
async fn test_payment_applied_once() {
    let (store, schedule_id) = setup(4).await;
    let manager = BookingManager::new(store.clone(), &BookingRules::default());
    let booking = manager.create_booking(request(schedule_id, 2)).await.unwrap();

    let payment = PaymentConfirmation::new("cp-1001", booking.id, booking.total_price, "RUB");
    match manager.apply_payment(&payment).await.unwrap() {
        PaymentOutcome::Applied(confirmed) => {
            assert_eq!(confirmed.status, BookingStatus::Confirmed);
            assert_eq!(confirmed.payment_reference.as_deref(), Some("cp-1001"));
        }
        other => panic!("expected applied, got {:?}", other),
    }

    assert_eq!(
        manager.apply_payment(&payment).await.unwrap(),
        PaymentOutcome::AlreadyApplied
    );
    assert_eq!(store.payment_count(), 1);
    assert_eq!(
        manager.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Confirmed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_redelivery_applies_once() {
    let (store, schedule_id) = setup(4).await;
    let manager = BookingManager::new(store.clone(), &BookingRules::default());
    let booking = manager.create_booking(request(schedule_id, 1)).await.unwrap();
    let payment = PaymentConfirmation::new("cp-2002", booking.id, booking.total_price, "RUB");

    let (a, b) = tokio::join!(manager.apply_payment(&payment), manager.apply_payment(&payment));
    let outcomes = [a.unwrap(), b.unwrap()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == PaymentOutcome::AlreadyApplied)
            .count(),
        1
    );
    assert_eq!(store.payment_count(), 1);
}

#[tokio::test]
async fn test_payment_amount_mismatch_rejected() {
    let (store, schedule_id) = setup(4).await;
    let manager = BookingManager::new(store.clone(), &BookingRules::default());
    let booking = manager.create_booking(request(schedule_id, 2)).await.unwrap();

    let short = PaymentConfirmation::new("cp-3003", booking.id, booking.total_price - 1, "RUB");
    let err = manager.apply_payment(&short).await.unwrap_err();

    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(store.payment_count(), 0);
    assert_eq!(
        manager.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn test_payment_in_foreign_currency_rejected() {
    let (store, schedule_id) = setup(4).await;
    let manager = BookingManager::new(store.clone(), &BookingRules::default());
    let booking = manager.create_booking(request(schedule_id, 2)).await.unwrap();

    let dollars = PaymentConfirmation::new("cp-8008", booking.id, booking.total_price, "USD");
    let err = manager.apply_payment(&dollars).await.unwrap_err();

    assert!(matches!(err, BookingError::Validation(_)));
    assert_eq!(store.payment_count(), 0);
    assert_eq!(
        manager.get_booking(booking.id).await.unwrap().status,
        BookingStatus::Pending
    );

    let rules = BookingRules {
        currency: "USD".to_string(),
        ..BookingRules::default()
    };
    let settles_in_dollars = BookingManager::new(store.clone(), &rules);
    assert!(matches!(
        settles_in_dollars.apply_payment(&dollars).await.unwrap(),
        PaymentOutcome::Applied(_)
    ));
}

#[tokio::test]
async fn test_code_collision_is_retried() {
    let (store, schedule_id) = setup(6).await;
    let first = BookingManager::new(store.clone(), &BookingRules::default())
        .with_code_generator(ConfirmationCodeGenerator::seeded(8, 5, 7));
    let taken = first.create_booking(request(schedule_id, 1)).await.unwrap();

    // Same seed: the first draw repeats the code already in use.
    let second = BookingManager::new(store.clone(), &BookingRules::default())
        .with_code_generator(ConfirmationCodeGenerator::seeded(8, 2, 7));
    let booking = second.create_booking(request(schedule_id, 1)).await.unwrap();
    assert_ne!(booking.confirmation_code, taken.confirmation_code);

    let exhausted = BookingManager::new(store.clone(), &BookingRules::default())
        .with_code_generator(ConfirmationCodeGenerator::seeded(8, 1, 7));
    let err = exhausted.create_booking(request(schedule_id, 1)).await.unwrap_err();
    assert!(matches!(err, BookingError::CodeSpaceExhausted(1)));
    assert_eq!(err.code(), ErrorCode::InternalError);

    assert_eq!(
        store.get_schedule(schedule_id).await.unwrap().unwrap().available_seats,
        4
    );
}

#[tokio::test]
async fn test_events_follow_committed_changes() {
    let (store, schedule_id) = setup(4).await;
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = BookingManager::new(store.clone(), &BookingRules::default())
        .with_notifier(notifier.clone());

    let booking = manager.create_booking(request(schedule_id, 1)).await.unwrap();
    manager.confirm_booking(booking.id, "cp-4004").await.unwrap();
    manager.cancel_booking(booking.id, Some("changed plans".into())).await.unwrap();
    // Rejected operations publish nothing.
    assert!(manager.cancel_booking(booking.id, None).await.is_err());

    assert_eq!(
        *notifier.topics.lock(),
        vec![
            topics::BOOKING_CREATED,
            topics::BOOKING_CONFIRMED,
            topics::BOOKING_CANCELLED
        ]
    );
}

#[tokio::test]
async fn test_notification_failure_keeps_booking() {
    let (store, schedule_id) = setup(4).await;
    let manager = BookingManager::new(store.clone(), &BookingRules::default())
        .with_notifier(Arc::new(BrokenNotifier));

    let booking = manager.create_booking(request(schedule_id, 3)).await.unwrap();
    assert_eq!(
        store.get_booking(booking.id).await.unwrap().unwrap().status,
        BookingStatus::Pending
    );
    assert_eq!(
        store.get_schedule(schedule_id).await.unwrap().unwrap().available_seats,
        1
    );
}

#[tokio::test]
async fn test_cache_invalidated_on_seat_changes() {
    let (store, schedule_id) = setup(4).await;
    let cache = Arc::new(CountingCache::default());
    let manager = BookingManager::new(store.clone(), &BookingRules::default())
        .with_cache(cache.clone());

    assert_eq!(manager.schedule_availability(schedule_id).await.unwrap(), 4);
    assert_eq!(*cache.value.lock(), Some(4));

    let booking = manager.create_booking(request(schedule_id, 2)).await.unwrap();
    assert_eq!(*cache.value.lock(), None);
    assert_eq!(manager.schedule_availability(schedule_id).await.unwrap(), 2);

    manager.confirm_booking(booking.id, "cp-5005").await.unwrap();
    manager.cancel_booking(booking.id, None).await.unwrap();
    assert_eq!(cache.invalidations.load(Ordering::SeqCst), 2);
    assert_eq!(manager.schedule_availability(schedule_id).await.unwrap(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_refill_racing_a_booking_stays_fresh() {
    let (store, schedule_id) = setup(5).await;
    let cache = Arc::new(GatedCache::default());
    cache.hold_next_put.store(true, Ordering::SeqCst);
    let rules = BookingRules {
        lock_wait_ms: 2_000,
        ..BookingRules::default()
    };
    let manager = Arc::new(BookingManager::new(store.clone(), &rules).with_cache(cache.clone()));

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.schedule_availability(schedule_id).await })
    };
    cache.parked.notified().await;

    // The booking commits while the refill is still in flight.
    let writer = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.create_booking(request(schedule_id, 2)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.resume.notify_one();

    assert_eq!(reader.await.unwrap().unwrap(), 5);
    writer.await.unwrap().unwrap();

    let truth = store.get_schedule(schedule_id).await.unwrap().unwrap().available_seats;
    assert_eq!(truth, 3);
    assert_ne!(*cache.value.lock(), Some(5));
    assert_eq!(manager.schedule_availability(schedule_id).await.unwrap(), truth);
}

#[tokio::test]
async fn test_metrics_count_outcomes() {
    let (store, schedule_id) = setup(1).await;
    let registry = Registry::new();
    let metrics = BookingMetrics::register(&registry).unwrap();
    let manager = BookingManager::new(store.clone(), &BookingRules::default())
        .with_metrics(metrics.clone());

    manager.create_booking(request(schedule_id, 1)).await.unwrap();
    assert!(manager.create_booking(request(schedule_id, 1)).await.is_err());

    assert_eq!(metrics.count("create", "ok"), 1);
    assert_eq!(metrics.count("create", "INSUFFICIENT_SEATS"), 1);
}

#[tokio::test]
async fn test_inactive_schedule_rejected() {
    let store = Arc::new(MemoryBookingStore::new());
    let mut schedule = Schedule::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        1_000,
        4,
    );
    schedule.is_active = false;
    store.insert_schedule(&schedule).await.unwrap();
    let manager = BookingManager::new(store.clone(), &BookingRules::default());

    let err = manager.create_booking(request(schedule.id, 1)).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ScheduleInactive);
    assert_eq!(err.code().http_status(), 422);
}

#[tokio::test]
async fn test_api_maps_results_to_wire_shapes() {
    let (store, schedule_id) = setup(2).await;
    let api = BookingApi::new(Arc::new(BookingManager::new(
        store.clone(),
        &BookingRules::default(),
    )));

    let created = api.create_booking(request(schedule_id, 2)).await.unwrap();
    assert_eq!(created.status, BookingStatus::Pending);
    assert_eq!(created.total_price, 4_000);
    assert_eq!(created.confirmation_code.len(), 8);

    let sold_out = api.create_booking(request(schedule_id, 1)).await.unwrap_err();
    assert_eq!(sold_out.error_code, ErrorCode::InsufficientSeats);
    assert!(!sold_out.retryable);

    let confirmed = api
        .confirm_booking(ConfirmBookingRequest {
            booking_id: created.booking_id,
            payment_reference: "cp-6006".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(confirmed.new_status, BookingStatus::Confirmed);

    let cancelled = api
        .cancel_booking(CancelBookingRequest {
            booking_id: created.booking_id,
            reason: None,
        })
        .await
        .unwrap();
    assert!(cancelled.success);

    let again = api
        .cancel_booking(CancelBookingRequest {
            booking_id: created.booking_id,
            reason: None,
        })
        .await
        .unwrap_err();
    assert_eq!(again.error_code, ErrorCode::AlreadyCancelled);

    let missing = api
        .confirm_booking(ConfirmBookingRequest {
            booking_id: Uuid::new_v4(),
            payment_reference: "cp-7007".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(missing.error_code, ErrorCode::NotFound);
}
