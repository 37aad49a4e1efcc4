use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use transfer_core::{
    AvailabilityCache, Booking, BookingEvent, BookingNotifier, BookingRequest, BookingRules,
    BookingStatus, BookingStore, NoopAvailabilityCache, NoopNotifier, PaymentConfirmation,
    StoreTransaction, WaitPolicy,
};
use transfer_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BookingCreatedEvent,
};
use uuid::Uuid;

use crate::code::ConfirmationCodeGenerator;
use crate::error::{BookingError, BookingResult};
use crate::metrics::BookingMetrics;
use crate::reservation::TransactionManager;

/// Result of feeding a payment event into the lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    /// The booking moved to `confirmed`.
    Applied(Booking),
    /// This transaction id was seen before; nothing changed.
    AlreadyApplied,
}

/// Drives bookings through their lifecycle:
///
/// ```text
/// pending ──> confirmed ──> in_progress ──> completed
///    │            │              │
///    └────────────┴──────────────┴──> cancelled (seats released)
/// ```
///
/// Seats are taken when the booking is created and given back only on
/// cancellation. Every transition runs in one store transaction under the
/// booking's row lock, so concurrent duplicates serialize.
pub struct BookingManager {
    transactions: TransactionManager,
    codes: ConfirmationCodeGenerator,
    cache: Arc<dyn AvailabilityCache>,
    notifier: Arc<dyn BookingNotifier>,
    metrics: Option<BookingMetrics>,
    /// Settlement currency; payments in anything else are refused.
    currency: String,
}

impl BookingManager {
    pub fn new(store: Arc<dyn BookingStore>, rules: &BookingRules) -> Self {
        Self {
            transactions: TransactionManager::new(store, rules.wait_policy()),
            codes: ConfirmationCodeGenerator::new(
                rules.confirmation_code_length,
                rules.max_code_attempts,
            ),
            cache: Arc::new(NoopAvailabilityCache),
            notifier: Arc::new(NoopNotifier),
            metrics: None,
            currency: rules.currency.clone(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn AvailabilityCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn BookingNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_metrics(mut self, metrics: BookingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_code_generator(mut self, codes: ConfirmationCodeGenerator) -> Self {
        self.codes = codes;
        self
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        self.transactions.wait_policy()
    }

    pub fn store(&self) -> &Arc<dyn BookingStore> {
        self.transactions.store()
    }

    /// Reserve seats and persist a `pending` booking in one transaction.
    pub async fn create_booking(&self, request: BookingRequest) -> BookingResult<Booking> {
        let result = self.create(&request).await;
        self.record("create", &result);

        let booking = result?;
        info!(
            "Booking {} created: {} seats on schedule {}, code {}, contact {}",
            booking.id,
            booking.passengers_count,
            booking.schedule_id,
            booking.confirmation_code,
            booking.contact.phone
        );
        self.invalidate(booking.schedule_id).await;
        self.notify(BookingEvent::Created(BookingCreatedEvent {
            booking_id: booking.id,
            schedule_id: booking.schedule_id,
            user_id: booking.user_id.clone(),
            passengers_count: booking.passengers_count,
            confirmation_code: booking.confirmation_code.clone(),
            total_price: booking.total_price,
            timestamp: Utc::now().timestamp(),
        }))
        .await;
        Ok(booking)
    }

    async fn create(&self, request: &BookingRequest) -> BookingResult<Booking> {
        validate_request(request)?;

        let mut tx = self.transactions.begin().await?;
        let result = self.create_in(tx.as_mut(), request).await;
        self.transactions.finish(tx, result).await
    }

    async fn create_in(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &BookingRequest,
    ) -> BookingResult<Booking> {
        // Drawn before the schedule lock to keep the lock window short.
        let confirmation_code = self.codes.generate_unique(tx).await?;

        let reservation = self
            .transactions
            .reserve(
                tx,
                request.schedule_id,
                request.passengers_count,
                self.transactions.wait_policy(),
            )
            .await?;

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            schedule_id: request.schedule_id,
            user_id: request.user_id.clone(),
            contact: request.contact.clone(),
            passengers_count: request.passengers_count,
            status: BookingStatus::Pending,
            confirmation_code,
            total_price: reservation.total_price,
            special_requests: request.special_requests.clone(),
            payment_reference: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        tx.insert_booking(&booking).await?;
        Ok(booking)
    }

    /// Cancel a booking and give its seats back, atomically.
    ///
    /// A second cancellation is rejected with `AlreadyCancelled` and changes
    /// nothing; callers may treat it as an idempotent replay.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        reason: Option<String>,
    ) -> BookingResult<Booking> {
        let result = self.cancel(booking_id, reason).await;
        self.record("cancel", &result);

        let (booking, available) = result?;
        info!(
            "Booking {} cancelled, {} seats back on schedule {} ({} available)",
            booking.id, booking.passengers_count, booking.schedule_id, available
        );
        self.invalidate(booking.schedule_id).await;
        self.notify(BookingEvent::Cancelled(BookingCancelledEvent {
            booking_id: booking.id,
            schedule_id: booking.schedule_id,
            seats_released: booking.passengers_count,
            reason: booking.cancellation_reason.clone(),
            timestamp: Utc::now().timestamp(),
        }))
        .await;
        Ok(booking)
    }

    async fn cancel(
        &self,
        booking_id: Uuid,
        reason: Option<String>,
    ) -> BookingResult<(Booking, i32)> {
        let mut tx = self.transactions.begin().await?;
        let result = self.cancel_in(tx.as_mut(), booking_id, reason).await;
        self.transactions.finish(tx, result).await
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn StoreTransaction,
        booking_id: Uuid,
        reason: Option<String>,
    ) -> BookingResult<(Booking, i32)> {
        let mut booking = self.lock_booking(tx, booking_id).await?;

        if booking.status == BookingStatus::Cancelled {
            info!("Booking {} already cancelled, nothing to release", booking_id);
            return Err(BookingError::AlreadyCancelled(booking_id));
        }
        if !booking.status.is_cancellable() {
            return Err(BookingError::InvalidState {
                booking_id,
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let available = self
            .transactions
            .release(tx, booking.schedule_id, booking.passengers_count)
            .await?;

        booking.update_status(BookingStatus::Cancelled);
        booking.cancellation_reason = reason;
        tx.update_booking(&booking).await?;
        Ok((booking, available))
    }

    /// `pending` → `confirmed` after payment. No seat effect.
    pub async fn confirm_booking(
        &self,
        booking_id: Uuid,
        payment_reference: &str,
    ) -> BookingResult<Booking> {
        let result = self.confirm(booking_id, payment_reference).await;
        self.record("confirm", &result);

        let booking = result?;
        info!("Booking {} confirmed with payment {}", booking.id, payment_reference);
        self.notify_confirmed(&booking, payment_reference).await;
        Ok(booking)
    }

    async fn confirm(&self, booking_id: Uuid, payment_reference: &str) -> BookingResult<Booking> {
        let mut tx = self.transactions.begin().await?;
        let result = self.confirm_in(tx.as_mut(), booking_id, payment_reference).await;
        self.transactions.finish(tx, result).await
    }

    async fn confirm_in(
        &self,
        tx: &mut dyn StoreTransaction,
        booking_id: Uuid,
        payment_reference: &str,
    ) -> BookingResult<Booking> {
        if payment_reference.trim().is_empty() {
            return Err(BookingError::Validation("payment reference is empty".to_string()));
        }
        let mut booking = self.lock_booking(tx, booking_id).await?;
        ensure_transition(&booking, BookingStatus::Confirmed)?;

        booking.update_status(BookingStatus::Confirmed);
        booking.payment_reference = Some(payment_reference.to_string());
        tx.update_booking(&booking).await?;
        Ok(booking)
    }

    /// Apply a verified "payment completed" event. The transaction id is
    /// recorded in the same transaction as the confirmation, so a redelivered
    /// event is detected and not applied twice.
    pub async fn apply_payment(
        &self,
        payment: &PaymentConfirmation,
    ) -> BookingResult<PaymentOutcome> {
        let result = self.apply(payment).await;
        self.record("payment", &result);

        match result? {
            PaymentOutcome::Applied(booking) => {
                info!(
                    "Payment {} applied to booking {}",
                    payment.transaction_id, booking.id
                );
                self.notify_confirmed(&booking, &payment.transaction_id).await;
                Ok(PaymentOutcome::Applied(booking))
            }
            PaymentOutcome::AlreadyApplied => {
                info!(
                    "Payment {} already applied, ignoring redelivery",
                    payment.transaction_id
                );
                Ok(PaymentOutcome::AlreadyApplied)
            }
        }
    }

    async fn apply(&self, payment: &PaymentConfirmation) -> BookingResult<PaymentOutcome> {
        let mut tx = self.transactions.begin().await?;
        let result = self.apply_payment_in(tx.as_mut(), payment).await;
        self.transactions.finish(tx, result).await
    }

    async fn apply_payment_in(
        &self,
        tx: &mut dyn StoreTransaction,
        payment: &PaymentConfirmation,
    ) -> BookingResult<PaymentOutcome> {
        let booking = self.lock_booking(tx, payment.booking_id).await?;

        if !tx.record_payment(payment).await? {
            return Ok(PaymentOutcome::AlreadyApplied);
        }
        if payment.currency != self.currency {
            warn!(
                "Payment {} in {} for booking {} priced in {}",
                payment.transaction_id, payment.currency, booking.id, self.currency
            );
            return Err(BookingError::Validation(format!(
                "payment currency {} does not match booking currency {}",
                payment.currency, self.currency
            )));
        }
        if payment.amount != booking.total_price {
            warn!(
                "Payment {} amount {} does not match booking {} total {}",
                payment.transaction_id, payment.amount, booking.id, booking.total_price
            );
            return Err(BookingError::Validation(format!(
                "payment amount {} does not match booking total {}",
                payment.amount, booking.total_price
            )));
        }

        let booking = self
            .confirm_in(tx, payment.booking_id, &payment.transaction_id)
            .await?;
        Ok(PaymentOutcome::Applied(booking))
    }

    /// `confirmed` → `in_progress` when the vehicle departs.
    pub async fn start_trip(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let result = self.transition(booking_id, BookingStatus::InProgress).await;
        self.record("start", &result);
        result
    }

    /// `confirmed` | `in_progress` → `completed`. Seats stay consumed.
    pub async fn complete_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        let result = self.transition(booking_id, BookingStatus::Completed).await;
        self.record("complete", &result);
        result
    }

    async fn transition(&self, booking_id: Uuid, to: BookingStatus) -> BookingResult<Booking> {
        let mut tx = self.transactions.begin().await?;
        let result = self.transition_in(tx.as_mut(), booking_id, to).await;
        let booking = self.transactions.finish(tx, result).await?;
        info!("Booking {} moved to {}", booking.id, booking.status);
        Ok(booking)
    }

    async fn transition_in(
        &self,
        tx: &mut dyn StoreTransaction,
        booking_id: Uuid,
        to: BookingStatus,
    ) -> BookingResult<Booking> {
        let mut booking = self.lock_booking(tx, booking_id).await?;
        ensure_transition(&booking, to)?;
        booking.update_status(to);
        tx.update_booking(&booking).await?;
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.store()
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound { entity: "booking", id: booking_id })
    }

    /// Seats currently open on a schedule, for display. Served from the cache
    /// when possible; never used to decide a reservation.
    ///
    /// A miss refills the cache only while holding the schedule's row lock,
    /// so every seat change commits, and invalidates, after the value stored.
    pub async fn schedule_availability(&self, schedule_id: Uuid) -> BookingResult<i32> {
        match self.cache.get(schedule_id).await {
            Ok(Some(seats)) => return Ok(seats),
            Ok(None) => {}
            Err(e) => warn!("Availability cache read failed for {}: {}", schedule_id, e),
        }

        let mut tx = self.transactions.begin().await?;
        let result = self.refill_availability(tx.as_mut(), schedule_id).await;
        self.transactions.finish(tx, result).await
    }

    async fn refill_availability(
        &self,
        tx: &mut dyn StoreTransaction,
        schedule_id: Uuid,
    ) -> BookingResult<i32> {
        match tx.lock_schedule(schedule_id, WaitPolicy::NoWait).await {
            Ok(locked) => {
                if let Err(e) = self.cache.put(schedule_id, locked.available_seats).await {
                    warn!("Availability cache write failed for {}: {}", schedule_id, e);
                }
                Ok(locked.available_seats)
            }
            // A writer holds the row; answer from a plain read and leave the cache empty.
            Err(e) if e.is_lock_timeout() => {
                debug!("Schedule {} busy, availability served uncached", schedule_id);
                let schedule = self
                    .store()
                    .get_schedule(schedule_id)
                    .await?
                    .ok_or(BookingError::NotFound { entity: "schedule", id: schedule_id })?;
                Ok(schedule.available_seats)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_booking(
        &self,
        tx: &mut dyn StoreTransaction,
        booking_id: Uuid,
    ) -> BookingResult<Booking> {
        Ok(tx
            .lock_booking(booking_id, self.transactions.wait_policy())
            .await?)
    }

    async fn invalidate(&self, schedule_id: Uuid) {
        if let Err(e) = self.cache.invalidate(schedule_id).await {
            warn!("Failed to invalidate availability for schedule {}: {}", schedule_id, e);
        }
    }

    async fn notify_confirmed(&self, booking: &Booking, payment_reference: &str) {
        self.notify(BookingEvent::Confirmed(BookingConfirmedEvent {
            booking_id: booking.id,
            schedule_id: booking.schedule_id,
            payment_reference: payment_reference.to_string(),
            timestamp: Utc::now().timestamp(),
        }))
        .await;
    }

    async fn notify(&self, event: BookingEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            warn!("Notification {} for {} dropped: {}", event.topic(), event.key(), e);
        }
    }

    fn record<T>(&self, operation: &str, result: &BookingResult<T>) {
        if let Err(e) = result {
            if e.is_internal() {
                error!("Booking {} failed internally: {}", operation, e);
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record(operation, result);
        }
    }
}

fn ensure_transition(booking: &Booking, to: BookingStatus) -> BookingResult<()> {
    if booking.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(BookingError::InvalidState {
            booking_id: booking.id,
            from: booking.status,
            to,
        })
    }
}

fn validate_request(request: &BookingRequest) -> BookingResult<()> {
    if request.passengers_count < 1 {
        return Err(BookingError::Validation(format!(
            "passengers count must be at least 1, got {}",
            request.passengers_count
        )));
    }
    if request.user_id.trim().is_empty() {
        return Err(BookingError::Validation("user id is empty".to_string()));
    }
    if request.contact.phone.expose().trim().is_empty() {
        return Err(BookingError::Validation("contact phone is empty".to_string()));
    }
    if request.contact.email.expose().trim().is_empty() {
        return Err(BookingError::Validation("contact email is empty".to_string()));
    }
    Ok(())
}
