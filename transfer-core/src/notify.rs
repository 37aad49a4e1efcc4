use async_trait::async_trait;
use transfer_shared::models::events::{
    topics, BookingCancelledEvent, BookingConfirmedEvent, BookingCreatedEvent,
};
use crate::BoxError;

#[derive(Debug, Clone, PartialEq)]
pub enum BookingEvent {
    Created(BookingCreatedEvent),
    Confirmed(BookingConfirmedEvent),
    Cancelled(BookingCancelledEvent),
}

impl BookingEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            BookingEvent::Created(_) => topics::BOOKING_CREATED,
            BookingEvent::Confirmed(_) => topics::BOOKING_CONFIRMED,
            BookingEvent::Cancelled(_) => topics::BOOKING_CANCELLED,
        }
    }

    /// Partition key. Events of one booking stay ordered.
    pub fn key(&self) -> String {
        match self {
            BookingEvent::Created(e) => e.booking_id.to_string(),
            BookingEvent::Confirmed(e) => e.booking_id.to_string(),
            BookingEvent::Cancelled(e) => e.booking_id.to_string(),
        }
    }

    pub fn payload(&self) -> Result<String, serde_json::Error> {
        match self {
            BookingEvent::Created(e) => serde_json::to_string(e),
            BookingEvent::Confirmed(e) => serde_json::to_string(e),
            BookingEvent::Cancelled(e) => serde_json::to_string(e),
        }
    }
}

/// Fire-and-forget outbound notifications. Errors are reported to the caller
/// for logging only; a failed notification never undoes a booking.
#[async_trait]
pub trait BookingNotifier: Send + Sync {
    async fn notify(&self, event: &BookingEvent) -> Result<(), BoxError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl BookingNotifier for NoopNotifier {
    async fn notify(&self, _event: &BookingEvent) -> Result<(), BoxError> {
        Ok(())
    }
}
