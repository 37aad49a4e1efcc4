use uuid::Uuid;

/// Topic names used when booking events leave the process.
pub mod topics {
    pub const BOOKING_CREATED: &str = "transfer.booking.created";
    pub const BOOKING_CONFIRMED: &str = "transfer.booking.confirmed";
    pub const BOOKING_CANCELLED: &str = "transfer.booking.cancelled";
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct BookingCreatedEvent {
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub user_id: String,
    pub passengers_count: i32,
    pub confirmation_code: String,
    pub total_price: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub payment_reference: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub seats_released: i32,
    pub reason: Option<String>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_event_payload_shape() {
        let event = BookingCancelledEvent {
            booking_id: Uuid::nil(),
            schedule_id: Uuid::nil(),
            seats_released: 2,
            reason: Some("plans changed".to_string()),
            timestamp: 1_700_000_000,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seats_released"], 2);
        assert_eq!(json["reason"], "plans changed");
    }
}
