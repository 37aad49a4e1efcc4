use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

/// A "payment completed" event from the payment feed. The feed has already
/// verified the provider signature; duplicates are possible and are detected
/// by `transaction_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentConfirmation {
    pub transaction_id: String,
    pub booking_id: Uuid,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub received_at: DateTime<Utc>,
}

impl PaymentConfirmation {
    pub fn new(transaction_id: impl Into<String>, booking_id: Uuid, amount: i64, currency: &str) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            booking_id,
            amount,
            currency: currency.to_string(),
            received_at: Utc::now(),
        }
    }
}
