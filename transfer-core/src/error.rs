use uuid::Uuid;

/// Failures raised by an inventory store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Lock on {entity} {id} not acquired within wait bound")]
    LockTimeout { entity: &'static str, id: Uuid },

    #[error("Insufficient seats on schedule {schedule_id}: requested {requested}, available {available}")]
    InsufficientSeats {
        schedule_id: Uuid,
        requested: i32,
        available: i32,
    },

    /// Returning seats would push the counter past the vehicle capacity.
    #[error("Seat release on schedule {schedule_id} exceeds capacity: {available} + {released} > {capacity}")]
    CapacityExceeded {
        schedule_id: Uuid,
        available: i32,
        released: i32,
        capacity: i32,
    },

    /// Unique constraint hit on commit (confirmation code, payment transaction id, primary key).
    #[error("Conflict on {0}")]
    Conflict(String),

    #[error("Row {0} mutated without holding its lock")]
    LockNotHeld(Uuid),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn schedule_not_found(id: Uuid) -> Self {
        StoreError::NotFound { entity: "schedule", id }
    }

    pub fn booking_not_found(id: Uuid) -> Self {
        StoreError::NotFound { entity: "booking", id }
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, StoreError::LockTimeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
