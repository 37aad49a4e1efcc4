use serde::{Deserialize, Serialize};
use transfer_core::{BookingStatus, StoreError};
use uuid::Uuid;

/// Error codes surfaced to callers of the booking boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    LockTimeout,
    InsufficientSeats,
    ScheduleInactive,
    NotFound,
    AlreadyCancelled,
    InvalidState,
    ValidationError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::InsufficientSeats => "INSUFFICIENT_SEATS",
            ErrorCode::ScheduleInactive => "SCHEDULE_INACTIVE",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyCancelled => "ALREADY_CANCELLED",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// HTTP status an edge adapter should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::LockTimeout
            | ErrorCode::InsufficientSeats
            | ErrorCode::AlreadyCancelled
            | ErrorCode::InvalidState => 409,
            ErrorCode::ScheduleInactive => 422,
            ErrorCode::NotFound => 404,
            ErrorCode::ValidationError => 400,
            ErrorCode::InternalError => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("The {entity} {id} is busy, try again")]
    LockTimeout { entity: &'static str, id: Uuid },

    #[error("Not enough seats on schedule {schedule_id}: requested {requested}, available {available}")]
    InsufficientSeats {
        schedule_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Schedule {0} is not accepting bookings")]
    ScheduleInactive(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Booking {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("Invalid state transition for booking {booking_id} from {from} to {to}")]
    InvalidState {
        booking_id: Uuid,
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Seat accounting no longer adds up. Indicates a locking bug, never a user error.
    #[error("Seat accounting violated: {0}")]
    ConsistencyViolation(String),

    #[error("No unique confirmation code after {0} attempts")]
    CodeSpaceExhausted(u32),

    #[error("Store failure: {0}")]
    Store(#[source] StoreError),
}

impl BookingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BookingError::LockTimeout { .. } => ErrorCode::LockTimeout,
            BookingError::InsufficientSeats { .. } => ErrorCode::InsufficientSeats,
            BookingError::ScheduleInactive(_) => ErrorCode::ScheduleInactive,
            BookingError::NotFound { .. } => ErrorCode::NotFound,
            BookingError::AlreadyCancelled(_) => ErrorCode::AlreadyCancelled,
            BookingError::InvalidState { .. } => ErrorCode::InvalidState,
            BookingError::Validation(_) => ErrorCode::ValidationError,
            BookingError::ConsistencyViolation(_)
            | BookingError::CodeSpaceExhausted(_)
            | BookingError::Store(_) => ErrorCode::InternalError,
        }
    }

    /// Only contention is worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::LockTimeout { .. })
    }

    pub fn is_internal(&self) -> bool {
        self.code() == ErrorCode::InternalError
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => BookingError::NotFound { entity, id },
            StoreError::LockTimeout { entity, id } => BookingError::LockTimeout { entity, id },
            StoreError::InsufficientSeats {
                schedule_id,
                requested,
                available,
            } => BookingError::InsufficientSeats {
                schedule_id,
                requested,
                available,
            },
            StoreError::CapacityExceeded { .. } | StoreError::LockNotHeld(_) => {
                BookingError::ConsistencyViolation(err.to_string())
            }
            other => BookingError::Store(other),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
