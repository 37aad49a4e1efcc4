pub mod boundary;
pub mod code;
pub mod error;
pub mod harness;
pub mod manager;
pub mod metrics;
pub mod reservation;

pub use boundary::{BookingApi, ErrorBody};
pub use code::ConfirmationCodeGenerator;
pub use error::{BookingError, BookingResult, ErrorCode};
pub use harness::{check_seat_accounting, DrillReport, InvariantViolation, RaceDrill};
pub use manager::{BookingManager, PaymentOutcome};
pub use metrics::BookingMetrics;
pub use reservation::{Reservation, TransactionManager};
