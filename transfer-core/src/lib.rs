pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod payment;
pub mod repository;

pub use cache::{AvailabilityCache, NoopAvailabilityCache};
pub use config::BookingRules;
pub use error::{StoreError, StoreResult};
pub use models::{
    Booking, BookingRequest, BookingStatus, ContactInfo, LockedSchedule, Schedule, WaitPolicy,
};
pub use notify::{BookingEvent, BookingNotifier, NoopNotifier};
pub use payment::PaymentConfirmation;
pub use repository::{BookingStore, StoreTransaction};

/// Error type of the pluggable collaborators (cache, notifier).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
