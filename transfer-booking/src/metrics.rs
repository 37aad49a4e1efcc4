use prometheus::{IntCounterVec, Opts, Registry};

use crate::error::BookingError;

/// Outcome counters for the booking operations.
#[derive(Clone)]
pub struct BookingMetrics {
    outcomes: IntCounterVec,
}

impl BookingMetrics {
    /// Create the counters and register them on `registry`.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let outcomes = IntCounterVec::new(
            Opts::new(
                "transfer_booking_outcomes_total",
                "Booking operations by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(outcomes.clone()))?;
        Ok(Self { outcomes })
    }

    pub fn record<T>(&self, operation: &str, result: &Result<T, BookingError>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.code().as_str(),
        };
        self.outcomes.with_label_values(&[operation, outcome]).inc();
    }

    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.outcomes.with_label_values(&[operation, outcome]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_outcomes_labelled_by_error_code() {
        let registry = Registry::new();
        let metrics = BookingMetrics::register(&registry).unwrap();

        metrics.record::<()>("create", &Ok(()));
        let busy = || BookingError::LockTimeout {
            entity: "schedule",
            id: Uuid::new_v4(),
        };
        metrics.record::<()>("create", &Err(busy()));
        metrics.record::<()>("create", &Err(busy()));

        assert_eq!(metrics.count("create", "ok"), 1);
        assert_eq!(metrics.count("create", "LOCK_TIMEOUT"), 2);
        assert_eq!(registry.gather().len(), 1);
    }

    #[test]
    fn test_double_registration_rejected() {
        let registry = Registry::new();
        BookingMetrics::register(&registry).unwrap();
        assert!(BookingMetrics::register(&registry).is_err());
    }
}
