//! Typed request/response shapes at the edge of the booking core.
//!
//! Nothing past this module sees a `BookingError`; every failure becomes an
//! [`ErrorBody`] carrying one of the external error codes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use transfer_core::{BookingRequest, BookingStatus, PaymentConfirmation};
use uuid::Uuid;

use crate::error::{BookingError, ErrorCode};
use crate::manager::{BookingManager, PaymentOutcome};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error_code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl ErrorBody {
    pub fn http_status(&self) -> u16 {
        self.error_code.http_status()
    }
}

impl From<BookingError> for ErrorBody {
    fn from(err: BookingError) -> Self {
        let error_code = err.code();
        let message = if err.is_internal() {
            error!("Internal booking error: {}", err);
            "Internal error".to_string()
        } else {
            err.to_string()
        };
        Self {
            error_code,
            message,
            retryable: err.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingResponse {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub confirmation_code: String,
    pub total_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingResponse {
    pub success: bool,
    pub new_status: BookingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub success: bool,
    pub already_applied: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub booking_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingRequest {
    pub booking_id: Uuid,
    pub payment_reference: String,
}

pub type ApiResult<T> = Result<T, ErrorBody>;

/// Facade an edge adapter (HTTP handler, queue consumer) calls into.
#[derive(Clone)]
pub struct BookingApi {
    manager: Arc<BookingManager>,
}

impl BookingApi {
    pub fn new(manager: Arc<BookingManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<BookingManager> {
        &self.manager
    }

    pub async fn create_booking(&self, request: BookingRequest) -> ApiResult<CreateBookingResponse> {
        let booking = self.manager.create_booking(request).await?;
        Ok(CreateBookingResponse {
            booking_id: booking.id,
            status: booking.status,
            confirmation_code: booking.confirmation_code,
            total_price: booking.total_price,
        })
    }

    pub async fn cancel_booking(
        &self,
        request: CancelBookingRequest,
    ) -> ApiResult<CancelBookingResponse> {
        self.manager
            .cancel_booking(request.booking_id, request.reason)
            .await?;
        Ok(CancelBookingResponse { success: true })
    }

    pub async fn confirm_booking(
        &self,
        request: ConfirmBookingRequest,
    ) -> ApiResult<ConfirmBookingResponse> {
        let booking = self
            .manager
            .confirm_booking(request.booking_id, &request.payment_reference)
            .await?;
        Ok(ConfirmBookingResponse {
            success: true,
            new_status: booking.status,
        })
    }

    /// A redelivered payment answers success so the sender stops retrying.
    pub async fn apply_payment(&self, payment: PaymentConfirmation) -> ApiResult<PaymentResponse> {
        let outcome = self.manager.apply_payment(&payment).await?;
        Ok(PaymentResponse {
            success: true,
            already_applied: outcome == PaymentOutcome::AlreadyApplied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody::from(BookingError::LockTimeout {
            entity: "schedule",
            id: Uuid::nil(),
        });
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["errorCode"], json!("LOCK_TIMEOUT"));
        assert_eq!(value["retryable"], json!(true));
        assert_eq!(body.http_status(), 409);
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let body = ErrorBody::from(BookingError::ConsistencyViolation(
            "schedule went negative".to_string(),
        ));
        assert_eq!(body.error_code, ErrorCode::InternalError);
        assert_eq!(body.message, "Internal error");
        assert!(!body.retryable);
    }

    #[test]
    fn test_confirm_response_uses_wire_status() {
        let response = ConfirmBookingResponse {
            success: true,
            new_status: BookingStatus::Confirmed,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "success": true, "newStatus": "confirmed" })
        );
    }

    #[test]
    fn test_cancel_request_reason_optional() {
        let request: CancelBookingRequest =
            serde_json::from_value(json!({ "bookingId": Uuid::nil() })).unwrap();
        assert!(request.reason.is_none());
    }
}
