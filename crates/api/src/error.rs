//! API error type and HTTP status mapping.

use atelier_payments::PaymentsError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// Operator-visible misconfiguration (e.g. missing webhook secret).
    #[error("service misconfigured")]
    Configuration(String),

    #[error("database error")]
    Database(String),

    #[error("payment provider error: {0}")]
    Stripe(String),

    #[error("internal error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            // Internal details go to the logs, not the response body.
            ApiError::Configuration(detail) => {
                tracing::error!(detail = %detail, "configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Database(detail) => {
                tracing::error!(detail = %detail, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::Stripe(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PaymentsError> for ApiError {
    fn from(err: PaymentsError) -> Self {
        match err {
            PaymentsError::SignatureInvalid => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            PaymentsError::MalformedPayload(msg) => ApiError::BadRequest(msg),
            PaymentsError::MissingWebhookSecret => {
                ApiError::Configuration("webhook signing secret is not configured".to_string())
            }
            PaymentsError::PriceNotFound(id) => {
                ApiError::BadRequest(format!("unknown price: {id}"))
            }
            PaymentsError::Database(msg) => ApiError::Database(msg),
            PaymentsError::StripeApi(msg) => ApiError::Stripe(msg),
            PaymentsError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn signature_errors_are_bad_requests() {
        assert_eq!(
            status_of(PaymentsError::SignatureInvalid.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(PaymentsError::MalformedPayload("oops".into()).into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn missing_secret_is_a_server_error() {
        assert_eq!(
            status_of(PaymentsError::MissingWebhookSecret.into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unknown_price_is_a_bad_request() {
        assert_eq!(
            status_of(PaymentsError::PriceNotFound("p".into()).into()),
            StatusCode::BAD_REQUEST
        );
    }
}
