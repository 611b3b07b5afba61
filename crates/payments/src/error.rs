//! Payment subsystem error taxonomy.
//!
//! The split matters at the webhook boundary: signature and payload problems
//! reject the request (400), a missing signing secret is an operator-visible
//! configuration fault (500), and everything that happens after dispatch is a
//! handler error that still acknowledges the delivery.

use thiserror::Error;

pub type PaymentsResult<T> = Result<T, PaymentsError>;

#[derive(Debug, Error)]
pub enum PaymentsError {
    /// Body/signature mismatch, bad header format, or stale timestamp.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// STRIPE_WEBHOOK_SECRET is not configured. Never fall back to trusting
    /// unsigned payloads.
    #[error("webhook signing secret is not configured")]
    MissingWebhookSecret,

    /// Body passed signature verification but does not parse as an event.
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("stripe api error: {0}")]
    StripeApi(String),

    /// Checkout was requested for a price the local catalog does not carry.
    #[error("price not found: {0}")]
    PriceNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for PaymentsError {
    fn from(err: sqlx::Error) -> Self {
        PaymentsError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for PaymentsError {
    fn from(err: stripe::StripeError) -> Self {
        PaymentsError::StripeApi(err.to_string())
    }
}
