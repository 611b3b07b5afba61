//! Payment routes: webhook ingestion and checkout-session creation.

use std::collections::HashMap;

use atelier_payments::{
    CheckoutCustomer, CheckoutMode, CheckoutRequest, CheckoutResponse, WebhookAck,
};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::MaybeUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Handle a payment-processor webhook delivery.
///
/// Thin adapter over the transport-agnostic processor: the raw body bytes
/// reach signature verification untouched (no body-parsing middleware runs
/// ahead of this handler). Handler-level failures are acknowledged with 200
/// and an error flag in the body; only signature/payload/configuration
/// problems map to error statuses.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    tracing::debug!(body_len = body.len(), "Webhook delivery received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());

    let ack = state.payments.webhooks.process(&body, signature).await?;

    Ok((StatusCode::OK, Json(ack)))
}

/// Request to start a checkout flow.
#[derive(Debug, Deserialize)]
pub struct CreateCheckoutBody {
    /// Internal price id from the local catalog.
    pub price_id: Uuid,
    pub mode: CheckoutMode,
    pub success_url: String,
    pub cancel_url: String,
    /// Email hint for guest checkouts; ignored for authenticated users.
    pub email: Option<String>,
    /// Extra correlation metadata stamped into the processor-side session.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Create a checkout session.
///
/// Unlike the webhook path, processor-side errors (unknown price, API
/// failure) surface synchronously to the caller.
pub async fn create_checkout(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Json(body): Json<CreateCheckoutBody>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let customer = user.map(|u| CheckoutCustomer {
        user_id: u.user_id,
        email: u.email,
        name: None,
    });

    let guest_email = if customer.is_none() { body.email } else { None };

    let response = state
        .payments
        .checkout
        .create_session(CheckoutRequest {
            price_id: body.price_id,
            mode: body.mode,
            success_url: body.success_url,
            cancel_url: body.cancel_url,
            customer,
            guest_email,
            metadata: body.metadata,
        })
        .await?;

    Ok(Json(response))
}
