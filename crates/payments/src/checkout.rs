//! Checkout session initiation.
//!
//! Starts a processor-hosted checkout flow and stamps the internal user id
//! into the session (and the payment-intent or subscription it produces) so
//! webhook events can be resolved back to a local user without a processor
//! round trip.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentIntentData, CreateCheckoutSessionSubscriptionData,
};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::customer::CustomerService;
use crate::error::{PaymentsError, PaymentsResult};
use crate::store::ReconciliationStore;

/// Which kind of checkout flow to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutMode {
    Payment,
    Subscription,
}

/// The requesting user, when authenticated. Guests check out with only an
/// optional email hint.
#[derive(Debug, Clone)]
pub struct CheckoutCustomer {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Internal price id, resolved against the local catalog mirror.
    pub price_id: Uuid,
    pub mode: CheckoutMode,
    pub success_url: String,
    pub cancel_url: String,
    pub customer: Option<CheckoutCustomer>,
    pub guest_email: Option<String>,
    /// Extra correlation metadata to stamp into the session.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// Creates processor checkout sessions for the storefront.
#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
    store: Arc<dyn ReconciliationStore>,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, store: Arc<dyn ReconciliationStore>) -> Self {
        Self { stripe, store }
    }

    /// Start a checkout session.
    ///
    /// Processor-side failures (unknown price, API errors) surface
    /// synchronously to the caller; this path has none of the
    /// swallow-and-acknowledge semantics of the webhook side.
    pub async fn create_session(&self, req: CheckoutRequest) -> PaymentsResult<CheckoutResponse> {
        let price = self
            .store
            .find_price(req.price_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| PaymentsError::PriceNotFound(req.price_id.to_string()))?;

        // Correlation metadata: echoed back on checkout.session.completed,
        // and copied onto the payment intent / subscription so their events
        // resolve without a lookup.
        let mut metadata = req.metadata.clone();
        if let Some(customer) = &req.customer {
            metadata.insert("user_id".to_string(), customer.user_id.to_string());
        }

        let client_reference_id = req.customer.as_ref().map(|c| c.user_id.to_string());

        // Resolve the customer link before building params: the link creation
        // is the only processor round trip besides the session itself.
        let customer_id = match &req.customer {
            Some(customer) => {
                let customers = CustomerService::new(self.stripe.clone(), self.store.clone());
                let link = customers
                    .get_or_create_customer(
                        customer.user_id,
                        customer.email.as_deref(),
                        customer.name.as_deref(),
                    )
                    .await?;
                Some(link.stripe_customer_id.parse().map_err(|_| {
                    PaymentsError::Internal(format!(
                        "invalid stored customer id: {}",
                        link.stripe_customer_id
                    ))
                })?)
            }
            None => None,
        };

        // Stamp the correlation metadata onto the object the webhook events
        // will actually carry: the payment intent for one-time flows, the
        // subscription for recurring ones.
        let (payment_intent_data, subscription_data) = match req.mode {
            CheckoutMode::Payment => (
                Some(CreateCheckoutSessionPaymentIntentData {
                    metadata: Some(metadata.clone()),
                    ..Default::default()
                }),
                None,
            ),
            CheckoutMode::Subscription => (
                None,
                Some(CreateCheckoutSessionSubscriptionData {
                    metadata: Some(metadata.clone()),
                    ..Default::default()
                }),
            ),
        };

        let guest_email = req.guest_email.clone();

        let params = CreateCheckoutSession {
            mode: Some(match req.mode {
                CheckoutMode::Payment => CheckoutSessionMode::Payment,
                CheckoutMode::Subscription => CheckoutSessionMode::Subscription,
            }),
            success_url: Some(&req.success_url),
            cancel_url: Some(&req.cancel_url),
            client_reference_id: client_reference_id.as_deref(),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(price.stripe_price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            metadata: Some(metadata),
            payment_intent_data,
            subscription_data,
            customer_email: if customer_id.is_none() {
                guest_email.as_deref()
            } else {
                None
            },
            customer: customer_id,
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            session_id = %session.id,
            mode = ?req.mode,
            price_id = %req.price_id,
            user_id = ?req.customer.as_ref().map(|c| c.user_id),
            "Checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            url: session.url,
        })
    }
}
