// Payments crate clippy configuration.
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Atelier Payments
//!
//! Stripe integration for the storefront: checkout session creation and
//! webhook reconciliation of customers, payments, and subscriptions.
//!
//! ## Design
//!
//! - **Ingestion is stateless.** Every webhook delivery is independent and
//!   may race with duplicates of itself or with other deliveries touching
//!   the same entity. There are no in-process locks, queues, or retry
//!   schedulers; all concurrency safety lives in the storage layer's
//!   natural-key upserts.
//! - **Idempotence is the correctness property.** Replaying any event any
//!   number of times converges to the same row state.
//! - **Arrival order is the only order.** Handlers tolerate events arriving
//!   before or after their logical predecessors; the most recently delivered
//!   event wins.

pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod event;
pub mod signature;
pub mod store;
pub mod webhooks;


// Checkout
pub use checkout::{
    CheckoutCustomer, CheckoutMode, CheckoutRequest, CheckoutResponse, CheckoutService,
};

// Client
pub use client::{StripeClient, StripeConfig, DEFAULT_SIGNATURE_TOLERANCE_SECS};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{PaymentsError, PaymentsResult};

// Events
pub use event::{EventKind, WebhookEvent};

// Store
pub use store::{
    CustomerLink, MemoryStore, PaymentKey, PaymentRecord, PaymentStatus, PaymentUpsert, PgStore,
    PriceRecord, ReconciliationStore, SubscriptionRecord, SubscriptionUpsert,
};

// Webhooks
pub use webhooks::{AckOutcome, WebhookAck, WebhookHandler};

use std::sync::Arc;

use sqlx::PgPool;

/// Aggregate payments service: one handle for everything the API layer
/// needs, with its collaborators injected explicitly.
pub struct PaymentsService {
    pub checkout: CheckoutService,
    pub customers: CustomerService,
    pub webhooks: WebhookHandler,
    pub store: Arc<dyn ReconciliationStore>,
}

impl PaymentsService {
    /// Create the service from environment variables, persisting to Postgres.
    pub fn from_env(pool: PgPool) -> PaymentsResult<Self> {
        let stripe = StripeClient::from_env()?;
        let store: Arc<dyn ReconciliationStore> = Arc::new(PgStore::new(pool));
        Ok(Self::new(stripe, store))
    }

    /// Create the service with an explicit client and store.
    pub fn new(stripe: StripeClient, store: Arc<dyn ReconciliationStore>) -> Self {
        Self {
            checkout: CheckoutService::new(stripe.clone(), store.clone()),
            customers: CustomerService::new(stripe.clone(), store.clone()),
            webhooks: WebhookHandler::new(store.clone(), stripe.config()),
            store,
        }
    }
}
