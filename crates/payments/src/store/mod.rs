//! Persistence seam for the reconciliation path.
//!
//! Handlers never touch the database client directly; they go through the
//! [`ReconciliationStore`] trait so the reducer logic is testable without a
//! running Postgres. Every write is specified as a conflict-safe upsert on
//! the row's natural unique key - replaying the same event any number of
//! times converges to the same stored state.

mod memory;
mod postgres;

pub use memory::{MemoryStore, RecordedEvent};
pub use postgres::PgStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentsResult;

/// Maps one internal user to one external processor customer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerLink {
    pub user_id: Uuid,
    pub stripe_customer_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Row in the local price-catalog mirror.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PriceRecord {
    pub id: Uuid,
    pub stripe_price_id: String,
    pub product: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// Natural unique key of a payment row: intent id for one-time charges,
/// invoice id for subscription invoices. Never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentKey {
    Intent(String),
    Invoice(String),
}

/// One idempotent write against the payments table.
#[derive(Debug, Clone)]
pub struct PaymentUpsert {
    pub key: PaymentKey,
    pub stripe_customer_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    /// Minor units. Immutable once the row exists.
    pub amount: i64,
    /// Immutable once the row exists.
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub subscription_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
}

/// One idempotent write against the subscriptions table.
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub price_id: Option<Uuid>,
    /// Processor status string, stored verbatim.
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub stripe_subscription_id: String,
    pub stripe_customer_id: Option<String>,
    pub user_id: Option<Uuid>,
    pub price_id: Option<Uuid>,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
}

/// Narrow repository interface for everything the reconciliation handlers
/// and the checkout initiator read or write.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    // Customer links (entity resolution).
    async fn find_customer_link(
        &self,
        stripe_customer_id: &str,
    ) -> PaymentsResult<Option<CustomerLink>>;
    async fn find_customer_link_for_user(
        &self,
        user_id: Uuid,
    ) -> PaymentsResult<Option<CustomerLink>>;
    /// Conflict-safe: two concurrent callers discovering the same customer
    /// must both succeed and leave exactly one row.
    async fn upsert_customer_link(&self, link: CustomerLink) -> PaymentsResult<()>;

    // Price catalog (read-only mirror).
    async fn find_price(&self, id: Uuid) -> PaymentsResult<Option<PriceRecord>>;
    async fn find_price_by_external(
        &self,
        stripe_price_id: &str,
    ) -> PaymentsResult<Option<PriceRecord>>;

    // Payments.
    async fn upsert_payment(&self, upsert: PaymentUpsert) -> PaymentsResult<()>;
    /// Mark an existing payment succeeded and merge correlation metadata.
    /// Returns false (and writes nothing) when no row has this intent id.
    async fn mark_payment_succeeded_by_intent(
        &self,
        stripe_payment_intent_id: &str,
        metadata: serde_json::Value,
    ) -> PaymentsResult<bool>;
    /// Mark an existing invoice payment failed. Returns false when no row
    /// has this invoice id.
    async fn mark_payment_failed_by_invoice(
        &self,
        stripe_invoice_id: &str,
        metadata: serde_json::Value,
    ) -> PaymentsResult<bool>;
    async fn find_payment_by_intent(
        &self,
        stripe_payment_intent_id: &str,
    ) -> PaymentsResult<Option<PaymentRecord>>;
    async fn find_payment_by_invoice(
        &self,
        stripe_invoice_id: &str,
    ) -> PaymentsResult<Option<PaymentRecord>>;

    // Subscriptions.
    async fn upsert_subscription(&self, upsert: SubscriptionUpsert) -> PaymentsResult<()>;
    /// Mark a subscription canceled, creating the row if the deletion event
    /// arrived before the creation event.
    async fn cancel_subscription(
        &self,
        stripe_subscription_id: &str,
        stripe_customer_id: Option<&str>,
        canceled_at: OffsetDateTime,
    ) -> PaymentsResult<()>;
    async fn find_subscription_by_external(
        &self,
        stripe_subscription_id: &str,
    ) -> PaymentsResult<Option<SubscriptionRecord>>;

    // Delivery audit log.
    async fn record_webhook_event(
        &self,
        stripe_event_id: &str,
        event_type: &str,
        outcome: &str,
        error: Option<&str>,
    ) -> PaymentsResult<()>;
}
