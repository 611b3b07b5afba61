//! Postgres implementation of the reconciliation store.
//!
//! All writes are single-statement `INSERT ... ON CONFLICT ... DO UPDATE`
//! upserts on the natural unique key, so concurrent duplicate deliveries
//! race safely at the database rather than in application code. Payment
//! amount and currency are deliberately absent from every conflict-update
//! list: once written they are immutable.

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    CustomerLink, PaymentKey, PaymentRecord, PaymentUpsert, PriceRecord, ReconciliationStore,
    SubscriptionRecord, SubscriptionUpsert,
};
use crate::error::PaymentsResult;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn find_customer_link(
        &self,
        stripe_customer_id: &str,
    ) -> PaymentsResult<Option<CustomerLink>> {
        let link = sqlx::query_as::<_, CustomerLink>(
            r#"
            SELECT user_id, stripe_customer_id, email, name
            FROM stripe_customers
            WHERE stripe_customer_id = $1
            "#,
        )
        .bind(stripe_customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn find_customer_link_for_user(
        &self,
        user_id: Uuid,
    ) -> PaymentsResult<Option<CustomerLink>> {
        let link = sqlx::query_as::<_, CustomerLink>(
            r#"
            SELECT user_id, stripe_customer_id, email, name
            FROM stripe_customers
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(link)
    }

    async fn upsert_customer_link(&self, link: CustomerLink) -> PaymentsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stripe_customers (user_id, stripe_customer_id, email, name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                email = COALESCE(EXCLUDED.email, stripe_customers.email),
                name = COALESCE(EXCLUDED.name, stripe_customers.name),
                updated_at = NOW()
            "#,
        )
        .bind(link.user_id)
        .bind(&link.stripe_customer_id)
        .bind(&link.email)
        .bind(&link.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_price(&self, id: Uuid) -> PaymentsResult<Option<PriceRecord>> {
        let price = sqlx::query_as::<_, PriceRecord>(
            r#"
            SELECT id, stripe_price_id, product, unit_amount, currency, active
            FROM prices
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    async fn find_price_by_external(
        &self,
        stripe_price_id: &str,
    ) -> PaymentsResult<Option<PriceRecord>> {
        let price = sqlx::query_as::<_, PriceRecord>(
            r#"
            SELECT id, stripe_price_id, product, unit_amount, currency, active
            FROM prices
            WHERE stripe_price_id = $1
            "#,
        )
        .bind(stripe_price_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(price)
    }

    async fn upsert_payment(&self, upsert: PaymentUpsert) -> PaymentsResult<()> {
        let (intent_id, invoice_id, conflict_target) = match &upsert.key {
            PaymentKey::Intent(id) => (Some(id.as_str()), None, "stripe_payment_intent_id"),
            PaymentKey::Invoice(id) => (None, Some(id.as_str()), "stripe_invoice_id"),
        };

        // The conflict target is one of two fixed column names, never input.
        let sql = format!(
            r#"
            INSERT INTO payments (
                id, stripe_payment_intent_id, stripe_invoice_id, stripe_customer_id,
                user_id, subscription_id, amount, currency, status, payment_method,
                metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())
            ON CONFLICT ({conflict_target}) DO UPDATE SET
                status = EXCLUDED.status,
                payment_method = COALESCE(EXCLUDED.payment_method, payments.payment_method),
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, payments.stripe_customer_id),
                user_id = COALESCE(payments.user_id, EXCLUDED.user_id),
                subscription_id = COALESCE(payments.subscription_id, EXCLUDED.subscription_id),
                metadata = payments.metadata || EXCLUDED.metadata,
                updated_at = NOW()
            "#
        );

        sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(intent_id)
            .bind(invoice_id)
            .bind(&upsert.stripe_customer_id)
            .bind(upsert.user_id)
            .bind(upsert.subscription_id)
            .bind(upsert.amount)
            .bind(&upsert.currency)
            .bind(upsert.status.as_str())
            .bind(&upsert.payment_method)
            .bind(&upsert.metadata)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_payment_succeeded_by_intent(
        &self,
        stripe_payment_intent_id: &str,
        metadata: serde_json::Value,
    ) -> PaymentsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'succeeded',
                metadata = payments.metadata || $2,
                updated_at = NOW()
            WHERE stripe_payment_intent_id = $1
            "#,
        )
        .bind(stripe_payment_intent_id)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_payment_failed_by_invoice(
        &self,
        stripe_invoice_id: &str,
        metadata: serde_json::Value,
    ) -> PaymentsResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'failed',
                metadata = payments.metadata || $2,
                updated_at = NOW()
            WHERE stripe_invoice_id = $1
            "#,
        )
        .bind(stripe_invoice_id)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_payment_by_intent(
        &self,
        stripe_payment_intent_id: &str,
    ) -> PaymentsResult<Option<PaymentRecord>> {
        let payment = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, stripe_payment_intent_id, stripe_invoice_id, stripe_customer_id,
                   user_id, subscription_id, amount, currency, status, payment_method, metadata
            FROM payments
            WHERE stripe_payment_intent_id = $1
            "#,
        )
        .bind(stripe_payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn find_payment_by_invoice(
        &self,
        stripe_invoice_id: &str,
    ) -> PaymentsResult<Option<PaymentRecord>> {
        let payment = sqlx::query_as::<_, PaymentRecord>(
            r#"
            SELECT id, stripe_payment_intent_id, stripe_invoice_id, stripe_customer_id,
                   user_id, subscription_id, amount, currency, status, payment_method, metadata
            FROM payments
            WHERE stripe_invoice_id = $1
            "#,
        )
        .bind(stripe_invoice_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(payment)
    }

    async fn upsert_subscription(&self, upsert: SubscriptionUpsert) -> PaymentsResult<()> {
        // Status, period bounds and cancellation fields reflect the most
        // recently processed event: unconditional overwrite, arrival order.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, stripe_subscription_id, stripe_customer_id, user_id, price_id,
                status, current_period_start, current_period_end,
                cancel_at_period_end, canceled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW(), NOW())
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                status = EXCLUDED.status,
                stripe_customer_id = COALESCE(EXCLUDED.stripe_customer_id, subscriptions.stripe_customer_id),
                user_id = COALESCE(subscriptions.user_id, EXCLUDED.user_id),
                price_id = COALESCE(EXCLUDED.price_id, subscriptions.price_id),
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                canceled_at = EXCLUDED.canceled_at,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&upsert.stripe_subscription_id)
        .bind(&upsert.stripe_customer_id)
        .bind(upsert.user_id)
        .bind(upsert.price_id)
        .bind(&upsert.status)
        .bind(upsert.current_period_start)
        .bind(upsert.current_period_end)
        .bind(upsert.cancel_at_period_end)
        .bind(upsert.canceled_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cancel_subscription(
        &self,
        stripe_subscription_id: &str,
        stripe_customer_id: Option<&str>,
        canceled_at: OffsetDateTime,
    ) -> PaymentsResult<()> {
        // Keeps the first observed cancellation timestamp so replays converge.
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, stripe_subscription_id, stripe_customer_id, status,
                canceled_at, created_at, updated_at
            ) VALUES ($1, $2, $3, 'canceled', $4, NOW(), NOW())
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                status = 'canceled',
                canceled_at = COALESCE(subscriptions.canceled_at, EXCLUDED.canceled_at),
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(stripe_subscription_id)
        .bind(stripe_customer_id)
        .bind(canceled_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_subscription_by_external(
        &self,
        stripe_subscription_id: &str,
    ) -> PaymentsResult<Option<SubscriptionRecord>> {
        let subscription = sqlx::query_as::<_, SubscriptionRecord>(
            r#"
            SELECT id, stripe_subscription_id, stripe_customer_id, user_id, price_id,
                   status, current_period_start, current_period_end,
                   cancel_at_period_end, canceled_at
            FROM subscriptions
            WHERE stripe_subscription_id = $1
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn record_webhook_event(
        &self,
        stripe_event_id: &str,
        event_type: &str,
        outcome: &str,
        error: Option<&str>,
    ) -> PaymentsResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (stripe_event_id, event_type, outcome, error, received_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (stripe_event_id) DO NOTHING
            "#,
        )
        .bind(stripe_event_id)
        .bind(event_type)
        .bind(outcome)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
