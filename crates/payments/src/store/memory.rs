//! In-memory reconciliation store.
//!
//! Mirrors the merge semantics of the Postgres implementation (natural-key
//! upserts, immutable amount/currency, metadata merge) behind the same
//! trait, so handler logic can be exercised without a database.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    CustomerLink, PaymentKey, PaymentRecord, PaymentUpsert, PriceRecord, ReconciliationStore,
    SubscriptionRecord, SubscriptionUpsert,
};
use crate::error::PaymentsResult;

#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub stripe_event_id: String,
    pub event_type: String,
    pub outcome: String,
    pub error: Option<String>,
}

#[derive(Default)]
struct Tables {
    customer_links: HashMap<Uuid, CustomerLink>,
    prices: HashMap<Uuid, PriceRecord>,
    /// Keyed by the payment's natural key.
    payments: HashMap<String, PaymentRecord>,
    /// Keyed by external subscription id.
    subscriptions: HashMap<String, SubscriptionRecord>,
    events: Vec<RecordedEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn payment_map_key(key: &PaymentKey) -> String {
    match key {
        PaymentKey::Intent(id) => format!("pi:{id}"),
        PaymentKey::Invoice(id) => format!("in:{id}"),
    }
}

/// Shallow object merge, matching Postgres `jsonb || jsonb`.
fn merge_metadata(base: &mut serde_json::Value, incoming: &serde_json::Value) {
    match (base.as_object_mut(), incoming.as_object()) {
        (Some(base_map), Some(incoming_map)) => {
            for (k, v) in incoming_map {
                base_map.insert(k.clone(), v.clone());
            }
        }
        _ => *base = incoming.clone(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the price catalog (done out of band in production).
    pub async fn insert_price(&self, price: PriceRecord) {
        self.tables.lock().await.prices.insert(price.id, price);
    }

    pub async fn recorded_events(&self) -> Vec<RecordedEvent> {
        self.tables.lock().await.events.clone()
    }

    pub async fn payment_count(&self) -> usize {
        self.tables.lock().await.payments.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.tables.lock().await.subscriptions.len()
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn find_customer_link(
        &self,
        stripe_customer_id: &str,
    ) -> PaymentsResult<Option<CustomerLink>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .customer_links
            .values()
            .find(|link| link.stripe_customer_id == stripe_customer_id)
            .cloned())
    }

    async fn find_customer_link_for_user(
        &self,
        user_id: Uuid,
    ) -> PaymentsResult<Option<CustomerLink>> {
        let tables = self.tables.lock().await;
        Ok(tables.customer_links.get(&user_id).cloned())
    }

    async fn upsert_customer_link(&self, link: CustomerLink) -> PaymentsResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.customer_links.entry(link.user_id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.stripe_customer_id = link.stripe_customer_id;
                if link.email.is_some() {
                    existing.email = link.email;
                }
                if link.name.is_some() {
                    existing.name = link.name;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(link);
            }
        }
        Ok(())
    }

    async fn find_price(&self, id: Uuid) -> PaymentsResult<Option<PriceRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.prices.get(&id).cloned())
    }

    async fn find_price_by_external(
        &self,
        stripe_price_id: &str,
    ) -> PaymentsResult<Option<PriceRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .prices
            .values()
            .find(|p| p.stripe_price_id == stripe_price_id)
            .cloned())
    }

    async fn upsert_payment(&self, upsert: PaymentUpsert) -> PaymentsResult<()> {
        let mut tables = self.tables.lock().await;
        let map_key = payment_map_key(&upsert.key);

        match tables.payments.entry(map_key) {
            Entry::Occupied(mut entry) => {
                // Amount and currency stay as first written.
                let existing = entry.get_mut();
                existing.status = upsert.status.as_str().to_string();
                if upsert.payment_method.is_some() {
                    existing.payment_method = upsert.payment_method;
                }
                if upsert.stripe_customer_id.is_some() {
                    existing.stripe_customer_id = upsert.stripe_customer_id;
                }
                if existing.user_id.is_none() {
                    existing.user_id = upsert.user_id;
                }
                if existing.subscription_id.is_none() {
                    existing.subscription_id = upsert.subscription_id;
                }
                merge_metadata(&mut existing.metadata, &upsert.metadata);
            }
            Entry::Vacant(entry) => {
                let (intent_id, invoice_id) = match &upsert.key {
                    PaymentKey::Intent(id) => (Some(id.clone()), None),
                    PaymentKey::Invoice(id) => (None, Some(id.clone())),
                };
                entry.insert(PaymentRecord {
                    id: Uuid::new_v4(),
                    stripe_payment_intent_id: intent_id,
                    stripe_invoice_id: invoice_id,
                    stripe_customer_id: upsert.stripe_customer_id,
                    user_id: upsert.user_id,
                    subscription_id: upsert.subscription_id,
                    amount: upsert.amount,
                    currency: upsert.currency,
                    status: upsert.status.as_str().to_string(),
                    payment_method: upsert.payment_method,
                    metadata: upsert.metadata,
                });
            }
        }
        Ok(())
    }

    async fn mark_payment_succeeded_by_intent(
        &self,
        stripe_payment_intent_id: &str,
        metadata: serde_json::Value,
    ) -> PaymentsResult<bool> {
        let mut tables = self.tables.lock().await;
        let map_key = format!("pi:{stripe_payment_intent_id}");
        match tables.payments.get_mut(&map_key) {
            Some(existing) => {
                existing.status = "succeeded".to_string();
                merge_metadata(&mut existing.metadata, &metadata);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_payment_failed_by_invoice(
        &self,
        stripe_invoice_id: &str,
        metadata: serde_json::Value,
    ) -> PaymentsResult<bool> {
        let mut tables = self.tables.lock().await;
        let map_key = format!("in:{stripe_invoice_id}");
        match tables.payments.get_mut(&map_key) {
            Some(existing) => {
                existing.status = "failed".to_string();
                merge_metadata(&mut existing.metadata, &metadata);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_payment_by_intent(
        &self,
        stripe_payment_intent_id: &str,
    ) -> PaymentsResult<Option<PaymentRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .get(&format!("pi:{stripe_payment_intent_id}"))
            .cloned())
    }

    async fn find_payment_by_invoice(
        &self,
        stripe_invoice_id: &str,
    ) -> PaymentsResult<Option<PaymentRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .get(&format!("in:{stripe_invoice_id}"))
            .cloned())
    }

    async fn upsert_subscription(&self, upsert: SubscriptionUpsert) -> PaymentsResult<()> {
        let mut tables = self.tables.lock().await;
        match tables
            .subscriptions
            .entry(upsert.stripe_subscription_id.clone())
        {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.status = upsert.status;
                if upsert.stripe_customer_id.is_some() {
                    existing.stripe_customer_id = upsert.stripe_customer_id;
                }
                if existing.user_id.is_none() {
                    existing.user_id = upsert.user_id;
                }
                if upsert.price_id.is_some() {
                    existing.price_id = upsert.price_id;
                }
                existing.current_period_start = upsert.current_period_start;
                existing.current_period_end = upsert.current_period_end;
                existing.cancel_at_period_end = upsert.cancel_at_period_end;
                existing.canceled_at = upsert.canceled_at;
            }
            Entry::Vacant(entry) => {
                entry.insert(SubscriptionRecord {
                    id: Uuid::new_v4(),
                    stripe_subscription_id: upsert.stripe_subscription_id,
                    stripe_customer_id: upsert.stripe_customer_id,
                    user_id: upsert.user_id,
                    price_id: upsert.price_id,
                    status: upsert.status,
                    current_period_start: upsert.current_period_start,
                    current_period_end: upsert.current_period_end,
                    cancel_at_period_end: upsert.cancel_at_period_end,
                    canceled_at: upsert.canceled_at,
                });
            }
        }
        Ok(())
    }

    async fn cancel_subscription(
        &self,
        stripe_subscription_id: &str,
        stripe_customer_id: Option<&str>,
        canceled_at: OffsetDateTime,
    ) -> PaymentsResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.subscriptions.entry(stripe_subscription_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.status = "canceled".to_string();
                existing.canceled_at = Some(existing.canceled_at.unwrap_or(canceled_at));
            }
            Entry::Vacant(entry) => {
                entry.insert(SubscriptionRecord {
                    id: Uuid::new_v4(),
                    stripe_subscription_id: stripe_subscription_id.to_string(),
                    stripe_customer_id: stripe_customer_id.map(str::to_string),
                    user_id: None,
                    price_id: None,
                    status: "canceled".to_string(),
                    current_period_start: None,
                    current_period_end: None,
                    cancel_at_period_end: false,
                    canceled_at: Some(canceled_at),
                });
            }
        }
        Ok(())
    }

    async fn find_subscription_by_external(
        &self,
        stripe_subscription_id: &str,
    ) -> PaymentsResult<Option<SubscriptionRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.subscriptions.get(stripe_subscription_id).cloned())
    }

    async fn record_webhook_event(
        &self,
        stripe_event_id: &str,
        event_type: &str,
        outcome: &str,
        error: Option<&str>,
    ) -> PaymentsResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .events
            .iter()
            .any(|e| e.stripe_event_id == stripe_event_id)
        {
            return Ok(());
        }
        tables.events.push(RecordedEvent {
            stripe_event_id: stripe_event_id.to_string(),
            event_type: event_type.to_string(),
            outcome: outcome.to_string(),
            error: error.map(str::to_string),
        });
        Ok(())
    }
}
