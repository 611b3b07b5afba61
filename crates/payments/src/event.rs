//! Typed webhook event envelope.
//!
//! The processor delivers a JSON envelope with a string type tag and an
//! `data.object` payload whose shape depends on the tag. The envelope is
//! parsed once; the payload stays a raw `Value` until a handler claims it,
//! so an unknown or unhandled type never fails parsing.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{PaymentsError, PaymentsResult};

/// A verified, decoded webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the processor created the event.
    pub created: i64,
    #[serde(default)]
    pub livemode: bool,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl WebhookEvent {
    /// Decode the raw (already signature-verified) body.
    pub fn from_payload(payload: &[u8]) -> PaymentsResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| PaymentsError::MalformedPayload(e.to_string()))
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_type(&self.event_type)
    }

    /// Deserialize `data.object` into the payload type a handler expects.
    pub fn object<T: serde::de::DeserializeOwned>(&self) -> PaymentsResult<T> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            PaymentsError::MalformedPayload(format!(
                "event {} ({}) payload: {}",
                self.id, self.event_type, e
            ))
        })
    }
}

/// Dispatch tag, matched exactly against the processor's type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckoutSessionCompleted,
    PaymentIntentSucceeded,
    PaymentIntentFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
    /// Anything else. Not an error: logged and acknowledged so the processor
    /// does not redeliver event types we intentionally ignore.
    Unhandled,
}

impl EventKind {
    pub fn from_type(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => Self::CheckoutSessionCompleted,
            "payment_intent.succeeded" => Self::PaymentIntentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentIntentFailed,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.paid" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            _ => Self::Unhandled,
        }
    }
}

/// `checkout.session` payload, reconciliation slice.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    /// `payment` or `subscription`.
    pub mode: String,
    pub payment_intent: Option<String>,
    pub subscription: Option<String>,
    pub customer: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// `payment_intent` payload, reconciliation slice.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: Option<String>,
    pub customer: Option<String>,
    pub receipt_email: Option<String>,
    #[serde(default)]
    pub payment_method_types: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub last_payment_error: Option<PaymentError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentError {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// `invoice` payload, reconciliation slice.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    pub customer: Option<String>,
    pub subscription: Option<String>,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub billing_reason: Option<String>,
    pub hosted_invoice_url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// `subscription` payload, reconciliation slice.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub items: SubscriptionItems,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Option<PriceRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceRef {
    pub id: String,
}

impl SubscriptionObject {
    /// External price id of the first subscription item, if any.
    pub fn price_id(&self) -> Option<&str> {
        self.items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .map(|p| p.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_payment_intent_event() {
        let payload = br#"{
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "created": 1700000000,
            "livemode": false,
            "data": {
                "object": {
                    "id": "pi_123",
                    "object": "payment_intent",
                    "amount": 5000,
                    "currency": "usd",
                    "status": "succeeded",
                    "customer": "cus_9",
                    "payment_method_types": ["card"],
                    "metadata": {"user_id": "5f64b1a2-8a4e-4c8e-9a7e-2f4b6d8c0e1a"}
                }
            }
        }"#;

        let event = WebhookEvent::from_payload(payload).unwrap();
        assert_eq!(event.kind(), EventKind::PaymentIntentSucceeded);

        let intent: PaymentIntentObject = event.object().unwrap();
        assert_eq!(intent.id, "pi_123");
        assert_eq!(intent.amount, 5000);
        assert_eq!(intent.currency, "usd");
        assert_eq!(intent.payment_method_types, vec!["card"]);
        assert_eq!(
            intent.metadata.get("user_id").map(String::as_str),
            Some("5f64b1a2-8a4e-4c8e-9a7e-2f4b6d8c0e1a")
        );
    }

    #[test]
    fn parses_subscription_event_with_price() {
        let payload = br#"{
            "id": "evt_2",
            "type": "customer.subscription.created",
            "created": 1700000000,
            "data": {
                "object": {
                    "id": "sub_42",
                    "object": "subscription",
                    "customer": "cus_9",
                    "status": "trialing",
                    "current_period_start": 1700000000,
                    "current_period_end": 1702592000,
                    "cancel_at_period_end": false,
                    "items": {"data": [{"price": {"id": "price_basic"}}]}
                }
            }
        }"#;

        let event = WebhookEvent::from_payload(payload).unwrap();
        assert_eq!(event.kind(), EventKind::SubscriptionCreated);

        let sub: SubscriptionObject = event.object().unwrap();
        assert_eq!(sub.id, "sub_42");
        assert_eq!(sub.status, "trialing");
        assert_eq!(sub.price_id(), Some("price_basic"));
    }

    #[test]
    fn unknown_type_maps_to_unhandled() {
        assert_eq!(
            EventKind::from_type("customer.tax_id.created"),
            EventKind::Unhandled
        );
        // Exact match only - prefixes and near-misses are unhandled too.
        assert_eq!(EventKind::from_type("invoice.paid.extra"), EventKind::Unhandled);
        assert_eq!(EventKind::from_type("invoice"), EventKind::Unhandled);
    }

    #[test]
    fn malformed_body_is_rejected() {
        let err = WebhookEvent::from_payload(b"{not json").unwrap_err();
        assert!(matches!(err, PaymentsError::MalformedPayload(_)));
    }

    #[test]
    fn envelope_without_type_is_rejected() {
        let err = WebhookEvent::from_payload(br#"{"id":"evt_1","data":{"object":{}}}"#)
            .unwrap_err();
        assert!(matches!(err, PaymentsError::MalformedPayload(_)));
    }
}
