//! Webhook ingestion: verification, dispatch, and the per-event handlers.
//!
//! [`WebhookHandler::process`] is the single canonical entry point: raw body
//! bytes plus the signature header in, acknowledgement out. Hosting
//! transports are thin adapters over it.
//!
//! Dispatch policy, in order:
//! - missing signing secret: configuration error, the caller answers 500;
//! - missing/invalid signature: rejected, nothing applied, 400;
//! - unparseable body: rejected, 400;
//! - unknown event type: acknowledged and logged, never an error (the
//!   processor retries non-2xx indefinitely);
//! - handler failure: caught here, logged with event context, and
//!   acknowledged with an error flag. Handlers are idempotent, so a dropped
//!   event is recoverable by an out-of-band backfill rather than redelivery.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeConfig;
use crate::error::{PaymentsError, PaymentsResult};
use crate::event::{
    CheckoutSessionObject, EventKind, InvoiceObject, PaymentIntentObject, SubscriptionObject,
    WebhookEvent,
};
use crate::signature::verify_signature;
use crate::store::{
    PaymentKey, PaymentStatus, PaymentUpsert, ReconciliationStore, SubscriptionUpsert,
};

/// Outcome of one delivery, reported back in the acknowledgement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    /// A handler ran and its writes were applied.
    Processed,
    /// Event type has no handler; acknowledged so it is not redelivered.
    Ignored,
    /// A handler failed; delivery is still acknowledged.
    Error,
}

impl AckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AckOutcome::Processed => "processed",
            AckOutcome::Ignored => "ignored",
            AckOutcome::Error => "error",
        }
    }
}

/// Acknowledgement returned for every verified, parseable delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    pub event_type: String,
    pub outcome: AckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Webhook handler: verifies, decodes, and reconciles processor events.
pub struct WebhookHandler {
    store: Arc<dyn ReconciliationStore>,
    webhook_secret: Option<String>,
    signature_tolerance_secs: i64,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn ReconciliationStore>, config: &StripeConfig) -> Self {
        Self {
            store,
            webhook_secret: config.webhook_secret.clone(),
            signature_tolerance_secs: config.signature_tolerance_secs,
        }
    }

    /// Verify and reconcile one delivery.
    ///
    /// `payload` must be the unparsed request bytes; any re-serialization
    /// upstream invalidates the signature. Errors returned here are the
    /// reject cases (signature, configuration, malformed body); handler
    /// failures are folded into the `Ok` acknowledgement.
    pub async fn process(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> PaymentsResult<WebhookAck> {
        let secret = self.webhook_secret.as_deref().ok_or_else(|| {
            tracing::error!(
                "webhook delivery received but STRIPE_WEBHOOK_SECRET is not configured"
            );
            PaymentsError::MissingWebhookSecret
        })?;

        let signature = signature.ok_or_else(|| {
            tracing::warn!("webhook delivery missing signature header");
            PaymentsError::SignatureInvalid
        })?;

        verify_signature(
            payload,
            signature,
            secret,
            self.signature_tolerance_secs,
            OffsetDateTime::now_utc().unix_timestamp(),
        )?;

        let event = WebhookEvent::from_payload(payload)?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            livemode = event.livemode,
            "Processing webhook event"
        );

        let ack = self.dispatch(&event).await;

        // Audit trail only; reconciliation state is already durable.
        if let Err(e) = self
            .store
            .record_webhook_event(
                &event.id,
                &event.event_type,
                ack.outcome.as_str(),
                ack.error.as_deref(),
            )
            .await
        {
            tracing::warn!(event_id = %event.id, error = %e, "Failed to record webhook event");
        }

        Ok(ack)
    }

    /// Route one decoded event to its handler and fold the result into an
    /// acknowledgement.
    pub async fn dispatch(&self, event: &WebhookEvent) -> WebhookAck {
        let result = match event.kind() {
            EventKind::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::PaymentIntentSucceeded => {
                self.handle_payment_succeeded(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::PaymentIntentFailed => {
                self.handle_payment_failed(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                self.handle_subscription_sync(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::SubscriptionDeleted => {
                self.handle_subscription_deleted(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::InvoicePaid => {
                self.handle_invoice_paid(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event).await.map(|_| AckOutcome::Processed)
            }
            EventKind::Unhandled => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Received unhandled event type - acknowledging without processing"
                );
                Ok(AckOutcome::Ignored)
            }
        };

        match result {
            Ok(outcome) => WebhookAck {
                received: true,
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                outcome,
                error: None,
            },
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "Webhook handler failed - acknowledging delivery anyway"
                );
                WebhookAck {
                    received: true,
                    event_id: event.id.clone(),
                    event_type: event.event_type.clone(),
                    outcome: AckOutcome::Error,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Internal user id for an event: correlation metadata first (stamped at
    /// checkout time), customer link second. `None` is a valid answer -
    /// guest checkouts have no user.
    async fn resolve_user(
        &self,
        metadata_user_id: Option<&str>,
        stripe_customer_id: Option<&str>,
    ) -> PaymentsResult<Option<Uuid>> {
        if let Some(raw) = metadata_user_id {
            match raw.parse::<Uuid>() {
                Ok(id) => return Ok(Some(id)),
                Err(_) => {
                    tracing::warn!(user_id = %raw, "Ignoring unparseable user_id metadata");
                }
            }
        }

        match stripe_customer_id {
            Some(customer_id) => Ok(self
                .store
                .find_customer_link(customer_id)
                .await?
                .map(|link| link.user_id)),
            None => Ok(None),
        }
    }

    async fn handle_checkout_completed(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let session: CheckoutSessionObject = event.object()?;

        if session.mode == "subscription" {
            // The subscription.created event is authoritative for the new
            // subscription; nothing to write here.
            tracing::info!(
                session_id = %session.id,
                subscription_id = ?session.subscription,
                "Subscription checkout completed - deferring to subscription events"
            );
            return Ok(());
        }

        let Some(intent_id) = session.payment_intent.as_deref() else {
            tracing::info!(session_id = %session.id, "Checkout session has no payment intent");
            return Ok(());
        };

        let buyer_email = session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone());
        let correlation = serde_json::json!({
            "checkout_session_id": session.id,
            "buyer_email": buyer_email,
        });

        let updated = self
            .store
            .mark_payment_succeeded_by_intent(intent_id, correlation)
            .await?;

        if updated {
            tracing::info!(
                session_id = %session.id,
                payment_intent_id = %intent_id,
                "Checkout completed - payment marked succeeded"
            );
        } else {
            // Arrival order is not guaranteed; payment_intent.succeeded will
            // create the row and carries the same terminal state.
            tracing::debug!(
                session_id = %session.id,
                payment_intent_id = %intent_id,
                "Checkout completed before payment row exists - nothing to update"
            );
        }

        Ok(())
    }

    async fn handle_payment_succeeded(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let intent: PaymentIntentObject = event.object()?;

        let user_id = self
            .resolve_user(
                intent.metadata.get("user_id").map(String::as_str),
                intent.customer.as_deref(),
            )
            .await?;

        let mut metadata = serde_json::Map::new();
        for (k, v) in &intent.metadata {
            metadata.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
        if let Some(email) = &intent.receipt_email {
            metadata.insert(
                "receipt_email".to_string(),
                serde_json::Value::String(email.clone()),
            );
        }

        self.store
            .upsert_payment(PaymentUpsert {
                key: PaymentKey::Intent(intent.id.clone()),
                stripe_customer_id: intent.customer.clone(),
                user_id,
                subscription_id: None,
                amount: intent.amount,
                currency: intent.currency.clone(),
                status: PaymentStatus::Succeeded,
                payment_method: intent.payment_method_types.first().cloned(),
                metadata: serde_json::Value::Object(metadata),
            })
            .await?;

        tracing::info!(
            payment_intent_id = %intent.id,
            amount = intent.amount,
            currency = %intent.currency,
            user_id = ?user_id,
            "Payment succeeded"
        );

        Ok(())
    }

    async fn handle_payment_failed(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let intent: PaymentIntentObject = event.object()?;

        let user_id = self
            .resolve_user(
                intent.metadata.get("user_id").map(String::as_str),
                intent.customer.as_deref(),
            )
            .await?;

        let (failure_code, failure_message) = intent
            .last_payment_error
            .as_ref()
            .map(|e| (e.code.clone(), e.message.clone()))
            .unwrap_or((None, None));

        let metadata = serde_json::json!({
            "failure_code": failure_code,
            "failure_message": failure_message,
        });

        self.store
            .upsert_payment(PaymentUpsert {
                key: PaymentKey::Intent(intent.id.clone()),
                stripe_customer_id: intent.customer.clone(),
                user_id,
                subscription_id: None,
                amount: intent.amount,
                currency: intent.currency.clone(),
                status: PaymentStatus::Failed,
                payment_method: intent.payment_method_types.first().cloned(),
                metadata,
            })
            .await?;

        tracing::warn!(
            payment_intent_id = %intent.id,
            amount = intent.amount,
            failure = ?failure_message,
            "Payment failed"
        );

        Ok(())
    }

    /// Shared by subscription.created and subscription.updated: both write
    /// the full subscription state, last delivered wins. An update for an id
    /// never seen before creates the row - the update payload carries every
    /// field a row needs, and dropping it could lose the only notification
    /// we ever get.
    async fn handle_subscription_sync(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let subscription: SubscriptionObject = event.object()?;

        let user_id = self
            .resolve_user(
                subscription.metadata.get("user_id").map(String::as_str),
                subscription.customer.as_deref(),
            )
            .await?;

        // A price the catalog mirror does not carry yet must not block
        // recording the subscription.
        let price_id = match subscription.price_id() {
            Some(external_price_id) => {
                let price = self.store.find_price_by_external(external_price_id).await?;
                if price.is_none() {
                    tracing::warn!(
                        subscription_id = %subscription.id,
                        stripe_price_id = %external_price_id,
                        "Price not in local catalog - recording subscription without price link"
                    );
                }
                price.map(|p| p.id)
            }
            None => None,
        };

        self.store
            .upsert_subscription(SubscriptionUpsert {
                stripe_subscription_id: subscription.id.clone(),
                stripe_customer_id: subscription.customer.clone(),
                user_id,
                price_id,
                status: subscription.status.clone(),
                current_period_start: subscription
                    .current_period_start
                    .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
                current_period_end: subscription
                    .current_period_end
                    .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
                cancel_at_period_end: subscription.cancel_at_period_end,
                canceled_at: subscription
                    .canceled_at
                    .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok()),
            })
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            status = %subscription.status,
            user_id = ?user_id,
            "Subscription synced"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let subscription: SubscriptionObject = event.object()?;

        let canceled_at = subscription
            .canceled_at
            .and_then(|t| OffsetDateTime::from_unix_timestamp(t).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        self.store
            .cancel_subscription(
                &subscription.id,
                subscription.customer.as_deref(),
                canceled_at,
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            canceled_at = %canceled_at,
            "Subscription canceled"
        );

        Ok(())
    }

    async fn handle_invoice_paid(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let invoice: InvoiceObject = event.object()?;

        let Some(subscription_id) = invoice.subscription.as_deref() else {
            tracing::info!(invoice_id = %invoice.id, "Invoice has no subscription - skipping");
            return Ok(());
        };

        let Some(subscription) = self
            .store
            .find_subscription_by_external(subscription_id)
            .await?
        else {
            // Known gap: the invoice raced ahead of subscription.created.
            // Recorded in the audit log; an out-of-band backfill is the
            // recovery path.
            tracing::warn!(
                invoice_id = %invoice.id,
                subscription_id = %subscription_id,
                "Invoice paid for unknown subscription - skipping"
            );
            return Ok(());
        };

        let user_id = match subscription.user_id {
            Some(id) => Some(id),
            None => {
                self.resolve_user(None, invoice.customer.as_deref())
                    .await?
            }
        };

        let metadata = serde_json::json!({
            "billing_reason": invoice.billing_reason,
            "hosted_invoice_url": invoice.hosted_invoice_url,
        });

        self.store
            .upsert_payment(PaymentUpsert {
                key: PaymentKey::Invoice(invoice.id.clone()),
                stripe_customer_id: invoice.customer.clone(),
                user_id,
                subscription_id: Some(subscription.id),
                amount: invoice.amount_paid,
                currency: invoice.currency.clone().unwrap_or_else(|| "usd".to_string()),
                status: PaymentStatus::Succeeded,
                payment_method: None,
                metadata,
            })
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            subscription_id = %subscription_id,
            amount = invoice.amount_paid,
            "Invoice paid"
        );

        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, event: &WebhookEvent) -> PaymentsResult<()> {
        let invoice: InvoiceObject = event.object()?;

        let metadata = serde_json::json!({
            "billing_reason": invoice.billing_reason,
            "amount_due": invoice.amount_due,
        });

        let updated = self
            .store
            .mark_payment_failed_by_invoice(&invoice.id, metadata)
            .await?;

        if updated {
            tracing::warn!(
                invoice_id = %invoice.id,
                amount_due = invoice.amount_due,
                "Invoice payment failed"
            );
        } else {
            tracing::debug!(
                invoice_id = %invoice.id,
                "Invoice payment failed for unknown invoice - nothing to update"
            );
        }

        Ok(())
    }
}
