//! Customer link resolution and lazy creation.

use std::collections::HashMap;
use std::sync::Arc;

use stripe::{CreateCustomer, Customer};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::PaymentsResult;
use crate::store::{CustomerLink, ReconciliationStore};

/// Resolves internal users to processor customers, creating the mapping on
/// first sight.
#[derive(Clone)]
pub struct CustomerService {
    stripe: StripeClient,
    store: Arc<dyn ReconciliationStore>,
}

impl CustomerService {
    pub fn new(stripe: StripeClient, store: Arc<dyn ReconciliationStore>) -> Self {
        Self { stripe, store }
    }

    /// Return the user's customer link, creating the Stripe customer and the
    /// link row if none exists yet.
    ///
    /// The link write is a conflict-safe upsert: two concurrent callers
    /// discovering the same new user both succeed and leave one row. At
    /// worst an orphaned Stripe customer is created on the losing side,
    /// which is harmless.
    pub async fn get_or_create_customer(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        name: Option<&str>,
    ) -> PaymentsResult<CustomerLink> {
        if let Some(link) = self.store.find_customer_link_for_user(user_id).await? {
            return Ok(link);
        }

        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());

        let customer = Customer::create(
            self.stripe.inner(),
            CreateCustomer {
                email,
                name,
                metadata: Some(metadata),
                ..Default::default()
            },
        )
        .await?;

        let link = CustomerLink {
            user_id,
            stripe_customer_id: customer.id.to_string(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
        };
        self.store.upsert_customer_link(link.clone()).await?;

        tracing::info!(
            user_id = %user_id,
            stripe_customer_id = %link.stripe_customer_id,
            "Created Stripe customer for user"
        );

        Ok(link)
    }
}
