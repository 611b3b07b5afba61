//! Stripe client wrapper and configuration.

use crate::error::{PaymentsError, PaymentsResult};

/// Default tolerance for the signature timestamp, matching Stripe's own
/// recommendation for replay protection.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe configuration, loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// API secret key (`sk_live_…` / `sk_test_…`).
    pub secret_key: String,
    /// Webhook signing secret (`whsec_…`). Optional at construction time so
    /// the server can boot without it, but its absence is a fatal
    /// configuration error on every webhook request, never a silent skip.
    pub webhook_secret: Option<String>,
    /// Clock-skew window for signature timestamps, in seconds.
    pub signature_tolerance_secs: i64,
}

impl StripeConfig {
    /// Load from `STRIPE_SECRET_KEY` / `STRIPE_WEBHOOK_SECRET`.
    pub fn from_env() -> PaymentsResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| PaymentsError::Internal("STRIPE_SECRET_KEY is not set".to_string()))?;

        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        if webhook_secret.is_none() {
            tracing::error!(
                "STRIPE_WEBHOOK_SECRET is not set - webhook deliveries will be rejected with a \
                 configuration error until it is configured"
            );
        }

        Ok(Self {
            secret_key,
            webhook_secret,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        })
    }
}

/// Cloneable handle around the async-stripe client plus our config.
///
/// Safe for concurrent use by many simultaneously-executing handlers; the
/// inner client is itself clone-and-share.
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self { inner, config }
    }

    pub fn from_env() -> PaymentsResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The underlying async-stripe client, for API calls.
    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
