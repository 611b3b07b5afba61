//! Application state.

use std::sync::Arc;

use atelier_payments::PaymentsService;
use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::config::Config;

/// Shared application state. All collaborators are constructed here and
/// injected explicitly; nothing is built at module load.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub payments: Arc<PaymentsService>,
    pub jwt: JwtManager,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let payments = PaymentsService::from_env(pool.clone())
            .map_err(|e| anyhow::anyhow!("failed to initialize payments service: {e}"))?;
        tracing::info!("Stripe payments service initialized");

        let jwt = JwtManager::new(&config.jwt_secret);

        Ok(Self {
            pool,
            config,
            payments: Arc::new(payments),
            jwt,
        })
    }
}
