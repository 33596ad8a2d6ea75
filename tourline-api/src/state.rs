use std::sync::Arc;

use tourline_booking::{BookingLedger, BookingServices, CartCheckout, JobRunner, ReconciliationPipeline};
use tourline_store::RedisClient;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct RateLimit {
    pub redis: Arc<RedisClient>,
    pub per_minute: i64,
}

#[derive(Clone)]
pub struct AppState {
    pub services: BookingServices,
    /// Public routes are unlimited when Redis is not configured.
    pub rate_limit: Option<RateLimit>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn ledger(&self) -> BookingLedger {
        BookingLedger::new(self.services.clone())
    }

    pub fn reconciliation(&self) -> ReconciliationPipeline {
        ReconciliationPipeline::new(self.services.clone())
    }

    pub fn checkout(&self) -> CartCheckout {
        CartCheckout::new(self.services.clone())
    }

    pub fn jobs(&self) -> JobRunner {
        JobRunner::new(self.services.clone())
    }
}
