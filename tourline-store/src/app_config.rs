use serde::Deserialize;
use std::env;
use tourline_core::{BookingError, BookingSettings, BusinessCalendar};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    pub payment_processor: PaymentProcessorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    /// IANA zone every slot date and time label is interpreted in.
    pub timezone: String,
    #[serde(default = "default_lead_time")]
    pub public_lead_time_hours: u32,
    pub processing_fee_percent: f64,
    #[serde(default = "default_horizon")]
    pub slot_horizon_days: u32,
    pub platform_tag: String,
    pub currency: String,
}

fn default_lead_time() -> u32 { 12 }
fn default_horizon() -> u32 { 90 }

#[derive(Debug, Deserialize, Clone)]
pub struct ReconciliationConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub orphan_scan_limit: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            orphan_scan_limit: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentProcessorConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub horizon_interval_secs: u64,
    pub completion_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon_interval_secs: 86_400,
            completion_interval_secs: 3_600,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub max_connections: u32,
}

fn default_pool_size() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 { 120 }

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // untracked developer overrides
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. TOURLINE__DATABASE__URL
            .add_source(config::Environment::with_prefix("TOURLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Domain settings handed to the booking crates.
    pub fn booking_settings(&self) -> Result<BookingSettings, BookingError> {
        let rules = &self.business_rules;
        Ok(BookingSettings {
            calendar: BusinessCalendar::from_name(&rules.timezone)?,
            public_lead_time_hours: rules.public_lead_time_hours,
            processing_fee_percent: rules.processing_fee_percent,
            slot_horizon_days: rules.slot_horizon_days,
            platform_tag: rules.platform_tag.clone(),
            currency: rules.currency.clone(),
            max_store_retries: self.reconciliation.max_retries,
            initial_backoff_ms: self.reconciliation.initial_backoff_ms,
            orphan_scan_limit: self.reconciliation.orphan_scan_limit,
        })
    }
}
