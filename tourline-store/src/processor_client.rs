//! Pull-API client for a Stripe-style payment processor.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use tourline_core::payment::{PaymentMetadata, PaymentProcessor, ProcessorPayment, ProcessorPaymentStatus};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The processor caps list pages at this size.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Clone, Debug)]
pub struct HttpPaymentProcessor {
    http_client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProcessor {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntentList {
    data: Vec<PaymentIntent>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    metadata: PaymentMetadata,
    created: i64,
}

fn map_status(status: &str) -> ProcessorPaymentStatus {
    match status {
        "succeeded" => ProcessorPaymentStatus::Succeeded,
        "processing" => ProcessorPaymentStatus::Processing,
        "requires_action" | "requires_confirmation" | "requires_payment_method" | "requires_capture" => {
            ProcessorPaymentStatus::RequiresAction
        }
        "canceled" => ProcessorPaymentStatus::Canceled,
        _ => ProcessorPaymentStatus::Failed,
    }
}

impl From<PaymentIntent> for ProcessorPayment {
    fn from(intent: PaymentIntent) -> Self {
        let created_at: DateTime<Utc> = Utc
            .timestamp_opt(intent.created, 0)
            .single()
            .unwrap_or_else(Utc::now);
        ProcessorPayment {
            id: intent.id,
            amount_cents: intent.amount,
            currency: intent.currency.to_uppercase(),
            status: map_status(&intent.status),
            metadata: intent.metadata,
            created_at,
        }
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    async fn list_succeeded_payments(&self, limit: usize) -> Result<Vec<ProcessorPayment>, BoxError> {
        let page_size = limit.clamp(1, MAX_PAGE_SIZE);
        let list: PaymentIntentList = self
            .http_client
            .get(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.api_key)
            .query(&[("limit", page_size.to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("Processor returned {} payment intents", list.data.len());
        Ok(list
            .data
            .into_iter()
            .map(ProcessorPayment::from)
            .filter(|p| p.status == ProcessorPaymentStatus::Succeeded)
            .take(limit)
            .collect())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<ProcessorPayment>, BoxError> {
        let response = self
            .http_client
            .get(format!("{}/v1/payment_intents/{}", self.base_url, payment_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let intent: PaymentIntent = response.error_for_status()?.json().await?;
        Ok(Some(intent.into()))
    }
}
