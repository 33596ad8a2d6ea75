use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::booking::{ContactInfo, GuestCount};
use crate::error::BookingError;
use crate::package::{PackageRef, PackageType};
use crate::slot::normalize_time_label;

/// Metadata keys written on the processor-side payment at checkout time.
pub mod keys {
    pub const PLATFORM: &str = "platform";
    pub const BOOKING_ID: &str = "booking_id";
    pub const PACKAGE_ID: &str = "package_id";
    pub const PACKAGE_TYPE: &str = "package_type";
    pub const DATE: &str = "date";
    pub const TIME: &str = "time";
    pub const ADULTS: &str = "adults";
    pub const CHILDREN: &str = "children";
    pub const EMAIL: &str = "email";
    pub const NAME: &str = "name";
    pub const PHONE: &str = "phone";
}

pub type PaymentMetadata = HashMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorPaymentStatus {
    Succeeded,
    Processing,
    RequiresAction,
    Failed,
    Canceled,
}

/// A payment as reported by the processor's pull API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorPayment {
    pub id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: ProcessorPaymentStatus,
    pub metadata: PaymentMetadata,
    pub created_at: DateTime<Utc>,
}

impl ProcessorPayment {
    pub fn platform(&self) -> Option<&str> {
        self.metadata.get(keys::PLATFORM).map(String::as_str)
    }
}

/// Payment-processor pull API used by orphan scans and recovery.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn list_succeeded_payments(
        &self,
        limit: usize,
    ) -> Result<Vec<ProcessorPayment>, Box<dyn std::error::Error + Send + Sync>>;

    async fn get_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<ProcessorPayment>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Booking facts recovered from payment metadata when no booking exists.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingBlueprint {
    pub booking_id: Option<Uuid>,
    pub package: PackageRef,
    pub date: NaiveDate,
    pub time: String,
    pub guests: GuestCount,
    pub contact: ContactInfo,
}

impl BookingBlueprint {
    pub fn from_metadata(metadata: &PaymentMetadata) -> Result<Self, BookingError> {
        let get = |key: &str| -> Result<&str, BookingError> {
            metadata
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| BookingError::Validation(format!("payment metadata missing {}", key)))
        };

        let package_type = PackageType::from_str(get(keys::PACKAGE_TYPE)?).map_err(BookingError::Validation)?;
        let package_id = Uuid::parse_str(get(keys::PACKAGE_ID)?)
            .map_err(|e| BookingError::Validation(format!("invalid package_id: {}", e)))?;
        let date = NaiveDate::parse_from_str(get(keys::DATE)?, "%Y-%m-%d")
            .map_err(|e| BookingError::Validation(format!("invalid date: {}", e)))?;
        let time = normalize_time_label(get(keys::TIME)?)?;
        let adults = parse_count(get(keys::ADULTS)?, keys::ADULTS)?;
        let children = match metadata.get(keys::CHILDREN) {
            Some(v) if !v.trim().is_empty() => parse_count(v, keys::CHILDREN)?,
            _ => 0,
        };
        let guests = GuestCount::new(adults, children);
        if guests.total() == 0 {
            return Err(BookingError::Validation("payment metadata has no guests".to_string()));
        }

        let email = get(keys::EMAIL)?.to_string();
        let name = metadata
            .get(keys::NAME)
            .cloned()
            .unwrap_or_else(|| email.clone());
        let booking_id = match metadata.get(keys::BOOKING_ID) {
            Some(v) => Uuid::parse_str(v.trim()).ok(),
            None => None,
        };

        Ok(Self {
            booking_id,
            package: PackageRef::new(package_type, package_id),
            date,
            time,
            guests,
            contact: ContactInfo {
                name,
                email: email.into(),
                phone: metadata.get(keys::PHONE).cloned(),
            },
        })
    }
}

fn parse_count(value: &str, key: &str) -> Result<u32, BookingError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| BookingError::Validation(format!("invalid {}: {}", key, value)))
}
