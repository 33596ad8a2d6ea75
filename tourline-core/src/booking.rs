use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tourline_shared::Masked;
use uuid::Uuid;

use crate::package::PackageRef;
use crate::slot::SlotKey;

/// Booking lifecycle status.
///
/// `pending → confirmed → completed`, and `pending | confirmed → cancelled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }

    /// Active bookings hold (or are entitled to hold) slot capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            other => Err(format!("unknown booking status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "processing" => Ok(PaymentStatus::Processing),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Where a booking record came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingSource {
    Direct,
    Admin,
    Cart,
    Reconstructed,
}

impl BookingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingSource::Direct => "direct",
            BookingSource::Admin => "admin",
            BookingSource::Cart => "cart",
            BookingSource::Reconstructed => "reconstructed",
        }
    }
}

impl FromStr for BookingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(BookingSource::Direct),
            "admin" => Ok(BookingSource::Admin),
            "cart" => Ok(BookingSource::Cart),
            "reconstructed" => Ok(BookingSource::Reconstructed),
            other => Err(format!("unknown booking source: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GuestCount {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
}

impl GuestCount {
    pub fn new(adults: u32, children: u32) -> Self {
        Self { adults, children }
    }

    pub fn total(&self) -> u32 {
        self.adults + self.children
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Option<String>,
}

/// Payment sub-record held on every booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentRecord {
    pub processor_payment_id: Option<String>,
    pub session_id: Option<String>,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub failure_reason: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl PaymentRecord {
    pub fn pending(amount_cents: i64, currency: impl Into<String>) -> Self {
        Self {
            processor_payment_id: None,
            session_id: None,
            status: PaymentStatus::Pending,
            amount_cents,
            currency: currency.into(),
            failure_reason: None,
            reconciled_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub package: PackageRef,
    pub date: NaiveDate,
    pub time: String,
    pub guests: GuestCount,
    /// Capacity units this booking consumes on its slot.
    pub occupancy: u32,
    pub contact: ContactInfo,
    pub payment: PaymentRecord,
    pub status: BookingStatus,
    pub source: BookingSource,
    /// Whether `occupancy` is currently counted in the slot's booked-count.
    pub capacity_committed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey::new(self.package, self.date)
    }

    /// Update booking status at `at`, refusing transitions the lifecycle forbids.
    pub fn transition(&mut self, next: BookingStatus, at: DateTime<Utc>) -> Result<(), crate::BookingError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(crate::BookingError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}

/// Fields stamped on a booking when its payment is reconciled as succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSuccess {
    pub payment_id: String,
    pub session_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub reconciled_at: DateTime<Utc>,
}
