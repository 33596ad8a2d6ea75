use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tourline_shared::models::events::{BookingCancelledEvent, BookingConfirmedEvent};
use tourline_shared::Masked;
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus, GuestCount};
use crate::package::{PackageRef, PickupDefaults};

/// Everything the external mailer needs to render a confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingSummary {
    pub booking_id: Uuid,
    pub package: PackageRef,
    pub package_name: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub guests: GuestCount,
    pub contact_name: String,
    pub contact_email: Masked<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub pickup: Option<PickupDefaults>,
}

impl BookingSummary {
    pub fn from_booking(
        booking: &Booking,
        package_name: Option<String>,
        pickup: Option<PickupDefaults>,
    ) -> Self {
        Self {
            booking_id: booking.id,
            package: booking.package,
            package_name,
            date: booking.date,
            time: booking.time.clone(),
            guests: booking.guests,
            contact_name: booking.contact.name.clone(),
            contact_email: booking.contact.email.clone(),
            amount_cents: booking.payment.amount_cents,
            currency: booking.payment.currency.clone(),
            status: booking.status,
            pickup,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Confirmation delivery failed: {0}")]
    Delivery(String),
}

/// Email collaborator. Callers treat every failure as non-fatal.
#[async_trait]
pub trait ConfirmationMailer: Send + Sync {
    async fn send_booking_confirmation(&self, summary: &BookingSummary) -> Result<(), NotifyError>;
}

/// Mailer that only logs; used when no bus is configured.
pub struct LogOnlyMailer;

#[async_trait]
impl ConfirmationMailer for LogOnlyMailer {
    async fn send_booking_confirmation(&self, summary: &BookingSummary) -> Result<(), NotifyError> {
        tracing::info!(
            "Confirmation for booking {} ({} {}) not dispatched: no mail transport configured",
            summary.booking_id,
            summary.date,
            summary.time
        );
        Ok(())
    }
}

/// Bus for booking lifecycle events. Publishing is best-effort.
#[async_trait]
pub trait BookingEventSink: Send + Sync {
    async fn booking_confirmed(&self, event: &BookingConfirmedEvent) -> Result<(), NotifyError>;

    async fn booking_cancelled(&self, event: &BookingCancelledEvent) -> Result<(), NotifyError>;
}

pub struct NoopEventSink;

#[async_trait]
impl BookingEventSink for NoopEventSink {
    async fn booking_confirmed(&self, _event: &BookingConfirmedEvent) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn booking_cancelled(&self, _event: &BookingCancelledEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}
