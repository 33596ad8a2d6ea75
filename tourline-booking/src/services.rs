use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use tourline_catalog::{AvailabilityEngine, SlotMutator};
use tourline_core::identity::CustomerDirectory;
use tourline_core::notify::{BookingEventSink, BookingSummary, ConfirmationMailer, NotifyError};
use tourline_core::payment::PaymentProcessor;
use tourline_core::repository::{BlackoutRegistry, BookingRepository, CartRepository, PackageCatalog, SlotRepository};
use tourline_core::retry::RetryPolicy;
use tourline_core::{Booking, BookingSettings, Clock};
use tourline_shared::models::events::{BookingCancelledEvent, BookingConfirmedEvent, ConfirmationPath};

/// Collaborators shared by the ledger, the reconciliation pipeline, cart
/// checkout and the scheduled jobs.
#[derive(Clone)]
pub struct BookingServices {
    pub slots: Arc<dyn SlotRepository>,
    pub bookings: Arc<dyn BookingRepository>,
    pub catalog: Arc<dyn PackageCatalog>,
    pub blackouts: Arc<dyn BlackoutRegistry>,
    pub customers: Arc<dyn CustomerDirectory>,
    pub carts: Arc<dyn CartRepository>,
    pub processor: Arc<dyn PaymentProcessor>,
    pub mailer: Arc<dyn ConfirmationMailer>,
    pub events: Arc<dyn BookingEventSink>,
    pub clock: Arc<dyn Clock>,
    pub settings: BookingSettings,
}

impl BookingServices {
    pub fn availability(&self) -> AvailabilityEngine {
        AvailabilityEngine::new(
            self.slots.clone(),
            self.blackouts.clone(),
            self.clock.clone(),
            self.settings.calendar,
        )
    }

    pub fn mutator(&self) -> SlotMutator {
        SlotMutator::new(self.slots.clone())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.settings.max_store_retries,
            Duration::from_millis(self.settings.initial_backoff_ms),
        )
    }

    pub(crate) async fn send_confirmation(&self, booking: &Booking) -> Result<(), NotifyError> {
        let package = match self.catalog.get_package(&booking.package).await {
            Ok(package) => package,
            Err(e) => {
                warn!("Package lookup for confirmation of {} failed: {}", booking.id, e);
                None
            }
        };
        let summary = BookingSummary::from_booking(
            booking,
            package.as_ref().map(|p| p.name.clone()),
            package.and_then(|p| p.pickup),
        );
        self.mailer.send_booking_confirmation(&summary).await
    }

    /// Email is fire-and-forget: failures are logged, never returned.
    pub(crate) async fn confirm_best_effort(&self, booking: &Booking) {
        if let Err(e) = self.send_confirmation(booking).await {
            warn!("Confirmation email for booking {} not sent: {}", booking.id, e);
        }
    }

    pub(crate) async fn publish_confirmed(&self, booking: &Booking, path: ConfirmationPath) {
        let event = BookingConfirmedEvent {
            booking_id: booking.id,
            package_type: booking.package.package_type.to_string(),
            package_id: booking.package.package_id,
            date: booking.date,
            time: booking.time.clone(),
            occupancy: booking.occupancy,
            payment_id: booking.payment.processor_payment_id.clone(),
            path,
            timestamp: self.clock.now().timestamp(),
        };
        if let Err(e) = self.events.booking_confirmed(&event).await {
            warn!("booking.confirmed for {} not published: {}", booking.id, e);
        }
    }

    pub(crate) async fn publish_cancelled(&self, booking: &Booking, reason: &str, capacity_released: bool) {
        let event = BookingCancelledEvent {
            booking_id: booking.id,
            payment_id: booking.payment.processor_payment_id.clone(),
            reason: reason.to_string(),
            capacity_released,
            timestamp: self.clock.now().timestamp(),
        };
        if let Err(e) = self.events.booking_cancelled(&event).await {
            warn!("booking.cancelled for {} not published: {}", booking.id, e);
        }
    }
}
