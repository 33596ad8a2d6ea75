use tracing::{info, warn};
use uuid::Uuid;

use tourline_catalog::AvailabilityQuery;
use tourline_core::booking::PaymentSuccess;
use tourline_core::package::occupancy_units;
use tourline_core::slot::normalize_time_label;
use tourline_core::{
    Booking, BookingError, BookingResult, BookingSource, BookingStatus, ContactInfo, CutoffPolicy, Direction,
    GuestCount, PackageRef, PaymentRecord, PaymentStatus,
};
use tourline_shared::models::events::ConfirmationPath;

use crate::services::BookingServices;

/// A booking requested directly, outside the cart and webhook paths.
#[derive(Debug, Clone)]
pub struct CreateBookingRequest {
    pub package: PackageRef,
    pub date: chrono::NaiveDate,
    pub time: String,
    pub guests: GuestCount,
    pub contact: ContactInfo,
    /// Persisted as-is; a `Succeeded` status creates the booking confirmed.
    pub payment: PaymentRecord,
    pub source: BookingSource,
    pub cutoff: CutoffPolicy,
}

/// Durable booking records and their lifecycle.
pub struct BookingLedger {
    services: BookingServices,
}

impl BookingLedger {
    pub fn new(services: BookingServices) -> Self {
        Self { services }
    }

    pub async fn get(&self, id: Uuid) -> BookingResult<Booking> {
        self.services
            .bookings
            .get(id)
            .await?
            .ok_or(BookingError::BookingNotFound(id))
    }

    /// Creates a booking and consumes its slot capacity.
    ///
    /// Availability is checked before anything is written. If persisting the
    /// record fails after the capacity was taken, the capacity is handed back.
    pub async fn create(&self, request: CreateBookingRequest) -> BookingResult<Booking> {
        let time = normalize_time_label(&request.time)?;
        if request.guests.total() == 0 {
            return Err(BookingError::Validation("a booking needs at least one guest".to_string()));
        }

        let package = self
            .services
            .catalog
            .get_package(&request.package)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| BookingError::PackageNotFound(request.package.to_string()))?;
        if request.guests.total() > package.max_person {
            return Err(BookingError::Validation(format!(
                "party of {} exceeds the package maximum of {}",
                request.guests.total(),
                package.max_person
            )));
        }

        let customer = self
            .services
            .customers
            .find_or_create(request.contact.email.expose(), Some(request.contact.name.as_str()))
            .await?;

        let query = AvailabilityQuery {
            package: request.package,
            date: request.date,
            time: time.clone(),
            guests: request.guests,
        };
        let availability = self.services.availability().require(&query, request.cutoff).await?;

        let mutator = self.services.mutator();
        let key = query.slot_key();
        mutator
            .update_booking(&key, &time, availability.requested_units, Direction::Add)
            .await?;

        let now = self.services.clock.now();
        let status = if request.payment.status == PaymentStatus::Succeeded {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };
        let booking = Booking {
            id: Uuid::new_v4(),
            customer_id: customer.id,
            package: request.package,
            date: request.date,
            time,
            guests: request.guests,
            occupancy: availability.requested_units,
            contact: request.contact,
            payment: request.payment,
            status,
            source: request.source,
            capacity_committed: true,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.services.bookings.insert(&booking).await {
            warn!("Insert of booking {} failed, releasing its capacity: {}", booking.id, e);
            if let Err(release) = mutator
                .update_booking(&key, &booking.time, booking.occupancy, Direction::Subtract)
                .await
            {
                warn!("Capacity release for unsaved booking {} failed: {}", booking.id, release);
            }
            return Err(e.into());
        }

        if let Err(e) = self.services.catalog.adjust_booking_counter(&booking.package, 1).await {
            warn!("Booking counter for {} not incremented: {}", booking.package, e);
        }
        info!(
            "Booking {} created ({}) for {} {} {}, {} units",
            booking.id, booking.status, booking.package, booking.date, booking.time, booking.occupancy
        );

        if booking.status == BookingStatus::Confirmed {
            self.services.publish_confirmed(&booking, ConfirmationPath::Direct).await;
            self.services.confirm_best_effort(&booking).await;
        }
        Ok(booking)
    }

    /// Changes the party size, growing or shrinking the slot contribution
    /// through the mutator before the record is touched.
    pub async fn update_guests(&self, id: Uuid, guests: GuestCount) -> BookingResult<Booking> {
        if guests.total() == 0 {
            return Err(BookingError::Validation("a booking needs at least one guest".to_string()));
        }
        let mut booking = self.get(id).await?;
        if !booking.status.is_active() {
            return Err(BookingError::InvalidTransition {
                from: booking.status.to_string(),
                to: "modified".to_string(),
            });
        }
        let package = self
            .services
            .catalog
            .get_package(&booking.package)
            .await?
            .ok_or_else(|| BookingError::PackageNotFound(booking.package.to_string()))?;
        if guests.total() > package.max_person {
            return Err(BookingError::Validation(format!(
                "party of {} exceeds the package maximum of {}",
                guests.total(),
                package.max_person
            )));
        }

        let new_units = occupancy_units(package.category, &guests);
        let mutator = self.services.mutator();
        let key = booking.slot_key();
        if booking.capacity_committed {
            mutator.resize(&key, &booking.time, booking.occupancy, new_units).await?;
        }

        let persisted = match self.services.bookings.update_guests(id, guests, new_units).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(BookingError::BookingNotFound(id)),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = persisted {
            if booking.capacity_committed {
                if let Err(undo) = mutator.resize(&key, &booking.time, new_units, booking.occupancy).await {
                    warn!("Reverting slot resize for booking {} failed: {}", id, undo);
                }
            }
            return Err(e);
        }

        info!("Booking {} guests {} -> {}", id, booking.guests.total(), guests.total());
        booking.guests = guests;
        booking.occupancy = new_units;
        booking.updated_at = self.services.clock.now();
        Ok(booking)
    }

    /// Marks the booking's payment as succeeded. Repeating the call is a no-op.
    pub async fn confirm_payment(&self, id: Uuid, success: PaymentSuccess) -> BookingResult<Booking> {
        match self.services.bookings.mark_payment_succeeded(id, &success).await? {
            Some(booking) => {
                self.services.publish_confirmed(&booking, ConfirmationPath::Direct).await;
                Ok(booking)
            }
            None => self.get(id).await,
        }
    }

    /// Cancels an active booking and releases the capacity it holds.
    pub async fn cancel(&self, id: Uuid, reason: &str) -> BookingResult<Booking> {
        let mut booking = self.get(id).await?;
        if booking.status == BookingStatus::Cancelled {
            return Ok(booking);
        }
        let from = booking.status;
        booking.transition(BookingStatus::Cancelled, self.services.clock.now())?;
        if !self.services.bookings.update_status(id, from, BookingStatus::Cancelled).await? {
            return Err(BookingError::InvalidTransition {
                from: from.to_string(),
                to: BookingStatus::Cancelled.to_string(),
            });
        }

        let released = booking.capacity_committed && self.release(&booking).await;
        if released {
            booking.capacity_committed = false;
        }
        self.services.publish_cancelled(&booking, reason, released).await;
        Ok(booking)
    }

    /// Removes a booking. The slot release is best-effort; the record is
    /// deleted even when it fails.
    pub async fn delete(&self, id: Uuid) -> BookingResult<()> {
        let booking = self.get(id).await?;
        if booking.capacity_committed {
            self.release(&booking).await;
        }
        if let Err(e) = self.services.catalog.adjust_booking_counter(&booking.package, -1).await {
            warn!("Booking counter for {} not decremented: {}", booking.package, e);
        }
        if !self.services.bookings.delete(id).await? {
            return Err(BookingError::BookingNotFound(id));
        }
        info!("Booking {} deleted", id);
        Ok(())
    }

    /// Subtracts the booking's units and clears its committed flag.
    /// Returns whether the slot was actually released.
    async fn release(&self, booking: &Booking) -> bool {
        let result = self
            .services
            .mutator()
            .update_booking(&booking.slot_key(), &booking.time, booking.occupancy, Direction::Subtract)
            .await;
        match result {
            Ok(_) => {
                if let Err(e) = self.services.bookings.set_capacity_committed(booking.id, false).await {
                    warn!("Booking {} released capacity but flag not cleared: {}", booking.id, e);
                }
                true
            }
            Err(e) => {
                warn!("Capacity release for booking {} failed: {}", booking.id, e);
                false
            }
        }
    }
}
