//! Payment reconciliation: webhook-driven confirmation and cancellation,
//! reconstruction of bookings from payment metadata, and orphan recovery.
//!
//! Every handler is safe to run more than once for the same payment. The
//! conditional payment transitions in the ledger and the unique payment id
//! decide which delivery wins; losers report `AlreadyReconciled`.
//!
//! Webhook bodies are never trusted on their own: each event is checked
//! against the processor's pull API, and the amount, currency and metadata
//! the processor reports are the ones applied.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use tracing::{error, info, warn};
use uuid::Uuid;

use tourline_core::booking::PaymentSuccess;
use tourline_core::payment::{keys, BookingBlueprint, PaymentMetadata, ProcessorPayment, ProcessorPaymentStatus};
use tourline_core::retry::retry_transient;
use tourline_core::{
    Booking, BookingError, BookingResult, BookingSource, BookingStatus, Direction, PaymentRecord, PaymentStatus,
    StoreError,
};
use tourline_shared::models::events::ConfirmationPath;

use crate::services::BookingServices;

#[derive(Debug, Clone)]
pub struct PaymentSucceeded {
    pub booking_id: Option<Uuid>,
    pub payment_id: String,
    pub session_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Clone)]
pub struct PaymentFailed {
    pub booking_id: Option<Uuid>,
    pub payment_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SuccessOutcome {
    Confirmed { booking: Booking },
    AlreadyReconciled { booking_id: Uuid },
    Reconstructed { booking: Booking, capacity_committed: bool },
    /// The collected amount differs from what the booking charges; left for an operator.
    AmountMismatch {
        booking_id: Uuid,
        expected_cents: i64,
        expected_currency: String,
        received_cents: i64,
        received_currency: String,
    },
    /// No booking and not enough metadata; left for orphan recovery.
    Unmatched { payment_id: String, problem: String },
    /// The processor does not vouch for the event.
    Unverified { payment_id: String, problem: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    Cancelled { booking_id: Uuid, capacity_released: bool },
    /// The payment already succeeded; a late failure event changes nothing.
    IgnoredAfterSuccess { booking_id: Uuid },
    AlreadyFinal { booking_id: Uuid },
    Unmatched { payment_id: String },
    Unverified { payment_id: String, problem: String },
}

/// Result of checking a payment id against the processor.
enum Verification {
    Trusted(ProcessorPayment),
    Rejected(String),
}

/// A processor-side successful payment with no reconciled booking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanedPayment {
    pub payment_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    /// Existing booking the payment points at, if any.
    pub booking_id: Option<Uuid>,
    pub recoverable: bool,
    pub problem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveredPayment {
    pub payment_id: String,
    pub booking_id: Uuid,
    pub capacity_committed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryIssue {
    pub payment_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchRecoveryReport {
    pub recovered: Vec<RecoveredPayment>,
    pub skipped: Vec<RecoveryIssue>,
    pub failed: Vec<RecoveryIssue>,
}

pub struct ReconciliationPipeline {
    services: BookingServices,
}

impl ReconciliationPipeline {
    pub fn new(services: BookingServices) -> Self {
        Self { services }
    }

    /// Applies a success event once the processor confirms the payment.
    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id))]
    pub async fn handle_payment_succeeded(&self, event: &PaymentSucceeded) -> BookingResult<SuccessOutcome> {
        let payment = match self.verify(&event.payment_id).await? {
            Verification::Trusted(payment) if payment.status == ProcessorPaymentStatus::Succeeded => payment,
            Verification::Trusted(payment) => {
                return Ok(self.unverified(
                    &event.payment_id,
                    format!("processor reports payment {} as {:?}", payment.id, payment.status),
                ))
            }
            Verification::Rejected(problem) => return Ok(self.unverified(&event.payment_id, problem)),
        };

        // the processor's copy wins; the event only contributes what the
        // processor cannot know, such as a checkout session reference
        let trusted = PaymentSucceeded {
            booking_id: linked_booking_id(&payment.metadata).or(event.booking_id),
            payment_id: payment.id,
            session_id: event.session_id.clone(),
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            metadata: payment.metadata,
        };
        self.apply_success(&trusted, ConfirmationPath::Webhook, ConfirmationPath::Reconstructed)
            .await
    }

    fn unverified(&self, payment_id: &str, problem: String) -> SuccessOutcome {
        warn!("Success event for payment {} not applied: {}", payment_id, problem);
        SuccessOutcome::Unverified {
            payment_id: payment_id.to_string(),
            problem,
        }
    }

    #[tracing::instrument(skip(self, event), fields(payment_id = %event.payment_id))]
    pub async fn handle_payment_failed(&self, event: &PaymentFailed) -> BookingResult<FailureOutcome> {
        let policy = self.services.retry_policy();
        let repo = &self.services.bookings;

        let payment = match self.verify(&event.payment_id).await? {
            Verification::Trusted(payment) => payment,
            Verification::Rejected(problem) => {
                warn!("Failure event for payment {} not applied: {}", event.payment_id, problem);
                return Ok(FailureOutcome::Unverified {
                    payment_id: event.payment_id.clone(),
                    problem,
                });
            }
        };
        let booking_id = linked_booking_id(&payment.metadata).or(event.booking_id);

        let booking = match self.locate(booking_id, &event.payment_id, None).await? {
            Some(booking) => booking,
            None => {
                warn!("Failed payment {} matches no booking", event.payment_id);
                return Ok(FailureOutcome::Unmatched {
                    payment_id: event.payment_id.clone(),
                });
            }
        };

        if booking.payment.status == PaymentStatus::Succeeded || payment.status == ProcessorPaymentStatus::Succeeded {
            warn!(
                "Ignoring failure for payment {}: booking {} already paid",
                event.payment_id, booking.id
            );
            return Ok(FailureOutcome::IgnoredAfterSuccess { booking_id: booking.id });
        }

        let updated = retry_transient(&policy, "mark payment failed", || {
            repo.mark_payment_failed(booking.id, Some(event.payment_id.as_str()), &event.reason)
        })
        .await?;
        let mut updated = match updated {
            Some(updated) => updated,
            None => {
                info!("Booking {} already final, failure for {} ignored", booking.id, event.payment_id);
                return Ok(FailureOutcome::AlreadyFinal { booking_id: booking.id });
            }
        };

        let capacity_released = updated.capacity_committed && self.release_capacity(&updated).await;
        if capacity_released {
            updated.capacity_committed = false;
        }
        info!(
            "Booking {} cancelled after failed payment {} ({}), capacity released: {}",
            updated.id, event.payment_id, event.reason, capacity_released
        );
        self.services
            .publish_cancelled(&updated, &event.reason, capacity_released)
            .await;

        Ok(FailureOutcome::Cancelled {
            booking_id: updated.id,
            capacity_released,
        })
    }

    /// Lists recent successful payments tagged for this platform that have
    /// no booking carrying them as paid.
    pub async fn scan_orphans(&self) -> BookingResult<Vec<OrphanedPayment>> {
        let policy = self.services.retry_policy();
        let repo = &self.services.bookings;
        let tag = self.services.settings.platform_tag.as_str();

        let payments = self
            .services
            .processor
            .list_succeeded_payments(self.services.settings.orphan_scan_limit)
            .await
            .map_err(|e| BookingError::Processor(e.to_string()))?;

        let mut orphans = Vec::new();
        for payment in payments {
            if payment.status != ProcessorPaymentStatus::Succeeded || payment.platform() != Some(tag) {
                continue;
            }
            let existing = retry_transient(&policy, "orphan lookup", || repo.find_by_payment_id(&payment.id)).await?;
            if matches!(&existing, Some(b) if b.payment.status == PaymentStatus::Succeeded) {
                continue;
            }

            let linked = match existing {
                Some(b) => Some(b),
                None => match linked_booking_id(&payment.metadata) {
                    Some(id) => retry_transient(&policy, "orphan link lookup", || repo.get(id))
                        .await?
                        .filter(|b| awaits_payment(b, &payment.id)),
                    None => None,
                },
            };
            let problem = match &linked {
                Some(b) if !charges(b, payment.amount_cents, &payment.currency) => Some(format!(
                    "booking {} charges {} {}, payment collected {} {}",
                    b.id, b.payment.amount_cents, b.payment.currency, payment.amount_cents, payment.currency
                )),
                Some(_) => None,
                None => BookingBlueprint::from_metadata(&payment.metadata)
                    .err()
                    .map(|e| e.to_string()),
            };

            orphans.push(OrphanedPayment {
                payment_id: payment.id,
                amount_cents: payment.amount_cents,
                currency: payment.currency,
                created_at: payment.created_at,
                booking_id: linked.map(|b| b.id),
                recoverable: problem.is_none(),
                problem,
            });
        }

        info!("Orphan scan found {} unreconciled payments", orphans.len());
        Ok(orphans)
    }

    /// Pulls one payment from the processor and reconciles it.
    #[tracing::instrument(skip(self))]
    pub async fn recover_payment(&self, payment_id: &str) -> BookingResult<SuccessOutcome> {
        let payment = match self.verify(payment_id).await? {
            Verification::Trusted(payment) => payment,
            Verification::Rejected(problem) => return Err(BookingError::Validation(problem)),
        };
        if payment.status != ProcessorPaymentStatus::Succeeded {
            return Err(BookingError::Validation(format!("payment {} has not succeeded", payment_id)));
        }

        let event = PaymentSucceeded {
            booking_id: linked_booking_id(&payment.metadata),
            payment_id: payment.id,
            session_id: None,
            amount_cents: payment.amount_cents,
            currency: payment.currency,
            metadata: payment.metadata,
        };
        self.apply_success(&event, ConfirmationPath::Recovered, ConfirmationPath::Recovered)
            .await
    }

    /// Recovers the given payments, or every current orphan when `None`.
    /// One payment's failure never stops the rest.
    pub async fn recover_batch(&self, payment_ids: Option<Vec<String>>) -> BookingResult<BatchRecoveryReport> {
        let ids = match payment_ids {
            Some(ids) => ids,
            None => self
                .scan_orphans()
                .await?
                .into_iter()
                .map(|orphan| orphan.payment_id)
                .collect(),
        };

        let mut report = BatchRecoveryReport::default();
        for payment_id in ids {
            match self.recover_payment(&payment_id).await {
                Ok(SuccessOutcome::Confirmed { booking }) => report.recovered.push(RecoveredPayment {
                    payment_id,
                    booking_id: booking.id,
                    capacity_committed: booking.capacity_committed,
                }),
                Ok(SuccessOutcome::Reconstructed {
                    booking,
                    capacity_committed,
                }) => report.recovered.push(RecoveredPayment {
                    payment_id,
                    booking_id: booking.id,
                    capacity_committed,
                }),
                Ok(SuccessOutcome::AlreadyReconciled { .. }) => report.skipped.push(RecoveryIssue {
                    payment_id,
                    reason: "already reconciled".to_string(),
                }),
                Ok(SuccessOutcome::AmountMismatch {
                    expected_cents,
                    expected_currency,
                    received_cents,
                    received_currency,
                    ..
                }) => report.skipped.push(RecoveryIssue {
                    payment_id,
                    reason: format!(
                        "amount mismatch: booking charges {} {}, payment collected {} {}",
                        expected_cents, expected_currency, received_cents, received_currency
                    ),
                }),
                Ok(SuccessOutcome::Unmatched { problem, .. }) | Ok(SuccessOutcome::Unverified { problem, .. }) => {
                    report.skipped.push(RecoveryIssue {
                        payment_id,
                        reason: problem,
                    })
                }
                Err(e) => {
                    warn!("Recovery of payment {} failed: {}", payment_id, e);
                    report.failed.push(RecoveryIssue {
                        payment_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Batch recovery: {} recovered, {} skipped, {} failed",
            report.recovered.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Looks the payment up on the processor and checks it belongs to this platform.
    async fn verify(&self, payment_id: &str) -> BookingResult<Verification> {
        let payment = self
            .services
            .processor
            .get_payment(payment_id)
            .await
            .map_err(|e| BookingError::Processor(e.to_string()))?;
        let payment = match payment {
            Some(payment) => payment,
            None => return Ok(Verification::Rejected(format!("payment {} unknown to the processor", payment_id))),
        };
        if payment.platform() != Some(self.services.settings.platform_tag.as_str()) {
            return Ok(Verification::Rejected(format!(
                "payment {} belongs to another platform",
                payment_id
            )));
        }
        Ok(Verification::Trusted(payment))
    }

    async fn apply_success(
        &self,
        event: &PaymentSucceeded,
        matched_path: ConfirmationPath,
        reconstructed_path: ConfirmationPath,
    ) -> BookingResult<SuccessOutcome> {
        match self
            .locate(event.booking_id, &event.payment_id, event.session_id.as_deref())
            .await?
        {
            Some(booking) => self.confirm_existing(booking, event, matched_path).await,
            None => self.reconstruct(event, reconstructed_path).await,
        }
    }

    /// Booking id first, then payment id, then checkout session id. A booking
    /// already settled by a different payment is not a match.
    async fn locate(
        &self,
        booking_id: Option<Uuid>,
        payment_id: &str,
        session_id: Option<&str>,
    ) -> BookingResult<Option<Booking>> {
        let policy = self.services.retry_policy();
        let repo = &self.services.bookings;

        if let Some(id) = booking_id {
            match retry_transient(&policy, "booking lookup", || repo.get(id)).await? {
                Some(booking) if awaits_payment(&booking, payment_id) => return Ok(Some(booking)),
                Some(booking) => info!(
                    "Booking {} already settled by payment {:?}, not by {}",
                    booking.id, booking.payment.processor_payment_id, payment_id
                ),
                None => {}
            }
        }
        if let Some(booking) =
            retry_transient(&policy, "payment lookup", || repo.find_by_payment_id(payment_id)).await?
        {
            return Ok(Some(booking));
        }
        if let Some(session_id) = session_id {
            if let Some(booking) =
                retry_transient(&policy, "session lookup", || repo.find_by_session_id(session_id)).await?
            {
                if awaits_payment(&booking, payment_id) {
                    return Ok(Some(booking));
                }
            }
        }
        Ok(None)
    }

    async fn confirm_existing(
        &self,
        booking: Booking,
        event: &PaymentSucceeded,
        path: ConfirmationPath,
    ) -> BookingResult<SuccessOutcome> {
        if booking.payment.status == PaymentStatus::Succeeded {
            info!("Payment {} already reconciled on booking {}", event.payment_id, booking.id);
            return Ok(SuccessOutcome::AlreadyReconciled { booking_id: booking.id });
        }
        if !charges(&booking, event.amount_cents, &event.currency) {
            warn!(
                "Payment {} collected {} {} but booking {} charges {} {}, left unconfirmed",
                event.payment_id,
                event.amount_cents,
                event.currency,
                booking.id,
                booking.payment.amount_cents,
                booking.payment.currency
            );
            return Ok(SuccessOutcome::AmountMismatch {
                booking_id: booking.id,
                expected_cents: booking.payment.amount_cents,
                expected_currency: booking.payment.currency.clone(),
                received_cents: event.amount_cents,
                received_currency: event.currency.clone(),
            });
        }

        let policy = self.services.retry_policy();
        let repo = &self.services.bookings;
        let success = PaymentSuccess {
            payment_id: event.payment_id.clone(),
            session_id: event.session_id.clone(),
            amount_cents: event.amount_cents,
            currency: event.currency.clone(),
            reconciled_at: self.services.clock.now(),
        };

        let updated = match retry_transient(&policy, "confirm payment", || {
            repo.mark_payment_succeeded(booking.id, &success)
        })
        .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                info!("Booking {} confirmed by a concurrent delivery of {}", booking.id, event.payment_id);
                return Ok(SuccessOutcome::AlreadyReconciled { booking_id: booking.id });
            }
            Err(StoreError::DuplicatePayment(_)) => {
                warn!(
                    "Payment {} already attached to another booking, booking {} left unchanged",
                    event.payment_id, booking.id
                );
                return Ok(SuccessOutcome::AlreadyReconciled { booking_id: booking.id });
            }
            Err(e) => return Err(e.into()),
        };

        let mut updated = updated;
        if !updated.capacity_committed {
            // a payment that lands after a cancellation revives the booking
            updated.capacity_committed = self.commit_capacity(&updated).await;
        }

        info!(
            "Booking {} confirmed by payment {} (was {})",
            updated.id, event.payment_id, booking.status
        );
        self.services.publish_confirmed(&updated, path).await;
        self.services.confirm_best_effort(&updated).await;
        Ok(SuccessOutcome::Confirmed { booking: updated })
    }

    /// Creates the confirmed booking a payment's metadata describes.
    ///
    /// Availability rules are bypassed: the money is already collected. The
    /// record is written first so the payment id index settles concurrent
    /// deliveries, then capacity is taken if the slot still has room.
    async fn reconstruct(&self, event: &PaymentSucceeded, path: ConfirmationPath) -> BookingResult<SuccessOutcome> {
        let policy = self.services.retry_policy();
        let repo = &self.services.bookings;
        let unmatched = |problem: String| -> BookingResult<SuccessOutcome> {
            warn!(
                "Payment {} unmatched, left for orphan recovery: {}",
                event.payment_id, problem
            );
            Ok(SuccessOutcome::Unmatched {
                payment_id: event.payment_id.clone(),
                problem,
            })
        };

        if let Some(platform) = event.metadata.get(keys::PLATFORM) {
            if platform != &self.services.settings.platform_tag {
                return unmatched(format!("payment tagged for platform {}", platform));
            }
        }
        let blueprint = match BookingBlueprint::from_metadata(&event.metadata) {
            Ok(blueprint) => blueprint,
            Err(e) => return unmatched(e.to_string()),
        };
        let package = match retry_transient(&policy, "package lookup", || {
            self.services.catalog.get_package(&blueprint.package)
        })
        .await?
        {
            Some(package) => package,
            None => return unmatched(format!("package {} not found", blueprint.package)),
        };
        let customer = retry_transient(&policy, "customer lookup", || {
            self.services
                .customers
                .find_or_create(blueprint.contact.email.expose(), Some(blueprint.contact.name.as_str()))
        })
        .await?;

        // the metadata's booking id may already belong to a booking another payment settled
        let id = match blueprint.booking_id {
            Some(id) => match retry_transient(&policy, "booking id lookup", || repo.get(id)).await? {
                Some(_) => Uuid::new_v4(),
                None => id,
            },
            None => Uuid::new_v4(),
        };

        let now = self.services.clock.now();
        let mut booking = Booking {
            id,
            customer_id: customer.id,
            package: blueprint.package,
            date: blueprint.date,
            time: blueprint.time.clone(),
            guests: blueprint.guests,
            occupancy: package.occupancy_for(&blueprint.guests),
            contact: blueprint.contact.clone(),
            payment: PaymentRecord {
                processor_payment_id: Some(event.payment_id.clone()),
                session_id: event.session_id.clone(),
                status: PaymentStatus::Succeeded,
                amount_cents: event.amount_cents,
                currency: event.currency.clone(),
                failure_reason: None,
                reconciled_at: Some(now),
            },
            status: BookingStatus::Confirmed,
            source: BookingSource::Reconstructed,
            capacity_committed: false,
            created_at: now,
            updated_at: now,
        };

        match retry_transient(&policy, "insert reconstructed booking", || repo.insert(&booking)).await {
            Ok(()) => {}
            Err(StoreError::DuplicatePayment(_)) => {
                let winner = retry_transient(&policy, "payment lookup", || repo.find_by_payment_id(&event.payment_id))
                    .await?
                    .map(|b| b.id)
                    .unwrap_or(booking.id);
                info!("Payment {} reconstructed concurrently as booking {}", event.payment_id, winner);
                return Ok(SuccessOutcome::AlreadyReconciled { booking_id: winner });
            }
            Err(e) => return Err(e.into()),
        }

        booking.capacity_committed = self.commit_capacity(&booking).await;
        if let Err(e) = self.services.catalog.adjust_booking_counter(&booking.package, 1).await {
            warn!("Booking counter for {} not incremented: {}", booking.package, e);
        }
        info!(
            "Booking {} reconstructed from payment {} for {} {} {} ({} units, capacity committed: {})",
            booking.id,
            event.payment_id,
            booking.package,
            booking.date,
            booking.time,
            booking.occupancy,
            booking.capacity_committed
        );
        self.services.publish_confirmed(&booking, path).await;
        self.services.confirm_best_effort(&booking).await;

        let capacity_committed = booking.capacity_committed;
        Ok(SuccessOutcome::Reconstructed {
            booking,
            capacity_committed,
        })
    }

    /// Counts the booking's units on its slot. A full or missing slot is
    /// logged and leaves the booking uncommitted.
    async fn commit_capacity(&self, booking: &Booking) -> bool {
        let policy = self.services.retry_policy();
        let mutator = self.services.mutator();
        let key = booking.slot_key();

        let added = retry_transient(&policy, "commit capacity", || {
            mutator.update_booking(&key, &booking.time, booking.occupancy, Direction::Add)
        })
        .await;
        if let Err(e) = added {
            warn!(
                "Booking {} holds a paid place without slot capacity ({} {} {}): {}",
                booking.id, booking.package, booking.date, booking.time, e
            );
            return false;
        }

        if let Err(e) = retry_transient(&policy, "flag capacity", || {
            self.services.bookings.set_capacity_committed(booking.id, true)
        })
        .await
        {
            error!("Booking {} counted on its slot but flag not stored: {}", booking.id, e);
        }
        true
    }

    async fn release_capacity(&self, booking: &Booking) -> bool {
        let policy = self.services.retry_policy();
        let mutator = self.services.mutator();
        let key = booking.slot_key();

        let released = retry_transient(&policy, "release capacity", || {
            mutator.update_booking(&key, &booking.time, booking.occupancy, Direction::Subtract)
        })
        .await;
        match released {
            Ok(_) => {
                if let Err(e) = retry_transient(&policy, "flag capacity", || {
                    self.services.bookings.set_capacity_committed(booking.id, false)
                })
                .await
                {
                    error!("Booking {} released its slot but flag not cleared: {}", booking.id, e);
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

/// Whether the booking can still be settled by `payment_id`: unpaid, or
/// already paid by that same payment.
fn awaits_payment(booking: &Booking, payment_id: &str) -> bool {
    booking.payment.status != PaymentStatus::Succeeded
        || booking.payment.processor_payment_id.as_deref() == Some(payment_id)
}

fn charges(booking: &Booking, amount_cents: i64, currency: &str) -> bool {
    booking.payment.amount_cents == amount_cents && booking.payment.currency.eq_ignore_ascii_case(currency)
}

/// Booking id a checkout wrote into the payment metadata, if any.
pub fn linked_booking_id(metadata: &PaymentMetadata) -> Option<Uuid> {
    metadata
        .get(keys::BOOKING_ID)
        .and_then(|value| Uuid::from_str(value.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::ledger::{BookingLedger, CreateBookingRequest};
    use crate::test_support::{contact, metadata, processor_payment, trip_date, Harness};
    use tourline_core::repository::BookingRepository;
    use tourline_core::{CutoffPolicy, GuestCount, Package, PackageCategory};

    async fn pending_booking(h: &Harness, package: &Package, adults: u32, payment_id: Option<&str>) -> Booking {
        BookingLedger::new(h.services.clone())
            .create(CreateBookingRequest {
                package: package.reference(),
                date: trip_date(),
                time: "09:00".to_string(),
                guests: GuestCount::new(adults, 0),
                contact: contact(),
                payment: PaymentRecord {
                    processor_payment_id: payment_id.map(str::to_string),
                    ..PaymentRecord::pending(10_300, "EUR")
                },
                source: BookingSource::Cart,
                cutoff: CutoffPolicy::Departure,
            })
            .await
            .unwrap()
    }

    /// Success event for a payment the processor also reports as succeeded.
    fn succeeded(h: &Harness, booking_id: Option<Uuid>, payment_id: &str, metadata: PaymentMetadata) -> PaymentSucceeded {
        h.processor.push(processor_payment(payment_id, tagged(metadata.clone())));
        PaymentSucceeded {
            booking_id,
            payment_id: payment_id.to_string(),
            session_id: None,
            amount_cents: 10_300,
            currency: "EUR".to_string(),
            metadata,
        }
    }

    /// Failure event for a payment the processor reports as failed.
    fn failed(h: &Harness, booking_id: Option<Uuid>, payment_id: &str) -> PaymentFailed {
        h.processor.push(ProcessorPayment {
            status: ProcessorPaymentStatus::Failed,
            ..processor_payment(payment_id, tagged(PaymentMetadata::new()))
        });
        PaymentFailed {
            booking_id,
            payment_id: payment_id.to_string(),
            reason: "card_declined".to_string(),
        }
    }

    fn tagged(mut metadata: PaymentMetadata) -> PaymentMetadata {
        metadata
            .entry(keys::PLATFORM.to_string())
            .or_insert_with(|| "tourline".to_string());
        metadata
    }

    #[tokio::test]
    async fn test_duplicate_success_delivery_is_a_no_op() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 2, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        let event = succeeded(&h, Some(booking.id), "pi_dup", PaymentMetadata::new());

        let first = pipeline.handle_payment_succeeded(&event).await.unwrap();
        let second = pipeline.handle_payment_succeeded(&event).await.unwrap();

        match first {
            SuccessOutcome::Confirmed { booking: confirmed } => {
                assert_eq!(confirmed.status, BookingStatus::Confirmed);
                assert_eq!(confirmed.payment.processor_payment_id.as_deref(), Some("pi_dup"));
                assert!(confirmed.payment.reconciled_at.is_some());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(second, SuccessOutcome::AlreadyReconciled { booking_id: booking.id });
        assert_eq!(h.store.bookings().len(), 1);
        assert_eq!(h.booked(&pkg), 2);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_success_matches_by_payment_id() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 1, Some("pi_known")).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let outcome = pipeline
            .handle_payment_succeeded(&succeeded(&h, None, "pi_known", PaymentMetadata::new()))
            .await
            .unwrap();

        assert!(matches!(outcome, SuccessOutcome::Confirmed { booking: ref b } if b.id == booking.id));
        let events = h.events.confirmed();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, ConfirmationPath::Webhook);
    }

    #[tokio::test]
    async fn test_reconstruction_matches_metadata() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        let event = succeeded(&h, None, "pi_lost", metadata(&pkg, GuestCount::new(2, 1)));

        let outcome = pipeline.handle_payment_succeeded(&event).await.unwrap();

        let booking = match outcome {
            SuccessOutcome::Reconstructed {
                booking,
                capacity_committed,
            } => {
                assert!(capacity_committed);
                booking
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(booking.package, pkg.reference());
        assert_eq!(booking.date, trip_date());
        assert_eq!(booking.time, "09:00");
        assert_eq!(booking.occupancy, 3);
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert_eq!(booking.source, BookingSource::Reconstructed);
        assert_eq!(h.booked(&pkg), 3);
        assert!(h.store.bookings()[0].capacity_committed);
        assert_eq!(h.events.confirmed()[0].path, ConfirmationPath::Reconstructed);

        // the same webhook again now finds the reconstructed booking
        let again = pipeline.handle_payment_succeeded(&event).await.unwrap();
        assert_eq!(again, SuccessOutcome::AlreadyReconciled { booking_id: booking.id });
        assert_eq!(h.store.bookings().len(), 1);
        assert_eq!(h.booked(&pkg), 3);
    }

    #[tokio::test]
    async fn test_reconstruction_ignores_cutoff_and_tolerates_full_slot() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 2, 1);
        pending_booking(&h, &pkg, 2, None).await;
        // the departure has already left
        h.clock.set(Utc.with_ymd_and_hms(2030, 6, 2, 0, 0, 0).unwrap());
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let outcome = pipeline
            .handle_payment_succeeded(&succeeded(&h, None, "pi_late", metadata(&pkg, GuestCount::new(1, 0))))
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            SuccessOutcome::Reconstructed {
                capacity_committed: false,
                ..
            }
        ));
        assert_eq!(h.booked(&pkg), 2);
        let stored = h.store.bookings();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|b| !b.capacity_committed));
    }

    #[tokio::test]
    async fn test_missing_metadata_is_left_unmatched() {
        let h = Harness::new();
        h.package(PackageCategory::Shared, 10, 1);
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let outcome = pipeline
            .handle_payment_succeeded(&succeeded(&h, None, "pi_bare", PaymentMetadata::new()))
            .await
            .unwrap();

        assert!(matches!(outcome, SuccessOutcome::Unmatched { ref payment_id, .. } if payment_id == "pi_bare"));
        assert!(h.store.bookings().is_empty());
    }

    #[tokio::test]
    async fn test_failed_payment_reverses_committed_capacity() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 4, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let outcome = pipeline
            .handle_payment_failed(&failed(&h, Some(booking.id), "pi_declined"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FailureOutcome::Cancelled {
                booking_id: booking.id,
                capacity_released: true
            }
        );
        assert_eq!(h.booked(&pkg), 0);
        let stored = h.store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.payment.status, PaymentStatus::Failed);
        assert_eq!(stored.payment.failure_reason.as_deref(), Some("card_declined"));
        assert!(!stored.capacity_committed);

        // a second failure delivery must not release again
        let again = pipeline
            .handle_payment_failed(&failed(&h, Some(booking.id), "pi_declined"))
            .await
            .unwrap();
        assert_eq!(again, FailureOutcome::AlreadyFinal { booking_id: booking.id });
        assert_eq!(h.events.cancelled().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_success_is_ignored() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 2, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(booking.id), "pi_ok", PaymentMetadata::new()))
            .await
            .unwrap();

        let outcome = pipeline
            .handle_payment_failed(&failed(&h, None, "pi_ok"))
            .await
            .unwrap();

        assert_eq!(outcome, FailureOutcome::IgnoredAfterSuccess { booking_id: booking.id });
        assert_eq!(h.booked(&pkg), 2);
    }

    #[tokio::test]
    async fn test_success_after_failure_recommits_capacity() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 3, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        pipeline
            .handle_payment_failed(&failed(&h, Some(booking.id), "pi_retry"))
            .await
            .unwrap();
        assert_eq!(h.booked(&pkg), 0);

        let outcome = pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(booking.id), "pi_retry", PaymentMetadata::new()))
            .await
            .unwrap();

        match outcome {
            SuccessOutcome::Confirmed { booking } => {
                assert_eq!(booking.status, BookingStatus::Confirmed);
                assert!(booking.capacity_committed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.booked(&pkg), 3);
    }

    #[tokio::test]
    async fn test_transient_store_errors_are_retried() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 1, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        h.store.inject_booking_faults(vec![
            StoreError::Transient("connection reset".to_string()),
            StoreError::Transient("connection reset".to_string()),
        ]);

        let outcome = pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(booking.id), "pi_flaky", PaymentMetadata::new()))
            .await
            .unwrap();

        assert!(matches!(outcome, SuccessOutcome::Confirmed { .. }));
    }

    #[tokio::test]
    async fn test_retries_give_up_after_three() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 1, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        h.store
            .inject_booking_faults(vec![StoreError::Transient("pool timed out".to_string()); 4]);

        let err = pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(booking.id), "pi_down", PaymentMetadata::new()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "transient_store_error");
        assert_eq!(
            h.store.get(booking.id).await.unwrap().unwrap().status,
            BookingStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 1, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        h.store.inject_booking_faults(vec![
            StoreError::Permanent("constraint".to_string()),
            StoreError::Transient("still queued".to_string()),
        ]);

        let err = pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(booking.id), "pi_bad", PaymentMetadata::new()))
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "store_error");
        // the second fault was never consumed by a retry
        assert!(h.store.get(booking.id).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_orphan_scan_filters_by_platform_and_existing_bookings() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let reconciled = pending_booking(&h, &pkg, 1, None).await;
        pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(reconciled.id), "pi_done", PaymentMetadata::new()))
            .await
            .unwrap();
        h.processor.push(processor_payment("pi_done", metadata(&pkg, GuestCount::new(1, 0))));

        h.processor.push(processor_payment("pi_orphan", metadata(&pkg, GuestCount::new(2, 0))));

        let mut foreign = metadata(&pkg, GuestCount::new(1, 0));
        foreign.insert(keys::PLATFORM.to_string(), "other-shop".to_string());
        h.processor.push(processor_payment("pi_foreign", foreign));

        let mut untagged = PaymentMetadata::new();
        untagged.insert(keys::PLATFORM.to_string(), "tourline".to_string());
        h.processor.push(processor_payment("pi_untagged", untagged));

        let orphans = pipeline.scan_orphans().await.unwrap();

        let ids: Vec<&str> = orphans.iter().map(|o| o.payment_id.as_str()).collect();
        assert_eq!(ids, vec!["pi_orphan", "pi_untagged"]);
        assert!(orphans[0].recoverable);
        assert!(!orphans[1].recoverable);
        assert!(orphans[1].problem.is_some());
    }

    #[tokio::test]
    async fn test_batch_recovery_reports_each_payment() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        h.processor.push(processor_payment("pi_a", metadata(&pkg, GuestCount::new(2, 0))));
        let mut broken = PaymentMetadata::new();
        broken.insert(keys::PLATFORM.to_string(), "tourline".to_string());
        h.processor.push(processor_payment("pi_b", broken));

        let report = pipeline.recover_batch(None).await.unwrap();

        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.recovered[0].payment_id, "pi_a");
        assert!(report.recovered[0].capacity_committed);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].payment_id, "pi_b");
        assert!(report.failed.is_empty());
        assert_eq!(h.booked(&pkg), 2);
        assert_eq!(h.events.confirmed()[0].path, ConfirmationPath::Recovered);

        let rerun = pipeline.recover_batch(Some(vec!["pi_a".to_string()])).await.unwrap();
        assert!(rerun.recovered.is_empty());
        assert_eq!(rerun.skipped[0].reason, "already reconciled");
    }

    #[tokio::test]
    async fn test_recover_links_pending_booking_by_metadata() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 2, None).await;
        let mut meta = metadata(&pkg, GuestCount::new(2, 0));
        meta.insert(keys::BOOKING_ID.to_string(), booking.id.to_string());
        h.processor.push(processor_payment("pi_linked", meta));
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let orphans = pipeline.scan_orphans().await.unwrap();
        assert_eq!(orphans[0].booking_id, Some(booking.id));

        let outcome = pipeline.recover_payment("pi_linked").await.unwrap();
        assert!(matches!(outcome, SuccessOutcome::Confirmed { booking: ref b } if b.id == booking.id));
        assert_eq!(h.store.bookings().len(), 1);
        assert_eq!(h.booked(&pkg), 2);
    }

    #[tokio::test]
    async fn test_recover_unknown_payment_is_a_validation_error() {
        let h = Harness::new();
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        let err = pipeline.recover_payment("pi_missing").await.unwrap_err();
        assert_eq!(err.reason(), "validation_error");
    }

    #[tokio::test]
    async fn test_failed_email_does_not_fail_reconciliation() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        h.mailer.set_failing(true);
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let outcome = pipeline
            .handle_payment_succeeded(&succeeded(&h, None, "pi_mail", metadata(&pkg, GuestCount::new(1, 0))))
            .await
            .unwrap();

        assert!(matches!(outcome, SuccessOutcome::Reconstructed { .. }));
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_success_unknown_to_processor_is_not_applied() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 2, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());

        let for_booking = PaymentSucceeded {
            booking_id: Some(booking.id),
            payment_id: "pi_nowhere".to_string(),
            session_id: None,
            amount_cents: 1,
            currency: "EUR".to_string(),
            metadata: PaymentMetadata::new(),
        };
        let outcome = pipeline.handle_payment_succeeded(&for_booking).await.unwrap();
        assert!(matches!(outcome, SuccessOutcome::Unverified { ref payment_id, .. } if payment_id == "pi_nowhere"));

        let with_metadata = PaymentSucceeded {
            booking_id: None,
            payment_id: "pi_invented".to_string(),
            metadata: metadata(&pkg, GuestCount::new(5, 0)),
            ..for_booking
        };
        let outcome = pipeline.handle_payment_succeeded(&with_metadata).await.unwrap();
        assert!(matches!(outcome, SuccessOutcome::Unverified { .. }));

        assert_eq!(h.store.bookings().len(), 1);
        assert_eq!(h.store.get(booking.id).await.unwrap().unwrap().status, BookingStatus::Pending);
        assert_eq!(h.booked(&pkg), 2);
        assert!(h.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_success_pending_on_processor_is_not_applied() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 1, None).await;
        let event = succeeded(&h, Some(booking.id), "pi_slow", PaymentMetadata::new());
        h.processor.push(ProcessorPayment {
            status: ProcessorPaymentStatus::Processing,
            ..processor_payment("pi_slow", tagged(PaymentMetadata::new()))
        });

        let outcome = ReconciliationPipeline::new(h.services.clone())
            .handle_payment_succeeded(&event)
            .await
            .unwrap();

        assert!(matches!(outcome, SuccessOutcome::Unverified { .. }));
        assert_eq!(h.store.get(booking.id).await.unwrap().unwrap().status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_processor_amount_must_match_booking() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 2, None).await;
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        // the event claims the full price, the processor collected far less
        let event = succeeded(&h, Some(booking.id), "pi_short", PaymentMetadata::new());
        h.processor.push(ProcessorPayment {
            amount_cents: 500,
            ..processor_payment("pi_short", tagged(PaymentMetadata::new()))
        });

        let outcome = pipeline.handle_payment_succeeded(&event).await.unwrap();

        assert_eq!(
            outcome,
            SuccessOutcome::AmountMismatch {
                booking_id: booking.id,
                expected_cents: 10_300,
                expected_currency: "EUR".to_string(),
                received_cents: 500,
                received_currency: "EUR".to_string(),
            }
        );
        let stored = h.store.get(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Pending);
        assert_eq!(stored.payment.status, PaymentStatus::Pending);
        assert!(h.mailer.sent().is_empty());

        let mut meta = tagged(PaymentMetadata::new());
        meta.insert(keys::BOOKING_ID.to_string(), booking.id.to_string());
        h.processor.push(ProcessorPayment {
            amount_cents: 500,
            ..processor_payment("pi_short", meta)
        });
        let orphans = pipeline.scan_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert!(!orphans[0].recoverable);
        assert!(orphans[0].problem.is_some());
    }

    #[tokio::test]
    async fn test_second_payment_for_settled_booking_gets_its_own_booking() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let pipeline = ReconciliationPipeline::new(h.services.clone());
        let settled_id = Uuid::new_v4();
        let mut meta = metadata(&pkg, GuestCount::new(2, 0));
        meta.insert(keys::BOOKING_ID.to_string(), settled_id.to_string());

        let first = pipeline
            .handle_payment_succeeded(&succeeded(&h, Some(settled_id), "pi_first", meta.clone()))
            .await
            .unwrap();
        assert!(matches!(first, SuccessOutcome::Reconstructed { booking: ref b, .. } if b.id == settled_id));

        h.processor.push(processor_payment("pi_second", meta));
        let orphans = pipeline.scan_orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].payment_id, "pi_second");
        assert_eq!(orphans[0].booking_id, None);
        assert!(orphans[0].recoverable);

        let report = pipeline.recover_batch(None).await.unwrap();

        assert_eq!(report.recovered.len(), 1);
        assert_ne!(report.recovered[0].booking_id, settled_id);
        assert!(report.skipped.is_empty());
        let holding = h.store.find_by_payment_id("pi_second").await.unwrap().unwrap();
        assert_eq!(holding.status, BookingStatus::Confirmed);
        let first_booking = h.store.get(settled_id).await.unwrap().unwrap();
        assert_eq!(first_booking.payment.processor_payment_id.as_deref(), Some("pi_first"));
        assert_eq!(h.store.bookings().len(), 2);
        assert_eq!(h.booked(&pkg), 4);
        assert!(pipeline.scan_orphans().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_unknown_to_processor_does_not_cancel() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 3, None).await;

        let outcome = ReconciliationPipeline::new(h.services.clone())
            .handle_payment_failed(&PaymentFailed {
                booking_id: Some(booking.id),
                payment_id: "pi_nowhere".to_string(),
                reason: "card_declined".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(outcome, FailureOutcome::Unverified { .. }));
        assert_eq!(h.store.get(booking.id).await.unwrap().unwrap().status, BookingStatus::Pending);
        assert_eq!(h.booked(&pkg), 3);
    }

    #[tokio::test]
    async fn test_failure_for_payment_processor_reports_paid_is_ignored() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let booking = pending_booking(&h, &pkg, 2, Some("pi_paid")).await;
        h.processor.push(processor_payment("pi_paid", tagged(PaymentMetadata::new())));

        let outcome = ReconciliationPipeline::new(h.services.clone())
            .handle_payment_failed(&PaymentFailed {
                booking_id: None,
                payment_id: "pi_paid".to_string(),
                reason: "card_declined".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, FailureOutcome::IgnoredAfterSuccess { booking_id: booking.id });
        assert_eq!(h.store.get(booking.id).await.unwrap().unwrap().status, BookingStatus::Pending);
        assert_eq!(h.booked(&pkg), 2);
    }
}
