//! Multi-item cart checkout.
//!
//! All bookings of one cart are written through a single
//! `CheckoutTransaction`. The transaction commits when at least one item
//! produced a booking; otherwise it is rolled back and the cart is left as
//! it was. A failing item never aborts its siblings.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use tourline_catalog::{AvailabilityEngine, AvailabilityQuery};
use tourline_core::cart::CartItem;
use tourline_core::repository::CheckoutTransaction;
use tourline_core::slot::normalize_time_label;
use tourline_core::{
    Booking, BookingError, BookingResult, BookingSource, BookingStatus, ContactInfo, CutoffPolicy, IncrementOutcome,
    PaymentRecord,
};

use crate::services::BookingServices;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemIssue {
    pub item_id: Uuid,
    pub reason: String,
    pub message: String,
}

impl ItemIssue {
    fn new(item: &CartItem, reason: &str, message: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    fn from_error(item: &CartItem, err: &BookingError) -> Self {
        Self::new(item, err.reason(), err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutReport {
    pub success: bool,
    pub booking_ids: Vec<Uuid>,
    /// Items that were rejected.
    pub errors: Vec<ItemIssue>,
    /// Items skipped as stale or duplicate, and confirmation emails not sent.
    pub warnings: Vec<ItemIssue>,
}

enum ItemResult {
    Booked(Booking),
    Skipped(ItemIssue),
}

/// Per-checkout values shared by every item.
struct ItemContext<'a> {
    engine: &'a AvailabilityEngine,
    contact: &'a ContactInfo,
    customer_id: Uuid,
    today: NaiveDate,
    cutoff: CutoffPolicy,
}

pub struct CartCheckout {
    services: BookingServices,
}

impl CartCheckout {
    pub fn new(services: BookingServices) -> Self {
        Self { services }
    }

    /// Turns every bookable cart item into a pending booking.
    ///
    /// An unknown customer or an empty cart aborts the whole checkout with a
    /// validation error.
    #[tracing::instrument(skip(self, email, contact))]
    pub async fn book_cart_items(&self, email: &str, contact: ContactInfo) -> BookingResult<CheckoutReport> {
        let customer = self
            .services
            .customers
            .find_by_email(email)
            .await?
            .ok_or_else(|| BookingError::Validation("no customer registered for this email".to_string()))?;
        let cart = self
            .services
            .carts
            .load_cart(customer.id)
            .await?
            .filter(|cart| !cart.is_empty())
            .ok_or_else(|| BookingError::Validation("cart is empty".to_string()))?;

        let engine = self.services.availability();
        let ctx = ItemContext {
            engine: &engine,
            contact: &contact,
            customer_id: customer.id,
            today: self.services.settings.calendar.local_date(self.services.clock.now()),
            cutoff: self.services.settings.public_cutoff(),
        };

        let mut tx = self.services.carts.begin_checkout(customer.id).await?;
        let mut report = CheckoutReport::default();
        let mut created: Vec<(CartItem, Booking)> = Vec::new();

        for item in &cart.items {
            match self.book_item(&mut tx, &ctx, item).await {
                Ok(ItemResult::Booked(booking)) => created.push((item.clone(), booking)),
                Ok(ItemResult::Skipped(issue)) => {
                    info!("Cart item {} skipped: {}", item.id, issue.message);
                    report.warnings.push(issue);
                }
                Err(issue) => {
                    warn!("Cart item {} rejected: {}", item.id, issue.message);
                    report.errors.push(issue);
                }
            }
        }

        if created.is_empty() {
            tx.rollback().await?;
            info!(
                "Checkout for customer {} created no bookings ({} errors, {} warnings)",
                customer.id,
                report.errors.len(),
                report.warnings.len()
            );
            return Ok(report);
        }

        tx.clear_cart().await?;
        tx.commit().await?;

        for (item, booking) in &created {
            if let Err(e) = self.services.catalog.adjust_booking_counter(&booking.package, 1).await {
                warn!("Booking counter for {} not incremented: {}", booking.package, e);
            }
            if let Err(e) = self.services.send_confirmation(booking).await {
                warn!("Confirmation email for booking {} not sent: {}", booking.id, e);
                report
                    .warnings
                    .push(ItemIssue::new(item, "email_not_sent", e.to_string()));
            }
        }

        report.success = true;
        report.booking_ids = created.iter().map(|(_, booking)| booking.id).collect();
        info!(
            "Checkout for customer {} created {} bookings",
            customer.id,
            report.booking_ids.len()
        );
        Ok(report)
    }

    async fn book_item(
        &self,
        tx: &mut Box<dyn CheckoutTransaction>,
        ctx: &ItemContext<'_>,
        item: &CartItem,
    ) -> Result<ItemResult, ItemIssue> {
        if item.date < ctx.today {
            return Ok(ItemResult::Skipped(ItemIssue::new(
                item,
                "date_elapsed",
                format!("{} is in the past", item.date),
            )));
        }

        let package = match self.services.catalog.get_package(&item.package).await {
            Ok(Some(package)) if package.is_active => package,
            Ok(_) => {
                return Ok(ItemResult::Skipped(ItemIssue::new(
                    item,
                    "package_not_found",
                    format!("package {} is no longer offered", item.package),
                )))
            }
            Err(e) => return Err(ItemIssue::from_error(item, &e.into())),
        };

        let time = normalize_time_label(&item.time).map_err(|e| ItemIssue::from_error(item, &e))?;
        let party = item.guests.total();
        if party == 0 || party > package.max_person {
            return Err(ItemIssue::new(
                item,
                "validation_error",
                format!("party of {} outside 1..={}", party, package.max_person),
            ));
        }

        let query = AvailabilityQuery {
            package: item.package,
            date: item.date,
            time: time.clone(),
            guests: item.guests,
        };
        let key = query.slot_key();
        match tx.has_active_booking(ctx.customer_id, &key, &time).await {
            Ok(true) => {
                return Ok(ItemResult::Skipped(ItemIssue::new(
                    item,
                    "duplicate_booking",
                    format!("already booked for {} {} {}", item.package, item.date, time),
                )))
            }
            Ok(false) => {}
            Err(e) => return Err(ItemIssue::from_error(item, &e.into())),
        }

        let availability = ctx
            .engine
            .require(&query, ctx.cutoff)
            .await
            .map_err(|e| ItemIssue::from_error(item, &e))?;

        let now = self.services.clock.now();
        let booking = Booking {
            id: Uuid::new_v4(),
            customer_id: ctx.customer_id,
            package: item.package,
            date: item.date,
            time,
            guests: item.guests,
            occupancy: availability.requested_units,
            contact: ctx.contact.clone(),
            payment: PaymentRecord::pending(
                self.services.settings.charge_with_fee(item.price_cents),
                item.currency.clone(),
            ),
            status: BookingStatus::Pending,
            source: BookingSource::Cart,
            capacity_committed: true,
            created_at: now,
            updated_at: now,
        };

        match tx.reserve_and_insert(&booking).await {
            Ok(IncrementOutcome::Applied { .. }) => Ok(ItemResult::Booked(booking)),
            Ok(IncrementOutcome::Insufficient { available }) => Err(ItemIssue::from_error(
                item,
                &BookingError::InsufficientCapacity {
                    requested: booking.occupancy,
                    available,
                },
            )),
            Ok(IncrementOutcome::Missing) => Err(ItemIssue::from_error(item, &BookingError::NoSlot)),
            Err(e) => Err(ItemIssue::from_error(item, &e.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tourline_core::identity::Customer;
    use tourline_core::repository::BookingRepository;
    use tourline_core::{Clock, GuestCount, Package, PackageCategory, PaymentStatus};

    use crate::test_support::{contact, trip_date, Harness};

    fn customer(h: &Harness) -> Customer {
        let customer = Customer {
            id: Uuid::new_v4(),
            email: "ayse@example.com".to_string(),
            name: Some("Ayse Demir".to_string()),
        };
        h.store.put_customer(customer.clone());
        customer
    }

    fn item(package: &Package, adults: u32) -> CartItem {
        CartItem {
            id: Uuid::new_v4(),
            package: package.reference(),
            date: trip_date(),
            time: "09:00".to_string(),
            guests: GuestCount::new(adults, 0),
            price_cents: 10_000,
            currency: "EUR".to_string(),
        }
    }

    #[tokio::test]
    async fn test_deleted_package_is_a_warning_and_the_rest_commits() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let gone = h.package(PackageCategory::Shared, 10, 1);
        h.store.remove_package(&gone.reference());
        let customer = customer(&h);
        let kept = item(&pkg, 2);
        h.store.put_cart(customer.id, vec![kept.clone(), item(&gone, 1)]);

        let report = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.booking_ids.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].reason, "package_not_found");
        assert!(report.errors.is_empty());
        assert!(h.store.cart_items(customer.id).is_empty());

        let booking = h.store.get(report.booking_ids[0]).await.unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.source, BookingSource::Cart);
        assert_eq!(booking.payment.status, PaymentStatus::Pending);
        assert_eq!(booking.payment.amount_cents, 10_300);
        assert_eq!(booking.created_at, h.clock.now());
        assert_eq!(booking.updated_at, h.clock.now());
        assert_eq!(h.booked(&pkg), 2);
        assert_eq!(h.store.booking_counter(&pkg.reference()), 1);
        assert_eq!(h.mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_bookable_rolls_back_and_keeps_cart() {
        let h = Harness::new();
        let full = h.package(PackageCategory::Shared, 1, 1);
        let customer = customer(&h);
        let items = vec![item(&full, 3)];
        h.store.put_cart(customer.id, items.clone());

        let report = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();

        assert!(!report.success);
        assert!(report.booking_ids.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].reason, "insufficient_capacity");
        assert_eq!(h.store.cart_items(customer.id), items);
        assert!(h.store.bookings().is_empty());
        assert_eq!(h.booked(&full), 0);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_abort_siblings() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 3, 1);
        let small = h.package(PackageCategory::Shared, 1, 1);
        let customer = customer(&h);
        let fits = item(&pkg, 2);
        let too_big = item(&small, 2);
        h.store.put_cart(customer.id, vec![fits, too_big.clone()]);

        let report = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.booking_ids.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].item_id, too_big.id);
        assert_eq!(report.errors[0].reason, "insufficient_capacity");
        assert_eq!(h.booked(&pkg), 2);
        assert_eq!(h.booked(&small), 0);
    }

    #[tokio::test]
    async fn test_email_failure_becomes_a_warning() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let customer = customer(&h);
        h.store.put_cart(customer.id, vec![item(&pkg, 1)]);
        h.mailer.set_failing(true);

        let report = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.booking_ids.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].reason, "email_not_sent");
    }

    #[tokio::test]
    async fn test_existing_active_booking_is_skipped() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let customer = customer(&h);
        h.store.put_cart(customer.id, vec![item(&pkg, 1)]);
        let first = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();
        assert!(first.success);

        h.store.put_cart(customer.id, vec![item(&pkg, 1)]);
        let second = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();

        assert!(!second.success);
        assert_eq!(second.warnings[0].reason, "duplicate_booking");
        assert_eq!(h.store.bookings().len(), 1);
        assert_eq!(h.booked(&pkg), 1);
    }

    #[tokio::test]
    async fn test_elapsed_date_is_skipped() {
        let h = Harness::new();
        let pkg = h.package(PackageCategory::Shared, 10, 1);
        let customer = customer(&h);
        let mut stale = item(&pkg, 1);
        stale.date = trip_date() - Duration::days(60);
        h.store.put_cart(customer.id, vec![stale, item(&pkg, 1)]);

        let report = CartCheckout::new(h.services.clone())
            .book_cart_items("ayse@example.com", contact())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.booking_ids.len(), 1);
        assert_eq!(report.warnings[0].reason, "date_elapsed");
    }

    #[tokio::test]
    async fn test_unknown_customer_or_empty_cart_is_rejected() {
        let h = Harness::new();
        let checkout = CartCheckout::new(h.services.clone());

        let err = checkout.book_cart_items("nobody@example.com", contact()).await.unwrap_err();
        assert_eq!(err.reason(), "validation_error");

        customer(&h);
        let err = checkout.book_cart_items("ayse@example.com", contact()).await.unwrap_err();
        assert_eq!(err.reason(), "validation_error");
    }
}
