use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::booking::{Booking, BookingStatus, GuestCount, PaymentSuccess};
use crate::cart::Cart;
use crate::error::StoreResult;
use crate::package::{Package, PackageRef, PackageType};
use crate::slot::{IncrementOutcome, SlotDocument, SlotKey};

/// Slot documents and the per-entry atomic capacity updates.
#[async_trait]
pub trait SlotRepository: Send + Sync {
    async fn get_document(&self, key: &SlotKey) -> StoreResult<Option<SlotDocument>>;

    /// Adds `units` to the entry's booked-count in one conditional update,
    /// only if the result stays within capacity.
    async fn try_increment(&self, key: &SlotKey, time: &str, units: u32) -> StoreResult<IncrementOutcome>;

    /// Subtracts `units`, flooring at zero. `None` when the entry does not exist.
    async fn decrement_floored(&self, key: &SlotKey, time: &str, units: u32) -> StoreResult<Option<u32>>;

    /// Inserts entries that do not exist yet; existing entries are left untouched.
    /// Returns the number of entries created.
    async fn insert_missing(&self, documents: &[SlotDocument]) -> StoreResult<usize>;

    async fn latest_date(&self, package: &PackageRef) -> StoreResult<Option<NaiveDate>>;

    async fn delete_for_package(&self, package: &PackageRef) -> StoreResult<u64>;
}

/// Durable booking records.
///
/// Implementations enforce uniqueness of the processor payment id and report a
/// clash as `StoreError::DuplicatePayment`.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>>;

    async fn find_by_session_id(&self, session_id: &str) -> StoreResult<Option<Booking>>;

    async fn find_active_for_slot(
        &self,
        customer_id: Uuid,
        key: &SlotKey,
        time: &str,
    ) -> StoreResult<Option<Booking>>;

    /// Stamps a succeeded payment and confirms the booking, only if its
    /// payment is not already `succeeded`. Returns the updated booking when
    /// this call performed the transition, `None` otherwise.
    async fn mark_payment_succeeded(&self, id: Uuid, success: &PaymentSuccess) -> StoreResult<Option<Booking>>;

    /// Fails the payment and cancels the booking, only if the payment has not
    /// succeeded and the booking is still active. Returns the updated booking
    /// when this call performed the transition.
    async fn mark_payment_failed(
        &self,
        id: Uuid,
        payment_id: Option<&str>,
        reason: &str,
    ) -> StoreResult<Option<Booking>>;

    /// Compare-and-set on the lifecycle status.
    async fn update_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> StoreResult<bool>;

    async fn update_guests(&self, id: Uuid, guests: GuestCount, occupancy: u32) -> StoreResult<bool>;

    async fn set_capacity_committed(&self, id: Uuid, committed: bool) -> StoreResult<()>;

    /// Moves every `confirmed` booking dated before `before` to `completed`.
    async fn complete_elapsed(&self, before: NaiveDate) -> StoreResult<u64>;

    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

/// Catalog collaborator, read-only apart from the aggregate booking counter.
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn get_package(&self, package: &PackageRef) -> StoreResult<Option<Package>>;

    async fn list_active_packages(&self) -> StoreResult<Vec<Package>>;

    async fn adjust_booking_counter(&self, package: &PackageRef, delta: i64) -> StoreResult<()>;
}

#[async_trait]
pub trait BlackoutRegistry: Send + Sync {
    async fn is_blacked_out(&self, date: NaiveDate, package_type: PackageType) -> StoreResult<bool>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    async fn load_cart(&self, customer_id: Uuid) -> StoreResult<Option<Cart>>;

    async fn begin_checkout(&self, customer_id: Uuid) -> StoreResult<Box<dyn CheckoutTransaction>>;
}

/// One cart checkout. `rollback`, or dropping without `commit`, discards
/// every write made through the transaction.
#[async_trait]
pub trait CheckoutTransaction: Send {
    async fn has_active_booking(&mut self, customer_id: Uuid, key: &SlotKey, time: &str) -> StoreResult<bool>;

    /// Increments the booking's slot and inserts the booking as one unit.
    /// Nothing is written unless the outcome is `IncrementOutcome::Applied`.
    async fn reserve_and_insert(&mut self, booking: &Booking) -> StoreResult<IncrementOutcome>;

    async fn clear_cart(&mut self) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
