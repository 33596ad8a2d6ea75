//! In-memory implementations of the store traits.
//!
//! Every trait call takes the single state lock once, so each call is atomic
//! the same way one conditional SQL statement is. Used by tests and by local
//! runs without Postgres.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use tourline_core::cart::{Cart, CartItem};
use tourline_core::identity::{normalize_email, Customer, CustomerDirectory};
use tourline_core::notify::{BookingEventSink, BookingSummary, ConfirmationMailer, NotifyError};
use tourline_core::payment::{PaymentProcessor, ProcessorPayment, ProcessorPaymentStatus};
use tourline_core::repository::{
    BlackoutRegistry, BookingRepository, CartRepository, CheckoutTransaction, PackageCatalog, SlotRepository,
};
use tourline_core::booking::PaymentSuccess;
use tourline_core::{
    Booking, BookingStatus, GuestCount, IncrementOutcome, Package, PackageRef, PackageType, PaymentStatus,
    SlotDocument, SlotEntry, SlotKey, StoreError, StoreResult,
};
use tourline_shared::models::events::{BookingCancelledEvent, BookingConfirmedEvent};

#[derive(Default)]
struct MemoryState {
    slots: HashMap<SlotKey, SlotDocument>,
    bookings: HashMap<Uuid, Booking>,
    packages: HashMap<PackageRef, Package>,
    booking_counters: HashMap<PackageRef, i64>,
    blackouts: HashSet<(NaiveDate, Option<PackageType>)>,
    customers: HashMap<String, Customer>,
    carts: HashMap<Uuid, Vec<CartItem>>,
    booking_faults: VecDeque<StoreError>,
}

impl MemoryState {
    fn increment(&mut self, key: &SlotKey, time: &str, units: u32) -> IncrementOutcome {
        let entry = match self
            .slots
            .get_mut(key)
            .and_then(|doc| doc.slots.iter_mut().find(|s| s.time == time))
        {
            Some(entry) => entry,
            None => return IncrementOutcome::Missing,
        };
        if entry.booked_count + units > entry.capacity {
            return IncrementOutcome::Insufficient {
                available: entry.available(),
            };
        }
        entry.booked_count += units;
        IncrementOutcome::Applied {
            booked_count: entry.booked_count,
            capacity: entry.capacity,
        }
    }

    fn decrement(&mut self, key: &SlotKey, time: &str, units: u32) -> Option<u32> {
        let entry = self
            .slots
            .get_mut(key)
            .and_then(|doc| doc.slots.iter_mut().find(|s| s.time == time))?;
        entry.booked_count = entry.booked_count.saturating_sub(units);
        Some(entry.booked_count)
    }

    fn payment_id_taken(&self, payment_id: &str, except: Option<Uuid>) -> bool {
        self.bookings.values().any(|b| {
            Some(b.id) != except && b.payment.processor_payment_id.as_deref() == Some(payment_id)
        })
    }

    fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        if self.bookings.contains_key(&booking.id) {
            return Err(StoreError::Permanent(format!("booking {} already exists", booking.id)));
        }
        if let Some(pid) = booking.payment.processor_payment_id.as_deref() {
            if self.payment_id_taken(pid, None) {
                return Err(StoreError::DuplicatePayment(pid.to_string()));
            }
        }
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    fn has_active(&self, customer_id: Uuid, key: &SlotKey, time: &str) -> Option<Booking> {
        self.bookings
            .values()
            .find(|b| {
                b.customer_id == customer_id
                    && b.slot_key() == *key
                    && b.time == time
                    && b.status.is_active()
            })
            .cloned()
    }
}

/// Shared in-memory store. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn booking_fault(&self) -> StoreResult<()> {
        match self.state().booking_faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn put_package(&self, package: Package) {
        self.state().packages.insert(package.reference(), package);
    }

    pub fn remove_package(&self, package: &PackageRef) {
        self.state().packages.remove(package);
    }

    pub fn put_slot_document(&self, document: SlotDocument) {
        self.state().slots.insert(document.key, document);
    }

    pub fn slot_entry(&self, key: &SlotKey, time: &str) -> Option<SlotEntry> {
        self.state().slots.get(key).and_then(|doc| doc.entry(time).cloned())
    }

    pub fn slot_document_count(&self, package: &PackageRef) -> usize {
        self.state().slots.keys().filter(|k| k.package() == *package).count()
    }

    /// `None` blacks out every package type on `date`.
    pub fn add_blackout(&self, date: NaiveDate, package_type: Option<PackageType>) {
        self.state().blackouts.insert((date, package_type));
    }

    pub fn put_cart(&self, customer_id: Uuid, items: Vec<CartItem>) {
        self.state().carts.insert(customer_id, items);
    }

    pub fn cart_items(&self, customer_id: Uuid) -> Vec<CartItem> {
        self.state().carts.get(&customer_id).cloned().unwrap_or_default()
    }

    pub fn put_customer(&self, customer: Customer) {
        self.state().customers.insert(normalize_email(&customer.email), customer);
    }

    pub fn put_booking(&self, booking: Booking) {
        self.state().bookings.insert(booking.id, booking);
    }

    pub fn bookings(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.state().bookings.values().cloned().collect();
        all.sort_by_key(|b| b.created_at);
        all
    }

    pub fn booking_counter(&self, package: &PackageRef) -> i64 {
        self.state().booking_counters.get(package).copied().unwrap_or(0)
    }

    /// Queue errors returned by the next booking-repository calls, in order.
    pub fn inject_booking_faults(&self, faults: Vec<StoreError>) {
        self.state().booking_faults.extend(faults);
    }
}

#[async_trait]
impl SlotRepository for InMemoryStore {
    async fn get_document(&self, key: &SlotKey) -> StoreResult<Option<SlotDocument>> {
        Ok(self.state().slots.get(key).cloned())
    }

    async fn try_increment(&self, key: &SlotKey, time: &str, units: u32) -> StoreResult<IncrementOutcome> {
        Ok(self.state().increment(key, time, units))
    }

    async fn decrement_floored(&self, key: &SlotKey, time: &str, units: u32) -> StoreResult<Option<u32>> {
        Ok(self.state().decrement(key, time, units))
    }

    async fn insert_missing(&self, documents: &[SlotDocument]) -> StoreResult<usize> {
        let mut state = self.state();
        let mut created = 0;
        for doc in documents {
            let existing = state.slots.entry(doc.key).or_insert_with(|| SlotDocument {
                key: doc.key,
                category: doc.category,
                slots: Vec::new(),
            });
            for entry in &doc.slots {
                if existing.entry(&entry.time).is_none() {
                    existing.slots.push(entry.clone());
                    created += 1;
                }
            }
            existing.slots.sort_by(|a, b| a.time.cmp(&b.time));
        }
        Ok(created)
    }

    async fn latest_date(&self, package: &PackageRef) -> StoreResult<Option<NaiveDate>> {
        Ok(self
            .state()
            .slots
            .keys()
            .filter(|k| k.package() == *package)
            .map(|k| k.date)
            .max())
    }

    async fn delete_for_package(&self, package: &PackageRef) -> StoreResult<u64> {
        let mut state = self.state();
        let before = state.slots.len();
        state.slots.retain(|k, _| k.package() != *package);
        Ok((before - state.slots.len()) as u64)
    }
}

#[async_trait]
impl BookingRepository for InMemoryStore {
    async fn insert(&self, booking: &Booking) -> StoreResult<()> {
        self.booking_fault()?;
        self.state().insert_booking(booking)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        self.booking_fault()?;
        Ok(self.state().bookings.get(&id).cloned())
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>> {
        self.booking_fault()?;
        Ok(self
            .state()
            .bookings
            .values()
            .find(|b| b.payment.processor_payment_id.as_deref() == Some(payment_id))
            .cloned())
    }

    async fn find_by_session_id(&self, session_id: &str) -> StoreResult<Option<Booking>> {
        self.booking_fault()?;
        Ok(self
            .state()
            .bookings
            .values()
            .find(|b| b.payment.session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn find_active_for_slot(
        &self,
        customer_id: Uuid,
        key: &SlotKey,
        time: &str,
    ) -> StoreResult<Option<Booking>> {
        self.booking_fault()?;
        Ok(self.state().has_active(customer_id, key, time))
    }

    async fn mark_payment_succeeded(&self, id: Uuid, success: &PaymentSuccess) -> StoreResult<Option<Booking>> {
        self.booking_fault()?;
        let mut state = self.state();
        if state.payment_id_taken(&success.payment_id, Some(id)) {
            return Err(StoreError::DuplicatePayment(success.payment_id.clone()));
        }
        let booking = match state.bookings.get_mut(&id) {
            Some(b) if b.payment.status != PaymentStatus::Succeeded => b,
            _ => return Ok(None),
        };
        booking.payment.status = PaymentStatus::Succeeded;
        booking.payment.processor_payment_id = Some(success.payment_id.clone());
        if success.session_id.is_some() {
            booking.payment.session_id = success.session_id.clone();
        }
        booking.payment.amount_cents = success.amount_cents;
        booking.payment.currency = success.currency.clone();
        booking.payment.failure_reason = None;
        booking.payment.reconciled_at = Some(success.reconciled_at);
        if booking.status != BookingStatus::Completed {
            booking.status = BookingStatus::Confirmed;
        }
        booking.updated_at = Utc::now();
        Ok(Some(booking.clone()))
    }

    async fn mark_payment_failed(
        &self,
        id: Uuid,
        payment_id: Option<&str>,
        reason: &str,
    ) -> StoreResult<Option<Booking>> {
        self.booking_fault()?;
        let mut state = self.state();
        let booking = match state.bookings.get_mut(&id) {
            Some(b) if b.payment.status != PaymentStatus::Succeeded && b.status.is_active() => b,
            _ => return Ok(None),
        };
        booking.payment.status = PaymentStatus::Failed;
        if booking.payment.processor_payment_id.is_none() {
            booking.payment.processor_payment_id = payment_id.map(str::to_string);
        }
        booking.payment.failure_reason = Some(reason.to_string());
        booking.status = BookingStatus::Cancelled;
        booking.updated_at = Utc::now();
        Ok(Some(booking.clone()))
    }

    async fn update_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> StoreResult<bool> {
        self.booking_fault()?;
        let mut state = self.state();
        match state.bookings.get_mut(&id) {
            Some(b) if b.status == from => {
                b.status = to;
                b.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_guests(&self, id: Uuid, guests: GuestCount, occupancy: u32) -> StoreResult<bool> {
        self.booking_fault()?;
        let mut state = self.state();
        match state.bookings.get_mut(&id) {
            Some(b) => {
                b.guests = guests;
                b.occupancy = occupancy;
                b.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_capacity_committed(&self, id: Uuid, committed: bool) -> StoreResult<()> {
        self.booking_fault()?;
        let mut state = self.state();
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", id)))?;
        booking.capacity_committed = committed;
        Ok(())
    }

    async fn complete_elapsed(&self, before: NaiveDate) -> StoreResult<u64> {
        self.booking_fault()?;
        let mut state = self.state();
        let mut completed = 0;
        for booking in state.bookings.values_mut() {
            if booking.status == BookingStatus::Confirmed && booking.date < before {
                booking.status = BookingStatus::Completed;
                booking.updated_at = Utc::now();
                completed += 1;
            }
        }
        Ok(completed)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        self.booking_fault()?;
        Ok(self.state().bookings.remove(&id).is_some())
    }
}

#[async_trait]
impl PackageCatalog for InMemoryStore {
    async fn get_package(&self, package: &PackageRef) -> StoreResult<Option<Package>> {
        Ok(self.state().packages.get(package).cloned())
    }

    async fn list_active_packages(&self) -> StoreResult<Vec<Package>> {
        Ok(self
            .state()
            .packages
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect())
    }

    async fn adjust_booking_counter(&self, package: &PackageRef, delta: i64) -> StoreResult<()> {
        let mut state = self.state();
        let counter = state.booking_counters.entry(*package).or_insert(0);
        *counter = (*counter + delta).max(0);
        Ok(())
    }
}

#[async_trait]
impl BlackoutRegistry for InMemoryStore {
    async fn is_blacked_out(&self, date: NaiveDate, package_type: PackageType) -> StoreResult<bool> {
        let state = self.state();
        Ok(state.blackouts.contains(&(date, None)) || state.blackouts.contains(&(date, Some(package_type))))
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Customer>> {
        Ok(self.state().customers.get(&normalize_email(email)).cloned())
    }

    async fn find_or_create(&self, email: &str, name: Option<&str>) -> StoreResult<Customer> {
        let key = normalize_email(email);
        let mut state = self.state();
        let customer = state.customers.entry(key.clone()).or_insert_with(|| Customer {
            id: Uuid::new_v4(),
            email: key,
            name: name.map(str::to_string),
        });
        Ok(customer.clone())
    }
}

#[async_trait]
impl CartRepository for InMemoryStore {
    async fn load_cart(&self, customer_id: Uuid) -> StoreResult<Option<Cart>> {
        Ok(self.state().carts.get(&customer_id).map(|items| Cart {
            customer_id,
            items: items.clone(),
        }))
    }

    async fn begin_checkout(&self, customer_id: Uuid) -> StoreResult<Box<dyn CheckoutTransaction>> {
        Ok(Box::new(MemoryCheckout {
            store: self.clone(),
            customer_id,
            undo: Vec::new(),
            finished: false,
        }))
    }
}

enum Undo {
    RemoveBooking(Uuid),
    Release { key: SlotKey, time: String, units: u32 },
    RestoreCart(Vec<CartItem>),
}

/// Writes apply immediately and are undone in reverse order on rollback or
/// when the transaction is dropped without commit.
pub struct MemoryCheckout {
    store: InMemoryStore,
    customer_id: Uuid,
    undo: Vec<Undo>,
    finished: bool,
}

impl MemoryCheckout {
    fn undo_all(&mut self) {
        let mut state = self.store.state();
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::RemoveBooking(id) => {
                    state.bookings.remove(&id);
                }
                Undo::Release { key, time, units } => {
                    state.decrement(&key, &time, units);
                }
                Undo::RestoreCart(items) => {
                    state.carts.insert(self.customer_id, items);
                }
            }
        }
        self.finished = true;
    }
}

impl Drop for MemoryCheckout {
    fn drop(&mut self) {
        if !self.finished {
            self.undo_all();
        }
    }
}

#[async_trait]
impl CheckoutTransaction for MemoryCheckout {
    async fn has_active_booking(&mut self, customer_id: Uuid, key: &SlotKey, time: &str) -> StoreResult<bool> {
        Ok(self.store.state().has_active(customer_id, key, time).is_some())
    }

    async fn reserve_and_insert(&mut self, booking: &Booking) -> StoreResult<IncrementOutcome> {
        let key = booking.slot_key();
        let mut state = self.store.state();
        let outcome = state.increment(&key, &booking.time, booking.occupancy);
        if let IncrementOutcome::Applied { .. } = outcome {
            if let Err(err) = state.insert_booking(booking) {
                state.decrement(&key, &booking.time, booking.occupancy);
                return Err(err);
            }
            self.undo.push(Undo::Release {
                key,
                time: booking.time.clone(),
                units: booking.occupancy,
            });
            self.undo.push(Undo::RemoveBooking(booking.id));
        }
        Ok(outcome)
    }

    async fn clear_cart(&mut self) -> StoreResult<()> {
        let previous = self.store.state().carts.remove(&self.customer_id).unwrap_or_default();
        self.undo.push(Undo::RestoreCart(previous));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        self.undo.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.undo_all();
        Ok(())
    }
}

/// Mailer double that records summaries and can be switched to fail.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<BookingSummary>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<BookingSummary> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl ConfirmationMailer for RecordingMailer {
    async fn send_booking_confirmation(&self, summary: &BookingSummary) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("smtp relay unavailable".to_string()));
        }
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).push(summary.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEventSink {
    confirmed: Mutex<Vec<BookingConfirmedEvent>>,
    cancelled: Mutex<Vec<BookingCancelledEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirmed(&self) -> Vec<BookingConfirmedEvent> {
        self.confirmed.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn cancelled(&self) -> Vec<BookingCancelledEvent> {
        self.cancelled.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl BookingEventSink for RecordingEventSink {
    async fn booking_confirmed(&self, event: &BookingConfirmedEvent) -> Result<(), NotifyError> {
        self.confirmed.lock().unwrap_or_else(|p| p.into_inner()).push(event.clone());
        Ok(())
    }

    async fn booking_cancelled(&self, event: &BookingCancelledEvent) -> Result<(), NotifyError> {
        self.cancelled.lock().unwrap_or_else(|p| p.into_inner()).push(event.clone());
        Ok(())
    }
}

/// Processor double serving a fixed list of payments.
#[derive(Default)]
pub struct StaticPaymentProcessor {
    payments: Mutex<Vec<ProcessorPayment>>,
}

impl StaticPaymentProcessor {
    pub fn new(payments: Vec<ProcessorPayment>) -> Self {
        Self {
            payments: Mutex::new(payments),
        }
    }

    /// Adds the payment, replacing any earlier one with the same id.
    pub fn push(&self, payment: ProcessorPayment) {
        let mut payments = self.payments.lock().unwrap_or_else(|p| p.into_inner());
        match payments.iter_mut().find(|p| p.id == payment.id) {
            Some(existing) => *existing = payment,
            None => payments.push(payment),
        }
    }
}

#[async_trait]
impl PaymentProcessor for StaticPaymentProcessor {
    async fn list_succeeded_payments(
        &self,
        limit: usize,
    ) -> Result<Vec<ProcessorPayment>, Box<dyn std::error::Error + Send + Sync>> {
        let payments = self.payments.lock().unwrap_or_else(|p| p.into_inner());
        Ok(payments
            .iter()
            .filter(|p| p.status == ProcessorPaymentStatus::Succeeded)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_payment(
        &self,
        payment_id: &str,
    ) -> Result<Option<ProcessorPayment>, Box<dyn std::error::Error + Send + Sync>> {
        let payments = self.payments.lock().unwrap_or_else(|p| p.into_inner());
        Ok(payments.iter().find(|p| p.id == payment_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourline_core::{BookingSource, ContactInfo, PackageCategory, PaymentRecord};

    fn key() -> SlotKey {
        SlotKey {
            package_type: PackageType::Tour,
            package_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        }
    }

    fn document(key: SlotKey, capacity: u32) -> SlotDocument {
        SlotDocument {
            key,
            category: PackageCategory::Shared,
            slots: vec![SlotEntry::new("09:00", capacity, 1)],
        }
    }

    fn booking(key: SlotKey, payment_id: Option<&str>) -> Booking {
        let now = Utc::now();
        Booking {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            package: key.package(),
            date: key.date,
            time: "09:00".into(),
            guests: GuestCount::new(1, 0),
            occupancy: 1,
            contact: ContactInfo {
                name: "Guest".into(),
                email: "guest@example.com".into(),
                phone: None,
            },
            payment: PaymentRecord {
                processor_payment_id: payment_id.map(str::to_string),
                ..PaymentRecord::pending(1000, "EUR")
            },
            status: BookingStatus::Pending,
            source: BookingSource::Cart,
            capacity_committed: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_increment_respects_capacity() {
        let store = InMemoryStore::new();
        let key = key();
        store.put_slot_document(document(key, 2));

        assert!(matches!(
            store.try_increment(&key, "09:00", 2).await.unwrap(),
            IncrementOutcome::Applied { booked_count: 2, capacity: 2 }
        ));
        assert_eq!(
            store.try_increment(&key, "09:00", 1).await.unwrap(),
            IncrementOutcome::Insufficient { available: 0 }
        );
        assert_eq!(store.try_increment(&key, "10:00", 1).await.unwrap(), IncrementOutcome::Missing);
        assert_eq!(store.decrement_floored(&key, "09:00", 5).await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_payment_id_is_unique() {
        let store = InMemoryStore::new();
        let key = key();
        store.insert(&booking(key, Some("pi_1"))).await.unwrap();
        let err = store.insert(&booking(key, Some("pi_1"))).await.unwrap_err();
        assert_eq!(err, StoreError::DuplicatePayment("pi_1".into()));

        // absent payment ids never clash
        store.insert(&booking(key, None)).await.unwrap();
        store.insert(&booking(key, None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_checkout_rollback_restores_everything() {
        let store = InMemoryStore::new();
        let key = key();
        store.put_slot_document(document(key, 3));
        let b = booking(key, None);
        store.put_cart(b.customer_id, vec![]);

        let mut tx = store.begin_checkout(b.customer_id).await.unwrap();
        tx.reserve_and_insert(&b).await.unwrap();
        tx.clear_cart().await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.bookings().is_empty());
        assert_eq!(store.slot_entry(&key, "09:00").unwrap().booked_count, 0);
        assert!(store.load_cart(b.customer_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_checkout_dropped_without_commit_rolls_back() {
        let store = InMemoryStore::new();
        let key = key();
        store.put_slot_document(document(key, 3));
        let b = booking(key, None);
        {
            let mut tx = store.begin_checkout(b.customer_id).await.unwrap();
            tx.reserve_and_insert(&b).await.unwrap();
        }
        assert!(store.bookings().is_empty());
        assert_eq!(store.slot_entry(&key, "09:00").unwrap().booked_count, 0);
    }

    #[tokio::test]
    async fn test_insert_missing_keeps_existing_counts() {
        let store = InMemoryStore::new();
        let key = key();
        store.put_slot_document(document(key, 3));
        store.try_increment(&key, "09:00", 2).await.unwrap();

        let mut regenerated = document(key, 3);
        regenerated.slots.push(SlotEntry::new("14:00", 3, 1));
        let created = store.insert_missing(&[regenerated]).await.unwrap();

        assert_eq!(created, 1);
        assert_eq!(store.slot_entry(&key, "09:00").unwrap().booked_count, 2);
        assert!(store.slot_entry(&key, "14:00").is_some());
    }
}
