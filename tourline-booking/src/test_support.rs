use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use tourline_core::notify::BookingEventSink;
use tourline_core::payment::{keys, PaymentMetadata, ProcessorPayment, ProcessorPaymentStatus};
use tourline_core::{
    BookingSettings, ContactInfo, FixedClock, GuestCount, Package, PackageCategory, PackageType, SlotDocument,
    SlotEntry, SlotKey,
};
use tourline_store::memory::{RecordingEventSink, RecordingMailer, StaticPaymentProcessor};
use tourline_store::InMemoryStore;

use crate::services::BookingServices;

pub(crate) struct Harness {
    pub store: InMemoryStore,
    pub mailer: Arc<RecordingMailer>,
    pub events: Arc<RecordingEventSink>,
    pub processor: Arc<StaticPaymentProcessor>,
    pub clock: Arc<FixedClock>,
    pub services: BookingServices,
}

/// A date comfortably after the harness clock.
pub(crate) fn trip_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 1).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        let store = InMemoryStore::new();
        let mailer = Arc::new(RecordingMailer::new());
        let events = Arc::new(RecordingEventSink::new());
        let processor = Arc::new(StaticPaymentProcessor::default());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2030, 5, 1, 9, 0, 0).unwrap()));
        let settings = BookingSettings {
            initial_backoff_ms: 1,
            ..BookingSettings::default()
        };
        let services = BookingServices {
            slots: Arc::new(store.clone()),
            bookings: Arc::new(store.clone()),
            catalog: Arc::new(store.clone()),
            blackouts: Arc::new(store.clone()),
            customers: Arc::new(store.clone()),
            carts: Arc::new(store.clone()),
            processor: processor.clone(),
            mailer: mailer.clone(),
            events: events.clone() as Arc<dyn BookingEventSink>,
            clock: clock.clone(),
            settings,
        };
        Self {
            store,
            mailer,
            events,
            processor,
            clock,
            services,
        }
    }

    /// Registers a package with one "09:00" slot on `trip_date()`.
    pub fn package(&self, category: PackageCategory, capacity: u32, minimum: u32) -> Package {
        let package = Package {
            id: Uuid::new_v4(),
            package_type: PackageType::Tour,
            name: "Cappadocia Balloon Flight".to_string(),
            category,
            min_person: minimum,
            max_person: 20,
            slot_capacity: capacity,
            departure_times: vec!["09:00".to_string()],
            pickup: None,
            is_active: true,
        };
        self.store.put_package(package.clone());
        self.store.put_slot_document(SlotDocument {
            key: SlotKey::new(package.reference(), trip_date()),
            category,
            slots: vec![SlotEntry::new("09:00", capacity, minimum)],
        });
        package
    }

    pub fn booked(&self, package: &Package) -> u32 {
        self.store
            .slot_entry(&SlotKey::new(package.reference(), trip_date()), "09:00")
            .map(|e| e.booked_count)
            .unwrap_or_default()
    }
}

pub(crate) fn contact() -> ContactInfo {
    ContactInfo {
        name: "Ayse Demir".to_string(),
        email: "ayse@example.com".into(),
        phone: Some("+90 555 000 0000".to_string()),
    }
}

pub(crate) fn metadata(package: &Package, guests: GuestCount) -> PaymentMetadata {
    let mut m = PaymentMetadata::new();
    m.insert(keys::PLATFORM.into(), "tourline".into());
    m.insert(keys::PACKAGE_TYPE.into(), package.package_type.to_string());
    m.insert(keys::PACKAGE_ID.into(), package.id.to_string());
    m.insert(keys::DATE.into(), trip_date().to_string());
    m.insert(keys::TIME.into(), "09:00".into());
    m.insert(keys::ADULTS.into(), guests.adults.to_string());
    m.insert(keys::CHILDREN.into(), guests.children.to_string());
    m.insert(keys::EMAIL.into(), "ayse@example.com".into());
    m.insert(keys::NAME.into(), "Ayse Demir".into());
    m
}

pub(crate) fn processor_payment(id: &str, metadata: PaymentMetadata) -> ProcessorPayment {
    ProcessorPayment {
        id: id.to_string(),
        amount_cents: 10_300,
        currency: "EUR".to_string(),
        status: ProcessorPaymentStatus::Succeeded,
        metadata,
        created_at: Utc::now(),
    }
}
