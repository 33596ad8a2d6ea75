use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Errors surfaced by repository implementations.
///
/// Only `Transient` is eligible for retry; everything else is final for the
/// attempt that produced it.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Transient store error: {0}")]
    Transient(String),
    #[error("Payment id already attached to a booking: {0}")]
    DuplicatePayment(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Why the availability engine turned a request down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    Blackout,
    Cutoff,
    NoSlot,
    InsufficientCapacity,
    MinimumOccupancyNotMet,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::Blackout => "blackout",
            RejectionReason::Cutoff => "cutoff",
            RejectionReason::NoSlot => "no_slot",
            RejectionReason::InsufficientCapacity => "insufficient_capacity",
            RejectionReason::MinimumOccupancyNotMet => "minimum_occupancy_not_met",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("Date is blacked out for this package type")]
    Blackout,
    #[error("Departure has passed the booking cutoff")]
    Cutoff,
    #[error("No slot exists for the requested date and time")]
    NoSlot,
    #[error("Insufficient capacity: requested {requested}, available {available}")]
    InsufficientCapacity { requested: u32, available: u32 },
    #[error("Minimum occupancy not met: requires {required}, requested {requested}")]
    MinimumOccupancyNotMet { required: u32, requested: u32 },
    #[error("Package not found: {0}")]
    PackageNotFound(String),
    #[error("Duplicate payment: {0}")]
    DuplicatePayment(String),
    #[error("Transient store error: {0}")]
    TransientStore(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Booking not found: {0}")]
    BookingNotFound(Uuid),
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Store error: {0}")]
    Store(String),
    #[error("Payment processor error: {0}")]
    Processor(String),
}

impl BookingError {
    /// Stable machine-readable reason, shared with API clients.
    pub fn reason(&self) -> &'static str {
        match self {
            BookingError::Blackout => "blackout",
            BookingError::Cutoff => "cutoff",
            BookingError::NoSlot => "no_slot",
            BookingError::InsufficientCapacity { .. } => "insufficient_capacity",
            BookingError::MinimumOccupancyNotMet { .. } => "minimum_occupancy_not_met",
            BookingError::PackageNotFound(_) => "package_not_found",
            BookingError::DuplicatePayment(_) => "duplicate_payment",
            BookingError::TransientStore(_) => "transient_store_error",
            BookingError::Validation(_) => "validation_error",
            BookingError::BookingNotFound(_) => "booking_not_found",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::Store(_) => "store_error",
            BookingError::Processor(_) => "processor_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BookingError::TransientStore(_))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => BookingError::TransientStore(msg),
            StoreError::DuplicatePayment(id) => BookingError::DuplicatePayment(id),
            StoreError::NotFound(msg) | StoreError::Permanent(msg) => BookingError::Store(msg),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
