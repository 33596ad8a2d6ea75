pub mod booking;
pub mod cart;
pub mod clock;
pub mod error;
pub mod identity;
pub mod notify;
pub mod package;
pub mod payment;
pub mod repository;
pub mod retry;
pub mod settings;
pub mod slot;

pub use booking::{
    Booking, BookingSource, BookingStatus, ContactInfo, GuestCount, PaymentRecord, PaymentStatus,
};
pub use clock::{BusinessCalendar, Clock, FixedClock, SystemClock};
pub use error::{BookingError, BookingResult, RejectionReason, StoreError, StoreResult};
pub use package::{Package, PackageCategory, PackageRef, PackageType};
pub use settings::{BookingSettings, CutoffPolicy};
pub use slot::{Direction, IncrementOutcome, SlotDocument, SlotEntry, SlotKey};
