use chrono::NaiveDate;
use uuid::Uuid;

pub const BOOKING_CONFIRMED_TOPIC: &str = "booking.confirmed";
pub const BOOKING_CANCELLED_TOPIC: &str = "booking.cancelled";
pub const BOOKING_NOTIFICATION_TOPIC: &str = "notifications.booking_confirmation";

/// How a confirmed booking reached the ledger.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPath {
    Direct,
    Webhook,
    Reconstructed,
    Recovered,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub package_type: String,
    pub package_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub occupancy: u32,
    pub payment_id: Option<String>,
    pub path: ConfirmationPath,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub payment_id: Option<String>,
    pub reason: String,
    pub capacity_released: bool,
    pub timestamp: i64,
}
