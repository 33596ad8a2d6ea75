use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::GuestCount;
use crate::package::PackageRef;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CartItem {
    pub id: Uuid,
    pub package: PackageRef,
    pub date: NaiveDate,
    pub time: String,
    pub guests: GuestCount,
    /// Item price before the processing fee, in minor units.
    pub price_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Cart {
    pub customer_id: Uuid,
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
