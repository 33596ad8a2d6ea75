use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::BookingError;
use crate::package::{PackageCategory, PackageRef, PackageType};
use uuid::Uuid;

/// Identifies one slot document: a package on a local calendar date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub package_type: PackageType,
    pub package_id: Uuid,
    pub date: NaiveDate,
}

impl SlotKey {
    pub fn new(package: PackageRef, date: NaiveDate) -> Self {
        Self {
            package_type: package.package_type,
            package_id: package.package_id,
            date,
        }
    }

    pub fn package(&self) -> PackageRef {
        PackageRef::new(self.package_type, self.package_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotEntry {
    /// Departure label, `HH:MM`.
    pub time: String,
    pub capacity: u32,
    pub booked_count: u32,
    pub min_occupancy: u32,
}

impl SlotEntry {
    pub fn new(time: impl Into<String>, capacity: u32, min_occupancy: u32) -> Self {
        Self {
            time: time.into(),
            capacity,
            booked_count: 0,
            min_occupancy: min_occupancy.max(1),
        }
    }

    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.booked_count)
    }

    /// Minimum party size a new booking must bring to this departure.
    ///
    /// The first booking on a shared departure has to reach the configured
    /// minimum; later joiners may book singly. Private departures always
    /// demand the full minimum.
    pub fn current_minimum(&self, category: PackageCategory) -> u32 {
        match category {
            PackageCategory::Private => self.min_occupancy,
            PackageCategory::Shared if self.booked_count == 0 => self.min_occupancy,
            PackageCategory::Shared => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotDocument {
    pub key: SlotKey,
    pub category: PackageCategory,
    pub slots: Vec<SlotEntry>,
}

impl SlotDocument {
    pub fn entry(&self, time: &str) -> Option<&SlotEntry> {
        self.slots.iter().find(|s| s.time == time)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Add,
    Subtract,
}

/// Result of an atomic conditional increment on one slot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    Applied { booked_count: u32, capacity: u32 },
    Insufficient { available: u32 },
    Missing,
}

/// Parses and normalises a departure label to `HH:MM`.
pub fn normalize_time_label(label: &str) -> Result<String, BookingError> {
    let trimmed = label.trim();
    let time = NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map_err(|_| BookingError::Validation(format!("invalid time label: {}", label)))?;
    Ok(time.format("%H:%M").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_minimum_shared_drops_after_first_booking() {
        let mut entry = SlotEntry::new("09:00", 10, 2);
        assert_eq!(entry.current_minimum(PackageCategory::Shared), 2);

        entry.booked_count = 2;
        assert_eq!(entry.current_minimum(PackageCategory::Shared), 1);
    }

    #[test]
    fn test_current_minimum_private_never_drops() {
        let mut entry = SlotEntry::new("09:00", 3, 4);
        entry.booked_count = 1;
        assert_eq!(entry.current_minimum(PackageCategory::Private), 4);
    }

    #[test]
    fn test_min_occupancy_floor_is_one() {
        let entry = SlotEntry::new("09:00", 3, 0);
        assert_eq!(entry.min_occupancy, 1);
    }

    #[test]
    fn test_normalize_time_label() {
        assert_eq!(normalize_time_label(" 09:05 ").unwrap(), "09:05");
        assert_eq!(normalize_time_label("14:30:00").unwrap(), "14:30");
        assert!(normalize_time_label("noon").is_err());
    }
}
