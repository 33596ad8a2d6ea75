use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::booking::GuestCount;

/// Kind of bookable package. Blackouts are declared per package type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Tour,
    Transfer,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Tour => "tour",
            PackageType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tour" => Ok(PackageType::Tour),
            "transfer" => Ok(PackageType::Transfer),
            other => Err(format!("unknown package type: {}", other)),
        }
    }
}

/// Shared departures sell seats; private departures sell whole vehicles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PackageCategory {
    Shared,
    Private,
}

impl PackageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageCategory::Shared => "shared",
            PackageCategory::Private => "private",
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, PackageCategory::Private)
    }
}

impl FromStr for PackageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "shared" => Ok(PackageCategory::Shared),
            "private" => Ok(PackageCategory::Private),
            other => Err(format!("unknown package category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PackageRef {
    pub package_type: PackageType,
    pub package_id: Uuid,
}

impl PackageRef {
    pub fn new(package_type: PackageType, package_id: Uuid) -> Self {
        Self { package_type, package_id }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.package_type, self.package_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PickupDefaults {
    pub location: String,
    pub minutes_before_departure: u32,
}

/// The slice of the catalog record the booking core depends on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
    pub id: Uuid,
    pub package_type: PackageType,
    pub name: String,
    pub category: PackageCategory,
    pub min_person: u32,
    pub max_person: u32,
    /// Capacity of each generated slot: seats for shared, vehicles for private.
    pub slot_capacity: u32,
    /// Departure labels in `HH:MM`, local to the business timezone.
    pub departure_times: Vec<String>,
    pub pickup: Option<PickupDefaults>,
    pub is_active: bool,
}

impl Package {
    pub fn reference(&self) -> PackageRef {
        PackageRef::new(self.package_type, self.id)
    }

    /// Capacity units a party consumes on one of this package's slots.
    pub fn occupancy_for(&self, guests: &GuestCount) -> u32 {
        occupancy_units(self.category, guests)
    }
}

pub fn occupancy_units(category: PackageCategory, guests: &GuestCount) -> u32 {
    match category {
        PackageCategory::Private => 1,
        PackageCategory::Shared => guests.total(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_party_consumes_one_unit() {
        let guests = GuestCount { adults: 4, children: 2 };
        assert_eq!(occupancy_units(PackageCategory::Private, &guests), 1);
        assert_eq!(occupancy_units(PackageCategory::Shared, &guests), 6);
    }

    #[test]
    fn test_package_type_parsing() {
        assert_eq!("Tour".parse::<PackageType>().unwrap(), PackageType::Tour);
        assert_eq!("transfer".parse::<PackageType>().unwrap(), PackageType::Transfer);
        assert!("blog".parse::<PackageType>().is_err());
    }
}
