use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use tourline_core::package::PickupDefaults;
use tourline_core::repository::{BlackoutRegistry, PackageCatalog};
use tourline_core::{Package, PackageRef, PackageType, StoreError, StoreResult};

use crate::database::{classify, decode};

/// Read side of the catalog plus the aggregate booking counter.
pub struct PgPackageCatalog {
    pool: PgPool,
}

impl PgPackageCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PackageRow {
    id: Uuid,
    package_type: String,
    name: String,
    category: String,
    min_person: i32,
    max_person: i32,
    slot_capacity: i32,
    departure_times: Vec<String>,
    pickup_location: Option<String>,
    pickup_minutes_before: Option<i32>,
    is_active: bool,
}

impl TryFrom<PackageRow> for Package {
    type Error = StoreError;

    fn try_from(row: PackageRow) -> Result<Self, Self::Error> {
        let pickup = row.pickup_location.map(|location| PickupDefaults {
            location,
            minutes_before_departure: row.pickup_minutes_before.unwrap_or(0).max(0) as u32,
        });
        Ok(Package {
            id: row.id,
            package_type: decode(&row.package_type)?,
            name: row.name,
            category: decode(&row.category)?,
            min_person: row.min_person as u32,
            max_person: row.max_person as u32,
            slot_capacity: row.slot_capacity as u32,
            departure_times: row.departure_times,
            pickup,
            is_active: row.is_active,
        })
    }
}

const PACKAGE_COLUMNS: &str = "id, package_type, name, category, min_person, max_person, slot_capacity, \
    departure_times, pickup_location, pickup_minutes_before, is_active";

#[async_trait]
impl PackageCatalog for PgPackageCatalog {
    async fn get_package(&self, package: &PackageRef) -> StoreResult<Option<Package>> {
        let row = sqlx::query_as::<_, PackageRow>(&format!(
            "SELECT {} FROM packages WHERE id = $1 AND package_type = $2",
            PACKAGE_COLUMNS
        ))
        .bind(package.package_id)
        .bind(package.package_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        row.map(Package::try_from).transpose()
    }

    async fn list_active_packages(&self) -> StoreResult<Vec<Package>> {
        let rows = sqlx::query_as::<_, PackageRow>(&format!(
            "SELECT {} FROM packages WHERE is_active ORDER BY created_at",
            PACKAGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        rows.into_iter().map(Package::try_from).collect()
    }

    async fn adjust_booking_counter(&self, package: &PackageRef, delta: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE packages SET booking_count = GREATEST(booking_count + $3, 0), updated_at = NOW() \
             WHERE id = $1 AND package_type = $2",
        )
        .bind(package.package_id)
        .bind(package.package_type.as_str())
        .bind(delta)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }
}

pub struct PgBlackoutRegistry {
    pool: PgPool,
}

impl PgBlackoutRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BlackoutRegistry for PgBlackoutRegistry {
    async fn is_blacked_out(&self, date: NaiveDate, package_type: PackageType) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM blackout_dates \
             WHERE blackout_date = $1 AND (package_type IS NULL OR package_type = $2))",
        )
        .bind(date)
        .bind(package_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }
}
