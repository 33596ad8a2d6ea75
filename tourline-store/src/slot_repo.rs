use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use tourline_core::repository::SlotRepository;
use tourline_core::{IncrementOutcome, PackageRef, SlotDocument, SlotEntry, SlotKey, StoreResult};

use crate::database::{classify, decode};

pub struct PgSlotRepository {
    pool: PgPool,
}

impl PgSlotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SlotRow {
    slot_time: String,
    category: String,
    capacity: i32,
    booked_count: i32,
    min_occupancy: i32,
}

#[derive(sqlx::FromRow)]
struct CountRow {
    booked_count: i32,
    capacity: i32,
}

/// Conditional add on one entry. Runs on any connection so the cart checkout
/// can reuse it inside its savepoints.
pub(crate) async fn increment_on(
    conn: &mut PgConnection,
    key: &SlotKey,
    time: &str,
    units: u32,
) -> StoreResult<IncrementOutcome> {
    let applied = sqlx::query_as::<_, CountRow>(
        r#"
        UPDATE slot_entries
        SET booked_count = booked_count + $5
        WHERE package_type = $1 AND package_id = $2 AND slot_date = $3 AND slot_time = $4
          AND booked_count + $5 <= capacity
        RETURNING booked_count, capacity
        "#,
    )
    .bind(key.package_type.as_str())
    .bind(key.package_id)
    .bind(key.date)
    .bind(time)
    .bind(units as i32)
    .fetch_optional(&mut *conn)
    .await
    .map_err(classify)?;

    if let Some(row) = applied {
        return Ok(IncrementOutcome::Applied {
            booked_count: row.booked_count as u32,
            capacity: row.capacity as u32,
        });
    }

    // The update matched nothing: tell a full entry apart from a missing one.
    let current = sqlx::query_as::<_, CountRow>(
        r#"
        SELECT booked_count, capacity FROM slot_entries
        WHERE package_type = $1 AND package_id = $2 AND slot_date = $3 AND slot_time = $4
        "#,
    )
    .bind(key.package_type.as_str())
    .bind(key.package_id)
    .bind(key.date)
    .bind(time)
    .fetch_optional(&mut *conn)
    .await
    .map_err(classify)?;

    Ok(match current {
        Some(row) => IncrementOutcome::Insufficient {
            available: (row.capacity - row.booked_count).max(0) as u32,
        },
        None => IncrementOutcome::Missing,
    })
}

#[async_trait]
impl SlotRepository for PgSlotRepository {
    async fn get_document(&self, key: &SlotKey) -> StoreResult<Option<SlotDocument>> {
        let rows = sqlx::query_as::<_, SlotRow>(
            r#"
            SELECT slot_time, category, capacity, booked_count, min_occupancy
            FROM slot_entries
            WHERE package_type = $1 AND package_id = $2 AND slot_date = $3
            ORDER BY slot_time
            "#,
        )
        .bind(key.package_type.as_str())
        .bind(key.package_id)
        .bind(key.date)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let category = match rows.first() {
            Some(row) => decode(&row.category)?,
            None => return Ok(None),
        };
        let slots = rows
            .into_iter()
            .map(|row| SlotEntry {
                time: row.slot_time,
                capacity: row.capacity as u32,
                booked_count: row.booked_count as u32,
                min_occupancy: row.min_occupancy as u32,
            })
            .collect();

        Ok(Some(SlotDocument {
            key: *key,
            category,
            slots,
        }))
    }

    async fn try_increment(&self, key: &SlotKey, time: &str, units: u32) -> StoreResult<IncrementOutcome> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        increment_on(&mut conn, key, time, units).await
    }

    async fn decrement_floored(&self, key: &SlotKey, time: &str, units: u32) -> StoreResult<Option<u32>> {
        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE slot_entries
            SET booked_count = GREATEST(booked_count - $5, 0)
            WHERE package_type = $1 AND package_id = $2 AND slot_date = $3 AND slot_time = $4
            RETURNING booked_count
            "#,
        )
        .bind(key.package_type.as_str())
        .bind(key.package_id)
        .bind(key.date)
        .bind(time)
        .bind(units as i32)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        Ok(remaining.map(|count| count as u32))
    }

    async fn insert_missing(&self, documents: &[SlotDocument]) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut created = 0;
        for doc in documents {
            for entry in &doc.slots {
                let result = sqlx::query(
                    r#"
                    INSERT INTO slot_entries
                        (package_type, package_id, slot_date, slot_time, category, capacity, booked_count, min_occupancy)
                    VALUES ($1, $2, $3, $4, $5, $6, 0, $7)
                    ON CONFLICT (package_type, package_id, slot_date, slot_time) DO NOTHING
                    "#,
                )
                .bind(doc.key.package_type.as_str())
                .bind(doc.key.package_id)
                .bind(doc.key.date)
                .bind(&entry.time)
                .bind(doc.category.as_str())
                .bind(entry.capacity as i32)
                .bind(entry.min_occupancy as i32)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
                created += result.rows_affected() as usize;
            }
        }
        tx.commit().await.map_err(classify)?;
        Ok(created)
    }

    async fn latest_date(&self, package: &PackageRef) -> StoreResult<Option<NaiveDate>> {
        sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MAX(slot_date) FROM slot_entries WHERE package_type = $1 AND package_id = $2",
        )
        .bind(package.package_type.as_str())
        .bind(package.package_id)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)
    }

    async fn delete_for_package(&self, package: &PackageRef) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM slot_entries WHERE package_type = $1 AND package_id = $2")
            .bind(package.package_type.as_str())
            .bind(package.package_id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected())
    }
}
