use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Connection, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use tourline_core::cart::{Cart, CartItem};
use tourline_core::repository::{CartRepository, CheckoutTransaction};
use tourline_core::{Booking, GuestCount, IncrementOutcome, PackageRef, SlotKey, StoreResult};

use crate::booking_repo::{find_active_on, insert_on};
use crate::database::{classify, decode};
use crate::slot_repo::increment_on;

pub struct PgCartRepository {
    pool: PgPool,
}

impl PgCartRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CartItemRow {
    id: Uuid,
    package_type: String,
    package_id: Uuid,
    item_date: NaiveDate,
    item_time: String,
    adults: i32,
    children: i32,
    price_cents: i64,
    currency: String,
}

#[async_trait]
impl CartRepository for PgCartRepository {
    async fn load_cart(&self, customer_id: Uuid) -> StoreResult<Option<Cart>> {
        let rows = sqlx::query_as::<_, CartItemRow>(
            r#"
            SELECT id, package_type, package_id, item_date, item_time, adults, children, price_cents, currency
            FROM cart_items
            WHERE customer_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        if rows.is_empty() {
            return Ok(None);
        }
        let items = rows
            .into_iter()
            .map(|row| {
                Ok(CartItem {
                    id: row.id,
                    package: PackageRef::new(decode(&row.package_type)?, row.package_id),
                    date: row.item_date,
                    time: row.item_time,
                    guests: GuestCount::new(row.adults as u32, row.children as u32),
                    price_cents: row.price_cents,
                    currency: row.currency,
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(Some(Cart { customer_id, items }))
    }

    async fn begin_checkout(&self, customer_id: Uuid) -> StoreResult<Box<dyn CheckoutTransaction>> {
        let tx = self.pool.begin().await.map_err(classify)?;
        Ok(Box::new(PgCheckout { tx, customer_id }))
    }
}

/// One database transaction spanning the whole checkout. Each item's
/// reservation runs inside its own savepoint.
pub struct PgCheckout {
    tx: Transaction<'static, Postgres>,
    customer_id: Uuid,
}

#[async_trait]
impl CheckoutTransaction for PgCheckout {
    async fn has_active_booking(&mut self, customer_id: Uuid, key: &SlotKey, time: &str) -> StoreResult<bool> {
        Ok(find_active_on(&mut self.tx, customer_id, key, time).await?.is_some())
    }

    async fn reserve_and_insert(&mut self, booking: &Booking) -> StoreResult<IncrementOutcome> {
        let mut savepoint = Connection::begin(&mut *self.tx).await.map_err(classify)?;

        let outcome = increment_on(&mut savepoint, &booking.slot_key(), &booking.time, booking.occupancy).await?;
        if !matches!(outcome, IncrementOutcome::Applied { .. }) {
            savepoint.rollback().await.map_err(classify)?;
            return Ok(outcome);
        }

        if let Err(err) = insert_on(&mut savepoint, booking).await {
            debug!("Rolling back savepoint for booking {}: {}", booking.id, err);
            savepoint.rollback().await.map_err(classify)?;
            return Err(err);
        }
        savepoint.commit().await.map_err(classify)?;
        Ok(outcome)
    }

    async fn clear_cart(&mut self) -> StoreResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE customer_id = $1")
            .bind(self.customer_id)
            .execute(&mut *self.tx)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgCheckout { tx, .. } = *self;
        tx.commit().await.map_err(classify)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let PgCheckout { tx, .. } = *self;
        tx.rollback().await.map_err(classify)
    }
}
