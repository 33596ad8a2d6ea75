use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use tourline_core::booking::PaymentSuccess;
use tourline_core::repository::BookingRepository;
use tourline_core::{
    Booking, BookingStatus, ContactInfo, GuestCount, PackageRef, PaymentRecord, SlotKey, StoreError, StoreResult,
};

use crate::database::{classify, decode};

pub(crate) const BOOKING_COLUMNS: &str = "id, customer_id, package_type, package_id, booking_date, booking_time, \
    adults, children, occupancy, contact_name, contact_email, contact_phone, payment_id, session_id, \
    payment_status, amount_cents, currency, failure_reason, reconciled_at, status, source, \
    capacity_committed, created_at, updated_at";

#[derive(sqlx::FromRow)]
pub(crate) struct BookingRow {
    id: Uuid,
    customer_id: Uuid,
    package_type: String,
    package_id: Uuid,
    booking_date: NaiveDate,
    booking_time: String,
    adults: i32,
    children: i32,
    occupancy: i32,
    contact_name: String,
    contact_email: String,
    contact_phone: Option<String>,
    payment_id: Option<String>,
    session_id: Option<String>,
    payment_status: String,
    amount_cents: i64,
    currency: String,
    failure_reason: Option<String>,
    reconciled_at: Option<DateTime<Utc>>,
    status: String,
    source: String,
    capacity_committed: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Booking {
            id: row.id,
            customer_id: row.customer_id,
            package: PackageRef::new(decode(&row.package_type)?, row.package_id),
            date: row.booking_date,
            time: row.booking_time,
            guests: GuestCount::new(row.adults as u32, row.children as u32),
            occupancy: row.occupancy as u32,
            contact: ContactInfo {
                name: row.contact_name,
                email: row.contact_email.into(),
                phone: row.contact_phone,
            },
            payment: PaymentRecord {
                processor_payment_id: row.payment_id,
                session_id: row.session_id,
                status: decode(&row.payment_status)?,
                amount_cents: row.amount_cents,
                currency: row.currency,
                failure_reason: row.failure_reason,
                reconciled_at: row.reconciled_at,
            },
            status: decode(&row.status)?,
            source: decode(&row.source)?,
            capacity_committed: row.capacity_committed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_booking(row: Option<BookingRow>) -> StoreResult<Option<Booking>> {
    row.map(Booking::try_from).transpose()
}

pub(crate) async fn insert_on(conn: &mut PgConnection, booking: &Booking) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO bookings (
            id, customer_id, package_type, package_id, booking_date, booking_time,
            adults, children, occupancy, contact_name, contact_email, contact_phone,
            payment_id, session_id, payment_status, amount_cents, currency, failure_reason,
            reconciled_at, status, source, capacity_committed, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
        "#,
    )
    .bind(booking.id)
    .bind(booking.customer_id)
    .bind(booking.package.package_type.as_str())
    .bind(booking.package.package_id)
    .bind(booking.date)
    .bind(&booking.time)
    .bind(booking.guests.adults as i32)
    .bind(booking.guests.children as i32)
    .bind(booking.occupancy as i32)
    .bind(&booking.contact.name)
    .bind(booking.contact.email.expose())
    .bind(&booking.contact.phone)
    .bind(&booking.payment.processor_payment_id)
    .bind(&booking.payment.session_id)
    .bind(booking.payment.status.as_str())
    .bind(booking.payment.amount_cents)
    .bind(&booking.payment.currency)
    .bind(&booking.payment.failure_reason)
    .bind(booking.payment.reconciled_at)
    .bind(booking.status.as_str())
    .bind(booking.source.as_str())
    .bind(booking.capacity_committed)
    .bind(booking.created_at)
    .bind(booking.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(classify)?;
    Ok(())
}

pub(crate) async fn find_active_on(
    conn: &mut PgConnection,
    customer_id: Uuid,
    key: &SlotKey,
    time: &str,
) -> StoreResult<Option<Booking>> {
    let row = sqlx::query_as::<_, BookingRow>(&format!(
        "SELECT {} FROM bookings \
         WHERE customer_id = $1 AND package_type = $2 AND package_id = $3 \
           AND booking_date = $4 AND booking_time = $5 AND status IN ('pending', 'confirmed') \
         LIMIT 1",
        BOOKING_COLUMNS
    ))
    .bind(customer_id)
    .bind(key.package_type.as_str())
    .bind(key.package_id)
    .bind(key.date)
    .bind(time)
    .fetch_optional(&mut *conn)
    .await
    .map_err(classify)?;
    into_booking(row)
}

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, predicate: &str, value: &str) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE {} = $1 LIMIT 1",
            BOOKING_COLUMNS, predicate
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        into_booking(row)
    }
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        insert_on(&mut conn, booking).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        into_booking(row)
    }

    async fn find_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<Booking>> {
        self.find_one("payment_id", payment_id).await
    }

    async fn find_by_session_id(&self, session_id: &str) -> StoreResult<Option<Booking>> {
        self.find_one("session_id", session_id).await
    }

    async fn find_active_for_slot(
        &self,
        customer_id: Uuid,
        key: &SlotKey,
        time: &str,
    ) -> StoreResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await.map_err(classify)?;
        find_active_on(&mut conn, customer_id, key, time).await
    }

    async fn mark_payment_succeeded(&self, id: Uuid, success: &PaymentSuccess) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET payment_status = 'succeeded',
                payment_id = $2,
                session_id = COALESCE($3, session_id),
                amount_cents = $4,
                currency = $5,
                failure_reason = NULL,
                reconciled_at = $6,
                status = CASE WHEN status = 'completed' THEN status ELSE 'confirmed' END,
                updated_at = NOW()
            WHERE id = $1 AND payment_status <> 'succeeded'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(&success.payment_id)
        .bind(&success.session_id)
        .bind(success.amount_cents)
        .bind(&success.currency)
        .bind(success.reconciled_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        into_booking(row)
    }

    async fn mark_payment_failed(
        &self,
        id: Uuid,
        payment_id: Option<&str>,
        reason: &str,
    ) -> StoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET payment_status = 'failed',
                payment_id = COALESCE(payment_id, $2),
                failure_reason = $3,
                status = 'cancelled',
                updated_at = NOW()
            WHERE id = $1 AND payment_status <> 'succeeded' AND status IN ('pending', 'confirmed')
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(payment_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        into_booking(row)
    }

    async fn update_status(&self, id: Uuid, from: BookingStatus, to: BookingStatus) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE bookings SET status = $3, updated_at = NOW() WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_guests(&self, id: Uuid, guests: GuestCount, occupancy: u32) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE bookings SET adults = $2, children = $3, occupancy = $4, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(guests.adults as i32)
        .bind(guests.children as i32)
        .bind(occupancy as i32)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_capacity_committed(&self, id: Uuid, committed: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE bookings SET capacity_committed = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(committed)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("booking {}", id)));
        }
        Ok(())
    }

    async fn complete_elapsed(&self, before: NaiveDate) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE bookings SET status = 'completed', updated_at = NOW() \
             WHERE status = 'confirmed' AND booking_date < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(result.rows_affected() == 1)
    }
}
