use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use tourline_booking::CreateBookingRequest;
use tourline_catalog::{Availability, AvailabilityQuery};
use tourline_core::{Booking, BookingSource, ContactInfo, GuestCount, PackageRef, PackageType, PaymentRecord};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub package_type: PackageType,
    pub package_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
}

#[derive(Debug, Deserialize)]
pub struct ContactPayload {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl From<ContactPayload> for ContactInfo {
    fn from(payload: ContactPayload) -> Self {
        ContactInfo {
            name: payload.name,
            email: payload.email.into(),
            phone: payload.phone,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewBookingPayload {
    pub package_type: PackageType,
    pub package_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    pub contact: ContactPayload,
    /// Item price before the processing fee, in minor units.
    pub price_cents: i64,
    pub currency: Option<String>,
    /// Payment intent opened by the client for this booking, if any.
    pub payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GuestsPayload {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/availability", get(check_availability))
        .route("/v1/bookings", post(create_booking))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/guests", patch(update_guests))
}

/// GET /v1/availability
async fn check_availability(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<Availability>, AppError> {
    let query = AvailabilityQuery {
        package: PackageRef::new(params.package_type, params.package_id),
        date: params.date,
        time: params.time,
        guests: GuestCount::new(params.adults, params.children),
    };
    let availability = state
        .services
        .availability()
        .check(&query, state.services.settings.public_cutoff())
        .await?;
    Ok(Json(availability))
}

/// POST /v1/bookings
///
/// Self-service booking: created pending, under the public lead time.
async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<NewBookingPayload>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    if payload.price_cents < 0 {
        return Err(AppError::BadRequest("price_cents must not be negative".to_string()));
    }
    let settings = &state.services.settings;
    let currency = payload.currency.unwrap_or_else(|| settings.currency.clone());
    let payment = PaymentRecord {
        processor_payment_id: payload.payment_id,
        ..PaymentRecord::pending(settings.charge_with_fee(payload.price_cents), currency)
    };

    let booking = state
        .ledger()
        .create(CreateBookingRequest {
            package: PackageRef::new(payload.package_type, payload.package_id),
            date: payload.date,
            time: payload.time,
            guests: GuestCount::new(payload.adults, payload.children),
            contact: payload.contact.into(),
            payment,
            source: BookingSource::Direct,
            cutoff: settings.public_cutoff(),
        })
        .await?;

    info!("Public booking {} created", booking.id);
    Ok((StatusCode::CREATED, Json(booking)))
}

/// GET /v1/bookings/{id}
async fn get_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.ledger().get(id).await?))
}

/// PATCH /v1/bookings/{id}/guests
async fn update_guests(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<GuestsPayload>,
) -> Result<Json<Booking>, AppError> {
    let booking = state
        .ledger()
        .update_guests(id, GuestCount::new(payload.adults, payload.children))
        .await?;
    Ok(Json(booking))
}
