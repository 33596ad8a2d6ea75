use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use tourline_booking::{
    BatchRecoveryReport, CreateBookingRequest, JobReport, JobTrigger, OrphanedPayment, SuccessOutcome,
};
use tourline_core::booking::PaymentSuccess;
use tourline_core::{Booking, BookingSource, CutoffPolicy, GuestCount, PackageRef, PackageType, PaymentRecord, PaymentStatus};

use crate::bookings::ContactPayload;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AdminBookingPayload {
    pub package_type: PackageType,
    pub package_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    pub contact: ContactPayload,
    pub amount_cents: i64,
    pub currency: Option<String>,
    /// Marks the payment as already collected; the booking is created confirmed.
    #[serde(default)]
    pub paid: bool,
    pub payment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentPayload {
    pub payment_id: String,
    pub amount_cents: i64,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRecoveryPayload {
    /// Every current orphan when omitted.
    #[serde(default)]
    pub payment_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct OrphanScanResponse {
    pub count: usize,
    pub orphans: Vec<OrphanedPayment>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/bookings", post(create_booking))
        .route("/v1/admin/bookings/{id}", delete(delete_booking))
        .route("/v1/admin/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/admin/bookings/{id}/confirm-payment", post(confirm_payment))
        .route("/v1/admin/payments/orphans", get(scan_orphans))
        .route("/v1/admin/payments/recover", post(recover_batch))
        .route("/v1/admin/payments/{payment_id}/recover", post(recover_payment))
        .route("/v1/admin/jobs/slot-horizon", post(run_slot_horizon))
        .route("/v1/admin/jobs/completion-sweep", post(run_completion_sweep))
        .route(
            "/v1/admin/packages/{package_type}/{package_id}/slot-horizon",
            post(run_package_horizon),
        )
}

/// POST /v1/admin/bookings
///
/// Bookable right up to departure, unlike the public flow.
async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<AdminBookingPayload>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let currency = payload
        .currency
        .unwrap_or_else(|| state.services.settings.currency.clone());
    let mut payment = PaymentRecord {
        processor_payment_id: payload.payment_id,
        ..PaymentRecord::pending(payload.amount_cents, currency)
    };
    if payload.paid {
        payment.status = PaymentStatus::Succeeded;
        payment.reconciled_at = Some(state.services.clock.now());
    }

    let booking = state
        .ledger()
        .create(CreateBookingRequest {
            package: PackageRef::new(payload.package_type, payload.package_id),
            date: payload.date,
            time: payload.time,
            guests: GuestCount::new(payload.adults, payload.children),
            contact: payload.contact.into(),
            payment,
            source: BookingSource::Admin,
            cutoff: CutoffPolicy::Departure,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// DELETE /v1/admin/bookings/{id}
async fn delete_booking(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode, AppError> {
    state.ledger().delete(id).await?;
    info!("Admin deleted booking {}", id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/admin/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelPayload>,
) -> Result<Json<Booking>, AppError> {
    let reason = payload.reason.unwrap_or_else(|| "cancelled_by_admin".to_string());
    Ok(Json(state.ledger().cancel(id, &reason).await?))
}

/// POST /v1/admin/bookings/{id}/confirm-payment
async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ConfirmPaymentPayload>,
) -> Result<Json<Booking>, AppError> {
    let success = PaymentSuccess {
        payment_id: payload.payment_id,
        session_id: None,
        amount_cents: payload.amount_cents,
        currency: payload
            .currency
            .unwrap_or_else(|| state.services.settings.currency.clone()),
        reconciled_at: state.services.clock.now(),
    };
    Ok(Json(state.ledger().confirm_payment(id, success).await?))
}

/// GET /v1/admin/payments/orphans
async fn scan_orphans(State(state): State<AppState>) -> Result<Json<OrphanScanResponse>, AppError> {
    let orphans = state.reconciliation().scan_orphans().await?;
    Ok(Json(OrphanScanResponse {
        count: orphans.len(),
        orphans,
    }))
}

/// POST /v1/admin/payments/{payment_id}/recover
async fn recover_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<Json<SuccessOutcome>, AppError> {
    Ok(Json(state.reconciliation().recover_payment(&payment_id).await?))
}

/// POST /v1/admin/payments/recover
async fn recover_batch(
    State(state): State<AppState>,
    Json(payload): Json<BatchRecoveryPayload>,
) -> Result<Json<BatchRecoveryReport>, AppError> {
    Ok(Json(state.reconciliation().recover_batch(payload.payment_ids).await?))
}

/// POST /v1/admin/jobs/slot-horizon
async fn run_slot_horizon(State(state): State<AppState>) -> Result<Json<JobReport>, AppError> {
    Ok(Json(state.jobs().run_job(JobTrigger::SlotHorizon).await?))
}

/// POST /v1/admin/jobs/completion-sweep
async fn run_completion_sweep(State(state): State<AppState>) -> Result<Json<JobReport>, AppError> {
    Ok(Json(state.jobs().run_job(JobTrigger::CompletionSweep).await?))
}

/// POST /v1/admin/packages/{package_type}/{package_id}/slot-horizon
async fn run_package_horizon(
    State(state): State<AppState>,
    Path((package_type, package_id)): Path<(PackageType, Uuid)>,
) -> Result<Json<JobReport>, AppError> {
    let trigger = JobTrigger::PackageHorizon {
        package: PackageRef::new(package_type, package_id),
    };
    Ok(Json(state.jobs().run_job(trigger).await?))
}
