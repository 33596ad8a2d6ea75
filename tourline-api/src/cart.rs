use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use tourline_booking::CheckoutReport;

use crate::bookings::ContactPayload;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutPayload {
    /// Identifies the customer whose cart is checked out.
    pub email: String,
    pub contact: ContactPayload,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/cart/checkout", post(checkout))
}

/// POST /v1/cart/checkout
///
/// Per-item problems come back inside the report; only an unknown customer
/// or an empty cart is an error response.
async fn checkout(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutPayload>,
) -> Result<Json<CheckoutReport>, AppError> {
    let report = state
        .checkout()
        .book_cart_items(&payload.email, payload.contact.into())
        .await?;
    Ok(Json(report))
}
