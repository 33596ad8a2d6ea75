use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tourline_core::BookingError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Booking(err) => match err {
                BookingError::Validation(_) => StatusCode::BAD_REQUEST,
                BookingError::Blackout | BookingError::Cutoff | BookingError::MinimumOccupancyNotMet { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                BookingError::InsufficientCapacity { .. }
                | BookingError::DuplicatePayment(_)
                | BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
                BookingError::NoSlot | BookingError::PackageNotFound(_) | BookingError::BookingNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                BookingError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
                BookingError::Processor(_) => StatusCode::BAD_GATEWAY,
                BookingError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            AppError::Booking(err) => err.reason(),
            AppError::Authentication(_) => "unauthorized",
            AppError::BadRequest(_) => "validation_error",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!("Request failed ({}): {}", status, self);
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Temporarily unavailable, retry later".to_string(),
                StatusCode::BAD_GATEWAY => "Payment processor unavailable".to_string(),
                _ => "Internal Server Error".to_string(),
            }
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": message,
            "reason": self.reason(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_rejections_map_to_client_errors() {
        let err = AppError::from(BookingError::InsufficientCapacity {
            requested: 3,
            available: 1,
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.reason(), "insufficient_capacity");

        assert_eq!(AppError::from(BookingError::Cutoff).status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(AppError::from(BookingError::NoSlot).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_failures_hide_details() {
        let response = AppError::from(BookingError::Store("relation does not exist".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = AppError::from(BookingError::TransientStore("pool timed out".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.reason(), "transient_store_error");
    }
}
