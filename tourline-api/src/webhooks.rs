//! Payment processor webhooks.
//!
//! The processor retries any delivery that is not answered with 2xx, and the
//! reconciliation pipeline is idempotent, so every delivery is acknowledged
//! with 200. Failures are logged with the payment id for orphan recovery.
//!
//! The body only names the payment. The pipeline re-reads it from the
//! processor before touching a booking, so a forged delivery is a no-op.

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use tourline_booking::{linked_booking_id, PaymentFailed, PaymentSucceeded};
use tourline_core::payment::PaymentMetadata;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentObject {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub metadata: PaymentMetadata,
    pub last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentErrorObject {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub payment_intent: Option<String>,
    pub payment_status: Option<String>,
    #[serde(default)]
    pub amount_total: i64,
    #[serde(default)]
    pub currency: String,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

/// What a supported event asks the pipeline to do.
#[derive(Debug)]
enum PaymentCommand {
    Succeeded(PaymentSucceeded),
    Failed(PaymentFailed),
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments
async fn handle_payment_webhook(State(state): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Discarding unparseable webhook body: {}", e);
            return ack("discarded");
        }
    };
    info!("Received webhook {} ({})", event.id, event.event_type);

    let command = match parse_command(&event) {
        Ok(Some(command)) => command,
        Ok(None) => return ack("ignored"),
        Err(e) => {
            warn!("Webhook {} ({}) has an unexpected payload: {}", event.id, event.event_type, e);
            return ack("discarded");
        }
    };

    let pipeline = state.reconciliation();
    match command {
        PaymentCommand::Succeeded(success) => match pipeline.handle_payment_succeeded(&success).await {
            Ok(outcome) => {
                info!("Webhook {} for payment {} handled: {:?}", event.id, success.payment_id, outcome);
                ack_with("processed", json!(outcome))
            }
            Err(e) => {
                error!(
                    "Payment {} not reconciled from webhook {}, left for orphan recovery: {}",
                    success.payment_id, event.id, e
                );
                ack("failed")
            }
        },
        PaymentCommand::Failed(failure) => match pipeline.handle_payment_failed(&failure).await {
            Ok(outcome) => {
                info!("Webhook {} for payment {} handled: {:?}", event.id, failure.payment_id, outcome);
                ack_with("processed", json!(outcome))
            }
            Err(e) => {
                error!(
                    "Failure of payment {} not applied from webhook {}: {}",
                    failure.payment_id, event.id, e
                );
                ack("failed")
            }
        },
    }
}

fn ack(status: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "received": true, "status": status })))
}

fn ack_with(status: &str, outcome: Value) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "received": true, "status": status, "outcome": outcome })),
    )
}

fn parse_command(event: &WebhookEvent) -> Result<Option<PaymentCommand>, serde_json::Error> {
    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let intent: PaymentIntentObject = serde_json::from_value(event.data.object.clone())?;
            Ok(Some(PaymentCommand::Succeeded(PaymentSucceeded {
                booking_id: linked_booking_id(&intent.metadata),
                session_id: None,
                amount_cents: intent.amount_received.unwrap_or(intent.amount),
                currency: intent.currency.to_uppercase(),
                payment_id: intent.id,
                metadata: intent.metadata,
            })))
        }
        "payment_intent.payment_failed" => {
            let intent: PaymentIntentObject = serde_json::from_value(event.data.object.clone())?;
            let reason = intent
                .last_payment_error
                .and_then(|e| e.message.or(e.code))
                .unwrap_or_else(|| "payment_failed".to_string());
            Ok(Some(PaymentCommand::Failed(PaymentFailed {
                booking_id: linked_booking_id(&intent.metadata),
                payment_id: intent.id,
                reason,
            })))
        }
        "checkout.session.completed" => {
            let session: CheckoutSessionObject = serde_json::from_value(event.data.object.clone())?;
            if session.payment_status.as_deref().is_some_and(|s| s != "paid") {
                info!("Checkout session {} completed unpaid, waiting for the payment event", session.id);
                return Ok(None);
            }
            let booking_id = linked_booking_id(&session.metadata).or_else(|| {
                session
                    .client_reference_id
                    .as_deref()
                    .and_then(|id| Uuid::parse_str(id).ok())
            });
            Ok(Some(PaymentCommand::Succeeded(PaymentSucceeded {
                booking_id,
                payment_id: session.payment_intent.unwrap_or_else(|| session.id.clone()),
                session_id: Some(session.id),
                amount_cents: session.amount_total,
                currency: session.currency.to_uppercase(),
                metadata: session.metadata,
            })))
        }
        other => {
            info!("Ignoring webhook event type {}", other);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, object: Value) -> WebhookEvent {
        WebhookEvent {
            id: "evt_1".to_string(),
            event_type: event_type.to_string(),
            data: WebhookData { object },
        }
    }

    #[test]
    fn test_intent_succeeded_carries_metadata_booking_id() {
        let booking_id = Uuid::new_v4();
        let parsed = parse_command(&event(
            "payment_intent.succeeded",
            json!({
                "id": "pi_1",
                "amount": 10300,
                "amount_received": 10300,
                "currency": "eur",
                "metadata": { "booking_id": booking_id.to_string(), "platform": "tourline" }
            }),
        ))
        .unwrap();

        match parsed {
            Some(PaymentCommand::Succeeded(success)) => {
                assert_eq!(success.booking_id, Some(booking_id));
                assert_eq!(success.payment_id, "pi_1");
                assert_eq!(success.amount_cents, 10_300);
                assert_eq!(success.currency, "EUR");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_failed_intent_uses_processor_message() {
        let parsed = parse_command(&event(
            "payment_intent.payment_failed",
            json!({
                "id": "pi_2",
                "last_payment_error": { "code": "card_declined", "message": "Your card was declined." }
            }),
        ))
        .unwrap();

        match parsed {
            Some(PaymentCommand::Failed(failure)) => {
                assert_eq!(failure.payment_id, "pi_2");
                assert_eq!(failure.reason, "Your card was declined.");
                assert_eq!(failure.booking_id, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_session_completed_falls_back_to_client_reference() {
        let booking_id = Uuid::new_v4();
        let parsed = parse_command(&event(
            "checkout.session.completed",
            json!({
                "id": "cs_1",
                "payment_intent": "pi_3",
                "payment_status": "paid",
                "amount_total": 5000,
                "currency": "eur",
                "client_reference_id": booking_id.to_string()
            }),
        ))
        .unwrap();

        match parsed {
            Some(PaymentCommand::Succeeded(success)) => {
                assert_eq!(success.booking_id, Some(booking_id));
                assert_eq!(success.payment_id, "pi_3");
                assert_eq!(success.session_id.as_deref(), Some("cs_1"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        assert!(parse_command(&event("customer.created", json!({ "id": "cus_1" })))
            .unwrap()
            .is_none());
        assert!(parse_command(&event(
            "checkout.session.completed",
            json!({ "id": "cs_2", "payment_status": "unpaid" })
        ))
        .unwrap()
        .is_none());
    }
}
