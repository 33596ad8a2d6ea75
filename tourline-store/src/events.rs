use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use tourline_core::notify::{BookingEventSink, BookingSummary, ConfirmationMailer, NotifyError};
use tourline_shared::models::events::{
    BookingCancelledEvent, BookingConfirmedEvent, BOOKING_CANCELLED_TOPIC, BOOKING_CONFIRMED_TOPIC,
    BOOKING_NOTIFICATION_TOPIC,
};

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }

    async fn publish_json<T: Serialize + Sync>(&self, topic: &str, key: &str, value: &T) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(value).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        self.publish(topic, key, &payload)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

/// Hands confirmation summaries to the mail service over the bus.
pub struct KafkaConfirmationMailer {
    producer: EventProducer,
}

impl KafkaConfirmationMailer {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl ConfirmationMailer for KafkaConfirmationMailer {
    async fn send_booking_confirmation(&self, summary: &BookingSummary) -> Result<(), NotifyError> {
        self.producer
            .publish_json(BOOKING_NOTIFICATION_TOPIC, &summary.booking_id.to_string(), summary)
            .await
    }
}

pub struct KafkaEventSink {
    producer: EventProducer,
}

impl KafkaEventSink {
    pub fn new(producer: EventProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl BookingEventSink for KafkaEventSink {
    async fn booking_confirmed(&self, event: &BookingConfirmedEvent) -> Result<(), NotifyError> {
        self.producer
            .publish_json(BOOKING_CONFIRMED_TOPIC, &event.booking_id.to_string(), event)
            .await
    }

    async fn booking_cancelled(&self, event: &BookingCancelledEvent) -> Result<(), NotifyError> {
        self.producer
            .publish_json(BOOKING_CANCELLED_TOPIC, &event.booking_id.to_string(), event)
            .await
    }
}
