use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;

use crate::errors::{CommerceError, CommerceResult};
use crate::events::{CommerceEvent, EventPublisher};

/// Publishes commerce events to a Kafka topic, keyed so that one user's
/// events stay on one partition.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, topic: String) -> CommerceResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("compression.type", "snappy")
            .set("linger.ms", "10")
            .create()
            .map_err(|e| CommerceError::EventPublish(format!("Failed to create producer: {}", e)))?;

        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, event: &CommerceEvent) -> CommerceResult<()> {
        let key = event.key().to_string();
        let payload = serde_json::to_string(event)
            .map_err(|e| CommerceError::EventPublish(format!("Failed to serialize event: {}", e)))?;

        tracing::debug!(
            event_type = event.event_type(),
            key = %key,
            "Publishing event to Kafka"
        );

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok((partition, offset)) => {
                tracing::debug!(partition = partition, offset = offset, "Event published");
                Ok(())
            }
            Err((e, _)) => Err(CommerceError::EventPublish(format!(
                "Failed to publish event: {}",
                e
            ))),
        }
    }
}
