use async_trait::async_trait;
use tracing::info;
use transfer_core::{BookingEvent, BookingNotifier, BoxError};

/// Writes every booking event to the log. Used when no broker is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl BookingNotifier for LoggingNotifier {
    async fn notify(&self, event: &BookingEvent) -> Result<(), BoxError> {
        let payload = event.payload()?;
        info!("Booking event {} [{}]: {}", event.topic(), event.key(), payload);
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use kafka::EventProducer;

#[cfg(feature = "kafka")]
mod kafka {
    use super::*;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;
    use std::time::Duration;
    use tracing::error;

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

        pub async fn publish(
            &self,
            topic: &str,
            key: &str,
            payload: &str,
        ) -> Result<(), rdkafka::error::KafkaError> {
            let record = FutureRecord::to(topic).key(key).payload(payload);

            match self
                .producer
                .send(record, Timeout::After(Duration::from_secs(0)))
                .await
            {
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
    }

    #[async_trait]
    impl BookingNotifier for EventProducer {
        async fn notify(&self, event: &BookingEvent) -> Result<(), BoxError> {
            let payload = event.payload()?;
            self.publish(event.topic(), &event.key(), &payload).await?;
            Ok(())
        }
    }
}
