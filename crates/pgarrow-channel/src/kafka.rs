//! Kafka-backed channel.
//!
//! Records go to partition 0 of a single topic named `<prefix>_<topic>`, so
//! the broker keeps them in WAL order whatever the topic's partition count.
//! The consumer commits offsets manually, only for records the caller
//! acknowledged.

use std::future::Future;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::channel::{AckToken, Channel, Delivery};
use crate::error::{ChannelError, ChannelResult};

/// Every record is written here; Kafka only orders within a partition.
pub const PARTITION: i32 = 0;

#[derive(Debug, Clone)]
pub struct KafkaChannelConfig {
    pub brokers: Vec<String>,
    pub topic_prefix: String,
    pub topic: String,
    pub consumer_group: String,
    /// How long a consume or publish may wait on the broker.
    pub deadline: Duration,
}

impl KafkaChannelConfig {
    pub fn topic_name(&self) -> String {
        format!("{}_{}", self.topic_prefix, self.topic)
    }
}

/// Producer and consumer are created on first use and dropped on reopen.
pub struct KafkaChannel {
    config: KafkaChannelConfig,
    topic: String,
    producer: Option<FutureProducer>,
    consumer: Option<StreamConsumer>,
}

impl KafkaChannel {
    pub fn new(config: KafkaChannelConfig) -> ChannelResult<Self> {
        if config.brokers.is_empty() {
            return Err(ChannelError::Config("no brokers configured".into()));
        }
        Ok(Self {
            topic: config.topic_name(),
            config,
            producer: None,
            consumer: None,
        })
    }

    fn brokers(&self) -> String {
        self.config.brokers.join(",")
    }

    fn producer(&mut self) -> ChannelResult<&FutureProducer> {
        if self.producer.is_none() {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", self.brokers())
                .set("message.timeout.ms", self.config.deadline.as_millis().to_string())
                .create()
                .map_err(classify)?;
            info!(topic = %self.topic, "Kafka producer created");
            self.producer = Some(producer);
        }
        self.producer
            .as_ref()
            .ok_or_else(|| ChannelError::Unavailable("producer not available".into()))
    }

    fn consumer(&mut self) -> ChannelResult<&StreamConsumer> {
        if self.consumer.is_none() {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", self.brokers())
                .set("group.id", &self.config.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(classify)?;
            consumer.subscribe(&[&self.topic]).map_err(classify)?;
            info!(
                topic = %self.topic,
                group = %self.config.consumer_group,
                "Kafka consumer subscribed"
            );
            self.consumer = Some(consumer);
        }
        self.consumer
            .as_ref()
            .ok_or_else(|| ChannelError::Unavailable("consumer not available".into()))
    }
}

fn record<'a>(topic: &'a str, payload: &'a Vec<u8>) -> FutureRecord<'a, (), Vec<u8>> {
    FutureRecord::to(topic).partition(PARTITION).payload(payload)
}

/// Broker connectivity problems are transient; everything else is not.
fn classify(error: KafkaError) -> ChannelError {
    let transient = matches!(
        error.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::MessageTimedOut
                | RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::BrokerNotAvailable
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::NetworkException
        )
    );
    match error {
        e if transient => ChannelError::Unavailable(e.to_string()),
        e @ KafkaError::MessageProduction(_) => ChannelError::Publish(e.to_string()),
        e @ (KafkaError::ConsumerCommit(_) | KafkaError::OffsetFetch(_)) => {
            ChannelError::Commit(e.to_string())
        }
        e @ KafkaError::ClientCreation(_) => ChannelError::Config(e.to_string()),
        e => ChannelError::Consume(e.to_string()),
    }
}

impl Channel for KafkaChannel {
    fn publish(&mut self, payload: Vec<u8>) -> impl Future<Output = ChannelResult<()>> + Send {
        async move {
            let deadline = self.config.deadline;
            let topic = self.topic.clone();
            let producer = self.producer()?;
            producer
                .send(record(&topic, &payload), deadline)
                .await
                .map_err(|(e, _)| classify(e))?;
            debug!(topic = %topic, bytes = payload.len(), "Published record");
            Ok(())
        }
    }

    fn consume(&mut self) -> impl Future<Output = ChannelResult<Option<Delivery>>> + Send {
        async move {
            let deadline = self.config.deadline;
            let consumer = self.consumer()?;
            let message = match tokio::time::timeout(deadline, consumer.recv()).await {
                Err(_) => return Ok(None),
                Ok(message) => message.map_err(classify)?,
            };

            Ok(Some(Delivery {
                payload: message.payload().unwrap_or_default().to_vec(),
                token: AckToken {
                    partition: message.partition(),
                    offset: message.offset(),
                },
            }))
        }
    }

    fn commit(&mut self, token: AckToken) -> impl Future<Output = ChannelResult<()>> + Send {
        async move {
            let topic = self.topic.clone();
            let consumer = self.consumer()?;
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&topic, token.partition, Offset::Offset(token.offset + 1))
                .map_err(|e| ChannelError::Commit(e.to_string()))?;
            consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| ChannelError::Commit(e.to_string()))?;
            debug!(partition = token.partition, offset = token.offset, "Committed offset");
            Ok(())
        }
    }

    fn reopen(&mut self) -> impl Future<Output = ChannelResult<()>> + Send {
        async move {
            info!(topic = %self.topic, "Reopening Kafka channel");
            self.producer = None;
            self.consumer = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KafkaChannelConfig {
        KafkaChannelConfig {
            brokers: vec!["localhost:9092".into()],
            topic_prefix: "pgarrow".into(),
            topic: "stream".into(),
            consumer_group: "pgarrow1".into(),
            deadline: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(config().topic_name(), "pgarrow_stream");
    }

    #[test]
    fn test_records_are_pinned_to_one_partition() {
        let payload = b"{}".to_vec();
        let first = record("pgarrow_stream", &payload);
        let second = record("pgarrow_stream", &payload);
        assert_eq!(first.partition, Some(PARTITION));
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.topic, "pgarrow_stream");
    }

    #[test]
    fn test_requires_brokers() {
        let mut cfg = config();
        cfg.brokers.clear();
        assert!(matches!(KafkaChannel::new(cfg), Err(ChannelError::Config(_))));
    }

    #[test]
    fn test_classify_transport_failures_as_transient() {
        let err = classify(KafkaError::MessageProduction(RDKafkaErrorCode::AllBrokersDown));
        assert!(err.is_transient());

        let err = classify(KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge));
        assert!(matches!(err, ChannelError::Publish(_)));
    }
}
