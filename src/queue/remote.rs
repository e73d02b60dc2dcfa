//! Kafka-backed transport for the event queue (spec.md §5's "remote" queue
//! kind), for multi-node deployments where matcher and validator processes
//! run separately from the node appending events.
//!
//! Records are keyed by asset pair (spec.md:138: "keying by pair ensures
//! per-pair ordering"), so every event for a given pair lands on the same
//! partition and is delivered to that pair's OrderBookActor in produce
//! order; the consumer is assigned every partition of the topic rather
//! than a single fixed one. Kafka's per-partition offset becomes the
//! matcher's event offset directly, so no separate index is needed the
//! way `local.rs` needs one.

use super::EventQueue;
use crate::domain::{QueueEvent, QueueEventWithMeta};
use crate::error::MatcherError;
use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::{ClientConfig, Message, TopicPartitionList};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteQueueConfig {
    pub bootstrap: String,
    pub topic: String,
    pub client_id: String,
    pub group_id: String,
    pub producer_acks: String,
    pub consumer_max_poll: u32,
}

pub struct RemoteEventQueue {
    config: RemoteQueueConfig,
    producer: BaseProducer,
    watermark_consumer: BaseConsumer,
    closed: std::sync::atomic::AtomicBool,
}

impl RemoteEventQueue {
    pub fn connect(config: RemoteQueueConfig) -> Result<Self, MatcherError> {
        let producer: BaseProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap)
            .set("client.id", &config.client_id)
            .set("acks", &config.producer_acks)
            .create()
            .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;
        let watermark_consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap)
            .set("group.id", &config.group_id)
            .create()
            .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;
        Ok(Self {
            config,
            producer,
            watermark_consumer,
            closed: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn partitions(&self) -> Result<Vec<i32>, MatcherError> {
        let metadata = self
            .watermark_consumer
            .fetch_metadata(Some(&self.config.topic), Duration::from_secs(5))
            .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;
        let topic = metadata
            .topics()
            .iter()
            .find(|t| t.name() == self.config.topic)
            .ok_or_else(|| MatcherError::QueueUnavailable(format!("topic {} not found", self.config.topic)))?;
        Ok(topic.partitions().iter().map(|p| p.id()).collect())
    }

    /// Highest offset seen across every partition of the topic. Per-pair
    /// keying spreads events across partitions, so this is a ceiling rather
    /// than an exact combined offset (each partition has its own sequence);
    /// it's used only to tell whether replay has caught up to production.
    fn high_watermark(&self) -> Result<Option<u64>, MatcherError> {
        let mut highest = None;
        for partition in self.partitions()? {
            let (low, high) = self
                .watermark_consumer
                .fetch_watermarks(&self.config.topic, partition, Duration::from_secs(5))
                .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;
            if high > low {
                let top = (high - 1) as u64;
                highest = Some(highest.map_or(top, |h: u64| h.max(top)));
            }
        }
        Ok(highest)
    }
}

#[async_trait]
impl EventQueue for RemoteEventQueue {
    async fn append(&self, event: QueueEvent, timestamp: u64) -> Result<u64, MatcherError> {
        // CancelOrder carries no pair (by the time it's applied the cancel
        // is resolved by order id, not pair), so it falls back to librdkafka's
        // unkeyed round-robin partitioner; every PlaceOrder/OrderBookDeleted
        // for a pair still lands on one partition together.
        let key = event.pair().map(|pair| pair.to_string());
        let meta = QueueEventWithMeta { offset: 0, timestamp, event };
        let payload = bincode::serialize(&meta)?;
        let mut record: BaseRecord<'_, String, Vec<u8>> = BaseRecord::to(&self.config.topic).payload(&payload);
        if let Some(key) = &key {
            record = record.key(key);
        }
        self.producer
            .send(record)
            .map_err(|(e, _)| MatcherError::QueueUnavailable(e.to_string()))?;
        self.producer
            .flush(Duration::from_secs(5))
            .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;
        self.high_watermark()?.ok_or_else(|| MatcherError::InternalInvariant("append produced no watermark".into()))
    }

    async fn last_event_offset(&self) -> Result<Option<u64>, MatcherError> {
        self.high_watermark()
    }

    async fn start_consume(
        &self,
        from_offset: u64,
        handler: Box<dyn Fn(QueueEventWithMeta) -> Result<(), MatcherError> + Send + Sync>,
    ) -> Result<(), MatcherError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap)
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "false")
            .create()
            .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;

        let mut tpl = TopicPartitionList::new();
        for partition in self.partitions()? {
            tpl.add_partition_offset(&self.config.topic, partition, rdkafka::Offset::Offset(from_offset as i64))
                .map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;
        }
        consumer.assign(&tpl).map_err(|e| MatcherError::QueueUnavailable(e.to_string()))?;

        loop {
            if self.closed.load(std::sync::atomic::Ordering::Acquire) {
                return Ok(());
            }
            match consumer.poll(Duration::from_millis(200)) {
                None => continue,
                Some(Err(e)) => return Err(MatcherError::QueueUnavailable(e.to_string())),
                Some(Ok(message)) => {
                    let Some(payload) = message.payload() else { continue };
                    let meta: QueueEventWithMeta = bincode::deserialize(payload)?;
                    let meta = QueueEventWithMeta { offset: message.offset() as u64, ..meta };
                    handler(meta)?;
                }
            }
        }
    }

    async fn close(&self) -> Result<(), MatcherError> {
        self.closed.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }
}
