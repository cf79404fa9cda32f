//! In-memory partitioned broker
//!
//! One topic split into a fixed number of partitions, each a bounded
//! `tokio::sync::mpsc` channel. Keys are hashed with blake3 to pick a
//! partition, so all messages for one key stay in order on one stream.
//! A full partition makes `send` wait, which is the only flow control.
//! Suitable for single-process deployments and tests; a networked broker
//! would implement [`Transport`] the same way.

use crate::config::BrokerConfig;
use crate::publisher::{DeliveryReceipt, Transport};
use crate::{Error, Result, publish_error};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;

/// One message as handed to a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Stable partition for a key
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    let hash = blake3::hash(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % u64::from(partitions.max(1))) as u32
}

/// Receiving end of one partition, owned by a single consumer worker
pub struct PartitionStream {
    partition: u32,
    receiver: mpsc::Receiver<Delivery>,
}

impl PartitionStream {
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Next message, or `None` once the broker is closed and drained
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// Partitioned in-memory message broker
pub struct InMemoryBroker {
    config: BrokerConfig,
    /// `None` once closed
    senders: RwLock<Option<Vec<mpsc::Sender<Delivery>>>>,
    /// Taken by the consumer group on subscribe
    receivers: Mutex<Option<Vec<mpsc::Receiver<Delivery>>>>,
    /// Next offset per partition; held while sending to keep offsets in channel order
    offsets: Vec<tokio::sync::Mutex<u64>>,
    events_published: AtomicU64,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let (senders, receivers): (Vec<_>, Vec<_>) = (0..config.partitions)
            .map(|_| mpsc::channel(config.partition_capacity))
            .unzip();
        let offsets = (0..config.partitions)
            .map(|_| tokio::sync::Mutex::new(0))
            .collect();

        tracing::info!(
            topic = %config.topic,
            partitions = config.partitions,
            "Broker topic created"
        );

        Ok(Self {
            config,
            senders: RwLock::new(Some(senders)),
            receivers: Mutex::new(Some(receivers)),
            offsets,
            events_published: AtomicU64::new(0),
        })
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn partitions(&self) -> u32 {
        self.config.partitions
    }

    /// Partition a key is routed to
    pub fn partition_for(&self, key: &str) -> u32 {
        partition_for(key, self.config.partitions)
    }

    /// Hand every partition stream to the single consumer group
    pub fn subscribe(&self) -> Result<Vec<PartitionStream>> {
        let mut receivers = self
            .receivers
            .lock()
            .map_err(|_| Error::internal("Broker receiver lock poisoned"))?;
        let receivers = receivers
            .take()
            .ok_or_else(|| Error::internal("Topic already has a consumer group attached"))?;

        Ok(receivers
            .into_iter()
            .enumerate()
            .map(|(partition, receiver)| PartitionStream {
                partition: partition as u32,
                receiver,
            })
            .collect())
    }

    /// Stop accepting messages; consumers drain what is queued and stop
    pub fn close(&self) {
        if let Ok(mut senders) = self.senders.write() {
            if senders.take().is_some() {
                tracing::info!(topic = %self.config.topic, "Broker closed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.senders
            .read()
            .map(|senders| senders.is_none())
            .unwrap_or(true)
    }

    /// Total messages accepted across all partitions
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<DeliveryReceipt> {
        if topic != self.config.topic {
            return Err(publish_error!("Unknown topic {}", topic));
        }

        let partition = self.partition_for(key);
        let sender = {
            let senders = self
                .senders
                .read()
                .map_err(|_| publish_error!("Broker sender lock poisoned"))?;
            match senders.as_ref() {
                Some(senders) => senders[partition as usize].clone(),
                None => return Err(publish_error!("Broker is closed")),
            }
        };

        let mut next_offset = self.offsets[partition as usize].lock().await;
        let offset = *next_offset;
        let delivery = Delivery {
            topic: topic.to_string(),
            partition,
            offset,
            key: key.to_string(),
            payload,
        };
        sender
            .send(delivery)
            .await
            .map_err(|_| publish_error!("Partition {} has no consumer", partition))?;
        *next_offset += 1;
        self.events_published.fetch_add(1, Ordering::Relaxed);

        Ok(DeliveryReceipt {
            topic: topic.to_string(),
            partition,
            offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker(partitions: u32) -> InMemoryBroker {
        InMemoryBroker::new(BrokerConfig {
            topic: "votes".to_string(),
            partitions,
            partition_capacity: 64,
        })
        .unwrap()
    }

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for voter in 0..200 {
            let key = voter.to_string();
            let p = partition_for(&key, 8);
            assert!(p < 8);
            assert_eq!(p, partition_for(&key, 8));
        }
        assert_eq!(partition_for("10", 1), 0);
    }

    #[tokio::test]
    async fn test_same_key_keeps_order_on_one_partition() {
        let broker = broker(4);
        let mut streams = broker.subscribe().unwrap();

        for i in 0..5u8 {
            broker.send("votes", "10", vec![i]).await.unwrap();
        }

        let partition = broker.partition_for("10") as usize;
        let stream = &mut streams[partition];
        for i in 0..5u8 {
            let delivery = stream.next().await.unwrap();
            assert_eq!(delivery.payload, vec![i]);
            assert_eq!(delivery.offset, i as u64);
            assert_eq!(delivery.key, "10");
        }
        assert_eq!(broker.events_published(), 5);
    }

    #[tokio::test]
    async fn test_unknown_topic_and_closed_broker() {
        let broker = broker(2);
        let _streams = broker.subscribe().unwrap();

        assert!(matches!(
            broker.send("other", "1", vec![]).await,
            Err(Error::Publish { .. })
        ));

        broker.close();
        assert!(broker.is_closed());
        assert!(matches!(
            broker.send("votes", "1", vec![]).await,
            Err(Error::Publish { .. })
        ));
    }

    #[tokio::test]
    async fn test_single_consumer_group() {
        let broker = broker(2);
        assert_eq!(broker.subscribe().unwrap().len(), 2);
        assert!(broker.subscribe().is_err());
    }

    #[tokio::test]
    async fn test_dropped_consumer_fails_publish() {
        let broker = broker(1);
        drop(broker.subscribe().unwrap());

        let result = broker.send("votes", "1", vec![1]).await;
        assert!(matches!(result, Err(Error::Publish { .. })));
    }

    #[tokio::test]
    async fn test_close_drains_queued_messages() {
        let broker = broker(1);
        let mut streams = broker.subscribe().unwrap();
        broker.send("votes", "1", vec![7]).await.unwrap();
        broker.close();

        assert_eq!(streams[0].next().await.unwrap().payload, vec![7]);
        assert!(streams[0].next().await.is_none());
    }
}
