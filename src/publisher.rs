//! Event publisher: the producing side of the vote intake pipeline

use crate::Result;
use crate::event::VoteRequestedEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Where an enqueued message landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A keyed, partitioned, at-least-once message transport
///
/// `send` returns only once the message is enqueued. Messages sharing a key
/// land on the same partition and are delivered in send order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<DeliveryReceipt>;
}

/// Turns accepted vote submissions into enqueued events
///
/// The voter id is the partition key, so one voter's events are consumed
/// by a single ordered stream.
pub struct VotePublisher<T: Transport + ?Sized> {
    transport: Arc<T>,
    topic: String,
    events_published: AtomicU64,
}

impl<T: Transport + ?Sized> VotePublisher<T> {
    pub fn new(transport: Arc<T>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
            events_published: AtomicU64::new(0),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueue one event
    ///
    /// Fails with a validation error for an empty event id and with a
    /// publish error when the transport is unavailable. A failed publish
    /// must be reported to the submitter; the event was not queued.
    pub async fn publish(&self, event: &VoteRequestedEvent) -> Result<DeliveryReceipt> {
        event.validate()?;
        let payload = event.to_bytes()?;
        let key = event.partition_key();

        match self.transport.send(&self.topic, &key, payload).await {
            Ok(receipt) => {
                self.events_published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    event_id = %event.event_id,
                    topic = %receipt.topic,
                    partition = receipt.partition,
                    offset = receipt.offset,
                    "Vote event published"
                );
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event.event_id,
                    topic = %self.topic,
                    error = %e,
                    "Vote event could not be published"
                );
                Err(e)
            }
        }
    }

    /// Number of events successfully enqueued by this publisher
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}
