//! Consumer group: drives the event processor from broker partitions
//!
//! One worker task per partition. A worker handles its messages strictly in
//! order and redelivers a transiently failed message in place, with a linear
//! backoff, before moving on. Once the attempts are used up the message is
//! handed to the dead-letter queue (when enabled) and the partition resumes.

use crate::broker::{Delivery, InMemoryBroker, PartitionStream};
use crate::config::ConsumerConfig;
use crate::event::VoteRequestedEvent;
use crate::outcome::ProcessOutcome;
use crate::processor::EventProcessor;
use crate::store::Storage;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// A message parked for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub reason: String,
    pub attempts: u32,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Decode the parked payload, if it is a valid event
    pub fn event(&self) -> Result<VoteRequestedEvent> {
        VoteRequestedEvent::from_bytes(&self.payload)
    }
}

/// Dead-letter queue shared by every worker of a group
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries_guard(&self) -> MutexGuard<'_, Vec<DeadLetter>> {
        // A panicking worker cannot leave a half-pushed entry behind
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, letter: DeadLetter) {
        self.entries_guard().push(letter);
    }

    pub fn len(&self) -> usize {
        self.entries_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every parked message, oldest first
    pub fn entries(&self) -> Vec<DeadLetter> {
        self.entries_guard().clone()
    }

    /// Remove and return every parked message
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.entries_guard())
    }
}

/// Live counters of a consumer group
#[derive(Debug, Default)]
pub struct ConsumerStats {
    delivered: AtomicU64,
    completed: AtomicU64,
    accepted: AtomicU64,
    duplicate_events: AtomicU64,
    duplicate_votes: AtomicU64,
    rejected: AtomicU64,
    redeliveries: AtomicU64,
    transient_exhausted: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerSnapshot {
    /// Messages taken off a partition
    pub delivered: u64,
    /// Messages whose handling finished, whatever the outcome
    pub completed: u64,
    pub accepted: u64,
    pub duplicate_events: u64,
    pub duplicate_votes: u64,
    pub rejected: u64,
    /// Extra processing attempts after a transient failure
    pub redeliveries: u64,
    /// Messages still failing transiently after the last attempt
    pub transient_exhausted: u64,
    pub dead_lettered: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Acquire),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicate_events: self.duplicate_events.load(Ordering::Relaxed),
            duplicate_votes: self.duplicate_votes.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            transient_exhausted: self.transient_exhausted.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::Accepted { .. } => &self.accepted,
            ProcessOutcome::DuplicateEvent => &self.duplicate_events,
            ProcessOutcome::DuplicateVote => &self.duplicate_votes,
            ProcessOutcome::TransientFailure { .. } => &self.transient_exhausted,
            _ => &self.rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Workers attached to every partition of a broker topic
pub struct ConsumerGroup {
    group: String,
    broker: Arc<InMemoryBroker>,
    stats: Arc<ConsumerStats>,
    dead_letters: Arc<DeadLetterQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl ConsumerGroup {
    /// Subscribe to the broker and start one worker per partition
    ///
    /// Fails if the topic already has a consumer group.
    pub fn spawn<S: Storage>(
        broker: Arc<InMemoryBroker>,
        processor: EventProcessor<S>,
        dead_letters: Arc<DeadLetterQueue>,
        config: ConsumerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let streams = broker.subscribe()?;
        let stats = Arc::new(ConsumerStats::default());

        let workers = streams
            .into_iter()
            .map(|stream| {
                let worker = PartitionWorker {
                    stream,
                    processor: processor.clone(),
                    stats: stats.clone(),
                    dead_letters: dead_letters.clone(),
                    config: config.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        tracing::info!(
            group = %config.group,
            topic = %broker.topic(),
            workers = workers.len(),
            "Consumer group started"
        );

        Ok(Self {
            group: config.group,
            broker,
            stats,
            dead_letters,
            workers,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn stats(&self) -> ConsumerSnapshot {
        self.stats.snapshot()
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    /// Whether any worker has exited before shutdown
    pub fn has_stopped_worker(&self) -> bool {
        !self.broker.is_closed() && self.workers.iter().any(JoinHandle::is_finished)
    }

    /// Close the broker, let every worker drain its partition, and wait
    ///
    /// Every worker is joined even if one of them failed; the first failure
    /// is reported.
    pub async fn shutdown(self) -> Result<ConsumerSnapshot> {
        self.broker.close();

        let mut first_failure = None;
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(group = %self.group, error = %e, "Consumer worker failed");
                first_failure.get_or_insert(e);
            }
        }
        if let Some(e) = first_failure {
            return Err(Error::internal(format!("Consumer worker failed: {e}")));
        }

        let snapshot = self.stats.snapshot();
        tracing::info!(
            group = %self.group,
            delivered = snapshot.delivered,
            accepted = snapshot.accepted,
            dead_lettered = snapshot.dead_lettered,
            "Consumer group stopped"
        );
        Ok(snapshot)
    }
}

struct PartitionWorker<S: Storage> {
    stream: PartitionStream,
    processor: EventProcessor<S>,
    stats: Arc<ConsumerStats>,
    dead_letters: Arc<DeadLetterQueue>,
    config: ConsumerConfig,
}

impl<S: Storage> PartitionWorker<S> {
    async fn run(mut self) {
        let partition = self.stream.partition();
        tracing::debug!(partition, "Partition worker started");

        while let Some(delivery) = self.stream.next().await {
            self.handle(delivery).await;
        }

        tracing::debug!(partition, "Partition worker stopped");
    }

    async fn handle(&self, delivery: Delivery) {
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 1;
        let outcome = loop {
            let outcome = self.processor.process_payload(&delivery.payload).await;
            if !outcome.should_redeliver() || attempt >= self.config.max_delivery_attempts {
                break outcome;
            }

            self.stats.redeliveries.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                partition = delivery.partition,
                offset = delivery.offset,
                attempt,
                "Redelivering vote event"
            );
            tokio::time::sleep(self.config.backoff_for(attempt)).await;
            attempt += 1;
        };

        self.finish(delivery, outcome, attempt);
    }

    fn finish(&self, delivery: Delivery, outcome: ProcessOutcome, attempts: u32) {
        self.stats.record(&outcome);

        if let ProcessOutcome::TransientFailure { reason } = &outcome {
            tracing::error!(
                partition = delivery.partition,
                offset = delivery.offset,
                attempts,
                reason = %reason,
                "Vote event still failing after last delivery attempt"
            );
        }

        if self.config.dead_letter && outcome.should_dead_letter() {
            tracing::warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                outcome = outcome.label(),
                "Vote event moved to dead-letter queue"
            );
            self.dead_letters.push(DeadLetter {
                partition: delivery.partition,
                offset: delivery.offset,
                key: delivery.key,
                payload: delivery.payload,
                reason: outcome.to_string(),
                attempts,
                recorded_at: Utc::now(),
            });
            self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }

        self.stats.completed.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::publisher::Transport;
    use crate::store::InMemoryStore;
    use crate::types::{Election, ElectionOption, Voter};
    use crate::validators::VoteValidator;
    use chrono::Duration;

    async fn seeded_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        store
            .put_election(Election {
                id: 1,
                name: "Mayor".to_string(),
                description: None,
                starts_at: now - Duration::hours(1),
                ends_at: now + Duration::hours(1),
                created_at: now,
            })
            .await;
        store
            .put_voter(Voter {
                id: 10,
                email: "a@example.com".to_string(),
                full_name: "A".to_string(),
                blocked: false,
                created_at: now,
            })
            .await;
        store
            .put_option(ElectionOption {
                id: 100,
                election_id: 1,
                label: "Yes".to_string(),
            })
            .await;
        store
    }

    fn broker() -> Arc<InMemoryBroker> {
        Arc::new(
            InMemoryBroker::new(BrokerConfig {
                topic: "votes".to_string(),
                partitions: 2,
                partition_capacity: 16,
            })
            .unwrap(),
        )
    }

    fn consumer_config(max_delivery_attempts: u32) -> ConsumerConfig {
        ConsumerConfig {
            group: "test".to_string(),
            max_delivery_attempts,
            redelivery_backoff_ms: 1,
            dead_letter: true,
        }
    }

    async fn send(broker: &InMemoryBroker, event: &VoteRequestedEvent) {
        broker
            .send("votes", &event.partition_key(), event.to_bytes().unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_dead_letter_queue_drain() {
        let queue = DeadLetterQueue::new();
        assert!(queue.is_empty());
        queue.push(DeadLetter {
            partition: 0,
            offset: 3,
            key: "10".to_string(),
            payload: b"not json".to_vec(),
            reason: "bad".to_string(),
            attempts: 1,
            recorded_at: Utc::now(),
        });
        assert_eq!(queue.len(), 1);
        assert!(queue.entries()[0].event().is_err());
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_redelivered_in_place() {
        let store = seeded_store().await;
        let broker = broker();
        let dlq = Arc::new(DeadLetterQueue::new());
        let processor = EventProcessor::new(store.clone(), VoteValidator::new());

        store.fail_next(2);
        let event = VoteRequestedEvent::new(1, 10, 100);
        send(&broker, &event).await;

        let group = ConsumerGroup::spawn(broker, processor, dlq.clone(), consumer_config(3)).unwrap();
        let stats = group.shutdown().await.unwrap();

        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.redeliveries, 2);
        assert_eq!(stats.accepted, 1);
        assert!(dlq.is_empty());
        assert!(store.is_processed(&event.event_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_transient_failure_is_dead_lettered() {
        let store = seeded_store().await;
        let broker = broker();
        let dlq = Arc::new(DeadLetterQueue::new());
        let processor = EventProcessor::new(store.clone(), VoteValidator::new());

        store.fail_next(5);
        let event = VoteRequestedEvent::new(1, 10, 100);
        send(&broker, &event).await;

        let group = ConsumerGroup::spawn(broker, processor, dlq.clone(), consumer_config(2)).unwrap();
        let stats = group.shutdown().await.unwrap();

        assert_eq!(stats.transient_exhausted, 1);
        assert_eq!(stats.dead_lettered, 1);
        let letters = dlq.drain();
        assert_eq!(letters[0].attempts, 2);
        assert_eq!(letters[0].event().unwrap(), event);
        assert!(store.votes().await.is_empty());
    }

    #[tokio::test]
    async fn test_rule_rejections_are_not_dead_lettered() {
        let store = seeded_store().await;
        let broker = broker();
        let dlq = Arc::new(DeadLetterQueue::new());
        let processor = EventProcessor::new(store.clone(), VoteValidator::new());

        let late = VoteRequestedEvent::at(1, 10, 100, Utc::now() + Duration::hours(2));
        let dangling = VoteRequestedEvent::new(7, 10, 100);
        send(&broker, &late).await;
        send(&broker, &dangling).await;

        let group = ConsumerGroup::spawn(broker, processor, dlq.clone(), consumer_config(3)).unwrap();
        let stats = group.shutdown().await.unwrap();

        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.completed, 2);
        let letters = dlq.entries();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].event().unwrap().election_id, 7);
    }

    #[tokio::test]
    async fn test_dead_letter_disabled() {
        let store = seeded_store().await;
        let broker = broker();
        let dlq = Arc::new(DeadLetterQueue::new());
        let processor = EventProcessor::new(store, VoteValidator::new());

        broker.send("votes", "10", b"{}".to_vec()).await.unwrap();

        let config = ConsumerConfig {
            dead_letter: false,
            ..consumer_config(3)
        };
        let group = ConsumerGroup::spawn(broker, processor, dlq.clone(), config).unwrap();
        let stats = group.shutdown().await.unwrap();

        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.dead_lettered, 0);
        assert!(dlq.is_empty());
    }

    #[tokio::test]
    async fn test_second_group_on_same_topic_fails() {
        let store = seeded_store().await;
        let broker = broker();
        let processor = EventProcessor::new(store, VoteValidator::new());
        let dlq = Arc::new(DeadLetterQueue::new());

        let first =
            ConsumerGroup::spawn(broker.clone(), processor.clone(), dlq.clone(), consumer_config(1))
                .unwrap();
        assert!(ConsumerGroup::spawn(broker, processor, dlq, consumer_config(1)).is_err());
        first.shutdown().await.unwrap();
    }
}
