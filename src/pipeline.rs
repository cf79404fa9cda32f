//! Wires intake, broker, consumer group and storage into one running pipeline

use crate::broker::InMemoryBroker;
use crate::config::Config;
use crate::consumer::{ConsumerGroup, ConsumerSnapshot, DeadLetterQueue};
use crate::event::{VoteAccepted, VoteRequest};
use crate::intake::IntakeService;
use crate::processor::EventProcessor;
use crate::publisher::VotePublisher;
use crate::store::Storage;
use crate::types::{ElectionId, ElectionResults};
use crate::validators::VoteValidator;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// A running vote-intake pipeline over one storage backend
pub struct VotingPipeline<S: Storage> {
    storage: Arc<S>,
    broker: Arc<InMemoryBroker>,
    intake: IntakeService<S, InMemoryBroker>,
    consumers: ConsumerGroup,
}

impl<S: Storage> VotingPipeline<S> {
    /// Create the topic and start consuming it
    pub fn start(config: &Config, storage: Arc<S>) -> Result<Self> {
        let broker = Arc::new(InMemoryBroker::new(config.broker.clone())?);
        let publisher = VotePublisher::new(broker.clone(), config.broker.topic.clone());
        let intake = IntakeService::new(storage.clone(), publisher);

        let processor = EventProcessor::new(storage.clone(), VoteValidator::new());
        let consumers = ConsumerGroup::spawn(
            broker.clone(),
            processor,
            Arc::new(DeadLetterQueue::new()),
            config.consumer.clone(),
        )?;

        Ok(Self {
            storage,
            broker,
            intake,
            consumers,
        })
    }

    pub fn intake(&self) -> &IntakeService<S, InMemoryBroker> {
        &self.intake
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    pub async fn submit(&self, election_id: ElectionId, request: VoteRequest) -> Result<VoteAccepted> {
        self.intake.submit(election_id, request).await
    }

    pub async fn results(&self, election_id: ElectionId) -> Result<ElectionResults> {
        self.intake.results(election_id).await
    }

    pub fn stats(&self) -> ConsumerSnapshot {
        self.consumers.stats()
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        self.consumers.dead_letters()
    }

    /// Wait until every message published so far has been handled
    ///
    /// Fails instead of waiting forever when a consumer worker has died.
    pub async fn wait_idle(&self) -> Result<()> {
        while self.consumers.stats().completed < self.broker.events_published() {
            if self.consumers.has_stopped_worker() {
                return Err(Error::internal("Consumer worker stopped with messages pending"));
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(())
    }

    /// Stop intake, drain queued messages and stop the workers
    pub async fn shutdown(self) -> Result<ConsumerSnapshot> {
        self.consumers.shutdown().await
    }
}
