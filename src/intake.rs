//! Intake service: accepts vote submissions and queues them
//!
//! The acknowledgment only means the event is durably queued. Whether the
//! vote is recorded is decided later by the event processor.

use crate::event::{VoteAccepted, VoteRequest, VoteRequestedEvent};
use crate::publisher::{Transport, VotePublisher};
use crate::store::Storage;
use crate::types::{ElectionId, ElectionResults};
use crate::{Error, Result};
use std::sync::Arc;

pub struct IntakeService<S: Storage, T: Transport + ?Sized> {
    storage: Arc<S>,
    publisher: VotePublisher<T>,
}

impl<S: Storage, T: Transport + ?Sized> IntakeService<S, T> {
    pub fn new(storage: Arc<S>, publisher: VotePublisher<T>) -> Self {
        Self { storage, publisher }
    }

    pub fn publisher(&self) -> &VotePublisher<T> {
        &self.publisher
    }

    /// Queue a vote for an existing election
    ///
    /// Window, voter and option checks are left to the processor, which
    /// sees the state at processing time.
    pub async fn submit(&self, election_id: ElectionId, request: VoteRequest) -> Result<VoteAccepted> {
        if self.storage.election(election_id).await?.is_none() {
            return Err(Error::not_found(format!("election {election_id}")));
        }

        let event = VoteRequestedEvent::new(election_id, request.voter_id, request.option_id);
        self.publisher.publish(&event).await?;

        tracing::info!(
            event_id = %event.event_id,
            election_id,
            voter_id = request.voter_id,
            "Vote submission accepted"
        );
        Ok(VoteAccepted::new(event.event_id))
    }

    /// Current tally of an election
    pub async fn results(&self, election_id: ElectionId) -> Result<ElectionResults> {
        self.storage.results(election_id).await
    }
}
