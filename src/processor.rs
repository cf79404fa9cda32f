//! Event processor: the consuming side of the vote intake pipeline
//!
//! For each delivered [`VoteRequestedEvent`], inside one transaction:
//! 1. Insert the event id into the processed-event ledger; stop silently if
//!    it is already there.
//! 2. Resolve the election and check the submission time against its window.
//! 3. Resolve the voter and reject blocked voters.
//! 4. Resolve the option and check it belongs to the election.
//! 5. Insert the vote; a uniqueness conflict means the voter already voted.
//!
//! Business-rule rejections commit the ledger record, so a redelivered copy
//! of a rejected event is a cheap duplicate. A missing reference rolls the
//! ledger insert back, leaving a parked copy replayable once the record
//! exists. Storage failures roll everything back and are reported as
//! [`ProcessOutcome::TransientFailure`] so the whole message is delivered
//! again from step 1.

use crate::event::VoteRequestedEvent;
use crate::outcome::{MissingReference, ProcessOutcome};
use crate::store::{
    Insert, ProcessedEventLedger, ReferenceData, Storage, Transaction, VoteStore,
};
use crate::types::NewVote;
use crate::validators::VoteValidator;
use crate::{Error, Result};
use std::sync::Arc;

/// Applies validated, idempotent vote writes
pub struct EventProcessor<S: Storage> {
    storage: Arc<S>,
    validator: VoteValidator,
}

impl<S: Storage> EventProcessor<S> {
    pub fn new(storage: Arc<S>, validator: VoteValidator) -> Self {
        Self { storage, validator }
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Process one delivery of an event
    ///
    /// Never fails: every result, including infrastructure faults, is an
    /// outcome. Only [`ProcessOutcome::should_redeliver`] outcomes should be
    /// retried.
    pub async fn process(&self, event: &VoteRequestedEvent) -> ProcessOutcome {
        if let Err(e) = event.validate() {
            let outcome = ProcessOutcome::Malformed {
                reason: e.to_string(),
            };
            tracing::warn!(
                election_id = event.election_id,
                voter_id = event.voter_id,
                "Vote event rejected: {}",
                outcome
            );
            return outcome;
        }

        let outcome = self
            .try_process(event)
            .await
            .unwrap_or_else(ProcessOutcome::from);

        log_outcome(event, &outcome);
        outcome
    }

    async fn try_process(&self, event: &VoteRequestedEvent) -> Result<ProcessOutcome> {
        let mut tx = self.storage.begin().await?;
        let outcome = self.apply(&mut tx, event).await?;

        // Dropping rolls back: a no-op for duplicates, the ledger insert for
        // a missing reference.
        if !matches!(
            outcome,
            ProcessOutcome::DuplicateEvent | ProcessOutcome::ReferenceNotFound { .. }
        ) {
            tx.commit().await?;
        }
        Ok(outcome)
    }

    async fn apply(&self, tx: &mut S::Tx, event: &VoteRequestedEvent) -> Result<ProcessOutcome> {
        if let Insert::AlreadyExists = tx
            .insert_processed_event(&event.event_id)
            .await?
        {
            return Ok(ProcessOutcome::DuplicateEvent);
        }

        let Some(election) = tx.find_election(event.election_id).await? else {
            return Ok(missing(MissingReference::Election(event.election_id)));
        };
        if let Err(outcome) = self
            .validator
            .ensure_within_window(&election, event.requested_at)
        {
            return Ok(outcome);
        }

        let Some(voter) = tx.find_voter(event.voter_id).await? else {
            return Ok(missing(MissingReference::Voter(event.voter_id)));
        };
        if let Err(outcome) = self.validator.ensure_active_voter(&voter) {
            return Ok(outcome);
        }

        let Some(option) = tx.find_option(event.option_id).await? else {
            return Ok(missing(MissingReference::Option(event.option_id)));
        };
        if let Err(outcome) = self
            .validator
            .ensure_option_belongs(&option, event.election_id)
        {
            return Ok(outcome);
        }

        let vote = NewVote {
            election_id: election.id,
            voter_id: voter.id,
            option_id: option.id,
        };
        match tx.insert_vote(vote).await? {
            Insert::Inserted(vote) => Ok(ProcessOutcome::Accepted { vote }),
            Insert::AlreadyExists => Ok(ProcessOutcome::DuplicateVote),
        }
    }

    /// Process a raw wire payload
    pub async fn process_payload(&self, payload: &[u8]) -> ProcessOutcome {
        match VoteRequestedEvent::from_bytes(payload) {
            Ok(event) => self.process(&event).await,
            Err(e) => {
                tracing::warn!("Undecodable vote event dropped: {}", e);
                ProcessOutcome::Malformed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn missing(reference: MissingReference) -> ProcessOutcome {
    ProcessOutcome::ReferenceNotFound { reference }
}

fn log_outcome(event: &VoteRequestedEvent, outcome: &ProcessOutcome) {
    let event_id = event.event_id.as_str();
    match outcome {
        ProcessOutcome::Accepted { vote } => tracing::info!(
            event_id,
            election_id = vote.election_id,
            voter_id = vote.voter_id,
            option_id = vote.option_id,
            "Vote stored"
        ),
        ProcessOutcome::DuplicateEvent => {
            tracing::debug!(event_id, "Event already processed, skipping")
        }
        ProcessOutcome::DuplicateVote => tracing::info!(
            event_id,
            election_id = event.election_id,
            voter_id = event.voter_id,
            "Duplicate vote ignored"
        ),
        ProcessOutcome::TransientFailure { reason } => {
            tracing::warn!(event_id, reason = %reason, "Vote event processing failed transiently")
        }
        rejected => tracing::warn!(
            event_id,
            election_id = event.election_id,
            voter_id = event.voter_id,
            outcome = rejected.label(),
            "Vote event rejected: {}",
            rejected
        ),
    }
}

impl<S: Storage> Clone for EventProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            validator: self.validator,
        }
    }
}

impl From<Error> for ProcessOutcome {
    fn from(e: Error) -> Self {
        if e.is_transient() {
            ProcessOutcome::TransientFailure {
                reason: e.to_string(),
            }
        } else {
            ProcessOutcome::Malformed {
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{Election, ElectionOption, Voter};
    use chrono::{DateTime, Duration, Utc};

    async fn setup() -> (Arc<InMemoryStore>, EventProcessor<InMemoryStore>, DateTime<Utc>) {
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
            .put_election(Election {
                id: 2,
                name: "Budget".to_string(),
                description: None,
                starts_at: now - Duration::hours(1),
                ends_at: now + Duration::hours(1),
                created_at: now,
            })
            .await;
        for (id, blocked) in [(10, false), (11, true)] {
            store
                .put_voter(Voter {
                    id,
                    email: format!("voter{id}@example.com"),
                    full_name: format!("Voter {id}"),
                    blocked,
                    created_at: now,
                })
                .await;
        }
        for (id, election_id) in [(100, 1), (101, 1), (200, 2)] {
            store
                .put_option(ElectionOption {
                    id,
                    election_id,
                    label: format!("Option {id}"),
                })
                .await;
        }
        let processor = EventProcessor::new(store.clone(), VoteValidator::new());
        (store, processor, now)
    }

    fn event(
        id: &str,
        election_id: i64,
        voter_id: i64,
        option_id: i64,
        at: DateTime<Utc>,
    ) -> VoteRequestedEvent {
        VoteRequestedEvent {
            event_id: id.to_string(),
            election_id,
            voter_id,
            option_id,
            requested_at: at,
        }
    }

    #[tokio::test]
    async fn test_same_event_twice_records_one_vote() {
        let (store, processor, now) = setup().await;
        let e = event("e1", 1, 10, 100, now);

        assert!(processor.process(&e).await.is_accepted());
        assert_eq!(processor.process(&e).await, ProcessOutcome::DuplicateEvent);

        assert_eq!(store.votes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_second_event_same_voter_is_duplicate_vote() {
        let (store, processor, now) = setup().await;

        assert!(processor.process(&event("e1", 1, 10, 100, now)).await.is_accepted());
        assert_eq!(
            processor.process(&event("e2", 1, 10, 101, now)).await,
            ProcessOutcome::DuplicateVote
        );

        let vote = store.vote_of(1, 10).await.unwrap().unwrap();
        assert_eq!(vote.option_id, 100);
        // The losing event is still marked handled
        assert!(store.is_processed("e2").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_references() {
        let (store, processor, now) = setup().await;

        assert_eq!(
            processor.process(&event("e1", 9, 10, 100, now)).await,
            ProcessOutcome::ReferenceNotFound {
                reference: MissingReference::Election(9)
            }
        );
        assert_eq!(
            processor.process(&event("e2", 1, 99, 100, now)).await,
            ProcessOutcome::ReferenceNotFound {
                reference: MissingReference::Voter(99)
            }
        );
        assert_eq!(
            processor.process(&event("e3", 1, 10, 999, now)).await,
            ProcessOutcome::ReferenceNotFound {
                reference: MissingReference::Option(999)
            }
        );
        assert!(store.votes().await.is_empty());
        assert!(!store.is_processed("e1").await.unwrap());
        assert!(!store.is_processed("e3").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_reference_retried_once_created() {
        let (store, processor, now) = setup().await;
        let e = event("e1", 1, 12, 100, now);

        assert!(matches!(
            processor.process(&e).await,
            ProcessOutcome::ReferenceNotFound { .. }
        ));

        store
            .put_voter(Voter {
                id: 12,
                email: "late@example.com".to_string(),
                full_name: "Late Voter".to_string(),
                blocked: false,
                created_at: now,
            })
            .await;
        assert!(processor.process(&e).await.is_accepted());
    }

    #[tokio::test]
    async fn test_rule_violations_produce_no_vote() {
        let (store, processor, now) = setup().await;

        let late = processor
            .process(&event("e1", 1, 10, 100, now + Duration::hours(1) + Duration::seconds(1)))
            .await;
        assert!(matches!(late, ProcessOutcome::WindowViolation { .. }));

        let blocked = processor.process(&event("e2", 1, 11, 100, now)).await;
        assert_eq!(blocked, ProcessOutcome::BlockedVoter { voter_id: 11 });

        let foreign = processor.process(&event("e3", 1, 10, 200, now)).await;
        assert!(matches!(foreign, ProcessOutcome::OptionNotInElection { option_election_id: 2, .. }));

        assert!(store.votes().await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_event_is_not_reevaluated() {
        let (store, processor, now) = setup().await;
        let e = event("e1", 1, 11, 100, now);

        assert!(processor.process(&e).await.is_rejection());
        store.set_voter_blocked(11, false).await.unwrap();
        assert_eq!(processor.process(&e).await, ProcessOutcome::DuplicateEvent);
        assert!(store.vote_of(1, 11).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_leaves_no_trace_and_retries_cleanly() {
        let (store, processor, now) = setup().await;
        let e = event("e1", 1, 10, 100, now);

        store.fail_next(1);
        let first = processor.process(&e).await;
        assert!(first.should_redeliver());
        assert!(!store.is_processed("e1").await.unwrap());

        assert!(processor.process(&e).await.is_accepted());
    }

    #[tokio::test]
    async fn test_malformed_inputs() {
        let (_store, processor, now) = setup().await;

        let empty = processor.process(&event("", 1, 10, 100, now)).await;
        assert!(matches!(empty, ProcessOutcome::Malformed { .. }));

        let garbage = processor.process_payload(b"{\"eventId\":").await;
        assert!(matches!(garbage, ProcessOutcome::Malformed { .. }));
    }
}
