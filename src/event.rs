//! Wire-level vote request event
//!
//! The JSON form keeps a stable field order and camelCase names:
//!
//! ```text
//! { "eventId": "…uuid…", "electionId": 1, "voterId": 10, "optionId": 100,
//!   "requestedAt": "2024-05-01T12:00:00Z" }
//! ```

use crate::types::{ElectionId, OptionId, VoterId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event produced once per user-initiated vote submission
///
/// Never mutated after creation. The broker may deliver it more than once.
/// `requested_at` is the submission time and is what the election window is
/// checked against, not the processing time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequestedEvent {
    pub event_id: String,
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub option_id: OptionId,
    pub requested_at: DateTime<Utc>,
}

impl VoteRequestedEvent {
    /// Build an event for a submission happening now, with a fresh id
    pub fn new(election_id: ElectionId, voter_id: VoterId, option_id: OptionId) -> Self {
        Self::at(election_id, voter_id, option_id, Utc::now())
    }

    /// Build an event with an explicit submission time and a fresh id
    pub fn at(
        election_id: ElectionId,
        voter_id: VoterId,
        option_id: OptionId,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            election_id,
            voter_id,
            option_id,
            requested_at,
        }
    }

    /// Routing key: all events of one voter share a partition
    pub fn partition_key(&self) -> String {
        self.voter_id.to_string()
    }

    /// Reject events that cannot be de-duplicated
    pub fn validate(&self) -> Result<()> {
        if self.event_id.trim().is_empty() {
            return Err(Error::validation("eventId"));
        }
        Ok(())
    }

    /// Encode for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Vote submission as received by the intake service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub voter_id: VoterId,
    pub option_id: OptionId,
}

/// Acknowledgement returned once an event is durably queued
///
/// This does not mean the vote was recorded; processing happens later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoteAccepted {
    pub status: String,
    pub event_id: String,
}

impl VoteAccepted {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            status: "accepted".to_string(),
            event_id: event_id.into(),
        }
    }
}
