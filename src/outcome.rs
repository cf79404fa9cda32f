//! Outcome of processing one delivered vote-request event

use crate::types::{ElectionId, OptionId, Vote, VoterId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference carried by an event that does not resolve to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingReference {
    Election(ElectionId),
    Voter(VoterId),
    Option(OptionId),
}

impl fmt::Display for MissingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Election(id) => write!(f, "election {id} not found"),
            Self::Voter(id) => write!(f, "voter {id} not found"),
            Self::Option(id) => write!(f, "option {id} not found"),
        }
    }
}

/// Result of [`crate::processor::EventProcessor::process`]
///
/// Only [`ProcessOutcome::TransientFailure`] asks for redelivery. Every other
/// variant is final for this delivery and is not retried automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessOutcome {
    /// A new vote was recorded
    Accepted { vote: Vote },

    /// The event id was already in the processed-event ledger
    DuplicateEvent,

    /// The voter already has a vote for this election under another event id
    DuplicateVote,

    /// Election, voter or option does not exist; the event stays unprocessed
    ReferenceNotFound { reference: MissingReference },

    /// Submitted outside the election window
    WindowViolation {
        requested_at: DateTime<Utc>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },

    /// The voter is blocked at processing time
    BlockedVoter { voter_id: VoterId },

    /// The option belongs to a different election
    OptionNotInElection {
        option_id: OptionId,
        election_id: ElectionId,
        option_election_id: ElectionId,
    },

    /// The event cannot be processed at all (e.g. empty event id)
    Malformed { reason: String },

    /// Storage was unavailable; retrying the whole message may succeed
    TransientFailure { reason: String },
}

impl ProcessOutcome {
    /// Whether the broker should deliver the message again
    pub fn should_redeliver(&self) -> bool {
        matches!(self, Self::TransientFailure { .. })
    }

    /// Whether a vote row was written
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Silent no-ops: the event or the vote was already handled
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateEvent | Self::DuplicateVote)
    }

    /// Events dropped because their data or a business rule forbids the vote
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ReferenceNotFound { .. }
                | Self::WindowViolation { .. }
                | Self::BlockedVoter { .. }
                | Self::OptionNotInElection { .. }
                | Self::Malformed { .. }
        )
    }

    /// Outcomes worth manual review when a dead-letter queue is configured
    ///
    /// Business-rule rejections are correct final answers and are not
    /// included; dangling references and malformed events may point at a
    /// race with the administrative side or at a producer bug.
    pub fn should_dead_letter(&self) -> bool {
        matches!(
            self,
            Self::ReferenceNotFound { .. } | Self::Malformed { .. } | Self::TransientFailure { .. }
        )
    }

    /// Short stable label for logs and counters
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::DuplicateEvent => "duplicate_event",
            Self::DuplicateVote => "duplicate_vote",
            Self::ReferenceNotFound { .. } => "reference_not_found",
            Self::WindowViolation { .. } => "window_violation",
            Self::BlockedVoter { .. } => "blocked_voter",
            Self::OptionNotInElection { .. } => "option_not_in_election",
            Self::Malformed { .. } => "malformed",
            Self::TransientFailure { .. } => "transient_failure",
        }
    }
}

impl fmt::Display for ProcessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted { vote } => write!(f, "vote {} recorded", vote.id),
            Self::DuplicateEvent => write!(f, "event already processed"),
            Self::DuplicateVote => write!(f, "voter already voted in this election"),
            Self::ReferenceNotFound { reference } => write!(f, "{reference}"),
            Self::WindowViolation {
                requested_at,
                starts_at,
                ends_at,
            } => write!(
                f,
                "vote requested at {requested_at} outside election window [{starts_at}, {ends_at}]"
            ),
            Self::BlockedVoter { voter_id } => write!(f, "voter {voter_id} is blocked"),
            Self::OptionNotInElection {
                option_id,
                election_id,
                option_election_id,
            } => write!(
                f,
                "option {option_id} belongs to election {option_election_id}, not {election_id}"
            ),
            Self::Malformed { reason } => write!(f, "malformed event: {reason}"),
            Self::TransientFailure { reason } => write!(f, "transient failure: {reason}"),
        }
    }
}
