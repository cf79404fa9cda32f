//! Domain rules over already-resolved records
//!
//! Nothing here touches storage, so the rules can be tested on plain values.

use crate::outcome::ProcessOutcome;
use crate::types::{Election, ElectionId, ElectionOption, Voter};
use chrono::{DateTime, Utc};

/// Inclusive window check: `starts_at <= at <= ends_at`
pub fn within_window(election: &Election, at: DateTime<Utc>) -> bool {
    election.accepts_at(at)
}

/// True iff the voter is not blocked
pub fn is_active_voter(voter: &Voter) -> bool {
    voter.is_active()
}

/// True iff the option is one of the election's options
pub fn option_belongs_to_election(option: &ElectionOption, election_id: ElectionId) -> bool {
    option.election_id == election_id
}

/// Rule set applied by the event processor
///
/// Each `ensure_*` method turns a failed rule into the matching
/// [`ProcessOutcome`] so the processor can short-circuit with `?`-like flow.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoteValidator;

impl VoteValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_within_window(
        &self,
        election: &Election,
        at: DateTime<Utc>,
    ) -> std::result::Result<(), ProcessOutcome> {
        if within_window(election, at) {
            Ok(())
        } else {
            Err(ProcessOutcome::WindowViolation {
                requested_at: at,
                starts_at: election.starts_at,
                ends_at: election.ends_at,
            })
        }
    }

    pub fn ensure_active_voter(&self, voter: &Voter) -> std::result::Result<(), ProcessOutcome> {
        if is_active_voter(voter) {
            Ok(())
        } else {
            Err(ProcessOutcome::BlockedVoter { voter_id: voter.id })
        }
    }

    pub fn ensure_option_belongs(
        &self,
        option: &ElectionOption,
        election_id: ElectionId,
    ) -> std::result::Result<(), ProcessOutcome> {
        if option_belongs_to_election(option, election_id) {
            Ok(())
        } else {
            Err(ProcessOutcome::OptionNotInElection {
                option_id: option.id,
                election_id,
                option_election_id: option.election_id,
            })
        }
    }
}
