//! # Core Types for the Vote Intake Pipeline
//!
//! Records read and written by the event processor. Elections, voters and
//! options are owned by the administrative side of the system and are
//! read-only here; votes and processed-event records are written only by
//! the processor.
//!
//! ## Type Categories
//!
//! ### Reference Data (read-only to the pipeline)
//! - [`Election`]: voting window
//! - [`Voter`]: registered voter with a blocked flag
//! - [`ElectionOption`]: a choice belonging to exactly one election
//!
//! ### Pipeline-Owned Records
//! - [`Vote`]: at most one per (election, voter)
//! - [`ProcessedEventRecord`]: the de-duplication ledger entry
//!
//! ### Reporting
//! - [`OptionResult`] and [`ElectionResults`]: grouped vote counts
//!
//! ## Usage Examples
//!
//! ```rust
//! use vote_intake::types::Election;
//! use chrono::{Duration, Utc};
//!
//! let now = Utc::now();
//! let election = Election {
//!     id: 1,
//!     name: "Board Election".to_string(),
//!     description: None,
//!     starts_at: now - Duration::hours(1),
//!     ends_at: now + Duration::hours(1),
//!     created_at: now,
//! };
//!
//! assert!(election.accepts_at(now));
//! assert!(!election.accepts_at(now + Duration::hours(2)));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Election identifier
pub type ElectionId = i64;

/// Voter identifier
pub type VoterId = i64;

/// Election option identifier
pub type OptionId = i64;

/// Vote row identifier, assigned by the store
pub type VoteId = i64;

/// An election and its acceptance window
///
/// A vote is acceptable when its submission time satisfies
/// `starts_at <= requested_at <= ends_at`. Both bounds are inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Election {
    /// Unique election identifier
    pub id: ElectionId,

    /// Human-readable election name
    pub name: String,

    /// Optional detailed description
    pub description: Option<String>,

    /// First instant at which votes are accepted
    pub starts_at: DateTime<Utc>,

    /// Last instant at which votes are accepted
    pub ends_at: DateTime<Utc>,

    /// When the election record was created
    pub created_at: DateTime<Utc>,
}

impl Election {
    /// Check whether a vote submitted at `at` falls inside the window
    ///
    /// # Examples
    ///
    /// ```rust
    /// use vote_intake::types::Election;
    /// use chrono::{Duration, Utc};
    ///
    /// let now = Utc::now();
    /// let election = Election {
    ///     id: 7,
    ///     name: "Budget".to_string(),
    ///     description: None,
    ///     starts_at: now,
    ///     ends_at: now + Duration::days(1),
    ///     created_at: now,
    /// };
    ///
    /// // Both bounds are inclusive
    /// assert!(election.accepts_at(election.starts_at));
    /// assert!(election.accepts_at(election.ends_at));
    /// assert!(!election.accepts_at(election.ends_at + Duration::seconds(1)));
    /// ```
    pub fn accepts_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at <= self.ends_at
    }

    /// Check whether the election is open right now
    pub fn is_open(&self) -> bool {
        self.accepts_at(Utc::now())
    }
}

/// A registered voter
///
/// The administrative subsystem may block a voter at any time; the
/// processor re-reads this record for every event so a block applies to
/// every vote processed after it, whenever that vote was submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Voter {
    /// Unique voter identifier
    pub id: VoterId,

    /// Contact e-mail, unique across voters
    pub email: String,

    /// Display name
    pub full_name: String,

    /// Blocked voters cannot have votes recorded
    pub blocked: bool,

    /// When the voter record was created
    pub created_at: DateTime<Utc>,
}

impl Voter {
    /// Voter that is not blocked
    pub fn is_active(&self) -> bool {
        !self.blocked
    }
}

/// A selectable option of one election
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElectionOption {
    /// Unique option identifier
    pub id: OptionId,

    /// Election this option belongs to
    pub election_id: ElectionId,

    /// Label shown on the ballot, unique within its election
    pub label: String,
}

/// A recorded vote
///
/// The store enforces at most one vote per `(election_id, voter_id)`.
/// Votes are immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: VoteId,
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub option_id: OptionId,

    /// Set by the store on insert
    pub created_at: DateTime<Utc>,
}

/// A vote about to be inserted; the store assigns `id` and `created_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewVote {
    pub election_id: ElectionId,
    pub voter_id: VoterId,
    pub option_id: OptionId,
}

impl NewVote {
    /// Key of the one-vote-per-voter uniqueness constraint
    pub fn unique_key(&self) -> (ElectionId, VoterId) {
        (self.election_id, self.voter_id)
    }
}

/// Ledger entry marking an event id as handled
///
/// Existence of the record is the only de-duplication signal. Records are
/// never updated and never deleted in normal operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedEventRecord {
    pub event_id: String,

    /// Set by the store on first insert
    pub occurred_at: DateTime<Utc>,
}

/// Vote count for one option
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionResult {
    pub option_id: OptionId,
    pub label: String,
    pub votes: u64,
}

/// Grouped vote counts for one election, ordered by option id
///
/// Options without votes are included with a count of zero.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElectionResults {
    pub election_id: ElectionId,
    pub options: Vec<OptionResult>,
}

impl ElectionResults {
    /// Total number of recorded votes
    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }

    /// Votes recorded for a single option, zero when unknown
    pub fn votes_for(&self, option_id: OptionId) -> u64 {
        self.options
            .iter()
            .find(|o| o.option_id == option_id)
            .map(|o| o.votes)
            .unwrap_or(0)
    }
}
