//! Storage contracts for the event processor
//!
//! Writes go through a [`Transaction`]: the processed-event insert and the
//! vote insert of one event either both commit or both roll back. Dropping a
//! transaction without calling [`Transaction::commit`] rolls it back.
//!
//! Inserts are conditional ("insert or report already-exists") and the
//! uniqueness checks live in the store, not in the caller, so concurrent
//! processors cannot race past a check-then-act.

pub mod memory;

use crate::Result;
use crate::types::{
    Election, ElectionId, ElectionOption, ElectionResults, NewVote, OptionId, ProcessedEventRecord,
    Vote, Voter, VoterId,
};
use async_trait::async_trait;

pub use memory::{InMemoryStore, MemoryTransaction, StoreStats};

/// Result of a conditional insert
#[derive(Debug, Clone, PartialEq)]
pub enum Insert<T> {
    /// The row was written
    Inserted(T),
    /// A row with the same unique key already exists; nothing was written
    AlreadyExists,
}

impl<T> Insert<T> {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Processed-event ledger: the de-duplication gate
#[async_trait]
pub trait ProcessedEventLedger: Send {
    /// Insert a record keyed by `event_id`, or report it already exists
    ///
    /// `occurred_at` is stamped by the store on first insert.
    async fn insert_processed_event(&mut self, event_id: &str)
    -> Result<Insert<ProcessedEventRecord>>;
}

/// Vote ledger enforcing one vote per (election, voter)
#[async_trait]
pub trait VoteStore: Send {
    /// Insert a vote, or report the voter already voted in the election
    async fn insert_vote(&mut self, vote: NewVote) -> Result<Insert<Vote>>;
}

/// Read access to records owned by the administrative side
///
/// Reads always return current state; callers must not cache across events.
#[async_trait]
pub trait ReferenceData: Send {
    async fn find_election(&mut self, id: ElectionId) -> Result<Option<Election>>;
    async fn find_voter(&mut self, id: VoterId) -> Result<Option<Voter>>;
    async fn find_option(&mut self, id: OptionId) -> Result<Option<ElectionOption>>;
}

/// One atomic unit of work bound to a single message handler invocation
#[async_trait]
pub trait Transaction: ProcessedEventLedger + VoteStore + ReferenceData {
    /// Make every write of this transaction visible
    async fn commit(&mut self) -> Result<()>;
}

/// Entry point to a storage backend
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    type Tx: Transaction;

    /// Start a transaction; fails with a transient error when unavailable
    async fn begin(&self) -> Result<Self::Tx>;

    /// Read an election outside any transaction
    async fn election(&self, id: ElectionId) -> Result<Option<Election>>;

    /// Whether an event id has been committed to the ledger
    async fn is_processed(&self, event_id: &str) -> Result<bool>;

    /// The committed vote of a voter in an election, if any
    async fn vote_of(&self, election_id: ElectionId, voter_id: VoterId) -> Result<Option<Vote>>;

    /// Grouped vote counts per option of an election
    async fn results(&self, election_id: ElectionId) -> Result<ElectionResults>;
}
