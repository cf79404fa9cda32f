//! In-memory storage backend
//!
//! All tables sit behind one async mutex. A transaction owns the guard for
//! its whole lifetime, giving serializable isolation, and keeps an undo log
//! that is replayed when it is dropped without a commit.

use super::{Insert, ProcessedEventLedger, ReferenceData, Storage, Transaction, VoteStore};
use crate::types::{
    Election, ElectionId, ElectionOption, ElectionResults, NewVote, OptionId, OptionResult,
    ProcessedEventRecord, Vote, VoteId, Voter, VoterId,
};
use crate::{Error, Result, store_error};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct Tables {
    elections: BTreeMap<ElectionId, Election>,
    voters: BTreeMap<VoterId, Voter>,
    options: BTreeMap<OptionId, ElectionOption>,
    votes: BTreeMap<VoteId, Vote>,
    /// Unique index over (election_id, voter_id)
    vote_index: HashMap<(ElectionId, VoterId), VoteId>,
    /// Primary key index over event_id
    processed_events: HashMap<String, ProcessedEventRecord>,
    next_vote_id: VoteId,
}

/// Serialized form of all tables
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    elections: Vec<Election>,
    voters: Vec<Voter>,
    options: Vec<ElectionOption>,
    votes: Vec<Vote>,
    processed_events: Vec<ProcessedEventRecord>,
}

impl Tables {
    fn to_snapshot(&self) -> Snapshot {
        let mut processed_events: Vec<_> = self.processed_events.values().cloned().collect();
        processed_events.sort_by(|a, b| a.event_id.cmp(&b.event_id));

        Snapshot {
            elections: self.elections.values().cloned().collect(),
            voters: self.voters.values().cloned().collect(),
            options: self.options.values().cloned().collect(),
            votes: self.votes.values().cloned().collect(),
            processed_events,
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let mut tables = Tables {
            elections: snapshot.elections.into_iter().map(|e| (e.id, e)).collect(),
            voters: snapshot.voters.into_iter().map(|v| (v.id, v)).collect(),
            options: snapshot.options.into_iter().map(|o| (o.id, o)).collect(),
            ..Tables::default()
        };

        for vote in snapshot.votes {
            let key = (vote.election_id, vote.voter_id);
            if tables.vote_index.insert(key, vote.id).is_some() {
                return Err(Error::internal(format!(
                    "Snapshot holds two votes for election {} voter {}",
                    key.0, key.1
                )));
            }
            tables.next_vote_id = tables.next_vote_id.max(vote.id);
            tables.votes.insert(vote.id, vote);
        }

        for record in snapshot.processed_events {
            if tables
                .processed_events
                .insert(record.event_id.clone(), record)
                .is_some()
            {
                return Err(Error::internal("Snapshot holds a duplicated event id"));
            }
        }

        Ok(tables)
    }
}

#[derive(Debug, Default)]
struct Counters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Row counts and transaction statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub elections: usize,
    pub voters: usize,
    pub options: usize,
    pub votes: usize,
    pub processed_events: usize,
    pub commits: u64,
    pub rollbacks: u64,
}

/// Thread-safe in-memory store
///
/// Besides the [`Storage`] contract it exposes a few write methods that
/// stand in for the administrative subsystem (elections, voters, options).
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
    counters: Arc<Counters>,
    fail_next: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an election
    pub async fn put_election(&self, election: Election) {
        let mut tables = self.tables.lock().await;
        tables.elections.insert(election.id, election);
    }

    /// Remove an election and its options; recorded votes are kept
    pub async fn remove_election(&self, id: ElectionId) -> bool {
        let mut tables = self.tables.lock().await;
        tables.options.retain(|_, option| option.election_id != id);
        tables.elections.remove(&id).is_some()
    }

    /// Create or replace a voter
    pub async fn put_voter(&self, voter: Voter) {
        let mut tables = self.tables.lock().await;
        tables.voters.insert(voter.id, voter);
    }

    /// Block or unblock a voter
    pub async fn set_voter_blocked(&self, id: VoterId, blocked: bool) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let voter = tables
            .voters
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("voter {id}")))?;
        voter.blocked = blocked;
        tracing::info!(voter_id = id, blocked, "Voter block flag updated");
        Ok(())
    }

    /// Create or replace an election option
    pub async fn put_option(&self, option: ElectionOption) {
        let mut tables = self.tables.lock().await;
        tables.options.insert(option.id, option);
    }

    /// Make the next `count` calls to [`Storage::begin`] fail transiently
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// All committed votes, ordered by id
    pub async fn votes(&self) -> Vec<Vote> {
        let tables = self.tables.lock().await;
        tables.votes.values().cloned().collect()
    }

    pub async fn stats(&self) -> StoreStats {
        let tables = self.tables.lock().await;
        StoreStats {
            elections: tables.elections.len(),
            voters: tables.voters.len(),
            options: tables.options.len(),
            votes: tables.votes.len(),
            processed_events: tables.processed_events.len(),
            commits: self.counters.commits.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
        }
    }

    /// Write every table to a JSON file
    pub async fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = {
            let tables = self.tables.lock().await;
            serde_json::to_vec_pretty(&tables.to_snapshot())?
        };
        tokio::fs::write(path.as_ref(), bytes).await?;
        tracing::debug!(path = %path.as_ref().display(), "Store snapshot saved");
        Ok(())
    }

    /// Rebuild a store, including its unique indexes, from a JSON file
    pub async fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let tables = Tables::from_snapshot(snapshot)?;

        Ok(Self {
            tables: Arc::new(Mutex::new(tables)),
            counters: Arc::default(),
            fail_next: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(store_error!("store unavailable (injected failure)"));
        }

        let tables = self.tables.clone().lock_owned().await;
        Ok(MemoryTransaction {
            tables,
            undo: Vec::new(),
            committed: false,
            counters: self.counters.clone(),
        })
    }

    async fn election(&self, id: ElectionId) -> Result<Option<Election>> {
        let tables = self.tables.lock().await;
        Ok(tables.elections.get(&id).cloned())
    }

    async fn is_processed(&self, event_id: &str) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables.processed_events.contains_key(event_id))
    }

    async fn vote_of(&self, election_id: ElectionId, voter_id: VoterId) -> Result<Option<Vote>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .vote_index
            .get(&(election_id, voter_id))
            .and_then(|id| tables.votes.get(id))
            .cloned())
    }

    async fn results(&self, election_id: ElectionId) -> Result<ElectionResults> {
        let tables = self.tables.lock().await;
        if !tables.elections.contains_key(&election_id) {
            return Err(Error::not_found(format!("election {election_id}")));
        }

        let mut counts: HashMap<OptionId, u64> = HashMap::new();
        for vote in tables.votes.values().filter(|v| v.election_id == election_id) {
            *counts.entry(vote.option_id).or_insert(0) += 1;
        }

        let options = tables
            .options
            .values()
            .filter(|o| o.election_id == election_id)
            .map(|o| OptionResult {
                option_id: o.id,
                label: o.label.clone(),
                votes: counts.get(&o.id).copied().unwrap_or(0),
            })
            .collect();

        Ok(ElectionResults {
            election_id,
            options,
        })
    }
}

enum Undo {
    ProcessedEvent(String),
    Vote {
        id: VoteId,
        key: (ElectionId, VoterId),
    },
}

/// Transaction over [`InMemoryStore`]
///
/// Holds the table lock until dropped. Writes are applied in place and
/// undone on drop unless [`Transaction::commit`] succeeded.
pub struct MemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    undo: Vec<Undo>,
    committed: bool,
    counters: Arc<Counters>,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<()> {
        if self.committed {
            return Err(Error::internal("transaction already committed"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessedEventLedger for MemoryTransaction {
    async fn insert_processed_event(&mut self, event_id: &str) -> Result<Insert<ProcessedEventRecord>> {
        self.ensure_open()?;
        if self.tables.processed_events.contains_key(event_id) {
            return Ok(Insert::AlreadyExists);
        }

        let record = ProcessedEventRecord {
            event_id: event_id.to_string(),
            occurred_at: Utc::now(),
        };
        self.tables
            .processed_events
            .insert(record.event_id.clone(), record.clone());
        self.undo.push(Undo::ProcessedEvent(record.event_id.clone()));
        Ok(Insert::Inserted(record))
    }
}

#[async_trait]
impl VoteStore for MemoryTransaction {
    async fn insert_vote(&mut self, vote: NewVote) -> Result<Insert<Vote>> {
        self.ensure_open()?;
        let key = vote.unique_key();
        if self.tables.vote_index.contains_key(&key) {
            return Ok(Insert::AlreadyExists);
        }

        self.tables.next_vote_id += 1;
        let row = Vote {
            id: self.tables.next_vote_id,
            election_id: vote.election_id,
            voter_id: vote.voter_id,
            option_id: vote.option_id,
            created_at: Utc::now(),
        };
        self.tables.vote_index.insert(key, row.id);
        self.tables.votes.insert(row.id, row.clone());
        self.undo.push(Undo::Vote { id: row.id, key });
        Ok(Insert::Inserted(row))
    }
}

#[async_trait]
impl ReferenceData for MemoryTransaction {
    async fn find_election(&mut self, id: ElectionId) -> Result<Option<Election>> {
        Ok(self.tables.elections.get(&id).cloned())
    }

    async fn find_voter(&mut self, id: VoterId) -> Result<Option<Voter>> {
        Ok(self.tables.voters.get(&id).cloned())
    }

    async fn find_option(&mut self, id: OptionId) -> Result<Option<ElectionOption>> {
        Ok(self.tables.options.get(&id).cloned())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.committed = true;
        self.undo.clear();
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        for entry in self.undo.drain(..).rev() {
            match entry {
                Undo::ProcessedEvent(event_id) => {
                    self.tables.processed_events.remove(&event_id);
                }
                Undo::Vote { id, key } => {
                    self.tables.votes.remove(&id);
                    self.tables.vote_index.remove(&key);
                }
            }
        }
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
    }
}
