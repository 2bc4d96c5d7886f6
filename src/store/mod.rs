//! Persistence Contract
//!
//! The store the core runs against. Any backend offering row-set transactions
//! fits; [`InMemoryStore`] is the one shipped here.
//!
//! Writes that must land together travel as one [`WriteSet`]. A write set may
//! carry a session row guarded by the status it expects to replace, so a
//! completion racing an abandon loses at commit time even if both computed
//! their results.

mod lock;
mod memory;

pub use lock::{KeyGuard, KeyLocks};
pub use memory::InMemoryStore;

use async_trait::async_trait;

use crate::core::ids::{SessionId, UserId};
use crate::core::mode::{Category, Season};
use crate::ranking::elo::RatingRecord;
use crate::ranking::leaderboard::LeaderboardEntry;
use crate::ranking::stats::UserStats;
use crate::session::model::{GameSession, SessionStatus};
use crate::session::moves::MoveRecord;

/// Store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No session row with this id.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// Compare-and-set on the session status failed.
    #[error("session {session} expected {expected}, found {found}")]
    StatusConflict {
        /// Session written.
        session: SessionId,
        /// Status the writer read.
        expected: SessionStatus,
        /// Status actually stored.
        found: SessionStatus,
    },

    /// Session id already taken.
    #[error("session {0} already exists")]
    DuplicateSession(SessionId),

    /// Backend could not apply the write. Nothing was applied.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Session row guarded by the status it replaces.
#[derive(Debug, Clone)]
pub struct SessionWrite {
    /// New row.
    pub session: GameSession,
    /// Status the stored row must still have.
    pub expected: SessionStatus,
}

/// Whole-partition leaderboard rewrite.
#[derive(Debug, Clone)]
pub struct PartitionRewrite {
    /// Partition category.
    pub category: Category,
    /// Partition season.
    pub season: Season,
    /// Every row of the partition, ranked.
    pub rows: Vec<LeaderboardEntry>,
}

/// A group of writes applied all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct WriteSet {
    /// Optional guarded session row.
    pub session: Option<SessionWrite>,
    /// Rating rows.
    pub ratings: Vec<RatingRecord>,
    /// Stats rows.
    pub stats: Vec<UserStats>,
    /// Leaderboard partitions.
    pub partitions: Vec<PartitionRewrite>,
}

impl WriteSet {
    /// Empty write set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guarded session write.
    pub fn with_session(mut self, session: GameSession, expected: SessionStatus) -> Self {
        self.session = Some(SessionWrite { session, expected });
        self
    }

    /// Add a rating row.
    pub fn rating(mut self, record: RatingRecord) -> Self {
        self.ratings.push(record);
        self
    }

    /// Add a stats row.
    pub fn stats(mut self, stats: UserStats) -> Self {
        self.stats.push(stats);
        self
    }

    /// Add a partition rewrite.
    pub fn leaderboard(mut self, rewrite: PartitionRewrite) -> Self {
        self.partitions.push(rewrite);
        self
    }
}

/// Transactional storage for sessions, move logs, ratings, stats and leaderboards.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new session row.
    async fn insert_session(&self, session: &GameSession) -> Result<(), StoreError>;

    /// Load a session row.
    async fn session(&self, id: SessionId) -> Result<Option<GameSession>, StoreError>;

    /// Append to a session's move log.
    async fn append_move(&self, record: &MoveRecord) -> Result<(), StoreError>;

    /// A session's move log in append order.
    async fn moves(&self, id: SessionId) -> Result<Vec<MoveRecord>, StoreError>;

    /// A user's rating row, or a fresh default record.
    async fn rating(&self, user: UserId) -> Result<RatingRecord, StoreError>;

    /// A user's stats row, or an empty record.
    async fn stats(&self, user: UserId) -> Result<UserStats, StoreError>;

    /// A leaderboard partition in rank order.
    async fn leaderboard(
        &self,
        category: &Category,
        season: &Season,
    ) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// Apply a write set atomically.
    async fn commit(&self, writes: WriteSet) -> Result<(), StoreError>;
}

/// Lock key for one session.
pub fn session_key(id: SessionId) -> String {
    format!("session:{id}")
}

/// Lock key for one user's rating and stats rows.
pub fn user_key(id: UserId) -> String {
    format!("user:{id}")
}

/// Lock key for one leaderboard partition.
pub fn board_key(category: &Category, season: &Season) -> String {
    format!("board:{category}:{season}")
}
