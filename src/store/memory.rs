//! In-memory store.
//!
//! All tables sit behind one `RwLock`, so a commit holding the write guard is
//! trivially atomic with respect to every reader.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{Store, StoreError, WriteSet};
use crate::core::ids::{SessionId, UserId};
use crate::core::mode::{Category, Season};
use crate::ranking::elo::RatingRecord;
use crate::ranking::leaderboard::LeaderboardEntry;
use crate::ranking::stats::UserStats;
use crate::session::model::GameSession;
use crate::session::moves::MoveRecord;

#[derive(Default)]
struct Tables {
    sessions: HashMap<SessionId, GameSession>,
    moves: HashMap<SessionId, Vec<MoveRecord>>,
    ratings: BTreeMap<UserId, RatingRecord>,
    stats: BTreeMap<UserId, UserStats>,
    boards: BTreeMap<(Category, Season), Vec<LeaderboardEntry>>,
}

impl Tables {
    /// Renumber `rank_position` over every rating row: rating desc, then user id.
    fn rerank_ratings(&mut self) {
        let mut order: Vec<(i32, UserId)> =
            self.ratings.values().map(|r| (r.elo_rating, r.user_id)).collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        for (idx, (_, user)) in order.iter().enumerate() {
            if let Some(row) = self.ratings.get_mut(user) {
                row.rank_position = Some(idx as u32 + 1);
            }
        }
    }
}

/// Process-local [`Store`].
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    fail_next_write: AtomicBool,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write (`insert_session`, `append_move` or `commit`) fail
    /// with `Unavailable` before applying anything.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Result<(), StoreError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            warn!("Injected write failure");
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    /// Number of session rows.
    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_session(&self, session: &GameSession) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut tables = self.tables.write().await;
        if tables.sessions.contains_key(&session.id()) {
            return Err(StoreError::DuplicateSession(session.id()));
        }
        tables.sessions.insert(session.id(), session.clone());
        Ok(())
    }

    async fn session(&self, id: SessionId) -> Result<Option<GameSession>, StoreError> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn append_move(&self, record: &MoveRecord) -> Result<(), StoreError> {
        self.injected_failure()?;
        let mut tables = self.tables.write().await;
        if !tables.sessions.contains_key(&record.session_id) {
            return Err(StoreError::SessionNotFound(record.session_id));
        }
        tables.moves.entry(record.session_id).or_default().push(record.clone());
        Ok(())
    }

    async fn moves(&self, id: SessionId) -> Result<Vec<MoveRecord>, StoreError> {
        Ok(self.tables.read().await.moves.get(&id).cloned().unwrap_or_default())
    }

    async fn rating(&self, user: UserId) -> Result<RatingRecord, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.ratings.get(&user).cloned().unwrap_or_else(|| RatingRecord::new(user)))
    }

    async fn stats(&self, user: UserId) -> Result<UserStats, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.stats.get(&user).cloned().unwrap_or_else(|| UserStats::new(user)))
    }

    async fn leaderboard(
        &self,
        category: &Category,
        season: &Season,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .boards
            .get(&(category.clone(), season.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn commit(&self, writes: WriteSet) -> Result<(), StoreError> {
        self.injected_failure()?;

        let mut tables = self.tables.write().await;

        // Validate before touching anything.
        if let Some(write) = &writes.session {
            let id = write.session.id();
            let stored = tables.sessions.get(&id).ok_or(StoreError::SessionNotFound(id))?;
            if stored.status() != write.expected {
                return Err(StoreError::StatusConflict {
                    session: id,
                    expected: write.expected,
                    found: stored.status(),
                });
            }
        }

        let ratings_written = !writes.ratings.is_empty();

        if let Some(write) = writes.session {
            tables.sessions.insert(write.session.id(), write.session);
        }
        for record in writes.ratings {
            tables.ratings.insert(record.user_id, record);
        }
        for stats in writes.stats {
            tables.stats.insert(stats.user_id, stats);
        }
        for rewrite in writes.partitions {
            tables.boards.insert((rewrite.category, rewrite.season), rewrite.rows);
        }
        if ratings_written {
            tables.rerank_ratings();
        }

        debug!("Commit applied");
        Ok(())
    }
}
