//! Matchmaking Queue
//!
//! One FIFO waiting list per (mode, board size). A join scans its partition
//! for the first waiter within the rating gap and removes it in the same
//! critical section, so two concurrent joins can never take the same waiter.
//!
//! A global reservation index records, per user, whether they are `Waiting`
//! in some partition or `Pairing` (taken off a list, session not yet
//! created). Duplicate joins and leaves racing a match both resolve against
//! that index, and a disconnect landing mid-pairing is recorded there so the
//! fresh session is abandoned instead of stranding the other player. Locks
//! are always taken partition first, then index.
//!
//! Queue state is ephemeral. A restart drops every waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::core::ids::{SessionId, UserId};
use crate::core::mode::GameMode;
use crate::error::DuelError;
use crate::network::channel::{notify, RealtimeChannel};
use crate::network::protocol::ServerMessage;
use crate::ranking::elo::{RATING_CEILING, RATING_FLOOR};
use crate::session::registry::SessionRegistry;

/// Matchmaking partition key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    /// Mode.
    pub mode: GameMode,
    /// Board edge length.
    pub board_size: u8,
}

/// A player waiting for an opponent.
#[derive(Clone, Debug)]
pub struct WaitingPlayer {
    /// Player.
    pub user_id: UserId,
    /// Rating at join time.
    pub rating: i32,
    /// Join time.
    pub enqueued_at: DateTime<Utc>,
}

/// Result of a join.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Paired and a session was created.
    Matched {
        /// New session.
        session_id: SessionId,
        /// The waiter we were paired with.
        opponent: UserId,
    },
    /// No compatible waiter; appended.
    Queued {
        /// 1-based position in the partition.
        position: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reservation {
    Waiting(QueueKey),
    Pairing,
    /// Disconnected while being paired.
    Departed,
}

type Partition = Arc<Mutex<VecDeque<WaitingPlayer>>>;

/// Per-(mode, board size) matchmaking.
pub struct MatchmakingQueue {
    partitions: RwLock<HashMap<QueueKey, Partition>>,
    index: Mutex<HashMap<UserId, Reservation>>,
    registry: Arc<SessionRegistry>,
    channel: Arc<dyn RealtimeChannel>,
    config: ServiceConfig,
    matches_made: AtomicU64,
}

impl MatchmakingQueue {
    /// Create a queue that hands pairs to `registry`.
    pub fn new(
        registry: Arc<SessionRegistry>,
        channel: Arc<dyn RealtimeChannel>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
            registry,
            channel,
            config,
            matches_made: AtomicU64::new(0),
        }
    }

    fn partition(&self, key: QueueKey) -> Partition {
        if let Some(p) = self.partitions.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return p.clone();
        }
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    fn existing_partition(&self, key: QueueKey) -> Option<Partition> {
        self.partitions.read().unwrap_or_else(PoisonError::into_inner).get(&key).cloned()
    }

    /// Pair `user` with the first compatible waiter, or append them.
    ///
    /// A waiter found already bound to another session is dropped from the
    /// queue and the scan continues.
    #[instrument(skip(self), fields(user = %user.short()))]
    pub async fn join(
        &self,
        user: UserId,
        mode: GameMode,
        board_size: u8,
        rating: i32,
    ) -> Result<JoinOutcome, DuelError> {
        if !self.config.board_allowed(board_size) {
            return Err(DuelError::Validation(format!("board size {board_size} not allowed")));
        }
        if !(RATING_FLOOR..=RATING_CEILING).contains(&rating) {
            return Err(DuelError::Validation(format!("rating {rating} out of range")));
        }
        if self.registry.active_session_of(user).await.is_some() {
            return Err(DuelError::Conflict("already in a session".to_string()));
        }

        let key = QueueKey { mode, board_size };
        let partition = self.partition(key);
        let gap = u32::try_from(self.config.max_rating_gap).unwrap_or(0);

        loop {
            let (opponent, positions) = {
                let mut waiting = partition.lock().unwrap_or_else(PoisonError::into_inner);
                let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);

                if index.contains_key(&user) {
                    return Err(DuelError::Conflict("already queued".to_string()));
                }

                let pos = waiting.iter().position(|w| w.rating.abs_diff(rating) <= gap);
                let found = pos.and_then(|pos| waiting.remove(pos));

                match found {
                    Some(opponent) => {
                        index.insert(user, Reservation::Pairing);
                        index.insert(opponent.user_id, Reservation::Pairing);
                        (opponent, positions_of(&waiting))
                    }
                    None => {
                        waiting.push_back(WaitingPlayer { user_id: user, rating, enqueued_at: Utc::now() });
                        index.insert(user, Reservation::Waiting(key));
                        let position = waiting.len();
                        drop(index);
                        drop(waiting);

                        debug!("Queued {} for {} {}x{} at {}", user.short(), mode, board_size, board_size, position);
                        notify(
                            self.channel.as_ref(),
                            user,
                            ServerMessage::QueuePositionUpdate { mode, board_size, position },
                        );
                        return Ok(JoinOutcome::Queued { position });
                    }
                }
            };

            self.send_positions(key, &positions);

            // The earlier waiter is player one.
            let created = self
                .registry
                .create_session(opponent.user_id, Some(user), board_size, mode, Uuid::new_v4().to_string())
                .await;

            let error = match created {
                Ok(session_id) => {
                    let departed: Vec<UserId> = {
                        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
                        [user, opponent.user_id]
                            .into_iter()
                            .filter(|u| index.remove(u) == Some(Reservation::Departed))
                            .collect()
                    };
                    self.matches_made.fetch_add(1, Ordering::Relaxed);
                    info!(
                        "Matched {} ({}) with {} ({}) in session {}",
                        user.short(),
                        rating,
                        opponent.user_id.short(),
                        opponent.rating,
                        session_id.short()
                    );
                    for gone in departed {
                        if let Err(e) = self.registry.abandon(session_id, gone, "disconnected").await {
                            debug!("Session {} already final: {}", session_id.short(), e);
                        }
                    }
                    return Ok(JoinOutcome::Matched { session_id, opponent: opponent.user_id });
                }
                Err(e) => e,
            };

            let opponent_id = opponent.user_id;
            let opponent_busy = matches!(error, DuelError::Conflict(_))
                && self.registry.active_session_of(opponent_id).await.is_some();

            let positions = {
                let mut waiting = partition.lock().unwrap_or_else(PoisonError::into_inner);
                let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
                index.remove(&user);
                if opponent_busy || index.get(&opponent_id) == Some(&Reservation::Departed) {
                    index.remove(&opponent_id);
                } else {
                    waiting.push_front(opponent);
                    index.insert(opponent_id, Reservation::Waiting(key));
                }
                positions_of(&waiting)
            };
            self.send_positions(key, &positions);

            if opponent_busy {
                warn!("Dropped {} from the queue: already in a session", opponent_id.short());
                continue;
            }
            warn!("Session creation failed, returned {} to queue: {}", opponent_id.short(), error);
            return Err(error);
        }
    }

    /// Start a single-player session for a user who is not queued.
    ///
    /// The user holds a reservation in the index while the session is
    /// created, so a concurrent join for them is refused.
    #[instrument(skip(self, puzzle_ref), fields(user = %user.short()))]
    pub async fn start_solo(
        &self,
        user: UserId,
        mode: GameMode,
        board_size: u8,
        puzzle_ref: String,
    ) -> Result<SessionId, DuelError> {
        {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            if index.contains_key(&user) {
                return Err(DuelError::Conflict("leave the queue before starting solo play".to_string()));
            }
            index.insert(user, Reservation::Pairing);
        }

        let created = self.registry.create_session(user, None, board_size, mode, puzzle_ref).await;
        let departed =
            self.index.lock().unwrap_or_else(PoisonError::into_inner).remove(&user) == Some(Reservation::Departed);

        let session_id = created?;
        if departed {
            if let Err(e) = self.registry.abandon(session_id, user, "disconnected").await {
                debug!("Session {} already final: {}", session_id.short(), e);
            }
        }
        Ok(session_id)
    }

    /// Leave the `mode` queue. False when not waiting there, including when
    /// already taken for a match.
    pub fn leave(&self, user: UserId, mode: GameMode) -> bool {
        self.remove_where(user, |key| key.mode == mode)
    }

    /// Remove `user` from whichever partition they wait in.
    ///
    /// A user caught mid-pairing is flagged instead; the join that took them
    /// abandons the new session on their behalf once it exists.
    pub fn remove_everywhere(&self, user: UserId) -> bool {
        {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            if index.get(&user) == Some(&Reservation::Pairing) {
                index.insert(user, Reservation::Departed);
                return false;
            }
        }
        self.remove_where(user, |_| true)
    }

    fn remove_where(&self, user: UserId, accept: impl Fn(&QueueKey) -> bool) -> bool {
        let key = match self.index.lock().unwrap_or_else(PoisonError::into_inner).get(&user) {
            Some(Reservation::Waiting(key)) if accept(key) => *key,
            _ => return false,
        };
        let Some(partition) = self.existing_partition(key) else {
            return false;
        };

        let positions = {
            let mut waiting = partition.lock().unwrap_or_else(PoisonError::into_inner);
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);

            // A join may have taken the user between the peek and the lock.
            if index.get(&user) != Some(&Reservation::Waiting(key)) {
                return false;
            }
            let Some(pos) = waiting.iter().position(|w| w.user_id == user) else {
                return false;
            };
            waiting.remove(pos);
            index.remove(&user);
            positions_of(&waiting)
        };

        debug!("{} left {} {}x{}", user.short(), key.mode, key.board_size, key.board_size);
        self.send_positions(key, &positions);
        true
    }

    fn send_positions(&self, key: QueueKey, positions: &[(UserId, usize)]) {
        for &(user, position) in positions {
            notify(
                self.channel.as_ref(),
                user,
                ServerMessage::QueuePositionUpdate { mode: key.mode, board_size: key.board_size, position },
            );
        }
    }

    /// 1-based position of a waiting user.
    pub fn position(&self, user: UserId) -> Option<usize> {
        let key = match self.index.lock().unwrap_or_else(PoisonError::into_inner).get(&user) {
            Some(Reservation::Waiting(key)) => *key,
            _ => return None,
        };
        let partition = self.existing_partition(key)?;
        let waiting = partition.lock().unwrap_or_else(PoisonError::into_inner);
        waiting.iter().position(|w| w.user_id == user).map(|p| p + 1)
    }

    /// Is `user` waiting or being paired.
    pub fn is_queued(&self, user: UserId) -> bool {
        self.index.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&user)
    }

    /// Waiting count per non-empty partition.
    pub fn queue_status(&self) -> Vec<(QueueKey, usize)> {
        let partitions = self.partitions.read().unwrap_or_else(PoisonError::into_inner);
        let mut status: Vec<(QueueKey, usize)> = partitions
            .iter()
            .map(|(key, p)| (*key, p.lock().unwrap_or_else(PoisonError::into_inner).len()))
            .filter(|(_, len)| *len > 0)
            .collect();
        status.sort();
        status
    }

    /// Pairs formed since start.
    pub fn matches_made(&self) -> u64 {
        self.matches_made.load(Ordering::Relaxed)
    }
}

fn positions_of(waiting: &VecDeque<WaitingPlayer>) -> Vec<(UserId, usize)> {
    waiting.iter().enumerate().map(|(idx, w)| (w.user_id, idx + 1)).collect()
}
