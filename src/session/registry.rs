//! Session Registry
//!
//! Owns every mutation of a [`GameSession`]: creation, move relay, the
//! completion unit and abandonment.
//!
//! Completion runs under the session, user and leaderboard-partition lock
//! keys. Inside that critical section it re-reads the session, computes stats,
//! rating and leaderboard rows, and commits them with the session row in one
//! [`WriteSet`] guarded by `expected = in_progress`. A second completion, or a
//! completion losing to an abandon, finds a terminal status and fails with
//! `Conflict` before writing anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServiceConfig;
use crate::core::ids::{SessionId, UserId};
use crate::core::mode::{Category, GameMode};
use crate::error::DuelError;
use crate::network::channel::{notify, RealtimeChannel};
use crate::network::protocol::{
    CompletionReport, MatchFoundInfo, RatingDeltaInfo, ServerMessage, SessionEndInfo,
};
use crate::ranking::elo::{self, Outcome};
use crate::ranking::leaderboard::{LeaderboardIndex, Submission};
use crate::ranking::stats::{self, MatchOutcome};
use crate::session::model::{Finish, GameSession, PlayerMetrics, SessionStatus};
use crate::session::moves::{self, MoveData, MoveKind, MoveRecord};
use crate::store::{
    board_key, session_key, user_key, KeyLocks, PartitionRewrite, Store, StoreError, WriteSet,
};

/// What a successful completion wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSummary {
    /// Session.
    pub session_id: SessionId,
    /// Terminal status reached.
    pub status: SessionStatus,
    /// Winner, if any.
    pub winner: Option<UserId>,
    /// Rating changes, empty for solo.
    pub rating_deltas: Vec<RatingDeltaInfo>,
    /// Winner's rank in each leaderboard it was submitted to.
    pub leaderboard_ranks: BTreeMap<Category, u32>,
}

/// Lifecycle owner for game sessions.
pub struct SessionRegistry {
    store: Arc<dyn Store>,
    channel: Arc<dyn RealtimeChannel>,
    locks: Arc<KeyLocks>,
    leaderboard: Arc<LeaderboardIndex>,
    config: ServiceConfig,
    /// Users bound to a non-terminal session.
    active: RwLock<HashMap<UserId, SessionId>>,
    /// Highest accepted move number per (session, player).
    last_moves: Mutex<HashMap<(SessionId, UserId), u32>>,
}

impl SessionRegistry {
    /// Create a registry.
    pub fn new(
        store: Arc<dyn Store>,
        channel: Arc<dyn RealtimeChannel>,
        locks: Arc<KeyLocks>,
        leaderboard: Arc<LeaderboardIndex>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            channel,
            locks,
            leaderboard,
            config,
            active: RwLock::new(HashMap::new()),
            last_moves: Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Create a session, start it, bind the players and notify them.
    ///
    /// `player2 == None` creates a single-player session.
    #[instrument(skip(self, puzzle_ref), fields(p1 = %player1.short()))]
    pub async fn create_session(
        &self,
        player1: UserId,
        player2: Option<UserId>,
        board_size: u8,
        mode: GameMode,
        puzzle_ref: String,
    ) -> Result<SessionId, DuelError> {
        if !self.config.board_allowed(board_size) {
            return Err(DuelError::Validation(format!("board size {board_size} not allowed")));
        }
        if player2 == Some(player1) {
            return Err(DuelError::Validation("a player cannot face themselves".to_string()));
        }

        let mut session = GameSession::new(
            SessionId::generate(),
            player1,
            player2,
            board_size,
            mode,
            puzzle_ref,
            Utc::now(),
        );
        let session_id = session.id();
        let participants = session.participants();

        // Reserve the bindings first so no concurrent creation can claim these users.
        {
            let mut active = self.active.write().await;
            if let Some(busy) = participants.iter().find(|u| active.contains_key(u)) {
                return Err(DuelError::Conflict(format!("user {} already in a session", busy.short())));
            }
            for user in &participants {
                active.insert(*user, session_id);
            }
        }

        if let Err(e) = self.persist_started(&mut session).await {
            self.release(&session).await;
            return Err(e);
        }

        info!(
            "Session {} started: {} {}x{} ({} players)",
            session_id.short(),
            mode,
            board_size,
            board_size,
            participants.len()
        );

        let info = MatchFoundInfo {
            session_id,
            board_size,
            mode,
            player1,
            player2,
            puzzle_ref: session.puzzle_ref().to_string(),
        };
        for user in participants {
            notify(self.channel.as_ref(), user, ServerMessage::MatchFound(info.clone()));
        }

        Ok(session_id)
    }

    /// The row is written once, already `in_progress`, so a failed write leaves nothing behind.
    async fn persist_started(&self, session: &mut GameSession) -> Result<(), DuelError> {
        session.start(Utc::now())?;
        self.store.insert_session(session).await?;
        Ok(())
    }

    // =========================================================================
    // MOVES
    // =========================================================================

    /// Append a move to the log and relay it to the opponent.
    ///
    /// Rejects moves for sessions not `in_progress` and move numbers that do
    /// not strictly increase for that player.
    pub async fn record_move(
        &self,
        session_id: SessionId,
        user: UserId,
        data: MoveData,
    ) -> Result<(), DuelError> {
        let session = self.load(session_id).await?;
        if !session.is_participant(user) {
            return Err(DuelError::Validation(format!(
                "user {} not in session {}",
                user.short(),
                session_id.short()
            )));
        }
        if session.status() != SessionStatus::InProgress {
            warn!(
                "Dropping move from {} for {} session {}",
                user.short(),
                session.status(),
                session_id.short()
            );
            return Err(DuelError::Conflict(format!("session {}", session.status())));
        }

        {
            let mut last_moves = self.last_moves.lock().unwrap_or_else(PoisonError::into_inner);
            let last = last_moves.entry((session_id, user)).or_insert(0);
            if data.move_number <= *last {
                debug!(
                    "Stale move {} from {} (last {})",
                    data.move_number,
                    user.short(),
                    *last
                );
                return Err(DuelError::Conflict(format!(
                    "move {} not after {}",
                    data.move_number, *last
                )));
            }
        }

        let record = MoveRecord {
            session_id,
            user_id: user,
            move_number: data.move_number,
            kind: data.kind.clone(),
            recorded_at: Utc::now(),
        };
        self.store.append_move(&record).await?;

        // Only a stored move consumes its number.
        {
            let mut last_moves = self.last_moves.lock().unwrap_or_else(PoisonError::into_inner);
            let last = last_moves.entry((session_id, user)).or_insert(0);
            *last = (*last).max(data.move_number);
        }

        if let Some(opponent) = session.opponent_of(user) {
            let message = match data.kind {
                MoveKind::Powerup { kind } => ServerMessage::PowerupRelayed {
                    session_id,
                    user_id: user,
                    move_number: data.move_number,
                    powerup: kind,
                },
                MoveKind::Slide { .. } => {
                    ServerMessage::MoveRelayed { session_id, user_id: user, data }
                }
            };
            notify(self.channel.as_ref(), opponent, message);
        }

        Ok(())
    }

    // =========================================================================
    // COMPLETION
    // =========================================================================

    /// Finish a session and apply stats, rating and leaderboard updates as one unit.
    ///
    /// Fails with `Conflict` if the session is already terminal, writing nothing.
    /// A `TransientStore` error means nothing was written and the same call may
    /// be retried.
    #[instrument(skip(self, report), fields(session = %session_id.short(), reporter = %reporter.short()))]
    pub async fn complete(
        &self,
        session_id: SessionId,
        reporter: UserId,
        report: CompletionReport,
    ) -> Result<CompletionSummary, DuelError> {
        let snapshot = self.load(session_id).await?;
        if snapshot.status().is_terminal() {
            return Err(DuelError::Conflict(format!("session already {}", snapshot.status())));
        }
        if !report.completion_time_secs.is_finite() || report.completion_time_secs < 0.0 {
            return Err(DuelError::Validation("completion time out of range".to_string()));
        }
        if !snapshot.is_participant(reporter) {
            return Err(DuelError::Validation(format!(
                "user {} not in session {}",
                reporter.short(),
                session_id.short()
            )));
        }
        if let Some(winner) = report.winner_id {
            if !snapshot.is_participant(winner) {
                return Err(DuelError::Validation(format!("winner {} not in session", winner.short())));
            }
        }

        let season = self.config.season.clone();
        let categories = match report.winner_id {
            Some(_) => {
                let mut cats = Category::qualifying(snapshot.mode(), snapshot.board_size());
                cats.push(Category::wins_overall());
                cats
            }
            None => Vec::new(),
        };

        let keys = std::iter::once(session_key(session_id))
            .chain(snapshot.participants().into_iter().map(user_key))
            .chain(categories.iter().map(|c| board_key(c, &season)));
        let _guard = self.locks.acquire(keys).await;

        // Re-read under the lock: an abandon or another completion may have won.
        let mut session = self.load(session_id).await?;
        if session.status().is_terminal() {
            return Err(DuelError::Conflict(format!("session already {}", session.status())));
        }
        if session.status() != SessionStatus::InProgress {
            return Err(DuelError::Conflict(format!("session {}", session.status())));
        }

        let log = self.store.moves(session_id).await?;
        let now = Utc::now();
        let elapsed = session
            .started_at()
            .map(|t| (now - t).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        let participants = session.participants();
        let owner = report.winner_id.unwrap_or(reporter);

        let mut metrics: BTreeMap<UserId, PlayerMetrics> = participants
            .iter()
            .map(|&user| {
                let (move_count, time_secs) = if user == owner {
                    (report.move_count, report.completion_time_secs)
                } else {
                    (moves::slide_count(&log, user), elapsed)
                };
                let entry = PlayerMetrics {
                    moves: move_count,
                    time_secs,
                    rating_delta: 0,
                    powerups_used: moves::powerups_used(&log, user),
                };
                (user, entry)
            })
            .collect();

        let mut writes = WriteSet::new();

        // Stats for every participant.
        let mut stats_after = BTreeMap::new();
        for &user in &participants {
            let current = self.store.stats(user).await?;
            let played = &metrics[&user];
            let next = stats::apply(
                &current,
                &MatchOutcome {
                    is_win: report.winner_id == Some(user),
                    completion_time_secs: played.time_secs,
                    move_count: played.moves,
                    board_size: session.board_size(),
                    mode: session.mode(),
                    finished_at: now,
                },
            );
            stats_after.insert(user, next.total_wins);
            writes = writes.stats(next);
        }

        // Ratings, two human players only.
        let mut rating_deltas = Vec::new();
        if let Some(player2) = session.player2() {
            let player1 = session.player1();
            let r1 = self.store.rating(player1).await?;
            let r2 = self.store.rating(player2).await?;
            let outcome = match report.winner_id {
                Some(w) if w == player1 => Outcome::AWin,
                Some(_) => Outcome::BWin,
                None => Outcome::Draw,
            };
            let deltas = elo::compute(r1.elo_rating, r2.elo_rating, outcome);
            let p1_won = match outcome {
                Outcome::AWin => Some(true),
                Outcome::BWin => Some(false),
                Outcome::Draw => None,
            };
            let n1 = r1.after_game(deltas.delta_a, p1_won);
            let n2 = r2.after_game(deltas.delta_b, p1_won.map(|won| !won));

            for (user, delta, record) in [(player1, deltas.delta_a, &n1), (player2, deltas.delta_b, &n2)] {
                if let Some(m) = metrics.get_mut(&user) {
                    m.rating_delta = delta;
                }
                rating_deltas.push(RatingDeltaInfo { user_id: user, delta, new_rating: record.elo_rating });
            }
            writes = writes.rating(n1).rating(n2);
        }

        // Leaderboards, winner only.
        let mut leaderboard_ranks = BTreeMap::new();
        if let Some(winner) = report.winner_id {
            let rating_snapshot = match rating_deltas.iter().find(|d| d.user_id == winner) {
                Some(d) => d.new_rating,
                None => self.store.rating(winner).await?.elo_rating,
            };
            let winner_metrics = &metrics[&winner];
            for category in &categories {
                let score = if *category == Category::wins_overall() {
                    f64::from(stats_after.get(&winner).copied().unwrap_or(0))
                } else if session.mode() == GameMode::Moves {
                    f64::from(winner_metrics.moves)
                } else {
                    winner_metrics.time_secs
                };
                let submission = Submission { user_id: winner, score, rating_snapshot };
                let plan = self.leaderboard.plan(category, &season, &submission).await?;
                leaderboard_ranks.insert(category.clone(), plan.rank);
                if plan.changed {
                    writes = writes.leaderboard(PartitionRewrite {
                        category: category.clone(),
                        season: season.clone(),
                        rows: plan.rows,
                    });
                }
            }
        }

        let status = session.finish(Finish {
            winner: report.winner_id,
            metrics,
            perfect_game: report.perfect_game,
            speed_bonus: report.speed_bonus,
            move_log_digest: moves::digest(session_id, &log),
            at: now,
        })?;

        let writes = writes.with_session(session.clone(), SessionStatus::InProgress);
        match self.store.commit(writes).await {
            Ok(()) => {}
            Err(e @ StoreError::Unavailable(_)) => {
                error!("Completion of {} rolled back: {}", session_id.short(), e);
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        }

        self.release(&session).await;

        info!(
            "Session {} {} (winner {:?})",
            session_id.short(),
            status,
            report.winner_id.map(|w| w.short())
        );

        let end = SessionEndInfo {
            session_id,
            status,
            winner_id: report.winner_id,
            rating_deltas: rating_deltas.clone(),
        };
        for user in participants {
            notify(self.channel.as_ref(), user, ServerMessage::SessionEnded(end.clone()));
        }

        Ok(CompletionSummary {
            session_id,
            status,
            winner: report.winner_id,
            rating_deltas,
            leaderboard_ranks,
        })
    }

    // =========================================================================
    // ABANDONMENT
    // =========================================================================

    /// Durably mark a session `abandoned` because `departed` left.
    ///
    /// Writes no stats, rating or leaderboard rows for anyone. The remaining
    /// participant is told the opponent disconnected.
    #[instrument(skip(self), fields(session = %session_id.short(), departed = %departed.short()))]
    pub async fn abandon(
        &self,
        session_id: SessionId,
        departed: UserId,
        reason: &str,
    ) -> Result<(), DuelError> {
        let _guard = self.locks.acquire([session_key(session_id)]).await;

        let mut session = self.load(session_id).await?;
        if !session.is_participant(departed) {
            return Err(DuelError::Validation(format!(
                "user {} not in session {}",
                departed.short(),
                session_id.short()
            )));
        }
        let prior = session.status();
        session.abandon(reason, Utc::now())?;
        self.store.commit(WriteSet::new().with_session(session.clone(), prior)).await?;

        self.release(&session).await;
        info!("Session {} abandoned: {}", session_id.short(), reason);

        for user in session.participants() {
            let message = if user == departed {
                ServerMessage::SessionEnded(SessionEndInfo {
                    session_id,
                    status: SessionStatus::Abandoned,
                    winner_id: None,
                    rating_deltas: Vec::new(),
                })
            } else {
                ServerMessage::OpponentDisconnected { session_id, user_id: departed }
            };
            notify(self.channel.as_ref(), user, message);
        }

        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Session `user` is currently bound to.
    pub async fn active_session_of(&self, user: UserId) -> Option<SessionId> {
        self.active.read().await.get(&user).copied()
    }

    /// Number of users bound to a live session.
    pub async fn active_players(&self) -> usize {
        self.active.read().await.len()
    }

    /// Stored session row.
    pub async fn session(&self, session_id: SessionId) -> Result<Option<GameSession>, DuelError> {
        Ok(self.store.session(session_id).await?)
    }

    async fn load(&self, session_id: SessionId) -> Result<GameSession, DuelError> {
        self.store
            .session(session_id)
            .await?
            .ok_or_else(|| DuelError::NotFound(format!("session {session_id}")))
    }

    /// Drop bindings and move counters for a session.
    async fn release(&self, session: &GameSession) {
        {
            let mut active = self.active.write().await;
            for user in session.participants() {
                if active.get(&user) == Some(&session.id()) {
                    active.remove(&user);
                }
            }
        }
        let mut last_moves = self.last_moves.lock().unwrap_or_else(PoisonError::into_inner);
        last_moves.retain(|(id, _), _| *id != session.id());
    }
}
