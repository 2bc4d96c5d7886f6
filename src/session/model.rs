//! Game Session Record
//!
//! The durable session row and its state machine:
//!
//! ```text
//! pending ──► in_progress ──► completed | draw | abandoned
//!    └────────────────────────────────────────► abandoned
//! ```
//!
//! Fields are private. Every mutation goes through a transition method that
//! refuses to touch a terminal session, so a finished record cannot change.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::{SessionId, UserId};
use crate::core::mode::GameMode;

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, board generated, not yet started.
    Pending,
    /// Both sides acknowledged, play underway.
    InProgress,
    /// Finished with a result.
    Completed,
    /// A participant left before the end.
    Abandoned,
    /// Two-player game finished without a winner.
    Draw,
}

impl SessionStatus {
    /// No mutation is permitted from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned | SessionStatus::Draw)
    }

    /// Whether `self -> to` is a legal edge.
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Abandoned)
                | (InProgress, Completed)
                | (InProgress, Draw)
                | (InProgress, Abandoned)
        )
    }

    /// Wire/store name.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
            SessionStatus::Draw => "draw",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// Session already reached a terminal status.
    #[error("session already {0}")]
    Terminal(SessionStatus),

    /// Edge not allowed by the state machine.
    #[error("cannot move session from {from} to {to}")]
    Invalid {
        /// Current status.
        from: SessionStatus,
        /// Requested status.
        to: SessionStatus,
    },
}

/// Per-participant result metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerMetrics {
    /// Moves made.
    pub moves: u32,
    /// Seconds on the board.
    pub time_secs: f64,
    /// Computed rating change (before clamping). Zero for unrated games.
    pub rating_delta: i32,
    /// Power-ups used, in order.
    pub powerups_used: Vec<String>,
}

/// Terminal result written by `finish`.
#[derive(Debug, Clone)]
pub struct Finish {
    /// Winner, if any.
    pub winner: Option<UserId>,
    /// Metrics keyed by participant.
    pub metrics: BTreeMap<UserId, PlayerMetrics>,
    /// Winner solved without wasted moves.
    pub perfect_game: bool,
    /// Winner beat the speed threshold.
    pub speed_bonus: bool,
    /// Hex SHA-256 over the move log.
    pub move_log_digest: String,
    /// Completion time.
    pub at: DateTime<Utc>,
}

/// Durable game session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    id: SessionId,
    player1: UserId,
    player2: Option<UserId>,
    winner: Option<UserId>,
    board_size: u8,
    mode: GameMode,
    puzzle_ref: String,
    status: SessionStatus,
    metrics: BTreeMap<UserId, PlayerMetrics>,
    perfect_game: bool,
    speed_bonus: bool,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    end_reason: Option<String>,
    move_log_digest: Option<String>,
}

impl GameSession {
    /// New `pending` session. `player2 == None` is single-player.
    pub fn new(
        id: SessionId,
        player1: UserId,
        player2: Option<UserId>,
        board_size: u8,
        mode: GameMode,
        puzzle_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            player1,
            player2,
            winner: None,
            board_size,
            mode,
            puzzle_ref: puzzle_ref.into(),
            status: SessionStatus::Pending,
            metrics: BTreeMap::new(),
            perfect_game: false,
            speed_bonus: false,
            created_at: now,
            started_at: None,
            completed_at: None,
            end_reason: None,
            move_log_digest: None,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// First participant.
    pub fn player1(&self) -> UserId {
        self.player1
    }

    /// Second participant, if two-player.
    pub fn player2(&self) -> Option<UserId> {
        self.player2
    }

    /// Winner, once completed.
    pub fn winner(&self) -> Option<UserId> {
        self.winner
    }

    /// Board edge length.
    pub fn board_size(&self) -> u8 {
        self.board_size
    }

    /// Mode played.
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// Reference to the generated board.
    pub fn puzzle_ref(&self) -> &str {
        &self.puzzle_ref
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Per-participant metrics (empty until finished).
    pub fn metrics(&self) -> &BTreeMap<UserId, PlayerMetrics> {
        &self.metrics
    }

    /// Perfect-game flag.
    pub fn perfect_game(&self) -> bool {
        self.perfect_game
    }

    /// Speed-bonus flag.
    pub fn speed_bonus(&self) -> bool {
        self.speed_bonus
    }

    /// Creation time.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Start time.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Terminal transition time.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Why the session was abandoned.
    pub fn end_reason(&self) -> Option<&str> {
        self.end_reason.as_deref()
    }

    /// Audit digest of the move log, once finished.
    pub fn move_log_digest(&self) -> Option<&str> {
        self.move_log_digest.as_deref()
    }

    /// Both participants (one for solo).
    pub fn participants(&self) -> Vec<UserId> {
        std::iter::once(self.player1).chain(self.player2).collect()
    }

    /// Is `user` bound to this session.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.player1 == user || self.player2 == Some(user)
    }

    /// The other side of a two-player session.
    pub fn opponent_of(&self, user: UserId) -> Option<UserId> {
        match self.player2 {
            Some(p2) if self.player1 == user => Some(p2),
            Some(p2) if p2 == user => Some(self.player1),
            _ => None,
        }
    }

    /// Two human players.
    pub fn is_competitive(&self) -> bool {
        self.player2.is_some()
    }

    fn transition(&mut self, to: SessionStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if !self.status.can_transition(to) {
            return Err(TransitionError::Invalid { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// `pending -> in_progress`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(SessionStatus::InProgress)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Status a result with `winner` would produce.
    pub fn result_status(&self, winner: Option<UserId>) -> SessionStatus {
        if winner.is_none() && self.is_competitive() {
            SessionStatus::Draw
        } else {
            SessionStatus::Completed
        }
    }

    /// `in_progress -> completed | draw`.
    pub fn finish(&mut self, finish: Finish) -> Result<SessionStatus, TransitionError> {
        let to = self.result_status(finish.winner);
        self.transition(to)?;
        self.winner = finish.winner;
        self.metrics = finish.metrics;
        self.perfect_game = finish.perfect_game;
        self.speed_bonus = finish.speed_bonus;
        self.move_log_digest = Some(finish.move_log_digest);
        self.completed_at = Some(finish.at);
        Ok(to)
    }

    /// `pending | in_progress -> abandoned`.
    pub fn abandon(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(SessionStatus::Abandoned)?;
        self.end_reason = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }
}
