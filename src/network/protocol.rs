//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use crate::core::ids::{SessionId, UserId};
use crate::core::mode::{Category, GameMode, Season};
use crate::ranking::leaderboard::LeaderboardEntry;
use crate::session::model::SessionStatus;
use crate::session::moves::MoveData;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a user. Credentials are checked upstream.
    Hello {
        /// Identity asserted by the gateway.
        user_id: UserId,
    },

    /// Enter the matchmaking queue for a (mode, board size) partition.
    JoinQueue {
        /// Mode.
        mode: GameMode,
        /// Board edge length.
        board_size: u8,
    },

    /// Leave the matchmaking queue.
    LeaveQueue {
        /// Mode queued for.
        mode: GameMode,
    },

    /// Start a single-player session.
    StartSolo {
        /// Mode.
        mode: GameMode,
        /// Board edge length.
        board_size: u8,
        /// Generated board reference.
        puzzle_ref: String,
    },

    /// Slide or power-up inside a session.
    Move {
        /// Session.
        session_id: SessionId,
        /// The move.
        data: MoveData,
    },

    /// Report the end of a session.
    Complete {
        /// Session.
        session_id: SessionId,
        /// Result.
        report: CompletionReport,
    },

    /// Give up on a session.
    Quit {
        /// Session.
        session_id: SessionId,
    },

    /// Read a leaderboard partition.
    Leaderboard {
        /// Category name.
        category: Category,
        /// Season, defaults to the configured one.
        #[serde(default)]
        season: Option<Season>,
        /// Maximum rows.
        limit: usize,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back.
        timestamp: u64,
    },
}

/// Result reported by a client at the end of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    /// Winner. `None` is a draw (two players) or an unsolved board (solo).
    pub winner_id: Option<UserId>,
    /// Winner's time on the board, seconds.
    pub completion_time_secs: f64,
    /// Winner's move count.
    pub move_count: u32,
    /// Solved without wasted moves.
    #[serde(default)]
    pub perfect_game: bool,
    /// Beat the speed threshold.
    #[serde(default)]
    pub speed_bonus: bool,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection bound.
    Welcome {
        /// Bound user.
        user_id: UserId,
        /// Current rating.
        rating: i32,
        /// Server version.
        server_version: String,
    },

    /// Position in a matchmaking partition.
    QueuePositionUpdate {
        /// Mode.
        mode: GameMode,
        /// Board edge length.
        board_size: u8,
        /// 1-based position.
        position: usize,
    },

    /// Queue leave acknowledged.
    QueueLeft {
        /// Mode.
        mode: GameMode,
        /// False when the user was not waiting (already matched or never queued).
        removed: bool,
    },

    /// A session was created for this user.
    MatchFound(MatchFoundInfo),

    /// Opponent slid a tile.
    MoveRelayed {
        /// Session.
        session_id: SessionId,
        /// Mover.
        user_id: UserId,
        /// The move.
        data: MoveData,
    },

    /// Opponent used a power-up.
    PowerupRelayed {
        /// Session.
        session_id: SessionId,
        /// Mover.
        user_id: UserId,
        /// Mover's sequence number.
        move_number: u32,
        /// Power-up name.
        powerup: String,
    },

    /// Session reached a terminal state.
    SessionEnded(SessionEndInfo),

    /// Opponent left mid-session.
    OpponentDisconnected {
        /// Session.
        session_id: SessionId,
        /// Who left.
        user_id: UserId,
    },

    /// Leaderboard read result.
    Leaderboard {
        /// Category.
        category: Category,
        /// Season.
        season: Season,
        /// Rows in rank order.
        entries: Vec<LeaderboardEntry>,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (ms since epoch).
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Reason for shutdown.
        reason: String,
    },
}

/// Match found notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFoundInfo {
    /// Session.
    pub session_id: SessionId,
    /// Board edge length.
    pub board_size: u8,
    /// Mode.
    pub mode: GameMode,
    /// First participant.
    pub player1: UserId,
    /// Second participant, `None` for solo.
    pub player2: Option<UserId>,
    /// Generated board reference.
    pub puzzle_ref: String,
}

/// Rating change for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDeltaInfo {
    /// Participant.
    pub user_id: UserId,
    /// Computed change.
    pub delta: i32,
    /// Rating after clamping.
    pub new_rating: i32,
}

/// Session end notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndInfo {
    /// Session.
    pub session_id: SessionId,
    /// Terminal status.
    pub status: SessionStatus,
    /// Winner, if any.
    pub winner_id: Option<UserId>,
    /// Rating changes, empty for unrated games.
    pub rating_deltas: Vec<RatingDeltaInfo>,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Safe to resend the same request.
    pub retryable: bool,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request failed validation.
    InvalidInput,
    /// Connection has not sent `hello`.
    NotIdentified,
    /// Unknown session or user.
    NotFound,
    /// Already queued, already in a session, or session already finished.
    Conflict,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
