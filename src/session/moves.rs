//! Move log.
//!
//! Moves are advisory: they are relayed to the opponent and appended for
//! audit, but never change the session status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::hash::MoveLogHasher;
use crate::core::ids::{SessionId, UserId};

/// What a player did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveKind {
    /// Slid `tile` from cell `from` to cell `to`.
    Slide {
        /// Tile value.
        tile: u16,
        /// Source cell index.
        from: u16,
        /// Destination cell index.
        to: u16,
    },
    /// Spent a power-up.
    Powerup {
        /// Power-up name.
        kind: String,
    },
}

/// Move as sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveData {
    /// Per-player sequence number. Must strictly increase.
    pub move_number: u32,
    /// The move.
    pub kind: MoveKind,
}

/// Stored move log row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    /// Session.
    pub session_id: SessionId,
    /// Mover.
    pub user_id: UserId,
    /// Per-player sequence number.
    pub move_number: u32,
    /// The move.
    pub kind: MoveKind,
    /// Server receive time.
    pub recorded_at: DateTime<Utc>,
}

/// Hex SHA-256 over a session's move log, in append order.
pub fn digest(session_id: SessionId, records: &[MoveRecord]) -> String {
    let mut hasher = MoveLogHasher::for_move_log();
    hasher.update_bytes(session_id.as_bytes());
    hasher.update_u32(records.len() as u32);

    for record in records {
        hasher.update_bytes(record.user_id.as_bytes());
        hasher.update_u32(record.move_number);
        hasher.update_i64(record.recorded_at.timestamp_millis());
        match &record.kind {
            MoveKind::Slide { tile, from, to } => {
                hasher.update_u8(0);
                hasher.update_u16(*tile);
                hasher.update_u16(*from);
                hasher.update_u16(*to);
            }
            MoveKind::Powerup { kind } => {
                hasher.update_u8(1);
                hasher.update_str(kind);
            }
        }
    }

    hex::encode(hasher.finalize())
}

/// Number of slides `user` made.
pub fn slide_count(records: &[MoveRecord], user: UserId) -> u32 {
    records
        .iter()
        .filter(|r| r.user_id == user && matches!(r.kind, MoveKind::Slide { .. }))
        .count() as u32
}

/// Power-ups `user` spent, in order.
pub fn powerups_used(records: &[MoveRecord], user: UserId) -> Vec<String> {
    records
        .iter()
        .filter(|r| r.user_id == user)
        .filter_map(|r| match &r.kind {
            MoveKind::Powerup { kind } => Some(kind.clone()),
            MoveKind::Slide { .. } => None,
        })
        .collect()
}
