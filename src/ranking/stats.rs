//! Player Statistics
//!
//! Folds one match outcome into a user's aggregate record. The fold is pure;
//! the session registry writes the result in the same commit as the session.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::UserId;
use crate::core::mode::GameMode;

/// One finished game as seen by one participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Did this participant win (or solve, for solo play).
    pub is_win: bool,
    /// Time spent on the board, in seconds.
    pub completion_time_secs: f64,
    /// Moves made.
    pub move_count: u32,
    /// Board edge length.
    pub board_size: u8,
    /// Mode played.
    pub mode: GameMode,
    /// When the game finished.
    pub finished_at: DateTime<Utc>,
}

/// Rolling aggregate record for one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    /// Owner.
    pub user_id: UserId,
    /// Games counted.
    pub total_games: u32,
    /// Wins.
    pub total_wins: u32,
    /// Losses.
    pub total_losses: u32,
    /// `total_wins / total_games`.
    pub win_rate: f64,
    /// Incremental mean completion time (seconds).
    pub avg_completion_time: f64,
    /// Incremental mean move count.
    pub avg_move_count: f64,
    /// Fastest winning time.
    pub best_completion_time: Option<f64>,
    /// Fewest winning moves.
    pub best_move_count: Option<u32>,
    /// Current run of wins.
    pub current_win_streak: u32,
    /// Current run of losses.
    pub current_loss_streak: u32,
    /// Longest run of wins ever.
    pub best_win_streak: u32,
    /// Games per mode.
    pub games_by_mode: BTreeMap<GameMode, u32>,
    /// Games per board size.
    pub games_by_board: BTreeMap<u8, u32>,
    /// Last fold.
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserStats {
    /// Empty record.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_games: 0,
            total_wins: 0,
            total_losses: 0,
            win_rate: 0.0,
            avg_completion_time: 0.0,
            avg_move_count: 0.0,
            best_completion_time: None,
            best_move_count: None,
            current_win_streak: 0,
            current_loss_streak: 0,
            best_win_streak: 0,
            games_by_mode: BTreeMap::new(),
            games_by_board: BTreeMap::new(),
            updated_at: None,
        }
    }
}

fn incremental_mean(old_avg: f64, old_count: u32, value: f64) -> f64 {
    (old_avg * f64::from(old_count) + value) / f64::from(old_count + 1)
}

/// Fold one outcome into `current`, returning the new record.
///
/// Best time and move count only move on wins and never regress.
pub fn apply(current: &UserStats, outcome: &MatchOutcome) -> UserStats {
    let mut next = current.clone();
    let old_count = current.total_games;

    next.total_games = old_count + 1;
    next.avg_completion_time =
        incremental_mean(current.avg_completion_time, old_count, outcome.completion_time_secs);
    next.avg_move_count =
        incremental_mean(current.avg_move_count, old_count, f64::from(outcome.move_count));

    if outcome.is_win {
        next.total_wins += 1;
        next.current_win_streak += 1;
        next.current_loss_streak = 0;
        next.best_win_streak = next.best_win_streak.max(next.current_win_streak);

        next.best_completion_time = Some(match current.best_completion_time {
            Some(best) => best.min(outcome.completion_time_secs),
            None => outcome.completion_time_secs,
        });
        next.best_move_count = Some(match current.best_move_count {
            Some(best) => best.min(outcome.move_count),
            None => outcome.move_count,
        });
    } else {
        next.total_losses += 1;
        next.current_loss_streak += 1;
        next.current_win_streak = 0;
    }

    next.win_rate = f64::from(next.total_wins) / f64::from(next.total_games);
    *next.games_by_mode.entry(outcome.mode).or_insert(0) += 1;
    *next.games_by_board.entry(outcome.board_size).or_insert(0) += 1;
    next.updated_at = Some(outcome.finished_at);

    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(is_win: bool, time: f64, moves: u32) -> MatchOutcome {
        MatchOutcome {
            is_win,
            completion_time_secs: time,
            move_count: moves,
            board_size: 4,
            mode: GameMode::Speed,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_win() {
        let s = apply(&UserStats::new(UserId::random()), &outcome(true, 45.0, 30));
        assert_eq!(s.total_games, 1);
        assert_eq!(s.total_wins, 1);
        assert_eq!(s.current_win_streak, 1);
        assert_eq!(s.best_win_streak, 1);
        assert_eq!(s.best_completion_time, Some(45.0));
        assert_eq!(s.best_move_count, Some(30));
        assert_eq!(s.win_rate, 1.0);
        assert_eq!(s.games_by_mode.get(&GameMode::Speed), Some(&1));
        assert_eq!(s.games_by_board.get(&4), Some(&1));
    }

    #[test]
    fn test_incremental_mean() {
        let mut s = UserStats::new(UserId::random());
        for (t, m) in [(30.0, 20), (60.0, 40), (90.0, 60)] {
            s = apply(&s, &outcome(true, t, m));
        }
        assert!((s.avg_completion_time - 60.0).abs() < 1e-9);
        assert!((s.avg_move_count - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_loss_resets_win_streak_and_keeps_best() {
        let mut s = UserStats::new(UserId::random());
        s = apply(&s, &outcome(true, 40.0, 25));
        s = apply(&s, &outcome(true, 50.0, 35));
        s = apply(&s, &outcome(false, 10.0, 5));

        assert_eq!(s.current_win_streak, 0);
        assert_eq!(s.current_loss_streak, 1);
        assert_eq!(s.best_win_streak, 2);
        assert_eq!(s.best_completion_time, Some(40.0));
        assert_eq!(s.best_move_count, Some(25));
        assert!((s.win_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let mut s = UserStats::new(UserId::random());
        s = apply(&s, &outcome(false, 40.0, 25));
        s = apply(&s, &outcome(false, 40.0, 25));
        assert_eq!(s.current_loss_streak, 2);
        s = apply(&s, &outcome(true, 40.0, 25));
        assert_eq!(s.current_loss_streak, 0);
        assert_eq!(s.current_win_streak, 1);
    }

    #[test]
    fn test_best_never_regresses() {
        let mut s = UserStats::new(UserId::random());
        s = apply(&s, &outcome(true, 30.0, 20));
        s = apply(&s, &outcome(true, 90.0, 80));
        assert_eq!(s.best_completion_time, Some(30.0));
        assert_eq!(s.best_move_count, Some(20));
    }
}
