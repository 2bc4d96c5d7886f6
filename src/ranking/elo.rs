//! ELO Rating
//!
//! Pure rating math. Nothing here touches the store: callers receive deltas
//! and apply them to [`RatingRecord`]s inside their own transaction.

use serde::{Deserialize, Serialize};

use crate::core::ids::UserId;

/// K-factor for every rated game.
pub const K_FACTOR: f64 = 32.0;

/// Lowest rating a player can hold.
pub const RATING_FLOOR: i32 = 800;

/// Highest rating a player can hold.
pub const RATING_CEILING: i32 = 3000;

/// Rating assigned at account creation.
pub const DEFAULT_RATING: i32 = 1000;

/// Result of a two-player game from player A's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Player A won.
    AWin,
    /// Player B won.
    BWin,
    /// Nobody won.
    Draw,
}

impl Outcome {
    /// Actual scores (A, B).
    fn actual(self) -> (f64, f64) {
        match self {
            Outcome::AWin => (1.0, 0.0),
            Outcome::BWin => (0.0, 1.0),
            Outcome::Draw => (0.5, 0.5),
        }
    }
}

/// Rating change for each side. Independently rounded, so the sum may be +/-1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingDeltas {
    /// Change for player A.
    pub delta_a: i32,
    /// Change for player B.
    pub delta_b: i32,
}

/// Expected score of a player rated `rating` against `opponent`.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// Compute symmetric ELO adjustments for a finished pairing.
pub fn compute(rating_a: i32, rating_b: i32, outcome: Outcome) -> RatingDeltas {
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = 1.0 - expected_a;
    let (actual_a, actual_b) = outcome.actual();

    RatingDeltas {
        delta_a: (K_FACTOR * (actual_a - expected_a)).round() as i32,
        delta_b: (K_FACTOR * (actual_b - expected_b)).round() as i32,
    }
}

/// Apply a delta and clamp the final rating into `[RATING_FLOOR, RATING_CEILING]`.
pub fn apply_delta(rating: i32, delta: i32) -> i32 {
    rating.saturating_add(delta).clamp(RATING_FLOOR, RATING_CEILING)
}

/// Durable per-user rating row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    /// Owner.
    pub user_id: UserId,
    /// Current rating, always within `[RATING_FLOOR, RATING_CEILING]`.
    pub elo_rating: i32,
    /// Highest rating ever held.
    pub peak_rating: i32,
    /// Position among all rated users. Derived; refreshed by the store on rating writes.
    pub rank_position: Option<u32>,
    /// Rated games played.
    pub rated_games: u32,
    /// Consecutive rated wins.
    pub win_streak: u32,
    /// Consecutive rated losses.
    pub loss_streak: u32,
}

impl RatingRecord {
    /// Fresh record at the default rating.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            elo_rating: DEFAULT_RATING,
            peak_rating: DEFAULT_RATING,
            rank_position: None,
            rated_games: 0,
            win_streak: 0,
            loss_streak: 0,
        }
    }

    /// Record after one rated game. `won` is `None` for a draw.
    pub fn after_game(&self, delta: i32, won: Option<bool>) -> Self {
        let elo_rating = apply_delta(self.elo_rating, delta);
        let (win_streak, loss_streak) = match won {
            Some(true) => (self.win_streak + 1, 0),
            Some(false) => (0, self.loss_streak + 1),
            None => (0, 0),
        };

        Self {
            user_id: self.user_id,
            elo_rating,
            peak_rating: self.peak_rating.max(elo_rating),
            rank_position: self.rank_position,
            rated_games: self.rated_games + 1,
            win_streak,
            loss_streak,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equal_ratings_clean_win() {
        let d = compute(1000, 1000, Outcome::AWin);
        assert_eq!(d, RatingDeltas { delta_a: 16, delta_b: -16 });
    }

    #[test]
    fn test_equal_ratings_draw() {
        let d = compute(1000, 1000, Outcome::Draw);
        assert_eq!(d, RatingDeltas { delta_a: 0, delta_b: 0 });
    }

    #[test]
    fn test_b_win_mirrors_a_win() {
        let a = compute(1200, 1000, Outcome::AWin);
        let b = compute(1000, 1200, Outcome::BWin);
        assert_eq!(a.delta_a, b.delta_b);
        assert_eq!(a.delta_b, b.delta_a);
    }

    #[test]
    fn test_upset_pays_more() {
        let favourite_wins = compute(1400, 1000, Outcome::AWin);
        let underdog_wins = compute(1400, 1000, Outcome::BWin);
        assert!(underdog_wins.delta_b > favourite_wins.delta_a);
        assert_eq!(favourite_wins.delta_a, 3);
        assert_eq!(underdog_wins.delta_b, 29);
    }

    #[test]
    fn test_clamp_applies_to_final_rating() {
        assert_eq!(apply_delta(805, -16), RATING_FLOOR);
        assert_eq!(apply_delta(2995, 16), RATING_CEILING);
        assert_eq!(apply_delta(RATING_FLOOR, -30), RATING_FLOOR);
        assert_eq!(apply_delta(1000, 16), 1016);
    }

    #[test]
    fn test_record_after_game_tracks_streaks_and_peak() {
        let user = UserId::random();
        let r = RatingRecord::new(user).after_game(16, Some(true));
        assert_eq!(r.elo_rating, 1016);
        assert_eq!(r.peak_rating, 1016);
        assert_eq!(r.win_streak, 1);

        let r = r.after_game(-20, Some(false));
        assert_eq!(r.elo_rating, 996);
        assert_eq!(r.peak_rating, 1016);
        assert_eq!(r.win_streak, 0);
        assert_eq!(r.loss_streak, 1);
        assert_eq!(r.rated_games, 2);

        let r = r.after_game(0, None);
        assert_eq!((r.win_streak, r.loss_streak), (0, 0));
    }

    proptest! {
        #[test]
        fn prop_rating_stays_in_bounds(
            a in RATING_FLOOR..=RATING_CEILING,
            b in RATING_FLOOR..=RATING_CEILING,
            o in 0u8..3,
        ) {
            let outcome = [Outcome::AWin, Outcome::BWin, Outcome::Draw][o as usize];
            let d = compute(a, b, outcome);
            let new_a = apply_delta(a, d.delta_a);
            let new_b = apply_delta(b, d.delta_b);
            prop_assert!((RATING_FLOOR..=RATING_CEILING).contains(&new_a));
            prop_assert!((RATING_FLOOR..=RATING_CEILING).contains(&new_b));
        }

        #[test]
        fn prop_deltas_nearly_zero_sum(a in 0i32..4000, b in 0i32..4000, o in 0u8..3) {
            let outcome = [Outcome::AWin, Outcome::BWin, Outcome::Draw][o as usize];
            let d = compute(a, b, outcome);
            prop_assert!((d.delta_a + d.delta_b).abs() <= 1);
            prop_assert!(d.delta_a.abs() <= 32 && d.delta_b.abs() <= 32);
        }
    }
}
