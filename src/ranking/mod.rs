//! Ranking
//!
//! - `elo`: pure rating math and the per-user rating row
//! - `stats`: per-user aggregate fold
//! - `leaderboard`: per-partition ranked ordering

pub mod elo;
pub mod stats;
pub mod leaderboard;

pub use elo::{compute, apply_delta, Outcome, RatingDeltas, RatingRecord, DEFAULT_RATING, K_FACTOR, RATING_CEILING, RATING_FLOOR};
pub use stats::{MatchOutcome, UserStats};
pub use leaderboard::{LeaderboardEntry, LeaderboardIndex, PartitionPlan, Submission};
