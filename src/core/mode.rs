//! Game Modes and Leaderboard Categories
//!
//! Naming conventions shared by matchmaking, sessions and leaderboards:
//! - categories are `{speed|moves}_{n}x{n}`, `{speed|moves}_overall` and `wins_overall`
//! - seasons default to `all_time`

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Season label used when none is configured.
pub const DEFAULT_SEASON: &str = "all_time";

// =============================================================================
// GAME MODE
// =============================================================================

/// Match modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// Unranked-by-metric play. Still rated when two players take part.
    Classic,
    /// Fastest solve wins. Feeds the `speed_*` leaderboards.
    Speed,
    /// Fewest moves wins. Feeds the `moves_*` leaderboards.
    Moves,
}

impl GameMode {
    /// Wire/store name.
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Classic => "classic",
            GameMode::Speed => "speed",
            GameMode::Moves => "moves",
        }
    }

    /// Parse from a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "classic" => Some(GameMode::Classic),
            "speed" => Some(GameMode::Speed),
            "moves" => Some(GameMode::Moves),
            _ => None,
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SCORE ORDERING
// =============================================================================

/// Which direction of score is better within a category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreOrder {
    /// Lower is better (times, move counts).
    Ascending,
    /// Higher is better.
    Descending,
}

impl ScoreOrder {
    /// Ordering rule for a category name: anything naming `speed` or `moves`
    /// ranks ascending, everything else descending.
    pub fn for_category_name(name: &str) -> Self {
        if name.contains("speed") || name.contains("moves") {
            ScoreOrder::Ascending
        } else {
            ScoreOrder::Descending
        }
    }

    /// Compare two scores so that the better one sorts first.
    pub fn compare(self, a: f64, b: f64) -> Ordering {
        match self {
            ScoreOrder::Ascending => a.total_cmp(&b),
            ScoreOrder::Descending => b.total_cmp(&a),
        }
    }

    /// Strict improvement only: equal scores are not better.
    pub fn is_better(self, candidate: f64, current: f64) -> bool {
        self.compare(candidate, current) == Ordering::Less
    }
}

// =============================================================================
// CATEGORY
// =============================================================================

/// Leaderboard category name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Arbitrary category by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `speed_{n}x{n}`
    pub fn speed(board_size: u8) -> Self {
        Self(format!("speed_{board_size}x{board_size}"))
    }

    /// `speed_overall`
    pub fn speed_overall() -> Self {
        Self("speed_overall".to_string())
    }

    /// `moves_{n}x{n}`
    pub fn moves(board_size: u8) -> Self {
        Self(format!("moves_{board_size}x{board_size}"))
    }

    /// `moves_overall`
    pub fn moves_overall() -> Self {
        Self("moves_overall".to_string())
    }

    /// `wins_overall` - cumulative wins, higher is better.
    pub fn wins_overall() -> Self {
        Self("wins_overall".to_string())
    }

    /// Metric categories a finished game in `mode` on an `n`x`n` board feeds.
    pub fn qualifying(mode: GameMode, board_size: u8) -> Vec<Category> {
        match mode {
            GameMode::Speed => vec![Self::speed(board_size), Self::speed_overall()],
            GameMode::Moves => vec![Self::moves(board_size), Self::moves_overall()],
            GameMode::Classic => Vec::new(),
        }
    }

    /// Category name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ordering rule for this category.
    pub fn order(&self) -> ScoreOrder {
        ScoreOrder::for_category_name(&self.0)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// SEASON
// =============================================================================

/// Leaderboard season label.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Season(String);

impl Season {
    /// Season by label.
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The `all_time` season.
    pub fn all_time() -> Self {
        Self(DEFAULT_SEASON.to_string())
    }

    /// Season label.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Season {
    fn default() -> Self {
        Self::all_time()
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_mode_feeds_board_and_overall() {
        let cats = Category::qualifying(GameMode::Speed, 4);
        let names: Vec<&str> = cats.iter().map(|c| c.as_str()).collect();
        assert_eq!(names, vec!["speed_4x4", "speed_overall"]);
    }

    #[test]
    fn test_classic_feeds_nothing() {
        assert!(Category::qualifying(GameMode::Classic, 3).is_empty());
    }

    #[test]
    fn test_ordering_rule_by_name() {
        assert_eq!(Category::speed(5).order(), ScoreOrder::Ascending);
        assert_eq!(Category::moves_overall().order(), ScoreOrder::Ascending);
        assert_eq!(Category::wins_overall().order(), ScoreOrder::Descending);
        assert_eq!(Category::new("rating_peak").order(), ScoreOrder::Descending);
    }

    #[test]
    fn test_strict_improvement() {
        assert!(ScoreOrder::Ascending.is_better(40.0, 45.0));
        assert!(!ScoreOrder::Ascending.is_better(45.0, 45.0));
        assert!(ScoreOrder::Descending.is_better(12.0, 11.0));
        assert!(!ScoreOrder::Descending.is_better(11.0, 11.0));
    }

    #[test]
    fn test_mode_names_roundtrip() {
        for mode in [GameMode::Classic, GameMode::Speed, GameMode::Moves] {
            assert_eq!(GameMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(GameMode::parse("ranked"), None);
    }

    #[test]
    fn test_default_season() {
        assert_eq!(Season::default().as_str(), "all_time");
    }
}
