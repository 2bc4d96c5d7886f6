//! Core primitives.
//!
//! Identifiers, mode/category naming and audit hashing shared by every other module.

pub mod ids;
pub mod mode;
pub mod hash;

// Re-export core types
pub use ids::{SessionId, UserId};
pub use mode::{Category, GameMode, ScoreOrder, Season, DEFAULT_SEASON};
pub use hash::{LogDigest, MoveLogHasher};
