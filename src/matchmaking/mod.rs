//! Matchmaking
//!
//! FIFO waiting lists partitioned by mode and board size.

pub mod queue;

pub use queue::{JoinOutcome, MatchmakingQueue, QueueKey, WaitingPlayer};
