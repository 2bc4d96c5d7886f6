//! Sessions
//!
//! - `model`: the session row and its status machine
//! - `moves`: the append-only move log
//! - `registry`: create, relay, complete and abandon with atomic result writes

pub mod model;
pub mod moves;
pub mod registry;

pub use model::{Finish, GameSession, PlayerMetrics, SessionStatus, TransitionError};
pub use moves::{MoveData, MoveKind, MoveRecord};
pub use registry::{CompletionSummary, SessionRegistry};
