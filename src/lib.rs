//! # Tile Duel Server
//!
//! Matchmaking, session lifecycle, ELO ratings and leaderboards for
//! head-to-head sliding puzzle matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TILE DUEL SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── ids.rs      - User and session identifiers              │
//! │  ├── mode.rs     - Modes, categories, seasons                │
//! │  └── hash.rs     - Move log digests                          │
//! │                                                              │
//! │  ranking/        - Pure result math                          │
//! │  ├── elo.rs      - Rating deltas and rating rows             │
//! │  ├── stats.rs    - Per-user aggregates                       │
//! │  └── leaderboard.rs - Ranked partitions                      │
//! │                                                              │
//! │  session/        - Session lifecycle                         │
//! │  matchmaking/    - Partitioned FIFO queues                   │
//! │  store/          - Persistence seam and key locks            │
//! │  service.rs      - Operations facade                         │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  └── channel.rs  - Realtime delivery                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Result Atomicity
//!
//! A completed session writes its status, both rating rows, both stat rows
//! and every affected leaderboard partition in one [`store::WriteSet`]. The
//! commit is conditional on the session still being `in_progress`, so a
//! session's results are applied at most once even when completion races an
//! abandon or a retry.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod matchmaking;
pub mod network;
pub mod ranking;
pub mod service;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{ServerConfig, ServiceConfig};
pub use core::ids::{SessionId, UserId};
pub use core::mode::{Category, GameMode, Season};
pub use error::DuelError;
pub use service::DuelService;
pub use session::model::{GameSession, SessionStatus};
pub use store::{InMemoryStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
