//! Configuration
//!
//! Defaults suit a single local instance; every field can be overridden from
//! the environment. Unparseable values are logged and ignored.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::core::mode::{Season, DEFAULT_SEASON};

/// Core service settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Season completions are recorded under.
    pub season: Season,
    /// Widest rating gap the queue will pair across.
    pub max_rating_gap: i32,
    /// Smallest accepted board edge.
    pub min_board_size: u8,
    /// Largest accepted board edge.
    pub max_board_size: u8,
    /// Per-connection outbound message buffer.
    pub outbound_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            season: Season::new(DEFAULT_SEASON),
            max_rating_gap: 200,
            min_board_size: 3,
            max_board_size: 6,
            outbound_buffer: 64,
        }
    }
}

impl ServiceConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            season: lookup("DUEL_SEASON").map(Season::new).unwrap_or(defaults.season),
            max_rating_gap: parse_or(&lookup, "DUEL_MAX_RATING_GAP", defaults.max_rating_gap),
            min_board_size: parse_or(&lookup, "DUEL_MIN_BOARD", defaults.min_board_size),
            max_board_size: parse_or(&lookup, "DUEL_MAX_BOARD", defaults.max_board_size),
            outbound_buffer: parse_or(&lookup, "DUEL_OUTBOUND_BUFFER", defaults.outbound_buffer),
        }
    }

    /// Is `board_size` playable.
    pub fn board_allowed(&self, board_size: u8) -> bool {
        (self.min_board_size..=self.max_board_size).contains(&board_size)
    }
}

/// WebSocket server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Silence after which a connection counts as disconnected.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: parse_or(&lookup, "DUEL_BIND_ADDR", defaults.bind_addr),
            max_connections: parse_or(&lookup, "DUEL_MAX_CONNECTIONS", defaults.max_connections),
            idle_timeout: Duration::from_secs(parse_or(
                &lookup,
                "DUEL_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            version: defaults.version,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        None => default,
    }
}
