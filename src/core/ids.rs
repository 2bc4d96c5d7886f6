//! Identifiers
//!
//! UUID-backed identifiers for users and game sessions.
//! Serialized as canonical UUID strings on the wire and in the store.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// USER ID
// =============================================================================

/// Unique user identifier, issued by the external account system.
///
/// Implements Ord so multi-user lock acquisition and rank tie-breaks are stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Generate a random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short hex form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// SESSION ID
// =============================================================================

/// Unique game session identifier. Doubles as the idempotency key for completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a fresh session identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short hex form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
