//! Network Layer
//!
//! WebSocket front end and the realtime delivery seam the core notifies through.

pub mod channel;
pub mod protocol;
pub mod server;

pub use channel::{notify, ChannelError, ConnectionHub, RealtimeChannel, RecordingChannel};
pub use protocol::{
    ClientMessage, CompletionReport, ErrorCode, MatchFoundInfo, RatingDeltaInfo, ServerError,
    ServerMessage, SessionEndInfo,
};
pub use server::{GameServer, GameServerError};
