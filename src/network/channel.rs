//! Realtime Channel
//!
//! The delivery boundary between the core and connected clients. The core
//! calls [`RealtimeChannel::send`] and moves on; it never waits for delivery.
//! A failed send is logged and dropped, never surfaced through the state
//! change that produced it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;

use crate::core::ids::UserId;
use crate::network::protocol::ServerMessage;

/// Delivery errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// No connection bound to the user.
    #[error("user not connected")]
    NotConnected,

    /// Outbound buffer is full.
    #[error("outbound buffer full")]
    Full,

    /// Connection is closing.
    #[error("connection closed")]
    Closed,
}

/// Outbound fan-out to participants.
pub trait RealtimeChannel: Send + Sync {
    /// Queue `message` for `user` without blocking.
    fn send(&self, user: UserId, message: ServerMessage) -> Result<(), ChannelError>;
}

/// Best-effort send. Failures are logged.
pub fn notify(channel: &dyn RealtimeChannel, user: UserId, message: ServerMessage) {
    if let Err(e) = channel.send(user, message) {
        debug!("Delivery to {} dropped: {}", user.short(), e);
    }
}

// =============================================================================
// CONNECTION HUB
// =============================================================================

/// Channel backed by one bounded mpsc sender per connected user.
#[derive(Default)]
pub struct ConnectionHub {
    senders: RwLock<HashMap<UserId, mpsc::Sender<ServerMessage>>>,
}

impl ConnectionHub {
    /// Empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user` to a connection. Replaces any previous binding.
    pub fn register(&self, user: UserId, sender: mpsc::Sender<ServerMessage>) {
        let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
        if senders.insert(user, sender).is_some() {
            debug!("User {} rebound to a new connection", user.short());
        }
    }

    /// Drop the binding if it still points at `sender`.
    ///
    /// Returns false when a newer connection has taken over the user.
    pub fn unregister(&self, user: UserId, sender: &mpsc::Sender<ServerMessage>) -> bool {
        let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
        match senders.get(&user) {
            Some(current) if current.same_channel(sender) => {
                senders.remove(&user);
                true
            }
            _ => false,
        }
    }

    /// Is `user` bound to a connection.
    pub fn is_connected(&self, user: UserId) -> bool {
        self.senders.read().unwrap_or_else(PoisonError::into_inner).contains_key(&user)
    }

    /// Number of bound users.
    pub fn connection_count(&self) -> usize {
        self.senders.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl RealtimeChannel for ConnectionHub {
    fn send(&self, user: UserId, message: ServerMessage) -> Result<(), ChannelError> {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let sender = senders.get(&user).ok_or(ChannelError::NotConnected)?;
        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ChannelError::Full,
            mpsc::error::TrySendError::Closed(_) => ChannelError::Closed,
        })
    }
}

// =============================================================================
// RECORDING CHANNEL
// =============================================================================

/// Channel that records every delivery. Users marked offline fail with `NotConnected`.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(UserId, ServerMessage)>>,
    offline: Mutex<HashSet<UserId>>,
}

impl RecordingChannel {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail future deliveries to `user`.
    pub fn set_offline(&self, user: UserId) {
        self.offline.lock().unwrap_or_else(PoisonError::into_inner).insert(user);
    }

    /// Everything delivered so far.
    pub fn sent(&self) -> Vec<(UserId, ServerMessage)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Messages delivered to `user`.
    pub fn sent_to(&self, user: UserId) -> Vec<ServerMessage> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| *to == user)
            .map(|(_, m)| m)
            .collect()
    }

    /// Forget recorded deliveries.
    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl RealtimeChannel for RecordingChannel {
    fn send(&self, user: UserId, message: ServerMessage) -> Result<(), ChannelError> {
        if self.offline.lock().unwrap_or_else(PoisonError::into_inner).contains(&user) {
            return Err(ChannelError::NotConnected);
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push((user, message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> ServerMessage {
        ServerMessage::Pong { timestamp: 1, server_time: 2 }
    }

    #[tokio::test]
    async fn test_hub_delivers_to_registered_user() {
        let hub = ConnectionHub::new();
        let user = UserId::random();
        let (tx, mut rx) = mpsc::channel(4);
        hub.register(user, tx);

        hub.send(user, pong()).unwrap();
        assert_eq!(rx.recv().await, Some(pong()));
    }

    #[test]
    fn test_hub_unknown_user() {
        let hub = ConnectionHub::new();
        assert_eq!(hub.send(UserId::random(), pong()), Err(ChannelError::NotConnected));
    }

    #[test]
    fn test_hub_full_buffer() {
        let hub = ConnectionHub::new();
        let user = UserId::random();
        let (tx, _rx) = mpsc::channel(1);
        hub.register(user, tx);
        hub.send(user, pong()).unwrap();
        assert_eq!(hub.send(user, pong()), Err(ChannelError::Full));
    }

    #[test]
    fn test_hub_closed_receiver() {
        let hub = ConnectionHub::new();
        let user = UserId::random();
        let (tx, rx) = mpsc::channel(1);
        hub.register(user, tx);
        drop(rx);
        assert_eq!(hub.send(user, pong()), Err(ChannelError::Closed));
    }

    #[test]
    fn test_stale_unregister_keeps_newer_binding() {
        let hub = ConnectionHub::new();
        let user = UserId::random();
        let (old_tx, _old_rx) = mpsc::channel(1);
        let (new_tx, _new_rx) = mpsc::channel(1);
        hub.register(user, old_tx.clone());
        hub.register(user, new_tx.clone());

        assert!(!hub.unregister(user, &old_tx));
        assert!(hub.is_connected(user));
        assert!(hub.unregister(user, &new_tx));
        assert!(!hub.is_connected(user));
    }

    #[test]
    fn test_recording_channel_offline() {
        let channel = RecordingChannel::new();
        let (a, b) = (UserId::random(), UserId::random());
        channel.set_offline(b);

        notify(&channel, a, pong());
        notify(&channel, b, pong());

        assert_eq!(channel.sent_to(a).len(), 1);
        assert!(channel.sent_to(b).is_empty());
    }
}
