//! WebSocket Game Server
//!
//! Async WebSocket front end for the duel service. Each connection gets a
//! reader loop and a writer task; outbound events reach the writer through
//! the [`ConnectionHub`] once the client has said `hello`.
//!
//! A connection that closes, errors, or stays silent past the idle timeout is
//! treated as a disconnect: the user leaves every queue and forfeits any live
//! session by abandonment.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::ids::UserId;
use crate::error::DuelError;
use crate::network::channel::ConnectionHub;
use crate::network::protocol::{ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::service::DuelService;

/// Most leaderboard rows returned per request.
const MAX_LEADERBOARD_ROWS: usize = 100;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound message could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Core operations.
    service: Arc<DuelService>,
    /// User -> outbound sender bindings.
    hub: Arc<ConnectionHub>,
    /// Open sockets, identified or not.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server. `hub` must be the channel `service` delivers through.
    pub fn new(config: ServerConfig, service: Arc<DuelService>, hub: Arc<ConnectionHub>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            hub,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let service = self.service.clone();
        let hub = self.hub.clone();
        let config = self.config.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    connections.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };

            let (ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, msg_rx) = mpsc::channel::<ServerMessage>(service.config().outbound_buffer);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                if let Err(e) = Self::write_loop(ws_sender, msg_rx).await {
                    debug!("Writer for {} stopped: {}", addr, e);
                }
            });

            let mut user: Option<UserId> = None;

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = timeout(config.idle_timeout, ws_receiver.next()) => {
                        match msg {
                            Err(_) => {
                                info!("Client {} idle for {:?}, closing", addr, config.idle_timeout);
                                break;
                            }
                            Ok(Some(Ok(Message::Text(text)))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::InvalidInput,
                                            message: "Invalid message format".to_string(),
                                            retryable: false,
                                        })).await;
                                        continue;
                                    }
                                };

                                Self::handle_client_message(
                                    client_msg,
                                    &mut user,
                                    &service,
                                    &hub,
                                    &config,
                                    &msg_tx,
                                ).await;
                            }
                            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Ok(Some(Err(e))) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            Ok(Some(Ok(_))) => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            sender_task.abort();

            if let Some(user_id) = user {
                // A newer connection for the same user keeps the session alive.
                if hub.unregister(user_id, &msg_tx) {
                    service.on_disconnect(user_id).await;
                }
            }
            connections.fetch_sub(1, Ordering::SeqCst);

            info!("Client {} cleaned up", addr);
        });
    }

    async fn write_loop(
        mut ws_sender: SplitSink<WebSocketStream<TcpStream>, Message>,
        mut msg_rx: mpsc::Receiver<ServerMessage>,
    ) -> Result<(), GameServerError> {
        while let Some(msg) = msg_rx.recv().await {
            let text = msg.to_json()?;
            ws_sender.send(Message::Text(text)).await?;
        }
        Ok(())
    }

    /// Handle a client message.
    async fn handle_client_message(
        msg: ClientMessage,
        user: &mut Option<UserId>,
        service: &DuelService,
        hub: &ConnectionHub,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let user_id = match (&msg, *user) {
            (ClientMessage::Hello { user_id }, None) => {
                Self::handle_hello(*user_id, user, service, hub, config, sender).await;
                return;
            }
            (ClientMessage::Hello { .. }, Some(_)) => {
                Self::reply_error(sender, &DuelError::Validation("already identified".to_string())).await;
                return;
            }
            (ClientMessage::Ping { timestamp }, _) => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp: *timestamp,
                        server_time: std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64,
                    })
                    .await;
                return;
            }
            (_, Some(id)) => id,
            (_, None) => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::NotIdentified,
                        message: "Send hello first".to_string(),
                        retryable: false,
                    }))
                    .await;
                return;
            }
        };

        // Queue updates, match notices and session results arrive through the hub.
        let result = match msg {
            ClientMessage::JoinQueue { mode, board_size } => {
                service.enqueue_rated(user_id, mode, board_size).await.map(|_| ())
            }
            ClientMessage::LeaveQueue { mode } => {
                let removed = service.dequeue(user_id, mode);
                let _ = sender.send(ServerMessage::QueueLeft { mode, removed }).await;
                Ok(())
            }
            ClientMessage::StartSolo { mode, board_size, puzzle_ref } => service
                .create_solo_session(user_id, board_size, mode, puzzle_ref)
                .await
                .map(|_| ()),
            ClientMessage::Move { session_id, data } => {
                service.relay_move(session_id, user_id, data).await
            }
            ClientMessage::Complete { session_id, report } => {
                service.complete_session(session_id, user_id, report).await.map(|_| ())
            }
            ClientMessage::Quit { session_id } => service.quit_session(session_id, user_id).await,
            ClientMessage::Leaderboard { category, season, limit } => {
                let season = season.unwrap_or_else(|| service.config().season.clone());
                match service
                    .leaderboard_top(&category, Some(&season), limit.min(MAX_LEADERBOARD_ROWS))
                    .await
                {
                    Ok(entries) => {
                        let _ = sender
                            .send(ServerMessage::Leaderboard { category, season, entries })
                            .await;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            ClientMessage::Hello { .. } | ClientMessage::Ping { .. } => Ok(()),
        };

        if let Err(e) = result {
            debug!("Request from {} failed: {}", user_id.short(), e);
            Self::reply_error(sender, &e).await;
        }
    }

    async fn handle_hello(
        user_id: UserId,
        user: &mut Option<UserId>,
        service: &DuelService,
        hub: &ConnectionHub,
        config: &ServerConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let rating = match service.rating(user_id).await {
            Ok(record) => record.elo_rating,
            Err(e) => {
                Self::reply_error(sender, &e).await;
                return;
            }
        };

        hub.register(user_id, sender.clone());
        *user = Some(user_id);

        let _ = sender
            .send(ServerMessage::Welcome { user_id, rating, server_version: config.version.clone() })
            .await;

        debug!("Connection identified as {}", user_id.short());
    }

    async fn reply_error(sender: &mpsc::Sender<ServerMessage>, e: &DuelError) {
        let _ = sender.send(ServerMessage::Error(e.to_server_error())).await;
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Get identified user count.
    pub fn identified_count(&self) -> usize {
        self.hub.connection_count()
    }
}
