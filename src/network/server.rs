//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Each connection gets a
//! random client id, a welcome snapshot, and a session task that forwards
//! requests to the engine and gateway messages to the socket.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::game::scheduler::EngineHandle;
use crate::game::state::PlayerId;
use crate::network::gateway::ChannelGateway;
use crate::network::protocol::{
    server_time_ms, ClientMessage, ErrorCode, ServerMessage, WelcomeInfo,
};

/// How long a closing session may spend flushing its last messages.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected client state.
#[derive(Debug, Clone, Copy)]
struct ConnectedClient {
    player_id: PlayerId,
    connected_at: Instant,
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Request side of the round engine.
    engine: EngineHandle,
    /// Outbound fan-out.
    gateway: ChannelGateway,
    /// Connected clients.
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig, engine: EngineHandle, gateway: ChannelGateway) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            engine,
            gateway,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Sender that stops the accept loop and every session.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Bind and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Game server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let clients_count = self.clients.read().await.len();
                            if clients_count >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
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
        let clients = self.clients.clone();
        let engine = self.engine.clone();
        let gateway = self.gateway.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let player_id = PlayerId::random();
            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_capacity);

            // Subscribe before the snapshot so nothing falls between them
            let mut feed = gateway.subscribe(player_id);

            clients.write().await.insert(addr, ConnectedClient {
                player_id,
                connected_at: Instant::now(),
            });
            debug!("Client {} is {}", addr, player_id.short());

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            match engine.snapshot().await {
                Ok(snapshot) => {
                    let welcome = WelcomeInfo::new(player_id, &config.version, &snapshot);
                    let _ = msg_tx.send(ServerMessage::Welcome(welcome)).await;
                }
                Err(e) => {
                    warn!("No engine for {}: {}", addr, e);
                    let _ = msg_tx
                        .send(ServerMessage::error(ErrorCode::InternalError, e.to_string()))
                        .await;
                }
            }

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::error(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                Self::handle_client_message(player_id, client_msg, &engine, &msg_tx).await;
                            }
                            Some(Ok(Message::Binary(_))) => {
                                let _ = msg_tx.send(ServerMessage::error(
                                    ErrorCode::InvalidInput,
                                    "Binary frames are not supported",
                                )).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    message = feed.recv() => {
                        match message {
                            Some(message) => {
                                if msg_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => {
                                warn!("Gateway closed, dropping {}", addr);
                                break;
                            }
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

            // Let the sender drain what is queued, then give up on it
            drop(msg_tx);
            if tokio::time::timeout(FLUSH_TIMEOUT, sender_task).await.is_err() {
                debug!("Sender for {} did not finish flushing", addr);
            }

            // Open bets stay in the ledger and settle with the round
            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    "Client {} ({}) cleaned up after {:?}",
                    addr,
                    client.player_id.short(),
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle a client message.
    ///
    /// Engine replies arrive on the session's private gateway queue; only a
    /// stopped engine is reported here.
    async fn handle_client_message(
        player_id: PlayerId,
        msg: ClientMessage,
        engine: &EngineHandle,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let outcome = match msg {
            ClientMessage::PlaceBet { amount } => engine.place_bet(player_id, amount).await.map(|_| ()),
            ClientMessage::Cashout => engine.cashout(player_id).await.map(|_| ()),
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: server_time_ms(),
                }).await;
                Ok(())
            }
        };

        if let Err(e) = outcome {
            warn!("Request from {} dropped: {}", player_id.short(), e);
            let _ = sender
                .send(ServerMessage::error(ErrorCode::InternalError, e.to_string()))
                .await;
        }
    }
}
