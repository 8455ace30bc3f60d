//! WebSocket relay server with one authoritative replica per room.
//!
//! ```text
//! Provider A ──┐
//!              ├── Room ("ws") ── DocumentHandle ── BroadcastGroup
//! Provider B ──┘                                       │
//!                                            ┌─────────┴─────────┐
//!                                            ▼                   ▼
//!                                        Provider A          Provider B
//! ```
//!
//! Inbound updates are merged into the room replica first. Only the part
//! that was new to the server is relayed, and never back to its sender.

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use tandem_core::{DocumentHandle, EMPTY_UPDATE};

use crate::broadcast::{BroadcastGroup, Frame};
use crate::protocol::{MessageType, PeerInfo, SyncMessage};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_peers_per_room: usize,
    /// Frames buffered per peer before it lags
    pub broadcast_capacity: usize,
    /// Name of the shared text inside each room's document
    pub text_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            max_peers_per_room: 100,
            broadcast_capacity: 256,
            text_name: tandem_core::DEFAULT_TEXT_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub relayed_updates: u64,
    pub active_rooms: usize,
}

/// Authoritative replica plus fan-out for one room.
#[derive(Clone)]
struct DocumentRoom {
    doc: DocumentHandle,
    broadcast: Arc<BroadcastGroup>,
}

impl DocumentRoom {
    fn new(broadcast_capacity: usize) -> Self {
        Self {
            doc: DocumentHandle::new(),
            broadcast: Arc::new(BroadcastGroup::new(broadcast_capacity)),
        }
    }
}

/// Per-connection state once the peer has joined a room.
struct Membership {
    peer_id: Uuid,
    room_name: String,
    room: DocumentRoom,
    rx: broadcast::Receiver<Frame>,
}

#[derive(Clone)]
pub struct SyncServer {
    config: ServerConfig,
    rooms: Arc<RwLock<HashMap<String, DocumentRoom>>>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn Error>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = self.stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let mut membership: Option<Membership> = None;
        let outcome: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = self.stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            let sync_msg = match SyncMessage::decode(&data) {
                                Ok(m) => m,
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                    continue;
                                }
                            };
                            for reply in self.route(&mut membership, sync_msg).await? {
                                ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                    },

                    frame = async {
                        match membership.as_mut() {
                            Some(m) => m.rx.recv().await,
                            // Not joined yet: nothing to forward.
                            None => std::future::pending().await,
                        }
                    } => match frame {
                        Ok(frame) => {
                            let own = membership.as_ref().map(|m| m.peer_id);
                            if Some(frame.from) != own {
                                ws_sender.send(Message::Binary(frame.bytes.to_vec().into())).await?;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            // The client re-syncs via state vectors on reconnect.
                            log::warn!("Peer at {addr} lagged by {n} frames, dropping connection");
                            return Ok(());
                        }
                        Err(broadcast::error::RecvError::Closed) => return Ok(()),
                    },
                }
            }
        }
        .await;

        if let Some(m) = membership {
            self.leave(m).await;
        }
        self.stats.write().await.active_connections -= 1;
        outcome
    }

    /// Process one inbound message, returning replies for the sender.
    async fn route(
        &self,
        membership: &mut Option<Membership>,
        msg: SyncMessage,
    ) -> Result<Vec<SyncMessage>, BoxError> {
        if msg.msg_type == MessageType::PeerJoined {
            if membership.is_some() {
                log::warn!("Peer {} sent a second join, ignoring", msg.peer_id);
                return Ok(Vec::new());
            }
            let (joined, reply) = self.join(&msg).await?;
            *membership = Some(joined);
            return Ok(vec![reply]);
        }

        let Some(m) = membership.as_ref() else {
            log::debug!("Dropping {:?} from peer that has not joined", msg.msg_type);
            return Ok(Vec::new());
        };

        match msg.msg_type {
            MessageType::SyncStep1 => {
                let diff = m.room.doc.encode_diff(&msg.payload)?;
                Ok(vec![SyncMessage::sync_step2(Uuid::nil(), &m.room_name, diff)])
            }

            MessageType::SyncStep2 | MessageType::Update => {
                if msg.payload == EMPTY_UPDATE {
                    return Ok(Vec::new());
                }
                match m.room.doc.apply_update(None, &msg.payload) {
                    Ok(Some(diff)) => {
                        let relay = SyncMessage::update(m.peer_id, &m.room_name, msg.clock, diff);
                        let reached = m.room.broadcast.broadcast(&relay)?;
                        self.stats.write().await.relayed_updates += 1;
                        if log::log_enabled!(log::Level::Debug) {
                            let text = m.room.doc.text(&self.config.text_name);
                            log::debug!(
                                "Room '{}' updated by {} ({} peers): {:?}",
                                m.room_name,
                                m.peer_id,
                                reached.saturating_sub(1),
                                text.content()
                            );
                        }
                    }
                    Ok(None) => log::trace!("Update from {} added nothing", m.peer_id),
                    Err(e) => log::warn!("Rejected update from {}: {e}", m.peer_id),
                }
                Ok(Vec::new())
            }

            MessageType::Awareness => {
                log::trace!("Relaying awareness from {} in '{}'", m.peer_id, m.room_name);
                m.room.broadcast.broadcast(&msg)?;
                Ok(Vec::new())
            }

            MessageType::Ping => Ok(vec![SyncMessage::pong(Uuid::nil())]),

            other => {
                log::debug!("Unhandled message type: {other:?}");
                Ok(Vec::new())
            }
        }
    }

    async fn join(&self, msg: &SyncMessage) -> Result<(Membership, SyncMessage), BoxError> {
        let info = msg
            .peer_info()
            .unwrap_or_else(|_| PeerInfo::with_id(msg.peer_id, "Anonymous"));

        // Lookup, capacity check and membership happen under one write lock
        // so a concurrent leave cannot drop the room in between.
        let (room, rx) = {
            let mut rooms = self.rooms.write().await;
            let room = rooms
                .entry(msg.room.clone())
                .or_insert_with(|| DocumentRoom::new(self.config.broadcast_capacity))
                .clone();
            let peers = room.broadcast.peer_count().await;
            if peers >= self.config.max_peers_per_room {
                if peers == 0 {
                    rooms.remove(&msg.room);
                }
                return Err(format!("room '{}' is full", msg.room).into());
            }
            let rx = room.broadcast.add_peer(info.clone()).await;
            self.stats.write().await.active_rooms = rooms.len();
            (room, rx)
        };

        room.broadcast.broadcast(msg)?;
        log::info!("Peer {} ({}) joined room '{}'", info.name, info.peer_id, msg.room);

        // Ask for whatever the client has that we lack (offline edits).
        let reply = SyncMessage::sync_step1(Uuid::nil(), &msg.room, room.doc.state_vector());
        Ok((
            Membership {
                peer_id: info.peer_id,
                room_name: msg.room.clone(),
                room,
                rx,
            },
            reply,
        ))
    }

    async fn leave(&self, m: Membership) {
        m.room.broadcast.remove_peer(&m.peer_id).await;
        let _ = m
            .room
            .broadcast
            .broadcast(&SyncMessage::peer_left(m.peer_id, &m.room_name));
        log::info!("Peer {} left room '{}'", m.peer_id, m.room_name);

        let mut rooms = self.rooms.write().await;
        let current = rooms
            .get(&m.room_name)
            .is_some_and(|r| Arc::ptr_eq(&r.broadcast, &m.room.broadcast));
        if current && m.room.broadcast.peer_count().await == 0 {
            rooms.remove(&m.room_name);
            log::info!("Room '{}' removed (empty)", m.room_name);
        }
        self.stats.write().await.active_rooms = rooms.len();
    }

    /// Current text of a room, if the room is open.
    pub async fn room_text(&self, room: &str) -> Option<String> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|r| r.doc.text(&self.config.text_name).content())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
