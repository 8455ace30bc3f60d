//! WebSocket provider: keeps one document in sync with one room.
//!
//! ```text
//!   DocumentHandle ──UpdateBatch──► supervisor ──Update──► server
//!         ▲                            │   ▲
//!         └──apply_update(tag)─────────┘   └── should_connect (watch)
//! ```
//!
//! A single supervisor task owns the socket. It connects whenever the
//! desired state says so, retries with exponential backoff after transport
//! failures, and parks local batches in an [`OfflineQueue`] while there is
//! no connection. A connect attempt is abandoned as soon as `disconnect()`
//! is called or `connect_timeout` passes. Every (re)connect also runs the state-vector handshake,
//! so anything the queue could not hold still reaches the server.
//!
//! Remote updates are merged under the provider's own [`ProducerId`];
//! batches carrying that tag are never sent back out.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use tandem_core::{DocumentHandle, ProducerId, UpdateBatch};

use crate::presence::{AwarenessMessage, PresenceRoom, RemotePeer, TextRange};
use crate::protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Actual connection state, owned by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Status(ConnectionState),
    /// First handshake diff from the server has been merged
    Synced,
    PeerJoined(PeerInfo),
    PeerLeft(Uuid),
    Presence(AwarenessMessage),
    /// A peer sent no presence for `presence_idle_timeout` and was dropped
    PresenceExpired(Uuid),
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Retry after transport failures while `should_connect` holds
    pub reconnect: bool,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Give up on a handshake that takes longer than this
    pub connect_timeout: Duration,
    /// Exchange awareness records
    pub presence: bool,
    /// Forget remote cursors that stay quiet this long
    pub presence_idle_timeout: Duration,
    pub offline_queue_capacity: usize,
    pub user_name: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2500),
            connect_timeout: Duration::from_secs(10),
            presence: false,
            presence_idle_timeout: Duration::from_secs(30),
            offline_queue_capacity: 10_000,
            user_name: "Anonymous".to_string(),
        }
    }
}

/// Local update batches produced while offline, replayed in order on reconnect.
pub struct OfflineQueue {
    queue: VecDeque<QueuedUpdate>,
    max_size: usize,
}

#[derive(Debug, Clone)]
struct QueuedUpdate {
    clock: u64,
    payload: Arc<[u8]>,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// `false` when full; the batch is not queued.
    pub fn enqueue(&mut self, clock: u64, payload: Arc<[u8]>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(QueuedUpdate { clock, payload });
        true
    }

    pub fn drain(&mut self) -> Vec<(u64, Arc<[u8]>)> {
        self.queue.drain(..).map(|q| (q.clock, q.payload)).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(|q| q.payload.len()).sum()
    }
}

enum Attempt {
    Open(WsStream),
    Failed(String),
    TimedOut,
    /// `disconnect()` was called mid-handshake
    Cancelled,
    /// The provider was dropped
    Gone,
}

enum SessionEnd {
    /// `disconnect()` was called
    Requested,
    /// Server closed the socket
    Closed,
}

struct Shared {
    url: String,
    room: String,
    peer: PeerInfo,
    doc: DocumentHandle,
    producer: ProducerId,
    config: ProviderConfig,
    should_connect: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    queue: Mutex<OfflineQueue>,
    clock: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
    presence: Option<StdMutex<PresenceRoom>>,
}

impl Shared {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn emit(&self, event: ProviderEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
        if changed {
            log::info!("Provider for room '{}' is {next}", self.room);
            self.emit(ProviderEvent::Status(next));
        }
    }

    fn with_presence<T>(&self, f: impl FnOnce(&mut PresenceRoom) -> T) -> Option<T> {
        let presence = self.presence.as_ref()?;
        let mut room = match presence.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(f(&mut room))
    }

    /// Hold a local batch while there is no connection.
    async fn park(&self, batch: Result<UpdateBatch, broadcast::error::RecvError>) -> bool {
        match batch {
            Ok(batch) if batch.producer == Some(self.producer) => true,
            Ok(batch) => {
                let clock = self.tick();
                let mut queue = self.queue.lock().await;
                if !queue.enqueue(clock, batch.update) {
                    log::warn!(
                        "Offline queue full ({} batches), relying on handshake for the rest",
                        queue.len()
                    );
                }
                true
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                log::warn!("Missed {n} local batches while offline, handshake will carry them");
                true
            }
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }

    async fn handle_frame(
        &self,
        sink: &mut WsSink,
        bytes: &[u8],
        synced: &mut bool,
    ) -> Result<(), ProtocolError> {
        let msg = match SyncMessage::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Ignoring undecodable frame in room '{}': {e}", self.room);
                return Ok(());
            }
        };
        match msg.msg_type {
            MessageType::SyncStep1 => match self.doc.encode_diff(&msg.payload) {
                Ok(diff) => {
                    let reply = SyncMessage::sync_step2(self.peer.peer_id, &self.room, diff);
                    send(sink, &reply).await?;
                }
                Err(e) => log::warn!("Bad state vector from server: {e}"),
            },
            MessageType::SyncStep2 | MessageType::Update => {
                if let Err(e) = self.doc.apply_update(Some(self.producer), &msg.payload) {
                    log::warn!("Rejected update from {}: {e}", msg.peer_id);
                }
                if msg.msg_type == MessageType::SyncStep2 && !*synced {
                    *synced = true;
                    log::debug!("Room '{}' synced", self.room);
                    self.emit(ProviderEvent::Synced);
                }
            }
            MessageType::Awareness => {
                if self.presence.is_none() {
                    return Ok(());
                }
                match AwarenessMessage::decode(&msg.payload) {
                    Ok(record) => {
                        self.with_presence(|room| room.handle_message(&record));
                        self.emit(ProviderEvent::Presence(record));
                    }
                    Err(e) => log::warn!("Bad awareness record from {}: {e}", msg.peer_id),
                }
            }
            MessageType::PeerJoined => {
                if let Ok(info) = msg.peer_info() {
                    log::debug!("Peer {} joined room '{}'", info.name, self.room);
                    self.emit(ProviderEvent::PeerJoined(info));
                }
            }
            MessageType::PeerLeft => {
                self.with_presence(|room| room.remove_peer(&msg.peer_id));
                self.emit(ProviderEvent::PeerLeft(msg.peer_id));
            }
            MessageType::Ping => send(sink, &SyncMessage::pong(self.peer.peer_id)).await?,
            MessageType::Pong => log::trace!("pong from server"),
        }
        Ok(())
    }

    async fn send_presence(&self, sink: &mut WsSink, record: &AwarenessMessage) -> Result<(), ProtocolError> {
        let msg = SyncMessage::awareness(self.peer.peer_id, &self.room, self.tick(), record.encode()?);
        send(sink, &msg).await
    }
}

async fn send(sink: &mut WsSink, msg: &SyncMessage) -> Result<(), ProtocolError> {
    sink.send(Message::Binary(msg.encode()?.into())).await?;
    Ok(())
}

/// Network provider for one (endpoint, room, document) triple.
pub struct WebsocketProvider {
    shared: Arc<Shared>,
    presence_tx: mpsc::Sender<AwarenessMessage>,
    task: JoinHandle<()>,
}

impl WebsocketProvider {
    /// Start syncing `doc` with `room` at `url`. Must be called inside a
    /// tokio runtime; the first connection attempt starts immediately.
    pub fn new(
        url: impl Into<String>,
        room: impl Into<String>,
        doc: DocumentHandle,
        config: ProviderConfig,
    ) -> Self {
        let peer = PeerInfo::new(config.user_name.clone());
        let presence = config
            .presence
            .then(|| {
                StdMutex::new(
                    PresenceRoom::new(peer.peer_id).with_idle_timeout(config.presence_idle_timeout),
                )
            });
        let (should_connect, desired) = watch::channel(true);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(256);
        let (presence_tx, presence_rx) = mpsc::channel(64);
        let updates = doc.subscribe_updates();

        let shared = Arc::new(Shared {
            url: url.into(),
            room: room.into(),
            peer,
            doc,
            producer: ProducerId::next(),
            queue: Mutex::new(OfflineQueue::new(config.offline_queue_capacity)),
            config,
            should_connect,
            state,
            clock: AtomicU64::new(0),
            events,
            presence,
        });

        let task = tokio::spawn(supervise(shared.clone(), desired, updates, presence_rx));
        Self {
            shared,
            presence_tx,
            task,
        }
    }

    /// Desired state. Stays `true` across transport failures.
    pub fn should_connect(&self) -> bool {
        *self.shared.should_connect.borrow()
    }

    /// Want a connection; (re)connects right away.
    pub fn connect(&self) {
        log::info!("Connect requested for room '{}'", self.shared.room);
        self.shared.should_connect.send_replace(true);
    }

    /// Drop the connection and stop forwarding. Local state is kept and
    /// later edits are queued for the next connect.
    pub fn disconnect(&self) {
        log::info!("Disconnect requested for room '{}'", self.shared.room);
        self.shared.should_connect.send_replace(false);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn watch_should_connect(&self) -> watch::Receiver<bool> {
        self.shared.should_connect.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.shared.events.subscribe()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
        timeout: Duration,
    ) -> Result<(), ProtocolError> {
        let mut rx = self.watch_state();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        Ok(())
    }

    /// Publish the local caret. `false` when presence is off or throttled.
    pub fn set_local_cursor(&self, range: TextRange) -> bool {
        let Some(Some(record)) = self.shared.with_presence(|room| room.update_local_cursor(range))
        else {
            return false;
        };
        // Offline presence is dropped rather than queued.
        self.presence_tx.try_send(record).is_ok()
    }

    pub fn remote_peers(&self) -> Vec<RemotePeer> {
        self.shared
            .with_presence(|room| room.remote_peers().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn queued_updates(&self) -> usize {
        self.shared.queue.lock().await.len()
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn room(&self) -> &str {
        &self.shared.room
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.shared.peer
    }

    /// Tag carried by updates this provider merges into the document.
    pub fn producer(&self) -> ProducerId {
        self.shared.producer
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.shared.doc
    }

    #[cfg(feature = "diagnostics")]
    pub async fn snapshot(&self) -> tandem_core::ConnectionSnapshot {
        tandem_core::ConnectionSnapshot {
            url: self.shared.url.clone(),
            room: self.shared.room.clone(),
            should_connect: self.should_connect(),
            state: self.state().to_string(),
            queued_batches: self.queued_updates().await,
        }
    }
}

impl Drop for WebsocketProvider {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn supervise(
    shared: Arc<Shared>,
    mut desired: watch::Receiver<bool>,
    mut updates: broadcast::Receiver<UpdateBatch>,
    mut presence: mpsc::Receiver<AwarenessMessage>,
) {
    let url = format!("{}/{}", shared.url.trim_end_matches('/'), shared.room);
    let mut backoff = shared.config.min_backoff;

    loop {
        if !*desired.borrow_and_update() {
            if !idle(&shared, &mut desired, &mut updates, &mut presence, None).await {
                return;
            }
            continue;
        }

        shared.set_state(ConnectionState::Connecting);
        match open(&url, shared.config.connect_timeout, &mut desired).await {
            Attempt::Open(ws) => {
                backoff = shared.config.min_backoff;
                let end = run_session(&shared, ws, &mut desired, &mut updates, &mut presence).await;
                shared.set_state(ConnectionState::Disconnected);
                match end {
                    Ok(SessionEnd::Requested) => continue,
                    Ok(SessionEnd::Closed) => log::warn!("Server closed connection to {url}"),
                    Err(e) => log::warn!("Connection to {url} dropped: {e}"),
                }
            }
            Attempt::Cancelled => {
                shared.set_state(ConnectionState::Disconnected);
                log::info!("Abandoned connecting to {url}");
                continue;
            }
            Attempt::Gone => return,
            Attempt::TimedOut => {
                shared.set_state(ConnectionState::Disconnected);
                log::warn!(
                    "Connecting to {url} timed out after {:?}",
                    shared.config.connect_timeout
                );
            }
            Attempt::Failed(e) => {
                shared.set_state(ConnectionState::Disconnected);
                log::warn!("Connecting to {url} failed: {e}");
            }
        }

        // Still wanted: retry after backoff, or wait for an explicit connect().
        let retry_in = shared.config.reconnect.then_some(backoff);
        if !idle(&shared, &mut desired, &mut updates, &mut presence, retry_in).await {
            return;
        }
        backoff = (backoff * 2).min(shared.config.max_backoff);
    }
}

/// Run the WebSocket handshake unless `disconnect()` or the timeout gets
/// there first. Dropping the handshake releases the socket.
async fn open(url: &str, timeout: Duration, desired: &mut watch::Receiver<bool>) -> Attempt {
    let handshake = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url));
    tokio::pin!(handshake);
    loop {
        tokio::select! {
            result = &mut handshake => {
                return match result {
                    Ok(Ok((ws, _))) => Attempt::Open(ws),
                    Ok(Err(e)) => Attempt::Failed(e.to_string()),
                    Err(_) => Attempt::TimedOut,
                };
            }
            changed = desired.changed() => {
                if changed.is_err() {
                    return Attempt::Gone;
                }
                if !*desired.borrow_and_update() {
                    return Attempt::Cancelled;
                }
            }
        }
    }
}

/// Wait for `timeout` or a desired-state change, parking local batches.
/// `false` once the provider is gone.
async fn idle(
    shared: &Shared,
    desired: &mut watch::Receiver<bool>,
    updates: &mut broadcast::Receiver<UpdateBatch>,
    presence: &mut mpsc::Receiver<AwarenessMessage>,
    timeout: Option<Duration>,
) -> bool {
    let sleep = async {
        match timeout {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = desired.changed() => return changed.is_ok(),
            batch = updates.recv() => {
                if !shared.park(batch).await {
                    return false;
                }
            }
            record = presence.recv() => {
                if record.is_none() {
                    return false;
                }
            }
        }
    }
}

async fn run_session(
    shared: &Shared,
    ws: WsStream,
    desired: &mut watch::Receiver<bool>,
    updates: &mut broadcast::Receiver<UpdateBatch>,
    presence: &mut mpsc::Receiver<AwarenessMessage>,
) -> Result<SessionEnd, ProtocolError> {
    let (mut sink, mut stream) = ws.split();
    let me = shared.peer.peer_id;
    let room = shared.room.as_str();

    send(&mut sink, &SyncMessage::peer_joined(room, &shared.peer)?).await?;
    send(&mut sink, &SyncMessage::sync_step1(me, room, shared.doc.state_vector())).await?;

    let queued = shared.queue.lock().await.drain();
    if !queued.is_empty() {
        log::info!("Replaying {} queued updates to room '{room}'", queued.len());
    }
    for (clock, payload) in queued {
        send(&mut sink, &SyncMessage::update(me, room, clock, payload.to_vec())).await?;
    }
    if let Some(join) = shared.with_presence(|p| p.create_join_message(shared.config.user_name.clone())) {
        shared.send_presence(&mut sink, &join).await?;
    }
    shared.set_state(ConnectionState::Connected);

    let mut synced = false;
    let sweep_every = (shared.config.presence_idle_timeout / 2).max(Duration::from_millis(10));
    let mut sweep = tokio::time::interval(sweep_every);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = sweep.tick(), if shared.presence.is_some() => {
                for id in shared.with_presence(|p| p.cleanup_idle_peers()).unwrap_or_default() {
                    log::debug!("Presence of {id} expired in room '{room}'");
                    shared.emit(ProviderEvent::PresenceExpired(id));
                }
            }

            changed = desired.changed() => {
                if changed.is_err() || !*desired.borrow_and_update() {
                    if let Some(leave) = shared.with_presence(|p| p.create_leave_message()) {
                        let _ = shared.send_presence(&mut sink, &leave).await;
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Requested);
                }
            }

            batch = updates.recv() => match batch {
                Ok(batch) if batch.producer == Some(shared.producer) => {}
                Ok(batch) => {
                    let msg = SyncMessage::update(me, room, shared.tick(), batch.update.to_vec());
                    send(&mut sink, &msg).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Missed {n} local batches, sending full state");
                    let full = shared.doc.encode_state_as_update();
                    send(&mut sink, &SyncMessage::update(me, room, shared.tick(), full)).await?;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(SessionEnd::Requested),
            },

            record = presence.recv() => {
                if let Some(record) = record {
                    shared.send_presence(&mut sink, &record).await?;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Binary(data))) => shared.handle_frame(&mut sink, &data, &mut synced).await?,
                Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> ProviderConfig {
        ProviderConfig {
            reconnect: false,
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_config_default() {
        let config = ProviderConfig::default();
        assert!(config.reconnect);
        assert!(!config.presence);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.presence_idle_timeout, Duration::from_secs(30));
        assert_eq!(config.min_backoff, Duration::from_millis(100));
        assert_eq!(config.offline_queue_capacity, 10_000);
    }

    #[test]
    fn test_offline_queue() {
        let mut queue = OfflineQueue::new(100);
        assert!(queue.is_empty());

        queue.enqueue(1, Arc::from(&[1u8, 2, 3][..]));
        queue.enqueue(2, Arc::from(&[4u8, 5, 6, 7][..]));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.total_bytes(), 7);

        let drained = queue.drain();
        assert_eq!(drained[0].0, 1);
        assert_eq!(&drained[0].1[..], &[1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_offline_queue_capacity() {
        let mut queue = OfflineQueue::new(2);
        assert!(queue.enqueue(1, Arc::from(&[1u8][..])));
        assert!(queue.enqueue(2, Arc::from(&[2u8][..])));
        assert!(!queue.enqueue(3, Arc::from(&[3u8][..])));
        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_keeps_desired_state() {
        let provider = WebsocketProvider::new(
            "ws://127.0.0.1:1",
            "ws",
            DocumentHandle::new(),
            offline_config(),
        );
        // Connection refused comes back immediately; no retry is scheduled.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(provider.state(), ConnectionState::Disconnected);
        assert!(provider.should_connect());
    }

    #[tokio::test]
    async fn test_edits_while_disconnected_are_queued() {
        let doc = DocumentHandle::new();
        let provider =
            WebsocketProvider::new("ws://127.0.0.1:1", "ws", doc.clone(), offline_config());
        provider.disconnect();
        assert!(!provider.should_connect());

        doc.text("quill").insert(None, 0, "offline").unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while provider.queued_updates().await == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(provider.queued_updates().await, 1);
        assert_eq!(provider.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_own_merges_are_not_queued() {
        let doc = DocumentHandle::new();
        let provider =
            WebsocketProvider::new("ws://127.0.0.1:1", "ws", doc.clone(), offline_config());
        provider.disconnect();

        let remote = DocumentHandle::new();
        remote.text("quill").insert(None, 0, "remote").unwrap();
        doc.apply_update(Some(provider.producer()), &remote.encode_state_as_update())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.queued_updates().await, 0);
    }

    /// Accepts TCP connections but never answers the WebSocket upgrade.
    async fn silent_endpoint() -> (String, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        (url, task)
    }

    #[tokio::test]
    async fn test_disconnect_abandons_pending_handshake() {
        let (url, server) = silent_endpoint().await;
        let provider = WebsocketProvider::new(url, "ws", DocumentHandle::new(), ProviderConfig::default());
        provider
            .wait_for_state(ConnectionState::Connecting, Duration::from_secs(2))
            .await
            .unwrap();

        provider.disconnect();
        provider
            .wait_for_state(ConnectionState::Disconnected, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(!provider.should_connect());
        server.abort();
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out_and_retries() {
        let (url, server) = silent_endpoint().await;
        let provider = WebsocketProvider::new(
            url,
            "ws",
            DocumentHandle::new(),
            ProviderConfig {
                connect_timeout: Duration::from_millis(100),
                min_backoff: Duration::from_millis(50),
                ..ProviderConfig::default()
            },
        );
        let mut events = provider.subscribe_events();

        // Connecting -> Disconnected (timeout) -> Connecting again (retry).
        let mut seen = Vec::new();
        while seen.len() < 3 {
            match tokio::time::timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Ok(ProviderEvent::Status(state))) => seen.push(state),
                Ok(_) => {}
                Err(_) => panic!("stuck after {seen:?}"),
            }
        }
        assert_eq!(
            seen,
            [
                ConnectionState::Connecting,
                ConnectionState::Disconnected,
                ConnectionState::Connecting
            ]
        );
        assert!(provider.should_connect());
        server.abort();
    }

    #[tokio::test]
    async fn test_presence_off_by_default() {
        let provider = WebsocketProvider::new(
            "ws://127.0.0.1:1",
            "ws",
            DocumentHandle::new(),
            offline_config(),
        );
        assert!(!provider.set_local_cursor(TextRange::default()));
        assert!(provider.remote_peers().is_empty());
    }
}
