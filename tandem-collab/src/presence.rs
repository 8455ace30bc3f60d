//! Ephemeral presence: who is in the room and where their caret is.
//!
//! Records travel as opaque `Awareness` payloads; the server relays them
//! without looking inside. Nothing here touches document history, and a
//! peer's record disappears when it leaves or goes idle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::protocol::ProtocolError;

/// Display color derived from a peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PeerColor {
    /// Stable, saturated color for `id`.
    pub fn from_uuid(id: Uuid) -> Self {
        let hue = (id.as_u128() % 360) as f32 / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        let byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        Self {
            r: byte(r),
            g: byte(g),
            b: byte(b),
        }
    }

    /// CSS-style `#rrggbb`.
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Caret or selection in UTF-16 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TextRange {
    pub index: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwarenessMessage {
    Join {
        user_id: Uuid,
        user_name: String,
        color: PeerColor,
    },
    Leave {
        user_id: Uuid,
    },
    Cursor {
        user_id: Uuid,
        range: TextRange,
        /// Sender-local counter; stale cursors are dropped
        timestamp: u64,
    },
}

impl AwarenessMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(msg)
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            AwarenessMessage::Join { user_id, .. }
            | AwarenessMessage::Leave { user_id }
            | AwarenessMessage::Cursor { user_id, .. } => *user_id,
        }
    }
}

/// What we know about one remote peer.
#[derive(Debug, Clone)]
pub struct RemotePeer {
    pub user_id: Uuid,
    pub user_name: String,
    pub color: PeerColor,
    pub cursor: Option<TextRange>,
    last_timestamp: u64,
    last_update: Instant,
}

impl RemotePeer {
    fn new(user_id: Uuid, user_name: String, color: PeerColor) -> Self {
        Self {
            user_id,
            user_name,
            color,
            cursor: None,
            last_timestamp: 0,
            last_update: Instant::now(),
        }
    }

    fn update_cursor(&mut self, range: TextRange, timestamp: u64) {
        if timestamp < self.last_timestamp {
            return;
        }
        self.cursor = Some(range);
        self.last_timestamp = timestamp;
        self.last_update = Instant::now();
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_update.elapsed() > timeout
    }
}

/// Presence state for every remote peer in one room.
pub struct PresenceRoom {
    local_user_id: Uuid,
    peers: HashMap<Uuid, RemotePeer>,
    local_cursor: TextRange,
    last_cursor_broadcast: Option<Instant>,
    cursor_interval: Duration,
    timestamp_counter: u64,
    idle_timeout: Duration,
}

impl PresenceRoom {
    pub fn new(local_user_id: Uuid) -> Self {
        Self::with_interval(local_user_id, Duration::from_millis(33))
    }

    /// Cursor broadcasts closer together than `interval` are throttled.
    pub fn with_interval(local_user_id: Uuid, interval: Duration) -> Self {
        Self {
            local_user_id,
            peers: HashMap::new(),
            local_cursor: TextRange::default(),
            last_cursor_broadcast: None,
            cursor_interval: interval,
            timestamp_counter: 0,
            idle_timeout: Duration::from_secs(30),
        }
    }

    /// Peers with no presence update for `timeout` are dropped by
    /// [`cleanup_idle_peers`](Self::cleanup_idle_peers).
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn handle_message(&mut self, msg: &AwarenessMessage) {
        if msg.user_id() == self.local_user_id {
            return;
        }
        match msg {
            AwarenessMessage::Join {
                user_id,
                user_name,
                color,
            } => {
                self.peers
                    .insert(*user_id, RemotePeer::new(*user_id, user_name.clone(), *color));
            }
            AwarenessMessage::Leave { user_id } => {
                self.peers.remove(user_id);
            }
            AwarenessMessage::Cursor {
                user_id,
                range,
                timestamp,
            } => {
                // A peer that joined before us never sent us its Join.
                let peer = self.peers.entry(*user_id).or_insert_with(|| {
                    RemotePeer::new(
                        *user_id,
                        format!("Peer-{}", &user_id.simple().to_string()[..8]),
                        PeerColor::from_uuid(*user_id),
                    )
                });
                peer.update_cursor(*range, *timestamp);
            }
        }
    }

    /// Record the local caret; `None` while throttled.
    pub fn update_local_cursor(&mut self, range: TextRange) -> Option<AwarenessMessage> {
        self.local_cursor = range;
        if self
            .last_cursor_broadcast
            .is_some_and(|at| at.elapsed() < self.cursor_interval)
        {
            return None;
        }
        self.last_cursor_broadcast = Some(Instant::now());
        self.timestamp_counter += 1;
        Some(AwarenessMessage::Cursor {
            user_id: self.local_user_id,
            range,
            timestamp: self.timestamp_counter,
        })
    }

    pub fn create_join_message(&self, user_name: impl Into<String>) -> AwarenessMessage {
        AwarenessMessage::Join {
            user_id: self.local_user_id,
            user_name: user_name.into(),
            color: PeerColor::from_uuid(self.local_user_id),
        }
    }

    pub fn create_leave_message(&self) -> AwarenessMessage {
        AwarenessMessage::Leave {
            user_id: self.local_user_id,
        }
    }

    pub fn remove_peer(&mut self, user_id: &Uuid) {
        self.peers.remove(user_id);
    }

    pub fn peer(&self, user_id: &Uuid) -> Option<&RemotePeer> {
        self.peers.get(user_id)
    }

    pub fn remote_peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Drop peers that have gone quiet; returns their ids.
    pub fn cleanup_idle_peers(&mut self) -> Vec<Uuid> {
        let timeout = self.idle_timeout;
        let idle: Vec<Uuid> = self
            .peers
            .values()
            .filter(|p| p.is_idle(timeout))
            .map(|p| p.user_id)
            .collect();
        for id in &idle {
            self.peers.remove(id);
        }
        idle
    }

    pub fn local_user_id(&self) -> Uuid {
        self.local_user_id
    }

    pub fn local_cursor(&self) -> TextRange {
        self.local_cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_stable() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(PeerColor::from_uuid(id), PeerColor::from_uuid(id));
        assert_eq!(PeerColor::from_uuid(id).to_hex().len(), 7);
    }

    #[test]
    fn test_join_cursor_leave() {
        let mut room = PresenceRoom::new(Uuid::new_v4());
        let remote = PresenceRoom::new(Uuid::new_v4());
        let remote_id = remote.local_user_id();

        room.handle_message(&remote.create_join_message("Bob"));
        assert_eq!(room.peer(&remote_id).unwrap().user_name, "Bob");

        let range = TextRange { index: 3, length: 2 };
        room.handle_message(&AwarenessMessage::Cursor {
            user_id: remote_id,
            range,
            timestamp: 1,
        });
        assert_eq!(room.peer(&remote_id).unwrap().cursor, Some(range));

        room.handle_message(&remote.create_leave_message());
        assert_eq!(room.peer_count(), 0);
    }

    #[test]
    fn test_stale_cursor_is_ignored() {
        let mut room = PresenceRoom::new(Uuid::new_v4());
        let id = Uuid::new_v4();
        let at = |index, timestamp| AwarenessMessage::Cursor {
            user_id: id,
            range: TextRange { index, length: 0 },
            timestamp,
        };
        room.handle_message(&at(5, 2));
        room.handle_message(&at(1, 1));
        assert_eq!(room.peer(&id).unwrap().cursor.unwrap().index, 5);
    }

    #[test]
    fn test_own_messages_are_ignored() {
        let id = Uuid::new_v4();
        let mut room = PresenceRoom::new(id);
        let join = room.create_join_message("me");
        room.handle_message(&join);
        assert_eq!(room.peer_count(), 0);
    }

    #[test]
    fn test_cursor_updates_are_throttled() {
        let mut room = PresenceRoom::with_interval(Uuid::new_v4(), Duration::from_secs(60));
        assert!(room.update_local_cursor(TextRange::default()).is_some());
        assert!(room
            .update_local_cursor(TextRange { index: 1, length: 0 })
            .is_none());
        assert_eq!(room.local_cursor().index, 1);
    }

    #[test]
    fn test_idle_peers_are_cleaned_up() {
        let mut room =
            PresenceRoom::new(Uuid::new_v4()).with_idle_timeout(Duration::from_millis(20));
        let quiet = PresenceRoom::new(Uuid::new_v4());
        room.handle_message(&quiet.create_join_message("Quiet"));
        assert!(room.cleanup_idle_peers().is_empty());

        std::thread::sleep(Duration::from_millis(40));
        let active = PresenceRoom::new(Uuid::new_v4());
        room.handle_message(&active.create_join_message("Active"));

        assert_eq!(room.cleanup_idle_peers(), vec![quiet.local_user_id()]);
        assert_eq!(room.peer_count(), 1);
        assert!(room.peer(&active.local_user_id()).is_some());
    }

    #[test]
    fn test_message_roundtrip() {
        let room = PresenceRoom::new(Uuid::new_v4());
        let msg = room.create_join_message("Alice");
        assert_eq!(AwarenessMessage::decode(&msg.encode().unwrap()).unwrap(), msg);
    }
}
