//! # tandem-collab — network sync for tandem documents
//!
//! ```text
//! ┌──────────────────┐     WebSocket      ┌─────────────┐
//! │ WebsocketProvider│ ◄────────────────► │ SyncServer  │
//! │ (per document)   │   Binary Proto     │ (relay)     │
//! └────────┬─────────┘                    └──────┬──────┘
//!          │                                     │
//!          ▼                                     ▼
//! ┌──────────────────┐                   ┌───────────────┐
//! │ DocumentHandle   │                   │ room replicas │
//! │ (local replica)  │                   │ + fan-out     │
//! └────────▲─────────┘                   └───────────────┘
//!          │ should_connect
//! ┌────────┴─────────┐
//! │ ConnectionToggle │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — bincode-encoded `SyncMessage`
//! - [`broadcast`] — per-room fan-out
//! - [`server`] — relay server with one replica per room
//! - [`provider`] — client side: lifecycle, offline queue, reconnects
//! - [`controller`] — Connect/Disconnect toggle
//! - [`presence`] — optional awareness records

pub mod broadcast;
pub mod controller;
pub mod presence;
pub mod protocol;
pub mod provider;
pub mod server;

pub use broadcast::{BroadcastGroup, BroadcastStats, Frame};
pub use controller::{ConnectionLifecycle, ConnectionToggle, LabelWatch, ToggleLabel};
pub use presence::{AwarenessMessage, PeerColor, PresenceRoom, RemotePeer, TextRange};
pub use protocol::{MessageType, PeerInfo, ProtocolError, SyncMessage};
pub use provider::{
    ConnectionState, OfflineQueue, ProviderConfig, ProviderEvent, WebsocketProvider,
};
pub use server::{ServerConfig, ServerStats, SyncServer};
