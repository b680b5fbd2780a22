//! `moe-socket`: self-healing client for the LISTEN.moe gateway.
//!
//! The [`ConnectionManager`] keeps one WebSocket open to the gateway,
//! performs the handshake, sends heartbeats at the interval the gateway
//! asks for, and hands every accepted now-playing update to a
//! [`SocketListener`].  When the socket fails or closes it retries forever
//! with a doubling delay (250 ms → 4 s by default).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  open/send/cancel   ┌──────────────────┐
//! │  Connection  │ ──────────────────▶ │    Transport     │
//! │   Manager    │ ◀────────────────── │ (tokio-tungst.)  │
//! │              │   TransportEvent    └──────────────────┘
//! │  Session     │
//! │  Heartbeat   │  on_receive / on_failure
//! │  Backoff     │ ──────────────────▶  SocketListener (weak)
//! └──────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Open the socket
//! 2. On open: reset the back-off, send `{"op":0,"d":{"auth":…}}`
//! 3. On `op 0` ack: schedule `{"op":9}` every `heartbeat` ms
//! 4. On `op 1`: filter by tag, decode, notify the listener
//! 5. On failure or close: tear down, wait, retry

pub mod auth;
pub mod builder;
pub mod client;
pub mod heartbeat;
pub mod listener;
pub mod reconnect;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use auth::{AuthProvider, StaticToken};
pub use builder::ConnectionManagerBuilder;
pub use client::ConnectionManager;
pub use heartbeat::Heartbeat;
pub use listener::{ConflatedListener, SocketListener, SocketResult};
pub use reconnect::ReconnectBackoff;
pub use transport::{EventSink, Transport, TransportEvent, TransportHandle, WsTransport};
pub use types::{ConnectionState, SessionSnapshot, SocketSdkError};

// Re-export protocol types so consumers never need to import moe-protocol directly.
pub use moe_protocol::{BasicTrack, EventInfo, ExtendedInfo, Notification, PlaybackInfo, QueueInfo};
