//! Core types: connection state, diagnostics snapshot, and errors.

use std::fmt;
use std::time::Duration;

/// Where the manager is in its connect/handshake/retry cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no retry scheduled.
    Disconnected,
    /// Socket requested, not yet open.
    Connecting,
    /// Socket open, handshake sent, waiting for the ack.
    Handshaking,
    /// Handshake acknowledged.
    Live,
    /// Waiting out the back-off delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Whether frames can be sent right now.
    pub fn is_open(self) -> bool {
        matches!(self, ConnectionState::Handshaking | ConnectionState::Live)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Live => "live",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Read-only view of the session, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    /// Delay the next reconnect attempt will wait.
    pub retry_delay: Duration,
    pub reconnecting: bool,
    /// Generation of the current (or last) transport handle.
    pub generation: u64,
    pub has_transport: bool,
    /// Interval requested by the gateway in its handshake ack.
    pub heartbeat_interval: Option<Duration>,
    pub heartbeat_active: bool,
    pub retry_pending: bool,
}

/// Top-level SDK error.
///
/// The connection state machine itself never fails; this only comes from
/// building a manager.
#[derive(thiserror::Error, Debug)]
pub enum SocketSdkError {
    #[error("config: {0}")]
    Config(String),
}
