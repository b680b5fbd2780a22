//! Builder pattern for constructing a [`ConnectionManager`].

use std::sync::{Arc, Weak};
use std::time::Duration;

use moe_domain::config::SocketConfig;

use crate::auth::{AuthProvider, StaticToken};
use crate::client::ConnectionManager;
use crate::listener::SocketListener;
use crate::reconnect::ReconnectBackoff;
use crate::transport::{Transport, WsTransport};
use crate::types::SocketSdkError;

/// Fluent builder for [`ConnectionManager`].
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use moe_socket::{ConflatedListener, ConnectionManagerBuilder, StaticToken};
/// # async fn demo() -> Result<(), moe_socket::SocketSdkError> {
/// let listener = Arc::new(ConflatedListener::new());
/// let manager = ConnectionManagerBuilder::new()
///     .url("wss://listen.moe/gateway_v2")
///     .auth(StaticToken::new("secret"))
///     .listener(&listener)
///     .build()?;
/// manager.connect();
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManagerBuilder {
    pub(crate) url: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) auth: Arc<dyn AuthProvider>,
    pub(crate) backoff: ReconnectBackoff,
    pub(crate) listener: Option<Weak<dyn SocketListener>>,
}

impl ConnectionManagerBuilder {
    pub fn new() -> Self {
        Self {
            url: SocketConfig::default().endpoint().to_string(),
            transport: Arc::new(WsTransport),
            auth: Arc::new(StaticToken::anonymous()),
            backoff: ReconnectBackoff::default(),
            listener: None,
        }
    }

    /// Seed URL and back-off bounds from a [`SocketConfig`].
    pub fn from_config(cfg: &SocketConfig) -> Self {
        Self::new()
            .url(cfg.endpoint())
            .backoff(ReconnectBackoff::from_config(cfg))
    }

    // ── Endpoint ─────────────────────────────────────────────────────

    /// Set the gateway WebSocket URL (e.g. `wss://listen.moe/gateway_v2`).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Replace the socket implementation (default: [`WsTransport`]).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    // ── Collaborators ────────────────────────────────────────────────

    pub fn auth<A: AuthProvider>(mut self, auth: A) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn auth_provider(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = auth;
        self
    }

    /// Install the listener.  Only a weak reference is kept; the caller
    /// owns the listener.
    pub fn listener<L: SocketListener>(mut self, listener: &Arc<L>) -> Self {
        let weak = Arc::downgrade(listener) as Weak<dyn SocketListener>;
        self.listener = Some(weak);
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    pub fn backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Shorthand for setting both back-off bounds.
    pub fn retry_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.backoff = ReconnectBackoff {
            min_delay: min,
            max_delay: max,
        };
        self
    }

    /// Build the [`ConnectionManager`].  Must be called from within a Tokio
    /// runtime; the manager captures it and spawns every later task (event
    /// pump, retries, heartbeat, sockets) there, so its methods work from
    /// any thread.  The manager starts `Disconnected`; call `connect()` to
    /// go online.
    pub fn build(self) -> Result<ConnectionManager, SocketSdkError> {
        if self.url.is_empty() {
            return Err(SocketSdkError::Config("url is required".into()));
        }
        if self.backoff.min_delay.is_zero() {
            return Err(SocketSdkError::Config(
                "minimum retry delay must be greater than 0".into(),
            ));
        }
        if self.backoff.max_delay < self.backoff.min_delay {
            return Err(SocketSdkError::Config(format!(
                "maximum retry delay ({:?}) is below the minimum ({:?})",
                self.backoff.max_delay, self.backoff.min_delay
            )));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            SocketSdkError::Config("ConnectionManager must be built inside a Tokio runtime".into())
        })?;

        Ok(ConnectionManager::new(self, runtime))
    }
}

impl Default for ConnectionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
