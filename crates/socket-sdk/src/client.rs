//! Connection manager: owns the gateway socket, the handshake, the
//! heartbeat schedule, and the reconnect back-off.
//!
//! All session state sits behind one mutex.  Transport events arrive on a
//! channel and are applied by a single pump task through
//! [`Inner::handle_event`], so they serialize with calls made by the
//! application.  Listener callbacks run after the lock is released.

use std::sync::{Arc, Weak};
use std::time::Duration;

use moe_protocol::{Inbound, Notification, OutboundMessage, PlaybackInfo};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{handshake_token, AuthProvider};
use crate::builder::ConnectionManagerBuilder;
use crate::heartbeat::Heartbeat;
use crate::listener::SocketListener;
use crate::reconnect::ReconnectBackoff;
use crate::transport::{EventSink, Transport, TransportEvent, TransportHandle};
use crate::types::{ConnectionState, SessionSnapshot};

/// Self-healing connection to the gateway.
///
/// Create via [`ConnectionManagerBuilder`].  Dropping the manager closes
/// the socket and stops every background task it started.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

pub(crate) struct Inner {
    url: String,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    backoff: ReconnectBackoff,
    listener: RwLock<Option<Weak<dyn SocketListener>>>,
    session: Mutex<Session>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    shutdown: CancellationToken,
    /// Runtime captured at build time; every task is spawned here.
    runtime: Handle,
}

struct Session {
    state: ConnectionState,
    /// Bumped on every open; events stamped with an older value are stale.
    generation: u64,
    transport: Option<Box<dyn TransportHandle>>,
    retry_delay: Duration,
    /// Set for the whole of a reconnect attempt: the back-off wait plus
    /// the socket it opens, until that socket opens or dies.
    reconnecting: bool,
    pending_retry: Option<CancellationToken>,
    heartbeat_interval: Option<Duration>,
    heartbeat: Option<Heartbeat>,
    /// `update()` arrived while the socket was still opening.
    update_requested: bool,
}

/// What to tell the listener once the session lock is released.
enum Dispatch {
    Receive(PlaybackInfo),
    Notification(Notification),
    Failure,
}

impl ConnectionManager {
    /// Start a new builder.
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    pub(crate) fn new(builder: ConnectionManagerBuilder, runtime: Handle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(Inner {
            url: builder.url,
            transport: builder.transport,
            auth: builder.auth,
            backoff: builder.backoff,
            listener: RwLock::new(builder.listener),
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                generation: 0,
                transport: None,
                retry_delay: builder.backoff.reset(),
                reconnecting: false,
                pending_retry: None,
                heartbeat_interval: None,
                heartbeat: None,
                update_requested: false,
            }),
            events_tx,
            shutdown: shutdown.clone(),
            runtime,
        });

        let pump = inner
            .runtime
            .spawn(pump_events(Arc::downgrade(&inner), events_rx, shutdown));

        Self { inner, pump }
    }

    /// Open a fresh socket, tearing down the current one first.  Does not
    /// wait for the socket to open.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the socket, stop the heartbeat, and abandon any scheduled
    /// retry.  Safe to call when already disconnected.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Tear down and retry after the current back-off delay.  A no-op
    /// while a reconnect attempt is already in progress.
    pub fn reconnect(&self) {
        self.inner.reconnect();
    }

    /// Ask the gateway for the current track.  Connects instead when
    /// there is no socket.
    pub fn update(&self) {
        self.inner.update();
    }

    /// Replace the heartbeat schedule.  A zero interval just clears it.
    pub fn heartbeat(&self, interval: Duration) {
        let mut s = self.inner.session.lock();
        self.inner.heartbeat_locked(&mut s, interval);
    }

    pub fn clear_heartbeat(&self) {
        let mut s = self.inner.session.lock();
        Inner::clear_heartbeat_locked(&mut s);
    }

    /// Install the listener.  Only a weak reference is kept.
    pub fn set_listener<L: SocketListener>(&self, listener: &Arc<L>) {
        let weak = Arc::downgrade(listener) as Weak<dyn SocketListener>;
        *self.inner.listener.write() = Some(weak);
    }

    pub fn clear_listener(&self) {
        *self.inner.listener.write() = None;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let s = self.inner.session.lock();
        SessionSnapshot {
            state: s.state,
            retry_delay: s.retry_delay,
            reconnecting: s.reconnecting,
            generation: s.generation,
            has_transport: s.transport.is_some(),
            heartbeat_interval: s.heartbeat_interval,
            heartbeat_active: s.heartbeat.as_ref().is_some_and(Heartbeat::is_active),
            retry_pending: s.pending_retry.is_some(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.disconnect();
        self.pump.abort();
    }
}

/// Apply transport events in arrival order until the manager goes away.
async fn pump_events(
    weak: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    shutdown: CancellationToken,
) {
    loop {
        let (generation, event) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = events.recv() => match next {
                Some(e) => e,
                None => break,
            },
        };
        let Some(inner) = weak.upgrade() else { break };
        inner.handle_event(generation, event);
    }
    tracing::trace!("event pump exited");
}

impl Inner {
    // ── Operations ───────────────────────────────────────────────────

    fn connect(&self) {
        let mut s = self.session.lock();
        // An explicit connect supersedes a scheduled retry.  The guard
        // stays as it is: if a reconnect was in progress, this socket is
        // now that attempt.
        Self::cancel_retry_locked(&mut s);
        self.open_locked(&mut s);
    }

    fn disconnect(&self) {
        let mut s = self.session.lock();
        let was_active = s.transport.is_some() || s.pending_retry.is_some();
        Self::teardown_locked(&mut s);
        Self::cancel_retry_locked(&mut s);
        s.reconnecting = false;
        s.state = ConnectionState::Disconnected;
        if was_active {
            tracing::info!(url = %self.url, "disconnected from gateway");
        }
    }

    fn reconnect(self: &Arc<Self>) {
        let mut s = self.session.lock();
        self.reconnect_locked(&mut s);
    }

    fn update(&self) {
        let mut s = self.session.lock();
        if s.transport.is_none() {
            tracing::debug!("update requested with no socket, connecting");
            Self::cancel_retry_locked(&mut s);
            self.open_locked(&mut s);
        } else if s.state.is_open() {
            tracing::debug!("requesting update from gateway");
            self.send_locked(&s, &OutboundMessage::UpdateRequest);
        } else {
            tracing::debug!("socket still opening, update deferred until handshake");
            s.update_requested = true;
        }
    }

    // ── State transitions (lock held) ────────────────────────────────

    fn open_locked(&self, s: &mut Session) {
        if s.transport.is_some() {
            tracing::debug!(generation = s.generation, "tearing down previous socket");
            Self::teardown_locked(s);
        }
        s.generation += 1;
        tracing::info!(url = %self.url, generation = s.generation, "connecting to gateway");
        let sink = EventSink::new(s.generation, self.events_tx.clone(), self.runtime.clone());
        s.transport = Some(self.transport.open(&self.url, sink));
        s.state = ConnectionState::Connecting;
    }

    /// Drop the socket and heartbeat without touching the retry machinery.
    fn teardown_locked(s: &mut Session) {
        Self::clear_heartbeat_locked(s);
        if let Some(transport) = s.transport.take() {
            transport.cancel();
        }
        s.update_requested = false;
        s.state = ConnectionState::Disconnected;
    }

    fn cancel_retry_locked(s: &mut Session) {
        if let Some(token) = s.pending_retry.take() {
            tracing::debug!("cancelling scheduled reconnect");
            token.cancel();
        }
    }

    fn reconnect_locked(self: &Arc<Self>, s: &mut Session) {
        if s.reconnecting {
            tracing::debug!("reconnect already in progress");
            return;
        }

        Self::teardown_locked(s);
        Self::cancel_retry_locked(s);
        s.reconnecting = true;
        s.state = ConnectionState::Reconnecting;

        let delay = s.retry_delay;
        tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting to gateway");

        let token = CancellationToken::new();
        s.pending_retry = Some(token.clone());
        let weak = Arc::downgrade(self);

        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = weak.upgrade() else { return };
            let mut s = inner.session.lock();
            if token.is_cancelled() {
                return;
            }
            s.pending_retry = None;
            s.retry_delay = inner.backoff.next(s.retry_delay);
            inner.open_locked(&mut s);
        });
    }

    fn heartbeat_locked(self: &Arc<Self>, s: &mut Session, interval: Duration) {
        Self::clear_heartbeat_locked(s);
        if interval.is_zero() {
            s.heartbeat_interval = None;
            tracing::debug!("gateway requested no heartbeat");
            return;
        }
        s.heartbeat_interval = Some(interval);

        let weak = Arc::downgrade(self);
        s.heartbeat = Some(Heartbeat::start(&self.runtime, interval, move |token| {
            let Some(inner) = weak.upgrade() else {
                return false;
            };
            let s = inner.session.lock();
            // Re-checked under the lock: a teardown that won the race has
            // already cancelled this token.
            if token.is_cancelled() || !s.state.is_open() {
                return false;
            }
            tracing::debug!("sending heartbeat");
            inner.send_locked(&s, &OutboundMessage::Heartbeat)
        }));
        tracing::debug!(interval_ms = interval.as_millis() as u64, "heartbeat scheduled");
    }

    fn clear_heartbeat_locked(s: &mut Session) {
        if let Some(heartbeat) = s.heartbeat.take() {
            tracing::debug!(
                interval_ms = heartbeat.interval().as_millis() as u64,
                "cancelling heartbeat"
            );
            heartbeat.cancel();
        }
    }

    fn send_locked(&self, s: &Session, msg: &OutboundMessage) -> bool {
        let Some(transport) = &s.transport else {
            return false;
        };
        let sent = transport.send(&msg.encode());
        if !sent {
            tracing::warn!(op = msg.op(), "socket rejected outbound frame");
        }
        sent
    }

    // ── Transport events ─────────────────────────────────────────────

    pub(crate) fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        let dispatch = {
            let mut s = self.session.lock();
            if generation != s.generation || s.transport.is_none() {
                tracing::trace!(
                    generation,
                    current = s.generation,
                    "dropping event from stale socket"
                );
                return;
            }

            match event {
                TransportEvent::Opened => {
                    self.on_open_locked(&mut s);
                    None
                }
                TransportEvent::Message(text) => self.on_message_locked(&mut s, text),
                TransportEvent::Failed(error) => {
                    tracing::warn!(error = %error, "socket failure");
                    self.on_terminated_locked(&mut s);
                    None
                }
                TransportEvent::Closed { code, reason } => {
                    tracing::info!(code, reason = %reason, "socket closed");
                    self.on_terminated_locked(&mut s);
                    None
                }
            }
        };

        if let Some(dispatch) = dispatch {
            self.notify(dispatch);
        }
    }

    fn on_open_locked(&self, s: &mut Session) {
        tracing::info!(generation = s.generation, "socket opened, sending handshake");
        s.retry_delay = self.backoff.reset();
        s.reconnecting = false;
        s.state = ConnectionState::Handshaking;

        let auth = handshake_token(self.auth.as_ref());
        self.send_locked(s, &OutboundMessage::Handshake { auth });

        if std::mem::take(&mut s.update_requested) {
            self.send_locked(s, &OutboundMessage::UpdateRequest);
        }
    }

    fn on_terminated_locked(self: &Arc<Self>, s: &mut Session) {
        // This socket was the current reconnect attempt and it died before
        // opening: the attempt is over, start the next one.
        s.reconnecting = false;
        self.reconnect_locked(s);
    }

    fn on_message_locked(self: &Arc<Self>, s: &mut Session, text: Option<String>) -> Option<Dispatch> {
        let text = match text {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                tracing::warn!("received empty frame from gateway");
                return Some(Dispatch::Failure);
            }
        };
        tracing::trace!(text = %text, "received frame");

        match moe_protocol::decode(&text) {
            Ok(Inbound::Welcome { heartbeat_ms }) => {
                tracing::info!(heartbeat_ms, "handshake acknowledged");
                s.state = ConnectionState::Live;
                self.heartbeat_locked(s, Duration::from_millis(heartbeat_ms));
                None
            }
            Ok(Inbound::Update { tag, info }) => {
                tracing::debug!(
                    tag = tag.as_str(),
                    song_id = info.song_id,
                    listeners = info.listeners,
                    "received update"
                );
                Some(Dispatch::Receive(info))
            }
            Ok(Inbound::Notification(notification)) => Some(Dispatch::Notification(notification)),
            Ok(Inbound::IgnoredUpdate { tag }) => {
                tracing::trace!(tag = ?tag, "ignoring update");
                None
            }
            Ok(Inbound::HeartbeatAck) => {
                tracing::trace!("heartbeat acknowledged");
                None
            }
            Ok(Inbound::Unknown { op }) => {
                tracing::debug!(op, text = %text, "ignoring unrecognized frame");
                None
            }
            Err(e) if e.is_payload_error() => {
                tracing::warn!(error = %e, "invalid payload from gateway");
                Some(Dispatch::Failure)
            }
            Err(e) => {
                tracing::warn!(error = %e, text = %text, "failed to parse frame");
                None
            }
        }
    }

    fn notify(&self, dispatch: Dispatch) {
        let listener = self.listener.read().as_ref().and_then(Weak::upgrade);
        let Some(listener) = listener else {
            tracing::debug!("no listener installed, dropping event");
            return;
        };
        match dispatch {
            Dispatch::Receive(info) => listener.on_receive(info),
            Dispatch::Notification(notification) => listener.on_notification(notification),
            Dispatch::Failure => listener.on_failure(),
        }
    }
}
