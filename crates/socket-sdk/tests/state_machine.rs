//! Drives a [`ConnectionManager`] through scripted transport events using
//! an in-memory transport and paused Tokio time, so every retry and
//! heartbeat deadline can be checked to the millisecond.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use moe_socket::{
    ConnectionManager, ConnectionManagerBuilder, ConnectionState, EventSink, Notification,
    PlaybackInfo, SocketListener, StaticToken, Transport, TransportEvent, TransportHandle,
};
use parking_lot::Mutex;

// ── In-memory transport ─────────────────────────────────────────────────

struct MockSocket {
    url: String,
    sink: EventSink,
    sent: Mutex<Vec<String>>,
    cancelled: AtomicBool,
}

impl MockSocket {
    fn emit(&self, event: TransportEvent) {
        assert!(self.sink.emit(event), "manager dropped its event channel");
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    fn heartbeats(&self) -> usize {
        self.sent().iter().filter(|f| *f == r#"{"op":9}"#).count()
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct MockHandle(Arc<MockSocket>);

impl TransportHandle for MockHandle {
    fn send(&self, text: &str) -> bool {
        if self.0.is_cancelled() {
            return false;
        }
        self.0.sent.lock().push(text.to_string());
        true
    }

    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MockTransport {
    sockets: Mutex<Vec<Arc<MockSocket>>>,
}

impl MockTransport {
    fn count(&self) -> usize {
        self.sockets.lock().len()
    }

    fn socket(&self, idx: usize) -> Arc<MockSocket> {
        self.sockets.lock()[idx].clone()
    }

    fn latest(&self) -> Arc<MockSocket> {
        self.sockets.lock().last().cloned().expect("no socket opened")
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str, events: EventSink) -> Box<dyn TransportHandle> {
        let socket = Arc::new(MockSocket {
            url: url.to_string(),
            sink: events,
            sent: Mutex::new(Vec::new()),
            cancelled: AtomicBool::new(false),
        });
        self.sockets.lock().push(socket.clone());
        Box::new(MockHandle(socket))
    }
}

// ── Recording listener ──────────────────────────────────────────────────

#[derive(Default)]
struct RecordingListener {
    received: Mutex<Vec<PlaybackInfo>>,
    notifications: Mutex<Vec<Notification>>,
    failures: AtomicUsize,
}

impl SocketListener for RecordingListener {
    fn on_receive(&self, info: PlaybackInfo) {
        self.received.lock().push(info);
    }

    fn on_failure(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_notification(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

impl RecordingListener {
    fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

// ── Harness ─────────────────────────────────────────────────────────────

const URL: &str = "ws://gateway.test/gateway_v2";
const HANDSHAKE: &str = r#"{"op":0,"d":{"auth":"Bearer tok"}}"#;
const WELCOME: &str = r#"{"op":0,"d":{"heartbeat":15000}}"#;

struct Harness {
    transport: Arc<MockTransport>,
    listener: Arc<RecordingListener>,
    manager: ConnectionManager,
}

fn harness() -> Harness {
    let transport = Arc::new(MockTransport::default());
    let listener = Arc::new(RecordingListener::default());
    let manager = ConnectionManagerBuilder::new()
        .url(URL)
        .transport(transport.clone())
        .auth(StaticToken::new("tok"))
        .listener(&listener)
        .build()
        .unwrap();
    Harness {
        transport,
        listener,
        manager,
    }
}

/// Let the event pump and any woken timers run.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    settle().await;
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn text(s: &str) -> TransportEvent {
    TransportEvent::Message(Some(s.to_string()))
}

fn track_update(tag: &str) -> String {
    serde_json::json!({
        "op": 1,
        "t": tag,
        "d": {
            "song_id": 42,
            "artist_name": "ClariS",
            "song_name": "irony",
            "anime_name": "Oreimo",
            "requested_by": "kirino",
            "listeners": 1337,
            "last": { "artist_name": "LiSA", "song_name": "Rising Hope" },
            "second_last": { "artist_name": "Aimer", "song_name": "Brave Shine" },
            "extended": { "favorite": true }
        }
    })
    .to_string()
}

/// Connect and complete the handshake on the first socket.
async fn go_live(h: &Harness) {
    h.manager.connect();
    let socket = h.transport.latest();
    socket.emit(TransportEvent::Opened);
    settle().await;
    socket.emit(text(WELCOME));
    settle().await;
    assert_eq!(h.manager.state(), ConnectionState::Live);
}

// ── Connect / handshake ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn handshake_is_first_frame_after_open() {
    let h = harness();
    h.manager.connect();

    assert_eq!(h.transport.count(), 1);
    let socket = h.transport.latest();
    assert_eq!(socket.url, URL);
    assert!(socket.sent().is_empty());
    assert_eq!(h.manager.state(), ConnectionState::Connecting);

    socket.emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(socket.sent(), vec![HANDSHAKE]);
    assert_eq!(h.manager.state(), ConnectionState::Handshaking);

    socket.emit(text(WELCOME));
    settle().await;
    let snap = h.manager.snapshot();
    assert_eq!(snap.state, ConnectionState::Live);
    assert_eq!(snap.heartbeat_interval, Some(ms(15_000)));
    assert!(snap.heartbeat_active);
}

#[tokio::test(start_paused = true)]
async fn anonymous_handshake_sends_empty_auth() {
    let transport = Arc::new(MockTransport::default());
    let manager = ConnectionManagerBuilder::new()
        .url(URL)
        .transport(transport.clone())
        .build()
        .unwrap();

    manager.connect();
    transport.latest().emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(transport.latest().sent(), vec![r#"{"op":0,"d":{"auth":""}}"#]);
}

#[tokio::test(start_paused = true)]
async fn connect_tears_down_previous_socket_quietly() {
    let h = harness();
    go_live(&h).await;

    h.manager.connect();
    assert_eq!(h.transport.count(), 2);
    let old = h.transport.socket(0);
    assert!(old.is_cancelled());
    assert!(!h.manager.snapshot().heartbeat_active);

    // Late events from the torn-down socket must not drive a reconnect.
    old.emit(TransportEvent::Failed("connection reset".into()));
    old.emit(TransportEvent::Closed {
        code: 1006,
        reason: String::new(),
    });
    settle().await;

    let snap = h.manager.snapshot();
    assert_eq!(snap.state, ConnectionState::Connecting);
    assert!(!snap.reconnecting);
    assert!(!snap.retry_pending);
    sleep_ms(10_000).await;
    assert_eq!(h.transport.count(), 2);
}

// ── Heartbeat ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_every_interval_until_disconnect() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    sleep_ms(14_999).await;
    assert_eq!(socket.heartbeats(), 0);

    sleep_ms(2).await;
    assert_eq!(socket.heartbeats(), 1);
    assert_eq!(socket.sent().last().unwrap(), r#"{"op":9}"#);

    sleep_ms(15_000).await;
    assert_eq!(socket.heartbeats(), 2);

    h.manager.disconnect();
    sleep_ms(60_000).await;
    assert_eq!(socket.heartbeats(), 2);
    assert!(!h.manager.snapshot().heartbeat_active);
}

#[tokio::test(start_paused = true)]
async fn new_heartbeat_replaces_old_schedule() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    socket.emit(text(r#"{"op":0,"d":{"heartbeat":1000}}"#));
    settle().await;
    assert_eq!(h.manager.snapshot().heartbeat_interval, Some(ms(1000)));

    // Only the 1 s schedule is live: 15 beats in 15.5 s, none extra from
    // the replaced 15 s schedule.
    sleep_ms(15_500).await;
    assert_eq!(socket.heartbeats(), 15);
}

#[tokio::test(start_paused = true)]
async fn clear_heartbeat_is_idempotent() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    h.manager.clear_heartbeat();
    h.manager.clear_heartbeat();
    sleep_ms(60_000).await;
    assert_eq!(socket.heartbeats(), 0);
    assert_eq!(h.manager.state(), ConnectionState::Live);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_ack_is_a_no_op() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();
    let before = socket.sent();

    socket.emit(text(r#"{"op":10}"#));
    settle().await;
    assert_eq!(socket.sent(), before);
    assert_eq!(h.listener.failures(), 0);
    assert!(h.listener.received.lock().is_empty());
}

// ── update() ────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn update_when_disconnected_connects() {
    let h = harness();
    h.manager.update();
    assert_eq!(h.transport.count(), 1);
    assert!(h.transport.latest().sent().is_empty());
    assert_eq!(h.manager.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn update_when_connected_sends_update_request() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    h.manager.update();
    assert_eq!(socket.sent(), vec![HANDSHAKE, r#"{"op":2}"#]);
    assert_eq!(h.transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn update_while_opening_waits_for_handshake() {
    let h = harness();
    h.manager.connect();
    h.manager.update();
    let socket = h.transport.latest();
    assert!(socket.sent().is_empty());
    assert_eq!(h.transport.count(), 1);

    socket.emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(socket.sent(), vec![HANDSHAKE, r#"{"op":2}"#]);
}

// ── Reconnect / back-off ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn backoff_doubles_to_cap_and_resets_on_open() {
    let h = harness();
    go_live(&h).await;

    for delay in [250, 500, 1000, 2000, 4000, 4000] {
        let before = h.transport.count();
        h.transport.latest().emit(TransportEvent::Failed("unreachable".into()));
        settle().await;

        let snap = h.manager.snapshot();
        assert!(snap.reconnecting);
        assert_eq!(snap.state, ConnectionState::Reconnecting);
        assert_eq!(snap.retry_delay, ms(delay));
        assert!(!snap.has_transport);

        sleep_ms(delay - 1).await;
        assert_eq!(h.transport.count(), before, "retried before {delay} ms elapsed");

        sleep_ms(2).await;
        assert_eq!(h.transport.count(), before + 1, "no retry after {delay} ms");
        assert!(h.manager.snapshot().reconnecting);
    }

    assert_eq!(h.manager.snapshot().retry_delay, ms(4000));

    h.transport.latest().emit(TransportEvent::Opened);
    settle().await;
    let snap = h.manager.snapshot();
    assert_eq!(snap.retry_delay, ms(250));
    assert!(!snap.reconnecting);
    assert_eq!(snap.state, ConnectionState::Handshaking);
}

#[tokio::test(start_paused = true)]
async fn close_takes_the_same_path_as_failure() {
    let h = harness();
    go_live(&h).await;
    let first = h.transport.latest();

    first.emit(TransportEvent::Closed {
        code: 1000,
        reason: "bye".into(),
    });
    settle().await;
    assert!(first.is_cancelled());
    assert!(h.manager.snapshot().reconnecting);

    sleep_ms(250).await;
    assert_eq!(h.transport.count(), 2);

    let second = h.transport.latest();
    second.emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(second.sent(), vec![HANDSHAKE]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_while_pending_is_a_no_op() {
    let h = harness();
    go_live(&h).await;

    h.manager.reconnect();
    let first = h.manager.snapshot();
    assert!(first.reconnecting);
    assert_eq!(first.retry_delay, ms(250));

    h.manager.reconnect();
    h.manager.reconnect();
    assert_eq!(h.manager.snapshot(), first);

    sleep_ms(10_000).await;
    assert_eq!(h.transport.count(), 2);
    assert_eq!(h.manager.snapshot().retry_delay, ms(500));
}

#[tokio::test(start_paused = true)]
async fn reconnect_during_attempt_is_a_no_op() {
    let h = harness();
    go_live(&h).await;

    h.manager.reconnect();
    sleep_ms(250).await;
    assert_eq!(h.transport.count(), 2);

    // The attempt's socket is still opening.
    h.manager.reconnect();
    settle().await;
    assert!(!h.transport.latest().is_cancelled());
    sleep_ms(10_000).await;
    assert_eq!(h.transport.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn disconnect_abandons_scheduled_retry() {
    let h = harness();
    go_live(&h).await;

    h.transport.latest().emit(TransportEvent::Failed("boom".into()));
    settle().await;
    assert!(h.manager.snapshot().retry_pending);

    h.manager.disconnect();
    sleep_ms(10_000).await;
    assert_eq!(h.transport.count(), 1);

    let snap = h.manager.snapshot();
    assert_eq!(snap.state, ConnectionState::Disconnected);
    assert!(!snap.reconnecting);
    assert!(!snap.retry_pending);
}

#[tokio::test(start_paused = true)]
async fn disconnect_twice_matches_once() {
    let h = harness();
    go_live(&h).await;

    h.manager.disconnect();
    let once = h.manager.snapshot();
    h.manager.disconnect();
    assert_eq!(h.manager.snapshot(), once);

    assert_eq!(once.state, ConnectionState::Disconnected);
    assert!(!once.has_transport);
    assert!(h.transport.socket(0).is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn disconnect_on_fresh_manager_is_harmless() {
    let h = harness();
    h.manager.disconnect();
    h.manager.clear_heartbeat();
    assert_eq!(h.manager.state(), ConnectionState::Disconnected);
    assert_eq!(h.transport.count(), 0);
}

// ── Message dispatch ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn track_update_reaches_listener_once() {
    let h = harness();
    go_live(&h).await;

    h.transport.latest().emit(text(&track_update("TRACK_UPDATE")));
    settle().await;

    let received = h.listener.received.lock().clone();
    assert_eq!(received.len(), 1);
    let info = &received[0];
    assert_eq!(info.song_id, 42);
    assert_eq!(info.artist_name(), "ClariS");
    assert_eq!(info.song_name(), "irony");
    assert_eq!(info.anime_name, "Oreimo");
    assert_eq!(info.requested_by, "kirino");
    assert_eq!(info.listeners, 1337);
    assert_eq!(info.last.as_ref().unwrap().to_string(), "LiSA - Rising Hope");
    assert_eq!(info.second_last.as_ref().unwrap().song_name, "Brave Shine");
    assert!(info.extended.as_ref().unwrap().favorite);
}

#[tokio::test(start_paused = true)]
async fn queue_and_requested_updates_are_accepted() {
    let h = harness();
    go_live(&h).await;

    h.transport.latest().emit(text(&track_update("TRACK_UPDATE_REQUEST")));
    h.transport.latest().emit(text(&track_update("QUEUE_UPDATE")));
    settle().await;
    assert_eq!(h.listener.received.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unknown_tag_reaches_nobody() {
    let h = harness();
    go_live(&h).await;

    h.transport.latest().emit(text(&track_update("UNKNOWN_TAG")));
    settle().await;
    assert!(h.listener.received.lock().is_empty());
    assert_eq!(h.listener.failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_frame_reports_failure_without_teardown() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    socket.emit(TransportEvent::Message(None));
    settle().await;
    assert_eq!(h.listener.failures(), 1);

    socket.emit(text(""));
    settle().await;
    assert_eq!(h.listener.failures(), 2);

    assert!(!socket.is_cancelled());
    assert_eq!(h.manager.state(), ConnectionState::Live);
    assert_eq!(h.transport.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_json_is_logged_not_reported() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    socket.emit(text("{definitely not json"));
    settle().await;
    assert_eq!(h.listener.failures(), 0);
    assert!(!socket.is_cancelled());
    assert_eq!(h.manager.state(), ConnectionState::Live);
}

#[tokio::test(start_paused = true)]
async fn invalid_update_payload_reports_failure() {
    let h = harness();
    go_live(&h).await;

    h.transport
        .latest()
        .emit(text(r#"{"op":1,"t":"TRACK_UPDATE","d":{"song_name":"x"}}"#));
    settle().await;
    assert_eq!(h.listener.failures(), 1);
    assert!(h.listener.received.lock().is_empty());
    assert_eq!(h.manager.state(), ConnectionState::Live);
}

#[tokio::test(start_paused = true)]
async fn unknown_op_is_ignored() {
    let h = harness();
    go_live(&h).await;

    h.transport.latest().emit(text(r#"{"op":77,"d":{}}"#));
    settle().await;
    assert_eq!(h.listener.failures(), 0);
    assert_eq!(h.manager.state(), ConnectionState::Live);
}

#[tokio::test(start_paused = true)]
async fn notification_goes_to_on_notification() {
    let h = harness();
    go_live(&h).await;

    h.transport.latest().emit(text(
        r#"{"op":1,"t":"NOTIFICATION","d":{"type":"EVENT","event":{"name":"Live DJ"}}}"#,
    ));
    settle().await;
    assert!(h.listener.received.lock().is_empty());
    let notifications = h.listener.notifications.lock().clone();
    assert_eq!(notifications.len(), 1);
    assert!(matches!(&notifications[0], Notification::Event(e) if e.name == "Live DJ"));
}

#[tokio::test(start_paused = true)]
async fn missing_listener_drops_events() {
    let h = harness();
    go_live(&h).await;
    h.manager.clear_listener();

    h.transport.latest().emit(text(&track_update("TRACK_UPDATE")));
    h.transport.latest().emit(TransportEvent::Message(None));
    settle().await;
    assert!(h.listener.received.lock().is_empty());
    assert_eq!(h.listener.failures(), 0);
    assert_eq!(h.manager.state(), ConnectionState::Live);
}

#[tokio::test(start_paused = true)]
async fn listener_is_held_weakly() {
    let transport = Arc::new(MockTransport::default());
    let listener = Arc::new(RecordingListener::default());
    let manager = ConnectionManagerBuilder::new()
        .url(URL)
        .transport(transport.clone())
        .build()
        .unwrap();
    manager.set_listener(&listener);
    assert_eq!(Arc::strong_count(&listener), 1);

    drop(listener);
    manager.connect();
    let socket = transport.latest();
    socket.emit(TransportEvent::Opened);
    socket.emit(text(&track_update("TRACK_UPDATE")));
    settle().await;
    assert_eq!(manager.state(), ConnectionState::Handshaking);
}

#[tokio::test(start_paused = true)]
async fn dropping_manager_cancels_everything() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();
    let transport = h.transport.clone();

    drop(h.manager);
    settle().await;
    assert!(socket.is_cancelled());

    sleep_ms(60_000).await;
    assert_eq!(socket.heartbeats(), 0);
    assert_eq!(transport.count(), 1);
}

// ── Calls from outside the runtime ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn reconnect_from_plain_thread_schedules_retry() {
    let h = harness();
    go_live(&h).await;

    std::thread::scope(|scope| {
        scope.spawn(|| h.manager.reconnect());
    });
    let snap = h.manager.snapshot();
    assert!(snap.reconnecting);
    assert!(snap.retry_pending);

    sleep_ms(250).await;
    assert_eq!(h.transport.count(), 2);

    h.transport.latest().emit(TransportEvent::Opened);
    settle().await;
    assert_eq!(h.transport.latest().sent(), vec![HANDSHAKE]);
    assert!(!h.manager.snapshot().reconnecting);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_from_plain_thread_runs_on_manager_runtime() {
    let h = harness();
    go_live(&h).await;
    let socket = h.transport.latest();

    std::thread::scope(|scope| {
        scope.spawn(|| h.manager.heartbeat(ms(1000)));
    });
    assert!(h.manager.snapshot().heartbeat_active);

    sleep_ms(3500).await;
    assert_eq!(socket.heartbeats(), 3);
}

#[tokio::test(start_paused = true)]
async fn failure_after_plain_thread_connect_still_retries() {
    let h = harness();
    std::thread::scope(|scope| {
        scope.spawn(|| h.manager.connect());
    });
    assert_eq!(h.transport.count(), 1);

    h.transport.latest().emit(TransportEvent::Failed("refused".into()));
    settle().await;
    sleep_ms(250).await;
    assert_eq!(h.transport.count(), 2);
}

// ── Re-entrant listener ─────────────────────────────────────────────────

/// Asks for a fresh update from inside its own callback.
#[derive(Default)]
struct RequeryingListener {
    manager: Mutex<Weak<ConnectionManager>>,
    received: AtomicUsize,
}

impl SocketListener for RequeryingListener {
    fn on_receive(&self, _info: PlaybackInfo) {
        self.received.fetch_add(1, Ordering::SeqCst);
        if let Some(manager) = self.manager.lock().upgrade() {
            manager.update();
        }
    }

    fn on_failure(&self) {}
}

#[tokio::test(start_paused = true)]
async fn listener_may_call_back_into_manager() {
    let transport = Arc::new(MockTransport::default());
    let listener = Arc::new(RequeryingListener::default());
    let manager = Arc::new(
        ConnectionManagerBuilder::new()
            .url(URL)
            .transport(transport.clone())
            .auth(StaticToken::new("tok"))
            .listener(&listener)
            .build()
            .unwrap(),
    );
    *listener.manager.lock() = Arc::downgrade(&manager);

    manager.connect();
    let socket = transport.latest();
    socket.emit(TransportEvent::Opened);
    socket.emit(text(WELCOME));
    socket.emit(text(&track_update("TRACK_UPDATE")));
    settle().await;

    assert_eq!(listener.received.load(Ordering::SeqCst), 1);
    assert_eq!(socket.sent(), vec![HANDSHAKE, r#"{"op":2}"#]);
    assert_eq!(manager.state(), ConnectionState::Live);
}
