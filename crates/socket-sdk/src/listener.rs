//! Listener capability: how decoded updates leave the manager.

use moe_protocol::{Notification, PlaybackInfo};
use tokio::sync::watch;

/// Implement this to receive gateway updates.
///
/// The manager holds listeners weakly and never calls them while holding
/// its own lock, so a listener may call back into the manager (e.g.
/// `update()`) from inside a callback.
pub trait SocketListener: Send + Sync + 'static {
    /// One accepted update (`TRACK_UPDATE`, `TRACK_UPDATE_REQUEST` or
    /// `QUEUE_UPDATE`).
    fn on_receive(&self, info: PlaybackInfo);

    /// A frame arrived that carried nothing usable: an empty frame or a
    /// payload that failed validation.
    fn on_failure(&self);

    /// A `NOTIFICATION` update.
    fn on_notification(&self, _notification: Notification) {}
}

/// The latest thing a [`ConflatedListener`] saw.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketResult {
    Response(PlaybackInfo),
    Error,
}

/// Listener that keeps only the most recent result in a `watch` channel.
///
/// Slow consumers skip intermediate updates and always observe the newest
/// one, which is what a now-playing display wants.
pub struct ConflatedListener {
    tx: watch::Sender<Option<SocketResult>>,
}

impl Default for ConflatedListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ConflatedListener {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SocketResult>> {
        self.tx.subscribe()
    }

    /// Most recent result, if any arrived yet.
    pub fn latest(&self) -> Option<SocketResult> {
        self.tx.borrow().clone()
    }
}

impl SocketListener for ConflatedListener {
    fn on_receive(&self, info: PlaybackInfo) {
        self.tx.send_replace(Some(SocketResult::Response(info)));
    }

    fn on_failure(&self) {
        self.tx.send_replace(Some(SocketResult::Error));
    }

    fn on_notification(&self, notification: Notification) {
        tracing::info!(notification = ?notification, "gateway notification");
    }
}
