//! Transport seam between the connection manager and the network.
//!
//! A [`Transport`] opens sockets; each open returns a [`TransportHandle`]
//! for sending and cancelling, and reports what happens on the socket as
//! [`TransportEvent`]s through the [`EventSink`] it was given.  The sink
//! stamps every event with the generation of the handle that produced it,
//! which is how the manager tells current events from leftovers of a
//! socket it already tore down.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Close code reported when the stream ends without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// How long a cancelled socket waits for its close frame to flush.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a transport reports about its socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is open and ready to send.
    Opened,
    /// A frame arrived.  `None` means the frame carried no usable text.
    Message(Option<String>),
    /// Connect or I/O error.  No further events follow.
    Failed(String),
    /// The peer closed the socket.  No further events follow.
    Closed { code: u16, reason: String },
}

/// Generation-stamped event channel handed to [`Transport::open`].
///
/// Also carries the manager's runtime, so transports can spawn their I/O
/// even when `open` is called from a thread outside it.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    runtime: Handle,
}

impl EventSink {
    pub(crate) fn new(
        generation: u64,
        tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
        runtime: Handle,
    ) -> Self {
        Self {
            generation,
            tx,
            runtime,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Runtime the manager was built on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Deliver an event.  Returns `false` once the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// A live (or opening) socket owned by the manager.
pub trait TransportHandle: Send + Sync {
    /// Queue a text frame.  Returns `false` if the socket can no longer
    /// accept frames.
    fn send(&self, text: &str) -> bool;

    /// Tear the socket down.  Idempotent; no events are emitted afterwards.
    fn cancel(&self);
}

/// Opens sockets.
pub trait Transport: Send + Sync + 'static {
    /// Start opening a socket to `url`.  Returns immediately; the outcome
    /// arrives on `events`.
    fn open(&self, url: &str, events: EventSink) -> Box<dyn TransportHandle>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tokio-tungstenite transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// [`Transport`] over `tokio-tungstenite`.  Socket tasks run on the
/// runtime carried by the [`EventSink`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: &str, events: EventSink) -> Box<dyn TransportHandle> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();

        let runtime = events.runtime().clone();
        runtime.spawn(run_socket(
            url.to_string(),
            outbound_rx,
            events,
            cancel.clone(),
        ));

        Box::new(WsHandle {
            outbound: outbound_tx,
            cancel,
        })
    }
}

struct WsHandle {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl TransportHandle for WsHandle {
    fn send(&self, text: &str) -> bool {
        !self.cancel.is_cancelled() && self.outbound.send(text.to_string()).is_ok()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WsHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Single socket lifecycle: connect, then pump frames both ways until the
/// socket ends or the handle is cancelled.
async fn run_socket(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: EventSink,
    cancel: CancellationToken,
) {
    tracing::debug!(url = %url, generation = events.generation(), "opening socket");

    let connect = tokio::select! {
        r = tokio_tungstenite::connect_async(url.as_str()) => r,
        _ = cancel.cancelled() => return,
    };

    let ws = match connect {
        Ok((ws, _response)) => ws,
        Err(e) => {
            if !cancel.is_cancelled() {
                events.emit(TransportEvent::Failed(e.to_string()));
            }
            return;
        }
    };

    if cancel.is_cancelled() {
        return;
    }
    events.emit(TransportEvent::Opened);

    let (mut sink, mut stream) = ws.split();

    let terminal = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if !close_sink(&mut sink).await {
                    tracing::debug!(generation = events.generation(), "close handshake timed out");
                }
                return;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break TransportEvent::Failed(e.to_string());
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(Some(text)));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    events.emit(TransportEvent::Message(String::from_utf8(bytes).ok()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((CLOSE_ABNORMAL, String::new()));
                    break TransportEvent::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break TransportEvent::Failed(e.to_string()),
                None => {
                    break TransportEvent::Closed {
                        code: CLOSE_ABNORMAL,
                        reason: String::new(),
                    }
                }
            },
        }
    };

    if !cancel.is_cancelled() {
        events.emit(terminal);
    }
}

/// Flush a close frame, giving up after [`CLOSE_TIMEOUT`] so a peer that
/// stopped reading cannot keep a cancelled socket alive.
async fn close_sink<S>(sink: &mut S) -> bool
where
    S: Sink<Message> + Unpin,
{
    matches!(
        tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await,
        Ok(Ok(()))
    )
}
