//! Gateway wire protocol: outbound frames, the inbound envelope, and the
//! payload shapes of each opcode.
//!
//! Every frame is a JSON text message of the form
//! `{"op": <int>, "t": <string?>, "d": <object?>}`.
//!
//! | op | direction | meaning                    |
//! |----|-----------|----------------------------|
//! | 0  | both      | handshake / handshake ack  |
//! | 1  | inbound   | update (`t` selects kind)  |
//! | 2  | outbound  | request a fresh update     |
//! | 9  | outbound  | heartbeat                  |
//! | 10 | inbound   | heartbeat ack              |

mod models;

pub use models::{BasicTrack, EventInfo, ExtendedInfo, Notification, PlaybackInfo, QueueInfo};

use serde::Deserialize;

use models::{NotificationPayload, WelcomePayload};

pub const OP_HANDSHAKE: i64 = 0;
pub const OP_UPDATE: i64 = 1;
pub const OP_UPDATE_REQUEST: i64 = 2;
pub const OP_HEARTBEAT: i64 = 9;
pub const OP_HEARTBEAT_ACK: i64 = 10;

pub const TRACK_UPDATE: &str = "TRACK_UPDATE";
pub const TRACK_UPDATE_REQUEST: &str = "TRACK_UPDATE_REQUEST";
pub const QUEUE_UPDATE: &str = "QUEUE_UPDATE";
pub const NOTIFICATION: &str = "NOTIFICATION";

const NOTIFICATION_EVENT: &str = "EVENT";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// The text is not a JSON envelope at all.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// A recognised op arrived without its `d` payload.
    #[error("op {op}: missing payload")]
    MissingPayload { op: i64 },

    /// A recognised op arrived with a payload of the wrong shape.
    #[error("op {op}: invalid payload: {source}")]
    Payload {
        op: i64,
        #[source]
        source: serde_json::Error,
    },
}

impl CodecError {
    /// Payload errors are reported to the listener; envelope errors are
    /// only logged.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            CodecError::MissingPayload { .. } | CodecError::Payload { .. }
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client → gateway frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// First frame on every connection.  `auth` is the prefixed bearer
    /// token, or empty for anonymous sessions.
    Handshake { auth: String },
    /// Ask the gateway to push the current track.
    UpdateRequest,
    /// Keep-alive.
    Heartbeat,
}

impl OutboundMessage {
    pub fn op(&self) -> i64 {
        match self {
            OutboundMessage::Handshake { .. } => OP_HANDSHAKE,
            OutboundMessage::UpdateRequest => OP_UPDATE_REQUEST,
            OutboundMessage::Heartbeat => OP_HEARTBEAT,
        }
    }

    /// The JSON text frame sent on the wire.  Keys are written in wire
    /// order (`op` first); the token goes through `serde_json` escaping.
    pub fn encode(&self) -> String {
        match self {
            OutboundMessage::Handshake { auth } => {
                let auth = serde_json::Value::String(auth.clone());
                format!(r#"{{"op":{},"d":{{"auth":{auth}}}}}"#, self.op())
            }
            _ => format!(r#"{{"op":{}}}"#, self.op()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw inbound frame before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub op: i64,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Option<serde_json::Value>,
}

impl Envelope {
    fn payload<T: serde::de::DeserializeOwned>(self) -> Result<T, CodecError> {
        let op = self.op;
        let d = self.d.ok_or(CodecError::MissingPayload { op })?;
        serde_json::from_value(d).map_err(|source| CodecError::Payload { op, source })
    }
}

/// Update subtypes the client hands to its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTag {
    TrackUpdate,
    TrackUpdateRequest,
    QueueUpdate,
}

impl UpdateTag {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            TRACK_UPDATE => Some(UpdateTag::TrackUpdate),
            TRACK_UPDATE_REQUEST => Some(UpdateTag::TrackUpdateRequest),
            QUEUE_UPDATE => Some(UpdateTag::QueueUpdate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateTag::TrackUpdate => TRACK_UPDATE,
            UpdateTag::TrackUpdateRequest => TRACK_UPDATE_REQUEST,
            UpdateTag::QueueUpdate => QUEUE_UPDATE,
        }
    }
}

/// A decoded gateway → client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `op = 0`: handshake accepted.  `heartbeat_ms == 0` means the
    /// gateway does not want heartbeats.
    Welcome { heartbeat_ms: u64 },
    /// `op = 1` with an accepted tag.
    Update { tag: UpdateTag, info: PlaybackInfo },
    /// `op = 1, t = NOTIFICATION`.
    Notification(Notification),
    /// `op = 1` with a tag this client filters out.
    IgnoredUpdate { tag: Option<String> },
    /// `op = 10`.
    HeartbeatAck,
    /// Any other opcode.
    Unknown { op: i64 },
}

/// Decode one inbound text frame.
///
/// The update tag is checked before the payload, so an update with a
/// filtered tag is ignored even when its payload would not decode.
pub fn decode(text: &str) -> Result<Inbound, CodecError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(CodecError::Envelope)?;

    match envelope.op {
        OP_HANDSHAKE => {
            let welcome: WelcomePayload = envelope.payload()?;
            Ok(Inbound::Welcome {
                heartbeat_ms: welcome.heartbeat,
            })
        }
        OP_UPDATE => {
            let tag = envelope.t.clone();
            match tag.as_deref() {
                Some(NOTIFICATION) => decode_notification(envelope).map(Inbound::Notification),
                Some(t) => match UpdateTag::parse(t) {
                    Some(tag) => Ok(Inbound::Update {
                        tag,
                        info: envelope.payload()?,
                    }),
                    None => Ok(Inbound::IgnoredUpdate { tag }),
                },
                None => Ok(Inbound::IgnoredUpdate { tag: None }),
            }
        }
        OP_HEARTBEAT_ACK => Ok(Inbound::HeartbeatAck),
        op => Ok(Inbound::Unknown { op }),
    }
}

fn decode_notification(envelope: Envelope) -> Result<Notification, CodecError> {
    let op = envelope.op;
    let payload: NotificationPayload = envelope.payload()?;
    if payload.kind != NOTIFICATION_EVENT {
        return Ok(Notification::Other(payload.kind));
    }
    match payload.event {
        Some(event) => Ok(Notification::Event(event)),
        None => Err(CodecError::Payload {
            op,
            source: serde::de::Error::missing_field("event"),
        }),
    }
}
