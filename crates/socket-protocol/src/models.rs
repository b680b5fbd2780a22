//! Payload shapes carried by `op = 1` frames.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An (artist, song) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicTrack {
    pub artist_name: String,
    pub song_name: String,
}

impl BasicTrack {
    pub fn new(artist_name: impl Into<String>, song_name: impl Into<String>) -> Self {
        Self {
            artist_name: artist_name.into(),
            song_name: song_name.into(),
        }
    }
}

impl fmt::Display for BasicTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist_name, self.song_name)
    }
}

/// Now-playing snapshot delivered with every accepted update.
///
/// `song_id`, `artist_name`, `song_name` and `listeners` are required;
/// a frame missing any of them is a payload error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackInfo {
    #[serde(flatten)]
    pub track: BasicTrack,
    pub song_id: u64,
    #[serde(default)]
    pub anime_name: String,
    #[serde(default)]
    pub requested_by: String,
    pub listeners: u32,
    #[serde(default)]
    pub last: Option<BasicTrack>,
    #[serde(default)]
    pub second_last: Option<BasicTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<ExtendedInfo>,
}

impl PlaybackInfo {
    pub fn artist_name(&self) -> &str {
        &self.track.artist_name
    }

    pub fn song_name(&self) -> &str {
        &self.track.song_name
    }

    /// Whether the server attached per-user info (only sent to
    /// authenticated sessions).
    pub fn has_extended(&self) -> bool {
        self.extended.is_some()
    }

    /// Whether someone requested this song.
    pub fn is_requested(&self) -> bool {
        !self.requested_by.is_empty()
    }
}

/// Per-user extras attached to updates for authenticated sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedInfo {
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub queue: Option<QueueInfo>,
}

/// The user's position in the request queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    #[serde(default)]
    pub songs_in_queue: u32,
    #[serde(default)]
    pub has_song_in_queue: bool,
    #[serde(default)]
    pub in_queue_before_user_song: u32,
    #[serde(default)]
    pub user_songs_in_queue: u32,
}

/// A named station event (e.g. a live DJ session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub name: String,
}

/// Decoded `NOTIFICATION` update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// `type = "EVENT"`.
    Event(EventInfo),
    /// A notification type this client does not interpret.
    Other(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct NotificationPayload {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub event: Option<EventInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WelcomePayload {
    pub heartbeat: u64,
}
