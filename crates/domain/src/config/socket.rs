use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which radio library (station) to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Library {
    #[default]
    Jpop,
    Kpop,
}

impl Library {
    /// Gateway WebSocket URL for this library.
    pub fn socket_url(self) -> &'static str {
        match self {
            Library::Jpop => "wss://listen.moe/gateway_v2",
            Library::Kpop => "wss://listen.moe/kpop/gateway_v2",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Library::Jpop => "jpop",
            Library::Kpop => "kpop",
        }
    }
}

impl std::str::FromStr for Library {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpop" => Ok(Library::Jpop),
            "kpop" => Ok(Library::Kpop),
            other => Err(format!("unknown library: {other}")),
        }
    }
}

/// Gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default)]
    pub library: Library,
    /// Explicit gateway URL.  Overrides the library default when set.
    #[serde(default)]
    pub url: Option<String>,
    /// First reconnect delay, and the value the delay resets to after a
    /// successful open.
    #[serde(default = "d_min_retry_ms")]
    pub min_retry_ms: u64,
    /// Upper bound for the doubling reconnect delay.
    #[serde(default = "d_max_retry_ms")]
    pub max_retry_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            library: Library::default(),
            url: None,
            min_retry_ms: d_min_retry_ms(),
            max_retry_ms: d_max_retry_ms(),
        }
    }
}

impl SocketConfig {
    /// The URL the client should connect to.
    pub fn endpoint(&self) -> &str {
        match &self.url {
            Some(url) if !url.is_empty() => url,
            _ => self.library.socket_url(),
        }
    }
}

fn d_min_retry_ms() -> u64 {
    250
}

fn d_max_retry_ms() -> u64 {
    4000
}
