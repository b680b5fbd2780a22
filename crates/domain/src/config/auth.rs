use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the user's bearer token.
    /// If the env var is unset or empty, the handshake is sent anonymously.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Prefix prepended to the raw token in the handshake.
    #[serde(default = "d_token_prefix")]
    pub token_prefix: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: d_token_env(),
            token_prefix: d_token_prefix(),
        }
    }
}

impl AuthConfig {
    /// Read the token from the configured env var.  Empty values count as unset.
    pub fn token_from_env(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn d_token_env() -> String {
    "MOE_TOKEN".into()
}

fn d_token_prefix() -> String {
    "Bearer ".into()
}
