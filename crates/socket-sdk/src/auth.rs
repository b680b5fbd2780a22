//! Auth capability: supplies the bearer token sent in the handshake.

/// Source of the handshake token.  Token acquisition and refresh live
/// outside this crate.
pub trait AuthProvider: Send + Sync + 'static {
    fn is_authenticated(&self) -> bool;

    /// Token including its scheme prefix, e.g. `"Bearer abc"`.
    fn token_with_prefix(&self) -> String;
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
    prefix: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            prefix: "Bearer ".into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl AuthProvider for StaticToken {
    fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    fn token_with_prefix(&self) -> String {
        match &self.token {
            Some(token) => format!("{}{token}", self.prefix),
            None => String::new(),
        }
    }
}

/// The `auth` value to put in the handshake: the prefixed token, or an
/// empty string for anonymous sessions.
pub(crate) fn handshake_token(auth: &dyn AuthProvider) -> String {
    if auth.is_authenticated() {
        auth.token_with_prefix()
    } else {
        String::new()
    }
}
