//! Server endpoint normalization

use std::fmt;

/// Path segment the server mounts its WebSocket router on.
pub const SERVICE_PATH: &str = "postman";

/// Address used when no server address is configured.
pub const DEFAULT_SERVER_ADDRESS: &str = "127.0.0.1:8800";

const SCHEME_PREFIXES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

/// Normalized WebSocket endpoint of a Postman server.
///
/// Built from a `host[:port]` input that may already carry a scheme and/or the
/// service path. Normalization never fails; malformed input simply yields a
/// malformed URL that fails later, at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    token: Option<String>,
}

impl Endpoint {
    /// Normalize `address` into `ws://host/postman` or `wss://host/postman`.
    pub fn new(address: &str, secure: bool) -> Self {
        let mut host = address.trim().to_string();
        for prefix in SCHEME_PREFIXES {
            host = host.replace(prefix, "");
        }
        host = host.replace(&format!("/{SERVICE_PATH}"), "");

        let scheme = if secure { "wss" } else { "ws" };
        let url = format!("{}://{}/{}", scheme, host.trim_end_matches('/'), SERVICE_PATH);

        Self { url, token: None }
    }

    /// Attach a secure-mode token, sent as the `tkn` query parameter.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// The normalized URL, without any token.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Whether the endpoint uses the encrypted scheme.
    pub fn is_secure(&self) -> bool {
        self.url.starts_with("wss://")
    }

    /// URL used for the WebSocket handshake.
    pub fn connect_url(&self) -> String {
        match &self.token {
            Some(token) => format!("{}?tkn={}", self.url, token),
            None => self.url.clone(),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_ADDRESS, false)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
