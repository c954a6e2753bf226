//! Configuration for the Postman client

use crate::endpoint::{Endpoint, DEFAULT_SERVER_ADDRESS};
use std::time::Duration;

/// Configuration for connecting to a Postman server
#[derive(Debug, Clone)]
pub struct PostmanConfig {
    /// Server address, `host[:port]`, optionally with scheme and service path
    pub server_address: String,

    /// Use `wss://` instead of `ws://`
    pub secure: bool,

    /// Token for servers running in secure mode
    pub secure_token: Option<String>,

    /// How long `connect()` waits for the handshake before returning
    pub connect_delay: Duration,

    /// Maximum number of inbound frames decoded and dispatched at once
    pub dispatch_concurrency: usize,

    /// Capacity of the outbound frame queue
    pub outbound_buffer: usize,

    /// How long `disconnect()` waits for the connection task to finish
    pub close_timeout: Duration,

    /// Whether to skip TLS certificate verification (for development)
    pub dangerous_skip_cert_verify: bool,
}

impl PostmanConfig {
    /// Create a new configuration for the given server address
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            secure: false,
            secure_token: None,
            connect_delay: Duration::from_millis(500),
            dispatch_concurrency: 8,
            outbound_buffer: 100,
            close_timeout: Duration::from_secs(2),
            dangerous_skip_cert_verify: false,
        }
    }

    /// Connect over TLS
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Authenticate against a server running in secure mode
    pub fn secure_token(mut self, token: impl Into<String>) -> Self {
        self.secure_token = Some(token.into());
        self
    }

    /// Set how long `connect()` waits for the connection to open
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Set the number of frames that may be dispatched concurrently
    pub fn dispatch_concurrency(mut self, limit: usize) -> Self {
        self.dispatch_concurrency = limit.max(1);
        self
    }

    /// Deliver callbacks one at a time, in receipt order
    pub fn ordered_dispatch(self) -> Self {
        self.dispatch_concurrency(1)
    }

    /// Set the outbound queue capacity
    pub fn outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity.max(1);
        self
    }

    /// Set the disconnect timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Skip TLS certificate verification (DANGEROUS - only for development)
    pub fn dangerous_skip_cert_verify(mut self) -> Self {
        self.dangerous_skip_cert_verify = true;
        self
    }

    /// The normalized endpoint this configuration connects to
    pub fn endpoint(&self) -> Endpoint {
        let endpoint = Endpoint::new(&self.server_address, self.secure);
        match &self.secure_token {
            Some(token) => endpoint.with_token(token.clone()),
            None => endpoint,
        }
    }
}

impl Default for PostmanConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_ADDRESS)
    }
}
