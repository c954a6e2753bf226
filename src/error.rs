//! Error types for the Postman client

use thiserror::Error;

/// Errors reported through the client's error callback
#[derive(Error, Debug)]
pub enum PostmanError {
    /// Building the handshake request or opening the connection failed
    #[error("Connection error: {0}")]
    Connect(String),

    /// TLS configuration could not be built
    #[error("TLS error: {0}")]
    Tls(String),

    /// The established connection failed while reading
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be handed to the socket
    #[error("Send error: {0}")]
    Send(String),

    /// An outbound payload could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// The server refused the client (blocked address, bad token)
    #[error("Rejected by server: {0}")]
    Rejected(String),

    /// A user callback panicked
    #[error("Callback panicked: {0}")]
    Dispatch(String),

    /// Closing the connection failed
    #[error("Disconnect error: {0}")]
    Disconnect(String),
}

/// Payload-free classification of a [`PostmanError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    Tls,
    Transport,
    Send,
    Encode,
    Decode,
    Rejected,
    Dispatch,
    Disconnect,
}

impl PostmanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect(_) => ErrorKind::Connect,
            Self::Tls(_) => ErrorKind::Tls,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Send(_) => ErrorKind::Send,
            Self::Encode(_) => ErrorKind::Encode,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Dispatch(_) => ErrorKind::Dispatch,
            Self::Disconnect(_) => ErrorKind::Disconnect,
        }
    }
}

/// Result type for Postman operations
pub type Result<T> = std::result::Result<T, PostmanError>;
