//! Postman Rust Client
//!
//! A WebSocket client for the Postman pub/sub server. It keeps one connection
//! to the server, sends subscribe/unsubscribe/publish frames, and hands every
//! inbound message to user callbacks.
//!
//! # Example
//!
//! ```no_run
//! use postman_client::{Callbacks, PostmanClient, PostmanConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let callbacks = Callbacks::new()
//!         .on_connect(|| println!("connected"))
//!         .on_message(|channel, message, tag, extention| {
//!             println!("[{}] {} ({}/{})", channel, message, tag, extention);
//!         })
//!         .on_error(|e| eprintln!("postman error: {}", e));
//!
//!     let client = PostmanClient::new(PostmanConfig::new("127.0.0.1:8800"), callbacks);
//!     client.connect().await;
//!
//!     client.subscribe("TEST").await;
//!     client.publish("TEST", "hello").await;
//!
//!     client.disconnect().await;
//! }
//! ```

mod callbacks;
mod client;
mod config;
mod dispatch;
mod endpoint;
mod error;
mod protocol;
mod tls;

pub use callbacks::{Callbacks, ErrorHandler, EventHandler, MessageHandler, StatusHandler};
pub use client::{ConnectionState, PostmanClient};
pub use config::PostmanConfig;
pub use endpoint::{Endpoint, DEFAULT_SERVER_ADDRESS, SERVICE_PATH};
pub use error::{ErrorKind, PostmanError, Result};
pub use protocol::{
    ClientFrame, Publication, ServerFrame, ServerResult, StatusReport, HEARTBEAT_PAYLOAD,
    MESSAGE_PREFIX, RESULT_FAIL,
};
