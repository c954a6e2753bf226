//! User callbacks for connection events

use crate::error::PostmanError;
use crate::protocol::{Publication, StatusReport};

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Handler for connection lifecycle events
pub type EventHandler = Arc<dyn Fn() + Send + Sync>;

/// Handler for channel messages: `(channel, message, tag, extention)`
pub type MessageHandler = Arc<dyn Fn(&str, &str, &str, &str) + Send + Sync>;

/// Handler for status reports
pub type StatusHandler = Arc<dyn Fn(&StatusReport) + Send + Sync>;

/// Handler for errors
pub type ErrorHandler = Arc<dyn Fn(&PostmanError) + Send + Sync>;

/// The set of callbacks a client fires.
///
/// Every callback is optional. A missing callback turns the matching event into
/// a no-op, and a callback that panics is reported through `on_error` instead of
/// unwinding into the client.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_connect: Option<EventHandler>,
    on_message: Option<MessageHandler>,
    on_close: Option<EventHandler>,
    on_error: Option<ErrorHandler>,
    on_heartbeat: Option<EventHandler>,
    on_status: Option<StatusHandler>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the WebSocket handshake completes
    pub fn on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    /// Called for every message on a subscribed channel
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str, &str, &str) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called when an established connection ends
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called for every failure inside the client
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&PostmanError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called when the server answers a ping
    pub fn on_heartbeat<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_heartbeat = Some(Arc::new(f));
        self
    }

    /// Called when the server answers a status request
    pub fn on_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&StatusReport) + Send + Sync + 'static,
    {
        self.on_status = Some(Arc::new(f));
        self
    }

    pub(crate) fn connected(&self) {
        if let Some(f) = &self.on_connect {
            self.guarded("on_connect", || f());
        }
    }

    pub(crate) fn message(&self, publication: &Publication) {
        if let Some(f) = &self.on_message {
            self.guarded("on_message", || {
                f(
                    &publication.channel,
                    &publication.message,
                    &publication.tag,
                    &publication.extention,
                )
            });
        }
    }

    pub(crate) fn closed(&self) {
        if let Some(f) = &self.on_close {
            self.guarded("on_close", || f());
        }
    }

    pub(crate) fn heartbeat(&self) {
        if let Some(f) = &self.on_heartbeat {
            self.guarded("on_heartbeat", || f());
        }
    }

    pub(crate) fn status(&self, report: &StatusReport) {
        if let Some(f) = &self.on_status {
            self.guarded("on_status", || f(report));
        }
    }

    pub(crate) fn error(&self, err: &PostmanError) {
        let Some(f) = &self.on_error else {
            return;
        };
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| f(err))) {
            warn!(panic = %panic_message(&*panic), "on_error callback panicked");
        }
    }

    fn guarded(&self, name: &str, f: impl FnOnce()) {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
            let message = format!("{}: {}", name, panic_message(&*panic));
            self.error(&PostmanError::Dispatch(message));
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_heartbeat", &self.on_heartbeat.is_some())
            .field("on_status", &self.on_status.is_some())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
