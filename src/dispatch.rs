//! Inbound frame dispatch
//!
//! Frames are decoded and handed to user callbacks on the blocking pool so a
//! slow callback never stalls the connection loop. A semaphore bounds the
//! number of frames in flight. The connection loop holds a received frame
//! until a permit is free, stops reading meanwhile, and keeps serving outbound
//! frames and shutdown. Tokio semaphores grant permits in FIFO order, so a
//! limit of one delivers callbacks strictly in receipt order.

use crate::callbacks::Callbacks;
use crate::error::PostmanError;
use crate::protocol::ServerFrame;

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

pub(crate) struct Dispatcher {
    callbacks: Arc<Callbacks>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub(crate) fn new(callbacks: Arc<Callbacks>, concurrency: usize) -> Self {
        Self {
            callbacks,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Wait for a free dispatch slot. Cancel safe.
    pub(crate) async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    /// Run one raw text frame on the blocking pool, holding `permit` until
    /// its callbacks return.
    pub(crate) fn spawn(&self, permit: OwnedSemaphorePermit, raw: String) {
        let callbacks = self.callbacks.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            handle_frame(&callbacks, &raw);
        });
    }
}

/// Decode a frame and fire the matching callback. Never panics.
pub(crate) fn handle_frame(callbacks: &Callbacks, raw: &str) {
    match ServerFrame::parse(raw) {
        Ok(None) => {
            debug!(len = raw.len(), "Ignoring non-message frame");
        }
        Ok(Some(ServerFrame::Heartbeat)) => callbacks.heartbeat(),
        Ok(Some(ServerFrame::Publication(publication))) => callbacks.message(&publication),
        Ok(Some(ServerFrame::Status(report))) => callbacks.status(&report),
        Ok(Some(ServerFrame::Result(result))) => {
            debug!(result = %result.result, "Ignoring result notice");
        }
        Ok(Some(ServerFrame::Rejected(result))) => {
            let reason = if result.error.is_empty() {
                result.result
            } else {
                result.error
            };
            warn!(reason = %reason, "Server rejected client");
            callbacks.error(&PostmanError::Rejected(reason));
        }
        Err(e) => {
            warn!(error = %e, "Failed to decode frame");
            callbacks.error(&e);
        }
    }
}
