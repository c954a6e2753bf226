//! Postman client implementation

use crate::callbacks::Callbacks;
use crate::config::PostmanConfig;
use crate::dispatch::Dispatcher;
use crate::endpoint::Endpoint;
use crate::error::{PostmanError, Result};
use crate::protocol::{ClientFrame, Publication};
use crate::tls;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::Connector;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Connection state of the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected and ready
    Connected,
}

/// The single live connection owned by a client.
struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<String>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Internal client state
struct ClientInner {
    config: PostmanConfig,
    endpoint: Endpoint,
    callbacks: Arc<Callbacks>,
    dispatcher: Arc<Dispatcher>,
    state: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    handle: Mutex<Option<ConnectionHandle>>,
}

/// Postman WebSocket client
///
/// Holds at most one connection at a time. Operations never fail towards the
/// caller: frames sent while disconnected are dropped, and every failure is
/// reported through the `on_error` callback. There is no automatic reconnect;
/// a closed connection stays closed until `connect()` is called again.
///
/// This struct is cheaply cloneable as it uses an internal Arc. Dropping the
/// last clone closes the connection.
#[derive(Clone)]
pub struct PostmanClient {
    inner: Arc<ClientInner>,
}

impl PostmanClient {
    /// Create a new client. No I/O happens until `connect()`.
    pub fn new(config: PostmanConfig, callbacks: Callbacks) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let callbacks = Arc::new(callbacks);

        let inner = Arc::new(ClientInner {
            endpoint: config.endpoint(),
            dispatcher: Arc::new(Dispatcher::new(
                callbacks.clone(),
                config.dispatch_concurrency,
            )),
            callbacks,
            config,
            state: state_tx,
            state_rx,
            handle: Mutex::new(None),
        });

        Self { inner }
    }

    /// The normalized endpoint this client connects to
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Get the current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Whether the WebSocket handshake has completed and the connection is open
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Get a receiver for connection state changes
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Open the connection if none exists.
    ///
    /// The connection runs on its own task until closed. This waits at most
    /// `connect_delay` for the handshake; returning does not mean the
    /// connection is ready. Frames sent in the meantime are queued.
    pub async fn connect(&self) {
        if self.inner.handle.lock().is_some() {
            debug!("Connection already exists");
            return;
        }

        let (request, connector) = match self.inner.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(url = %self.inner.endpoint, error = %e, "Connection setup failed");
                self.inner.callbacks.error(&e);
                return;
            }
        };

        {
            let mut handle = self.inner.handle.lock();
            if handle.is_some() {
                return;
            }

            let id = Uuid::new_v4();
            let (tx, rx) = mpsc::channel(self.inner.config.outbound_buffer);
            let (shutdown, shutdown_rx) = oneshot::channel();

            self.inner.set_state(ConnectionState::Connecting);
            let connection = ConnectionTask {
                id,
                client: Arc::downgrade(&self.inner),
                callbacks: self.inner.callbacks.clone(),
                dispatcher: self.inner.dispatcher.clone(),
                url: self.inner.endpoint.to_string(),
            };
            let task = tokio::spawn(connection.run(request, connector, rx, shutdown_rx));

            *handle = Some(ConnectionHandle {
                id,
                tx,
                shutdown,
                task,
            });
        }

        let mut state_rx = self.inner.state_rx.clone();
        let _ = timeout(
            self.inner.config.connect_delay,
            state_rx.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await;
    }

    /// Connect, then wait until the connection ends.
    ///
    /// Returns once the server closes the connection, another clone of this
    /// client calls `disconnect()`, or the connection attempt fails.
    pub async fn connect_and_wait(&self) {
        self.connect().await;

        let mut state_rx = self.inner.state_rx.clone();
        loop {
            let state = *state_rx.borrow_and_update();
            if state == ConnectionState::Disconnected && self.inner.handle.lock().is_none() {
                return;
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Subscribe to a channel
    pub async fn subscribe(&self, channel: &str) {
        self.subscribe_with_info(channel, "").await;
    }

    /// Subscribe to a channel, identifying this client to the server
    pub async fn subscribe_with_info(&self, channel: &str, client_info: &str) {
        self.inner
            .send(ClientFrame::Subscribe {
                channel: channel.to_string(),
                client_info: client_info.to_string(),
            })
            .await;
    }

    /// Unsubscribe from a channel
    pub async fn unsubscribe(&self, channel: &str) {
        self.inner
            .send(ClientFrame::Unsubscribe {
                channel: channel.to_string(),
            })
            .await;
    }

    /// Publish a message with empty tag and extention
    pub async fn publish(&self, channel: &str, message: &str) {
        self.send_publication(Publication::new(channel, message))
            .await;
    }

    /// Publish a message with a tag and an extention
    pub async fn publish_tagged(&self, channel: &str, message: &str, tag: &str, extention: &str) {
        self.send_publication(
            Publication::new(channel, message)
                .tag(tag)
                .extention(extention),
        )
        .await;
    }

    /// Publish a prepared publication
    pub async fn send_publication(&self, publication: Publication) {
        self.inner.send(ClientFrame::Publish(publication)).await;
    }

    /// Ask the server for a heartbeat; the answer fires `on_heartbeat`
    pub async fn ping(&self) {
        self.inner.send(ClientFrame::Ping).await;
    }

    /// Ask the server for its status; the answer fires `on_status`
    pub async fn status(&self) {
        self.inner.send(ClientFrame::Status).await;
    }

    /// Close the connection.
    ///
    /// The client is always left without a connection afterwards, even when
    /// closing fails; failures only fire `on_error`.
    pub async fn disconnect(&self) {
        let Some(handle) = self.inner.handle.lock().take() else {
            return;
        };
        let ConnectionHandle {
            id,
            tx,
            shutdown,
            mut task,
        } = handle;

        debug!(conn_id = %id, "Disconnecting");
        if shutdown.send(()).is_err() {
            self.inner.callbacks.error(&PostmanError::Disconnect(
                "connection task is not running".to_string(),
            ));
        }

        if timeout(self.inner.config.close_timeout, &mut task)
            .await
            .is_err()
        {
            warn!(conn_id = %id, "Connection did not close in time, aborting");
            task.abort();
            self.inner.callbacks.error(&PostmanError::Disconnect(
                "timed out waiting for the connection to close".to_string(),
            ));
        }
        drop(tx);

        if self.inner.handle.lock().is_none() {
            self.inner.set_state(ConnectionState::Disconnected);
        }
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send(state);
    }

    /// Build the handshake request and, for `wss://`, the TLS connector.
    fn prepare(&self) -> Result<(Request, Option<Connector>)> {
        let request = self
            .endpoint
            .connect_url()
            .into_client_request()
            .map_err(|e| PostmanError::Connect(e.to_string()))?;

        let connector = if self.endpoint.is_secure() {
            Some(tls::connector(self.config.dangerous_skip_cert_verify)?)
        } else {
            None
        };

        Ok((request, connector))
    }

    async fn send(&self, frame: ClientFrame) {
        let tx = self.handle.lock().as_ref().map(|handle| handle.tx.clone());
        let Some(tx) = tx else {
            debug!(op = frame.keyword(), "Not connected, dropping frame");
            return;
        };

        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                self.callbacks.error(&e);
                return;
            }
        };

        if tx.send(text).await.is_err() {
            warn!(op = frame.keyword(), channel = ?frame.channel(), "Connection closed, frame dropped");
            self.callbacks
                .error(&PostmanError::Send("connection is closed".to_string()));
        }
    }

    fn mark_connected(&self, id: Uuid) {
        let handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| h.id == id) {
            self.set_state(ConnectionState::Connected);
        }
    }

    /// Drop the handle for connection `id` unless a newer one replaced it.
    fn release(&self, id: Uuid) {
        let mut handle = self.handle.lock();
        match handle.as_ref() {
            Some(current) if current.id != id => {}
            _ => {
                *handle = None;
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }
}

/// Background task owning one WebSocket connection.
///
/// Holds the client weakly: once every `PostmanClient` clone is gone the
/// handle drops, the shutdown sender with it, and the task closes the socket.
struct ConnectionTask {
    id: Uuid,
    client: Weak<ClientInner>,
    callbacks: Arc<Callbacks>,
    dispatcher: Arc<Dispatcher>,
    url: String,
}

impl ConnectionTask {
    fn mark_connected(&self) {
        if let Some(client) = self.client.upgrade() {
            client.mark_connected(self.id);
        }
    }

    fn release(&self) {
        if let Some(client) = self.client.upgrade() {
            client.release(self.id);
        }
    }

    async fn run(
        self,
        request: Request,
        connector: Option<Connector>,
        mut outbound: mpsc::Receiver<String>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let id = self.id;
        debug!(conn_id = %id, url = %self.url, "Connecting");

        let handshake =
            tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector);
        let stream = tokio::select! {
            result = handshake => match result {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!(conn_id = %id, url = %self.url, error = %e, "Connection failed");
                    self.release();
                    self.callbacks.error(&PostmanError::Connect(e.to_string()));
                    return;
                }
            },
            _ = &mut shutdown => {
                debug!(conn_id = %id, "Shut down before the connection opened");
                self.release();
                return;
            }
        };

        self.mark_connected();
        info!(conn_id = %id, url = %self.url, "Connected");
        self.callbacks.connected();

        let (mut write, mut read) = stream.split();

        // Frame read but not yet dispatched; reading pauses until a slot frees.
        let mut pending: Option<String> = None;

        let closed_by_client = loop {
            tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!(conn_id = %id, error = %e, "Failed to send frame");
                            self.callbacks.error(&PostmanError::Send(e.to_string()));
                            break false;
                        }
                    }
                    None => break true,
                },

                permit = self.dispatcher.acquire(), if pending.is_some() => {
                    if let (Some(permit), Some(raw)) = (permit, pending.take()) {
                        self.dispatcher.spawn(permit, raw);
                    }
                }

                msg = read.next(), if pending.is_none() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        pending = Some(text.to_string());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(conn_id = %id, ?frame, "Connection closed by server");
                        break false;
                    }
                    Some(Ok(_)) => {
                        // Binary and control frames carry nothing for us; pings are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        warn!(conn_id = %id, error = %e, "WebSocket error");
                        self.callbacks.error(&PostmanError::Transport(e.to_string()));
                        break false;
                    }
                    None => {
                        debug!(conn_id = %id, "Connection stream ended");
                        break false;
                    }
                },

                // Fires on disconnect() and when the last client clone drops.
                _ = &mut shutdown => {
                    if pending.take().is_some() {
                        debug!(conn_id = %id, "Dropping undispatched frame");
                    }
                    // Flush frames queued before the disconnect.
                    while let Ok(text) = outbound.try_recv() {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            warn!(conn_id = %id, error = %e, "Failed to send frame");
                            self.callbacks.error(&PostmanError::Send(e.to_string()));
                            break;
                        }
                    }
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(conn_id = %id, error = %e, "Failed to send close frame");
                        self.callbacks.error(&PostmanError::Disconnect(e.to_string()));
                    }
                    break true;
                }
            }
        };

        self.release();
        info!(conn_id = %id, by_client = closed_by_client, "Connection closed");
        self.callbacks.closed();
    }
}
