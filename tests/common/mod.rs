//! In-process Postman server for integration tests
//!
//! Speaks the same text framing as the real server: `<keyword> <json>` in,
//! `message <json>` out. Only what the client exercises is implemented.

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

pub const SERVER_VERSION: &str = "test-1.0";

#[derive(Default)]
struct Channels {
    /// channel -> (connection id -> (client info, sender))
    members: BTreeMap<String, HashMap<u64, (String, mpsc::UnboundedSender<String>)>>,
}

#[derive(Clone)]
struct ServerState {
    token: Option<String>,
    channels: Arc<Mutex<Channels>>,
    received: Arc<Mutex<Vec<String>>>,
    kick: broadcast::Sender<()>,
    next_id: Arc<AtomicU64>,
}

/// Handle to a running mock server
pub struct MockServer {
    pub addr: SocketAddr,
    state: ServerState,
}

impl MockServer {
    /// Start a server that accepts every client
    pub async fn start() -> Self {
        Self::start_with_token(None).await
    }

    /// Start a server that only accepts clients presenting `token`
    pub async fn start_secure(token: &str) -> Self {
        Self::start_with_token(Some(token.to_string())).await
    }

    async fn start_with_token(token: Option<String>) -> Self {
        let (kick, _) = broadcast::channel(4);
        let state = ServerState {
            token,
            channels: Arc::new(Mutex::new(Channels::default())),
            received: Arc::new(Mutex::new(Vec::new())),
            kick,
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let app = Router::new()
            .route("/postman", get(ws_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Address in the `host:port` form the client accepts
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Raw frames received from clients, in arrival order
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().clone()
    }

    /// Number of live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .channels
            .lock()
            .members
            .get(channel)
            .map_or(0, |members| members.len())
    }

    /// Close every client connection from the server side
    pub fn close_all(&self) {
        let _ = self.state.kick.send(());
    }

    /// Poll until `check` holds or a few seconds pass
    pub async fn wait_until(&self, check: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..100 {
            if check(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        check(self)
    }
}

#[derive(Deserialize)]
struct ConnectParams {
    tkn: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    let authorized = match &state.token {
        Some(expected) => params.tkn.as_deref() == Some(expected.as_str()),
        None => true,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, authorized))
}

async fn handle_socket(socket: WebSocket, state: ServerState, authorized: bool) {
    let (mut sender, mut receiver) = socket.split();

    if !authorized {
        // The real server JSON-encodes the notice into a string payload.
        let notice = json!({"result": "fail", "error": "security error"}).to_string();
        let reply = format!("message {}", Value::String(notice));
        let _ = sender.send(Message::Text(reply)).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let conn_id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut kick = state.kick.subscribe();

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                out = rx.recv() => match out {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = kick.recv() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                state.received.lock().push(text.clone());
                handle_frame(&text, conn_id, &tx, &state);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let mut channels = state.channels.lock();
    for members in channels.members.values_mut() {
        members.remove(&conn_id);
    }
    channels.members.retain(|_, members| !members.is_empty());
    drop(channels);
    send_task.abort();
}

fn handle_frame(text: &str, conn_id: u64, tx: &mpsc::UnboundedSender<String>, state: &ServerState) {
    let (keyword, body) = text.split_once(' ').unwrap_or((text, "{}"));
    let body: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |name: &str| body[name].as_str().unwrap_or_default().to_string();

    match keyword {
        "subscribe" => {
            state
                .channels
                .lock()
                .members
                .entry(field("channel"))
                .or_default()
                .insert(conn_id, (field("client_info"), tx.clone()));
        }
        "unsubscribe" => {
            let mut channels = state.channels.lock();
            let channel = field("channel");
            if let Some(members) = channels.members.get_mut(&channel) {
                members.remove(&conn_id);
                if members.is_empty() {
                    channels.members.remove(&channel);
                }
            }
        }
        "publish" => {
            let channel = field("channel");
            let frame = format!(
                "message {}",
                json!({
                    "channel": channel,
                    "message": field("message"),
                    "tag": field("tag"),
                    "extention": field("extention"),
                })
            );
            let channels = state.channels.lock();
            let targets = match channel.strip_suffix("/*") {
                Some(prefix) => channels
                    .members
                    .iter()
                    .filter(|(name, _)| name.starts_with(&format!("{}/", prefix)))
                    .flat_map(|(_, members)| members.values())
                    .collect::<Vec<_>>(),
                None => channels
                    .members
                    .get(&channel)
                    .map(|members| members.values().collect())
                    .unwrap_or_default(),
            };
            for (_, subscriber) in targets {
                let _ = subscriber.send(frame.clone());
            }
        }
        "ping" => {
            let _ = tx.send("message \"pong\"".to_string());
        }
        "status" => {
            let channels = state.channels.lock();
            let members: BTreeMap<&String, Vec<&String>> = channels
                .members
                .iter()
                .map(|(name, members)| (name, members.values().map(|(info, _)| info).collect()))
                .collect();
            let report = json!({"version": SERVER_VERSION, "channels": members});
            let _ = tx.send(format!("message {}", report));
        }
        _ => {}
    }
}
