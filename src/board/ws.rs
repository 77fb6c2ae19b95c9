use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use super::api::{ApiError, AppState};
use super::sync::{ChangeEvent, ChangeKind};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// ── Per-board channels ───────────────────────────────────────────────

/// One broadcast channel per board name, created on first use.
#[derive(Debug)]
pub struct BoardChannels {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl Default for BoardChannels {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BoardChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn sender(&self, board: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(board.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, board: &str) -> broadcast::Receiver<String> {
        self.sender(board).subscribe()
    }

    /// Publish an event on its board's channel. Boards nobody ever
    /// subscribed to have no channel and the event is dropped.
    pub fn publish(&self, event: &ChangeEvent) {
        if let Some(tx) = self.channels.get(&event.board) {
            broadcast_event(&tx, event);
        }
    }

    /// Drop a board's channel once its last subscriber is gone.
    pub fn release(&self, board: &str) {
        self.channels.remove_if(board, |_, tx| tx.receiver_count() == 0);
    }

    /// Number of boards with a live channel.
    pub fn board_count(&self) -> usize {
        self.channels.len()
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Upgrade to a WebSocket on a registered board. Unknown boards get a 404
/// before any channel is created for them.
pub async fn ws_handler(
    Path(board): Path<String>,
    State(state): State<Arc<AppState>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(e) = state.service.board(&board) {
        return ApiError::from(e).into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };
    let rx = state.channels.subscribe(&board);
    tracing::debug!(board = %board, "websocket subscriber attached");
    let channels = state.channels.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, board, channels, rx))
}

async fn handle_socket(
    socket: WebSocket,
    board: String,
    channels: Arc<BoardChannels>,
    rx: broadcast::Receiver<String>,
) {
    let (sender, receiver) = socket.split();
    run_socket_loop(&board, sender, receiver, rx).await;
    channels.release(&board);
    tracing::debug!(board = %board, "websocket subscriber detached");
}

/// What to do with one result from a board channel.
#[derive(Debug, PartialEq)]
enum Relay {
    Frame(String),
    Close,
}

/// A lagged subscriber missed events, so it is sent a resync frame in their
/// place and its viewer re-fetches everything.
fn relay(board: &str, result: Result<String, RecvError>) -> Relay {
    match result {
        Ok(msg) => Relay::Frame(msg),
        Err(RecvError::Closed) => Relay::Close,
        Err(RecvError::Lagged(skipped)) => {
            tracing::warn!(board, skipped, "websocket subscriber lagged, sending resync");
            match serde_json::to_string(&ChangeEvent::new(board, ChangeKind::Resync)) {
                Ok(frame) => Relay::Frame(frame),
                Err(e) => {
                    tracing::warn!(board, error = %e, "failed to serialize resync frame");
                    Relay::Close
                }
            }
        }
    }
}

/// Forward board events to one client, with ping/pong keepalive.
///
/// If no Pong arrives within [`PONG_TIMEOUT`] after a Ping, the loop exits.
async fn run_socket_loop(
    board: &str,
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!("websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match relay(board, result) {
                    Relay::Frame(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Relay::Close => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast an event. Silent when nobody is subscribed.
pub fn broadcast_event(tx: &broadcast::Sender<String>, event: &ChangeEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::warn!(board = %event.board, error = %e, "failed to serialize change event");
        }
    }
}
