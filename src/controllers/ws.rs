use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::NaiveDate;
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(ws_handler))
}

/// Client control messages. A connection manages its own set of
/// show-date subscriptions; events are only ever delivered for dates
/// the client has joined.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ControlMessage {
    Join { show_date: NaiveDate },
    Leave { show_date: NaiveDate },
}

// GET /api/ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(tokio::sync::Mutex::new(sender));

    // One forwarding task per joined show date.
    let mut subscriptions: HashMap<NaiveDate, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let control: ControlMessage = match serde_json::from_str(text.as_str()) {
                    Ok(c) => c,
                    Err(_) => {
                        let reply = json!({"type": "error", "message": "unrecognized control message"});
                        send_json(&sender, &reply).await;
                        continue;
                    }
                };

                match control {
                    ControlMessage::Join { show_date } => {
                        if subscriptions.contains_key(&show_date) {
                            continue;
                        }
                        let rx = state.notifier.subscribe(show_date);
                        let task_sender = Arc::clone(&sender);
                        let handle = tokio::spawn(forward_events(rx, task_sender));
                        subscriptions.insert(show_date, handle);

                        let reply = json!({"type": "joined", "show_date": show_date});
                        send_json(&sender, &reply).await;
                    }
                    ControlMessage::Leave { show_date } => {
                        if let Some(handle) = subscriptions.remove(&show_date) {
                            handle.abort();
                        }
                        let reply = json!({"type": "left", "show_date": show_date});
                        send_json(&sender, &reply).await;
                    }
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum automatically.
            _ => {}
        }
    }

    for handle in subscriptions.into_values() {
        handle.abort();
    }
    debug!("websocket connection closed");
}

async fn forward_events(
    mut rx: broadcast::Receiver<crate::services::notifier::BookingEvent>,
    sender: Arc<tokio::sync::Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Ok(payload) = serde_json::to_string(&event) else {
                    continue;
                };
                let mut guard = sender.lock().await;
                if guard.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            // Dropped messages are fine; the client re-fetches state.
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "websocket subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_json(
    sender: &Arc<tokio::sync::Mutex<futures::stream::SplitSink<WebSocket, Message>>>,
    value: &serde_json::Value,
) {
    let Ok(payload) = serde_json::to_string(value) else {
        return;
    };
    let mut guard = sender.lock().await;
    let _ = guard.send(Message::Text(payload.into())).await;
}
