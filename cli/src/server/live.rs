//! Live channel over WebSocket.
//!
//! Every client receives `new-block` and `metrics-update`. A client sends
//! `{"type":"subscribe","contractAddress":"0x…"}` to also receive that
//! contract's `new-event`s, starting with a `recent-events` backlog, and
//! `unsubscribe` to stop.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chainpulse_core::{normalize_address, LiveMessage, Topic};

use super::SharedState;

const OUTBOUND_BUFFER: usize = 256;

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Subscribe {
        #[serde(rename = "contractAddress")]
        contract_address: String,
    },
    Unsubscribe {
        #[serde(rename = "contractAddress")]
        contract_address: String,
    },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let mut global = state.hub.subscribe(&Topic::Global);
    let (contract_tx, mut contract_rx) = mpsc::channel::<LiveMessage>(OUTBOUND_BUFFER);
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();
    info!("live client connected");

    loop {
        let outgoing = tokio::select! {
            msg = global.recv() => match msg {
                Ok(msg) => msg,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %Topic::Global, skipped, "live client lagging, messages dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            Some(msg) = contract_rx.recv() => msg,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match handle_client_message(&state, &text, &contract_tx, &mut subscriptions).await {
                        Some(reply) => reply,
                        None => continue,
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => continue,
            },
        };

        if !send(&mut sender, &outgoing).await {
            break;
        }
    }

    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    info!("live client disconnected");
}

/// Apply a client message. Returns a message to send back, if any.
async fn handle_client_message(
    state: &SharedState,
    text: &str,
    contract_tx: &mpsc::Sender<LiveMessage>,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
) -> Option<LiveMessage> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "ignoring malformed live client message");
            return None;
        }
    };

    match msg {
        ClientMessage::Subscribe { contract_address } => {
            let Ok(contract) = normalize_address(&contract_address) else {
                debug!(contract = %contract_address, "ignoring subscribe with invalid address");
                return None;
            };
            if !subscriptions.contains_key(&contract) {
                let topic = Topic::Contract(contract.clone());
                let task = forward_topic(state.hub.subscribe(&topic), topic, contract_tx.clone());
                subscriptions.insert(contract.clone(), task);
                debug!(contract = %contract, "live client subscribed");
            }

            match state
                .store
                .get_recent_events(&contract, state.recent_events_on_subscribe)
                .await
            {
                Ok(events) => Some(LiveMessage::RecentEvents(events)),
                Err(e) => {
                    warn!(contract = %contract, error = %e, "recent events unavailable for subscriber");
                    None
                }
            }
        }
        ClientMessage::Unsubscribe { contract_address } => {
            let contract = normalize_address(&contract_address).ok()?;
            if let Some(task) = subscriptions.remove(&contract) {
                task.abort();
                debug!(contract = %contract, "live client unsubscribed");
            }
            None
        }
    }
}

/// Copy one topic into the connection's outbound queue.
fn forward_topic(
    mut rx: tokio::sync::broadcast::Receiver<LiveMessage>,
    topic: Topic,
    tx: mpsc::Sender<LiveMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %topic, skipped, "live client lagging, messages dropped");
                }
                Err(RecvError::Closed) => return,
            }
        }
    })
}

async fn send(sender: &mut SplitSink<WebSocket, Message>, msg: &LiveMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize live message");
            true
        }
    }
}
