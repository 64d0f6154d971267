//! WebSocket JSON-RPC connector.
//!
//! A background task owns the socket. Callers talk to it over a command
//! channel; responses are matched to requests by id and subscription
//! notifications are routed by subscription id.
//!
//! The connector does not reconnect. When the socket closes, pending calls
//! fail and every block stream ends, which the pipeline treats as fatal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as notify_mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use chainpulse_core::connector::{BlockNumberStream, ChainConnector};
use chainpulse_core::error::PulseError;
use chainpulse_core::types::{Block, RawLog, Receipt};

use crate::rpc::{
    self, JsonRpcRequest, JsonRpcResponse, RpcId, TransportError,
};

type Reply = oneshot::Sender<Result<Value, TransportError>>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for [`WsConnector`].
#[derive(Debug, Clone)]
pub struct WsConnectorConfig {
    /// How long a single call waits for its response.
    pub request_timeout: Duration,
    /// Buffered `newHeads` notifications before new ones are dropped.
    pub notification_buffer: usize,
}

impl Default for WsConnectorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            notification_buffer: 512,
        }
    }
}

/// Command sent from callers to the background WS task.
enum WsCommand {
    Call {
        req: JsonRpcRequest,
        reply: Reply,
    },
    Subscribe {
        req: JsonRpcRequest,
        notify: notify_mpsc::Sender<Value>,
        reply: Reply,
    },
    Close,
}

enum Pending {
    Call(Reply),
    Subscribe {
        notify: notify_mpsc::Sender<Value>,
        reply: Reply,
    },
}

/// [`ChainConnector`] over a single WebSocket JSON-RPC connection.
pub struct WsConnector {
    url: String,
    cmd_tx: mpsc::UnboundedSender<WsCommand>,
    next_id: AtomicU64,
    config: WsConnectorConfig,
}

impl WsConnector {
    /// Connect to `url` and start the background task.
    ///
    /// Fails fast with [`PulseError::Connection`] if the socket cannot be opened.
    pub async fn connect(
        url: impl Into<String>,
        config: WsConnectorConfig,
    ) -> Result<Self, PulseError> {
        let url = url.into();
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| PulseError::Connection(format!("{url}: {e}")))?;
        info!(url = %url, "connected via WebSocket");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WsCommand>();
        tokio::spawn(ws_task(url.clone(), socket, cmd_rx));

        Ok(Self {
            url,
            cmd_tx,
            next_id: AtomicU64::new(1),
            config,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// `false` once the background task has exited.
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    fn request(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params)
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Call {
                req: self.request(method, params),
                reply,
            })
            .map_err(|_| TransportError::WebSocket("WS task closed".into()))?;
        self.await_reply(rx).await
    }

    async fn await_reply(
        &self,
        rx: oneshot::Receiver<Result<Value, TransportError>>,
    ) -> Result<Value, TransportError> {
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Err(_) => Err(TransportError::Timeout {
                ms: self.config.request_timeout.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(TransportError::WebSocket("WS response dropped".into())),
            Ok(Ok(result)) => result,
        }
    }
}

impl Drop for WsConnector {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(WsCommand::Close);
    }
}

#[async_trait]
impl ChainConnector for WsConnector {
    async fn subscribe_new_blocks(&self) -> Result<BlockNumberStream, PulseError> {
        let (notify, notifications) = notify_mpsc::channel(self.config.notification_buffer);
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(WsCommand::Subscribe {
                req: self.request("eth_subscribe", vec![json!("newHeads")]),
                notify,
                reply,
            })
            .map_err(|_| PulseError::Connection("WS task closed".into()))?;

        let sub_id = self
            .await_reply(rx)
            .await
            .map_err(|e| PulseError::Connection(format!("eth_subscribe failed: {e}")))?;
        info!(subscription = %sub_id, "subscribed to newHeads");

        let heads = notifications.filter_map(|head| {
            let number = rpc::head_number(&head);
            if number.is_none() {
                warn!(payload = %head, "ignoring malformed newHeads notification");
            }
            futures::future::ready(number)
        });
        Ok(Box::pin(heads))
    }

    async fn get_block(&self, block_number: u64) -> Result<Block, PulseError> {
        let unavailable = |reason: String| PulseError::UpstreamUnavailable {
            block_number,
            reason,
        };
        let result = self
            .call(
                "eth_getBlockByNumber",
                vec![json!(rpc::to_hex_quantity(block_number)), json!(false)],
            )
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if result.is_null() {
            return Err(PulseError::NotFound(format!("block {block_number}")));
        }
        rpc::block_from_json(&result).ok_or_else(|| unavailable("malformed block response".into()))
    }

    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Receipt, PulseError> {
        let unavailable = |reason: String| PulseError::ReceiptUnavailable {
            tx_hash: tx_hash.to_string(),
            reason,
        };
        let result = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if result.is_null() {
            return Err(PulseError::NotFound(format!("receipt {tx_hash}")));
        }
        rpc::receipt_from_json(&result)
            .ok_or_else(|| unavailable("malformed receipt response".into()))
    }

    async fn get_logs(
        &self,
        block_number: u64,
        addresses: &[String],
    ) -> Result<Vec<RawLog>, PulseError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let quantity = rpc::to_hex_quantity(block_number);
        let filter = json!({
            "fromBlock": quantity,
            "toBlock": quantity,
            "address": addresses,
        });
        let result = self
            .call("eth_getLogs", vec![filter])
            .await
            .map_err(|e| PulseError::UpstreamUnavailable {
                block_number,
                reason: e.to_string(),
            })?;
        let entries = result
            .as_array()
            .ok_or_else(|| PulseError::UpstreamUnavailable {
                block_number,
                reason: "eth_getLogs result is not an array".into(),
            })?;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let log = rpc::log_from_json(entry);
                if log.is_none() {
                    warn!(block = block_number, "skipping malformed log entry");
                }
                log
            })
            .collect())
    }
}

// ─── Background task ──────────────────────────────────────────────────────────

/// Owns the socket until it closes or the connector is dropped.
async fn ws_task(url: String, socket: Socket, mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>) {
    let (mut sink, mut stream) = socket.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut subscriptions: HashMap<String, notify_mpsc::Sender<Value>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let (req, entry) = match cmd {
                    None | Some(WsCommand::Close) => {
                        let _ = sink.close().await;
                        break;
                    }
                    Some(WsCommand::Call { req, reply }) => (req, Pending::Call(reply)),
                    Some(WsCommand::Subscribe { req, notify, reply }) => {
                        (req, Pending::Subscribe { notify, reply })
                    }
                };
                let id = match &req.id { RpcId::Number(n) => *n, _ => 0 };
                let text = match serde_json::to_string(&req) {
                    Ok(text) => text,
                    Err(e) => {
                        entry.fail(TransportError::Malformed(e.to_string()));
                        continue;
                    }
                };
                pending.insert(id, entry);
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "WS send failed");
                    break;
                }
            }
            msg = stream.next() => {
                match msg {
                    None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "WS receive error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_message(text.as_str(), &mut pending, &mut subscriptions);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    warn!(url = %url, pending = pending.len(), "WS connection closed");
    for (_, entry) in pending.drain() {
        entry.fail(TransportError::WebSocket("connection closed".into()));
    }
    // Dropping the senders ends every block stream.
    subscriptions.clear();
}

impl Pending {
    fn fail(self, error: TransportError) {
        let reply = match self {
            Self::Call(reply) | Self::Subscribe { reply, .. } => reply,
        };
        let _ = reply.send(Err(error));
    }
}

fn handle_message(
    text: &str,
    pending: &mut HashMap<u64, Pending>,
    subscriptions: &mut HashMap<String, notify_mpsc::Sender<Value>>,
) {
    let Ok(val) = serde_json::from_str::<Value>(text) else {
        debug!("failed to parse WS message as JSON");
        return;
    };

    if val.get("method").and_then(|m| m.as_str()) == Some("eth_subscription") {
        let params = &val["params"];
        let Some(sub_id) = params["subscription"].as_str() else {
            debug!("subscription notification without id");
            return;
        };
        let disconnected = match subscriptions.get_mut(sub_id) {
            Some(sender) => match sender.try_send(params["result"].clone()) {
                Ok(()) => false,
                Err(e) if e.is_disconnected() => true,
                Err(e) => {
                    warn!(subscription = sub_id, error = %e, "dropping notification");
                    false
                }
            },
            None => {
                debug!(subscription = sub_id, "notification for unknown subscription");
                false
            }
        };
        if disconnected {
            subscriptions.remove(sub_id);
        }
        return;
    }

    let Ok(resp) = serde_json::from_value::<JsonRpcResponse>(val) else {
        debug!("ignoring unrecognised WS message");
        return;
    };
    let id = match &resp.id {
        RpcId::Number(n) => *n,
        _ => return,
    };
    match pending.remove(&id) {
        Some(Pending::Call(reply)) => {
            let _ = reply.send(resp.into_result().map_err(TransportError::Rpc));
        }
        Some(Pending::Subscribe { notify, reply }) => {
            let outcome = match resp.into_result() {
                Ok(Value::String(sub_id)) => {
                    subscriptions.insert(sub_id.clone(), notify);
                    Ok(Value::String(sub_id))
                }
                Ok(other) => Err(TransportError::Malformed(format!(
                    "unexpected subscription id {other}"
                ))),
                Err(e) => Err(TransportError::Rpc(e)),
            };
            let _ = reply.send(outcome);
        }
        None => debug!(id, "response for unknown request"),
    }
}
