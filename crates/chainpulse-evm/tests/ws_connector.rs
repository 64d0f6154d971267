//! `WsConnector` against a local fake node.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use chainpulse_core::{ChainConnector, PulseError};
use chainpulse_evm::{WsConnector, WsConnectorConfig};

/// Serve one connection. After `eth_subscribe` the node pushes a malformed
/// head and blocks 100 and 101, then optionally hangs up.
async fn fake_node(hang_up_after_heads: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            let method = req["method"].as_str().unwrap_or_default().to_string();
            let result = match method.as_str() {
                "eth_subscribe" => json!("0xsub1"),
                "eth_getBlockByNumber" => json!({
                    "number": req["params"][0],
                    "timestamp": "0x6553f100",
                    "gasUsed": "0x5208",
                    "gasLimit": "0x1c9c380",
                    "transactions": ["0xaa"]
                }),
                "eth_getLogs" => json!([{
                    "address": "0x1111111111111111111111111111111111111111",
                    "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                    "data": "0x",
                    "blockNumber": "0x64",
                    "transactionHash": "0xaa",
                    "logIndex": "0x0"
                }]),
                _ => Value::Null,
            };
            let reply = json!({"jsonrpc": "2.0", "id": req["id"], "result": result});
            ws.send(Message::Text(reply.to_string().into())).await.unwrap();

            if method == "eth_subscribe" {
                for head in [json!({"hash": "0x0"}), json!({"number": "0x64"}), json!({"number": "0x65"})] {
                    let note = json!({
                        "jsonrpc": "2.0",
                        "method": "eth_subscription",
                        "params": {"subscription": "0xsub1", "result": head}
                    });
                    ws.send(Message::Text(note.to_string().into())).await.unwrap();
                }
                if hang_up_after_heads {
                    let _ = ws.close(None).await;
                    break;
                }
            }
        }
    });

    format!("ws://{addr}")
}

#[tokio::test]
async fn connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = WsConnector::connect(format!("ws://{addr}"), WsConnectorConfig::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, PulseError::Connection(_)));
}

#[tokio::test]
async fn request_response_calls() {
    let url = fake_node(false).await;
    let connector = WsConnector::connect(url, WsConnectorConfig::default())
        .await
        .unwrap();

    let block = connector.get_block(100).await.unwrap();
    assert_eq!(block.block_number, 100);
    assert_eq!(block.gas_used, 21_000);
    assert_eq!(block.transaction_count, 1);

    let err = connector.get_transaction_receipt("0xaa").await.unwrap_err();
    assert!(matches!(err, PulseError::NotFound(_)));

    assert!(connector.get_logs(100, &[]).await.unwrap().is_empty());
    let logs = connector
        .get_logs(100, &["0x1111111111111111111111111111111111111111".to_string()])
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].block_number, 100);
    assert!(connector.is_connected());
}

#[tokio::test]
async fn block_stream_skips_malformed_heads_and_ends_on_disconnect() {
    let url = fake_node(true).await;
    let connector = WsConnector::connect(url, WsConnectorConfig::default())
        .await
        .unwrap();

    let heads = connector.subscribe_new_blocks().await.unwrap();
    let numbers: Vec<u64> = tokio::time::timeout(Duration::from_secs(5), heads.collect())
        .await
        .unwrap();
    assert_eq!(numbers, vec![100, 101]);
}
