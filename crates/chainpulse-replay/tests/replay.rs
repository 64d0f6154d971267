//! Replay over stored history, against both storage backends.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use chainpulse_core::{Block, Event, EventStore};
use chainpulse_replay::{ReplayEngine, SessionRegistry};
use chainpulse_storage::{InMemoryStorage, SqliteStorage};

const TOKEN: &str = "0xabcdefabcdefabcdefabcdefabcdefabcdefabcd";

async fn seed(store: &dyn EventStore) {
    for n in [100u64, 101] {
        store
            .store_block(&Block {
                block_number: n,
                timestamp: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap(),
                transaction_count: 1,
                gas_used: 21_000,
                gas_limit: 30_000_000,
            })
            .await
            .unwrap();
    }
    let ts = Utc.timestamp_opt(1_700_000_100, 0).unwrap();
    store
        .store_event(&Event {
            id: None,
            contract_address: TOKEN.into(),
            event_name: "Transfer".into(),
            block_number: 100,
            transaction_hash: Some(format!("0x{}", "aa".repeat(32))),
            args: vec![json!("0x0"), json!("0x1"), json!("1000")],
            gas_used: Some(51_000),
            timestamp: ts,
            created_at: ts,
        })
        .await
        .unwrap();
}

async fn transfer_then_step(store: Arc<dyn EventStore>) {
    seed(store.as_ref()).await;
    let engine = ReplayEngine::new(store);

    let view = engine.load(TOKEN, 100, 101).await.unwrap();
    assert_eq!(view.current_block, 100);

    assert!(engine.step_forward().unwrap());
    assert_eq!(engine.current_block(), Some(101));

    let at_100 = engine.events_at(100).unwrap();
    assert_eq!(at_100.len(), 1);
    assert_eq!(at_100[0].event_name, "Transfer");
    assert!(engine.events_at(101).unwrap().is_empty());

    assert!(!engine.step_forward().unwrap());
    assert_eq!(engine.current_block(), Some(101));
}

#[tokio::test]
async fn transfer_then_step_memory() {
    transfer_then_step(Arc::new(InMemoryStorage::new())).await;
}

#[tokio::test]
async fn transfer_then_step_sqlite() {
    transfer_then_step(Arc::new(SqliteStorage::in_memory().await.unwrap())).await;
}

#[tokio::test]
async fn mixed_case_contract_loads_the_same_events() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryStorage::new());
    seed(store.as_ref()).await;
    let engine = ReplayEngine::new(store);
    engine
        .load("0xABCDEFabcdefABCDEFabcdefABCDEFabcdefABCD", 100, 101)
        .await
        .unwrap();
    assert_eq!(engine.events_at(100).unwrap().len(), 1);
}

#[tokio::test]
async fn sessions_are_independent() {
    let store: Arc<dyn EventStore> = Arc::new(InMemoryStorage::new());
    seed(store.as_ref()).await;
    let sessions = SessionRegistry::new(store);

    let (a, _) = sessions.create(TOKEN, 100, 101).await.unwrap();
    let (b, _) = sessions.create(TOKEN, 100, 101).await.unwrap();
    assert_ne!(a, b);

    sessions.get(&a).unwrap().seek(101).unwrap();
    assert_eq!(sessions.get(&a).unwrap().current_block(), Some(101));
    assert_eq!(sessions.get(&b).unwrap().current_block(), Some(100));
}
