//! Per-key state diff between two contract snapshots.
//!
//! A missing snapshot is not an error: its side is reported as
//! [`SnapshotState::Unknown`] and every key seen on the other side becomes a
//! [`ChangeKind::Unknown`] change.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainpulse_core::error::PulseError;
use chainpulse_core::store::EventStore;
use chainpulse_core::types::{normalize_address, ContractStateSnapshot};

/// Whether a snapshot was available for one side of the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotState {
    Known,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
    /// One side has no snapshot.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChange {
    pub key: String,
    pub kind: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDiff {
    pub contract_address: String,
    pub from_block: u64,
    pub to_block: u64,
    pub from_state: SnapshotState,
    pub to_state: SnapshotState,
    /// Sorted by key. Unchanged keys are omitted.
    pub changes: Vec<KeyChange>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Fetch both snapshots from `store` and diff them.
pub async fn diff_snapshots(
    store: &dyn EventStore,
    contract: &str,
    from_block: u64,
    to_block: u64,
) -> Result<StateDiff, PulseError> {
    let contract = normalize_address(contract)?;
    let from = store.get_snapshot(&contract, from_block).await?;
    let to = store.get_snapshot(&contract, to_block).await?;
    Ok(compute_diff(
        &contract,
        from_block,
        to_block,
        from.as_ref(),
        to.as_ref(),
    ))
}

/// Compare two optional snapshots key by key.
pub fn compute_diff(
    contract: &str,
    from_block: u64,
    to_block: u64,
    from: Option<&ContractStateSnapshot>,
    to: Option<&ContractStateSnapshot>,
) -> StateDiff {
    let state = |s: Option<&ContractStateSnapshot>| {
        if s.is_some() {
            SnapshotState::Known
        } else {
            SnapshotState::Unknown
        }
    };

    let keys: BTreeSet<&String> = from
        .into_iter()
        .chain(to)
        .flat_map(|s| s.state_data.keys())
        .collect();

    let changes = keys
        .into_iter()
        .filter_map(|key| {
            let before = from.and_then(|s| s.state_data.get(key)).cloned();
            let after = to.and_then(|s| s.state_data.get(key)).cloned();
            let kind = if from.is_none() || to.is_none() {
                ChangeKind::Unknown
            } else {
                match (&before, &after) {
                    (None, Some(_)) => ChangeKind::Added,
                    (Some(_), None) => ChangeKind::Removed,
                    (Some(b), Some(a)) if b != a => ChangeKind::Modified,
                    _ => return None,
                }
            };
            Some(KeyChange {
                key: key.clone(),
                kind,
                before,
                after,
            })
        })
        .collect();

    StateDiff {
        contract_address: contract.to_string(),
        from_block,
        to_block,
        from_state: state(from),
        to_state: state(to),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    const TOKEN: &str = "0x1111111111111111111111111111111111111111";

    fn snapshot(block: u64, state: Value) -> ContractStateSnapshot {
        ContractStateSnapshot {
            contract_address: TOKEN.into(),
            block_number: block,
            state_data: state.as_object().cloned().unwrap(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn classifies_changes() {
        let from = snapshot(1, json!({"owner": "0xa", "supply": "100", "paused": false}));
        let to = snapshot(2, json!({"owner": "0xa", "supply": "150", "cap": "1000"}));
        let diff = compute_diff(TOKEN, 1, 2, Some(&from), Some(&to));

        assert_eq!(diff.from_state, SnapshotState::Known);
        let kinds: Vec<(&str, ChangeKind)> = diff
            .changes
            .iter()
            .map(|c| (c.key.as_str(), c.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("cap", ChangeKind::Added),
                ("paused", ChangeKind::Removed),
                ("supply", ChangeKind::Modified),
            ]
        );
        assert_eq!(diff.changes[2].before, Some(json!("100")));
        assert_eq!(diff.changes[2].after, Some(json!("150")));
    }

    #[test]
    fn missing_side_is_unknown() {
        let to = snapshot(9, json!({"supply": "1"}));
        let diff = compute_diff(TOKEN, 3, 9, None, Some(&to));
        assert_eq!(diff.from_state, SnapshotState::Unknown);
        assert_eq!(diff.to_state, SnapshotState::Known);
        assert_eq!(diff.changes.len(), 1);
        assert_eq!(diff.changes[0].kind, ChangeKind::Unknown);
        assert_eq!(diff.changes[0].before, None);

        let neither = compute_diff(TOKEN, 3, 9, None, None);
        assert!(neither.is_empty());
        assert_eq!(neither.to_state, SnapshotState::Unknown);
    }

    #[test]
    fn identical_snapshots_have_no_changes() {
        let a = snapshot(1, json!({"x": [1, 2]}));
        let b = snapshot(2, json!({"x": [1, 2]}));
        assert!(compute_diff(TOKEN, 1, 2, Some(&a), Some(&b)).is_empty());
    }

    #[test]
    fn serializes_lowercase_kinds() {
        let to = snapshot(2, json!({"k": 1}));
        let diff = compute_diff(TOKEN, 1, 2, None, Some(&to));
        let v = serde_json::to_value(&diff).unwrap();
        assert_eq!(v["fromState"], json!("unknown"));
        assert_eq!(v["changes"][0]["kind"], json!("unknown"));
    }
}
