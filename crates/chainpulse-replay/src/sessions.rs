//! Replay sessions keyed by UUID, one [`ReplayEngine`] each.
//!
//! Sessions idle longer than the idle timeout expire. When the registry is
//! full, creating a session evicts the least recently used one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use chainpulse_core::error::PulseError;
use chainpulse_core::store::EventStore;

use crate::engine::{ReplayEngine, ReplayView};

pub const DEFAULT_MAX_SESSIONS: usize = 64;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

struct Session {
    engine: Arc<ReplayEngine>,
    last_used: Instant,
}

/// Live replay sessions over a shared store.
pub struct SessionRegistry {
    store: Arc<dyn EventStore>,
    max_sessions: usize,
    idle_timeout: Duration,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_limits(store, DEFAULT_MAX_SESSIONS, DEFAULT_IDLE_TIMEOUT)
    }

    pub fn with_limits(store: Arc<dyn EventStore>, max_sessions: usize, idle_timeout: Duration) -> Self {
        Self {
            store,
            max_sessions: max_sessions.max(1),
            idle_timeout,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Load a range into a new engine and register it.
    ///
    /// Nothing is registered if the load fails.
    pub async fn create(
        &self,
        contract: &str,
        start_block: u64,
        end_block: u64,
    ) -> Result<(Uuid, ReplayView), PulseError> {
        let engine = ReplayEngine::new(Arc::clone(&self.store));
        let view = engine.load(contract, start_block, end_block).await?;
        let id = Uuid::new_v4();

        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap();
        self.expire_idle(&mut sessions, now);
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| *id)
            else {
                break;
            };
            close(&mut sessions, &oldest, "evicted");
        }
        sessions.insert(
            id,
            Session {
                engine: Arc::new(engine),
                last_used: now,
            },
        );
        info!(session = %id, contract = %view.contract_address, "replay session created");
        Ok((id, view))
    }

    /// Look up a session and mark it used. Expired sessions are dropped.
    pub fn get(&self, id: &Uuid) -> Option<Arc<ReplayEngine>> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap();
        let last_used = sessions.get(id)?.last_used;
        if now.duration_since(last_used) > self.idle_timeout {
            close(&mut sessions, id, "expired");
            return None;
        }
        let session = sessions.get_mut(id)?;
        session.last_used = now;
        Some(Arc::clone(&session.engine))
    }

    /// Drop a session, cancelling its playback. Returns `true` if it existed.
    pub fn remove(&self, id: &Uuid) -> bool {
        close(&mut self.sessions.write().unwrap(), id, "closed")
    }

    /// Drop every session idle longer than the timeout. Returns how many.
    pub fn prune_idle(&self) -> usize {
        self.expire_idle(&mut self.sessions.write().unwrap(), Instant::now())
    }

    fn expire_idle(&self, sessions: &mut HashMap<Uuid, Session>, now: Instant) -> usize {
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_used) > self.idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            close(sessions, id, "expired");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn close(sessions: &mut HashMap<Uuid, Session>, id: &Uuid, reason: &str) -> bool {
    let Some(session) = sessions.remove(id) else {
        return false;
    };
    session.engine.pause();
    info!(session = %id, reason, "replay session closed");
    true
}
