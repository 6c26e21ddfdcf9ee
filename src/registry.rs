//! Latest lock states and recent events, shared with the HTTP server.

use crate::api::types::LockState;
use crate::core::event::AccessEvent;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Default number of events kept for display.
pub const DEFAULT_EVENT_CAPACITY: usize = 200;

#[derive(Debug, Default)]
struct RegistryInner {
    states: BTreeMap<u64, LockState>,
    events: VecDeque<AccessEvent>,
}

/// Entity/state store of the bridge.
///
/// Pollers publish after every tick; readers get clones.
#[derive(Debug)]
pub struct LockRegistry {
    inner: RwLock<RegistryInner>,
    event_capacity: usize,
}

/// Registry handle shared between pollers and the server.
pub type SharedRegistry = Arc<LockRegistry>;

impl LockRegistry {
    pub fn new(event_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            event_capacity: event_capacity.max(1),
        }
    }

    pub fn shared(event_capacity: usize) -> SharedRegistry {
        Arc::new(Self::new(event_capacity))
    }

    /// Store the latest state of a lock.
    pub async fn update_state(&self, state: LockState) {
        self.inner.write().await.states.insert(state.smartlock_id, state);
    }

    /// Append events, dropping the oldest beyond capacity.
    pub async fn record_events(&self, events: &[AccessEvent]) {
        if events.is_empty() {
            return;
        }
        let mut inner = self.inner.write().await;
        for event in events {
            if inner.events.len() == self.event_capacity {
                inner.events.pop_front();
            }
            inner.events.push_back(event.clone());
        }
    }

    /// All known locks ordered by id.
    pub async fn states(&self) -> Vec<LockState> {
        self.inner.read().await.states.values().cloned().collect()
    }

    pub async fn state(&self, lock_id: u64) -> Option<LockState> {
        self.inner.read().await.states.get(&lock_id).cloned()
    }

    /// Most recent events first, optionally only for one lock.
    pub async fn recent_events(&self, lock_id: Option<u64>, limit: usize) -> Vec<AccessEvent> {
        self.inner
            .read()
            .await
            .events
            .iter()
            .rev()
            .filter(|event| lock_id.map_or(true, |id| event.smartlock_id == id))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
