//! In-memory lock API.
//!
//! Serves scripted lock states and activity logs. Used by the tests and by
//! the `replay` command, which feeds recorded log snapshots through the
//! poller without touching the network.

use crate::api::error::ApiError;
use crate::api::types::{ActivityLogEntry, LockCommand, LockState, LockStatus, SmartlockSummary};
use crate::api::LockApi;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    locks: Vec<SmartlockSummary>,
    statuses: HashMap<u64, LockState>,
    logs: HashMap<u64, Vec<ActivityLogEntry>>,
    failures: VecDeque<ApiError>,
    log_delays: VecDeque<std::time::Duration>,
    actions: Vec<(u64, LockCommand)>,
}

/// Lock API backed by memory.
#[derive(Debug, Default)]
pub struct MemoryLockApi {
    inner: Mutex<Inner>,
}

impl MemoryLockApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lock with a locked, connected status.
    pub fn with_lock(self, lock_id: u64, name: &str) -> Self {
        {
            let mut inner = self.lock_inner();
            inner.locks.push(SmartlockSummary {
                smartlock_id: lock_id,
                name: name.to_string(),
            });
            let mut state = LockState::unknown(lock_id, name);
            state.status = LockStatus::Locked;
            state.state_code = 1;
            state.state_name = crate::api::types::lock_state_name(1);
            state.connected = true;
            state.available = true;
            inner.statuses.insert(lock_id, state);
            inner.logs.entry(lock_id).or_default();
        }
        self
    }

    /// Replace the status served for a lock.
    pub fn set_status(&self, state: LockState) {
        self.lock_inner().statuses.insert(state.smartlock_id, state);
    }

    /// Replace the whole activity log of a lock.
    pub fn set_log(&self, lock_id: u64, entries: Vec<ActivityLogEntry>) {
        self.lock_inner().logs.insert(lock_id, entries);
    }

    /// Append one entry to a lock's activity log.
    pub fn push_log_entry(&self, entry: ActivityLogEntry) {
        self.lock_inner()
            .logs
            .entry(entry.smartlock_id)
            .or_default()
            .push(entry);
    }

    /// Make the next API call fail with `error`.
    pub fn fail_next(&self, error: ApiError) {
        self.lock_inner().failures.push_back(error);
    }

    /// Make the next activity log fetch take `delay` before answering.
    pub fn delay_next_log(&self, delay: std::time::Duration) {
        self.lock_inner().log_delays.push_back(delay);
    }

    /// Actions received so far, oldest first.
    pub fn sent_actions(&self) -> Vec<(u64, LockCommand)> {
        self.lock_inner().actions.clone()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(&self) -> Result<(), ApiError> {
        match self.lock_inner().failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn status_of(&self, lock_id: u64) -> Result<LockState, ApiError> {
        self.take_failure()?;
        let inner = self.lock_inner();
        let mut state = inner.statuses.get(&lock_id).cloned().ok_or(ApiError::Api {
            status: 404,
            message: format!("smartlock {lock_id} not found"),
        })?;
        state.available = true;
        state.last_update = Some(Utc::now());
        Ok(state)
    }

    fn log_of(&self, lock_id: u64, limit: usize) -> Result<Vec<ActivityLogEntry>, ApiError> {
        self.take_failure()?;
        let inner = self.lock_inner();
        let mut entries = inner.logs.get(&lock_id).cloned().ok_or(ApiError::Api {
            status: 404,
            message: format!("smartlock {lock_id} not found"),
        })?;
        // Newest first, like the real endpoint.
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        entries.truncate(limit);
        Ok(entries)
    }

    fn record_action(&self, lock_id: u64, command: LockCommand) -> Result<(), ApiError> {
        self.take_failure()?;
        let mut inner = self.lock_inner();
        if !inner.statuses.contains_key(&lock_id) {
            return Err(ApiError::Api {
                status: 404,
                message: format!("smartlock {lock_id} not found"),
            });
        }
        inner.actions.push((lock_id, command));
        Ok(())
    }
}

impl LockApi for MemoryLockApi {
    async fn list_locks(&self) -> Result<Vec<SmartlockSummary>, ApiError> {
        self.take_failure()?;
        Ok(self.lock_inner().locks.clone())
    }

    async fn get_lock_status(&self, lock_id: u64) -> Result<LockState, ApiError> {
        self.status_of(lock_id)
    }

    async fn get_activity_log(
        &self,
        lock_id: u64,
        limit: usize,
    ) -> Result<Vec<ActivityLogEntry>, ApiError> {
        let delay = self.lock_inner().log_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log_of(lock_id, limit)
    }

    async fn send_action(&self, lock_id: u64, command: LockCommand) -> Result<(), ApiError> {
        self.record_action(lock_id, command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(id: &str, secs: i64) -> ActivityLogEntry {
        ActivityLogEntry {
            id: id.to_string(),
            smartlock_id: 1,
            action: 1,
            trigger: 0,
            name: String::new(),
            date: Utc::now() + Duration::seconds(secs),
            source: 0,
            auth_id: String::new(),
            state: 0,
        }
    }

    #[tokio::test]
    async fn test_log_is_newest_first_and_limited() {
        let api = MemoryLockApi::new().with_lock(1, "Front Door");
        api.set_log(1, vec![entry("a", 0), entry("b", 10), entry("c", 5)]);

        let log = api.get_activity_log(1, 2).await.unwrap();
        let ids: Vec<&str> = log.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_scripted_failure_applies_once() {
        let api = MemoryLockApi::new().with_lock(1, "Front Door");
        api.fail_next(ApiError::Connectivity("offline".to_string()));

        assert!(api.get_lock_status(1).await.is_err());
        assert!(api.get_lock_status(1).await.is_ok());
    }

    #[tokio::test]
    async fn test_actions_are_recorded() {
        let api = MemoryLockApi::new().with_lock(1, "Front Door");
        api.send_action(1, LockCommand::Unlatch).await.unwrap();

        assert_eq!(api.sent_actions(), vec![(1, LockCommand::Unlatch)]);
        assert!(api.send_action(2, LockCommand::Lock).await.is_err());
    }
}
