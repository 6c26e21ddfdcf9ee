//! Offline replay of a recorded activity log.
//!
//! Entries are fed to a [`LockPoller`] as if they had arrived live: grouped
//! into scan intervals, one tick per group, after an empty priming tick. This
//! makes it possible to check attribution settings against a real log export
//! without touching the API.

use crate::api::types::ActivityLogEntry;
use crate::api::MemoryLockApi;
use crate::config::Config;
use crate::core::event::AccessEvent;
use crate::core::poller::{LockPoller, PollError};
use crate::sink::EventSink;
use chrono::Duration;

/// Read a JSON array of log entries as returned by `/smartlock/{id}/log`.
pub fn load_entries(path: &std::path::Path) -> Result<Vec<ActivityLogEntry>, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}

/// Replay `entries` of one lock and return the emitted events.
pub async fn replay<S: EventSink + ?Sized>(
    mut entries: Vec<ActivityLogEntry>,
    lock_id: u64,
    config: &Config,
    sink: &S,
) -> Result<Vec<AccessEvent>, PollError> {
    entries.retain(|e| e.smartlock_id == lock_id);
    entries.sort_by_key(|e| e.date);

    let config = Config {
        log_limit: config.log_limit.max(entries.len()).max(1),
        ..config.clone()
    };
    let api = MemoryLockApi::new().with_lock(lock_id, "Replay");

    let mut poller = LockPoller::new(lock_id, "Replay", &config);
    poller.tick(&api, sink).await?;

    let interval = Duration::from_std(config.scan_interval).unwrap_or_else(|_| Duration::seconds(30));
    let mut events = Vec::new();
    let mut pending = entries.into_iter().peekable();
    while let Some(first) = pending.next() {
        let group_end = first.date + interval;
        api.push_log_entry(first);
        while let Some(next) = pending.next_if(|e| e.date < group_end) {
            api.push_log_entry(next);
        }
        events.extend(poller.tick(&api, sink).await?.events);
    }

    tracing::info!("Replayed lock {}: {} events", lock_id, events.len());
    Ok(events)
}
