//! Per-lock polling and state reconciliation.
//!
//! A [`LockPoller`] owns everything one lock needs between ticks: the ids of
//! entries already emitted, the recent entries the attributor looks at and
//! the last known lock state. Nothing is shared between locks.

use crate::api::error::ApiError;
use crate::api::types::{ActivityLogEntry, LockState};
use crate::api::LockApi;
use crate::config::Config;
use crate::core::attribution::{AttributionResult, Attributor};
use crate::core::event::AccessEvent;
use crate::core::seen::SeenEntrySet;
use crate::core::sequencing::sequence_batches;
use crate::sink::{EventSink, SinkError};
use chrono::{Duration, Utc};
use std::collections::HashSet;

/// Tuning of a poller, taken from the bridge configuration.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Entries fetched per tick
    pub log_limit: usize,
    /// Ids remembered per lock; never below four fetches worth
    pub seen_capacity: usize,
    /// Batch epsilon for sequence numbering
    pub batch_epsilon: Duration,
    pub enhanced_logging: bool,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_limit: config.log_limit,
            seen_capacity: config.seen_capacity,
            batch_epsilon: config.batch_epsilon(),
            enhanced_logging: config.enable_enhanced_logging,
        }
    }
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Why a tick did not complete.
#[derive(Debug)]
pub enum PollError {
    /// Fetching status or log failed; nothing was recorded
    Api(ApiError),
    /// The event consumer is gone; unemitted entries stay unseen
    Sink(SinkError),
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::Api(e) => write!(f, "{e}"),
            PollError::Sink(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PollError {}

impl From<ApiError> for PollError {
    fn from(e: ApiError) -> Self {
        PollError::Api(e)
    }
}

impl From<SinkError> for PollError {
    fn from(e: SinkError) -> Self {
        PollError::Sink(e)
    }
}

/// Outcome of one successful tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub lock_id: u64,
    /// This tick only recorded the existing log
    pub primed: bool,
    /// Distinct entries returned by the API
    pub fetched: usize,
    /// Events emitted, in emission order
    pub events: Vec<AccessEvent>,
    pub state: LockState,
}

/// Polling context of one lock.
pub struct LockPoller {
    lock_id: u64,
    settings: PollerSettings,
    attributor: Attributor,
    seen: SeenEntrySet,
    recent: Vec<ActivityLogEntry>,
    primed: bool,
    state: LockState,
}

impl LockPoller {
    /// Create a poller for one lock from the bridge configuration.
    pub fn new(lock_id: u64, name: impl Into<String>, config: &Config) -> Self {
        let attributor = Attributor::new(
            config.fingerprint_users.clone(),
            config.fingerprint_detection_window,
            config.fallback,
        )
        .with_enhanced_logging(config.enable_enhanced_logging);

        Self::with_parts(lock_id, name, PollerSettings::from_config(config), attributor)
    }

    pub fn with_parts(
        lock_id: u64,
        name: impl Into<String>,
        settings: PollerSettings,
        attributor: Attributor,
    ) -> Self {
        let capacity = settings.seen_capacity.max(settings.log_limit * 4);
        Self {
            lock_id,
            seen: SeenEntrySet::new(capacity),
            settings,
            attributor,
            recent: Vec::new(),
            primed: false,
            state: LockState::unknown(lock_id, name),
        }
    }

    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }

    /// Last known state; `available` is false after a failed tick.
    pub fn state(&self) -> &LockState {
        &self.state
    }

    /// Whether the first successful tick has recorded the existing log.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn seen(&self) -> &SeenEntrySet {
        &self.seen
    }

    /// Record that the lock could not be reached, e.g. after a tick was
    /// abandoned by its timeout.
    pub fn mark_unavailable(&mut self) {
        self.state.mark_unavailable();
    }

    /// Fetch, diff, attribute and emit.
    ///
    /// Every await happens before the first mutation, so a tick dropped at
    /// an await point (timeout, shutdown) leaves the poller untouched. The
    /// first successful tick records the existing log without emitting.
    pub async fn tick<A, S>(&mut self, api: &A, sink: &S) -> Result<TickReport, PollError>
    where
        A: LockApi,
        S: EventSink + ?Sized,
    {
        let fetched = async {
            let status = api.get_lock_status(self.lock_id).await?;
            let entries = api
                .get_activity_log(self.lock_id, self.settings.log_limit)
                .await?;
            Ok::<_, ApiError>((status, entries))
        }
        .await;

        let (status, entries) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.state.mark_unavailable();
                return Err(e.into());
            }
        };
        let received_at = Utc::now();

        let entries = chronological_distinct(entries);
        self.remember(&entries);
        self.state = status;

        if !self.primed {
            for entry in &entries {
                self.seen.insert(entry);
            }
            self.primed = true;
            tracing::info!(
                "Lock {}: recorded {} existing log entries",
                self.lock_id,
                entries.len()
            );
            return Ok(self.report(true, entries.len(), Vec::new()));
        }

        let new_entries: Vec<&ActivityLogEntry> =
            entries.iter().filter(|e| !self.seen.contains(e)).collect();

        if new_entries.is_empty() {
            if self.settings.enhanced_logging {
                tracing::debug!("Lock {}: no new log entries", self.lock_id);
            }
            return Ok(self.report(false, entries.len(), Vec::new()));
        }

        let mut attributions: Vec<AttributionResult> = new_entries
            .iter()
            .map(|entry| self.attributor.attribute(entry, &self.recent))
            .collect();

        let keys: Vec<_> = new_entries.iter().map(|e| (e.date, e.trigger)).collect();
        for (attribution, position) in attributions
            .iter_mut()
            .zip(sequence_batches(&keys, self.settings.batch_epsilon))
        {
            attribution.sequence_number = position.sequence_number;
            attribution.total_events = position.total_events;
        }

        tracing::info!(
            "Lock {}: {} new log entries to process",
            self.lock_id,
            new_entries.len()
        );

        let mut emitted = Vec::with_capacity(new_entries.len());
        for (entry, attribution) in new_entries.into_iter().zip(attributions) {
            let event = AccessEvent::new(entry, attribution, received_at);
            if self.settings.enhanced_logging {
                tracing::debug!(
                    "Lock {}: entry {} trigger={} source={} state={} -> {}",
                    self.lock_id,
                    entry.id,
                    entry.trigger,
                    entry.source,
                    entry.state,
                    event.summary()
                );
            }

            if let Err(e) = sink.emit(&event) {
                tracing::error!(
                    "Lock {}: could not emit event for entry {}: {}",
                    self.lock_id,
                    entry.id,
                    e
                );
                return Err(e.into());
            }
            self.seen.insert(entry);
            emitted.push(event);
        }

        Ok(self.report(false, entries.len(), emitted))
    }

    fn report(&self, primed: bool, fetched: usize, events: Vec<AccessEvent>) -> TickReport {
        TickReport {
            lock_id: self.lock_id,
            primed,
            fetched,
            events,
            state: self.state.clone(),
        }
    }

    /// Merge fetched entries into the attribution look-back and drop what is
    /// older than the detection window relative to the newest entry.
    fn remember(&mut self, entries: &[ActivityLogEntry]) {
        let known: HashSet<String> = self.recent.iter().map(|e| e.id.clone()).collect();
        self.recent.extend(
            entries
                .iter()
                .filter(|e| !known.contains(&e.id))
                .cloned(),
        );

        if let Some(newest) = self.recent.iter().map(|e| e.date).max() {
            let horizon = newest - self.attributor.window();
            self.recent.retain(|e| e.date >= horizon);
        }
        self.recent.sort_by_key(|e| e.date);

        let limit = self.seen.capacity();
        if self.recent.len() > limit {
            let excess = self.recent.len() - limit;
            self.recent.drain(..excess);
        }
    }
}

/// Sort ascending by server timestamp (API order breaks ties) and drop
/// repeated ids.
fn chronological_distinct(entries: Vec<ActivityLogEntry>) -> Vec<ActivityLogEntry> {
    let mut ids = HashSet::new();
    let mut entries: Vec<ActivityLogEntry> = entries
        .into_iter()
        .filter(|e| ids.insert(e.id.clone()))
        .collect();
    entries.sort_by_key(|e| e.date);
    entries
}
