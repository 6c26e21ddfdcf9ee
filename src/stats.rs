//! Bridge statistics.
//!
//! Counters are updated by every poller task and persisted as JSON in the
//! data directory so `nuki-bridge stats` can show cumulative numbers.

use crate::core::attribution::DetectionReason;
use crate::core::poller::TickReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Latency samples kept for the running summary.
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Runtime statistics of the bridge.
#[derive(Debug)]
pub struct BridgeStats {
    /// Ticks that fetched status and log
    successful_ticks: AtomicU64,
    /// Ticks that failed or timed out
    failed_ticks: AtomicU64,
    /// Entries recorded without an event on the first tick
    primed_entries: AtomicU64,
    /// Events handed to the sink
    emitted_events: AtomicU64,
    /// Ambiguous keypad entries a rule resolved
    attributed_events: AtomicU64,
    /// Ambiguous keypad entries left as unknown
    unresolved_events: AtomicU64,
    /// Receipt delay of emitted events (seconds)
    latencies: Mutex<VecDeque<f64>>,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

/// Stats handle shared by the poller tasks.
pub type SharedBridgeStats = Arc<BridgeStats>;

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            successful_ticks: AtomicU64::new(0),
            failed_ticks: AtomicU64::new(0),
            primed_entries: AtomicU64::new(0),
            emitted_events: AtomicU64::new(0),
            attributed_events: AtomicU64::new(0),
            unresolved_events: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::new()),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create statistics persisted at `path`, continuing previous counts.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous bridge stats: {}", e);
        }

        stats
    }

    /// Record the outcome of a successful tick.
    pub fn record_tick(&self, report: &TickReport) {
        self.successful_ticks.fetch_add(1, Ordering::Relaxed);
        if report.primed {
            self.primed_entries
                .fetch_add(report.fetched as u64, Ordering::Relaxed);
        }
        self.emitted_events
            .fetch_add(report.events.len() as u64, Ordering::Relaxed);

        for event in &report.events {
            match event.detection_reason {
                DetectionReason::ExplicitSourceMapping
                | DetectionReason::AuthIdCorrelation
                | DetectionReason::FrequencyAnalysis
                | DetectionReason::RecentActivity => {
                    self.attributed_events.fetch_add(1, Ordering::Relaxed);
                }
                DetectionReason::NoMatch => {
                    self.unresolved_events.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }

        if !report.events.is_empty() {
            let mut latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
            for event in &report.events {
                if latencies.len() == MAX_LATENCY_SAMPLES {
                    latencies.pop_front();
                }
                latencies.push_back(event.time_diff_seconds);
            }
        }
    }

    /// Record a failed or timed out tick.
    pub fn record_failure(&self) {
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean and standard deviation of recent receipt delays.
    pub fn latency(&self) -> LatencySummary {
        let latencies = self.latencies.lock().unwrap_or_else(|e| e.into_inner());
        let count = latencies.len();
        if count == 0 {
            return LatencySummary::default();
        }

        let mean = latencies.iter().mean();
        let std_dev = if count > 1 {
            latencies.iter().std_dev()
        } else {
            0.0
        };
        LatencySummary {
            samples: count,
            mean_seconds: mean,
            std_dev_seconds: std_dev,
        }
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            successful_ticks: self.successful_ticks.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
            primed_entries: self.primed_entries.load(Ordering::Relaxed),
            emitted_events: self.emitted_events.load(Ordering::Relaxed),
            attributed_events: self.attributed_events.load(Ordering::Relaxed),
            unresolved_events: self.unresolved_events.load(Ordering::Relaxed),
            latency: self.latency(),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Bridge Statistics:\n\
             - Successful polls: {}\n\
             - Failed polls: {}\n\
             - Entries recorded at startup: {}\n\
             - Events emitted: {}\n\
             - Keypad users attributed: {}\n\
             - Keypad users unresolved: {}\n\
             - Event delay: {:.1}s mean, {:.1}s std dev ({} samples)\n\
             - Session duration: {} seconds",
            stats.successful_ticks,
            stats.failed_ticks,
            stats.primed_entries,
            stats.emitted_events,
            stats.attributed_events,
            stats.unresolved_events,
            stats.latency.mean_seconds,
            stats.latency.std_dev_seconds,
            stats.latency.samples,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                successful_ticks: stats.successful_ticks,
                failed_ticks: stats.failed_ticks,
                primed_entries: stats.primed_entries,
                emitted_events: stats.emitted_events,
                attributed_events: stats.attributed_events,
                unresolved_events: stats.unresolved_events,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let persisted = read_persisted(path)?;
                self.successful_ticks
                    .store(persisted.successful_ticks, Ordering::Relaxed);
                self.failed_ticks
                    .store(persisted.failed_ticks, Ordering::Relaxed);
                self.primed_entries
                    .store(persisted.primed_entries, Ordering::Relaxed);
                self.emitted_events
                    .store(persisted.emitted_events, Ordering::Relaxed);
                self.attributed_events
                    .store(persisted.attributed_events, Ordering::Relaxed);
                self.unresolved_events
                    .store(persisted.unresolved_events, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean and spread of event receipt delays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub mean_seconds: f64,
    pub std_dev_seconds: f64,
}

/// Snapshot of bridge statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatsSnapshot {
    pub successful_ticks: u64,
    pub failed_ticks: u64,
    pub primed_entries: u64,
    pub emitted_events: u64,
    pub attributed_events: u64,
    pub unresolved_events: u64,
    pub latency: LatencySummary,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedStats {
    pub successful_ticks: u64,
    pub failed_ticks: u64,
    pub primed_entries: u64,
    pub emitted_events: u64,
    pub attributed_events: u64,
    pub unresolved_events: u64,
    pub last_updated: DateTime<Utc>,
}

/// Read persisted stats written by a previous run.
pub fn read_persisted(path: &std::path::Path) -> Result<PersistedStats, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(std::io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{ActivityLogEntry, LockState};
    use crate::core::attribution::{AccessMethod, AttributionResult};
    use crate::core::event::AccessEvent;
    use chrono::Duration;

    fn event(reason: DetectionReason, delay_secs: i64) -> AccessEvent {
        let entry = ActivityLogEntry {
            id: "1".to_string(),
            smartlock_id: 1,
            action: 3,
            trigger: 255,
            name: "Nuki Keypad".to_string(),
            date: Utc::now(),
            source: 2,
            auth_id: String::new(),
            state: 0,
        };
        let attribution = AttributionResult {
            user: "Alice".to_string(),
            access_method: AccessMethod::Fingerprint,
            detection_reason: reason,
            sequence_number: 1,
            total_events: 1,
        };
        AccessEvent::new(&entry, attribution, entry.date + Duration::seconds(delay_secs))
    }

    fn report(primed: bool, fetched: usize, events: Vec<AccessEvent>) -> TickReport {
        TickReport {
            lock_id: 1,
            primed,
            fetched,
            events,
            state: LockState::unknown(1, "Front Door"),
        }
    }

    #[test]
    fn test_counters() {
        let stats = BridgeStats::new();
        stats.record_tick(&report(true, 5, Vec::new()));
        stats.record_tick(&report(
            false,
            6,
            vec![
                event(DetectionReason::ExplicitSourceMapping, 2),
                event(DetectionReason::NoMatch, 4),
                event(DetectionReason::NotKeypad, 6),
            ],
        ));
        stats.record_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.successful_ticks, 2);
        assert_eq!(snapshot.failed_ticks, 1);
        assert_eq!(snapshot.primed_entries, 5);
        assert_eq!(snapshot.emitted_events, 3);
        assert_eq!(snapshot.attributed_events, 1);
        assert_eq!(snapshot.unresolved_events, 1);
    }

    #[test]
    fn test_latency_summary() {
        let stats = BridgeStats::new();
        assert_eq!(stats.latency().samples, 0);

        stats.record_tick(&report(
            false,
            2,
            vec![
                event(DetectionReason::NotKeypad, 2),
                event(DetectionReason::NotKeypad, 4),
            ],
        ));
        let latency = stats.latency();
        assert_eq!(latency.samples, 2);
        assert!((latency.mean_seconds - 3.0).abs() < 1e-9);
        assert!(latency.std_dev_seconds > 0.0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("nuki-bridge-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");
        let stats = BridgeStats::with_persistence(path.clone());
        stats.record_failure();
        stats.save().unwrap();

        let reloaded = BridgeStats::with_persistence(path.clone());
        assert_eq!(reloaded.snapshot().failed_ticks, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
