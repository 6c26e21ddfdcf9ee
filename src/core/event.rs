//! Domain events emitted for new activity log entries.

use crate::api::types::{ActivityLogEntry, Trigger};
use crate::core::attribution::{AccessMethod, AttributionResult, DetectionReason};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Event type for keypad and fingerprint accesses.
pub const EVENT_KEYPAD_ACTION: &str = "nuki_keypad_action";

/// Event type for accesses with the inside handle or a physical key.
pub const EVENT_MANUAL_ACTION: &str = "nuki_manual_action";

/// Event type for every other lock action (app, web, automatic, button).
pub const EVENT_LOCK_ACTION: &str = "nuki_lock_action";

/// Entity id of a lock as seen by the host.
pub fn entity_id(smartlock_id: u64) -> String {
    format!("lock.nuki_{smartlock_id}")
}

/// How a manual access was most likely performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualType {
    InsideHandle,
    ExternalKey,
    Unknown,
}

impl ManualType {
    /// Unlocks without an actor name come from a key turned outside; every
    /// other manual lock, unlock or unlatch is the inside handle.
    pub fn classify(entry: &ActivityLogEntry) -> Self {
        match entry.action {
            1 if entry.name.trim().is_empty() => ManualType::ExternalKey,
            1..=3 => ManualType::InsideHandle,
            _ => ManualType::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ManualType::InsideHandle => "inside_handle",
            ManualType::ExternalKey => "external_key",
            ManualType::Unknown => "unknown",
        }
    }
}

/// One user-facing event produced from a new log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    pub event_id: Uuid,
    pub event_type: &'static str,
    pub entity_id: String,
    pub smartlock_id: u64,
    /// Action code (1 unlock, 2 lock, 3 unlatch)
    pub action: u8,
    pub action_name: &'static str,
    /// Resolved user
    pub user: String,
    /// Actor name as reported by the API
    pub original_user_name: String,
    pub access_method: AccessMethod,
    /// Server timestamp of the entry (ISO-8601)
    pub timestamp: DateTime<Utc>,
    /// Local receipt time minus server timestamp
    pub time_diff_seconds: f64,
    pub trigger_type: u8,
    pub source: u8,
    pub auth_id: String,
    pub state: u8,
    pub detection_reason: DetectionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual_type: Option<ManualType>,
    pub sequence_number: usize,
    pub total_events: usize,
    /// Log entry the event was built from
    pub log_entry_id: String,
}

impl AccessEvent {
    /// Build the event for a log entry observed at `received_at`.
    pub fn new(
        entry: &ActivityLogEntry,
        attribution: AttributionResult,
        received_at: DateTime<Utc>,
    ) -> Self {
        let trigger = entry.trigger_kind();
        let (event_type, manual_type) = match trigger {
            Trigger::Keypad | Trigger::KeypadUser => (EVENT_KEYPAD_ACTION, None),
            Trigger::Manual => (EVENT_MANUAL_ACTION, Some(ManualType::classify(entry))),
            _ => (EVENT_LOCK_ACTION, None),
        };
        let time_diff_seconds =
            (received_at - entry.date).num_milliseconds() as f64 / 1000.0;

        Self {
            event_id: Uuid::new_v4(),
            event_type,
            entity_id: entity_id(entry.smartlock_id),
            smartlock_id: entry.smartlock_id,
            action: entry.action,
            action_name: entry.lock_action().name(),
            user: attribution.user,
            original_user_name: entry.name.clone(),
            access_method: attribution.access_method,
            timestamp: entry.date,
            time_diff_seconds,
            trigger_type: entry.trigger,
            source: entry.source,
            auth_id: entry.auth_id.clone(),
            state: entry.state,
            detection_reason: attribution.detection_reason,
            manual_type,
            sequence_number: attribution.sequence_number,
            total_events: attribution.total_events,
            log_entry_id: entry.id.clone(),
        }
    }

    /// One-line description for logs and the console.
    pub fn summary(&self) -> String {
        format!(
            "{} {} by {} via {} ({}, {}/{})",
            self.entity_id,
            self.action_name,
            self.user,
            self.access_method,
            self.detection_reason,
            self.sequence_number,
            self.total_events
        )
    }
}
