//! Keypad access attribution.
//!
//! The API reports many keypad and fingerprint accesses with a generic actor
//! ("Nuki Keypad") instead of the person. The [`Attributor`] resolves the
//! most probable user with an ordered chain of rules; the first rule that
//! reaches a confident decision wins:
//!
//! 1. explicit source mapping from the configuration,
//! 2. a named keypad entry with the same auth id shortly before,
//! 3. the most frequent (or most recent) named user on the same source.
//!
//! When no rule decides, the user is reported as `Unknown`. Attribution never
//! fails and never mutates its inputs. Every window comparison uses the
//! server timestamps of the log entries, never the local clock.

use crate::api::types::{ActivityLogEntry, SOURCE_FINGERPRINT, SOURCE_PIN_CODE, TRIGGER_KEYPAD_USER};
use crate::config::{FallbackMode, FingerprintUserMap};
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

/// User name reported when no rule reaches a decision.
pub const UNKNOWN_USER: &str = "Unknown";

/// How the user authenticated at the keypad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMethod {
    PinCode,
    Fingerprint,
    Unknown,
}

impl AccessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::PinCode => "pin_code",
            AccessMethod::Fingerprint => "fingerprint",
            AccessMethod::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// Why a user was attributed to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionReason {
    ExplicitSourceMapping,
    AuthIdCorrelation,
    FrequencyAnalysis,
    RecentActivity,
    NoMatch,
    /// The API already named the user of a keypad-user entry
    TriggerWithUser,
    /// The API named the user of a plain keypad entry with this source
    SourceWithUser(u8),
    FailedAttempt,
    NotKeypad,
}

impl DetectionReason {
    pub fn as_str(&self) -> Cow<'static, str> {
        let name = match self {
            DetectionReason::ExplicitSourceMapping => "explicit_source_mapping",
            DetectionReason::AuthIdCorrelation => "auth_id_correlation",
            DetectionReason::FrequencyAnalysis => "frequency_analysis",
            DetectionReason::RecentActivity => "recent_activity",
            DetectionReason::NoMatch => "no_match",
            DetectionReason::TriggerWithUser => "trigger_255_with_user",
            DetectionReason::FailedAttempt => "failed_attempt",
            DetectionReason::NotKeypad => "not_keypad",
            DetectionReason::SourceWithUser(source) => {
                return Cow::Owned(format!("source_{source}_with_user"))
            }
        };
        Cow::Borrowed(name)
    }
}

impl std::fmt::Display for DetectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl Serialize for DetectionReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

/// Outcome of attributing one log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionResult {
    pub user: String,
    pub access_method: AccessMethod,
    pub detection_reason: DetectionReason,
    /// Position within the batch of near-simultaneous entries (1-based)
    pub sequence_number: usize,
    /// Size of that batch
    pub total_events: usize,
}

impl AttributionResult {
    fn new(user: impl Into<String>, access_method: AccessMethod, reason: DetectionReason) -> Self {
        Self {
            user: user.into(),
            access_method,
            detection_reason: reason,
            sequence_number: 1,
            total_events: 1,
        }
    }
}

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct AttributionInput<'a> {
    pub entry: &'a ActivityLogEntry,
    /// Recently observed entries of the same lock, any order
    pub recent: &'a [ActivityLogEntry],
    pub users: &'a FingerprintUserMap,
    pub window: Duration,
    pub fallback: FallbackMode,
}

impl<'a> AttributionInput<'a> {
    /// Named keypad entries strictly before this entry and inside the window.
    fn earlier_named_keypad_entries(&self) -> impl Iterator<Item = &'a ActivityLogEntry> + '_ {
        let entry = self.entry;
        let window = self.window;
        self.recent.iter().filter(move |other| {
            other.id != entry.id
                && other.is_keypad_action()
                && other.has_concrete_name()
                && !other.is_failed_attempt()
                && other.date < entry.date
                && entry.date - other.date <= window
        })
    }
}

/// A single attribution rule: a confident match or no decision.
pub type Rule = fn(&AttributionInput<'_>) -> Option<AttributionResult>;

/// Rules in precedence order.
pub const RULES: [Rule; 3] = [explicit_source_mapping, auth_id_correlation, source_activity];

/// The configured source mapping names the user.
pub fn explicit_source_mapping(input: &AttributionInput<'_>) -> Option<AttributionResult> {
    input.users.get(input.entry.source).map(|name| {
        AttributionResult::new(
            name,
            AccessMethod::Fingerprint,
            DetectionReason::ExplicitSourceMapping,
        )
    })
}

/// A named PIN-pad entry with the same credential happened just before: a
/// fingerprint right after a matching PIN is the same person.
pub fn auth_id_correlation(input: &AttributionInput<'_>) -> Option<AttributionResult> {
    let auth_id = input.entry.auth_id.as_str();
    if auth_id.is_empty() {
        return None;
    }

    input
        .earlier_named_keypad_entries()
        .filter(|other| {
            other.source == SOURCE_PIN_CODE
                && other.trigger == TRIGGER_KEYPAD_USER
                && other.auth_id == auth_id
        })
        .max_by_key(|other| other.date)
        .map(|other| {
            AttributionResult::new(
                other.name.trim(),
                AccessMethod::Fingerprint,
                DetectionReason::AuthIdCorrelation,
            )
        })
}

#[derive(Debug)]
struct Candidate<'a> {
    name: &'a str,
    count: usize,
    latest: DateTime<Utc>,
    map_position: Option<usize>,
}

/// Named users seen on the same source within the window.
pub fn source_activity(input: &AttributionInput<'_>) -> Option<AttributionResult> {
    let mut candidates: HashMap<&str, Candidate<'_>> = HashMap::new();
    for other in input
        .earlier_named_keypad_entries()
        .filter(|other| other.source == input.entry.source)
    {
        let name = other.name.trim();
        let candidate = candidates.entry(name).or_insert_with(|| Candidate {
            name,
            count: 0,
            latest: other.date,
            map_position: input.users.position_of_name(name),
        });
        candidate.count += 1;
        if other.date > candidate.latest {
            candidate.latest = other.date;
        }
    }

    let mut ranked: Vec<Candidate<'_>> = candidates.into_values().collect();
    ranked.sort_by(|a, b| {
        let primary = match input.fallback {
            FallbackMode::Frequency => b.count.cmp(&a.count),
            FallbackMode::Recency => Ordering::Equal,
        };
        primary
            .then_with(|| b.latest.cmp(&a.latest))
            .then_with(|| compare_map_position(a.map_position, b.map_position))
            .then_with(|| a.name.cmp(b.name))
    });

    let best = ranked.first()?;
    let reason = match input.fallback {
        FallbackMode::Frequency if best.count > 1 => DetectionReason::FrequencyAnalysis,
        _ => DetectionReason::RecentActivity,
    };
    Some(AttributionResult::new(
        best.name,
        AccessMethod::Fingerprint,
        reason,
    ))
}

/// Configured names first, in configuration order.
fn compare_map_position(a: Option<usize>, b: Option<usize>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Access method implied by the keypad source alone.
pub fn method_for_source(entry: &ActivityLogEntry) -> AccessMethod {
    match entry.source {
        SOURCE_FINGERPRINT => AccessMethod::Fingerprint,
        SOURCE_PIN_CODE => AccessMethod::PinCode,
        _ if entry.trigger == TRIGGER_KEYPAD_USER => AccessMethod::Fingerprint,
        _ => AccessMethod::PinCode,
    }
}

/// Resolves keypad users for one lock.
#[derive(Debug, Clone)]
pub struct Attributor {
    users: FingerprintUserMap,
    window: Duration,
    fallback: FallbackMode,
    enhanced_logging: bool,
}

impl Attributor {
    pub fn new(users: FingerprintUserMap, window: std::time::Duration, fallback: FallbackMode) -> Self {
        Self {
            users,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::seconds(120)),
            fallback,
            enhanced_logging: false,
        }
    }

    /// Log every rule decision at debug level.
    pub fn with_enhanced_logging(mut self, enabled: bool) -> Self {
        self.enhanced_logging = enabled;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether an entry needs the rule chain: a trigger-255 access from the
    /// PIN pad or the fingerprint sensor whose actor is not a real name.
    pub fn is_ambiguous(entry: &ActivityLogEntry) -> bool {
        entry.trigger == TRIGGER_KEYPAD_USER
            && matches!(entry.source, SOURCE_PIN_CODE | SOURCE_FINGERPRINT)
            && !entry.has_concrete_name()
            && !entry.is_failed_attempt()
    }

    /// Attribute any log entry. Ambiguous keypad entries go through the rule
    /// chain; everything else is described from the entry itself.
    pub fn attribute(
        &self,
        entry: &ActivityLogEntry,
        recent: &[ActivityLogEntry],
    ) -> AttributionResult {
        if !entry.is_keypad_action() {
            let user = if entry.has_concrete_name() {
                entry.name.trim()
            } else {
                UNKNOWN_USER
            };
            return AttributionResult::new(user, AccessMethod::Unknown, DetectionReason::NotKeypad);
        }

        if entry.is_failed_attempt() {
            return AttributionResult::new(
                UNKNOWN_USER,
                method_for_source(entry),
                DetectionReason::FailedAttempt,
            );
        }

        if entry.has_concrete_name() {
            let reason = if entry.trigger == TRIGGER_KEYPAD_USER {
                DetectionReason::TriggerWithUser
            } else {
                DetectionReason::SourceWithUser(entry.source)
            };
            return AttributionResult::new(entry.name.trim(), method_for_source(entry), reason);
        }

        if !Self::is_ambiguous(entry) {
            return AttributionResult::new(
                UNKNOWN_USER,
                method_for_source(entry),
                DetectionReason::NoMatch,
            );
        }

        self.resolve(entry, recent)
    }

    /// Run the rule chain for an ambiguous keypad entry.
    pub fn resolve(&self, entry: &ActivityLogEntry, recent: &[ActivityLogEntry]) -> AttributionResult {
        let input = AttributionInput {
            entry,
            recent,
            users: &self.users,
            window: self.window,
            fallback: self.fallback,
        };

        for rule in RULES {
            if let Some(result) = rule(&input) {
                if self.enhanced_logging {
                    tracing::debug!(
                        "Attributed entry {} (source {}) to {} via {}",
                        entry.id,
                        entry.source,
                        result.user,
                        result.detection_reason
                    );
                }
                return result;
            }
        }

        if self.enhanced_logging {
            tracing::debug!(
                "No attribution rule matched entry {} (source {}, auth id {})",
                entry.id,
                entry.source,
                short_auth_id(&entry.auth_id)
            );
        }

        AttributionResult::new(UNKNOWN_USER, method_for_source(entry), DetectionReason::NoMatch)
    }
}

/// Last eight characters of an auth id, enough to correlate log lines.
pub fn short_auth_id(auth_id: &str) -> &str {
    let start = auth_id
        .char_indices()
        .rev()
        .nth(7)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &auth_id[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap()
    }

    fn keypad(id: &str, secs: i64, source: u8, name: &str, auth_id: &str) -> ActivityLogEntry {
        ActivityLogEntry {
            id: id.to_string(),
            smartlock_id: 1,
            action: 3,
            trigger: 255,
            name: name.to_string(),
            date: base() + Duration::seconds(secs),
            source,
            auth_id: auth_id.to_string(),
            state: 0,
        }
    }

    fn attributor(users: FingerprintUserMap) -> Attributor {
        Attributor::new(users, std::time::Duration::from_secs(120), FallbackMode::Frequency)
    }

    #[test]
    fn test_explicit_mapping_wins_regardless_of_auth_id() {
        let users = FingerprintUserMap::from_pairs([(1, "Alice")]);
        let pin = keypad("p", 0, 1, "Bob", "auth-b");
        let entry = keypad("f", 10, 1, "Nuki Keypad", "auth-b");

        let result = attributor(users).resolve(&entry, &[pin]);
        assert_eq!(result.user, "Alice");
        assert_eq!(result.access_method, AccessMethod::Fingerprint);
        assert_eq!(result.detection_reason, DetectionReason::ExplicitSourceMapping);
    }

    #[test]
    fn test_auth_id_correlation() {
        let pin = keypad("p", 0, 1, "Bob", "auth-b");
        let other = keypad("o", 5, 2, "Carol", "auth-c");
        let entry = keypad("f", 30, 2, "Nuki Keypad", "auth-b");

        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &[pin, other]);
        assert_eq!(result.user, "Bob");
        assert_eq!(result.access_method, AccessMethod::Fingerprint);
        assert_eq!(result.detection_reason, DetectionReason::AuthIdCorrelation);
    }

    #[test]
    fn test_correlation_needs_a_pin_pad_entry() {
        let finger = keypad("p", 0, 2, "Bob", "auth-b");
        let entry = keypad("f", 30, 2, "Nuki Keypad", "auth-b");
        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &[finger]);
        // Same source, so the fallback still finds Bob, but not by credential.
        assert_eq!(result.user, "Bob");
        assert_ne!(result.detection_reason, DetectionReason::AuthIdCorrelation);
        assert_eq!(result.detection_reason, DetectionReason::RecentActivity);

        let mut plain = keypad("k", 0, 0, "Carol", "auth-c");
        plain.trigger = 4;
        let entry = keypad("f", 30, 2, "", "auth-c");
        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &[plain]);
        assert_eq!(result.user, UNKNOWN_USER);
        assert_eq!(result.detection_reason, DetectionReason::NoMatch);
    }

    #[test]
    fn test_only_pin_pad_and_fingerprint_entries_are_ambiguous() {
        assert!(Attributor::is_ambiguous(&keypad("a", 0, 1, "", "")));
        assert!(Attributor::is_ambiguous(&keypad("b", 0, 2, "Nuki Keypad", "")));
        assert!(!Attributor::is_ambiguous(&keypad("c", 0, 3, "", "")));

        let mut plain = keypad("d", 0, 2, "", "");
        plain.trigger = 4;
        assert!(!Attributor::is_ambiguous(&plain));

        // Not run through the rules even though Alice is mapped to source 2.
        let users = FingerprintUserMap::from_pairs([(2, "Alice")]);
        let result = attributor(users).attribute(&plain, &[]);
        assert_eq!(result.user, UNKNOWN_USER);
        assert_eq!(result.detection_reason, DetectionReason::NoMatch);
    }

    #[test]
    fn test_correlation_ignores_entries_outside_window_or_later() {
        let old = keypad("old", 0, 2, "Bob", "auth-b");
        let later = keypad("later", 400, 2, "Bob", "auth-b");
        let entry = keypad("f", 300, 2, "", "auth-b");

        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &[old, later]);
        assert_eq!(result.user, UNKNOWN_USER);
        assert_eq!(result.detection_reason, DetectionReason::NoMatch);
    }

    #[test]
    fn test_frequency_analysis_prefers_most_frequent() {
        let recent = vec![
            keypad("a1", 0, 2, "Alice", ""),
            keypad("a2", 10, 2, "Alice", ""),
            keypad("b1", 20, 2, "Bob", ""),
        ];
        let entry = keypad("f", 30, 2, "Nuki Keypad", "");

        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &recent);
        assert_eq!(result.user, "Alice");
        assert_eq!(result.detection_reason, DetectionReason::FrequencyAnalysis);
    }

    #[test]
    fn test_single_occurrences_fall_back_to_recency() {
        let recent = vec![keypad("a", 0, 2, "Alice", ""), keypad("b", 20, 2, "Bob", "")];
        let entry = keypad("f", 30, 2, "Nuki Keypad", "");

        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &recent);
        assert_eq!(result.user, "Bob");
        assert_eq!(result.detection_reason, DetectionReason::RecentActivity);
    }

    #[test]
    fn test_recency_mode_ignores_frequency() {
        let recent = vec![
            keypad("a1", 0, 2, "Alice", ""),
            keypad("a2", 10, 2, "Alice", ""),
            keypad("b1", 20, 2, "Bob", ""),
        ];
        let entry = keypad("f", 30, 2, "", "");
        let attributor = Attributor::new(
            FingerprintUserMap::default(),
            std::time::Duration::from_secs(120),
            FallbackMode::Recency,
        );

        let result = attributor.resolve(&entry, &recent);
        assert_eq!(result.user, "Bob");
        assert_eq!(result.detection_reason, DetectionReason::RecentActivity);
    }

    #[test]
    fn test_ties_use_mapping_order() {
        // Same count, same timestamp: the name configured first wins.
        let users = FingerprintUserMap::from_pairs([(5, "Zoe"), (6, "Adam")]);
        let recent = vec![keypad("a", 0, 2, "Adam", ""), keypad("z", 0, 2, "Zoe", "")];
        let entry = keypad("f", 30, 2, "", "");

        let result = attributor(users).resolve(&entry, &recent);
        assert_eq!(result.user, "Zoe");
    }

    #[test]
    fn test_other_sources_are_not_candidates() {
        let recent = vec![keypad("a", 0, 1, "Alice", "")];
        let entry = keypad("f", 30, 2, "", "");

        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &recent);
        assert_eq!(result.user, UNKNOWN_USER);
        assert_eq!(result.access_method, AccessMethod::Fingerprint);
    }

    #[test]
    fn test_no_match_method_from_source() {
        let entry = keypad("f", 30, 1, "Nuki Keypad", "");
        let result = attributor(FingerprintUserMap::default()).resolve(&entry, &[]);

        assert_eq!(result.user, UNKNOWN_USER);
        assert_eq!(result.access_method, AccessMethod::PinCode);
        assert_eq!(result.detection_reason, DetectionReason::NoMatch);
    }

    #[test]
    fn test_attribute_named_failed_and_manual_entries() {
        let attributor = attributor(FingerprintUserMap::default());

        let named = keypad("n", 0, 1, "Alice", "");
        let result = attributor.attribute(&named, &[]);
        assert_eq!(result.user, "Alice");
        assert_eq!(result.access_method, AccessMethod::PinCode);
        assert_eq!(result.detection_reason, DetectionReason::TriggerWithUser);

        let mut plain = keypad("p", 0, 2, "Carol", "");
        plain.trigger = 4;
        let result = attributor.attribute(&plain, &[]);
        assert_eq!(result.detection_reason, DetectionReason::SourceWithUser(2));
        assert_eq!(result.detection_reason.to_string(), "source_2_with_user");

        let mut failed = keypad("x", 0, 2, "Nuki Keypad", "");
        failed.state = 225;
        let result = attributor.attribute(&failed, &[]);
        assert_eq!(result.user, UNKNOWN_USER);
        assert_eq!(result.detection_reason, DetectionReason::FailedAttempt);

        let mut manual = keypad("m", 0, 0, "", "");
        manual.trigger = 1;
        let result = attributor.attribute(&manual, &[]);
        assert_eq!(result.access_method, AccessMethod::Unknown);
        assert_eq!(result.detection_reason, DetectionReason::NotKeypad);
    }

    #[test]
    fn test_rules_are_individually_undecided_on_empty_input() {
        let users = FingerprintUserMap::default();
        let entry = keypad("f", 0, 2, "", "");
        let input = AttributionInput {
            entry: &entry,
            recent: &[],
            users: &users,
            window: Duration::seconds(120),
            fallback: FallbackMode::Frequency,
        };

        for rule in RULES {
            assert!(rule(&input).is_none());
        }
    }

    #[test]
    fn test_short_auth_id() {
        assert_eq!(short_auth_id("0123456789abcdef"), "89abcdef");
        assert_eq!(short_auth_id("abc"), "abc");
    }

    #[test]
    fn test_reason_serializes_as_tag() {
        let json = serde_json::to_string(&DetectionReason::AuthIdCorrelation).unwrap();
        assert_eq!(json, r#""auth_id_correlation""#);
    }
}
