//! Data types exchanged with the Nuki Web API.
//!
//! Wire structs mirror the camelCase JSON of the API; the domain types built
//! from them are what the rest of the crate works with.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Trigger code the API uses for keypad and fingerprint accesses.
pub const TRIGGER_KEYPAD_USER: u8 = 255;

/// Keypad source number of the PIN pad.
pub const SOURCE_PIN_CODE: u8 = 1;

/// Keypad source number of the fingerprint sensor.
pub const SOURCE_FINGERPRINT: u8 = 2;

/// Log state code for a wrong keypad code.
pub const STATE_WRONG_PIN: u8 = 224;

/// Log state code for an unrecognised fingerprint.
pub const STATE_WRONG_FINGERPRINT: u8 = 225;

/// One immutable record of a lock's activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    /// Log entry identifier
    pub id: String,
    /// Lock the entry belongs to
    pub smartlock_id: u64,
    /// Raw action code (1 unlock, 2 lock, 3 unlatch, ...)
    pub action: u8,
    /// Raw trigger code (0 system, 1 manual, ..., 255 keypad)
    pub trigger: u8,
    /// Raw actor name as reported by the API
    #[serde(default)]
    pub name: String,
    /// Server-side timestamp of the access
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub date: DateTime<Utc>,
    /// Keypad source number (1 PIN pad, 2 fingerprint sensor)
    #[serde(default)]
    pub source: u8,
    /// Upstream credential identifier
    #[serde(default)]
    pub auth_id: String,
    /// Raw result state code
    #[serde(default)]
    pub state: u8,
}

impl ActivityLogEntry {
    pub fn lock_action(&self) -> LockAction {
        LockAction::from_code(self.action)
    }

    pub fn trigger_kind(&self) -> Trigger {
        Trigger::from_code(self.trigger)
    }

    /// Entry produced by the keypad (PIN pad or fingerprint sensor).
    pub fn is_keypad_action(&self) -> bool {
        matches!(self.trigger_kind(), Trigger::Keypad | Trigger::KeypadUser)
    }

    /// Whether the actor name identifies a real person.
    pub fn has_concrete_name(&self) -> bool {
        is_concrete_name(&self.name)
    }

    /// Keypad entry that was rejected by the lock.
    pub fn is_failed_attempt(&self) -> bool {
        self.state == STATE_WRONG_PIN || self.state == STATE_WRONG_FINGERPRINT
    }
}

/// Whether an actor name identifies a real person rather than a device or a
/// placeholder.
pub fn is_concrete_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name != "Unknown" && name != "Nuki Keypad" && !name.contains("Nuki Web")
}

/// Classified lock action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAction {
    Unlock,
    Lock,
    Unlatch,
    Other(u8),
}

impl LockAction {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => LockAction::Unlock,
            2 => LockAction::Lock,
            3 => LockAction::Unlatch,
            other => LockAction::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            LockAction::Unlock => 1,
            LockAction::Lock => 2,
            LockAction::Unlatch => 3,
            LockAction::Other(code) => *code,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LockAction::Unlock => "unlock",
            LockAction::Lock => "lock",
            LockAction::Unlatch => "unlatch",
            LockAction::Other(4) => "lock_n_go",
            LockAction::Other(5) => "lock_n_go_with_unlatch",
            LockAction::Other(_) => "other",
        }
    }
}

/// What caused a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    System,
    Manual,
    Button,
    Automatic,
    Keypad,
    KeypadUser,
    Other(u8),
}

impl Trigger {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Trigger::System,
            1 => Trigger::Manual,
            2 => Trigger::Button,
            3 => Trigger::Automatic,
            4 => Trigger::Keypad,
            TRIGGER_KEYPAD_USER => Trigger::KeypadUser,
            other => Trigger::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trigger::System => "web/api",
            Trigger::Manual => "manual",
            Trigger::Button => "button",
            Trigger::Automatic => "automatic",
            Trigger::Keypad => "keypad",
            Trigger::KeypadUser => "keypad_user",
            Trigger::Other(_) => "unknown",
        }
    }
}

/// Commands the API accepts on `/smartlock/{id}/action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockCommand {
    Unlock,
    Lock,
    Unlatch,
    LockNGo,
    LockNGoWithUnlatch,
}

impl LockCommand {
    pub fn code(&self) -> u8 {
        match self {
            LockCommand::Unlock => 1,
            LockCommand::Lock => 2,
            LockCommand::Unlatch => 3,
            LockCommand::LockNGo => 4,
            LockCommand::LockNGoWithUnlatch => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LockCommand::Unlock => "unlock",
            LockCommand::Lock => "lock",
            LockCommand::Unlatch => "unlatch",
            LockCommand::LockNGo => "lock_n_go",
            LockCommand::LockNGoWithUnlatch => "lock_n_go_with_unlatch",
        }
    }
}

/// Coarse lock status exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    Locked,
    Unlocked,
    Unknown,
}

impl LockStatus {
    pub fn from_state_code(code: u8) -> Self {
        match code {
            1 => LockStatus::Locked,
            3 | 5 | 6 => LockStatus::Unlocked,
            _ => LockStatus::Unknown,
        }
    }
}

/// Human readable name of a lock state code.
pub fn lock_state_name(code: u8) -> String {
    match code {
        0 => "uncalibrated".to_string(),
        1 => "locked".to_string(),
        2 => "unlocking".to_string(),
        3 => "unlocked".to_string(),
        4 => "locking".to_string(),
        5 => "unlatched".to_string(),
        6 => "unlocked (lock 'n' go)".to_string(),
        7 => "unlatching".to_string(),
        254 => "motor blocked".to_string(),
        255 => "undefined".to_string(),
        other => format!("unknown({other})"),
    }
}

/// Door sensor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Unavailable,
    Deactivated,
    Closed,
    Opened,
    Unknown,
    Calibrating,
}

impl DoorState {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => DoorState::Unavailable,
            1 => DoorState::Deactivated,
            2 => DoorState::Closed,
            3 => DoorState::Opened,
            5 => DoorState::Calibrating,
            _ => DoorState::Unknown,
        }
    }

    /// `Some(true)` when open, `Some(false)` when closed, `None` otherwise.
    pub fn is_open(&self) -> Option<bool> {
        match self {
            DoorState::Opened => Some(true),
            DoorState::Closed => Some(false),
            _ => None,
        }
    }
}

/// Operating mode reported in `state.mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    Maintenance,
    Door,
    Continuous,
    AlwaysLocked,
    Other(u8),
}

impl LockMode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LockMode::Maintenance,
            1 => LockMode::Door,
            2 => LockMode::Continuous,
            3 => LockMode::AlwaysLocked,
            other => LockMode::Other(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            LockMode::Maintenance => "maintenance".to_string(),
            LockMode::Door => "door mode".to_string(),
            LockMode::Continuous => "continuous mode".to_string(),
            LockMode::AlwaysLocked => "always locked".to_string(),
            LockMode::Other(code) => format!("unknown({code})"),
        }
    }
}

/// Device configuration as last reported by the lock. Read only; the bridge
/// never writes settings back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    pub firmware_version: Option<String>,
    pub hardware_version: Option<u64>,
    pub mode: Option<LockMode>,
    /// 0 when the LED is switched off
    pub led_brightness: Option<u8>,
    pub auto_unlatch: Option<bool>,
    pub button_enabled: Option<bool>,
    pub pairing_enabled: Option<bool>,
    pub single_lock: Option<bool>,
    pub keypad_paired: Option<bool>,
    /// Seconds; `None` when auto-lock is off or not reported
    pub auto_lock_timeout: Option<u32>,
}

impl LockSettings {
    fn from_wire(
        wire_config: SmartlockConfigWire,
        advanced: SmartlockAdvancedConfigWire,
        mode: Option<u8>,
        firmware_version: Option<u64>,
        hardware_version: Option<u64>,
    ) -> Self {
        let led_brightness = match wire_config.led_enabled {
            Some(false) => Some(0),
            Some(true) => Some(wire_config.led_brightness.unwrap_or(3)),
            None => wire_config.led_brightness,
        };
        let keypad_paired = match (wire_config.keypad_paired, wire_config.keypad2_paired) {
            (None, None) => None,
            (first, second) => Some(first.unwrap_or(false) || second.unwrap_or(false)),
        };
        let auto_lock_timeout = match advanced.auto_lock {
            Some(true) => Some(advanced.auto_lock_timeout.unwrap_or(0)),
            _ => None,
        };

        Self {
            firmware_version: firmware_version.map(format_firmware_version),
            hardware_version,
            mode: mode.map(LockMode::from_code),
            led_brightness,
            auto_unlatch: wire_config.auto_unlatch,
            button_enabled: wire_config.button_enabled,
            pairing_enabled: wire_config.pairing_enabled,
            single_lock: wire_config.single_lock,
            keypad_paired,
            auto_lock_timeout,
        }
    }
}

/// Render the numeric firmware version, e.g. `328455` as `3.28.455`.
pub fn format_firmware_version(raw: u64) -> String {
    let digits = raw.to_string();
    if digits.len() < 6 {
        return format!("1.0.{raw}");
    }
    let minor = digits[1..3].trim_start_matches('0');
    format!(
        "{}.{}.{}",
        &digits[..1],
        if minor.is_empty() { "0" } else { minor },
        &digits[3..]
    )
}

/// Current status and telemetry of one physical lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    pub smartlock_id: u64,
    pub name: String,
    pub status: LockStatus,
    /// Raw state code and its name
    pub state_code: u8,
    pub state_name: String,
    pub battery_charge: Option<u8>,
    pub battery_critical: bool,
    pub keypad_battery_critical: Option<bool>,
    pub door_state: Option<DoorState>,
    pub doorsensor_battery_critical: Option<bool>,
    /// Lock reachable by the Nuki servers
    pub connected: bool,
    /// Last poll of this lock succeeded
    pub available: bool,
    pub last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: LockSettings,
}

impl LockState {
    /// Placeholder used before the first successful poll.
    pub fn unknown(smartlock_id: u64, name: impl Into<String>) -> Self {
        Self {
            smartlock_id,
            name: name.into(),
            status: LockStatus::Unknown,
            state_code: 255,
            state_name: lock_state_name(255),
            battery_charge: None,
            battery_critical: false,
            keypad_battery_critical: None,
            door_state: None,
            doorsensor_battery_critical: None,
            connected: false,
            available: false,
            last_update: None,
            settings: LockSettings::default(),
        }
    }

    /// Build the lock state from a `/smartlock/{id}` response.
    pub fn from_wire(wire: SmartlockResponse, now: DateTime<Utc>) -> Self {
        let state = wire.state.unwrap_or_default();
        let wire_config = wire.config.unwrap_or_default();
        let config_battery = wire_config.battery_level;
        let state_code = state.state.unwrap_or(255);
        let settings = LockSettings::from_wire(
            wire_config,
            wire.advanced_config.unwrap_or_default(),
            state.mode,
            wire.firmware_version,
            wire.hardware_version,
        );

        Self {
            smartlock_id: wire.smartlock_id,
            name: wire.name,
            status: LockStatus::from_state_code(state_code),
            state_code,
            state_name: lock_state_name(state_code),
            battery_charge: state.battery_charge.or(state.battery_level).or(config_battery),
            battery_critical: state.battery_critical,
            keypad_battery_critical: state.keypad_battery_critical,
            door_state: state.door_state.map(DoorState::from_code),
            doorsensor_battery_critical: state.doorsensor_battery_critical,
            connected: wire.server_state == 0,
            available: true,
            last_update: Some(now),
            settings,
        }
    }

    /// Mark the lock unavailable after a failed poll, keeping the last values.
    pub fn mark_unavailable(&mut self) {
        self.available = false;
        self.status = LockStatus::Unknown;
    }
}

/// Smartlock as listed on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartlockSummary {
    pub smartlock_id: u64,
    pub name: String,
}

impl From<&SmartlockResponse> for SmartlockSummary {
    fn from(wire: &SmartlockResponse) -> Self {
        Self {
            smartlock_id: wire.smartlock_id,
            name: if wire.name.is_empty() {
                "Unknown Lock".to_string()
            } else {
                wire.name.clone()
            },
        }
    }
}

/// `/smartlock` and `/smartlock/{id}` response body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartlockResponse {
    pub smartlock_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: Option<SmartlockStateWire>,
    #[serde(default)]
    pub config: Option<SmartlockConfigWire>,
    #[serde(default)]
    pub server_state: u8,
    #[serde(default)]
    pub advanced_config: Option<SmartlockAdvancedConfigWire>,
    #[serde(default)]
    pub firmware_version: Option<u64>,
    #[serde(default)]
    pub hardware_version: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartlockStateWire {
    #[serde(default)]
    pub state: Option<u8>,
    #[serde(default)]
    pub battery_critical: bool,
    #[serde(default)]
    pub battery_charge: Option<u8>,
    #[serde(default)]
    pub battery_level: Option<u8>,
    #[serde(default)]
    pub door_state: Option<u8>,
    #[serde(default)]
    pub keypad_battery_critical: Option<bool>,
    #[serde(default)]
    pub doorsensor_battery_critical: Option<bool>,
    #[serde(default)]
    pub mode: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartlockConfigWire {
    #[serde(default)]
    pub battery_level: Option<u8>,
    #[serde(default)]
    pub led_enabled: Option<bool>,
    #[serde(default)]
    pub led_brightness: Option<u8>,
    #[serde(default)]
    pub auto_unlatch: Option<bool>,
    #[serde(default)]
    pub button_enabled: Option<bool>,
    #[serde(default)]
    pub pairing_enabled: Option<bool>,
    #[serde(default)]
    pub single_lock: Option<bool>,
    #[serde(default)]
    pub keypad_paired: Option<bool>,
    #[serde(default)]
    pub keypad2_paired: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartlockAdvancedConfigWire {
    #[serde(default)]
    pub auto_lock: Option<bool>,
    #[serde(default)]
    pub auto_lock_timeout: Option<u32>,
}

/// The lock list endpoint answers with a bare list, a wrapped list or a
/// single object depending on the account.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum SmartlockListResponse {
    List(Vec<SmartlockResponse>),
    Wrapped { smartlocks: Vec<SmartlockResponse> },
    Single(SmartlockResponse),
}

impl SmartlockListResponse {
    pub fn into_vec(self) -> Vec<SmartlockResponse> {
        match self {
            SmartlockListResponse::List(list) => list,
            SmartlockListResponse::Wrapped { smartlocks } => smartlocks,
            SmartlockListResponse::Single(lock) => vec![lock],
        }
    }
}

/// Parse a log timestamp. Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid log timestamp '{raw}'")))
}
