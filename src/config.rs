//! Configuration for the Nuki activity bridge.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default Nuki Web API endpoint.
pub const DEFAULT_API_BASE_URL: &str = "https://api.nuki.io";

/// Main configuration for the bridge.
///
/// Read once at startup. A running bridge never re-reads it; changing a value
/// means restarting the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nuki Web API token
    pub api_token: String,

    /// Base URL of the Nuki Web API
    pub api_base_url: String,

    /// Time between two polls of the same lock
    #[serde(with = "duration_serde")]
    pub scan_interval: Duration,

    /// Look-back used to correlate log entries of one physical access
    #[serde(with = "duration_serde")]
    pub fingerprint_detection_window: Duration,

    /// Upper bound for a whole poll tick (status + log fetch)
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// Keypad source number to user name
    pub fingerprint_users: FingerprintUserMap,

    /// Log every decision the poller and attributor make
    pub enable_enhanced_logging: bool,

    /// Number of activity log entries fetched per tick
    pub log_limit: usize,

    /// Locks to poll; empty means every lock on the account
    pub lock_ids: Vec<u64>,

    /// Number of log entry ids remembered per lock
    pub seen_capacity: usize,

    /// Entries of one trigger this close together form one batch (milliseconds)
    pub batch_epsilon_ms: u64,

    /// How the last attribution rule picks among candidate users
    pub fallback: FallbackMode,

    /// IANA timezone used when printing events
    pub timezone: String,

    /// Path for exported events
    pub export_path: PathBuf,

    /// Path for persisted statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nuki-activity-bridge");

        Self {
            api_token: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            scan_interval: Duration::from_secs(30),
            fingerprint_detection_window: Duration::from_secs(120),
            request_timeout: Duration::from_secs(15),
            fingerprint_users: FingerprintUserMap::default(),
            enable_enhanced_logging: false,
            log_limit: 20,
            lock_ids: Vec::new(),
            seen_capacity: 500,
            batch_epsilon_ms: 1000,
            fallback: FallbackMode::default(),
            timezone: "UTC".to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nuki-activity-bridge")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check values that would make the poll loop misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "scan_interval must be at least one second".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be at least one second".to_string(),
            ));
        }
        if self.log_limit == 0 {
            return Err(ConfigError::Invalid(
                "log_limit must be greater than zero".to_string(),
            ));
        }
        self.display_timezone()?;
        Ok(())
    }

    /// Parse the configured display timezone.
    pub fn display_timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    /// The batch epsilon as a chrono duration.
    pub fn batch_epsilon(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.batch_epsilon_ms as i64)
    }

    /// Whether a lock id passes the configured lock filter.
    pub fn polls_lock(&self, lock_id: u64) -> bool {
        self.lock_ids.is_empty() || self.lock_ids.contains(&lock_id)
    }

    /// Copy for one session with enhanced logging forced on when `verbose`.
    /// A configured `true` is never turned off.
    pub fn with_verbose(&self, verbose: bool) -> Self {
        let mut config = self.clone();
        config.enable_enhanced_logging |= verbose;
        config
    }
}

/// Candidate selection used by the last attribution rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackMode {
    /// Most frequent named user wins, recency breaks ties
    #[default]
    Frequency,
    /// Most recent named user wins
    Recency,
}

impl std::str::FromStr for FallbackMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "frequency" => Ok(FallbackMode::Frequency),
            "recency" => Ok(FallbackMode::Recency),
            other => Err(ConfigError::Invalid(format!(
                "unknown fallback mode '{other}' (expected frequency or recency)"
            ))),
        }
    }
}

/// A single keypad source to user assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintUser {
    pub source: u8,
    pub name: String,
}

/// Ordered mapping from keypad source number to user display name.
///
/// The order entries were configured in is kept; it breaks ties during
/// attribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FingerprintUser>", into = "Vec<FingerprintUser>")]
pub struct FingerprintUserMap(Vec<FingerprintUser>);

impl From<Vec<FingerprintUser>> for FingerprintUserMap {
    fn from(users: Vec<FingerprintUser>) -> Self {
        Self::from_pairs(users.into_iter().map(|u| (u.source, u.name)))
    }
}

impl From<FingerprintUserMap> for Vec<FingerprintUser> {
    fn from(map: FingerprintUserMap) -> Self {
        map.0
    }
}

impl FingerprintUserMap {
    /// Build a map from `(source, name)` pairs. The first assignment of a
    /// source wins and blank names are skipped.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u8, S)>,
        S: Into<String>,
    {
        let mut users: Vec<FingerprintUser> = Vec::new();
        for (source, name) in pairs {
            let name = name.into().trim().to_string();
            if name.is_empty() || users.iter().any(|u| u.source == source) {
                continue;
            }
            users.push(FingerprintUser { source, name });
        }
        Self(users)
    }

    /// Parse `source=name` assignments such as `2=Alice`.
    pub fn parse_assignments<'a, I>(assignments: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut pairs = Vec::new();
        for assignment in assignments {
            let (source, name) = assignment.split_once('=').ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "fingerprint user '{assignment}' must look like SOURCE=NAME"
                ))
            })?;
            let source: u8 = source.trim().parse().map_err(|e| {
                ConfigError::Invalid(format!("invalid source '{}': {e}", source.trim()))
            })?;
            pairs.push((source, name.trim().to_string()));
        }
        Ok(Self::from_pairs(pairs))
    }

    /// Name mapped to a source, if any.
    pub fn get(&self, source: u8) -> Option<&str> {
        self.0
            .iter()
            .find(|u| u.source == source)
            .map(|u| u.name.as_str())
    }

    /// Position of the first entry mapping to this user name.
    pub fn position_of_name(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|u| u.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FingerprintUser> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.scan_interval, Duration::from_secs(30));
        assert_eq!(config.fingerprint_detection_window, Duration::from_secs(120));
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.fallback, FallbackMode::Frequency);
        assert!(!config.enable_enhanced_logging);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{
            "api_token": "secret",
            "scan_interval": 10,
            "fingerprint_users": [{"source": 2, "name": "Alice"}]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.api_token, "secret");
        assert_eq!(config.scan_interval, Duration::from_secs(10));
        assert_eq!(config.fingerprint_detection_window, Duration::from_secs(120));
        assert_eq!(config.fingerprint_users.get(2), Some("Alice"));
        assert_eq!(config.log_limit, 20);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config {
            scan_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        config.scan_interval = Duration::from_secs(30);
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());

        config.timezone = "Europe/Berlin".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_assignments() {
        let map = FingerprintUserMap::parse_assignments(["1=Alice", " 2 = Bob ", "1=Carol"])
            .unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(1), Some("Alice"));
        assert_eq!(map.get(2), Some("Bob"));
        assert_eq!(map.position_of_name("Bob"), Some(1));
        assert!(map.get(3).is_none());

        assert!(FingerprintUserMap::parse_assignments(["Alice"]).is_err());
        assert!(FingerprintUserMap::parse_assignments(["x=Alice"]).is_err());
    }

    #[test]
    fn test_fingerprint_users_from_file_are_cleaned() {
        let json = r#"{
            "fingerprint_users": [
                {"source": 2, "name": ""},
                {"source": 2, "name": " Alice "},
                {"source": 2, "name": "Bob"},
                {"source": 3, "name": "   "}
            ]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.fingerprint_users.len(), 1);
        assert_eq!(config.fingerprint_users.get(2), Some("Alice"));
        assert!(config.fingerprint_users.get(3).is_none());

        let saved = serde_json::to_value(&config.fingerprint_users).unwrap();
        assert_eq!(saved, serde_json::json!([{"source": 2, "name": "Alice"}]));
    }

    #[test]
    fn test_lock_filter() {
        let mut config = Config::default();
        assert!(config.polls_lock(42));

        config.lock_ids = vec![7];
        assert!(config.polls_lock(7));
        assert!(!config.polls_lock(42));
    }

    #[test]
    fn test_verbose_enables_enhanced_logging() {
        let config = Config::default();
        assert!(config.with_verbose(true).enable_enhanced_logging);
        assert!(!config.with_verbose(false).enable_enhanced_logging);
        assert!(!config.enable_enhanced_logging);

        let enabled = Config {
            enable_enhanced_logging: true,
            ..Config::default()
        };
        assert!(enabled.with_verbose(false).enable_enhanced_logging);
    }

    #[test]
    fn test_fallback_mode_parsing() {
        assert_eq!("recency".parse::<FallbackMode>().unwrap(), FallbackMode::Recency);
        assert_eq!("Frequency".parse::<FallbackMode>().unwrap(), FallbackMode::Frequency);
        assert!("random".parse::<FallbackMode>().is_err());
    }
}
