//! Agent-wide configuration.
//!
//! `AgentConfiguration` holds the mostly-static values an embedder supplies
//! at construction time (endpoint, application identity, device info, cache
//! sizing). `PrivacyConfiguration` gates which beacon fields and record
//! kinds are allowed to leave the device at all, independent of anything the
//! server says.

mod server;

pub use server::{ServerConfig, StatusPayload};

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::AgentError;

/// Default max age of a cached record before the evictor drops it (105 min).
pub const DEFAULT_BEACON_CACHE_MAX_AGE_MS: u64 = 6_300_000;
/// Default low watermark the space evictor drains down to.
pub const DEFAULT_BEACON_CACHE_LOWER_MEMORY_BYTES: u64 = 80 * 1024 * 1024;
/// Default high watermark; informational only (see cache::evictor).
pub const DEFAULT_BEACON_CACHE_UPPER_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

/// Embedder-supplied agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfiguration {
    /// Ingest endpoint base URL.
    pub endpoint: String,
    /// Application identifier assigned by the backend.
    pub application_id: String,
    /// Human-readable application name.
    #[serde(default)]
    pub application_name: String,
    /// Application version string, placed in the beacon prefix.
    #[serde(default = "default_version")]
    pub version: String,
    /// Stable per-device identifier. If absent, callers must supply one per
    /// session (see `Beacon::new`).
    #[serde(default)]
    pub device_id: Option<u64>,
    /// Operating system name reported in the beacon.
    #[serde(default = "default_os")]
    pub os: String,
    /// Device manufacturer reported in the beacon.
    #[serde(default)]
    pub manufacturer: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub privacy: PrivacyConfiguration,
}

/// Beacon cache sizing and eviction thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_age")]
    pub max_age_ms: u64,
    #[serde(default = "default_lower_bound")]
    pub lower_memory_bytes: u64,
    #[serde(default = "default_upper_bound")]
    pub upper_memory_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_BEACON_CACHE_MAX_AGE_MS,
            lower_memory_bytes: DEFAULT_BEACON_CACHE_LOWER_MEMORY_BYTES,
            upper_memory_bytes: DEFAULT_BEACON_CACHE_UPPER_MEMORY_BYTES,
        }
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_os() -> String {
    std::env::consts::OS.to_string()
}

fn default_max_age() -> u64 {
    DEFAULT_BEACON_CACHE_MAX_AGE_MS
}

fn default_lower_bound() -> u64 {
    DEFAULT_BEACON_CACHE_LOWER_MEMORY_BYTES
}

fn default_upper_bound() -> u64 {
    DEFAULT_BEACON_CACHE_UPPER_MEMORY_BYTES
}

impl AgentConfiguration {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let data = std::fs::read_to_string(path)?;
        let config: AgentConfiguration = toml::from_str(&data)?;
        if config.endpoint.is_empty() {
            return Err(AgentError::config("endpoint must not be empty"));
        }
        if config.application_id.is_empty() {
            return Err(AgentError::config("application_id must not be empty"));
        }
        Ok(config)
    }
}

/// Data collection level: how much behavioural data the user has opted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCollectionLevel {
    Off,
    Performance,
    UserBehavior,
}

impl Default for DataCollectionLevel {
    fn default() -> Self {
        DataCollectionLevel::UserBehavior
    }
}

impl DataCollectionLevel {
    pub fn as_beacon_value(self) -> u8 {
        match self {
            DataCollectionLevel::Off => 0,
            DataCollectionLevel::Performance => 1,
            DataCollectionLevel::UserBehavior => 2,
        }
    }
}

/// Crash reporting level: whether crash data may be sent at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashReportingLevel {
    Off,
    OptOutCrashes,
    OptInCrashes,
}

impl Default for CrashReportingLevel {
    fn default() -> Self {
        CrashReportingLevel::OptInCrashes
    }
}

impl CrashReportingLevel {
    pub fn as_beacon_value(self) -> u8 {
        match self {
            CrashReportingLevel::Off => 0,
            CrashReportingLevel::OptOutCrashes => 1,
            CrashReportingLevel::OptInCrashes => 2,
        }
    }
}

/// Client-side privacy gate, independent of server-side `ServerConfig`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrivacyConfiguration {
    #[serde(default)]
    pub data_collection_level: DataCollectionLevel,
    #[serde(default)]
    pub crash_reporting_level: CrashReportingLevel,
}

impl Default for PrivacyConfiguration {
    fn default() -> Self {
        Self {
            data_collection_level: DataCollectionLevel::default(),
            crash_reporting_level: CrashReportingLevel::default(),
        }
    }
}

impl PrivacyConfiguration {
    pub fn device_id_sending_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn session_number_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn session_reporting_allowed(&self) -> bool {
        self.data_collection_level != DataCollectionLevel::Off
    }

    pub fn action_reporting_allowed(&self) -> bool {
        self.data_collection_level != DataCollectionLevel::Off
    }

    pub fn value_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn event_reporting_allowed(&self) -> bool {
        self.data_collection_level == DataCollectionLevel::UserBehavior
    }

    pub fn error_reporting_allowed(&self) -> bool {
        self.data_collection_level != DataCollectionLevel::Off
    }

    pub fn crash_reporting_allowed(&self) -> bool {
        self.crash_reporting_level == CrashReportingLevel::OptInCrashes
    }

    pub fn web_request_tracing_allowed(&self) -> bool {
        self.data_collection_level != DataCollectionLevel::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privacy_off_disables_everything_gated() {
        let privacy = PrivacyConfiguration {
            data_collection_level: DataCollectionLevel::Off,
            crash_reporting_level: CrashReportingLevel::OptInCrashes,
        };
        assert!(!privacy.session_reporting_allowed());
        assert!(!privacy.action_reporting_allowed());
        assert!(!privacy.value_reporting_allowed());
        assert!(!privacy.device_id_sending_allowed());
    }

    #[test]
    fn privacy_user_behavior_allows_everything() {
        let privacy = PrivacyConfiguration::default();
        assert!(privacy.action_reporting_allowed());
        assert!(privacy.value_reporting_allowed());
        assert!(privacy.device_id_sending_allowed());
        assert!(privacy.session_number_reporting_allowed());
    }

    #[test]
    fn beacon_values_match_wire_protocol() {
        assert_eq!(DataCollectionLevel::Off.as_beacon_value(), 0);
        assert_eq!(DataCollectionLevel::Performance.as_beacon_value(), 1);
        assert_eq!(DataCollectionLevel::UserBehavior.as_beacon_value(), 2);
        assert_eq!(CrashReportingLevel::Off.as_beacon_value(), 0);
        assert_eq!(CrashReportingLevel::OptOutCrashes.as_beacon_value(), 1);
        assert_eq!(CrashReportingLevel::OptInCrashes.as_beacon_value(), 2);
    }
}
