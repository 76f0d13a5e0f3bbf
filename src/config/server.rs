//! Server-controlled configuration, replaced as a whole on every status
//! response. See `original_source/openkit/core/configuration/server_configuration.py`.

use serde::{Deserialize, Serialize};

const DEFAULT_BEACON_SIZE_BYTES: u32 = 150 * 1024;
const DEFAULT_MAX_SESSION_DURATION_MS: u64 = 6 * 60 * 60 * 1000;
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 10 * 60 * 1000;
const DEFAULT_MAX_EVENTS_PER_SESSION: u32 = 200;
const DEFAULT_SEND_INTERVAL_MS: u64 = 2 * 60 * 1000;

/// Immutable snapshot of server-side telemetry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub capture_enabled: bool,
    pub crash_reporting_enabled: bool,
    pub error_reporting_enabled: bool,
    pub server_id: u32,
    pub beacon_size_bytes: u32,
    pub multiplicity: u32,
    pub max_session_duration_ms: Option<u64>,
    pub session_timeout_ms: Option<u64>,
    pub max_events_per_session: Option<u32>,
    pub visit_store_version: u32,
    pub send_interval_ms: u64,
    pub traffic_control_percentage: Option<u8>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capture_enabled: true,
            crash_reporting_enabled: true,
            error_reporting_enabled: true,
            server_id: 1,
            beacon_size_bytes: DEFAULT_BEACON_SIZE_BYTES,
            multiplicity: 1,
            max_session_duration_ms: Some(DEFAULT_MAX_SESSION_DURATION_MS),
            session_timeout_ms: Some(DEFAULT_SESSION_TIMEOUT_MS),
            max_events_per_session: Some(DEFAULT_MAX_EVENTS_PER_SESSION),
            visit_store_version: 1,
            send_interval_ms: DEFAULT_SEND_INTERVAL_MS,
            traffic_control_percentage: None,
        }
    }
}

impl ServerConfig {
    /// `true` iff splitting by max session duration is server-enabled.
    pub fn session_split_by_duration_enabled(&self) -> bool {
        self.max_session_duration_ms.is_some()
    }

    /// `true` iff splitting by idle timeout is server-enabled.
    pub fn session_split_by_idle_timeout_enabled(&self) -> bool {
        self.session_timeout_ms.is_some()
    }

    /// `true` iff splitting by top-level event count is server-enabled.
    pub fn session_split_by_events_enabled(&self) -> bool {
        self.max_events_per_session.is_some()
    }

    /// Whether data may leave the device at all: capture on, and (if a
    /// traffic-control percentage is set) the sample passed.
    pub fn data_sending_allowed(&self) -> bool {
        self.capture_enabled
    }

    pub fn from_status_payload(payload: &StatusPayload) -> Self {
        let defaults = ServerConfig::default();
        Self {
            capture_enabled: payload
                .app_config
                .as_ref()
                .and_then(|a| a.capture)
                .unwrap_or(defaults.capture_enabled),
            crash_reporting_enabled: payload
                .app_config
                .as_ref()
                .and_then(|a| a.report_crashes)
                .unwrap_or(defaults.crash_reporting_enabled),
            error_reporting_enabled: payload
                .app_config
                .as_ref()
                .and_then(|a| a.report_errors)
                .unwrap_or(defaults.error_reporting_enabled),
            server_id: payload
                .dynamic_config
                .as_ref()
                .and_then(|d| d.server_id)
                .unwrap_or(defaults.server_id),
            multiplicity: payload
                .dynamic_config
                .as_ref()
                .and_then(|d| d.multiplicity)
                .unwrap_or(defaults.multiplicity),
            beacon_size_bytes: payload
                .mobile_agent_config
                .as_ref()
                .and_then(|m| m.max_beacon_size_kb)
                .map(|kb| kb * 1024)
                .unwrap_or(defaults.beacon_size_bytes),
            max_session_duration_ms: payload
                .mobile_agent_config
                .as_ref()
                .and_then(|m| m.max_session_duration_mins)
                .map(|mins| mins as u64 * 60 * 1000),
            session_timeout_ms: payload
                .mobile_agent_config
                .as_ref()
                .and_then(|m| m.session_timeout_sec)
                .map(|s| s as u64 * 1000),
            max_events_per_session: payload
                .mobile_agent_config
                .as_ref()
                .and_then(|m| m.max_events_per_session),
            visit_store_version: payload
                .mobile_agent_config
                .as_ref()
                .and_then(|m| m.visit_store_version)
                .unwrap_or(defaults.visit_store_version),
            send_interval_ms: payload
                .mobile_agent_config
                .as_ref()
                .and_then(|m| m.send_interval_sec)
                .map(|s| s as u64 * 1000)
                .unwrap_or(defaults.send_interval_ms),
            traffic_control_percentage: payload.traffic_control_percentage,
        }
    }
}

/// Wire DTO mirroring the status-response JSON (spec.md §6). This is the
/// "response parser" boundary the hard core hands off to; kept intentionally
/// minimal since the full parser is out of scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(rename = "mobileAgentConfig", skip_serializing_if = "Option::is_none")]
    pub mobile_agent_config: Option<MobileAgentConfig>,
    #[serde(rename = "appConfig", skip_serializing_if = "Option::is_none")]
    pub app_config: Option<AppConfig>,
    #[serde(rename = "dynamicConfig", skip_serializing_if = "Option::is_none")]
    pub dynamic_config: Option<DynamicConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(
        rename = "trafficControlPercentage",
        skip_serializing_if = "Option::is_none"
    )]
    pub traffic_control_percentage: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MobileAgentConfig {
    #[serde(rename = "maxBeaconSizeKb", skip_serializing_if = "Option::is_none")]
    pub max_beacon_size_kb: Option<u32>,
    #[serde(
        rename = "maxSessionDurationMins",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_session_duration_mins: Option<u32>,
    #[serde(
        rename = "maxEventsPerSession",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_events_per_session: Option<u32>,
    #[serde(rename = "sessionTimeoutSec", skip_serializing_if = "Option::is_none")]
    pub session_timeout_sec: Option<u32>,
    #[serde(rename = "sendIntervalSec", skip_serializing_if = "Option::is_none")]
    pub send_interval_sec: Option<u32>,
    #[serde(rename = "visitStoreVersion", skip_serializing_if = "Option::is_none")]
    pub visit_store_version: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture: Option<bool>,
    #[serde(rename = "reportCrashes", skip_serializing_if = "Option::is_none")]
    pub report_crashes: Option<bool>,
    #[serde(rename = "reportErrors", skip_serializing_if = "Option::is_none")]
    pub report_errors: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplicity: Option<u32>,
    #[serde(rename = "serverId", skip_serializing_if = "Option::is_none")]
    pub server_id: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ServerConfig::default();
        assert!(config.capture_enabled);
        assert_eq!(config.beacon_size_bytes, 150 * 1024);
        assert_eq!(config.multiplicity, 1);
    }

    #[test]
    fn from_status_payload_overrides_defaults() {
        let payload = StatusPayload {
            mobile_agent_config: Some(MobileAgentConfig {
                max_beacon_size_kb: Some(10),
                max_session_duration_mins: None,
                max_events_per_session: Some(2),
                session_timeout_sec: Some(1),
                send_interval_sec: Some(30),
                visit_store_version: Some(2),
            }),
            app_config: Some(AppConfig {
                capture: Some(false),
                report_crashes: Some(false),
                report_errors: Some(true),
            }),
            dynamic_config: Some(DynamicConfig {
                multiplicity: Some(7),
                server_id: Some(42),
            }),
            timestamp: Some(1000),
            traffic_control_percentage: Some(50),
        };

        let config = ServerConfig::from_status_payload(&payload);
        assert!(!config.capture_enabled);
        assert_eq!(config.beacon_size_bytes, 10 * 1024);
        assert_eq!(config.server_id, 42);
        assert_eq!(config.multiplicity, 7);
        assert_eq!(config.max_events_per_session, Some(2));
        assert!(config.max_session_duration_ms.is_none());
        assert!(!config.session_split_by_duration_enabled());
        assert!(config.session_split_by_idle_timeout_enabled());
        assert_eq!(config.visit_store_version, 2);
        assert_eq!(config.send_interval_ms, 30_000);
        assert_eq!(config.traffic_control_percentage, Some(50));
    }
}
