//! Serializes recorded session activity into the URL-form-style wire
//! protocol and drives the chunked send loop against the cache. See
//! `original_source/openkit/protocol/beacon.py`.

mod action;
mod event_type;

pub use action::{Action, WebRequestTracer};
pub use event_type::EventType;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::cache::{BeaconCache, BeaconKey};
use crate::config::{PrivacyConfiguration, ServerConfig};
use crate::error::AgentError;
use crate::http::{AdditionalQueryParameters, HttpClient, StatusResponse};

const PROTOCOL_VERSION: u8 = 3;
const OPENKIT_VERSION: &str = "7.0.0000";
const PLATFORM_TYPE: u8 = 1;
const AGENT_TECHNOLOGY_TYPE: &str = "okrust";
const ERROR_TECHNOLOGY_TYPE: &str = "c";
const MAX_NAME_LEN: usize = 250;
const TAG_PREFIX: &str = "MT";
pub const BEACON_DATA_DELIMITER: &str = "&";

const BEACON_KEY_PROTOCOL_VERSION: &str = "vv";
const BEACON_KEY_OPENKIT_VERSION: &str = "va";
const BEACON_KEY_APPLICATION_ID: &str = "ap";
const BEACON_KEY_APPLICATION_NAME: &str = "an";
const BEACON_KEY_APPLICATION_VERSION: &str = "vn";
const BEACON_KEY_PLATFORM_TYPE: &str = "pt";
const BEACON_KEY_AGENT_TECHNOLOGY_TYPE: &str = "tt";
const BEACON_KEY_VISITOR_ID: &str = "vi";
const BEACON_KEY_SESSION_NUMBER: &str = "sn";
const BEACON_KEY_CLIENT_IP_ADDRESS: &str = "ip";
const BEACON_KEY_MULTIPLICITY: &str = "mp";
const BEACON_KEY_DATA_COLLECTION_LEVEL: &str = "dl";
const BEACON_KEY_CRASH_REPORTING_LEVEL: &str = "cl";
const BEACON_KEY_VISIT_STORE_VERSION: &str = "vs";

const BEACON_KEY_DEVICE_OS: &str = "os";
const BEACON_KEY_DEVICE_MANUFACTURER: &str = "mf";

const BEACON_KEY_SESSION_START_TIME: &str = "tv";
const BEACON_KEY_TRANSMISSION_TIME: &str = "tx";

const BEACON_KEY_EVENT_TYPE: &str = "et";
const BEACON_KEY_NAME: &str = "na";
const BEACON_KEY_THREAD_ID: &str = "it";
const BEACON_KEY_ACTION_ID: &str = "ca";
const BEACON_KEY_PARENT_ACTION_ID: &str = "pa";
const BEACON_KEY_START_SEQUENCE_NUMBER: &str = "s0";
const BEACON_KEY_TIME_0: &str = "t0";
const BEACON_KEY_END_SEQUENCE_NUMBER: &str = "s1";
const BEACON_KEY_TIME_1: &str = "t1";

const BEACON_KEY_VALUE: &str = "vl";
const BEACON_KEY_ERROR_CODE: &str = "ev";
const BEACON_KEY_ERROR_REASON: &str = "rs";
const BEACON_KEY_ERROR_TECHNOLOGY_TYPE: &str = "tt";

const BEACON_KEY_WEBREQUEST_RESPONSECODE: &str = "rc";
const BEACON_KEY_WEBREQUEST_BYTES_SENT: &str = "bs";
const BEACON_KEY_WEBREQUEST_BYTES_RECEIVED: &str = "br";

/// Identity and device fields that stay fixed for the lifetime of a beacon.
#[derive(Debug, Clone)]
pub struct BeaconIdentity {
    pub application_id: String,
    pub application_name: String,
    pub application_version: String,
    pub os: String,
    pub manufacturer: String,
    pub device_id: u64,
}

/// Reportable value kinds for `Beacon::report_value`.
#[derive(Debug, Clone)]
pub enum ReportedValue {
    Str(String),
    Int(i64),
    Double(f64),
}

/// Serializes one session's recorded activity and drives its chunked send.
///
/// Holds an `Arc<Mutex<ServerConfig>>` shared with the owning session: the
/// sender thread swaps this in place whenever a fresh status response
/// arrives, so every beacon picks up the new multiplicity/capture policy on
/// its very next write without the session needing to be told directly.
pub struct Beacon {
    beacon_key: BeaconKey,
    beacon_cache: Arc<BeaconCache>,
    server_config: Arc<Mutex<ServerConfig>>,
    privacy_config: PrivacyConfiguration,
    identity: BeaconIdentity,
    ip_address: Option<String>,
    session_start_time: DateTime<Utc>,
    next_id: AtomicI32,
    next_sequence_number: AtomicI32,
    traffic_control_value: u8,
    immutable_beacon_data: String,
}

impl Beacon {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        beacon_key: BeaconKey,
        beacon_cache: Arc<BeaconCache>,
        server_config: Arc<Mutex<ServerConfig>>,
        privacy_config: PrivacyConfiguration,
        identity: BeaconIdentity,
        ip_address: Option<String>,
        session_start_time: DateTime<Utc>,
        traffic_control_value: u8,
    ) -> Self {
        let mut beacon = Self {
            beacon_key,
            beacon_cache,
            server_config,
            privacy_config,
            identity,
            ip_address,
            session_start_time,
            next_id: AtomicI32::new(0),
            next_sequence_number: AtomicI32::new(0),
            traffic_control_value,
            immutable_beacon_data: String::new(),
        };
        beacon.immutable_beacon_data = beacon.create_immutable_beacon_data();
        beacon
    }

    pub fn beacon_key(&self) -> BeaconKey {
        self.beacon_key
    }

    pub fn session_start_time(&self) -> DateTime<Utc> {
        self.session_start_time
    }

    fn next_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn next_sequence_number(&self) -> i32 {
        self.next_sequence_number.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn create_id(&self) -> i32 {
        self.next_id()
    }

    fn create_immutable_beacon_data(&self) -> String {
        let mut out = String::new();
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PROTOCOL_VERSION,
            &PROTOCOL_VERSION.to_string(),
        ));
        out.push_str(&add_key_value_pair(BEACON_KEY_OPENKIT_VERSION, OPENKIT_VERSION));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_APPLICATION_ID,
            &self.identity.application_id,
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_APPLICATION_NAME,
            &self.identity.application_name,
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_APPLICATION_VERSION,
            &self.identity.application_version,
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PLATFORM_TYPE,
            &PLATFORM_TYPE.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_AGENT_TECHNOLOGY_TYPE,
            AGENT_TECHNOLOGY_TYPE,
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_VISITOR_ID,
            &self.identity.device_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_SESSION_NUMBER,
            &self.beacon_key.beacon_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_CLIENT_IP_ADDRESS,
            self.ip_address.as_deref().unwrap_or(""),
        ));
        out.push_str(&add_key_value_pair(BEACON_KEY_DEVICE_OS, &self.identity.os));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_DEVICE_MANUFACTURER,
            &self.identity.manufacturer,
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_DATA_COLLECTION_LEVEL,
            &self.privacy_config.data_collection_level.as_beacon_value().to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_CRASH_REPORTING_LEVEL,
            &self.privacy_config.crash_reporting_level.as_beacon_value().to_string(),
        ));
        out
    }

    fn capture_enabled(&self) -> bool {
        self.server_config
            .lock()
            .map(|c| c.capture_enabled)
            .unwrap_or(false)
    }

    pub fn data_capturing_enabled(&self) -> bool {
        let config = match self.server_config.lock() {
            Ok(c) => c,
            Err(_) => return false,
        };
        if !config.data_sending_allowed() {
            return false;
        }
        match config.traffic_control_percentage {
            Some(pct) => (self.traffic_control_value as u32) < pct as u32,
            None => true,
        }
    }

    fn time_since_session_started(&self, timestamp: DateTime<Utc>) -> i64 {
        (timestamp - self.session_start_time).num_milliseconds()
    }

    fn current_timestamp_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn thread_tag(&self) -> u32 {
        std::thread::current().id().as_u64_stub()
    }

    pub fn start_session(&self) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let mut out = build_basic_event_data(EventType::SessionStart, None, self.thread_tag());
        out.push_str(&add_key_value_pair(BEACON_KEY_PARENT_ACTION_ID, "0"));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &self.next_sequence_number().to_string(),
        ));
        out.push_str(&add_key_value_pair(BEACON_KEY_TIME_0, "0"));
        self.add_event_data(self.session_start_time, out)
    }

    pub fn end_session(&self, end_time: Option<DateTime<Utc>>) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let end_time = end_time.unwrap_or_else(Utc::now);
        let mut out = build_basic_event_data(EventType::SessionEnd, None, self.thread_tag());
        out.push_str(&add_key_value_pair(BEACON_KEY_PARENT_ACTION_ID, "0"));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &self.next_sequence_number().to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(end_time).to_string(),
        ));
        self.add_event_data(end_time, out)
    }

    pub fn add_action(&self, action: &Action) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let mut out = build_basic_event_data(EventType::Action, Some(&action.name), self.thread_tag());
        out.push_str(&add_key_value_pair(BEACON_KEY_ACTION_ID, &action.id.to_string()));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PARENT_ACTION_ID,
            &action.parent_action_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &action.start_sequence_number.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(action.start_time).to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_END_SEQUENCE_NUMBER,
            &action.end_sequence_number.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_1,
            &(action.end_time - action.start_time).num_milliseconds().to_string(),
        ));
        self.add_action_data(action.start_time, out)
    }

    pub fn report_value(
        &self,
        parent_action_id: i32,
        value_name: &str,
        value: ReportedValue,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let event_type = match value {
            ReportedValue::Str(_) => EventType::ValueString,
            ReportedValue::Int(_) => EventType::ValueInt,
            ReportedValue::Double(_) => EventType::ValueDouble,
        };
        let (event_time, mut out) = self.build_event(event_type, value_name, parent_action_id, timestamp);
        let value_str = match value {
            ReportedValue::Str(s) => truncate(&s),
            ReportedValue::Int(i) => i.to_string(),
            ReportedValue::Double(d) => d.to_string(),
        };
        out.push_str(&add_key_value_pair(BEACON_KEY_VALUE, &value_str));
        self.add_event_data(event_time, out)
    }

    pub fn report_event(
        &self,
        parent_action_id: i32,
        event_name: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut out = build_basic_event_data(EventType::NamedEvent, Some(event_name), self.thread_tag());
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PARENT_ACTION_ID,
            &parent_action_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &self.next_sequence_number().to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(timestamp).to_string(),
        ));
        self.add_event_data(timestamp, out)
    }

    pub fn identify_user(&self, user_tag: &str, timestamp: Option<DateTime<Utc>>) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut out = build_basic_event_data(EventType::IdentifyUser, Some(user_tag), self.thread_tag());
        out.push_str(&add_key_value_pair(BEACON_KEY_PARENT_ACTION_ID, "0"));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &self.next_sequence_number().to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(timestamp).to_string(),
        ));
        self.add_event_data(timestamp, out)
    }

    pub fn report_error(
        &self,
        parent_action_id: i32,
        error_name: &str,
        error_code: i32,
        reason: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut out = build_basic_event_data(EventType::Error, Some(error_name), self.thread_tag());
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PARENT_ACTION_ID,
            &parent_action_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &self.next_sequence_number().to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(timestamp).to_string(),
        ));
        out.push_str(&add_key_value_pair(BEACON_KEY_ERROR_CODE, &error_code.to_string()));
        out.push_str(&add_key_value_pair(BEACON_KEY_ERROR_REASON, reason));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_ERROR_TECHNOLOGY_TYPE,
            ERROR_TECHNOLOGY_TYPE,
        ));
        self.add_event_data(timestamp, out)
    }

    pub fn add_web_request(&self, parent_action_id: i32, tracer: &WebRequestTracer) -> Result<(), AgentError> {
        if !self.capture_enabled() {
            return Ok(());
        }
        let duration = (tracer.end_time - tracer.start_time).num_milliseconds();
        let encoded_url = utf8_percent_encode(&tracer.url, NON_ALPHANUMERIC).to_string();
        let mut out = build_basic_event_data(EventType::WebRequest, Some(&encoded_url), self.thread_tag());
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PARENT_ACTION_ID,
            &parent_action_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &tracer.start_seq_no.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(tracer.start_time).to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_END_SEQUENCE_NUMBER,
            &tracer.end_seq_no.to_string(),
        ));
        out.push_str(&add_key_value_pair(BEACON_KEY_TIME_1, &duration.to_string()));
        if let Some(code) = tracer.response_code {
            out.push_str(&add_key_value_pair(
                BEACON_KEY_WEBREQUEST_RESPONSECODE,
                &code.to_string(),
            ));
        }
        if let Some(received) = tracer.bytes_received {
            out.push_str(&add_key_value_pair(
                BEACON_KEY_WEBREQUEST_BYTES_RECEIVED,
                &received.to_string(),
            ));
        }
        if let Some(sent) = tracer.bytes_sent {
            out.push_str(&add_key_value_pair(BEACON_KEY_WEBREQUEST_BYTES_SENT, &sent.to_string()));
        }
        self.add_event_data(tracer.start_time, out)
    }

    fn build_event(
        &self,
        event_type: EventType,
        name: &str,
        parent_action_id: i32,
        event_time: Option<DateTime<Utc>>,
    ) -> (DateTime<Utc>, String) {
        let event_time = event_time.unwrap_or_else(Utc::now);
        let mut out = build_basic_event_data(event_type, Some(name), self.thread_tag());
        out.push_str(&add_key_value_pair(
            BEACON_KEY_PARENT_ACTION_ID,
            &parent_action_id.to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_START_SEQUENCE_NUMBER,
            &self.next_sequence_number().to_string(),
        ));
        out.push_str(&add_key_value_pair(
            BEACON_KEY_TIME_0,
            &self.time_since_session_started(event_time).to_string(),
        ));
        (event_time, out)
    }

    fn add_event_data(&self, timestamp: DateTime<Utc>, data: String) -> Result<(), AgentError> {
        if self.capture_enabled() {
            self.beacon_cache.add_event(self.beacon_key, timestamp, data)?;
        }
        Ok(())
    }

    fn add_action_data(&self, timestamp: DateTime<Utc>, data: String) -> Result<(), AgentError> {
        if self.capture_enabled() {
            self.beacon_cache.add_action(self.beacon_key, timestamp, data)?;
        }
        Ok(())
    }

    pub fn create_tag(&self, parent_action_id: i32, tracer_seq_no: i32) -> String {
        let config = self.server_config.lock().ok();
        let (server_id, visit_store_version) = config
            .as_deref()
            .map(|c| (c.server_id, c.visit_store_version))
            .unwrap_or((1, 1));

        let mut tag = format!(
            "{TAG_PREFIX}_{PROTOCOL_VERSION}_{server_id}_{}_{}",
            self.identity.device_id, self.beacon_key.beacon_id
        );
        if visit_store_version > 1 {
            tag.push_str(&format!("-{}", self.beacon_key.beacon_seq_number));
        }
        let encoded_app_id = utf8_percent_encode(&self.identity.application_id, NON_ALPHANUMERIC);
        tag.push_str(&format!(
            "_{encoded_app_id}_{parent_action_id}_{}_{tracer_seq_no}",
            self.thread_tag()
        ));
        tag
    }

    pub fn clear_data(&self) -> Result<(), AgentError> {
        self.beacon_cache.delete_cache_entry(self.beacon_key)
    }

    /// Whether this beacon still has data that hasn't made it to the wire.
    pub fn has_unsent_data(&self) -> Result<bool, AgentError> {
        self.beacon_cache.has_pending_data(self.beacon_key)
    }

    fn append_mutable_beacon_data(&self) -> String {
        let config = self.server_config.lock().ok();
        let (visit_store_version, multiplicity) = config
            .as_deref()
            .map(|c| (c.visit_store_version, c.multiplicity))
            .unwrap_or((1, 1));

        let mut out = add_key_value_pair(BEACON_KEY_VISIT_STORE_VERSION, &visit_store_version.to_string());
        out.push_str(&self.create_timestamp_data());
        out.push_str(&add_key_value_pair(BEACON_KEY_MULTIPLICITY, &multiplicity.to_string()));
        out
    }

    fn create_timestamp_data(&self) -> String {
        let mut out = add_key_value_pair(
            BEACON_KEY_TRANSMISSION_TIME,
            &self.current_timestamp_ms().to_string(),
        );
        out.push_str(&add_key_value_pair(
            BEACON_KEY_SESSION_START_TIME,
            &self.session_start_time.timestamp_millis().to_string(),
        ));
        out
    }

    /// Drains every staged record for this beacon in size-bounded chunks,
    /// POSTing each one and only advancing the cache once the server
    /// accepted it. Stops and preserves the unsent chunk on the first
    /// failure so the next sender tick retries it.
    pub fn send(
        &self,
        http_client: &dyn HttpClient,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<Option<StatusResponse>, AgentError> {
        let mut last_response = None;

        self.beacon_cache.prepare_data_for_sending(self.beacon_key)?;
        while self.beacon_cache.has_data_for_sending(self.beacon_key)? {
            let prefix = format!("{}{}", self.immutable_beacon_data, self.append_mutable_beacon_data());

            let beacon_size_bytes = self
                .server_config
                .lock()
                .map_err(|e| AgentError::lock(e.to_string()))?
                .beacon_size_bytes as usize;
            let max_size = beacon_size_bytes.saturating_sub(1024);

            let chunk = self
                .beacon_cache
                .get_next_beacon_chunk(self.beacon_key, &prefix, max_size, BEACON_DATA_DELIMITER)?;
            let Some(chunk) = chunk else { break };
            if chunk.is_empty() {
                break;
            }
            let chunk = chunk.trim_start_matches('&');

            let response =
                http_client.send_beacon_request(self.ip_address.as_deref(), chunk, params)?;
            if response.is_erroneous() {
                self.beacon_cache.reset_chunked_data(self.beacon_key)?;
                last_response = Some(response);
                break;
            }
            self.beacon_cache.remove_chunked_data(self.beacon_key)?;
            last_response = Some(response);
        }

        Ok(last_response)
    }
}

fn build_basic_event_data(event_type: EventType, name: Option<&str>, thread_id: u32) -> String {
    let name = truncate(name.unwrap_or("").trim());
    let mut out = add_key_value_pair(BEACON_KEY_EVENT_TYPE, &event_type.as_beacon_value().to_string());
    out.push_str(&add_key_value_pair(BEACON_KEY_NAME, &name));
    out.push_str(&add_key_value_pair(BEACON_KEY_THREAD_ID, &(thread_id & 0xFFF_FFFF).to_string()));
    out
}

fn add_key_value_pair(key: &str, value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    format!(
        "{}{}",
        append_key(key),
        utf8_percent_encode(value, NON_ALPHANUMERIC)
    )
}

fn append_key(key: &str) -> String {
    format!("&{key}=")
}

fn truncate(name: &str) -> String {
    name.chars().take(MAX_NAME_LEN).collect()
}

/// Stable per-process substitute for the OS thread id the Python
/// implementation mixes into event data; this agent only needs it to be a
/// cheap, roughly-unique tag, not a real kernel thread id.
trait ThreadIdExt {
    fn as_u64_stub(&self) -> u32;
}

impl ThreadIdExt for std::thread::ThreadId {
    fn as_u64_stub(&self) -> u32 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.hash(&mut hasher);
        (hasher.finish() & 0xFFFF_FFFF) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrashReportingLevel, DataCollectionLevel};

    fn test_beacon() -> Beacon {
        Beacon::new(
            BeaconKey::new(1, 0),
            Arc::new(BeaconCache::new()),
            Arc::new(Mutex::new(ServerConfig::default())),
            PrivacyConfiguration {
                data_collection_level: DataCollectionLevel::UserBehavior,
                crash_reporting_level: CrashReportingLevel::OptInCrashes,
            },
            BeaconIdentity {
                application_id: "app-1".to_string(),
                application_name: "Test App".to_string(),
                application_version: "1.0".to_string(),
                os: "linux".to_string(),
                manufacturer: "acme".to_string(),
                device_id: 42,
            },
            Some("127.0.0.1".to_string()),
            Utc::now(),
            0,
        )
    }

    #[test]
    fn immutable_data_contains_identity_fields() {
        let beacon = test_beacon();
        assert!(beacon.immutable_beacon_data.contains("ap=app-1"));
        assert!(beacon.immutable_beacon_data.contains("vi=42"));
        assert!(beacon.immutable_beacon_data.contains("sn=1"));
    }

    #[test]
    fn start_session_writes_an_event_record() {
        let beacon = test_beacon();
        beacon.start_session().unwrap();
        assert!(beacon
            .beacon_cache
            .has_data_for_sending(beacon.beacon_key)
            .is_ok());
        beacon.beacon_cache.prepare_data_for_sending(beacon.beacon_key).unwrap();
        assert!(beacon.beacon_cache.has_data_for_sending(beacon.beacon_key).unwrap());
    }

    #[test]
    fn add_key_value_pair_omits_empty_values() {
        assert_eq!(add_key_value_pair("k", ""), "");
        assert_eq!(add_key_value_pair("k", "v"), "&k=v");
    }

    #[test]
    fn data_capturing_respects_traffic_control_percentage() {
        let beacon = test_beacon();
        {
            let mut config = beacon.server_config.lock().unwrap();
            config.traffic_control_percentage = Some(0);
        }
        assert!(!beacon.data_capturing_enabled());
    }

    #[test]
    fn create_tag_includes_session_and_app_id() {
        let beacon = test_beacon();
        let tag = beacon.create_tag(0, 1);
        assert!(tag.starts_with("MT_3_1_42_1"));
        assert!(tag.contains("app-1"));
    }
}
