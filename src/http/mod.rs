//! HTTP transport boundary: builds the three request URLs the beacon sender
//! needs (status, new-session, beacon) and ships the blocking client that
//! talks to a real ingest endpoint. See
//! `original_source/openkit/protocol/http_client.py`.

mod reqwest_client;

pub use reqwest_client::ReqwestHttpClient;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

use crate::config::StatusPayload;
use crate::error::AgentError;

const REQUEST_TYPE_MOBILE: &str = "type=m";
const QUERY_KEY_SERVER_ID: &str = "srvid";
const QUERY_KEY_APPLICATION: &str = "app";
const QUERY_KEY_VERSION: &str = "va";
const QUERY_KEY_PLATFORM_TYPE: &str = "pt";
const QUERY_KEY_AGENT_TECHNOLOGY_TYPE: &str = "tt";
const QUERY_KEY_RESPONSE_TYPE: &str = "resp";
const QUERY_KEY_CONFIG_TIMESTAMP: &str = "cts";
const QUERY_KEY_NEW_SESSION: &str = "ns";

const AGENT_VERSION: &str = "1.0.0";
const PLATFORM_TYPE: u8 = 1;
const AGENT_TECHNOLOGY_TYPE: &str = "okrust";
const RESPONSE_TYPE: &str = "json";

fn append_parameter(key: &str, value: &str) -> String {
    format!(
        "&{key}={}",
        utf8_percent_encode(value, NON_ALPHANUMERIC)
    )
}

/// Builds the fixed monitor/new-session URLs for one application+server pair.
#[derive(Debug, Clone)]
pub struct RequestUrls {
    pub monitor_url: String,
    pub new_session_url: String,
}

impl RequestUrls {
    pub fn new(base_url: &str, application_id: &str, server_id: u32) -> Self {
        let mut monitor_url = format!("{base_url}?{REQUEST_TYPE_MOBILE}");
        monitor_url.push_str(&append_parameter(QUERY_KEY_SERVER_ID, &server_id.to_string()));
        monitor_url.push_str(&append_parameter(QUERY_KEY_APPLICATION, application_id));
        monitor_url.push_str(&append_parameter(QUERY_KEY_VERSION, AGENT_VERSION));
        monitor_url.push_str(&append_parameter(
            QUERY_KEY_PLATFORM_TYPE,
            &PLATFORM_TYPE.to_string(),
        ));
        monitor_url.push_str(&append_parameter(
            QUERY_KEY_AGENT_TECHNOLOGY_TYPE,
            AGENT_TECHNOLOGY_TYPE,
        ));
        monitor_url.push_str(&append_parameter(QUERY_KEY_RESPONSE_TYPE, RESPONSE_TYPE));

        let new_session_url = format!("{monitor_url}{}", append_parameter(QUERY_KEY_NEW_SESSION, "1"));

        Self {
            monitor_url,
            new_session_url,
        }
    }
}

/// Supplies the one query parameter that rides along with every request:
/// the locally-known configuration timestamp, so the server can tell us
/// whether we're already current.
pub trait AdditionalQueryParameters {
    fn configuration_timestamp_ms(&self) -> i64;
}

pub(crate) fn with_config_timestamp(base_url: &str, params: &dyn AdditionalQueryParameters) -> String {
    format!(
        "{base_url}{}",
        append_parameter(QUERY_KEY_CONFIG_TIMESTAMP, &params.configuration_timestamp_ms().to_string())
    )
}

/// Outcome of a status/new-session/beacon request: either the server parsed
/// cleanly and sent back a policy, or the caller couldn't even be told it
/// failed and must fall back to the previous configuration.
#[derive(Debug, Clone)]
pub struct StatusResponse {
    pub status_code: u16,
    pub payload: Option<StatusPayload>,
}

impl StatusResponse {
    pub fn is_erroneous(&self) -> bool {
        self.status_code >= 400
    }

    /// A response the client never got at all (network failure, timeout).
    pub fn unknown_error() -> Self {
        Self {
            status_code: 0,
            payload: None,
        }
    }
}

/// Everything the sender needs to talk to the backend; `reqwest`-backed in
/// production, fake in tests.
pub trait HttpClient: Send + Sync {
    fn send_status_request(
        &self,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<StatusResponse, AgentError>;

    fn send_new_session_request(
        &self,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<StatusResponse, AgentError>;

    fn send_beacon_request(
        &self,
        client_ip: Option<&str>,
        data: &str,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<StatusResponse, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_url_has_expected_query_keys() {
        let urls = RequestUrls::new("https://example.com/mbeacon", "app-1", 1);
        assert!(urls.monitor_url.contains("srvid=1"));
        assert!(urls.monitor_url.contains("app=app-1"));
        assert!(urls.monitor_url.contains("tt=okrust"));
    }

    #[test]
    fn new_session_url_extends_monitor_url() {
        let urls = RequestUrls::new("https://example.com/mbeacon", "app-1", 1);
        assert!(urls.new_session_url.starts_with(&urls.monitor_url));
        assert!(urls.new_session_url.ends_with("ns=1"));
    }

    #[test]
    fn append_parameter_percent_encodes_value() {
        let encoded = append_parameter("app", "a b&c");
        assert_eq!(encoded, "&app=a%20b%26c");
    }

    struct FixedTimestamp(i64);
    impl AdditionalQueryParameters for FixedTimestamp {
        fn configuration_timestamp_ms(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn with_config_timestamp_appends_cts() {
        let url = with_config_timestamp("https://example.com", &FixedTimestamp(42));
        assert_eq!(url, "https://example.com&cts=42");
    }
}
