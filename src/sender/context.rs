//! Shared state every sender state reads and mutates. See
//! `original_source/openkit/core/beacon_sender.py`'s `BeaconSendingContext`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::http::{AdditionalQueryParameters, HttpClient, StatusResponse};
use crate::session::Session;

/// One session tracked by the sender, plus whether its first new-session
/// request has gone out yet. A session only becomes eligible for "finished"
/// or "open" sends once it is configured.
struct TrackedSession {
    session: Arc<Session>,
    configured: AtomicBool,
}

/// Shared across every `SenderState`: the HTTP client, the live server
/// config every `Beacon` reads through its `Arc<Mutex<ServerConfig>>`, and
/// the set of sessions currently known to the sender.
pub struct BeaconSendingContext {
    http_client: Arc<dyn HttpClient>,
    server_config: Arc<Mutex<ServerConfig>>,
    sessions: Mutex<Vec<TrackedSession>>,
    last_open_session_beacon_send_time_ms: AtomicI64,
    last_status_check_time_ms: AtomicI64,
    shutdown_requested: AtomicBool,
    init_succeeded: AtomicBool,
}

impl BeaconSendingContext {
    pub fn new(http_client: Arc<dyn HttpClient>, server_config: Arc<Mutex<ServerConfig>>) -> Self {
        Self {
            http_client,
            server_config,
            sessions: Mutex::new(Vec::new()),
            last_open_session_beacon_send_time_ms: AtomicI64::new(0),
            last_status_check_time_ms: AtomicI64::new(0),
            shutdown_requested: AtomicBool::new(false),
            init_succeeded: AtomicBool::new(false),
        }
    }

    pub fn http_client(&self) -> &Arc<dyn HttpClient> {
        &self.http_client
    }

    pub fn current_timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn capture_on(&self) -> bool {
        self.server_config
            .lock()
            .map(|c| c.capture_enabled)
            .unwrap_or(false)
    }

    pub fn disable_capture(&self) -> Result<(), AgentError> {
        self.server_config.lock()?.capture_enabled = false;
        Ok(())
    }

    pub fn clear_all_session_data(&self) -> Result<(), AgentError> {
        let mut sessions = self.sessions.lock()?;
        for tracked in sessions.iter() {
            tracked.session.clear_captured_data()?;
        }
        sessions.retain(|tracked| !tracked.session.is_finished());
        Ok(())
    }

    pub fn add_session(&self, session: Arc<Session>) -> Result<(), AgentError> {
        self.sessions.lock()?.push(TrackedSession {
            session,
            configured: AtomicBool::new(false),
        });
        Ok(())
    }

    pub(crate) fn remove_session(&self, session: &Arc<Session>) -> Result<(), AgentError> {
        self.sessions
            .lock()?
            .retain(|t| !Arc::ptr_eq(&t.session, session));
        Ok(())
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn init_succeeded(&self) -> bool {
        self.init_succeeded.load(Ordering::SeqCst)
    }

    pub fn set_init_succeeded(&self, value: bool) {
        self.init_succeeded.store(value, Ordering::SeqCst);
    }

    pub fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Applies the outcome of a status-bearing response: disables capture
    /// and drops all session data on an erroneous or missing response,
    /// otherwise adopts the new server configuration.
    pub fn handle_response(&self, response: Option<&StatusResponse>) -> Result<(), AgentError> {
        match response {
            Some(response) if !response.is_erroneous() => {
                self.update_from(response)?;
                if !self.capture_on() {
                    self.clear_all_session_data()?;
                }
            }
            _ => {
                self.disable_capture()?;
                self.clear_all_session_data()?;
            }
        }
        Ok(())
    }

    pub fn update_from(&self, response: &StatusResponse) -> Result<(), AgentError> {
        if let Some(payload) = &response.payload {
            let updated = ServerConfig::from_status_payload(payload);
            tracing::debug!(?updated, "received new server configuration");
            *self.server_config.lock()? = updated;
        }
        Ok(())
    }

    pub fn send_interval_ms(&self) -> u64 {
        self.server_config
            .lock()
            .map(|c| c.send_interval_ms)
            .unwrap_or(120_000)
    }

    pub fn last_open_session_beacon_send_time_ms(&self) -> i64 {
        self.last_open_session_beacon_send_time_ms.load(Ordering::SeqCst)
    }

    pub fn set_last_open_session_beacon_send_time_ms(&self, value: i64) {
        self.last_open_session_beacon_send_time_ms.store(value, Ordering::SeqCst);
    }

    pub fn last_status_check_time_ms(&self) -> i64 {
        self.last_status_check_time_ms.load(Ordering::SeqCst)
    }

    pub fn set_last_status_check_time_ms(&self, value: i64) {
        self.last_status_check_time_ms.store(value, Ordering::SeqCst);
    }

    pub(crate) fn not_configured_sessions(&self) -> Result<Vec<Arc<Session>>, AgentError> {
        Ok(self
            .sessions
            .lock()?
            .iter()
            .filter(|t| !t.configured.load(Ordering::SeqCst))
            .map(|t| Arc::clone(&t.session))
            .collect())
    }

    pub(crate) fn mark_configured(&self, session: &Arc<Session>) -> Result<(), AgentError> {
        let sessions = self.sessions.lock()?;
        if let Some(tracked) = sessions.iter().find(|t| Arc::ptr_eq(&t.session, session)) {
            tracked.configured.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    pub(crate) fn finished_and_configured_sessions(&self) -> Result<Vec<Arc<Session>>, AgentError> {
        Ok(self
            .sessions
            .lock()?
            .iter()
            .filter(|t| t.configured.load(Ordering::SeqCst) && t.session.is_finished())
            .map(|t| Arc::clone(&t.session))
            .collect())
    }

    pub(crate) fn open_and_configured_sessions(&self) -> Result<Vec<Arc<Session>>, AgentError> {
        Ok(self
            .sessions
            .lock()?
            .iter()
            .filter(|t| t.configured.load(Ordering::SeqCst) && !t.session.is_finished())
            .map(|t| Arc::clone(&t.session))
            .collect())
    }

    pub(crate) fn all_sessions(&self) -> Result<Vec<Arc<Session>>, AgentError> {
        Ok(self.sessions.lock()?.iter().map(|t| Arc::clone(&t.session)).collect())
    }
}

impl AdditionalQueryParameters for BeaconSendingContext {
    /// The agent does not persist server configuration across process
    /// restarts, so it always reports itself as running the oldest known
    /// configuration.
    fn configuration_timestamp_ms(&self) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{Beacon, BeaconIdentity};
    use crate::cache::{BeaconCache, BeaconKey};
    use crate::config::{CrashReportingLevel, DataCollectionLevel, PrivacyConfiguration};
    use crate::http::StatusResponse;

    struct StubHttpClient;
    impl HttpClient for StubHttpClient {
        fn send_status_request(&self, _params: &dyn AdditionalQueryParameters) -> Result<StatusResponse, AgentError> {
            Ok(StatusResponse {
                status_code: 200,
                payload: None,
            })
        }
        fn send_new_session_request(&self, _params: &dyn AdditionalQueryParameters) -> Result<StatusResponse, AgentError> {
            Ok(StatusResponse {
                status_code: 200,
                payload: None,
            })
        }
        fn send_beacon_request(
            &self,
            _client_ip: Option<&str>,
            _data: &str,
            _params: &dyn AdditionalQueryParameters,
        ) -> Result<StatusResponse, AgentError> {
            Ok(StatusResponse {
                status_code: 200,
                payload: None,
            })
        }
    }

    fn test_session() -> Arc<Session> {
        let beacon = Beacon::new(
            BeaconKey::new(1, 0),
            Arc::new(BeaconCache::new()),
            Arc::new(Mutex::new(ServerConfig::default())),
            PrivacyConfiguration {
                data_collection_level: DataCollectionLevel::UserBehavior,
                crash_reporting_level: CrashReportingLevel::OptInCrashes,
            },
            BeaconIdentity {
                application_id: "app".to_string(),
                application_name: "App".to_string(),
                application_version: "1.0".to_string(),
                os: "linux".to_string(),
                manufacturer: "acme".to_string(),
                device_id: 1,
            },
            None,
            Utc::now(),
            0,
        );
        Arc::new(Session::start(beacon).unwrap())
    }

    fn test_context() -> BeaconSendingContext {
        BeaconSendingContext::new(Arc::new(StubHttpClient), Arc::new(Mutex::new(ServerConfig::default())))
    }

    #[test]
    fn disable_capture_flips_shared_server_config() {
        let context = test_context();
        assert!(context.capture_on());
        context.disable_capture().unwrap();
        assert!(!context.capture_on());
    }

    #[test]
    fn new_sessions_start_unconfigured_until_marked() {
        let context = test_context();
        let session = test_session();
        context.add_session(Arc::clone(&session)).unwrap();

        assert_eq!(context.not_configured_sessions().unwrap().len(), 1);
        context.mark_configured(&session).unwrap();
        assert!(context.not_configured_sessions().unwrap().is_empty());
    }

    #[test]
    fn clear_all_session_data_drops_finished_sessions() {
        let context = test_context();
        let session = test_session();
        context.add_session(Arc::clone(&session)).unwrap();
        session.end(None, true).unwrap();

        context.clear_all_session_data().unwrap();
        assert!(context.all_sessions().unwrap().is_empty());
    }

    #[test]
    fn handle_response_without_payload_disables_capture() {
        let context = test_context();
        context.handle_response(None).unwrap();
        assert!(!context.capture_on());
    }
}
