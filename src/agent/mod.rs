//! Embedder-facing façade: wires the cache, evictor, watchdog, and sender
//! together behind the handful of calls an application actually makes
//! (start a session, record activity, shut down cleanly).

use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::cache::evictor::EvictorHandle;
use crate::cache::BeaconCache;
use crate::config::{AgentConfiguration, ServerConfig};
use crate::error::AgentError;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::sender::BeaconSender;
use crate::session::{SessionCreator, SessionIdProvider, SessionProxy};
use crate::watchdog::{SessionWatchdog, SessionWatchdogContext};

/// One running agent instance: a logical session plus the background
/// threads that drain and evict its data. Dropping this without calling
/// `shutdown` leaves the threads running; callers own the shutdown call.
pub struct Agent {
    session: Arc<SessionProxy>,
    sender: Arc<BeaconSender>,
    watchdog: Arc<SessionWatchdog>,
    evictor: Mutex<Option<EvictorHandle>>,
}

impl Agent {
    pub fn new(config: AgentConfiguration) -> Result<Self, AgentError> {
        Self::with_http_client(config, None)
    }

    fn with_http_client(
        config: AgentConfiguration,
        http_client: Option<Arc<dyn HttpClient>>,
    ) -> Result<Self, AgentError> {
        let server_config = Arc::new(Mutex::new(ServerConfig::default()));
        let cache = Arc::new(BeaconCache::new());

        let evictor = crate::cache::BeaconCacheEvictor::new(
            Arc::clone(&cache),
            config.cache.max_age_ms,
            config.cache.lower_memory_bytes,
        )?
        .spawn();

        let http_client = match http_client {
            Some(client) => client,
            None => Arc::new(ReqwestHttpClient::new(
                &config.endpoint,
                &config.application_id,
                server_config.lock()?.server_id,
            )?),
        };

        let sender = Arc::new(BeaconSender::new(http_client, Arc::clone(&server_config)));
        sender.initialize()?;

        let watchdog = Arc::new(SessionWatchdog::new(Arc::new(SessionWatchdogContext::new())));
        watchdog.initialize()?;

        let id_provider = Arc::new(SessionIdProvider::new());
        let creator = SessionCreator::new(&config, cache, None, id_provider);
        let session = SessionProxy::new(
            creator,
            Arc::clone(&watchdog),
            Arc::clone(&sender) as Arc<dyn crate::session::proxy::SessionRegistry>,
            server_config,
            Utc::now(),
        )?;

        Ok(Self {
            session,
            sender,
            watchdog,
            evictor: Mutex::new(Some(evictor)),
        })
    }

    pub fn session(&self) -> &Arc<SessionProxy> {
        &self.session
    }

    /// Ends the current session and stops every background thread. Blocks
    /// until the sender has flushed whatever it can.
    pub fn shutdown(&self) -> Result<(), AgentError> {
        self.session.end()?;
        self.sender.shutdown()?;
        self.watchdog.shutdown()?;
        if let Some(evictor) = self.evictor.lock()?.take() {
            evictor.stop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{AdditionalQueryParameters, StatusResponse};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubHttpClient {
        shutting_down: Arc<AtomicBool>,
    }

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
            if self.shutting_down.load(Ordering::SeqCst) {
                return Ok(StatusResponse {
                    status_code: 200,
                    payload: None,
                });
            }
            Ok(StatusResponse {
                status_code: 200,
                payload: None,
            })
        }
    }

    fn test_config() -> AgentConfiguration {
        AgentConfiguration {
            endpoint: "https://example.test/mbeacon".to_string(),
            application_id: "app-1".to_string(),
            application_name: "Test".to_string(),
            version: "1.0".to_string(),
            device_id: Some(42),
            os: "linux".to_string(),
            manufacturer: "acme".to_string(),
            cache: Default::default(),
            privacy: Default::default(),
        }
    }

    #[test]
    fn new_agent_starts_and_shuts_down_cleanly() {
        let client: Arc<dyn HttpClient> = Arc::new(StubHttpClient {
            shutting_down: Arc::new(AtomicBool::new(false)),
        });
        let agent = Agent::with_http_client(test_config(), Some(client)).unwrap();
        agent.session().record_action(&crate::beacon::Action {
            id: 1,
            parent_action_id: 0,
            name: "a".to_string(),
            start_sequence_number: 1,
            end_sequence_number: 2,
            start_time: Utc::now(),
            end_time: Utc::now(),
        }).unwrap();
        agent.shutdown().unwrap();
    }
}
