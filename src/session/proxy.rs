//! Splits a logical, long-lived session into a sequence of physical
//! sessions (and `Beacon`s) as server-configured limits are hit. See
//! `original_source/openkit/core/objects/session_proxy.py`.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::beacon::{Action, ReportedValue, WebRequestTracer};
use crate::config::ServerConfig;
use crate::error::AgentError;
use crate::http::{AdditionalQueryParameters, HttpClient, StatusResponse};
use crate::watchdog::{SessionWatchdog, SplitByTimeout};

use super::creator::SessionCreator;
use super::Session;

/// Notified whenever a `SessionProxy` creates a new physical session, so the
/// sender can pick it up for its next send pass.
pub trait SessionRegistry: Send + Sync {
    fn add_session(&self, session: Arc<Session>);
}

/// A logical session: one `SessionCreator`, a sequence of `Session`s behind
/// it, and the bookkeeping needed to decide when to start the next one.
pub struct SessionProxy {
    creator: SessionCreator,
    watchdog: Arc<SessionWatchdog>,
    registry: Arc<dyn SessionRegistry>,
    server_config: Arc<Mutex<ServerConfig>>,
    current_session: Mutex<Arc<Session>>,
    session_sequence_number: AtomicI32,
    last_interaction_time: Mutex<DateTime<Utc>>,
    top_level_action_count: AtomicU32,
    finished: std::sync::atomic::AtomicBool,
    /// Set once in `new`, after the owning `Arc<Self>` exists: the same
    /// trait-object handle the watchdog's split queue holds, so `end` can
    /// remove this proxy from it by pointer identity without reconstructing
    /// an `Arc` out of thin air.
    self_handle: std::sync::OnceLock<Arc<dyn SplitByTimeout>>,
}

impl SessionProxy {
    pub fn new(
        creator: SessionCreator,
        watchdog: Arc<SessionWatchdog>,
        registry: Arc<dyn SessionRegistry>,
        server_config: Arc<Mutex<ServerConfig>>,
        start_time: DateTime<Utc>,
    ) -> Result<Arc<Self>, AgentError> {
        let beacon = creator.create_beacon(0, Arc::clone(&server_config), start_time);
        let session = Arc::new(Session::start(beacon)?);
        registry.add_session(Arc::clone(&session));

        let proxy = Arc::new(Self {
            creator,
            watchdog,
            registry,
            server_config,
            current_session: Mutex::new(session),
            session_sequence_number: AtomicI32::new(1),
            last_interaction_time: Mutex::new(start_time),
            top_level_action_count: AtomicU32::new(0),
            finished: std::sync::atomic::AtomicBool::new(false),
            self_handle: std::sync::OnceLock::new(),
        });

        let split_handle: Arc<dyn SplitByTimeout> = Arc::clone(&proxy) as Arc<dyn SplitByTimeout>;
        let _ = proxy.self_handle.set(Arc::clone(&split_handle));
        proxy.watchdog.add_to_split_by_timeout(split_handle)?;

        Ok(proxy)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn current(&self) -> Result<Arc<Session>, AgentError> {
        Ok(Arc::clone(&*self.current_session.lock()?))
    }

    fn record_top_level_event_interaction(&self) -> Result<(), AgentError> {
        *self.last_interaction_time.lock()? = Utc::now();
        Ok(())
    }

    fn record_top_action_event(&self) -> Result<(), AgentError> {
        self.top_level_action_count.fetch_add(1, Ordering::SeqCst);
        self.record_top_level_event_interaction()
    }

    /// Returns the session new events should be recorded against, splitting
    /// by event count first if the current one has hit its limit.
    fn session_for_recording(&self) -> Result<Arc<Session>, AgentError> {
        if self.split_by_event_count_required()? {
            self.close_or_enqueue_current_session_for_closing()?;
            self.create_split_session_and_make_current(Utc::now())?;
        }
        self.current()
    }

    fn split_by_event_count_required(&self) -> Result<bool, AgentError> {
        let config = self.server_config.lock()?;
        if !config.session_split_by_events_enabled() {
            return Ok(false);
        }
        let Some(max) = config.max_events_per_session else {
            return Ok(false);
        };
        Ok(max <= self.top_level_action_count.load(Ordering::SeqCst))
    }

    fn close_or_enqueue_current_session_for_closing(&self) -> Result<(), AgentError> {
        let session = self.current()?;
        let config = self.server_config.lock()?;
        let close_grace_period_ms = match config.session_timeout_ms {
            Some(timeout_ms) if timeout_ms > 0 => timeout_ms / 2,
            _ => config.send_interval_ms,
        };
        drop(config);
        self.watchdog
            .close_or_enqueue_for_closing(session, close_grace_period_ms)
    }

    fn create_split_session_and_make_current(&self, start_time: DateTime<Utc>) -> Result<(), AgentError> {
        let sequence_number = self.session_sequence_number.fetch_add(1, Ordering::SeqCst);
        let beacon = self
            .creator
            .create_beacon(sequence_number, Arc::clone(&self.server_config), start_time);
        let session = Arc::new(Session::start(beacon)?);
        self.registry.add_session(Arc::clone(&session));

        *self.current_session.lock()? = session;
        self.top_level_action_count.store(0, Ordering::SeqCst);
        *self.last_interaction_time.lock()? = start_time;
        Ok(())
    }

    pub fn record_action(&self, action: &Action) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        let session = self.session_for_recording()?;
        self.record_top_action_event()?;
        session.record_action(action)
    }

    pub fn identify_user(&self, tag: &str) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        let session = self.session_for_recording()?;
        self.record_top_level_event_interaction()?;
        session.identify_user(tag)
    }

    pub fn report_value(&self, parent_action_id: i32, name: &str, value: ReportedValue) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        let session = self.session_for_recording()?;
        self.record_top_level_event_interaction()?;
        session.report_value(parent_action_id, name, value)
    }

    pub fn report_event(&self, parent_action_id: i32, name: &str) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        let session = self.session_for_recording()?;
        self.record_top_level_event_interaction()?;
        session.report_event(parent_action_id, name)
    }

    pub fn report_error(&self, parent_action_id: i32, name: &str, code: i32, reason: &str) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        let session = self.session_for_recording()?;
        self.record_top_level_event_interaction()?;
        session.report_error(parent_action_id, name, code, reason)
    }

    pub fn trace_web_request(&self, parent_action_id: i32, tracer: &WebRequestTracer) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        let session = self.session_for_recording()?;
        self.record_top_level_event_interaction()?;
        session.trace_web_request(parent_action_id, tracer)
    }

    pub fn send_current_session(
        &self,
        http_client: &dyn HttpClient,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<Option<StatusResponse>, AgentError> {
        self.current()?.send_beacon(http_client, params)
    }

    pub fn end(&self) -> Result<(), AgentError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.current()?.end(None, true)?;
        if let Some(handle) = self.self_handle.get() {
            self.watchdog.remove_from_split_by_timeout(handle)?;
        }
        Ok(())
    }
}

impl SplitByTimeout for SessionProxy {
    fn split_session_by_time(&self) -> Option<DateTime<Utc>> {
        if self.is_finished() {
            return None;
        }
        let next_split_time = self.calculate_next_split_time()?;
        let now = Utc::now();
        if next_split_time > now {
            return Some(next_split_time);
        }

        if self.split_and_create_initial_session().is_err() {
            return Some(now);
        }
        self.calculate_next_split_time()
    }
}

impl SessionProxy {
    fn calculate_next_split_time(&self) -> Option<DateTime<Utc>> {
        let config = self.server_config.lock().ok()?;
        let split_by_idle = config.session_split_by_idle_timeout_enabled();
        let split_by_duration = config.session_split_by_duration_enabled();

        let last_interaction = *self.last_interaction_time.lock().ok()?;
        let idle_timeout = config
            .session_timeout_ms
            .map(|ms| last_interaction + chrono::Duration::milliseconds(ms as i64));
        let session_start = self.current_session.lock().ok()?.beacon().session_start_time();
        let duration_limit = config
            .max_session_duration_ms
            .map(|ms| session_start + chrono::Duration::milliseconds(ms as i64));

        match (split_by_idle, split_by_duration) {
            (true, true) => idle_timeout.zip(duration_limit).map(|(a, b)| a.min(b)),
            (true, false) => idle_timeout,
            (false, true) => duration_limit,
            (false, false) => None,
        }
    }

    fn split_and_create_initial_session(&self) -> Result<(), AgentError> {
        self.close_or_enqueue_current_session_for_closing()?;
        self.creator.reset();
        self.session_sequence_number.store(0, Ordering::SeqCst);
        self.create_split_session_and_make_current(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BeaconCache;
    use crate::config::AgentConfiguration;
    use crate::session::SessionIdProvider;

    struct NoopRegistry;
    impl SessionRegistry for NoopRegistry {
        fn add_session(&self, _session: Arc<Session>) {}
    }

    fn test_proxy() -> Arc<SessionProxy> {
        let config = AgentConfiguration {
            endpoint: "https://example.test".to_string(),
            application_id: "app-1".to_string(),
            application_name: "Test".to_string(),
            version: "1.0".to_string(),
            device_id: Some(7),
            os: "linux".to_string(),
            manufacturer: "acme".to_string(),
            cache: Default::default(),
            privacy: Default::default(),
        };
        let cache = Arc::new(BeaconCache::new());
        let id_provider = Arc::new(SessionIdProvider::new());
        let creator = SessionCreator::new(&config, cache, None, id_provider);
        let server_config = Arc::new(Mutex::new(ServerConfig::default()));
        let watchdog = Arc::new(SessionWatchdog::new(Arc::new(
            crate::watchdog::SessionWatchdogContext::new(),
        )));

        SessionProxy::new(creator, watchdog, Arc::new(NoopRegistry), server_config, Utc::now()).unwrap()
    }

    #[test]
    fn splits_current_session_once_event_limit_is_hit() {
        let proxy = test_proxy();
        {
            let mut config = proxy.server_config.lock().unwrap();
            config.max_events_per_session = Some(1);
        }

        let action = Action {
            id: 1,
            parent_action_id: 0,
            name: "a".to_string(),
            start_sequence_number: 1,
            end_sequence_number: 2,
            start_time: Utc::now(),
            end_time: Utc::now(),
        };
        proxy.record_action(&action).unwrap();
        let first_session = proxy.current().unwrap();

        proxy.record_action(&action).unwrap();
        let second_session = proxy.current().unwrap();

        assert!(!Arc::ptr_eq(&first_session, &second_session));
    }

    #[test]
    fn end_is_idempotent() {
        let proxy = test_proxy();
        proxy.end().unwrap();
        assert!(proxy.is_finished());
        proxy.end().unwrap();
    }
}
