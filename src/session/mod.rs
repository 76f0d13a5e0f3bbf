//! A single session's lifetime: one beacon, ended exactly once. See
//! `original_source/openkit/core/session.py` (`SessionImpl`).

pub mod creator;
pub mod proxy;

pub use creator::{SessionCreator, SessionIdProvider};
pub use proxy::SessionProxy;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::beacon::{Action, Beacon, ReportedValue, WebRequestTracer};
use crate::error::AgentError;
use crate::http::{AdditionalQueryParameters, HttpClient, StatusResponse};

/// One beacon's worth of recorded session activity, from start to end.
///
/// A `SessionProxy` owns a sequence of these (one per split); each one maps
/// 1:1 onto a `BeaconKey` in the cache.
pub struct Session {
    beacon: Beacon,
    finished: AtomicBool,
    /// Set by the watchdog when a session is queued for a grace-period
    /// close; read back by `close_or_enqueue_for_closing`-style callers to
    /// decide whether a later end attempt should actually happen now.
    split_by_events_grace_period_end: Mutex<Option<DateTime<Utc>>>,
}

impl Session {
    /// Starts the session: records the session-start event immediately.
    pub fn start(beacon: Beacon) -> Result<Self, AgentError> {
        beacon.start_session()?;
        Ok(Self {
            beacon,
            finished: AtomicBool::new(false),
            split_by_events_grace_period_end: Mutex::new(None),
        })
    }

    pub fn beacon(&self) -> &Beacon {
        &self.beacon
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn data_sending_allowed(&self) -> bool {
        self.beacon.data_capturing_enabled()
    }

    pub fn record_action(&self, action: &Action) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        self.beacon.add_action(action)
    }

    pub fn identify_user(&self, tag: &str) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        self.beacon.identify_user(tag, None)
    }

    pub fn report_value(
        &self,
        parent_action_id: i32,
        name: &str,
        value: ReportedValue,
    ) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        self.beacon.report_value(parent_action_id, name, value, None)
    }

    pub fn report_event(&self, parent_action_id: i32, name: &str) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        self.beacon.report_event(parent_action_id, name, None)
    }

    pub fn report_error(
        &self,
        parent_action_id: i32,
        name: &str,
        code: i32,
        reason: &str,
    ) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        self.beacon.report_error(parent_action_id, name, code, reason, None)
    }

    pub fn trace_web_request(&self, parent_action_id: i32, tracer: &WebRequestTracer) -> Result<(), AgentError> {
        if self.is_finished() {
            return Ok(());
        }
        self.beacon.add_web_request(parent_action_id, tracer)
    }

    pub fn send_beacon(
        &self,
        http_client: &dyn HttpClient,
        params: &dyn AdditionalQueryParameters,
    ) -> Result<Option<StatusResponse>, AgentError> {
        self.beacon.send(http_client, params)
    }

    /// Ends the session. A no-op if it was already ended. `send_end_event`
    /// controls whether a session-end beacon event is recorded first — the
    /// watchdog's forced closes skip it, matching the upstream behaviour of
    /// not reporting an end event for sessions it grace-period-expires.
    pub fn end(&self, end_time: Option<DateTime<Utc>>, send_end_event: bool) -> Result<(), AgentError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if send_end_event {
            self.beacon.end_session(end_time)?;
        }
        Ok(())
    }

    /// Attempts to end the session right now, without a grace period.
    /// Succeeds immediately if the session is already finished or has
    /// nothing left to send; otherwise returns `false` so the caller can
    /// queue it for a delayed close once its last records have gone out.
    pub fn try_end(&self) -> Result<bool, AgentError> {
        if self.is_finished() {
            return Ok(true);
        }
        if self.beacon.has_unsent_data()? {
            return Ok(false);
        }
        self.end(None, false)?;
        Ok(true)
    }

    pub fn clear_captured_data(&self) -> Result<(), AgentError> {
        self.beacon.clear_data()
    }

    pub fn set_grace_period_end(&self, end: DateTime<Utc>) -> Result<(), AgentError> {
        *self
            .split_by_events_grace_period_end
            .lock()
            .map_err(|e| AgentError::lock(e.to_string()))? = Some(end);
        Ok(())
    }

    pub fn grace_period_end(&self) -> Result<Option<DateTime<Utc>>, AgentError> {
        Ok(*self
            .split_by_events_grace_period_end
            .lock()
            .map_err(|e| AgentError::lock(e.to_string()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BeaconCache, BeaconKey};
    use crate::config::{CrashReportingLevel, DataCollectionLevel, PrivacyConfiguration, ServerConfig};
    use crate::beacon::BeaconIdentity;
    use std::sync::{Arc, Mutex as StdMutex};

    fn test_session() -> Session {
        let beacon = Beacon::new(
            BeaconKey::new(1, 0),
            Arc::new(BeaconCache::new()),
            Arc::new(StdMutex::new(ServerConfig::default())),
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
        Session::start(beacon).unwrap()
    }

    #[test]
    fn ending_twice_is_a_no_op() {
        let session = test_session();
        assert!(!session.is_finished());
        session.end(None, true).unwrap();
        assert!(session.is_finished());
        session.end(None, true).unwrap();
    }

    #[test]
    fn finished_session_drops_further_events() {
        let session = test_session();
        session.end(None, true).unwrap();
        session.report_event(0, "ignored").unwrap();
    }

    #[test]
    fn try_end_defers_while_data_is_pending() {
        let session = test_session();
        session.report_event(0, "still-queued").unwrap();
        assert!(!session.try_end().unwrap());
        assert!(!session.is_finished());
    }

    #[test]
    fn try_end_succeeds_once_nothing_is_pending() {
        let session = test_session();
        session.beacon().clear_data().unwrap();
        assert!(session.try_end().unwrap());
        assert!(session.is_finished());
    }
}
