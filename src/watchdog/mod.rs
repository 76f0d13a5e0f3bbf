//! Background thread that closes sessions after a grace period and splits
//! long-lived ones on a timer, off the hot path of recording events. See
//! `original_source/openkit/core/session_watchdog.py`.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::error::AgentError;
use crate::session::Session;

const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(5);

/// Implemented by `SessionProxy`. Lets the watchdog poll idle/duration
/// splits without depending on the proxy type directly.
pub trait SplitByTimeout: Send + Sync {
    /// Attempts a time-based split if one is due. Returns `None` once the
    /// proxy is finished, so the watchdog can stop polling it; otherwise the
    /// next instant a split should be attempted.
    fn split_session_by_time(&self) -> Option<DateTime<Utc>>;
}

struct PendingClose {
    session: Arc<Session>,
    grace_period_end: DateTime<Utc>,
}

#[derive(Default)]
struct WatchdogState {
    sessions_to_close: Vec<PendingClose>,
    sessions_to_split_by_timeout: Vec<Arc<dyn SplitByTimeout>>,
}

/// Shared queues the background thread polls. Cheap to clone via `Arc`;
/// every session/proxy enqueues and dequeues itself through this directly.
pub struct SessionWatchdogContext {
    state: Mutex<WatchdogState>,
}

impl SessionWatchdogContext {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WatchdogState::default()),
        }
    }

    /// Ends `session` right away if it has nothing left to send; otherwise
    /// queues it for a forced close once `close_period_ms` has elapsed.
    pub fn close_or_enqueue_for_closing(
        &self,
        session: Arc<Session>,
        close_period_ms: u64,
    ) -> Result<(), AgentError> {
        if session.try_end()? {
            return Ok(());
        }
        let grace_period_end = Utc::now() + chrono::Duration::milliseconds(close_period_ms as i64);
        session.set_grace_period_end(grace_period_end)?;
        self.state.lock()?.sessions_to_close.push(PendingClose {
            session,
            grace_period_end,
        });
        Ok(())
    }

    pub fn dequeue_from_closing(&self, session: &Arc<Session>) -> Result<(), AgentError> {
        let mut state = self.state.lock()?;
        state
            .sessions_to_close
            .retain(|pending| !Arc::ptr_eq(&pending.session, session));
        Ok(())
    }

    pub fn add_to_split_by_timeout(&self, proxy: Arc<dyn SplitByTimeout>) -> Result<(), AgentError> {
        self.state.lock()?.sessions_to_split_by_timeout.push(proxy);
        Ok(())
    }

    pub fn remove_from_split_by_timeout(&self, proxy: &Arc<dyn SplitByTimeout>) -> Result<(), AgentError> {
        let mut state = self.state.lock()?;
        state
            .sessions_to_split_by_timeout
            .retain(|p| !Arc::ptr_eq(p, proxy));
        Ok(())
    }

    /// One poll pass: force-closes any session whose grace period has
    /// elapsed and nudges every registered proxy to split if it's due.
    /// Returns how long the caller can sleep before the next pass matters.
    fn execute_once(&self) -> Result<StdDuration, AgentError> {
        let close_sleep = self.close_expired_sessions()?;
        let split_sleep = self.split_timed_out_sessions()?;
        Ok(close_sleep.min(split_sleep))
    }

    fn close_expired_sessions(&self) -> Result<StdDuration, AgentError> {
        let pending = {
            let state = self.state.lock()?;
            state
                .sessions_to_close
                .iter()
                .map(|p| (Arc::clone(&p.session), p.grace_period_end))
                .collect::<Vec<_>>()
        };

        let mut sleep_time = DEFAULT_POLL_INTERVAL;
        let mut expired = Vec::new();
        let now = Utc::now();
        for (session, grace_period_end) in pending {
            if now >= grace_period_end {
                expired.push(session);
                continue;
            }
            let remaining = grace_period_end - now;
            if let Ok(remaining) = remaining.to_std() {
                sleep_time = sleep_time.min(remaining);
            }
        }

        if !expired.is_empty() {
            let mut state = self.state.lock()?;
            state
                .sessions_to_close
                .retain(|p| !expired.iter().any(|s| Arc::ptr_eq(s, &p.session)));
        }
        for session in &expired {
            session.end(None, false)?;
        }

        Ok(sleep_time)
    }

    fn split_timed_out_sessions(&self) -> Result<StdDuration, AgentError> {
        let proxies = {
            let state = self.state.lock()?;
            state.sessions_to_split_by_timeout.clone()
        };

        let mut sleep_time = DEFAULT_POLL_INTERVAL;
        let mut finished = Vec::new();
        for proxy in &proxies {
            match proxy.split_session_by_time() {
                None => finished.push(Arc::clone(proxy)),
                Some(next_split_time) => {
                    let now = Utc::now();
                    if next_split_time <= now {
                        continue;
                    }
                    if let Ok(remaining) = (next_split_time - now).to_std() {
                        sleep_time = sleep_time.min(remaining);
                    }
                }
            }
        }

        if !finished.is_empty() {
            let mut state = self.state.lock()?;
            state
                .sessions_to_split_by_timeout
                .retain(|p| !finished.iter().any(|f| Arc::ptr_eq(f, p)));
        }

        Ok(sleep_time)
    }
}

impl Default for SessionWatchdogContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the watchdog's background thread.
pub struct SessionWatchdog {
    context: Arc<SessionWatchdogContext>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
}

impl SessionWatchdog {
    pub fn new(context: Arc<SessionWatchdogContext>) -> Self {
        Self {
            context,
            handle: Mutex::new(None),
            shutdown: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn initialize(&self) -> Result<(), AgentError> {
        let context = Arc::clone(&self.context);
        let shutdown = Arc::clone(&self.shutdown);
        let handle = std::thread::Builder::new()
            .name("session-watchdog".into())
            .spawn(move || {
                while !shutdown.load(std::sync::atomic::Ordering::SeqCst) {
                    match context.execute_once() {
                        Ok(sleep_time) => std::thread::sleep(sleep_time),
                        Err(err) => {
                            tracing::warn!(%err, "session watchdog pass failed");
                            std::thread::sleep(DEFAULT_POLL_INTERVAL);
                        }
                    }
                }
            })
            .map_err(AgentError::Io)?;
        *self.handle.lock()? = Some(handle);
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), AgentError> {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.handle.lock()?.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    pub fn close_or_enqueue_for_closing(
        &self,
        session: Arc<Session>,
        close_period_ms: u64,
    ) -> Result<(), AgentError> {
        self.context.close_or_enqueue_for_closing(session, close_period_ms)
    }

    pub fn dequeue_from_closing(&self, session: &Arc<Session>) -> Result<(), AgentError> {
        self.context.dequeue_from_closing(session)
    }

    pub fn add_to_split_by_timeout(&self, proxy: Arc<dyn SplitByTimeout>) -> Result<(), AgentError> {
        self.context.add_to_split_by_timeout(proxy)
    }

    pub fn remove_from_split_by_timeout(&self, proxy: &Arc<dyn SplitByTimeout>) -> Result<(), AgentError> {
        self.context.remove_from_split_by_timeout(proxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{Beacon, BeaconIdentity};
    use crate::cache::{BeaconCache, BeaconKey};
    use crate::config::{CrashReportingLevel, DataCollectionLevel, PrivacyConfiguration, ServerConfig};
    use std::sync::atomic::{AtomicBool, Ordering};

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

    #[test]
    fn close_or_enqueue_queues_when_data_is_pending() {
        let context = SessionWatchdogContext::new();
        let session = test_session();
        context
            .close_or_enqueue_for_closing(Arc::clone(&session), 60_000)
            .unwrap();
        assert!(!session.is_finished());
        assert_eq!(context.state.lock().unwrap().sessions_to_close.len(), 1);
    }

    #[test]
    fn close_or_enqueue_ends_immediately_with_nothing_pending() {
        let context = SessionWatchdogContext::new();
        let session = test_session();
        session.beacon().clear_data().unwrap();
        context
            .close_or_enqueue_for_closing(Arc::clone(&session), 60_000)
            .unwrap();
        assert!(session.is_finished());
        assert!(context.state.lock().unwrap().sessions_to_close.is_empty());
    }

    struct StubProxy {
        finished: AtomicBool,
    }

    impl SplitByTimeout for StubProxy {
        fn split_session_by_time(&self) -> Option<DateTime<Utc>> {
            if self.finished.load(Ordering::SeqCst) {
                None
            } else {
                Some(Utc::now() - chrono::Duration::seconds(1))
            }
        }
    }

    #[test]
    fn split_timed_out_sessions_drops_finished_proxies() {
        let context = SessionWatchdogContext::new();
        let proxy: Arc<dyn SplitByTimeout> = Arc::new(StubProxy {
            finished: AtomicBool::new(true),
        });
        context.add_to_split_by_timeout(Arc::clone(&proxy)).unwrap();
        context.split_timed_out_sessions().unwrap();
        assert!(context
            .state
            .lock()
            .unwrap()
            .sessions_to_split_by_timeout
            .is_empty());
    }
}
