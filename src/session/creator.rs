//! Allocates session numbers and builds the `Beacon` + `Session` pair for a
//! freshly (re-)started session. See
//! `original_source/openkit/core/objects/session_creator.py` and
//! `original_source/openkit/providers/session_id.py`.
//!
//! The upstream `SessionIDProvider.next_session_id` reads-then-writes a
//! plain Python int with no lock, so two sessions starting on different
//! threads at once can be handed the same id. Here the counter is a single
//! atomic compare-exchange loop, so every caller gets a distinct id even
//! under concurrent session creation.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::beacon::{Beacon, BeaconIdentity};
use crate::cache::{BeaconCache, BeaconKey};
use crate::config::{AgentConfiguration, PrivacyConfiguration, ServerConfig};

const MAX_SESSION_ID: i32 = (1i64 << 31) as i32 - 1;

/// Hands out session numbers that never collide across threads.
pub struct SessionIdProvider {
    current: AtomicI32,
}

impl SessionIdProvider {
    pub fn new() -> Self {
        let initial_offset = rand::rng().random_range(0..=MAX_SESSION_ID);
        Self {
            current: AtomicI32::new(initial_offset),
        }
    }

    #[cfg(test)]
    fn with_offset(initial_offset: i32) -> Self {
        Self {
            current: AtomicI32::new(initial_offset),
        }
    }

    /// Returns the next session id, wrapping back to 1 after `MAX_SESSION_ID`.
    pub fn next_session_id(&self) -> i32 {
        loop {
            let current = self.current.load(Ordering::SeqCst);
            let next = if current >= MAX_SESSION_ID { 1 } else { current + 1 };
            if self
                .current
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return next;
            }
        }
    }
}

impl Default for SessionIdProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the `Beacon` half of every new session a `SessionProxy` creates,
/// threading through the identity, cache, and session-id-provider that stay
/// fixed for the life of the owning proxy.
pub struct SessionCreator {
    identity: BeaconIdentity,
    privacy_config: PrivacyConfiguration,
    beacon_cache: Arc<BeaconCache>,
    ip_address: Option<String>,
    session_id_provider: Arc<SessionIdProvider>,
    session_number: AtomicI32,
}

impl SessionCreator {
    pub fn new(
        config: &AgentConfiguration,
        beacon_cache: Arc<BeaconCache>,
        ip_address: Option<String>,
        session_id_provider: Arc<SessionIdProvider>,
    ) -> Self {
        let session_number = session_id_provider.next_session_id();
        Self {
            identity: BeaconIdentity {
                application_id: config.application_id.clone(),
                application_name: config.application_name.clone(),
                application_version: config.version.clone(),
                os: config.os.clone(),
                manufacturer: config.manufacturer.clone(),
                device_id: config.device_id.unwrap_or_else(random_device_id),
            },
            privacy_config: config.privacy,
            beacon_cache,
            ip_address,
            session_id_provider,
            session_number: AtomicI32::new(session_number),
        }
    }

    /// Builds a beacon for a split of the current session: same session
    /// number (unless `reset` has been called since), given sequence number.
    pub fn create_beacon(
        &self,
        session_sequence_number: i32,
        server_config: Arc<Mutex<ServerConfig>>,
        start_time: DateTime<Utc>,
    ) -> Beacon {
        let session_number = self.session_number.load(Ordering::SeqCst);
        let key = BeaconKey::new(session_number, session_sequence_number);
        let traffic_control_value = rand::rng().random_range(0..=100u8);
        Beacon::new(
            key,
            Arc::clone(&self.beacon_cache),
            server_config,
            self.privacy_config,
            self.identity.clone(),
            self.ip_address.clone(),
            start_time,
            traffic_control_value,
        )
    }

    /// Allocates a brand new session number for the next beacon this creator
    /// builds. Used when a time-based split starts a wholly new session
    /// rather than just another sequence of the current one.
    pub fn reset(&self) {
        self.session_number
            .store(self.session_id_provider.next_session_id(), Ordering::SeqCst);
    }

    pub fn session_id_provider(&self) -> &Arc<SessionIdProvider> {
        &self.session_id_provider
    }
}

fn random_device_id() -> u64 {
    rand::rng().random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_at_max_value() {
        let provider = SessionIdProvider::with_offset(MAX_SESSION_ID);
        assert_eq!(provider.next_session_id(), 1);
    }

    #[test]
    fn increments_sequentially() {
        let provider = SessionIdProvider::with_offset(10);
        assert_eq!(provider.next_session_id(), 11);
        assert_eq!(provider.next_session_id(), 12);
    }

    #[test]
    fn concurrent_callers_never_collide() {
        let provider = Arc::new(SessionIdProvider::with_offset(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                std::thread::spawn(move || {
                    (0..50).map(|_| provider.next_session_id()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all_ids: Vec<i32> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all_ids.sort_unstable();
        let before_dedup = all_ids.len();
        all_ids.dedup();
        assert_eq!(before_dedup, all_ids.len());
    }
}
