//! Background thread that trims the beacon cache by record age and, failing
//! that, by total size. See `original_source/openkit/core/caching/evictor.py`.

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;

use super::{BeaconCache, BeaconCacheEntry, Record};
use crate::error::AgentError;

/// Idle poll interval: a safety net in case a notify is ever missed, the
/// eviction passes themselves are cheap no-ops when nothing is overdue.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Runs `time_eviction` and `space_eviction` whenever the cache signals a
/// write, coalescing bursts of writes into a single pass.
pub struct BeaconCacheEvictor {
    cache: Arc<BeaconCache>,
    max_age_ms: u64,
    lower_memory_bytes: u64,
    rx: Receiver<()>,
}

impl BeaconCacheEvictor {
    /// Creates the evictor and registers it as an observer of `cache`.
    pub fn new(
        cache: Arc<BeaconCache>,
        max_age_ms: u64,
        lower_memory_bytes: u64,
    ) -> Result<Self, AgentError> {
        let (tx, rx) = std::sync::mpsc::sync_channel::<()>(1);
        cache.add_observer(tx)?;
        Ok(Self {
            cache,
            max_age_ms,
            lower_memory_bytes,
            rx,
        })
    }

    /// Spawns the background thread. The thread exits once the returned
    /// `SyncSender` half... (there is none kept by the caller; instead, drop
    /// the evictor's internal sender by calling `stop` through the handle).
    pub fn spawn(self) -> EvictorHandle {
        let (stop_tx, stop_rx) = std::sync::mpsc::sync_channel::<()>(1);
        let handle = std::thread::Builder::new()
            .name("beacon-cache-evictor".into())
            .spawn(move || self.run(&stop_rx))
            .expect("failed to spawn beacon-cache-evictor thread");
        EvictorHandle {
            stop_tx,
            handle: Some(handle),
        }
    }

    fn run(&self, stop_rx: &Receiver<()>) {
        loop {
            match self.rx.recv_timeout(IDLE_POLL_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if stop_rx.try_recv().is_ok() {
                break;
            }

            tracing::debug!("running beacon cache evictor pass");
            if let Err(err) = self.time_eviction() {
                tracing::warn!(%err, "time eviction pass failed");
            }
            if let Err(err) = self.space_eviction() {
                tracing::warn!(%err, "space eviction pass failed");
            }
        }
        tracing::debug!("beacon cache evictor thread exiting");
    }

    fn time_eviction(&self) -> Result<(), AgentError> {
        let min_allowed = Utc::now() - chrono::Duration::milliseconds(self.max_age_ms as i64);
        let mut actions_deleted = 0usize;
        let mut events_deleted = 0usize;

        for entry in self.cache.entries_snapshot()? {
            let mut entry = entry.lock().map_err(|e| AgentError::lock(e.to_string()))?;
            let before_actions = entry.actions.len();
            let before_events = entry.events.len();
            entry.actions.retain(|r| r.timestamp > min_allowed);
            entry.events.retain(|r| r.timestamp > min_allowed);
            entry.total_bytes = entry.actions.iter().map(Record::size).sum::<usize>()
                + entry.events.iter().map(Record::size).sum::<usize>();
            actions_deleted += before_actions - entry.actions.len();
            events_deleted += before_events - entry.events.len();
        }

        tracing::debug!(actions_deleted, events_deleted, "time eviction complete");
        self.cache.recompute_size()
    }

    fn space_eviction(&self) -> Result<(), AgentError> {
        let lower = self.lower_memory_bytes as i64;
        loop {
            if self.cache.current_size() <= lower {
                break;
            }
            let entries = self.cache.entries_snapshot()?;
            if entries.is_empty() {
                break;
            }

            let mut evicted_any = false;
            for entry in &entries {
                let mut entry = entry.lock().map_err(|e| AgentError::lock(e.to_string()))?;
                if Self::evict_oldest(&mut entry) {
                    evicted_any = true;
                    break;
                }
            }
            self.cache.recompute_size()?;
            if !evicted_any {
                break;
            }
        }
        Ok(())
    }

    /// Removes the single oldest record from `entry`, preferring whichever
    /// of events/actions holds the globally older one. Returns whether
    /// anything was removed.
    fn evict_oldest(entry: &mut BeaconCacheEntry) -> bool {
        let oldest_event_idx = Self::oldest_index(&entry.events);
        let oldest_action_idx = Self::oldest_index(&entry.actions);

        match (oldest_event_idx, oldest_action_idx) {
            (Some(ei), Some(ai)) => {
                if entry.events[ei].timestamp < entry.actions[ai].timestamp {
                    let removed = entry.events.remove(ei);
                    entry.total_bytes -= removed.size();
                } else {
                    let removed = entry.actions.remove(ai);
                    entry.total_bytes -= removed.size();
                }
                true
            }
            (Some(ei), None) => {
                let removed = entry.events.remove(ei);
                entry.total_bytes -= removed.size();
                true
            }
            (None, Some(ai)) => {
                let removed = entry.actions.remove(ai);
                entry.total_bytes -= removed.size();
                true
            }
            (None, None) => false,
        }
    }

    fn oldest_index(records: &[Record]) -> Option<usize> {
        records
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.timestamp)
            .map(|(i, _)| i)
    }
}

/// Handle to a running evictor thread; dropping it does not stop the thread,
/// call `stop` explicitly for an orderly shutdown.
pub struct EvictorHandle {
    stop_tx: SyncSender<()>,
    handle: Option<JoinHandle<()>>,
}

impl EvictorHandle {
    pub fn stop(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BeaconKey;
    use std::sync::Arc;

    #[test]
    fn time_eviction_drops_old_records_only() {
        let cache = Arc::new(BeaconCache::new());
        let key = BeaconKey::new(1, 0);
        let old_ts = Utc::now() - chrono::Duration::milliseconds(10_000);
        cache.add_action(key, old_ts, "at=old".to_string()).unwrap();
        cache
            .add_action(key, Utc::now(), "at=new".to_string())
            .unwrap();

        let evictor = BeaconCacheEvictor::new(Arc::clone(&cache), 1_000, u64::MAX).unwrap();
        evictor.time_eviction().unwrap();

        let entries = cache.entries_snapshot().unwrap();
        let entry = entries[0].lock().unwrap();
        assert_eq!(entry.actions.len(), 1);
        assert_eq!(entry.actions[0].data, "at=new");
    }

    #[test]
    fn space_eviction_drains_down_to_lower_bound() {
        let cache = Arc::new(BeaconCache::new());
        let key = BeaconKey::new(1, 0);
        for i in 0..5 {
            cache
                .add_action(key, Utc::now(), format!("at={i}"))
                .unwrap();
        }
        let before = cache.current_size();
        assert!(before > 0);

        let evictor = BeaconCacheEvictor::new(Arc::clone(&cache), u64::MAX, 4).unwrap();
        evictor.space_eviction().unwrap();

        assert!(cache.current_size() <= 4);
    }
}
