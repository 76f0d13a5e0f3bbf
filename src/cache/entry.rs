//! Per-beacon cache entry: separate queues for events and actions, plus the
//! "being sent" staging queues a chunking pass copies into. See
//! `original_source/openkit/core/caching/beacon_cache.py` (`BeaconCacheEntry`).

use super::record::Record;

const DATA_DELIMITER: &str = "&";

/// Holds the not-yet-sent and in-flight records for one beacon.
#[derive(Debug, Default)]
pub struct BeaconCacheEntry {
    pub events: Vec<Record>,
    pub actions: Vec<Record>,
    pub events_being_sent: Vec<Record>,
    pub actions_being_sent: Vec<Record>,
    pub total_bytes: usize,
}

impl BeaconCacheEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once a send is in progress and no staging copy has happened yet.
    pub fn needs_data_copied_before_chunking(&self) -> bool {
        self.actions_being_sent.is_empty() && self.events_being_sent.is_empty()
    }

    pub fn has_data_to_send(&self) -> bool {
        !self.events_being_sent.is_empty() || !self.actions_being_sent.is_empty()
    }

    /// Moves the live queues into the staging queues and zeroes the byte
    /// count the live queues were contributing (the cache's outer size
    /// accounting follows suit).
    pub fn copy_data_for_sending(&mut self) {
        self.actions_being_sent = std::mem::take(&mut self.actions);
        self.events_being_sent = std::mem::take(&mut self.events);
        self.total_bytes = 0;
    }

    /// Builds one wire-ready chunk no larger than `max_size`, marking the
    /// records it consumed. Returns an empty string once nothing is staged.
    pub fn get_chunk(&mut self, chunk_prefix: &str, max_size: usize, delimiter: &str) -> String {
        if !self.has_data_to_send() {
            return String::new();
        }
        self.get_next_chunk(chunk_prefix, max_size, delimiter)
    }

    fn get_next_chunk(&mut self, chunk_prefix: &str, max_size: usize, delimiter: &str) -> String {
        let mut out = String::from(chunk_prefix);
        Self::chunkify_data_list(&mut out, &mut self.events_being_sent, max_size, delimiter);
        Self::chunkify_data_list(&mut out, &mut self.actions_being_sent, max_size, delimiter);
        out
    }

    fn chunkify_data_list(
        out: &mut String,
        data_being_sent: &mut [Record],
        max_size: usize,
        delimiter: &str,
    ) {
        for record in data_being_sent.iter_mut() {
            if out.len() >= max_size {
                break;
            }
            record.marked_for_sending = true;
            if record.data.starts_with(delimiter) {
                out.push_str(&record.data);
            } else {
                out.push_str(delimiter);
                out.push_str(&record.data);
            }
        }
    }

    /// Undoes a failed chunking pass: unmarks every staged record and merges
    /// the staging queues back into the live ones (newly-added records go
    /// first so the next attempt re-sends the oldest data first).
    pub fn reset_data_marked_for_sending(&mut self) {
        if !self.has_data_to_send() {
            return;
        }

        let mut num_bytes = 0usize;
        for record in self.events_being_sent.iter_mut() {
            record.marked_for_sending = false;
            num_bytes += record.data.len();
        }
        for record in self.actions_being_sent.iter_mut() {
            record.marked_for_sending = false;
            num_bytes += record.data.len();
        }

        self.events_being_sent.extend(std::mem::take(&mut self.events));
        self.actions_being_sent
            .extend(std::mem::take(&mut self.actions));
        self.events = std::mem::take(&mut self.events_being_sent);
        self.actions = std::mem::take(&mut self.actions_being_sent);

        self.total_bytes += num_bytes;
    }

    /// Drops every staged record that a completed send actually consumed.
    pub fn remove_data_marked_for_sending(&mut self) {
        if !self.has_data_to_send() {
            return;
        }
        self.events_being_sent.retain(|r| !r.marked_for_sending);
        self.actions_being_sent.retain(|r| !r.marked_for_sending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(data: &str) -> Record {
        Record::new(Utc::now(), data.to_string())
    }

    #[test]
    fn copy_for_sending_moves_live_into_staging() {
        let mut entry = BeaconCacheEntry::new();
        entry.events.push(record("ev=1"));
        entry.actions.push(record("ac=1"));
        entry.total_bytes = 8;

        assert!(entry.needs_data_copied_before_chunking());
        entry.copy_data_for_sending();

        assert!(entry.events.is_empty());
        assert!(entry.actions.is_empty());
        assert_eq!(entry.events_being_sent.len(), 1);
        assert_eq!(entry.actions_being_sent.len(), 1);
        assert_eq!(entry.total_bytes, 0);
        assert!(entry.has_data_to_send());
    }

    #[test]
    fn get_chunk_respects_max_size_and_marks_records() {
        let mut entry = BeaconCacheEntry::new();
        entry.events_being_sent = vec![record("ev=1"), record("ev=2"), record("ev=3")];

        let chunk = entry.get_chunk("prefix", 15, DATA_DELIMITER);
        assert!(chunk.starts_with("prefix"));
        assert!(entry.events_being_sent[0].marked_for_sending);
        assert!(!entry.events_being_sent[2].marked_for_sending);
    }

    #[test]
    fn remove_data_marked_for_sending_drops_only_marked() {
        let mut entry = BeaconCacheEntry::new();
        entry.events_being_sent = vec![record("ev=1"), record("ev=2")];
        entry.events_being_sent[0].marked_for_sending = true;

        entry.remove_data_marked_for_sending();
        assert_eq!(entry.events_being_sent.len(), 1);
        assert_eq!(entry.events_being_sent[0].data, "ev=2");
    }

    #[test]
    fn reset_unmarks_and_merges_new_data_first() {
        let mut entry = BeaconCacheEntry::new();
        entry.events_being_sent = vec![record("ev=1")];
        entry.events_being_sent[0].marked_for_sending = true;
        entry.events.push(record("ev=new"));

        entry.reset_data_marked_for_sending();

        assert_eq!(entry.events.len(), 2);
        assert_eq!(entry.events[0].data, "ev=1");
        assert!(!entry.events[0].marked_for_sending);
        assert!(entry.events_being_sent.is_empty());
    }
}
