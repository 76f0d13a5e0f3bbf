//! A single cached beacon fragment (one serialized event or action string).
//! See `original_source/openkit/core/caching/beacon_cache.py` (`BeaconCacheRecord`).

use chrono::{DateTime, Utc};

/// One piece of serialized beacon data awaiting transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub data: String,
    pub marked_for_sending: bool,
}

impl Record {
    pub fn new(timestamp: DateTime<Utc>, data: String) -> Self {
        Self {
            timestamp,
            data,
            marked_for_sending: false,
        }
    }

    /// Byte size of the serialized payload, used for cache size accounting.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn size_matches_data_length() {
        let record = Record::new(Utc::now(), "abc".to_string());
        assert_eq!(record.size(), 3);
    }

    #[test]
    fn ordering_is_by_timestamp() {
        let now = Utc::now();
        let older = Record::new(now - Duration::seconds(1), "a".to_string());
        let newer = Record::new(now, "b".to_string());
        assert!(older < newer);
    }
}
