//! Identifies a single beacon's cache entry: the session number plus the
//! sequence number assigned when a session is split. See
//! `original_source/openkit/core/caching/key.py`.

/// Key identifying a beacon's cache entry across splits of the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconKey {
    pub beacon_id: i32,
    pub beacon_seq_number: i32,
}

impl BeaconKey {
    pub fn new(beacon_id: i32, beacon_seq_number: i32) -> Self {
        Self {
            beacon_id,
            beacon_seq_number,
        }
    }
}

impl std::fmt::Display for BeaconKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[sn={}, seq={}]", self.beacon_id, self.beacon_seq_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_same_fields_are_equal_and_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let a = BeaconKey::new(1, 2);
        let b = BeaconKey::new(1, 2);
        assert_eq!(a, b);

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn keys_differing_in_seq_number_are_distinct() {
        assert_ne!(BeaconKey::new(1, 0), BeaconKey::new(1, 1));
    }
}
