//! Read-tracking index: who has seen which message.
//!
//! Records live in 301 hash chains keyed by
//! `((timestamp mod 301) + (poster mod 301)) mod 301`, the scheme the
//! legacy file format burned into its `S<bucket>` lines. Buckets are kept
//! so old files reload without rehashing.

use crate::identity::Identity;

pub const BUCKETS: usize = 301;

/// Evidence that `reader` has viewed the message posted at `timestamp`.
/// Records are never dropped while a board lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    pub reader: Identity,
    pub timestamp: i64,
}

/// Bucket for a message, from its timestamp and its poster's numeric form.
/// Euclidean remainders keep the -1 unknown-name sentinel in range.
pub fn bucket_for(timestamp: i64, poster_numeric: i64) -> usize {
    let b = (timestamp.rem_euclid(301) + poster_numeric.rem_euclid(301)).rem_euclid(301);
    b as usize
}

#[derive(Debug)]
pub struct ReadIndex {
    buckets: Vec<Vec<ReadRecord>>,
}

impl Default for ReadIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadIndex {
    pub fn new() -> Self {
        Self {
            buckets: vec![Vec::new(); BUCKETS],
        }
    }

    pub fn is_read(&self, bucket: usize, reader: &Identity, timestamp: i64) -> bool {
        self.buckets[bucket]
            .iter()
            .any(|r| r.timestamp == timestamp && r.reader == *reader)
    }

    /// Insert a record at the head of the chain unless one already exists.
    /// Returns whether anything was inserted, which is what decides whether
    /// the caller needs to persist the board.
    pub fn mark_read(&mut self, bucket: usize, reader: &Identity, timestamp: i64) -> bool {
        if self.is_read(bucket, reader, timestamp) {
            return false;
        }
        self.buckets[bucket].insert(
            0,
            ReadRecord {
                reader: reader.clone(),
                timestamp,
            },
        );
        true
    }

    /// Loader-side insert that keeps the bucket number the file recorded.
    pub fn insert_at(&mut self, bucket: usize, record: ReadRecord) {
        self.buckets[bucket].insert(0, record);
    }

    /// All records, bucket order then chain order, for the serializer.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ReadRecord)> + '_ {
        self.buckets
            .iter()
            .enumerate()
            .flat_map(|(i, chain)| chain.iter().map(move |r| (i, r)))
    }

    pub fn record_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::{bucket_for, ReadIndex, BUCKETS};
    use crate::identity::Identity;

    #[test]
    fn bucket_stays_in_range_for_sentinel() {
        assert!(bucket_for(0, -1) < BUCKETS);
        assert!(bucket_for(-5, -1) < BUCKETS);
        assert_eq!(bucket_for(300, 1), 0);
        assert_eq!(bucket_for(1_700_000_000, 0), 1_700_000_000 % 301);
    }

    #[test]
    fn mark_read_inserts_once() {
        let mut idx = ReadIndex::new();
        let alice = Identity::Name("Alice".to_string());
        let b = bucket_for(1000, 42);

        assert!(!idx.is_read(b, &alice, 1000));
        assert!(idx.mark_read(b, &alice, 1000));
        assert!(idx.is_read(b, &alice, 1000));
        assert!(!idx.mark_read(b, &alice, 1000));
        assert_eq!(idx.record_count(), 1);
    }

    #[test]
    fn same_bucket_different_reader_or_stamp() {
        let mut idx = ReadIndex::new();
        let bob = Identity::Id(7);
        let b = 13;

        assert!(idx.mark_read(b, &bob, 1000));
        // Different timestamp in the same chain is a different message.
        assert!(!idx.is_read(b, &bob, 2000));
        // A name never matches an id, even in the same chain.
        assert!(!idx.is_read(b, &Identity::Name("7".to_string()), 1000));
    }
}
