// dedup.rs - Content-addressed deduplication with sharded parallel merge

use crate::data::OccurrenceList;
use crate::error::{CallerError, Result};
use crate::hashers::{SequenceDigest, SequenceHasher};
use rayon::prelude::*;
use std::collections::HashMap;

/// One sequence entering deduplication
#[derive(Debug, Clone)]
pub struct InputSequence {
    /// Genome id for DNA, distinct-DNA index for proteins
    pub key: u32,
    pub id: String,
    pub sequence: Vec<u8>,
}

impl InputSequence {
    pub fn new(key: u32, id: impl Into<String>, sequence: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            id: id.into(),
            sequence: sequence.into(),
        }
    }
}

/// First-seen record of a distinct digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistinctSequence {
    pub id: String,
    pub digest: SequenceDigest,
    /// Upper-cased sequence
    pub sequence: Vec<u8>,
}

#[derive(Debug)]
struct PendingEntry {
    order: usize,
    id: String,
    sequence: Vec<u8>,
    keys: Vec<u32>,
}

/// Accumulates one shard of input; shards merge by digest in any order
#[derive(Debug)]
pub struct Deduplicator<'h> {
    hasher: &'h dyn SequenceHasher,
    entries: HashMap<SequenceDigest, PendingEntry>,
    seen: usize,
}

impl<'h> Deduplicator<'h> {
    pub fn new(hasher: &'h dyn SequenceHasher) -> Self {
        Self {
            hasher,
            entries: HashMap::new(),
            seen: 0,
        }
    }

    /// Add a sequence; `order` is its position in the global input stream
    pub fn add(&mut self, order: usize, key: u32, id: &str, sequence: &[u8]) {
        self.seen += 1;
        let normalized = sequence.to_ascii_uppercase();
        let digest = self.hasher.digest_normalized(&normalized);
        match self.entries.get_mut(&digest) {
            Some(entry) => {
                entry.keys.push(key);
                if order < entry.order {
                    entry.order = order;
                    entry.id = id.to_string();
                }
            }
            None => {
                self.entries.insert(
                    digest,
                    PendingEntry {
                        order,
                        id: id.to_string(),
                        sequence: normalized,
                        keys: vec![key],
                    },
                );
            }
        }
    }

    /// Digest-keyed union; the earliest input keeps its id
    pub fn merge(self, other: Deduplicator<'h>) -> Deduplicator<'h> {
        let (mut larger, smaller) = if self.entries.len() >= other.entries.len() {
            (self, other)
        } else {
            (other, self)
        };
        larger.seen += smaller.seen;
        for (digest, incoming) in smaller.entries {
            match larger.entries.get_mut(&digest) {
                Some(entry) => {
                    entry.keys.extend(incoming.keys);
                    if incoming.order < entry.order {
                        entry.order = incoming.order;
                        entry.id = incoming.id;
                    }
                }
                None => {
                    larger.entries.insert(digest, incoming);
                }
            }
        }
        larger
    }

    pub fn finish(self) -> DedupTable {
        let mut pending: Vec<(SequenceDigest, PendingEntry)> = self.entries.into_iter().collect();
        pending.sort_by_key(|(_, entry)| entry.order);

        let mut table = DedupTable {
            duplicates: self.seen - pending.len(),
            ..DedupTable::default()
        };
        for (digest, entry) in pending {
            table.index.insert(digest, table.distinct.len());
            table.occurrences.push(OccurrenceList::from_values(entry.keys));
            table.distinct.push(DistinctSequence {
                id: entry.id,
                digest,
                sequence: entry.sequence,
            });
        }
        table
    }
}

/// Result of deduplication, distinct records in first-seen order
#[derive(Debug, Default)]
pub struct DedupTable {
    distinct: Vec<DistinctSequence>,
    occurrences: Vec<OccurrenceList>,
    index: HashMap<SequenceDigest, usize>,
    duplicates: usize,
}

impl DedupTable {
    pub fn len(&self) -> usize {
        self.distinct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distinct.is_empty()
    }

    /// Number of inputs dropped as repeats of an earlier digest
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn distinct(&self) -> &[DistinctSequence] {
        &self.distinct
    }

    pub fn get(&self, index: usize) -> Option<&DistinctSequence> {
        self.distinct.get(index)
    }

    pub fn index_of(&self, digest: &SequenceDigest) -> Option<usize> {
        self.index.get(digest).copied()
    }

    pub fn contains(&self, digest: &SequenceDigest) -> bool {
        self.index.contains_key(digest)
    }

    pub fn occurrences_at(&self, index: usize) -> Option<&OccurrenceList> {
        self.occurrences.get(index)
    }

    /// Occurrence list of a digest that must be present
    pub fn occurrences(&self, digest: &SequenceDigest) -> Result<&OccurrenceList> {
        self.index_of(digest)
            .and_then(|i| self.occurrences.get(i))
            .ok_or_else(|| {
                CallerError::schema(format!("Digest {} missing from deduplication table", digest))
            })
    }
}

/// Deduplicate inputs split across `shards` parallel workers
pub fn deduplicate(inputs: &[InputSequence], hasher: &dyn SequenceHasher, shards: usize) -> DedupTable {
    if inputs.is_empty() {
        return Deduplicator::new(hasher).finish();
    }
    let chunk_size = inputs.len().div_ceil(shards.max(1));

    inputs
        .par_chunks(chunk_size)
        .enumerate()
        .map(|(chunk_index, chunk)| {
            let offset = chunk_index * chunk_size;
            let mut shard = Deduplicator::new(hasher);
            for (i, input) in chunk.iter().enumerate() {
                shard.add(offset + i, input.key, &input.id, &input.sequence);
            }
            shard
        })
        .reduce(|| Deduplicator::new(hasher), Deduplicator::merge)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashers::Sha256Hasher;

    fn inputs() -> Vec<InputSequence> {
        vec![
            InputSequence::new(0, "g0-1", "ATGAAATAA"),
            InputSequence::new(0, "g0-2", "ATGCCCTAA"),
            InputSequence::new(1, "g1-1", "atgaaataa"),
            InputSequence::new(2, "g2-1", "ATGGGGTAA"),
            InputSequence::new(2, "g2-2", "ATGAAATAA"),
            InputSequence::new(2, "g2-3", "ATGAAATAA"),
        ]
    }

    #[test]
    fn test_first_seen_and_occurrences() {
        let table = deduplicate(&inputs(), &Sha256Hasher, 1);
        assert_eq!(table.len(), 3);
        assert_eq!(table.duplicates(), 3);

        let ids: Vec<&str> = table.distinct().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["g0-1", "g0-2", "g2-1"]);

        let digest = Sha256Hasher.hash_sequence(b"ATGAAATAA");
        let occurrences = table.occurrences(&digest).unwrap();
        assert_eq!(occurrences.values(), vec![0, 1, 2, 2]);
        assert_eq!(table.get(0).unwrap().sequence, b"ATGAAATAA".to_vec());
    }

    #[test]
    fn test_sharding_does_not_change_result() {
        let single = deduplicate(&inputs(), &Sha256Hasher, 1);
        for shards in [2, 3, 4, 16] {
            let sharded = deduplicate(&inputs(), &Sha256Hasher, shards);
            assert_eq!(sharded.distinct(), single.distinct());
            assert_eq!(sharded.duplicates(), single.duplicates());
            for record in single.distinct() {
                assert_eq!(
                    sharded.occurrences(&record.digest).unwrap(),
                    single.occurrences(&record.digest).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_merge_is_commutative() {
        let all = inputs();
        let build = |range: std::ops::Range<usize>| {
            let mut shard = Deduplicator::new(&Sha256Hasher);
            for i in range {
                shard.add(i, all[i].key, &all[i].id, &all[i].sequence);
            }
            shard
        };
        let left = build(0..3).merge(build(3..6)).finish();
        let right = build(3..6).merge(build(0..3)).finish();
        assert_eq!(left.distinct(), right.distinct());
        assert_eq!(left.duplicates(), right.duplicates());
    }

    #[test]
    fn test_dedup_is_idempotent() {
        let first = deduplicate(&inputs(), &Sha256Hasher, 2);
        let again: Vec<InputSequence> = first
            .distinct()
            .iter()
            .map(|d| InputSequence::new(0, d.id.clone(), d.sequence.clone()))
            .collect();
        let second = deduplicate(&again, &Sha256Hasher, 2);
        assert_eq!(second.distinct(), first.distinct());
        assert_eq!(second.duplicates(), 0);
    }

    #[test]
    fn test_missing_digest_is_error() {
        let table = deduplicate(&[], &Sha256Hasher, 4);
        assert!(table.is_empty());
        let digest = Sha256Hasher.hash_sequence(b"ATG");
        assert!(table.occurrences(&digest).is_err());
    }
}
