// minimizer.rs - k-mer minimizer extraction for protein sequences

use std::collections::{HashSet, VecDeque};

/// Largest k-mer that packs into a u64
pub const MAX_WORD_SIZE: usize = 8;

/// Pack a k-mer big-endian so integer order equals lexicographic order
fn pack(kmer: &[u8]) -> u64 {
    kmer.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b.to_ascii_uppercase()))
}

/// Distinct minimizers of `sequence`.
///
/// Every window of `window_size` consecutive k-mers contributes its smallest
/// k-mer. Sequences with fewer k-mers than one window contribute the
/// smallest k-mer they have; sequences shorter than `word_size` yield nothing.
pub fn minimizers(sequence: &[u8], word_size: usize, window_size: usize) -> HashSet<u64> {
    let mut result = HashSet::new();
    if word_size == 0 || word_size > MAX_WORD_SIZE || sequence.len() < word_size {
        return result;
    }
    let window_size = window_size.max(1);

    let kmers: Vec<u64> = sequence.windows(word_size).map(pack).collect();
    if kmers.len() <= window_size {
        if let Some(&min) = kmers.iter().min() {
            result.insert(min);
        }
        return result;
    }

    // Monotone deque of indices with increasing k-mer values
    let mut deque: VecDeque<usize> = VecDeque::with_capacity(window_size);
    for (i, &kmer) in kmers.iter().enumerate() {
        while deque.back().is_some_and(|&j| kmers[j] > kmer) {
            deque.pop_back();
        }
        deque.push_back(i);
        if deque.front().is_some_and(|&j| j + window_size <= i) {
            deque.pop_front();
        }
        if i + 1 >= window_size {
            if let Some(&j) = deque.front() {
                result.insert(kmers[j]);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brute_force(sequence: &[u8], k: usize, w: usize) -> HashSet<u64> {
        let kmers: Vec<u64> = sequence.windows(k).map(pack).collect();
        kmers
            .windows(w)
            .filter_map(|window| window.iter().min().copied())
            .collect()
    }

    #[test]
    fn test_matches_brute_force() {
        let protein = b"MKTAYIAKQRQISFVKSHFSRQLEERLGLIEVQAPILSRVGDGTQDNLSGAEKAVQVKVKALPDAQ";
        for k in 2..=6 {
            for w in 1..=7 {
                assert_eq!(minimizers(protein, k, w), brute_force(protein, k, w), "k={} w={}", k, w);
            }
        }
    }

    #[test]
    fn test_short_sequences() {
        assert!(minimizers(b"MKT", 5, 5).is_empty());
        let single = minimizers(b"MKTAY", 5, 5);
        assert_eq!(single.len(), 1);
        assert_eq!(minimizers(b"MKTAYI", 5, 5).len(), 1);
    }

    #[test]
    fn test_lexicographic_order() {
        assert!(pack(b"AAAAA") < pack(b"AAAAC"));
        assert!(pack(b"MKTAY") < pack(b"MKTAZ"));
        let expected: HashSet<u64> = [pack(b"AAAAA")].into_iter().collect();
        assert_eq!(minimizers(b"ZZZZZAAAAA", 5, 10), expected);
        assert!(minimizers(b"MKTAYIAKQR", 9, 5).is_empty());
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(minimizers(b"mktayiakqr", 3, 3), minimizers(b"MKTAYIAKQR", 3, 3));
    }
}
