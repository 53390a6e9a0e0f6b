// cluster.rs - Minimizer clustering of candidate proteins around representatives

use crate::core::minimizer::minimizers;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusteringMode {
    /// Join every qualifying cluster
    Full,
    /// Join only the best-scoring cluster
    Greedy,
}

impl FromStr for ClusteringMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(ClusteringMode::Full),
            "greedy" => Ok(ClusteringMode::Greedy),
            _ => Err(format!("Invalid clustering mode '{}'. Available: full, greedy", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusterParams {
    pub word_size: usize,
    pub window_size: usize,
    /// Minimum fraction of a candidate's minimizers shared with a representative
    pub similarity: f64,
    pub mode: ClusteringMode,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            word_size: 5,
            window_size: 5,
            similarity: 0.2,
            mode: ClusteringMode::Greedy,
        }
    }
}

/// Inverted index from minimizer to representatives, in insertion order
#[derive(Debug, Default)]
pub struct MinimizerIndex {
    postings: HashMap<u64, Vec<u32>>,
    representatives: usize,
}

impl MinimizerIndex {
    pub fn build<'a, I>(representatives: I, params: &ClusterParams) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut index = Self::default();
        for (ordinal, protein) in representatives.into_iter().enumerate() {
            for minimizer in minimizers(protein, params.word_size, params.window_size) {
                index.postings.entry(minimizer).or_default().push(ordinal as u32);
            }
            index.representatives += 1;
        }
        index
    }

    pub fn len(&self) -> usize {
        self.representatives
    }

    pub fn is_empty(&self) -> bool {
        self.representatives == 0
    }

    /// Representatives a candidate joins, with their similarity scores
    pub fn assign(&self, candidate: &[u8], params: &ClusterParams) -> Vec<(u32, f64)> {
        let candidate_minimizers = minimizers(candidate, params.word_size, params.window_size);
        if candidate_minimizers.is_empty() {
            return Vec::new();
        }

        let mut shared: HashMap<u32, usize> = HashMap::new();
        for minimizer in &candidate_minimizers {
            if let Some(reps) = self.postings.get(minimizer) {
                for &rep in reps {
                    *shared.entry(rep).or_insert(0) += 1;
                }
            }
        }

        let total = candidate_minimizers.len() as f64;
        let mut qualifying: Vec<(u32, f64)> = shared
            .into_iter()
            .map(|(rep, count)| (rep, count as f64 / total))
            .filter(|(_, score)| *score >= params.similarity)
            .collect();
        qualifying.sort_by_key(|(rep, _)| *rep);

        match params.mode {
            ClusteringMode::Full => qualifying,
            ClusteringMode::Greedy => {
                let mut best: Option<(u32, f64)> = None;
                for (rep, score) in qualifying {
                    if best.map_or(true, |(_, top)| score > top) {
                        best = Some((rep, score));
                    }
                }
                best.into_iter().collect()
            }
        }
    }
}

/// Group candidates by representative ordinal, keeping candidate input order
pub fn cluster_candidates<K>(
    index: &MinimizerIndex,
    candidates: &[(K, &[u8])],
    params: &ClusterParams,
) -> BTreeMap<u32, Vec<K>>
where
    K: Copy + Send + Sync,
{
    let assignments: Vec<Vec<(u32, f64)>> = candidates
        .par_iter()
        .map(|(_, protein)| index.assign(protein, params))
        .collect();

    let mut clusters: BTreeMap<u32, Vec<K>> = BTreeMap::new();
    for ((key, _), reps) in candidates.iter().zip(assignments) {
        for (rep, _) in reps {
            clusters.entry(rep).or_default().push(*key);
        }
    }
    clusters
}
