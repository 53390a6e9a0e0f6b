// discovery.rs - Clustered first round and the iterative representative discovery loop

use crate::core::aligner::AlignmentRequest;
use crate::core::bsr::{blast_score_ratio, self_scores_from_rows, CANDIDATE_BAND};
use crate::core::classify::{LocusOutcome, LocusState, RepresentativeCandidate};
use crate::core::cluster::{cluster_candidates, ClusterParams, MinimizerIndex};
use crate::core::search::{shrink_pool, LocusQuery, ProteinPool, SearchContext};
use crate::data::sequence::write_fasta;
use crate::data::{SelfScore, SelfScoreTable};
use crate::error::{CallerError, Result};
use crate::hashers::SequenceDigest;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;

/// Totals of one alignment round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub matches: usize,
    pub inferred: usize,
    pub removed_from_pool: usize,
}

impl RoundReport {
    fn from_outcomes(outcomes: &[(usize, LocusOutcome)], removed_from_pool: usize) -> Self {
        Self {
            matches: outcomes.iter().map(|(_, o)| o.matches).sum(),
            inferred: outcomes.iter().map(|(_, o)| o.inferred).sum(),
            removed_from_pool,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub iterations: usize,
    pub promoted: usize,
    pub rounds: Vec<RoundReport>,
}

/// Loop state: which loci are re-aligned in the next iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryState {
    Active { iteration: usize, loci: Vec<usize> },
    Exhausted,
}

/// Align the pool against clustered representatives, accepting only hits
/// at `BSR >= threshold + 0.1`; weaker hits stay pooled for the loop.
pub fn run_clustered_round(
    ctx: &SearchContext<'_>,
    states: &mut [LocusState],
    pool: &mut ProteinPool,
    scores: &mut SelfScoreTable,
    clustering: &ClusterParams,
) -> Result<RoundReport> {
    if pool.is_empty() {
        return Ok(RoundReport::default());
    }
    let all_loci: Vec<usize> = (0..states.len()).collect();
    ctx.ensure_self_scores(states, &all_loci, scores, "self_initial")?;

    let representatives: Vec<(usize, &[u8])> = states
        .iter()
        .enumerate()
        .flat_map(|(locus, state)| {
            state.representatives.iter().map(move |rep| (locus, rep.protein.as_slice()))
        })
        .collect();
    let index = MinimizerIndex::build(representatives.iter().map(|(_, protein)| *protein), clustering);

    let candidates: Vec<(u32, &[u8])> = pool
        .iter()
        .map(|&p| ctx.protein_sequence(p).map(|seq| (p, seq)))
        .collect::<Result<_>>()?;
    let clusters = cluster_candidates(&index, &candidates, clustering);

    let mut members: BTreeMap<usize, BTreeSet<u32>> = BTreeMap::new();
    for (rep, proteins) in clusters {
        let locus = representatives[rep as usize].0;
        members.entry(locus).or_default().extend(proteins);
    }
    println!(
        "🔍 Clustering: {} of {} pooled proteins joined {} loci",
        members.values().map(|m| m.len()).sum::<usize>(),
        pool.len(),
        members.len()
    );

    let queries: Vec<LocusQuery> = members
        .into_iter()
        .map(|(locus, proteins)| LocusQuery {
            locus,
            targets: Some(proteins.into_iter().collect()),
        })
        .collect();
    let threshold = ctx.params.bsr_threshold + CANDIDATE_BAND;
    let accepted = ctx.align_round(states, &queries, pool, scores, threshold, "round_clustered")?;
    let outcomes = ctx.classify_hits(states, accepted)?;
    let removed = shrink_pool(pool, ctx.proteins, &outcomes);

    Ok(RoundReport::from_outcomes(&outcomes, removed))
}

/// Keep candidates in order, dropping any that an earlier retained candidate
/// covers at `BSR >= threshold + 0.1`.
///
/// Also returns the self-scores computed along the way.
fn filter_candidates(
    ctx: &SearchContext<'_>,
    dir: &Path,
    locus: usize,
    candidates: &[RepresentativeCandidate],
) -> Result<(Vec<RepresentativeCandidate>, Vec<(SequenceDigest, SelfScore)>)> {
    let ids: Vec<String> = (0..candidates.len()).map(|k| format!("c{}", k)).collect();
    let proteins: Vec<&[u8]> = candidates
        .iter()
        .map(|c| ctx.protein_index(&c.protein_digest).and_then(|p| ctx.protein_sequence(p)))
        .collect::<Result<_>>()?;

    let fasta = dir.join(format!("{}_candidates.fasta", locus));
    write_fasta(&fasta, ids.iter().map(|id| id.as_str()).zip(proteins.iter().copied()))?;
    let database = dir.join(format!("{}_candidates_db", locus));
    ctx.aligner.build_database(&fasta, &database)?;
    let output = dir.join(format!("{}_candidates.tsv", locus));
    let rows = ctx.aligner.align(&AlignmentRequest {
        query: &fasta,
        database: &database,
        restrict_to: None,
        output: &output,
        threads: ctx.call_threads,
    })?;

    let self_scores = self_scores_from_rows(&rows);
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(k, id)| (id.as_str(), k)).collect();
    let mut by_query: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
    for row in rows.iter().filter(|r| r.query_id != r.target_id) {
        if let (Some(&q), Some(&t)) = (position.get(row.query_id.as_str()), position.get(row.target_id.as_str())) {
            by_query.entry(q).or_default().push((t, row.raw_score));
        }
    }

    let cutoff = ctx.params.bsr_threshold + CANDIDATE_BAND;
    let mut removed: HashSet<usize> = HashSet::new();
    let mut computed = Vec::with_capacity(candidates.len());
    for (k, id) in ids.iter().enumerate() {
        let self_score = *self_scores.get(id).ok_or_else(|| {
            CallerError::collaborator(
                ctx.aligner.name(),
                format!("no self-alignment reported for candidate {}", candidates[k].protein_digest),
            )
        })?;
        if removed.contains(&k) {
            continue;
        }
        computed.push((
            candidates[k].protein_digest,
            SelfScore {
                length: proteins[k].len(),
                score: self_score,
            },
        ));
        for &(target, raw) in by_query.get(&k).into_iter().flatten() {
            if target > k && blast_score_ratio(raw, self_score) >= cutoff {
                removed.insert(target);
            }
        }
    }

    let retained = candidates
        .iter()
        .enumerate()
        .filter(|(k, _)| !removed.contains(k))
        .map(|(_, c)| *c)
        .collect();
    Ok((retained, computed))
}

/// Promote candidates of every locus, one task per locus
fn promote_candidates(
    ctx: &SearchContext<'_>,
    states: &mut [LocusState],
    outcomes: Vec<(usize, LocusOutcome)>,
    scores: &mut SelfScoreTable,
    round: &str,
) -> Result<Vec<usize>> {
    let mut per_locus: Vec<Vec<RepresentativeCandidate>> = vec![Vec::new(); states.len()];
    for (locus, outcome) in outcomes {
        per_locus[locus].extend(outcome.candidates);
    }
    if per_locus.iter().all(|c| c.is_empty()) {
        return Ok(Vec::new());
    }
    let dir = ctx.workdir.join(round);
    std::fs::create_dir_all(&dir).map_err(|e| CallerError::io(&dir, e))?;

    let results: Vec<(usize, bool, Vec<(SequenceDigest, SelfScore)>)> = ctx.threads.install(|| {
        states
            .par_iter_mut()
            .zip(per_locus.into_par_iter())
            .enumerate()
            .filter(|(_, (_, candidates))| !candidates.is_empty())
            .map(|(locus, (state, candidates))| -> Result<(usize, bool, Vec<(SequenceDigest, SelfScore)>)> {
                let (retained, computed) = if candidates.len() == 1 {
                    (candidates, Vec::new())
                } else {
                    filter_candidates(ctx, &dir, locus, &candidates)?
                };
                let before = state.representatives.len();
                for candidate in &retained {
                    let protein = ctx
                        .protein_index(&candidate.protein_digest)
                        .and_then(|p| ctx.protein_sequence(p))?;
                    state.promote(&candidate.dna_digest, protein.to_vec())?;
                }
                Ok((locus, state.representatives.len() > before, computed))
            })
            .collect::<Result<_>>()
    })?;

    let mut promoted_loci = Vec::with_capacity(results.len());
    for (locus, grew, computed) in results {
        for (digest, score) in computed {
            scores.insert(digest, score);
        }
        if grew {
            promoted_loci.push(locus);
        }
    }
    Ok(promoted_loci)
}

/// Repeat align → score → classify → promote until no locus gains a
/// representative. After the first iteration only loci that promoted are
/// re-aligned, since nothing else changed for the others.
pub fn run_discovery(
    ctx: &SearchContext<'_>,
    states: &mut [LocusState],
    pool: &mut ProteinPool,
    scores: &mut SelfScoreTable,
) -> Result<DiscoveryReport> {
    let mut report = DiscoveryReport::default();
    let mut state = DiscoveryState::Active {
        iteration: 1,
        loci: (0..states.len())
            .filter(|&l| !states[l].representatives.is_empty())
            .collect(),
    };

    while let DiscoveryState::Active { iteration, loci } = state {
        if pool.is_empty() || loci.is_empty() {
            state = DiscoveryState::Exhausted;
            continue;
        }
        report.iterations = iteration;
        let round = format!("iteration_{}", iteration);

        ctx.ensure_self_scores(states, &loci, scores, &format!("{}_self", round))?;
        let queries: Vec<LocusQuery> = loci
            .iter()
            .map(|&locus| LocusQuery { locus, targets: None })
            .collect();
        let accepted = ctx.align_round(states, &queries, pool, scores, ctx.params.bsr_threshold, &round)?;
        let outcomes = ctx.classify_hits(states, accepted)?;
        let removed = shrink_pool(pool, ctx.proteins, &outcomes);
        let round_report = RoundReport::from_outcomes(&outcomes, removed);
        report.rounds.push(round_report);

        let promoted_loci = promote_candidates(ctx, states, outcomes, scores, &format!("{}_candidates", round))?;
        println!(
            "🔁 Iteration {}: {} matches, {} inferred, {} loci with new representatives, {} proteins left",
            iteration,
            round_report.matches,
            round_report.inferred,
            promoted_loci.len(),
            pool.len()
        );

        state = if promoted_loci.is_empty() {
            DiscoveryState::Exhausted
        } else {
            DiscoveryState::Active {
                iteration: iteration + 1,
                loci: promoted_loci,
            }
        };
    }

    report.promoted = states.iter().map(|s| s.promoted().len()).sum();
    Ok(report)
}
