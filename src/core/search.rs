// search.rs - Alignment rounds: representative queries against the unclassified pool

use crate::core::aligner::{Aligner, AlignmentRequest};
use crate::core::bsr::{self_scores_from_rows, select_best_hits, RepresentativeSpan};
use crate::core::classify::{CandidateHit, ClassifierParams, Evidence, LocusOutcome, LocusState};
use crate::core::dedup::DedupTable;
use crate::data::sequence::write_fasta;
use crate::data::{GenomeSet, SelfScore, SelfScoreTable};
use crate::error::{CallerError, Result};
use crate::hashers::SequenceDigest;
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Unclassified distinct proteins, by index into the protein table
pub type ProteinPool = BTreeSet<u32>;

/// Accepted best hit of a locus representative on a pooled protein
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedHit {
    pub protein: u32,
    pub representative: usize,
    pub span: RepresentativeSpan,
    pub bsr: f64,
}

/// Which pooled proteins a locus is aligned against in a round
#[derive(Debug, Clone)]
pub struct LocusQuery {
    pub locus: usize,
    /// `None` aligns against the whole round database
    pub targets: Option<Vec<u32>>,
}

fn protein_id(index: u32) -> String {
    format!("p{}", index)
}

fn parse_protein_id(id: &str) -> Option<u32> {
    id.strip_prefix('p')?.parse().ok()
}

fn representative_id(index: usize) -> String {
    format!("r{}", index)
}

fn parse_representative_id(id: &str) -> Option<usize> {
    id.strip_prefix('r')?.parse().ok()
}

/// Read-only inputs shared by every alignment round
pub struct SearchContext<'a> {
    pub aligner: &'a dyn Aligner,
    pub genomes: &'a GenomeSet,
    /// Distinct DNA, occurrence keys are genome ids
    pub dna: &'a DedupTable,
    /// Distinct proteins, occurrence keys are distinct-DNA indices
    pub proteins: &'a DedupTable,
    /// Pool capping concurrent aligner invocations
    pub threads: &'a rayon::ThreadPool,
    /// Threads handed to each aligner invocation; pool width times this stays within the budget
    pub call_threads: usize,
    pub workdir: PathBuf,
    pub params: ClassifierParams,
}

impl<'a> SearchContext<'a> {
    fn round_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.workdir.join(name);
        fs::create_dir_all(&dir).map_err(|e| CallerError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn protein_sequence(&self, index: u32) -> Result<&'a [u8]> {
        self.proteins
            .get(index as usize)
            .map(|p| p.sequence.as_slice())
            .ok_or_else(|| CallerError::schema(format!("Unknown protein index {}", index)))
    }

    pub fn protein_index(&self, digest: &SequenceDigest) -> Result<u32> {
        self.proteins
            .index_of(digest)
            .map(|i| i as u32)
            .ok_or_else(|| CallerError::schema(format!("Protein {} missing from protein table", digest)))
    }

    /// Compute self-scores for representatives of `loci` not yet in `scores`.
    ///
    /// Each locus aligns its unscored representatives against themselves.
    pub fn ensure_self_scores(
        &self,
        states: &[LocusState],
        loci: &[usize],
        scores: &mut SelfScoreTable,
        round: &str,
    ) -> Result<usize> {
        let pending: Vec<(usize, Vec<(SequenceDigest, &[u8])>)> = loci
            .iter()
            .filter_map(|&locus| {
                let mut seen = BTreeSet::new();
                let missing: Vec<(SequenceDigest, &[u8])> = states[locus]
                    .representatives
                    .iter()
                    .filter(|rep| !scores.contains(&rep.protein_digest))
                    .filter(|rep| seen.insert(rep.protein_digest))
                    .map(|rep| (rep.protein_digest, rep.protein.as_slice()))
                    .collect();
                (!missing.is_empty()).then_some((locus, missing))
            })
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let dir = self.round_dir(round)?;
        let computed: Vec<Vec<(SequenceDigest, SelfScore)>> = self.threads.install(|| {
            pending
                .par_iter()
                .map(|(locus, missing)| self.self_align(&dir, *locus, missing))
                .collect::<Result<_>>()
        })?;

        let mut added = 0;
        for (digest, score) in computed.into_iter().flatten() {
            scores.insert(digest, score);
            added += 1;
        }
        Ok(added)
    }

    fn self_align(
        &self,
        dir: &Path,
        locus: usize,
        proteins: &[(SequenceDigest, &[u8])],
    ) -> Result<Vec<(SequenceDigest, SelfScore)>> {
        let fasta = dir.join(format!("{}_self.fasta", locus));
        let ids: Vec<String> = (0..proteins.len()).map(representative_id).collect();
        write_fasta(&fasta, ids.iter().map(|id| id.as_str()).zip(proteins.iter().map(|(_, p)| *p)))?;
        let database = dir.join(format!("{}_self_db", locus));
        self.aligner.build_database(&fasta, &database)?;
        let output = dir.join(format!("{}_self.tsv", locus));
        let rows = self.aligner.align(&AlignmentRequest {
            query: &fasta,
            database: &database,
            restrict_to: None,
            output: &output,
            threads: self.call_threads,
        })?;

        let found = self_scores_from_rows(&rows);
        ids.iter()
            .zip(proteins)
            .map(|(id, (digest, protein))| -> Result<(SequenceDigest, SelfScore)> {
                let score = found.get(id).copied().ok_or_else(|| {
                    CallerError::collaborator(
                        self.aligner.name(),
                        format!("no self-alignment reported for representative {}", digest),
                    )
                })?;
                Ok((
                    *digest,
                    SelfScore {
                        length: protein.len(),
                        score,
                    },
                ))
            })
            .collect()
    }

    /// Align each queried locus's representatives against pooled proteins and
    /// keep best hits with `BSR >= threshold`.
    pub fn align_round(
        &self,
        states: &[LocusState],
        queries: &[LocusQuery],
        pool: &ProteinPool,
        scores: &SelfScoreTable,
        threshold: f64,
        round: &str,
    ) -> Result<Vec<(usize, Vec<AcceptedHit>)>> {
        // Restriction lists may only name proteins present in the database
        let queries: Vec<LocusQuery> = queries
            .iter()
            .map(|q| LocusQuery {
                locus: q.locus,
                targets: q
                    .targets
                    .as_ref()
                    .map(|t| t.iter().copied().filter(|p| pool.contains(p)).collect()),
            })
            .collect();
        let targets: BTreeSet<u32> = if queries.iter().all(|q| q.targets.is_some()) {
            queries
                .iter()
                .flat_map(|q| q.targets.iter().flatten().copied())
                .collect()
        } else {
            pool.clone()
        };
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let dir = self.round_dir(round)?;
        let db_fasta = dir.join("pool.fasta");
        let ids: Vec<String> = targets.iter().map(|&p| protein_id(p)).collect();
        let sequences: Vec<&[u8]> = targets
            .iter()
            .map(|&p| self.protein_sequence(p))
            .collect::<Result<_>>()?;
        write_fasta(&db_fasta, ids.iter().map(|id| id.as_str()).zip(sequences))?;
        let database = dir.join("pool_db");
        self.aligner.build_database(&db_fasta, &database)?;

        self.threads.install(|| {
            queries
                .par_iter()
                .filter(|q| !states[q.locus].representatives.is_empty())
                .map(|q| -> Result<(usize, Vec<AcceptedHit>)> {
                    let hits = self.align_locus(&dir, &database, &states[q.locus], q, scores, threshold)?;
                    Ok((q.locus, hits))
                })
                .collect::<Result<Vec<_>>>()
        })
    }

    fn align_locus(
        &self,
        dir: &Path,
        database: &Path,
        state: &LocusState,
        query: &LocusQuery,
        scores: &SelfScoreTable,
        threshold: f64,
    ) -> Result<Vec<AcceptedHit>> {
        let fasta = dir.join(format!("{}_reps.fasta", query.locus));
        let ids: Vec<String> = (0..state.representatives.len()).map(representative_id).collect();
        write_fasta(
            &fasta,
            ids.iter()
                .map(|id| id.as_str())
                .zip(state.representatives.iter().map(|r| r.protein.as_slice())),
        )?;

        let restrict = match &query.targets {
            Some(targets) => {
                if targets.is_empty() {
                    return Ok(Vec::new());
                }
                let path = dir.join(format!("{}_ids.txt", query.locus));
                let content: String = targets.iter().map(|&p| format!("{}\n", protein_id(p))).collect();
                fs::write(&path, content).map_err(|e| CallerError::io(&path, e))?;
                Some(path)
            }
            None => None,
        };

        let output = dir.join(format!("{}_hits.tsv", query.locus));
        let rows = self.aligner.align(&AlignmentRequest {
            query: &fasta,
            database,
            restrict_to: restrict.as_deref(),
            output: &output,
            threads: self.call_threads,
        })?;

        let self_score = |id: &str| -> Result<f64> {
            let rep = parse_representative_id(id)
                .and_then(|k| state.representatives.get(k))
                .ok_or_else(|| {
                    CallerError::collaborator(self.aligner.name(), format!("unexpected query id '{}'", id))
                })?;
            scores.get(&rep.protein_digest).map(|s| s.score).ok_or_else(|| {
                CallerError::schema(format!(
                    "No self-score for representative {} of locus '{}'",
                    rep.allele, state.name
                ))
            })
        };

        select_best_hits(&rows, self_score, threshold)?
            .into_iter()
            .map(|hit| -> Result<AcceptedHit> {
                let protein = parse_protein_id(&hit.row.target_id).ok_or_else(|| {
                    CallerError::collaborator(
                        self.aligner.name(),
                        format!("unexpected target id '{}'", hit.row.target_id),
                    )
                })?;
                let representative = parse_representative_id(&hit.row.query_id).ok_or_else(|| {
                    CallerError::collaborator(
                        self.aligner.name(),
                        format!("unexpected query id '{}'", hit.row.query_id),
                    )
                })?;
                Ok(AcceptedHit {
                    protein,
                    representative,
                    span: RepresentativeSpan::from_row(hit.row),
                    bsr: hit.bsr,
                })
            })
            .collect()
    }

    /// Expand a distinct protein to every genome occurrence of every DNA
    /// sequence encoding it
    pub fn expand(&self, protein: u32, evidence: Evidence) -> Result<Vec<CandidateHit<'a>>> {
        let record = self
            .proteins
            .get(protein as usize)
            .ok_or_else(|| CallerError::schema(format!("Unknown protein index {}", protein)))?;
        let dna_indices = self
            .proteins
            .occurrences_at(protein as usize)
            .ok_or_else(|| CallerError::schema(format!("No occurrences for protein {}", record.digest)))?
            .distinct();

        let mut hits = Vec::new();
        for dna_index in dna_indices {
            let dna = self.dna.get(dna_index as usize).ok_or_else(|| {
                CallerError::schema(format!("Unknown DNA index {} for protein {}", dna_index, record.digest))
            })?;
            let genomes = self.dna.occurrences(&dna.digest)?.values();
            let mut copies: HashMap<u32, usize> = HashMap::new();
            for genome in genomes {
                let copy = copies.entry(genome).or_insert(0);
                hits.push(CandidateHit {
                    genome,
                    copy: *copy,
                    dna_digest: dna.digest,
                    dna: &dna.sequence,
                    protein_digest: record.digest,
                    evidence,
                });
                *copy += 1;
            }
        }
        Ok(hits)
    }

    /// Expand accepted hits and classify them, one task per locus
    pub fn classify_hits(
        &self,
        states: &mut [LocusState],
        accepted: Vec<(usize, Vec<AcceptedHit>)>,
    ) -> Result<Vec<(usize, LocusOutcome)>> {
        let mut per_locus: Vec<Vec<AcceptedHit>> = vec![Vec::new(); states.len()];
        for (locus, hits) in accepted {
            per_locus[locus].extend(hits);
        }

        states
            .par_iter_mut()
            .zip(per_locus.into_par_iter())
            .enumerate()
            .filter(|(_, (_, hits))| !hits.is_empty())
            .map(|(locus, (state, hits))| -> Result<(usize, LocusOutcome)> {
                let mut expanded = Vec::new();
                for hit in hits {
                    let representative = state
                        .representatives
                        .get(hit.representative)
                        .map(|r| r.allele)
                        .ok_or_else(|| {
                            CallerError::schema(format!(
                                "Representative {} missing from locus '{}'",
                                hit.representative, state.name
                            ))
                        })?;
                    expanded.extend(self.expand(
                        hit.protein,
                        Evidence::Aligned {
                            representative,
                            span: hit.span,
                            bsr: hit.bsr,
                        },
                    )?);
                }
                let outcome = state.classify(expanded, self.genomes, &self.params)?;
                Ok((locus, outcome))
            })
            .collect()
    }
}

/// Split `cpu` between concurrent aligner calls and threads per call.
///
/// Returns `(workers, threads_per_call)` with `workers * threads_per_call <= cpu`.
pub fn collaborator_budget(cpu: usize, tasks: usize) -> (usize, usize) {
    let cpu = cpu.max(1);
    let workers = tasks.clamp(1, cpu);
    (workers, (cpu / workers).max(1))
}

/// Remove classified proteins from the pool, returning how many left it
pub fn shrink_pool(
    pool: &mut ProteinPool,
    proteins: &DedupTable,
    outcomes: &[(usize, LocusOutcome)],
) -> usize {
    let before = pool.len();
    for (_, outcome) in outcomes {
        for digest in &outcome.classified_proteins {
            if let Some(index) = proteins.index_of(digest) {
                pool.remove(&(index as u32));
            }
        }
    }
    before - pool.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aligner::testing::MockAligner;
    use crate::core::aligner::AlignmentRow;
    use crate::core::classify::{AlleleRef, Classification, Representative};
    use crate::core::dedup::{deduplicate, InputSequence};
    use crate::data::{Genome, LengthMode};
    use crate::hashers::{SequenceHasher, Sha256Hasher};

    const REP: &[u8] = b"MKTAYIAKQRQISFVKSHFS";
    // 19/20 identical to the representative
    const VARIANT: &[u8] = b"MKTAYIAKQRQISFVKSHFA";
    // No residue in common with the representative
    const UNRELATED: &[u8] = b"WWWWWWWWWWWWWWWWWWWW";

    fn digest(seq: &[u8]) -> SequenceDigest {
        Sha256Hasher.hash_sequence(seq)
    }

    fn dna_for(protein: &[u8]) -> Vec<u8> {
        const BASES: [u8; 4] = *b"ACGT";
        let mut dna = Vec::with_capacity(protein.len() * 3 + 3);
        for &aa in protein {
            dna.push(BASES[((aa >> 4) & 3) as usize]);
            dna.push(BASES[((aa >> 2) & 3) as usize]);
            dna.push(BASES[(aa & 3) as usize]);
        }
        dna.extend_from_slice(b"TAA");
        dna
    }

    struct Fixture {
        genomes: GenomeSet,
        dna: DedupTable,
        proteins: DedupTable,
        threads: rayon::ThreadPool,
        dir: tempfile::TempDir,
        variant: Vec<u8>,
        synonymous: Vec<u8>,
    }

    /// g0 carries the variant twice, g1 once, g2 a synonymous copy plus an unrelated CDS
    fn fixture() -> Fixture {
        let genomes = GenomeSet::new(
            (0..3)
                .map(|id| Genome {
                    id,
                    name: format!("g{}", id),
                    path: PathBuf::from(format!("g{}.fasta", id)),
                    geometry: None,
                })
                .collect(),
        )
        .unwrap();

        let variant = dna_for(VARIANT);
        let mut synonymous = variant.clone();
        synonymous[3..6].copy_from_slice(b"TTT");
        let unrelated = dna_for(UNRELATED);
        let dna_inputs = vec![
            InputSequence::new(0, "g0-protein1", variant.clone()),
            InputSequence::new(0, "g0-protein2", variant.clone()),
            InputSequence::new(1, "g1-protein1", variant.clone()),
            InputSequence::new(2, "g2-protein1", synonymous.clone()),
            InputSequence::new(2, "g2-protein2", unrelated.clone()),
        ];
        let dna = deduplicate(&dna_inputs, &Sha256Hasher, 2);

        let protein_inputs: Vec<InputSequence> = [(&variant, VARIANT), (&synonymous, VARIANT), (&unrelated, UNRELATED)]
            .iter()
            .map(|(cds, protein)| {
                let index = dna.index_of(&digest(cds)).unwrap();
                InputSequence::new(index as u32, format!("d{}", index), protein.to_vec())
            })
            .collect();
        let proteins = deduplicate(&protein_inputs, &Sha256Hasher, 2);

        Fixture {
            genomes,
            dna,
            proteins,
            threads: rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap(),
            dir: tempfile::tempdir().unwrap(),
            variant,
            synonymous,
        }
    }

    fn context<'a>(fx: &'a Fixture, aligner: &'a dyn Aligner) -> SearchContext<'a> {
        SearchContext {
            aligner,
            genomes: &fx.genomes,
            dna: &fx.dna,
            proteins: &fx.proteins,
            threads: &fx.threads,
            call_threads: 1,
            workdir: fx.dir.path().to_path_buf(),
            params: ClassifierParams {
                bsr_threshold: 0.6,
                size_threshold: 0.2,
            },
        }
    }

    fn locus() -> LocusState {
        LocusState::new(
            "locus1",
            LengthMode::from_lengths(vec![REP.len() * 3 + 3]),
            vec![Representative {
                allele: AlleleRef::Schema(1),
                protein: REP.to_vec(),
                protein_digest: digest(REP),
            }],
        )
    }

    fn rep_scores() -> SelfScoreTable {
        let mut scores = SelfScoreTable::default();
        scores.insert(digest(REP), SelfScore { length: REP.len(), score: REP.len() as f64 });
        scores
    }

    fn whole_pool() -> Vec<LocusQuery> {
        vec![LocusQuery { locus: 0, targets: None }]
    }

    #[test]
    fn test_expand_keeps_copies_per_genome() {
        let fx = fixture();
        let aligner = MockAligner::default();
        let ctx = context(&fx, &aligner);

        let protein = ctx.protein_index(&digest(VARIANT)).unwrap();
        let mut hits: Vec<(u32, usize, SequenceDigest)> = ctx
            .expand(protein, Evidence::ProteinExact { allele: 1 })
            .unwrap()
            .iter()
            .map(|hit| (hit.genome, hit.copy, hit.dna_digest))
            .collect();
        hits.sort();

        let mut expected = vec![
            (0, 0, digest(&fx.variant)),
            (0, 1, digest(&fx.variant)),
            (1, 0, digest(&fx.variant)),
            (2, 0, digest(&fx.synonymous)),
        ];
        expected.sort();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_round_classifies_and_shrinks_pool() {
        let fx = fixture();
        let aligner = MockAligner::default();
        let ctx = context(&fx, &aligner);
        let mut states = vec![locus()];
        let mut pool: ProteinPool = (0..fx.proteins.len() as u32).collect();
        let variant = ctx.protein_index(&digest(VARIANT)).unwrap();
        let unrelated = ctx.protein_index(&digest(UNRELATED)).unwrap();

        let accepted = ctx
            .align_round(&states, &whole_pool(), &pool, &rep_scores(), 0.6, "round")
            .unwrap();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].1.len(), 1);
        let hit = accepted[0].1[0];
        assert_eq!(hit.protein, variant);
        assert_eq!(hit.representative, 0);
        assert!((hit.bsr - 0.95).abs() < 1e-9);

        let outcomes = ctx.classify_hits(&mut states, accepted).unwrap();
        assert_eq!(shrink_pool(&mut pool, &fx.proteins, &outcomes), 1);
        assert_eq!(pool.into_iter().collect::<Vec<_>>(), vec![unrelated]);

        // Second copy in g0 widens to NIPH; the synonymous copy reuses the new allele
        let novel = AlleleRef::Novel(digest(&fx.variant));
        let records = &states[0].records;
        assert_eq!(records[&0].classification(), Classification::Niph);
        assert_eq!(records[&0].matches().len(), 2);
        assert_eq!(records[&1].classification(), Classification::Exc(novel));
        assert_eq!(records[&2].classification(), Classification::Inf(novel));
        assert_eq!(states[0].novel_alleles().len(), 1);
    }

    #[test]
    fn test_shrink_pool_ignores_unknown_digests() {
        let fx = fixture();
        let mut pool: ProteinPool = (0..fx.proteins.len() as u32).collect();
        let mut outcome = LocusOutcome::default();
        outcome.classified_proteins.insert(digest(b"NOTINTHETABLE"));
        assert_eq!(shrink_pool(&mut pool, &fx.proteins, &[(0, outcome)]), 0);
        assert_eq!(pool.len(), fx.proteins.len());
    }

    /// Reports every hit under a query id the caller never wrote
    struct RenamingAligner(MockAligner);

    impl Aligner for RenamingAligner {
        fn name(&self) -> &'static str {
            "renaming"
        }

        fn build_database(&self, fasta: &Path, database: &Path) -> Result<()> {
            self.0.build_database(fasta, database)
        }

        fn align(&self, request: &AlignmentRequest<'_>) -> Result<Vec<AlignmentRow>> {
            let mut rows = self.0.align(request)?;
            for row in &mut rows {
                row.query_id = "query_0".to_string();
            }
            Ok(rows)
        }
    }

    #[test]
    fn test_unexpected_query_id_is_a_collaborator_error() {
        let fx = fixture();
        let aligner = RenamingAligner(MockAligner::default());
        let ctx = context(&fx, &aligner);
        let states = vec![locus()];
        let pool: ProteinPool = (0..fx.proteins.len() as u32).collect();

        let err = ctx
            .align_round(&states, &whole_pool(), &pool, &rep_scores(), 0.6, "round")
            .unwrap_err();
        assert!(err.is_collaborator());
    }

    #[test]
    fn test_aligner_receives_per_call_threads() {
        let fx = fixture();
        let aligner = MockAligner::default();
        let mut ctx = context(&fx, &aligner);
        ctx.call_threads = 3;
        let states = vec![locus()];
        let pool: ProteinPool = (0..fx.proteins.len() as u32).collect();

        ctx.align_round(&states, &whole_pool(), &pool, &rep_scores(), 0.6, "round")
            .unwrap();
        assert_eq!(aligner.max_threads(), 3);
    }

    #[test]
    fn test_collaborator_budget_stays_within_cpu() {
        assert_eq!(collaborator_budget(8, 100), (8, 1));
        assert_eq!(collaborator_budget(8, 2), (2, 4));
        assert_eq!(collaborator_budget(8, 3), (3, 2));
        assert_eq!(collaborator_budget(1, 0), (1, 1));
        assert_eq!(collaborator_budget(0, 5), (1, 1));
        for cpu in 1..=16 {
            for tasks in 0..=20 {
                let (workers, per_call) = collaborator_budget(cpu, tasks);
                assert!(workers * per_call <= cpu, "cpu {} tasks {}", cpu, tasks);
            }
        }
    }

    #[test]
    fn test_id_roundtrip() {
        assert_eq!(parse_protein_id(&protein_id(42)), Some(42));
        assert_eq!(parse_representative_id(&representative_id(3)), Some(3));
        assert_eq!(parse_protein_id("r1"), None);
        assert_eq!(parse_representative_id("rx"), None);
    }
}
