// classify.rs - Per-locus classification state machine

//! Each (genome, locus) pair accumulates matches in a
//! [`ClassificationRecord`]. A single match yields its own code; a second
//! match widens the record to NIPHEM (all exact) or NIPH, after which the
//! code is frozen. A locus with no record for a genome is LNF.
//!
//! Every locus owns one [`LocusState`]; tasks classifying different loci
//! never share mutable state.

use crate::core::bsr::{in_candidate_band, RepresentativeSpan};
use crate::data::{GenomeSet, LengthMode, Strand};
use crate::error::Result;
use crate::hashers::SequenceDigest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Allele a match resolves to: an existing schema id or a novel allele keyed
/// by its DNA digest until the assignor mints an id for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlleleRef {
    Schema(u32),
    Novel(SequenceDigest),
}

impl fmt::Display for AlleleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlleleRef::Schema(id) => write!(f, "{}", id),
            AlleleRef::Novel(digest) => write!(f, "*{}", &digest.to_hex()[..12]),
        }
    }
}

/// Code of a single match or of a whole record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallCode {
    Exc,
    Inf,
    Asm,
    Alm,
    Plot3,
    Plot5,
    Lotsc,
    Niph,
    Niphem,
}

impl CallCode {
    pub const ALL: [CallCode; 9] = [
        CallCode::Exc,
        CallCode::Inf,
        CallCode::Asm,
        CallCode::Alm,
        CallCode::Plot3,
        CallCode::Plot5,
        CallCode::Lotsc,
        CallCode::Niph,
        CallCode::Niphem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallCode::Exc => "EXC",
            CallCode::Inf => "INF",
            CallCode::Asm => "ASM",
            CallCode::Alm => "ALM",
            CallCode::Plot3 => "PLOT3",
            CallCode::Plot5 => "PLOT5",
            CallCode::Lotsc => "LOTSC",
            CallCode::Niph => "NIPH",
            CallCode::Niphem => "NIPHEM",
        }
    }
}

impl fmt::Display for CallCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a (genome, locus) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Exc(AlleleRef),
    Inf(AlleleRef),
    Asm,
    Alm,
    Plot3,
    Plot5,
    Lotsc,
    Niph,
    Niphem,
}

impl Classification {
    pub fn code(&self) -> CallCode {
        match self {
            Classification::Exc(_) => CallCode::Exc,
            Classification::Inf(_) => CallCode::Inf,
            Classification::Asm => CallCode::Asm,
            Classification::Alm => CallCode::Alm,
            Classification::Plot3 => CallCode::Plot3,
            Classification::Plot5 => CallCode::Plot5,
            Classification::Lotsc => CallCode::Lotsc,
            Classification::Niph => CallCode::Niph,
            Classification::Niphem => CallCode::Niphem,
        }
    }

    pub fn is_frozen(&self) -> bool {
        matches!(self, Classification::Niph | Classification::Niphem)
    }

    fn from_match(m: &Match) -> Self {
        match m.code {
            CallCode::Exc => Classification::Exc(m.allele),
            CallCode::Inf => Classification::Inf(m.allele),
            CallCode::Asm => Classification::Asm,
            CallCode::Alm => Classification::Alm,
            CallCode::Plot3 => Classification::Plot3,
            CallCode::Plot5 => Classification::Plot5,
            CallCode::Lotsc => Classification::Lotsc,
            CallCode::Niph => Classification::Niph,
            CallCode::Niphem => Classification::Niphem,
        }
    }
}

/// One piece of evidence for a (genome, locus) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// Allele for EXC/INF, hitting representative otherwise
    pub allele: AlleleRef,
    /// DNA digest of the genome's CDS
    pub candidate: SequenceDigest,
    pub code: CallCode,
    pub bsr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    classification: Classification,
    matches: Vec<Match>,
}

impl ClassificationRecord {
    pub fn new(first: Match) -> Self {
        Self {
            classification: Classification::from_match(&first),
            matches: vec![first],
        }
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Append a match, widening to NIPHEM/NIPH unless already frozen
    pub fn push(&mut self, m: Match) {
        self.matches.push(m);
        if !self.classification.is_frozen() {
            self.classification = if self.matches.iter().all(|m| m.code == CallCode::Exc) {
                Classification::Niphem
            } else {
                Classification::Niph
            };
        }
    }
}

/// Thresholds used by the rules
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierParams {
    pub bsr_threshold: f64,
    pub size_threshold: f64,
}

/// How a CDS came to be matched to the locus
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evidence {
    /// Protein identical to a translated schema allele
    ProteinExact { allele: u32 },
    /// Accepted alignment against a representative
    Aligned {
        representative: AlleleRef,
        span: RepresentativeSpan,
        bsr: f64,
    },
}

/// One CDS occurrence matched to a locus, expanded to its genome
#[derive(Debug, Clone, Copy)]
pub struct CandidateHit<'a> {
    pub genome: u32,
    /// Index of this copy among the genome's CDS sharing `dna_digest`
    pub copy: usize,
    pub dna_digest: SequenceDigest,
    pub dna: &'a [u8],
    pub protein_digest: SequenceDigest,
    pub evidence: Evidence,
}

/// Representative protein of a locus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representative {
    pub allele: AlleleRef,
    pub protein: Vec<u8>,
    pub protein_digest: SequenceDigest,
}

/// New DNA allele found in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelAllele {
    pub digest: SequenceDigest,
    pub sequence: Vec<u8>,
    pub protein_digest: SequenceDigest,
    pub representative: bool,
}

/// INF hit eligible for promotion to representative
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepresentativeCandidate {
    pub genome: u32,
    pub dna_digest: SequenceDigest,
    pub protein_digest: SequenceDigest,
    pub source: AlleleRef,
    pub bsr: f64,
}

/// Summary of one classification pass over a locus
#[derive(Debug, Clone, Default)]
pub struct LocusOutcome {
    pub candidates: Vec<RepresentativeCandidate>,
    /// Protein digests that were classified and leave the pool
    pub classified_proteins: HashSet<SequenceDigest>,
    pub matches: usize,
    pub inferred: usize,
}

/// Mutable per-locus state for a whole run
#[derive(Debug, Clone)]
pub struct LocusState {
    pub name: String,
    pub records: BTreeMap<u32, ClassificationRecord>,
    pub length_mode: LengthMode,
    pub representatives: Vec<Representative>,
    seen_dna: HashMap<SequenceDigest, AlleleRef>,
    /// First new allele seen for each protein this run
    seen_protein: HashMap<SequenceDigest, AlleleRef>,
    novel: Vec<NovelAllele>,
    novel_index: HashMap<SequenceDigest, usize>,
    promoted: Vec<SequenceDigest>,
}

impl LocusState {
    pub fn new(name: impl Into<String>, length_mode: LengthMode, representatives: Vec<Representative>) -> Self {
        Self {
            name: name.into(),
            records: BTreeMap::new(),
            length_mode,
            representatives,
            seen_dna: HashMap::new(),
            seen_protein: HashMap::new(),
            novel: Vec::new(),
            novel_index: HashMap::new(),
            promoted: Vec::new(),
        }
    }

    pub fn novel_alleles(&self) -> &[NovelAllele] {
        &self.novel
    }

    pub fn novel_allele(&self, digest: &SequenceDigest) -> Option<&NovelAllele> {
        self.novel_index.get(digest).map(|&i| &self.novel[i])
    }

    /// Novel alleles promoted to representative, in promotion order
    pub fn promoted(&self) -> &[SequenceDigest] {
        &self.promoted
    }

    fn add_match(&mut self, genome: u32, m: Match) {
        match self.records.get_mut(&genome) {
            Some(record) => record.push(m),
            None => {
                self.records.insert(genome, ClassificationRecord::new(m));
            }
        }
    }

    /// DNA identical to an existing schema allele
    pub fn record_exact(&mut self, genome: u32, allele: u32, dna_digest: SequenceDigest) {
        self.add_match(
            genome,
            Match {
                allele: AlleleRef::Schema(allele),
                candidate: dna_digest,
                code: CallCode::Exc,
                bsr: 1.0,
            },
        );
    }

    fn accept_novel(&mut self, hit: &CandidateHit<'_>) -> AlleleRef {
        let allele = AlleleRef::Novel(hit.dna_digest);
        if !self.novel_index.contains_key(&hit.dna_digest) {
            self.novel_index.insert(hit.dna_digest, self.novel.len());
            self.novel.push(NovelAllele {
                digest: hit.dna_digest,
                sequence: hit.dna.to_vec(),
                protein_digest: hit.protein_digest,
                representative: false,
            });
        }
        self.seen_dna.insert(hit.dna_digest, allele);
        self.seen_protein.entry(hit.protein_digest).or_insert(allele);
        self.length_mode.add(hit.dna.len());
        allele
    }

    /// Apply the rules to one hit and record the resulting match
    fn decide(
        &mut self,
        hit: &CandidateHit<'_>,
        genomes: &GenomeSet,
        params: &ClassifierParams,
    ) -> Result<(Match, Option<RepresentativeCandidate>)> {
        // Rule 1: this DNA was already accepted in this run
        if let Some(&allele) = self.seen_dna.get(&hit.dna_digest) {
            return Ok((
                Match {
                    allele,
                    candidate: hit.dna_digest,
                    code: CallCode::Exc,
                    bsr: 1.0,
                },
                None,
            ));
        }

        // Rule 2: known protein, new DNA
        if let Some(&allele) = self.seen_protein.get(&hit.protein_digest) {
            self.seen_dna.insert(hit.dna_digest, allele);
            return Ok((
                Match {
                    allele,
                    candidate: hit.dna_digest,
                    code: CallCode::Inf,
                    bsr: 1.0,
                },
                None,
            ));
        }

        let (representative, span, bsr) = match hit.evidence {
            Evidence::ProteinExact { .. } => {
                let allele = self.accept_novel(hit);
                return Ok((
                    Match {
                        allele,
                        candidate: hit.dna_digest,
                        code: CallCode::Inf,
                        bsr: 1.0,
                    },
                    None,
                ));
            }
            Evidence::Aligned {
                representative,
                span,
                bsr,
            } => (representative, span, bsr),
        };

        let mismatch = |code| Match {
            allele: representative,
            candidate: hit.dna_digest,
            code,
            bsr,
        };

        // Rule 3: contig geometry
        if let Some(contig) = genomes.locate(hit.genome, &hit.dna_digest, hit.copy)? {
            let (left, right) = contig.margins();
            let (contig_left, contig_right) = match contig.location.strand {
                Strand::Forward => (left, right),
                Strand::Reverse => (right, left),
            };
            if contig.contig_length < span.length {
                return Ok((mismatch(CallCode::Lotsc), None));
            }
            if contig_left < span.left {
                return Ok((mismatch(CallCode::Plot5), None));
            }
            if contig_right < span.right {
                return Ok((mismatch(CallCode::Plot3), None));
            }
        }

        // Rule 4: length outliers, strict bounds
        let length = hit.dna.len() as f64;
        let mode = self.length_mode.mode as f64;
        let margin = mode * params.size_threshold;
        if length < mode - margin {
            return Ok((mismatch(CallCode::Asm), None));
        }
        if length > mode + margin {
            return Ok((mismatch(CallCode::Alm), None));
        }

        // Rule 5: new allele
        let allele = self.accept_novel(hit);
        let candidate = in_candidate_band(bsr, params.bsr_threshold).then_some(RepresentativeCandidate {
            genome: hit.genome,
            dna_digest: hit.dna_digest,
            protein_digest: hit.protein_digest,
            source: representative,
            bsr,
        });
        Ok((
            Match {
                allele,
                candidate: hit.dna_digest,
                code: CallCode::Inf,
                bsr,
            },
            candidate,
        ))
    }

    /// Classify hits in genome order; each hit yields exactly one match
    pub fn classify(
        &mut self,
        mut hits: Vec<CandidateHit<'_>>,
        genomes: &GenomeSet,
        params: &ClassifierParams,
    ) -> Result<LocusOutcome> {
        hits.sort_by_key(|hit| hit.genome);

        let mut outcome = LocusOutcome::default();
        let mut candidate_proteins = HashSet::new();
        for hit in &hits {
            let (m, candidate) = self.decide(hit, genomes, params)?;
            if m.code == CallCode::Inf {
                outcome.inferred += 1;
            }
            outcome.matches += 1;
            outcome.classified_proteins.insert(hit.protein_digest);
            self.add_match(hit.genome, m);

            if let Some(candidate) = candidate {
                if candidate_proteins.insert(candidate.protein_digest) {
                    outcome.candidates.push(candidate);
                }
            }
        }
        Ok(outcome)
    }

    /// Make a novel allele a representative of this locus
    pub fn promote(&mut self, dna_digest: &SequenceDigest, protein: Vec<u8>) -> Result<()> {
        let index = *self.novel_index.get(dna_digest).ok_or_else(|| {
            crate::error::CallerError::schema(format!(
                "Cannot promote unknown allele {} in locus '{}'",
                dna_digest, self.name
            ))
        })?;
        let novel = &mut self.novel[index];
        if novel.representative {
            return Ok(());
        }
        novel.representative = true;
        self.representatives.push(Representative {
            allele: AlleleRef::Novel(*dna_digest),
            protein,
            protein_digest: novel.protein_digest,
        });
        self.promoted.push(*dna_digest);
        Ok(())
    }

    /// Number of records per record-level code
    pub fn code_counts(&self) -> BTreeMap<CallCode, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.values() {
            *counts.entry(record.classification().code()).or_insert(0) += 1;
        }
        counts
    }
}
