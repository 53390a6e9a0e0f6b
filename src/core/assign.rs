// assign.rs - Allele id minting and schema updates

//! Novel alleles are keyed by DNA digest during classification. This module
//! turns them into integer ids (`max + 1, max + 2, ...` per locus), resolves
//! every record to a printable call and, unless disabled, appends the new
//! alleles to the schema.

use crate::core::classify::{AlleleRef, CallCode, Classification, LocusState};
use crate::data::sequence::append_fasta;
use crate::data::{Locus, Schema, SelfScoreTable};
use crate::data::schema::Allele;
use crate::error::{CallerError, Result};
use crate::hashers::SequenceDigest;
use rayon::prelude::*;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Final call for one (genome, locus) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlleleCall {
    Exc(u32),
    Inf(u32),
    Asm,
    Alm,
    Plot3,
    Plot5,
    Lotsc,
    Niph,
    Niphem,
    Lnf,
}

impl AlleleCall {
    /// Classification code, `None` for LNF
    pub fn code(&self) -> Option<CallCode> {
        match self {
            AlleleCall::Exc(_) => Some(CallCode::Exc),
            AlleleCall::Inf(_) => Some(CallCode::Inf),
            AlleleCall::Asm => Some(CallCode::Asm),
            AlleleCall::Alm => Some(CallCode::Alm),
            AlleleCall::Plot3 => Some(CallCode::Plot3),
            AlleleCall::Plot5 => Some(CallCode::Plot5),
            AlleleCall::Lotsc => Some(CallCode::Lotsc),
            AlleleCall::Niph => Some(CallCode::Niph),
            AlleleCall::Niphem => Some(CallCode::Niphem),
            AlleleCall::Lnf => None,
        }
    }

    pub fn allele_id(&self) -> Option<u32> {
        match self {
            AlleleCall::Exc(id) | AlleleCall::Inf(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for AlleleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlleleCall::Exc(id) => write!(f, "{}", id),
            AlleleCall::Inf(id) => write!(f, "INF-{}", id),
            AlleleCall::Lnf => f.write_str("LNF"),
            other => match other.code() {
                Some(code) => f.write_str(code.as_str()),
                None => f.write_str("LNF"),
            },
        }
    }
}

impl Serialize for AlleleCall {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Novel allele with its minted id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAllele {
    pub id: u32,
    pub digest: SequenceDigest,
    pub sequence: Vec<u8>,
    pub protein_digest: SequenceDigest,
    pub representative: bool,
}

#[derive(Debug, Clone)]
pub struct LocusAssignment {
    pub locus: String,
    /// Indexed by genome id
    pub calls: Vec<AlleleCall>,
    /// In id order
    pub novel: Vec<NewAllele>,
}

impl LocusAssignment {
    pub fn representatives(&self) -> impl Iterator<Item = &NewAllele> {
        self.novel.iter().filter(|a| a.representative)
    }
}

struct IdMinter<'s> {
    state: &'s LocusState,
    next: u32,
    ids: HashMap<SequenceDigest, u32>,
    novel: Vec<NewAllele>,
}

impl<'s> IdMinter<'s> {
    fn new(state: &'s LocusState, locus: &Locus) -> Self {
        Self {
            state,
            next: locus.max_allele_id() + 1,
            ids: HashMap::new(),
            novel: Vec::new(),
        }
    }

    fn mint(&mut self, digest: &SequenceDigest) -> Result<u32> {
        if let Some(&id) = self.ids.get(digest) {
            return Ok(id);
        }
        let state = self.state;
        let allele = state.novel_allele(digest).ok_or_else(|| {
            CallerError::schema(format!(
                "Locus '{}' references unknown novel allele {}",
                state.name, digest
            ))
        })?;
        let id = self.next;
        self.next += 1;
        self.ids.insert(*digest, id);
        self.novel.push(NewAllele {
            id,
            digest: allele.digest,
            sequence: allele.sequence.clone(),
            protein_digest: allele.protein_digest,
            representative: allele.representative,
        });
        Ok(id)
    }

    fn resolve(&mut self, allele: AlleleRef) -> Result<u32> {
        match allele {
            AlleleRef::Schema(id) => Ok(id),
            AlleleRef::Novel(digest) => self.mint(&digest),
        }
    }
}

/// Mint ids for one locus: record-level INF alleles first in genome order,
/// then any other novel allele in the order its matches appear.
pub fn assign_locus(state: &LocusState, locus: &Locus, genome_count: usize) -> Result<LocusAssignment> {
    if state.name != locus.name {
        return Err(CallerError::schema(format!(
            "Locus state '{}' does not match schema locus '{}'",
            state.name, locus.name
        )));
    }
    let mut minter = IdMinter::new(state, locus);

    for record in state.records.values() {
        if let Classification::Inf(AlleleRef::Novel(digest)) = record.classification() {
            minter.mint(&digest)?;
        }
    }
    for record in state.records.values() {
        for m in record.matches() {
            if let (CallCode::Exc | CallCode::Inf, AlleleRef::Novel(digest)) = (m.code, m.allele) {
                minter.mint(&digest)?;
            }
        }
    }
    for allele in state.novel_alleles() {
        minter.mint(&allele.digest)?;
    }

    let mut calls = vec![AlleleCall::Lnf; genome_count];
    for (&genome, record) in &state.records {
        let slot = calls.get_mut(genome as usize).ok_or_else(|| {
            CallerError::schema(format!("Genome id {} out of range in locus '{}'", genome, state.name))
        })?;
        *slot = match record.classification() {
            Classification::Exc(allele) => AlleleCall::Exc(minter.resolve(allele)?),
            Classification::Inf(allele) => AlleleCall::Inf(minter.resolve(allele)?),
            Classification::Asm => AlleleCall::Asm,
            Classification::Alm => AlleleCall::Alm,
            Classification::Plot3 => AlleleCall::Plot3,
            Classification::Plot5 => AlleleCall::Plot5,
            Classification::Lotsc => AlleleCall::Lotsc,
            Classification::Niph => AlleleCall::Niph,
            Classification::Niphem => AlleleCall::Niphem,
        };
    }

    Ok(LocusAssignment {
        locus: state.name.clone(),
        calls,
        novel: minter.novel,
    })
}

/// Assign every locus in parallel; `states` follow the order of `schema.loci`
pub fn assign_all(states: &[LocusState], schema: &Schema, genome_count: usize) -> Result<Vec<LocusAssignment>> {
    if states.len() != schema.loci.len() {
        return Err(CallerError::schema(format!(
            "{} locus states for {} schema loci",
            states.len(),
            schema.loci.len()
        )));
    }
    states
        .par_iter()
        .zip(schema.loci.par_iter())
        .map(|(state, locus)| assign_locus(state, locus, genome_count))
        .collect()
}

/// What [`apply_assignments`] wrote to the schema
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchemaUpdate {
    pub alleles_added: usize,
    pub representatives_added: usize,
    pub loci_updated: usize,
}

/// Append new alleles and representatives, then rewrite the length-mode and
/// self-score tables.
pub fn apply_assignments(
    schema: &mut Schema,
    states: &[LocusState],
    assignments: &[LocusAssignment],
    self_scores: SelfScoreTable,
) -> Result<SchemaUpdate> {
    let mut update = SchemaUpdate::default();

    for ((locus, state), assignment) in schema.loci.iter_mut().zip(states).zip(assignments) {
        if assignment.locus != locus.name {
            return Err(CallerError::schema(format!(
                "Assignment for '{}' does not match schema locus '{}'",
                assignment.locus, locus.name
            )));
        }
        if assignment.novel.is_empty() {
            continue;
        }

        let headers: Vec<String> = assignment.novel.iter().map(|a| locus.allele_header(a.id)).collect();
        update.alleles_added += append_fasta(
            &locus.fasta_path,
            headers.iter().map(|h| h.as_str()).zip(assignment.novel.iter().map(|a| a.sequence.as_slice())),
        )?;
        update.representatives_added += append_fasta(
            &locus.short_path,
            headers
                .iter()
                .zip(&assignment.novel)
                .filter(|(_, a)| a.representative)
                .map(|(h, a)| (h.as_str(), a.sequence.as_slice())),
        )?;

        for allele in &assignment.novel {
            let entry = Allele {
                id: allele.id,
                sequence: allele.sequence.clone(),
                digest: allele.digest,
            };
            if allele.representative {
                locus.representatives.push(entry.clone());
            }
            locus.alleles.push(entry);
        }
        schema.length_modes.insert(locus.name.clone(), state.length_mode.clone());
        update.loci_updated += 1;
    }

    schema.self_scores = self_scores;
    schema.write_tables()?;
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bsr::RepresentativeSpan;
    use crate::core::classify::{CandidateHit, ClassifierParams, Evidence, Representative};
    use crate::data::schema::tests::write_schema;
    use crate::data::{Genome, GenomeSet, LengthMode, LociFilter};
    use crate::hashers::{SequenceHasher, Sha256Hasher};
    use std::path::PathBuf;

    const PARAMS: ClassifierParams = ClassifierParams {
        bsr_threshold: 0.6,
        size_threshold: 0.2,
    };

    fn digest(seq: &[u8]) -> SequenceDigest {
        Sha256Hasher.hash_sequence(seq)
    }

    fn genomes(count: u32) -> GenomeSet {
        GenomeSet::new(
            (0..count)
                .map(|id| Genome {
                    id,
                    name: format!("g{}", id),
                    path: PathBuf::from(format!("g{}.fasta", id)),
                    geometry: None,
                })
                .collect(),
        )
        .unwrap()
    }

    fn aligned<'a>(genome: u32, dna: &'a [u8], protein: &[u8], bsr: f64) -> CandidateHit<'a> {
        CandidateHit {
            genome,
            copy: 0,
            dna_digest: digest(dna),
            dna,
            protein_digest: digest(protein),
            evidence: Evidence::Aligned {
                representative: AlleleRef::Schema(1),
                span: RepresentativeSpan {
                    left: 0,
                    right: 0,
                    length: dna.len(),
                },
                bsr,
            },
        }
    }

    fn schema_with_locus(dir: &std::path::Path) -> Schema {
        write_schema(dir, &[("locusA", vec!["ATGAAACCCGGGTAA", "ATGAAACCCGGATAA"], vec![1])]);
        Schema::load(dir, &Sha256Hasher, &LociFilter::default()).unwrap()
    }

    fn state_for(schema: &Schema) -> LocusState {
        LocusState::new(
            "locusA",
            schema.length_modes["locusA"].clone(),
            vec![Representative {
                allele: AlleleRef::Schema(1),
                protein: b"MKPG".to_vec(),
                protein_digest: digest(b"MKPG"),
            }],
        )
    }

    #[test]
    fn test_call_display() {
        assert_eq!(AlleleCall::Exc(7).to_string(), "7");
        assert_eq!(AlleleCall::Inf(3).to_string(), "INF-3");
        assert_eq!(AlleleCall::Niphem.to_string(), "NIPHEM");
        assert_eq!(AlleleCall::Lnf.to_string(), "LNF");
        assert_eq!(AlleleCall::Lnf.code(), None);
        assert_eq!(serde_json::to_string(&AlleleCall::Plot5).unwrap(), "\"PLOT5\"");
    }

    #[test]
    fn test_inf_ids_follow_max_and_copies_reuse_them() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema_with_locus(dir.path());
        let set = genomes(4);
        let mut state = state_for(&schema);

        let novel_a = b"ATGAAACCCGGCTAA";
        let novel_b = b"ATGAAACCAGGCTAA";
        state.record_exact(0, 2, digest(b"ATGAAACCCGGATAA"));
        state
            .classify(
                vec![
                    aligned(3, novel_b, b"MKPGX", 0.8),
                    aligned(1, novel_a, b"MKPGA", 0.9),
                    aligned(2, novel_a, b"MKPGA", 0.9),
                ],
                &set,
                &PARAMS,
            )
            .unwrap();

        let assignment = assign_locus(&state, &schema.loci[0], 5).unwrap();
        assert_eq!(
            assignment.calls,
            vec![
                AlleleCall::Exc(2),
                AlleleCall::Inf(3),
                AlleleCall::Exc(3),
                AlleleCall::Inf(4),
                AlleleCall::Lnf
            ]
        );
        assert_eq!(assignment.novel.len(), 2);
        assert_eq!(assignment.novel[0].digest, digest(novel_a));
        assert_eq!(assignment.novel[1].id, 4);
    }

    #[test]
    fn test_paralog_inf_still_gets_an_id() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema_with_locus(dir.path());
        let set = genomes(1);
        let mut state = state_for(&schema);

        let paralog = b"ATGAAACCCGGCTAA";
        state.record_exact(0, 1, digest(b"ATGAAACCCGGGTAA"));
        state
            .classify(vec![aligned(0, paralog, b"MKPGA", 0.9)], &set, &PARAMS)
            .unwrap();

        let assignment = assign_locus(&state, &schema.loci[0], 1).unwrap();
        assert_eq!(assignment.calls, vec![AlleleCall::Niph]);
        assert_eq!(assignment.novel.len(), 1);
        assert_eq!(assignment.novel[0].id, 3);
    }

    #[test]
    fn test_synonymous_variants_share_one_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema_with_locus(dir.path());
        let set = genomes(2);
        let mut state = state_for(&schema);
        let lengths_before = state.length_mode.lengths.len();

        state
            .classify(
                vec![
                    aligned(0, b"ATGAAACCCGGCTAA", b"MKPGA", 0.9),
                    aligned(1, b"ATGAAGCCCGGCTAA", b"MKPGA", 0.9),
                ],
                &set,
                &PARAMS,
            )
            .unwrap();

        let assignment = assign_locus(&state, &schema.loci[0], 2).unwrap();
        assert_eq!(assignment.calls, vec![AlleleCall::Inf(3), AlleleCall::Inf(3)]);
        assert_eq!(assignment.novel.len(), 1);
        assert_eq!(state.length_mode.lengths.len(), lengths_before + 1);
    }

    #[test]
    fn test_apply_appends_alleles_and_representatives() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = schema_with_locus(dir.path());
        let set = genomes(1);
        let mut state = state_for(&schema);

        let novel = b"ATGAAACCCGGCTAA";
        state
            .classify(vec![aligned(0, novel, b"MKPGA", 0.65)], &set, &PARAMS)
            .unwrap();
        state.promote(&digest(novel), b"MKPGA".to_vec()).unwrap();

        let assignments = assign_all(std::slice::from_ref(&state), &schema, 1).unwrap();
        let mut scores = schema.self_scores.clone();
        scores.insert(digest(b"MKPGA"), crate::data::SelfScore { length: 5, score: 25.0 });
        let update = apply_assignments(&mut schema, std::slice::from_ref(&state), &assignments, scores).unwrap();
        assert_eq!(
            update,
            SchemaUpdate {
                alleles_added: 1,
                representatives_added: 1,
                loci_updated: 1
            }
        );

        let reloaded = Schema::load(dir.path(), &Sha256Hasher, &LociFilter::default()).unwrap();
        let locus = &reloaded.loci[0];
        assert_eq!(locus.max_allele_id(), 3);
        assert_eq!(locus.representatives.len(), 2);
        assert_eq!(locus.representatives[1].digest, digest(novel));
        assert_eq!(reloaded.length_modes["locusA"].lengths.len(), 3);
        assert!(reloaded.self_scores.contains(&digest(b"MKPGA")));
    }

    #[test]
    fn test_mismatched_locus_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema_with_locus(dir.path());
        let state = LocusState::new("other", LengthMode::from_lengths(vec![15]), Vec::new());
        assert!(matches!(
            assign_locus(&state, &schema.loci[0], 1),
            Err(CallerError::Schema(_))
        ));
    }
}
