// pipeline.rs - End-to-end allele calling driver

//! Stages, in order: input discovery, schema loading, CDS ingestion, DNA
//! deduplication, exact DNA matches against schema alleles, translation,
//! protein deduplication, exact protein matches, the clustered alignment
//! round, the representative discovery loop and allele-id assignment.
//!
//! The schema on disk is only touched after every stage has succeeded.

use crate::core::aligner::Aligner;
use crate::core::assign::{apply_assignments, assign_all, LocusAssignment, SchemaUpdate};
use crate::core::classify::{AlleleRef, CandidateHit, ClassifierParams, Evidence, LocusState, Representative};
use crate::core::cluster::ClusterParams;
use crate::core::dedup::{deduplicate, DedupTable, InputSequence};
use crate::core::discovery::{run_clustered_round, run_discovery, DiscoveryReport, RoundReport};
use crate::core::prediction::{ingest_genomes, FailedGenome, GenePredictor, PredictedGenome, PredictionMode};
use crate::core::search::{collaborator_budget, ProteinPool, SearchContext};
use crate::data::genome::collect_input_files;
use crate::data::translation::translate_cds;
use crate::data::{GeneticCode, Genome, GenomeGeometry, GenomeSet, LociFilter, Schema};
use crate::error::{CallerError, Result};
use crate::hashers::{SequenceDigest, SequenceHasher};
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Validated run parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerConfig {
    pub input_files: PathBuf,
    pub schema_directory: PathBuf,
    pub output_directory: PathBuf,
    pub ptf: Option<PathBuf>,
    pub bsr_threshold: f64,
    pub minimum_length: usize,
    pub translation_table: u8,
    pub size_threshold: f64,
    pub clustering: ClusterParams,
    pub cpu: usize,
    pub blast_path: Option<PathBuf>,
    pub prodigal_path: Option<PathBuf>,
    pub prodigal_mode: PredictionMode,
    pub cds_input: bool,
    pub hasher_type: String,
    pub no_inferred: bool,
    pub no_cleanup: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            input_files: PathBuf::new(),
            schema_directory: PathBuf::new(),
            output_directory: PathBuf::new(),
            ptf: None,
            bsr_threshold: 0.6,
            minimum_length: 201,
            translation_table: 11,
            size_threshold: 0.2,
            clustering: ClusterParams::default(),
            cpu: 1,
            blast_path: None,
            prodigal_path: None,
            prodigal_mode: PredictionMode::Single,
            cds_input: false,
            hasher_type: "sha256".to_string(),
            no_inferred: false,
            no_cleanup: false,
        }
    }
}

impl CallerConfig {
    pub fn classifier_params(&self) -> ClassifierParams {
        ClassifierParams {
            bsr_threshold: self.bsr_threshold,
            size_threshold: self.size_threshold,
        }
    }

    pub fn temp_directory(&self) -> PathBuf {
        self.output_directory.join("temp")
    }
}

/// A distinct CDS excluded because it could not be translated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidCds {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub genomes: usize,
    pub cds: usize,
    pub distinct_dna: usize,
    pub exact_dna_matches: usize,
    pub invalid_cds: usize,
    pub distinct_proteins: usize,
    pub exact_protein_matches: usize,
    pub unclassified_proteins: usize,
}

/// Everything a finished run produced
#[derive(Debug)]
pub struct CallerRun {
    pub genomes: GenomeSet,
    pub failed: Vec<FailedGenome>,
    pub invalid: Vec<InvalidCds>,
    pub states: Vec<LocusState>,
    pub assignments: Vec<LocusAssignment>,
    pub stats: RunStats,
    pub clustered: RoundReport,
    pub discovery: DiscoveryReport,
    /// `None` when the schema was left untouched
    pub schema_update: Option<SchemaUpdate>,
}

pub struct AlleleCaller<'a> {
    config: CallerConfig,
    hasher: Arc<dyn SequenceHasher>,
    aligner: &'a dyn Aligner,
    predictor: Option<&'a dyn GenePredictor>,
    filter: LociFilter,
}

impl<'a> AlleleCaller<'a> {
    /// `predictor` is ignored in CDS input mode
    pub fn new(
        config: CallerConfig,
        hasher: Arc<dyn SequenceHasher>,
        aligner: &'a dyn Aligner,
        predictor: Option<&'a dyn GenePredictor>,
        filter: LociFilter,
    ) -> Self {
        let predictor = if config.cds_input { None } else { predictor };
        Self {
            config,
            hasher,
            aligner,
            predictor,
            filter,
        }
    }

    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    /// Resolve inputs and load the schema without calling anything.
    ///
    /// Returns the number of input genomes and selected loci.
    pub fn dry_run(&self) -> Result<(usize, usize)> {
        let inputs = collect_input_files(&self.config.input_files)?;
        let schema = Schema::load(&self.config.schema_directory, self.hasher.as_ref(), &self.filter)?;
        Ok((inputs.len(), schema.loci.len()))
    }

    pub fn run(&self) -> Result<CallerRun> {
        let start = Instant::now();
        if self.predictor.is_none() && !self.config.cds_input {
            return Err(CallerError::config("A gene predictor is required unless --cds-input is set"));
        }
        let code = GeneticCode::from_id(self.config.translation_table).map_err(CallerError::config)?;

        let inputs = collect_input_files(&self.config.input_files)?;
        println!("📂 Input genomes: {}", inputs.len());
        let mut schema = Schema::load(&self.config.schema_directory, self.hasher.as_ref(), &self.filter)?;
        let mut states = self.locus_states(&schema, &code)?;

        let workdir = self.config.temp_directory();
        fs::create_dir_all(&workdir).map_err(|e| CallerError::io(&workdir, e))?;

        if self.config.cds_input {
            println!("🧬 Reading coding sequences...");
        } else {
            println!("🧬 Predicting coding sequences...");
        }
        let (predicted, failed) = ingest_genomes(self.predictor, &inputs, &workdir.join("1_gene_prediction"))?;
        let (genomes, dna_inputs) = self.build_genomes(predicted)?;
        let mut stats = RunStats {
            genomes: genomes.len(),
            cds: dna_inputs.len(),
            ..RunStats::default()
        };

        let dna = deduplicate(&dna_inputs, self.hasher.as_ref(), self.config.cpu);
        drop(dna_inputs);
        stats.distinct_dna = dna.len();
        println!(
            "🔍 {} CDS, {} distinct ({} duplicates removed)",
            stats.cds,
            dna.len(),
            dna.duplicates()
        );

        let (exact_dna, exact_matches) = record_exact_dna(&schema, &dna, &mut states)?;
        stats.exact_dna_matches = exact_matches;
        println!("✅ Exact DNA matches: {}", exact_matches);

        let (protein_inputs, invalid) = translate_distinct(&dna, &exact_dna, &code, self.config.minimum_length);
        stats.invalid_cds = invalid.len();
        if !invalid.is_empty() {
            println!("⚠️  {} distinct CDS could not be translated", invalid.len());
        }
        let proteins = deduplicate(&protein_inputs, self.hasher.as_ref(), self.config.cpu);
        drop(protein_inputs);
        stats.distinct_proteins = proteins.len();

        let (workers, call_threads) = collaborator_budget(self.config.cpu, states.len());
        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| CallerError::config(format!("Failed to build aligner thread pool: {}", e)))?;
        let ctx = SearchContext {
            aligner: self.aligner,
            genomes: &genomes,
            dna: &dna,
            proteins: &proteins,
            threads: &threads,
            call_threads,
            workdir: workdir.join("2_alignment"),
            params: self.config.classifier_params(),
        };

        let mut pool: ProteinPool = (0..proteins.len() as u32).collect();
        stats.exact_protein_matches = self.record_exact_proteins(&ctx, &schema, &code, &mut states, &mut pool)?;
        println!(
            "✅ Exact protein matches: {} ({} distinct proteins left to align)",
            stats.exact_protein_matches,
            pool.len()
        );

        let mut scores = schema.self_scores.clone();
        let clustered = run_clustered_round(&ctx, &mut states, &mut pool, &mut scores, &self.config.clustering)?;
        println!(
            "🎯 Clustered round: {} matches, {} inferred",
            clustered.matches, clustered.inferred
        );
        let discovery = run_discovery(&ctx, &mut states, &mut pool, &mut scores)?;
        stats.unclassified_proteins = pool.len();
        println!(
            "🔁 Discovery finished after {} iterations, {} new representatives",
            discovery.iterations, discovery.promoted
        );

        let assignments = assign_all(&states, &schema, genomes.len())?;
        let schema_update = if self.config.no_inferred {
            println!("ℹ️  Schema left unchanged (--no-inferred)");
            None
        } else {
            let update = apply_assignments(&mut schema, &states, &assignments, scores)?;
            println!(
                "💾 Schema updated: {} alleles, {} representatives added",
                update.alleles_added, update.representatives_added
            );
            Some(update)
        };

        if !self.config.no_cleanup {
            fs::remove_dir_all(&workdir).map_err(|e| CallerError::io(&workdir, e))?;
        }
        println!("⏱️  Allele calling completed in {:.2}s", start.elapsed().as_secs_f64());

        Ok(CallerRun {
            genomes,
            failed,
            invalid,
            states,
            assignments,
            stats,
            clustered,
            discovery,
            schema_update,
        })
    }

    /// One state per schema locus, with translated representatives
    fn locus_states(&self, schema: &Schema, code: &GeneticCode) -> Result<Vec<LocusState>> {
        schema
            .loci
            .par_iter()
            .map(|locus| -> Result<LocusState> {
                let mode = schema.length_modes.get(&locus.name).cloned().ok_or_else(|| {
                    CallerError::schema(format!("No length mode for locus '{}'", locus.name))
                })?;
                let mut representatives = Vec::with_capacity(locus.representatives.len());
                for allele in &locus.representatives {
                    match translate_cds(&allele.sequence, code, 0) {
                        Ok(translation) => representatives.push(Representative {
                            allele: AlleleRef::Schema(allele.id),
                            protein_digest: self.hasher.hash_sequence(&translation.protein),
                            protein: translation.protein,
                        }),
                        Err(e) => warn!(
                            "Skipping representative {} of locus '{}': {}",
                            allele.id, locus.name, e
                        ),
                    }
                }
                if representatives.is_empty() {
                    warn!("Locus '{}' has no usable representative", locus.name);
                }
                Ok(LocusState::new(locus.name.clone(), mode, representatives))
            })
            .collect()
    }

    /// Dense genome ids in input order, plus the DNA stream keyed by genome id
    fn build_genomes(&self, predicted: Vec<(PathBuf, PredictedGenome)>) -> Result<(GenomeSet, Vec<InputSequence>)> {
        let mut genomes = Vec::with_capacity(predicted.len());
        let mut inputs = Vec::new();
        for (id, (path, genome)) in predicted.into_iter().enumerate() {
            let id = id as u32;
            let mut geometry = genome.has_geometry().then(|| GenomeGeometry {
                contig_lengths: genome.contig_lengths.clone(),
                ..GenomeGeometry::default()
            });
            for cds in genome.cds {
                if let (Some(geometry), Some(location)) = (geometry.as_mut(), cds.location) {
                    geometry.add_cds(self.hasher.hash_sequence(&cds.sequence), location);
                }
                inputs.push(InputSequence::new(id, cds.id, cds.sequence));
            }
            genomes.push(Genome {
                id,
                name: genome.name,
                path,
                geometry,
            });
        }
        Ok((GenomeSet::new(genomes)?, inputs))
    }

    /// Classify distinct proteins identical to a translated schema allele.
    ///
    /// Returns the number of matches recorded.
    fn record_exact_proteins(
        &self,
        ctx: &SearchContext<'_>,
        schema: &Schema,
        code: &GeneticCode,
        states: &mut [LocusState],
        pool: &mut ProteinPool,
    ) -> Result<usize> {
        let translated: Vec<Vec<(SequenceDigest, u32)>> = schema
            .loci
            .par_iter()
            .map(|locus| {
                let mut seen = HashSet::new();
                locus
                    .alleles
                    .iter()
                    .filter_map(|allele| {
                        let translation = translate_cds(&allele.sequence, code, 0).ok()?;
                        let digest = self.hasher.hash_sequence(&translation.protein);
                        seen.insert(digest).then_some((digest, allele.id))
                    })
                    .collect()
            })
            .collect();

        let mut index: HashMap<SequenceDigest, Vec<(usize, u32)>> = HashMap::new();
        for (locus, alleles) in translated.into_iter().enumerate() {
            for (digest, allele) in alleles {
                index.entry(digest).or_default().push((locus, allele));
            }
        }

        let mut per_locus: Vec<Vec<CandidateHit<'_>>> = vec![Vec::new(); states.len()];
        for (protein, record) in ctx.proteins.distinct().iter().enumerate() {
            if let Some(targets) = index.get(&record.digest) {
                for &(locus, allele) in targets {
                    per_locus[locus].extend(ctx.expand(protein as u32, Evidence::ProteinExact { allele })?);
                }
                pool.remove(&(protein as u32));
            }
        }

        let matches: Vec<usize> = states
            .par_iter_mut()
            .zip(per_locus.into_par_iter())
            .filter(|(_, hits)| !hits.is_empty())
            .map(|(state, hits)| {
                state
                    .classify(hits, ctx.genomes, &ctx.params)
                    .map(|outcome| outcome.matches)
            })
            .collect::<Result<_>>()?;
        Ok(matches.into_iter().sum())
    }
}

/// Record EXC for every CDS whose DNA equals a schema allele.
///
/// Returns the matched distinct-DNA indices and the number of matches.
fn record_exact_dna(
    schema: &Schema,
    dna: &DedupTable,
    states: &mut [LocusState],
) -> Result<(HashSet<usize>, usize)> {
    let mut index: HashMap<SequenceDigest, Vec<(usize, u32)>> = HashMap::new();
    for (locus, entry) in schema.loci.iter().enumerate() {
        for allele in &entry.alleles {
            index.entry(allele.digest).or_default().push((locus, allele.id));
        }
    }

    let mut matched = HashSet::new();
    let mut matches = 0;
    for (i, distinct) in dna.distinct().iter().enumerate() {
        let Some(targets) = index.get(&distinct.digest) else {
            continue;
        };
        let genomes = dna
            .occurrences_at(i)
            .ok_or_else(|| CallerError::schema(format!("No occurrences for CDS {}", distinct.digest)))?
            .values();
        for &(locus, allele) in targets {
            for &genome in &genomes {
                states[locus].record_exact(genome, allele, distinct.digest);
                matches += 1;
            }
        }
        matched.insert(i);
    }
    Ok((matched, matches))
}

/// Translate distinct DNA not already matched; proteins are keyed by the
/// distinct-DNA index
fn translate_distinct(
    dna: &DedupTable,
    skip: &HashSet<usize>,
    code: &GeneticCode,
    minimum_length: usize,
) -> (Vec<InputSequence>, Vec<InvalidCds>) {
    let results: Vec<(usize, std::result::Result<Vec<u8>, String>)> = dna
        .distinct()
        .par_iter()
        .enumerate()
        .filter(|(i, _)| !skip.contains(i))
        .map(|(i, record)| {
            let result = translate_cds(&record.sequence, code, minimum_length)
                .map(|t| t.protein)
                .map_err(|e| e.to_string());
            (i, result)
        })
        .collect();

    let mut proteins = Vec::with_capacity(results.len());
    let mut invalid = Vec::new();
    for (i, result) in results {
        let id = dna.distinct()[i].id.clone();
        match result {
            Ok(protein) => proteins.push(InputSequence::new(i as u32, id, protein)),
            Err(reason) => invalid.push(InvalidCds { id, reason }),
        }
    }
    (proteins, invalid)
}
