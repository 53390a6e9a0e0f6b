// schema.rs - Schema loading, loci filtering and persisted schema tables

use crate::data::sequence::{has_fasta_extension, read_fasta};
use crate::error::{CallerError, Result};
use crate::hashers::{SequenceDigest, SequenceHasher};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const SHORT_DIR: &str = "short";
pub const SELF_SCORES_FILE: &str = "self_scores.json";
pub const LOCI_MODES_FILE: &str = "loci_modes.json";

/// Allele length multiset and its current mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthMode {
    pub mode: usize,
    pub lengths: Vec<usize>,
}

impl LengthMode {
    pub fn from_lengths(lengths: Vec<usize>) -> Self {
        let mode = most_frequent_length(&lengths);
        Self { mode, lengths }
    }

    /// Record a newly accepted allele length and recompute the mode
    pub fn add(&mut self, length: usize) {
        self.lengths.push(length);
        self.mode = most_frequent_length(&self.lengths);
    }
}

/// Most frequent value; ties go to the smallest length
pub fn most_frequent_length(lengths: &[usize]) -> usize {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &length in lengths {
        *counts.entry(length).or_insert(0) += 1;
    }
    let mut best = (0usize, 0usize);
    for (length, count) in counts {
        if count > best.1 {
            best = (length, count);
        }
    }
    best.0
}

/// Self-alignment score of a representative protein
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SelfScore {
    pub length: usize,
    pub score: f64,
}

/// Self-scores keyed by representative protein digest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelfScoreTable {
    scores: HashMap<SequenceDigest, SelfScore>,
}

impl SelfScoreTable {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| CallerError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| CallerError::parse(path, e.to_string()))
    }

    pub fn get(&self, digest: &SequenceDigest) -> Option<&SelfScore> {
        self.scores.get(digest)
    }

    pub fn contains(&self, digest: &SequenceDigest) -> bool {
        self.scores.contains_key(digest)
    }

    pub fn insert(&mut self, digest: SequenceDigest, score: SelfScore) {
        self.scores.insert(digest, score);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Loci selection compiled from CLI or config options
#[derive(Debug, Clone, Default)]
pub struct LociFilter {
    pub include_regex: Option<Regex>,
    pub exclude_regex: Option<Regex>,
    pub include_set: Option<HashSet<String>>,
}

impl LociFilter {
    pub fn accepts(&self, locus: &str) -> bool {
        if let Some(set) = &self.include_set {
            if !set.contains(locus) {
                return false;
            }
        }
        if let Some(regex) = &self.include_regex {
            if !regex.is_match(locus) {
                return false;
            }
        }
        if let Some(regex) = &self.exclude_regex {
            if regex.is_match(locus) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct Allele {
    pub id: u32,
    pub sequence: Vec<u8>,
    pub digest: SequenceDigest,
}

#[derive(Debug, Clone)]
pub struct Locus {
    pub name: String,
    pub fasta_path: PathBuf,
    pub short_path: PathBuf,
    pub alleles: Vec<Allele>,
    pub representatives: Vec<Allele>,
}

impl Locus {
    pub fn max_allele_id(&self) -> u32 {
        self.alleles.iter().map(|a| a.id).max().unwrap_or(0)
    }

    pub fn allele_header(&self, id: u32) -> String {
        format!("{}_{}", self.name, id)
    }

    fn load(fasta_path: &Path, short_dir: &Path, hasher: &dyn SequenceHasher) -> Result<Self> {
        let name = fasta_path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| CallerError::input(format!("Invalid locus file: {}", fasta_path.display())))?
            .to_string();

        let alleles = read_alleles(fasta_path, hasher)?;
        if alleles.is_empty() {
            return Err(CallerError::schema(format!("Locus '{}' has no alleles", name)));
        }
        let mut ids = HashSet::new();
        for allele in &alleles {
            if !ids.insert(allele.id) {
                return Err(CallerError::schema(format!(
                    "Locus '{}' has duplicate allele id {}",
                    name, allele.id
                )));
            }
        }

        let short_path = short_dir.join(format!("{}_short.fasta", name));
        if !short_path.exists() {
            return Err(CallerError::schema(format!(
                "Missing representative file {}",
                short_path.display()
            )));
        }
        let representatives = read_alleles(&short_path, hasher)?;

        Ok(Self {
            name,
            fasta_path: fasta_path.to_path_buf(),
            short_path,
            alleles,
            representatives,
        })
    }
}

/// Allele id from a `<locus>_<id>` header (the `*` novelty prefix is tolerated)
pub fn parse_allele_id(header: &str) -> Option<u32> {
    let tail = header.rsplit_once('_').map(|(_, id)| id).unwrap_or(header);
    tail.trim_start_matches('*').parse().ok()
}

fn read_alleles(path: &Path, hasher: &dyn SequenceHasher) -> Result<Vec<Allele>> {
    read_fasta(path)?
        .into_iter()
        .map(|record| -> Result<Allele> {
            let id = parse_allele_id(&record.id).ok_or_else(|| {
                CallerError::schema(format!(
                    "Cannot parse allele id from header '{}' in {}",
                    record.id,
                    path.display()
                ))
            })?;
            let sequence = record.sequence.to_ascii_uppercase();
            let digest = hasher.digest_normalized(&sequence);
            Ok(Allele {
                id,
                sequence,
                digest,
            })
        })
        .collect()
}

/// A wgMLST/cgMLST schema loaded from disk
#[derive(Debug)]
pub struct Schema {
    pub root: PathBuf,
    pub loci: Vec<Locus>,
    pub length_modes: BTreeMap<String, LengthMode>,
    pub self_scores: SelfScoreTable,
}

impl Schema {
    pub fn short_dir(&self) -> PathBuf {
        self.root.join(SHORT_DIR)
    }

    pub fn self_scores_path(&self) -> PathBuf {
        self.short_dir().join(SELF_SCORES_FILE)
    }

    pub fn modes_path(&self) -> PathBuf {
        self.root.join(LOCI_MODES_FILE)
    }

    pub fn load(root: &Path, hasher: &dyn SequenceHasher, filter: &LociFilter) -> Result<Self> {
        println!("🧬 Loading schema from directory: {}", root.display());

        if !root.is_dir() {
            return Err(CallerError::input(format!(
                "Schema directory '{}' does not exist",
                root.display()
            )));
        }
        let short_dir = root.join(SHORT_DIR);

        let mut locus_files: Vec<PathBuf> = fs::read_dir(root)
            .map_err(|e| CallerError::io(root, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_fasta_extension(path))
            .filter(|path| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|name| filter.accepts(name))
                    .unwrap_or(false)
            })
            .collect();
        locus_files.sort();

        if locus_files.is_empty() {
            return Err(CallerError::input(format!(
                "No loci selected from schema '{}'",
                root.display()
            )));
        }

        let pb = ProgressBar::new(locus_files.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let loci: Vec<Locus> = locus_files
            .par_iter()
            .map(|path| {
                let locus = Locus::load(path, &short_dir, hasher);
                pb.inc(1);
                locus
            })
            .collect::<Result<_>>()?;

        let total_alleles: usize = loci.iter().map(|l| l.alleles.len()).sum();
        pb.finish_with_message(format!(
            "✅ Schema loaded: {} loci, {} alleles",
            loci.len(),
            total_alleles
        ));

        let modes_path = root.join(LOCI_MODES_FILE);
        let length_modes = if modes_path.exists() {
            let content =
                fs::read_to_string(&modes_path).map_err(|e| CallerError::io(&modes_path, e))?;
            let stored: BTreeMap<String, LengthMode> = serde_json::from_str(&content)
                .map_err(|e| CallerError::parse(&modes_path, e.to_string()))?;
            let mut selected = BTreeMap::new();
            for locus in &loci {
                let mode = stored.get(&locus.name).cloned().ok_or_else(|| {
                    CallerError::schema(format!("No length mode stored for locus '{}'", locus.name))
                })?;
                selected.insert(locus.name.clone(), mode);
            }
            selected
        } else {
            log::info!("No {} found, computing length modes from alleles", LOCI_MODES_FILE);
            loci.iter()
                .map(|locus| {
                    let lengths = locus.alleles.iter().map(|a| a.sequence.len()).collect();
                    (locus.name.clone(), LengthMode::from_lengths(lengths))
                })
                .collect()
        };

        let self_scores = SelfScoreTable::load(&short_dir.join(SELF_SCORES_FILE))?;

        Ok(Self {
            root: root.to_path_buf(),
            loci,
            length_modes,
            self_scores,
        })
    }

    /// Rewrite the length-mode and self-score tables.
    ///
    /// Modes of loci not loaded in this run are preserved from disk.
    pub fn write_tables(&self) -> Result<()> {
        let modes_path = self.modes_path();
        let mut modes: BTreeMap<String, LengthMode> = if modes_path.exists() {
            let content =
                fs::read_to_string(&modes_path).map_err(|e| CallerError::io(&modes_path, e))?;
            serde_json::from_str(&content)
                .map_err(|e| CallerError::parse(&modes_path, e.to_string()))?
        } else {
            BTreeMap::new()
        };
        modes.extend(self.length_modes.clone());

        write_json_atomic(&modes_path, &modes)?;
        write_json_atomic(&self.self_scores_path(), &self.self_scores)
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec(value)
        .map_err(|e| CallerError::parse(path, format!("serialization failed: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| CallerError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CallerError::io(path, e))
}
