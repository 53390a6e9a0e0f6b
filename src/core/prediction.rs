// prediction.rs - Gene prediction collaborator and CDS ingestion

use crate::data::genome::genome_name;
use crate::data::sequence::read_fasta;
use crate::data::{CdsLocation, Strand};
use crate::error::{CallerError, Result};
use bio::alphabets::dna;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use which::which;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionMode {
    Single,
    Meta,
}

impl FromStr for PredictionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(PredictionMode::Single),
            "meta" => Ok(PredictionMode::Meta),
            other => Err(format!("Unknown prodigal mode '{}': use 'single' or 'meta'", other)),
        }
    }
}

impl fmt::Display for PredictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionMode::Single => f.write_str("single"),
            PredictionMode::Meta => f.write_str("meta"),
        }
    }
}

/// One coding sequence from an input genome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredictedCds {
    pub id: String,
    pub sequence: Vec<u8>,
    /// Absent when the input already was a CDS file
    pub location: Option<CdsLocation>,
}

#[derive(Debug, Clone, Default)]
pub struct PredictedGenome {
    pub name: String,
    pub cds: Vec<PredictedCds>,
    pub contig_lengths: HashMap<String, usize>,
}

impl PredictedGenome {
    pub fn has_geometry(&self) -> bool {
        self.cds.iter().any(|c| c.location.is_some())
    }
}

/// Input genome that produced no CDS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedGenome {
    pub name: String,
    pub path: PathBuf,
    pub reason: String,
}

/// External gene finder: one assembly in, coding sequences with coordinates out
pub trait GenePredictor: Send + Sync {
    fn name(&self) -> &'static str;

    fn predict(&self, genome: &Path, workdir: &Path) -> Result<PredictedGenome>;
}

fn cds_id(genome: &str, index: usize) -> String {
    format!("{}-protein{}", genome, index + 1)
}

/// Prodigal wrapper writing GFF output
#[derive(Debug, Clone)]
pub struct ProdigalPredictor {
    program: PathBuf,
    translation_table: u8,
    mode: PredictionMode,
    training_file: Option<PathBuf>,
}

impl ProdigalPredictor {
    /// Use `program` when given, otherwise find `prodigal` on PATH
    pub fn locate(program: Option<&Path>, translation_table: u8, mode: PredictionMode) -> Result<Self> {
        let program = match program {
            Some(path) if path.is_file() => path.to_path_buf(),
            Some(path) => {
                return Err(CallerError::input(format!(
                    "Prodigal executable not found: {}",
                    path.display()
                )))
            }
            None => which("prodigal").map_err(|e| CallerError::input(format!("prodigal: {}", e)))?,
        };
        Ok(Self {
            program,
            translation_table,
            mode,
            training_file: None,
        })
    }

    pub fn with_training_file(mut self, ptf: Option<PathBuf>) -> Self {
        self.training_file = ptf;
        self
    }
}

impl GenePredictor for ProdigalPredictor {
    fn name(&self) -> &'static str {
        "prodigal"
    }

    fn predict(&self, genome: &Path, workdir: &Path) -> Result<PredictedGenome> {
        let name = genome_name(genome);
        let gff = workdir.join(format!("{}.gff", name));
        let mut args: Vec<String> = vec![
            "-i".into(),
            genome.display().to_string(),
            "-g".into(),
            self.translation_table.to_string(),
            "-p".into(),
            self.mode.to_string(),
            "-f".into(),
            "gff".into(),
            "-o".into(),
            gff.display().to_string(),
            "-q".into(),
        ];
        if let Some(ptf) = &self.training_file {
            args.push("-t".into());
            args.push(ptf.display().to_string());
        }

        debug!("Running '{} {}'", self.program.display(), args.join(" "));
        let res = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| CallerError::collaborator(self.name(), e.to_string()))?;
        if !res.status.success() {
            return Err(CallerError::collaborator(
                self.name(),
                format!(
                    "{} on {} ({})",
                    res.status,
                    genome.display(),
                    String::from_utf8_lossy(&res.stderr).trim()
                ),
            ));
        }

        let features = fs::read_to_string(&gff).map_err(|e| CallerError::io(&gff, e))?;
        extract_cds(&name, genome, &features)
    }
}

/// Cut the CDS named in GFF `features` out of the assembly's contigs
pub fn extract_cds(name: &str, assembly: &Path, features: &str) -> Result<PredictedGenome> {
    let contigs: HashMap<String, Vec<u8>> = read_fasta(assembly)?
        .into_iter()
        .map(|r| (r.id, r.sequence.to_ascii_uppercase()))
        .collect();
    let contig_lengths = contigs.iter().map(|(id, seq)| (id.clone(), seq.len())).collect();

    let mut cds = Vec::new();
    for (line_no, line) in features.lines().enumerate() {
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 9 {
            return Err(CallerError::parse(
                assembly,
                format!("GFF line {} has {} columns", line_no + 1, fields.len()),
            ));
        }
        if fields[2] != "CDS" {
            continue;
        }

        let coordinate = |s: &str| -> Result<usize> {
            s.parse()
                .map_err(|_| CallerError::parse(assembly, format!("bad coordinate '{}' on GFF line {}", s, line_no + 1)))
        };
        let start = coordinate(fields[3])?;
        let end = coordinate(fields[4])?;
        let strand = match fields[6] {
            "-" => Strand::Reverse,
            _ => Strand::Forward,
        };
        let contig = contigs.get(fields[0]).ok_or_else(|| {
            CallerError::parse(assembly, format!("GFF names unknown contig '{}'", fields[0]))
        })?;
        if start == 0 || start > end || end > contig.len() {
            return Err(CallerError::parse(
                assembly,
                format!("CDS {}..{} outside contig '{}'", start, end, fields[0]),
            ));
        }

        let slice = &contig[start - 1..end];
        let sequence = match strand {
            Strand::Forward => slice.to_vec(),
            Strand::Reverse => dna::revcomp(slice),
        };
        cds.push(PredictedCds {
            id: cds_id(name, cds.len()),
            sequence,
            location: Some(CdsLocation {
                contig: fields[0].to_string(),
                start,
                end,
                strand,
            }),
        });
    }

    Ok(PredictedGenome {
        name: name.to_string(),
        cds,
        contig_lengths,
    })
}

/// Read a file of already-extracted coding sequences
pub fn read_cds_file(path: &Path) -> Result<PredictedGenome> {
    let name = genome_name(path);
    let cds = read_fasta(path)?
        .into_iter()
        .enumerate()
        .map(|(i, record)| PredictedCds {
            id: cds_id(&name, i),
            sequence: record.sequence,
            location: None,
        })
        .collect();
    Ok(PredictedGenome {
        name,
        cds,
        contig_lengths: HashMap::new(),
    })
}

/// Predict (or read) CDS for every input, in input order.
///
/// Genomes that fail or yield no CDS are dropped with a warning and reported
/// in the second list.
pub fn ingest_genomes(
    predictor: Option<&dyn GenePredictor>,
    inputs: &[PathBuf],
    workdir: &Path,
) -> Result<(Vec<(PathBuf, PredictedGenome)>, Vec<FailedGenome>)> {
    fs::create_dir_all(workdir).map_err(|e| CallerError::io(workdir, e))?;

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let results: Vec<Result<PredictedGenome>> = inputs
        .par_iter()
        .map(|path| {
            let result = match predictor {
                Some(predictor) => predictor.predict(path, workdir),
                None => read_cds_file(path),
            };
            pb.inc(1);
            result
        })
        .collect();
    pb.finish_and_clear();

    let mut genomes = Vec::new();
    let mut failed = Vec::new();
    for (path, result) in inputs.iter().zip(results) {
        let reason = match result {
            Ok(genome) if !genome.cds.is_empty() => {
                genomes.push((path.clone(), genome));
                continue;
            }
            Ok(_) => "no coding sequences found".to_string(),
            // Only collaborator failures drop a genome; anything else is fatal
            Err(e) if e.is_collaborator() => e.to_string(),
            Err(e) => return Err(e),
        };
        warn!("Dropping genome {}: {}", path.display(), reason);
        failed.push(FailedGenome {
            name: genome_name(path),
            path: path.clone(),
            reason,
        });
    }

    if genomes.is_empty() {
        let hint = match predictor {
            Some(_) => " (for small or fragmented assemblies try --prodigal-mode meta)",
            None => "",
        };
        return Err(CallerError::input(format!("No CDS could be obtained from any input{}", hint)));
    }
    Ok((genomes, failed))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingPredictor;

    impl GenePredictor for FailingPredictor {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn predict(&self, genome: &Path, _workdir: &Path) -> Result<PredictedGenome> {
            if genome_name(genome) == "bad" {
                Err(CallerError::collaborator("failing", "no genes"))
            } else {
                read_cds_file(genome)
            }
        }
    }

    fn assembly(dir: &Path) -> PathBuf {
        let path = dir.join("sample.fasta");
        // contig_1: ATG AAA GCT TAA at 3..14, reverse-strand CDS at 17..28
        fs::write(&path, ">contig_1 desc\nCCATGAAAGCTTAAGGTTAAGCTTTCATGG\n>contig_2\nATGTAA\n").unwrap();
        path
    }

    #[test]
    fn test_extract_forward_and_reverse() {
        let dir = tempfile::tempdir().unwrap();
        let path = assembly(dir.path());
        let gff = "##gff-version  3\n\
            # Sequence Data: seqnum=1;seqlen=30\n\
            contig_1\tProdigal_v2.6.3\tCDS\t3\t14\t20.1\t+\t0\tID=1_1\n\
            contig_1\tProdigal_v2.6.3\tCDS\t17\t28\t10.0\t-\t0\tID=1_2\n";

        let genome = extract_cds("sample", &path, gff).unwrap();
        assert_eq!(genome.cds.len(), 2);
        assert_eq!(genome.cds[0].id, "sample-protein1");
        assert_eq!(genome.cds[0].sequence, b"ATGAAAGCTTAA".to_vec());
        assert_eq!(genome.cds[1].sequence, b"ATGAAAGCTTAA".to_vec());
        let location = genome.cds[1].location.as_ref().unwrap();
        assert_eq!(location.strand, Strand::Reverse);
        assert_eq!((location.start, location.end), (17, 28));
        assert_eq!(genome.contig_lengths["contig_1"], 30);
        assert_eq!(genome.contig_lengths["contig_2"], 6);
        assert!(genome.has_geometry());
    }

    #[test]
    fn test_extract_rejects_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = assembly(dir.path());
        let gff = "contig_2\tProdigal\tCDS\t1\t9\t1\t+\t0\tID=2_1\n";
        assert!(matches!(extract_cds("sample", &path, gff), Err(CallerError::Parse { .. })));
    }

    #[test]
    fn test_read_cds_file_has_no_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GCA_1.ffn");
        fs::write(&path, ">a\nATGAAATAA\n>b\nATGCCCTAA\n").unwrap();
        let genome = read_cds_file(&path).unwrap();
        assert_eq!(genome.name, "GCA_1");
        assert_eq!(genome.cds[1].id, "GCA_1-protein2");
        assert!(!genome.has_geometry());
    }

    #[test]
    fn test_failed_genomes_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.fasta");
        let bad = dir.path().join("bad.fasta");
        let empty = dir.path().join("empty.fasta");
        fs::write(&good, ">a\nATGAAATAA\n").unwrap();
        fs::write(&bad, ">a\nATGAAATAA\n").unwrap();
        fs::write(&empty, "").unwrap();

        let inputs = vec![bad, empty, good.clone()];
        let (genomes, failed) = ingest_genomes(Some(&FailingPredictor), &inputs, &dir.path().join("work")).unwrap();
        assert_eq!(genomes.len(), 1);
        assert_eq!(genomes[0].0, good);
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].name, "bad");
        assert_eq!(failed[1].reason, "no coding sequences found");

        let only_bad = vec![dir.path().join("bad.fasta")];
        assert!(matches!(
            ingest_genomes(Some(&FailingPredictor), &only_bad, dir.path()),
            Err(CallerError::Input(_))
        ));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("META".parse::<PredictionMode>().unwrap(), PredictionMode::Meta);
        assert!("normal".parse::<PredictionMode>().is_err());
        assert!(ProdigalPredictor::locate(Some(Path::new("/nonexistent/prodigal")), 11, PredictionMode::Single).is_err());
    }
}
