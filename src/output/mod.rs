// mod.rs - Run output writers

use crate::core::assign::AlleleCall;
use crate::core::classify::{CallCode, Match};
use crate::core::pipeline::{CallerConfig, CallerRun, InvalidCds, RunStats};
use crate::core::prediction::FailedGenome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub const ARCHIVE_FILE: &str = "classifications.json.lz4";
pub const INVALID_CDS_FILE: &str = "invalid_cds.txt";
pub const FAILED_GENOMES_FILE: &str = "failed_genomes.tsv";

const ARCHIVE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub version: String,
    pub created: String,
    pub command_line: String,
    pub parameters: CallerConfig,
    pub stats: RunStats,
    pub format_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenomeRecord {
    pub genome: u32,
    pub code: CallCode,
    pub matches: Vec<Match>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocusCalls {
    pub locus: String,
    /// One printable call per genome, in genome order
    pub calls: Vec<String>,
    pub records: Vec<GenomeRecord>,
    pub new_alleles: Vec<u32>,
}

/// Every classification record of a run, with run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationArchive {
    pub metadata: ArchiveMetadata,
    pub genomes: Vec<String>,
    pub loci: Vec<LocusCalls>,
}

impl ClassificationArchive {
    pub fn from_run(run: &CallerRun, config: &CallerConfig, command_line: &str) -> Self {
        let loci = run
            .states
            .iter()
            .zip(&run.assignments)
            .map(|(state, assignment)| LocusCalls {
                locus: assignment.locus.clone(),
                calls: assignment.calls.iter().map(|c| c.to_string()).collect(),
                records: state
                    .records
                    .iter()
                    .map(|(&genome, record)| GenomeRecord {
                        genome,
                        code: record.classification().code(),
                        matches: record.matches().to_vec(),
                    })
                    .collect(),
                new_alleles: assignment.novel.iter().map(|a| a.id).collect(),
            })
            .collect();

        Self {
            metadata: ArchiveMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                created: chrono::Utc::now().to_rfc3339(),
                command_line: command_line.to_string(),
                parameters: config.clone(),
                stats: run.stats,
                format_version: ARCHIVE_FORMAT_VERSION,
            },
            genomes: run.genomes.iter().map(|g| g.name.clone()).collect(),
            loci,
        }
    }
}

/// Ensure parent directory exists before creating file
fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .map_err(|e| format!("Failed to create parent directory '{}': {}", parent.display(), e))?;
    }
    Ok(())
}

fn write_header(writer: &mut impl Write, command_line: &str) -> Result<(), String> {
    writeln!(writer, "# Command: {}", command_line).map_err(|e| format!("Write error: {}", e))?;
    writeln!(writer, "# Generated: {}", chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))
        .map_err(|e| format!("Write error: {}", e))?;
    writeln!(writer, "# cgcall v{}", env!("CARGO_PKG_VERSION")).map_err(|e| format!("Write error: {}", e))
}

/// JSON, LZ4-compressed with the uncompressed size prepended
pub fn write_archive(path: &Path, archive: &ClassificationArchive) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let data = serde_json::to_vec(archive).map_err(|e| format!("Failed to serialize classifications: {}", e))?;
    let compressed = lz4_flex::compress_prepend_size(&data);
    std::fs::write(path, &compressed)
        .map_err(|e| format!("Failed to write '{}': {}", path.display(), e))?;
    println!(
        "✅ Classifications written to: {} ({} KB)",
        path.display(),
        compressed.len() / 1024
    );
    Ok(())
}

pub fn read_archive(path: &Path) -> Result<ClassificationArchive, String> {
    let compressed = std::fs::read(path).map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let data = lz4_flex::decompress_size_prepended(&compressed)
        .map_err(|e| format!("Failed to decompress '{}': {}", path.display(), e))?;
    let archive: ClassificationArchive =
        serde_json::from_slice(&data).map_err(|e| format!("Failed to parse '{}': {}", path.display(), e))?;
    if archive.metadata.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(format!(
            "Unsupported archive format version {} (expected {})",
            archive.metadata.format_version, ARCHIVE_FORMAT_VERSION
        ));
    }
    Ok(archive)
}

/// One `<id>: <reason>` line per excluded CDS
pub fn write_invalid_cds(path: &Path, invalid: &[InvalidCds], command_line: &str) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|e| format!("Failed to create output file '{}': {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, command_line)?;
    for cds in invalid {
        writeln!(writer, "{}: {}", cds.id, cds.reason).map_err(|e| format!("Write error: {}", e))?;
    }
    writer.flush().map_err(|e| format!("Flush error: {}", e))
}

pub fn write_failed_genomes(path: &Path, failed: &[FailedGenome], command_line: &str) -> Result<(), String> {
    ensure_parent_dir(path)?;
    let file = File::create(path).map_err(|e| format!("Failed to create output file '{}': {}", path.display(), e))?;
    let mut writer = BufWriter::new(file);
    write_header(&mut writer, command_line)?;
    writeln!(writer, "genome\tpath\treason").map_err(|e| format!("Write error: {}", e))?;
    for genome in failed {
        writeln!(writer, "{}\t{}\t{}", genome.name, genome.path.display(), genome.reason)
            .map_err(|e| format!("Write error: {}", e))?;
    }
    writer.flush().map_err(|e| format!("Flush error: {}", e))
}

/// Number of (genome, locus) pairs per code, LNF included
pub fn code_totals(run: &CallerRun) -> BTreeMap<&'static str, usize> {
    let mut totals: BTreeMap<&'static str, usize> = CallCode::ALL.iter().map(|c| (c.as_str(), 0)).collect();
    totals.insert("LNF", 0);
    for call in run.assignments.iter().flat_map(|a| a.calls.iter()) {
        let key = match call {
            AlleleCall::Lnf => "LNF",
            other => other.code().map(|c| c.as_str()).unwrap_or("LNF"),
        };
        *totals.entry(key).or_insert(0) += 1;
    }
    totals
}

pub fn print_summary(run: &CallerRun) {
    println!("📊 Classification summary ({} genomes × {} loci):", run.genomes.len(), run.assignments.len());
    for (code, count) in code_totals(run) {
        println!("   {:<7} {}", code, count);
    }
    let added: usize = run.assignments.iter().map(|a| a.novel.len()).sum();
    println!("   New alleles: {}", added);
    if !run.failed.is_empty() {
        println!("⚠️  {} genomes dropped, see {}", run.failed.len(), FAILED_GENOMES_FILE);
    }
}

/// Write every output file of a run into `dir`
pub fn write_outputs(dir: &Path, run: &CallerRun, config: &CallerConfig, command_line: &str) -> Result<(), String> {
    create_dir_all(dir).map_err(|e| format!("Failed to create output directory '{}': {}", dir.display(), e))?;
    let archive = ClassificationArchive::from_run(run, config, command_line);
    write_archive(&dir.join(ARCHIVE_FILE), &archive)?;
    write_invalid_cds(&dir.join(INVALID_CDS_FILE), &run.invalid, command_line)?;
    if !run.failed.is_empty() {
        write_failed_genomes(&dir.join(FAILED_GENOMES_FILE), &run.failed, command_line)?;
    }
    print_summary(run);
    Ok(())
}
