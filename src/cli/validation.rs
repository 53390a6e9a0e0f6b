// validation.rs - Input validation utilities

use crate::cli::args::Args;
use crate::core::minimizer::MAX_WORD_SIZE;
use crate::core::{CallerConfig, ClusterParams, ClusteringMode, PredictionMode};
use crate::data::{GeneticCode, LociFilter};
use crate::hashers::HasherRegistry;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug)]
pub struct ValidationResult {
    pub config: CallerConfig,
    pub loci_filter: LociFilter,
}

/// Validate all command line arguments
pub fn validate_args(args: &Args) -> Result<ValidationResult, String> {
    let input_files = required_path(&args.input_files, "--input-files")?;
    let schema_directory = required_path(&args.schema_directory, "--schema-directory")?;
    let output_directory = required_path(&args.output_directory, "--output-directory")?;

    if !input_files.exists() {
        return Err(format!("Input path '{}' does not exist", input_files.display()));
    }
    if !schema_directory.is_dir() {
        return Err(format!("Schema directory '{}' does not exist", schema_directory.display()));
    }

    // Validate hasher type
    let registry = HasherRegistry::new();
    if !registry.has_hasher(&args.hasher_type) {
        return Err(format!(
            "Invalid hasher type '{}'. Available: {}",
            args.hasher_type,
            registry.get_hasher_names().join(", ")
        ));
    }

    // Validate thresholds
    if args.bsr <= 0.0 || args.bsr > 1.0 {
        return Err("BSR threshold must be greater than 0.0 and at most 1.0".to_string());
    }
    if args.size_threshold < 0.0 {
        return Err("Size threshold must not be negative".to_string());
    }
    if args.clustering_sim < 0.0 || args.clustering_sim > 1.0 {
        return Err("Clustering similarity must be between 0.0 and 1.0".to_string());
    }
    if args.word_size == 0 || args.window_size == 0 {
        return Err("Word size and window size must be at least 1".to_string());
    }
    if args.word_size > MAX_WORD_SIZE {
        return Err(format!(
            "Word size {} is too large for minimizer clustering (maximum: {})",
            args.word_size, MAX_WORD_SIZE
        ));
    }
    GeneticCode::from_id(args.translation_table)?;

    let clustering_mode = ClusteringMode::from_str(&args.clustering_mode)?;
    let prodigal_mode = PredictionMode::from_str(&args.prodigal_mode)?;

    let cpu = match args.cpu {
        Some(0) => return Err("--cpu must be at least 1".to_string()),
        Some(n) => n,
        None => std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
    };

    let ptf = match &args.ptf {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(format!("Training file '{}' does not exist", path.display()));
            }
            Some(path)
        }
        None if !args.cds_input => find_schema_training_file(&schema_directory)?,
        None => None,
    };

    // Compile regex patterns
    let include_regex = if let Some(pattern) = &args.include_loci {
        Some(Regex::new(pattern).map_err(|e| format!("Invalid include_loci regex: {}", e))?)
    } else {
        None
    };

    let exclude_regex = if let Some(pattern) = &args.exclude_loci {
        Some(Regex::new(pattern).map_err(|e| format!("Invalid exclude_loci regex: {}", e))?)
    } else {
        None
    };

    // Load filter set from file
    let include_set = if let Some(file_path) = &args.genes_list {
        Some(load_set_from_file(file_path)?)
    } else {
        None
    };

    let config = CallerConfig {
        input_files,
        schema_directory,
        output_directory,
        ptf,
        bsr_threshold: args.bsr,
        minimum_length: args.minimum_length,
        translation_table: args.translation_table,
        size_threshold: args.size_threshold,
        clustering: ClusterParams {
            word_size: args.word_size,
            window_size: args.window_size,
            similarity: args.clustering_sim,
            mode: clustering_mode,
        },
        cpu,
        blast_path: args.blast_path.as_ref().map(PathBuf::from),
        prodigal_path: args.prodigal_path.as_ref().map(PathBuf::from),
        prodigal_mode,
        cds_input: args.cds_input,
        hasher_type: args.hasher_type.clone(),
        no_inferred: args.no_inferred,
        no_cleanup: args.no_cleanup,
    };

    Ok(ValidationResult {
        config,
        loci_filter: LociFilter {
            include_regex,
            exclude_regex,
            include_set,
        },
    })
}

fn required_path(value: &Option<String>, flag: &str) -> Result<PathBuf, String> {
    value
        .as_ref()
        .map(PathBuf::from)
        .ok_or_else(|| format!("{} is required (on the command line or in the config file)", flag))
}

/// Training file shipped with the schema (`*.trn` in its root)
fn find_schema_training_file(schema_directory: &Path) -> Result<Option<PathBuf>, String> {
    let entries = std::fs::read_dir(schema_directory)
        .map_err(|e| format!("Failed to read schema directory '{}': {}", schema_directory.display(), e))?;

    let mut training_files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "trn"))
        .collect();
    training_files.sort();

    if training_files.len() > 1 {
        println!(
            "⚠️  Schema has {} training files, using {}",
            training_files.len(),
            training_files[0].display()
        );
    }
    Ok(training_files.into_iter().next())
}

/// Load a set of strings from a file (one per line)
fn load_set_from_file(file_path: &str) -> Result<HashSet<String>, String> {
    let file = File::open(file_path)
        .map_err(|e| format!("Failed to open filter file '{}': {}", file_path, e))?;

    let reader = BufReader::new(file);
    let mut set = HashSet::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("Failed to read line {} from '{}': {}", line_num + 1, file_path, e))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            // Lists may name loci by file, e.g. `locusA.fasta`
            let name = trimmed.strip_suffix(".fasta").unwrap_or(trimmed);
            set.insert(name.to_string());
        }
    }

    println!("📋 Loaded {} items from filter file '{}'", set.len(), file_path);
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    struct Dirs {
        root: tempfile::TempDir,
    }

    impl Dirs {
        fn new() -> Self {
            let root = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(root.path().join("genomes")).unwrap();
            std::fs::create_dir_all(root.path().join("schema")).unwrap();
            Self { root }
        }

        fn path(&self, name: &str) -> String {
            self.root.path().join(name).display().to_string()
        }

        fn args(&self, extra: &[&str]) -> Args {
            let genomes = self.path("genomes");
            let schema = self.path("schema");
            let output = self.path("out");
            let mut argv = vec![
                "--input-files",
                genomes.as_str(),
                "--schema-directory",
                schema.as_str(),
                "--output-directory",
                output.as_str(),
            ];
            argv.extend_from_slice(extra);
            Args::from_args(&["cgcall"], &argv).unwrap()
        }
    }

    #[test]
    fn test_defaults_produce_caller_config() {
        let dirs = Dirs::new();
        let result = validate_args(&dirs.args(&["--cpu", "2"])).unwrap();
        assert_eq!(result.config.bsr_threshold, 0.6);
        assert_eq!(result.config.minimum_length, 201);
        assert_eq!(result.config.clustering, ClusterParams::default());
        assert_eq!(result.config.prodigal_mode, PredictionMode::Single);
        assert_eq!(result.config.cpu, 2);
        assert!(result.config.ptf.is_none());
        assert!(result.loci_filter.accepts("anything"));
    }

    #[test]
    fn test_schema_training_file_is_picked_up() {
        let dirs = Dirs::new();
        let trn = dirs.root.path().join("schema").join("species.trn");
        std::fs::write(&trn, b"training").unwrap();

        let result = validate_args(&dirs.args(&[])).unwrap();
        assert_eq!(result.config.ptf, Some(trn));

        let result = validate_args(&dirs.args(&["--cds-input"])).unwrap();
        assert!(result.config.ptf.is_none());
    }

    #[test]
    fn test_word_size_limit() {
        let dirs = Dirs::new();
        let limit = MAX_WORD_SIZE.to_string();
        let over = (MAX_WORD_SIZE + 1).to_string();
        assert!(validate_args(&dirs.args(&["--word-size", limit.as_str()])).is_ok());
        let err = validate_args(&dirs.args(&["--word-size", over.as_str()]))
            .err()
            .unwrap();
        assert!(err.contains("too large"));
    }

    #[test]
    fn test_loci_filters() {
        let dirs = Dirs::new();
        let list = dirs.path("genes.txt");
        std::fs::write(&list, "locusA.fasta\nlocusB\n\n").unwrap();

        let result = validate_args(&dirs.args(&["--genes-list", list.as_str(), "--exclude-loci", "B$"])).unwrap();
        assert!(result.loci_filter.accepts("locusA"));
        assert!(!result.loci_filter.accepts("locusB"));
        assert!(!result.loci_filter.accepts("locusC"));
    }

    #[test]
    fn test_invalid_arguments_are_rejected() {
        let dirs = Dirs::new();
        assert!(validate_args(&dirs.args(&["--bsr", "1.5"])).is_err());
        assert!(validate_args(&dirs.args(&["--translation-table", "7"])).is_err());
        assert!(validate_args(&dirs.args(&["--clustering-mode", "fuzzy"])).is_err());
        assert!(validate_args(&dirs.args(&["--prodigal-mode", "anon"])).is_err());
        assert!(validate_args(&dirs.args(&["--hasher-type", "crc32"])).is_err());
        assert!(validate_args(&dirs.args(&["--cpu", "0"])).is_err());
        assert!(validate_args(&dirs.args(&["--word-size", "0"])).is_err());
        assert!(validate_args(&dirs.args(&["--include-loci", "("])).is_err());

        let missing = Args::from_args(&["cgcall"], &[]).unwrap();
        assert!(validate_args(&missing).unwrap_err().contains("--input-files"));
    }
}
