// config.rs - Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Input/Output
    pub input_files: Option<String>,
    pub schema_directory: Option<String>,
    pub output_directory: Option<String>,
    pub ptf: Option<String>,

    // Classification
    pub bsr: Option<f64>,
    pub minimum_length: Option<usize>,
    pub translation_table: Option<u8>,
    pub size_threshold: Option<f64>,

    // Clustering
    pub word_size: Option<usize>,
    pub window_size: Option<usize>,
    pub clustering_sim: Option<f64>,
    pub clustering_mode: Option<String>,

    // External tools
    pub cpu: Option<usize>,
    pub blast_path: Option<String>,
    pub prodigal_path: Option<String>,
    pub prodigal_mode: Option<String>,
    pub cds_input: Option<bool>,

    // Loci selection
    pub hasher_type: Option<String>,
    pub include_loci: Option<String>,
    pub exclude_loci: Option<String>,
    pub genes_list: Option<String>,

    // Flags
    pub no_inferred: Option<bool>,
    pub no_cleanup: Option<bool>,
    pub dry_run: Option<bool>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self {
            input_files: None,
            schema_directory: None,
            output_directory: None,
            ptf: None,
            bsr: None,
            minimum_length: None,
            translation_table: None,
            size_threshold: None,
            word_size: None,
            window_size: None,
            clustering_sim: None,
            clustering_mode: None,
            cpu: None,
            blast_path: None,
            prodigal_path: None,
            prodigal_mode: None,
            cds_input: None,
            hasher_type: None,
            include_loci: None,
            exclude_loci: None,
            genes_list: None,
            no_inferred: None,
            no_cleanup: None,
            dry_run: None,
        }
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        println!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        println!("📄 Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Generate a sample configuration file with comments
    pub fn generate_sample() -> String {
        r#"# cgcall.toml - Configuration file for cgcall
# Command line arguments will override these settings

# =============================================================================
# INPUT/OUTPUT
# =============================================================================

# Directory of genome FASTA files, or a file listing one path per line
input_files = "/path/to/genomes"

# Schema directory (locus FASTA files, short/ representatives)
schema_directory = "/path/to/schema"

# Directory for classification results
output_directory = "results"

# Prodigal training file
# ptf = "/path/to/schema/training.trn"

# =============================================================================
# CLASSIFICATION
# =============================================================================

# BLAST Score Ratio threshold
bsr = 0.6

# Minimum CDS length in nucleotides
minimum_length = 201

# Genetic code used to translate CDS
translation_table = 11

# Allowed deviation from the locus length mode
size_threshold = 0.2

# =============================================================================
# CLUSTERING
# =============================================================================

word_size = 5
window_size = 5
clustering_sim = 0.2

# Clustering mode: greedy, full
clustering_mode = "greedy"

# =============================================================================
# EXTERNAL TOOLS
# =============================================================================

# Number of threads (omit for auto-detection)
cpu = 8

# Directory holding blastp and makeblastdb (omit to search PATH)
# blast_path = "/opt/blast/bin"

# Prodigal executable (omit to search PATH)
# prodigal_path = "/usr/local/bin/prodigal"

# Prodigal mode: single, meta
prodigal_mode = "single"

# Inputs are CDS FASTA files, skip gene prediction
cds_input = false

# =============================================================================
# LOCI SELECTION
# =============================================================================

# Sequence hasher type: sha256, md5
hasher_type = "sha256"

# Include only loci matching regex pattern
# include_loci = "INNUENDO.*"

# Exclude loci matching regex pattern
# exclude_loci = "deprecated.*"

# Call only loci listed in a file (one locus per line)
# genes_list = "loci.txt"

# =============================================================================
# FLAGS
# =============================================================================

# Do not add inferred alleles to the schema
no_inferred = false

# Keep intermediate files
no_cleanup = false

# Validate inputs without computation (dry run)
dry_run = false
"#
        .to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
