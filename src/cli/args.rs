// args.rs - Command line arguments definition

use argh::FromArgs;

#[derive(FromArgs)]
/// cgcall - Allele caller for cgMLST/wgMLST schemas
pub struct Args {
    /// directory of FASTA files, or a text file listing one path per line
    #[argh(option)]
    pub input_files: Option<String>,

    /// path to the schema directory
    #[argh(option)]
    pub schema_directory: Option<String>,

    /// directory for classification results
    #[argh(option)]
    pub output_directory: Option<String>,

    /// prodigal training file (default: the schema's, if any)
    #[argh(option)]
    pub ptf: Option<String>,

    /// BLAST Score Ratio threshold (default: 0.6)
    #[argh(option, default = "0.6")]
    pub bsr: f64,

    /// minimum CDS length in nucleotides (default: 201)
    #[argh(option, default = "201")]
    pub minimum_length: usize,

    /// genetic code used to translate CDS (default: 11)
    #[argh(option, default = "11")]
    pub translation_table: u8,

    /// allowed deviation from the locus length mode (default: 0.2)
    #[argh(option, default = "0.2")]
    pub size_threshold: f64,

    /// minimizer k-mer size (default: 5)
    #[argh(option, default = "5")]
    pub word_size: usize,

    /// minimizer window size (default: 5)
    #[argh(option, default = "5")]
    pub window_size: usize,

    /// minimum shared minimizer fraction to join a cluster (default: 0.2)
    #[argh(option, default = "0.2")]
    pub clustering_sim: f64,

    /// clustering mode: greedy, full (default: greedy)
    #[argh(option, default = "String::from(\"greedy\")")]
    pub clustering_mode: String,

    /// number of threads (default: auto-detect)
    #[argh(option)]
    pub cpu: Option<usize>,

    /// directory holding the BLAST+ executables (default: PATH)
    #[argh(option)]
    pub blast_path: Option<String>,

    /// prodigal executable (default: PATH)
    #[argh(option)]
    pub prodigal_path: Option<String>,

    /// prodigal mode: single, meta (default: single)
    #[argh(option, default = "String::from(\"single\")")]
    pub prodigal_mode: String,

    /// inputs are CDS FASTA files, skip gene prediction
    #[argh(switch)]
    pub cds_input: bool,

    /// sequence hasher type: sha256, md5 (default: sha256)
    #[argh(option, default = "String::from(\"sha256\")")]
    pub hasher_type: String,

    /// include only loci matching regex pattern
    #[argh(option)]
    pub include_loci: Option<String>,

    /// exclude loci matching regex pattern
    #[argh(option)]
    pub exclude_loci: Option<String>,

    /// call only loci listed in a file (one locus per line)
    #[argh(option)]
    pub genes_list: Option<String>,

    /// do not add inferred alleles to the schema
    #[argh(switch)]
    pub no_inferred: bool,

    /// keep intermediate files
    #[argh(switch)]
    pub no_cleanup: bool,

    /// validate inputs without computation (dry run)
    #[argh(switch)]
    pub dry_run: bool,

    /// path to TOML configuration file
    #[argh(option)]
    pub config: Option<String>,

    /// generate sample configuration file and exit
    #[argh(switch)]
    pub generate_config: bool,
}
