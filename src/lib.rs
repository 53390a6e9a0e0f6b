// lib.rs - cgcall library root

//! # cgcall - Allele caller for cgMLST/wgMLST schemas
//!
//! Assigns every locus of a schema an allele call in every input genome.
//! Identical DNA and protein sequences are collapsed first, so each distinct
//! sequence is classified once; the remainder is resolved with BLAST Score
//! Ratios against the loci's representative alleles.
//!
//! ## Features
//!
//! - **Deduplication**: content digests (SHA256 or MD5) with occurrence lists
//! - **Clustering**: minimizer clustering around representatives before alignment
//! - **Discovery**: iterative promotion of new representatives
//! - **Schema growth**: inferred alleles appended with stable, increasing ids
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use cgcall::prelude::*;
//! use std::sync::Arc;
//!
//! let config = CallerConfig {
//!     input_files: "genomes".into(),
//!     schema_directory: "schema".into(),
//!     output_directory: "results".into(),
//!     cds_input: true,
//!     ..CallerConfig::default()
//! };
//! let aligner = BlastAligner::locate(None)?;
//! let caller = AlleleCaller::new(config, Arc::new(Sha256Hasher), &aligner, None, LociFilter::default());
//! let run = caller.run()?;
//! print_summary(&run);
//! # Ok::<(), cgcall::error::CallerError>(())
//! ```

// Re-export all main modules
pub mod cli;
pub mod core;
pub mod data;
pub mod error;
pub mod hashers;
pub mod output;

// Convenience prelude for common imports
pub mod prelude {
    pub use crate::cli::{validate_args, Args, ValidationResult};
    pub use crate::core::{AlleleCall, AlleleCaller, CallCode, CallerConfig, CallerRun};
    pub use crate::core::{Aligner, BlastAligner, PredictionMode, ProdigalPredictor};
    pub use crate::data::{GenomeSet, LociFilter, Schema};
    pub use crate::error::CallerError;
    pub use crate::hashers::{HasherRegistry, Md5Hasher, SequenceDigest, SequenceHasher, Sha256Hasher};
    pub use crate::output::{print_summary, write_outputs};
}

// Re-export main types at the root level for convenience
pub use cli::{Args, ValidationResult};
pub use core::{AlleleCaller, CallerConfig, CallerRun};
pub use error::CallerError;
pub use hashers::{HasherRegistry, SequenceHasher};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn get_info() -> String {
    format!("cgcall v{} - Allele caller for cgMLST/wgMLST schemas", VERSION)
}
