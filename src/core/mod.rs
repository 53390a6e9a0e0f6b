// mod.rs - Core logic module

pub mod aligner;
pub mod assign;
pub mod bsr;
pub mod classify;
pub mod cluster;
pub mod dedup;
pub mod discovery;
pub mod minimizer;
pub mod pipeline;
pub mod prediction;
pub mod search;

// Re-export main types for convenience
pub use aligner::{Aligner, AlignmentRequest, AlignmentRow, BlastAligner};
pub use assign::{AlleleCall, LocusAssignment, NewAllele, SchemaUpdate};
pub use classify::{CallCode, Classification, ClassifierParams, LocusState, Match};
pub use cluster::{ClusterParams, ClusteringMode};
pub use dedup::{deduplicate, DedupTable, InputSequence};
pub use discovery::{DiscoveryReport, RoundReport};
pub use pipeline::{AlleleCaller, CallerConfig, CallerRun, InvalidCds, RunStats};
pub use prediction::{FailedGenome, GenePredictor, PredictionMode, ProdigalPredictor};
