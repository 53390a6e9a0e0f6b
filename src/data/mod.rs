// mod.rs - Data structures module

pub mod genome;
pub mod occurrences;
pub mod schema;
pub mod sequence;
pub mod translation;

// Re-export main types for convenience
pub use genome::{CdsLocation, ContigSpan, Genome, GenomeGeometry, GenomeSet, Strand};
pub use occurrences::OccurrenceList;
pub use schema::{LengthMode, LociFilter, Locus, Schema, SelfScore, SelfScoreTable};
pub use sequence::SequenceRecord;
pub use translation::{GeneticCode, TranslationError};
